// A recording GPU backend for unit tests.
//
// Every object the core creates is a fake handle counted per kind, so tests
// can assert that creation paths unwind and teardown releases everything.
// The mock also tracks binary-semaphore and fence state and rejects the
// misuse a validation layer would report (signaling an already signaled
// semaphore, waiting on a fence that nothing will signal).

use std::collections::{HashMap, HashSet, VecDeque};
use std::ptr::NonNull;
use std::sync::Arc;

use anyhow::{bail, Result};
use ash::vk::{self, Handle};
use parking_lot::Mutex;

use crate::gpu::{
    AcquireOutcome, DeviceDesc, GpuBackend, GpuDevice, HostBuffer, PassBegin, PresentOutcome,
    SwapchainDesc,
};
use crate::pipeline::{LineDraw, LinePipelineDesc, VertexLayout};

/// One recorded draw with the vertex data it read.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub vertex_count: u32,
    pub color: [f32; 4],
    pub line_width: f32,
    pub vertices: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BeginPass {
        extent: (u32, u32),
        clear_color: [f32; 4],
    },
    Draw(DrawRecord),
    EndPass,
    Submit,
    Present(u32),
}

struct MockState {
    next_handle: u64,
    live: HashMap<&'static str, i64>,
    failures: HashSet<&'static str>,

    window: vk::Extent2D,
    extent_defined: bool,
    formats: Vec<vk::SurfaceFormatKHR>,
    present_modes: Vec<vk::PresentModeKHR>,
    line_width_range: Option<[f32; 2]>,

    buffers: HashMap<u64, Vec<u8>>,
    pipelines: HashMap<u64, VertexLayout>,
    swapchains: HashMap<u64, u32>,
    signaled_semaphores: HashSet<u64>,
    fences: HashMap<u64, bool>,
    recording: HashSet<u64>,
    next_image: u32,

    acquire_script: VecDeque<AcquireOutcome>,
    present_script: VecDeque<PresentOutcome>,

    commands: Vec<Command>,
    swapchains_created: u32,
    last_swapchain: Option<SwapchainDesc>,
    wait_idles: u32,
}

impl MockState {
    fn mint(&mut self, kind: &'static str) -> Result<u64> {
        if self.failures.remove(kind) {
            if kind == "buffer" {
                return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY.into());
            }
            bail!("injected {} failure", kind);
        }
        self.next_handle += 1;
        *self.live.entry(kind).or_default() += 1;
        Ok(self.next_handle)
    }

    /// Fail a per-frame call if one was requested for it.
    fn check(&mut self, call: &'static str) -> Result<()> {
        if !self.failures.remove(call) {
            return Ok(());
        }
        match call {
            "submit" => Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY.into()),
            _ => bail!("injected {} failure", call),
        }
    }

    fn release(&mut self, kind: &'static str, handle: u64) {
        assert_ne!(handle, 0, "destroying a null {}", kind);
        let count = self.live.entry(kind).or_default();
        *count -= 1;
        assert!(*count >= 0, "{} destroyed more often than created", kind);
    }
}

/// Shared view of the mock; clones observe the same state.
#[derive(Clone)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                next_handle: 0,
                live: HashMap::new(),
                failures: HashSet::new(),
                window: vk::Extent2D {
                    width: 800,
                    height: 600,
                },
                extent_defined: true,
                formats: vec![vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                }],
                present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
                line_width_range: Some([1.0, 8.0]),
                buffers: HashMap::new(),
                pipelines: HashMap::new(),
                swapchains: HashMap::new(),
                signaled_semaphores: HashSet::new(),
                fences: HashMap::new(),
                recording: HashSet::new(),
                next_image: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                commands: Vec::new(),
                swapchains_created: 0,
                last_swapchain: None,
                wait_idles: 0,
            })),
        }
    }

    /// Open a device without going through a descriptor.
    pub fn open_device(&self) -> MockGpu {
        self.try_open().expect("mock device")
    }

    fn try_open(&self) -> Result<MockGpu> {
        let mut state = self.state.lock();
        let instance = state.mint("instance")?;
        let surface = match state.mint("surface") {
            Ok(surface) => surface,
            Err(e) => {
                state.release("instance", instance);
                return Err(e);
            }
        };
        let device = match state.mint("device") {
            Ok(device) => device,
            Err(e) => {
                state.release("surface", surface);
                state.release("instance", instance);
                return Err(e);
            }
        };
        drop(state);

        Ok(MockGpu {
            state: self.state.clone(),
            instance,
            surface,
            device,
        })
    }

    pub fn live(&self, kind: &str) -> i64 {
        self.state.lock().live.get(kind).copied().unwrap_or(0)
    }

    /// Objects of any kind still alive.
    pub fn outstanding(&self) -> i64 {
        self.state.lock().live.values().sum()
    }

    /// The next creation of `kind` fails. `begin_pass`, `end_pass` and
    /// `submit` fail the next call of that name instead.
    pub fn fail_next(&self, kind: &'static str) {
        self.state.lock().failures.insert(kind);
    }

    pub fn set_window(&self, width: u32, height: u32) {
        self.state.lock().window = vk::Extent2D { width, height };
    }

    /// Surfaces that leave the extent to the swapchain (Wayland).
    pub fn set_extent_defined(&self, defined: bool) {
        self.state.lock().extent_defined = defined;
    }

    pub fn set_formats(&self, formats: Vec<vk::SurfaceFormatKHR>) {
        self.state.lock().formats = formats;
    }

    pub fn set_line_width_range(&self, range: Option<[f32; 2]>) {
        self.state.lock().line_width_range = range;
    }

    pub fn script_acquire(&self, outcome: AcquireOutcome) {
        self.state.lock().acquire_script.push_back(outcome);
    }

    pub fn script_present(&self, outcome: PresentOutcome) {
        self.state.lock().present_script.push_back(outcome);
    }

    pub fn commands(&self) -> Vec<Command> {
        self.state.lock().commands.clone()
    }

    pub fn submissions(&self) -> usize {
        self.count(|c| matches!(c, Command::Submit))
    }

    pub fn presents(&self) -> usize {
        self.count(|c| matches!(c, Command::Present(_)))
    }

    pub fn draws(&self) -> Vec<DrawRecord> {
        self.state
            .lock()
            .commands
            .iter()
            .filter_map(|c| match c {
                Command::Draw(draw) => Some(draw.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn swapchains_created(&self) -> u32 {
        self.state.lock().swapchains_created
    }

    pub fn last_swapchain(&self) -> Option<SwapchainDesc> {
        self.state.lock().last_swapchain
    }

    pub fn wait_idles(&self) -> u32 {
        self.state.lock().wait_idles
    }

    fn count(&self, pred: impl Fn(&Command) -> bool) -> usize {
        self.state.lock().commands.iter().filter(|c| pred(c)).count()
    }
}

impl GpuBackend for MockBackend {
    type Device = MockGpu;

    fn open(&self, _desc: &DeviceDesc) -> Result<MockGpu> {
        self.try_open()
    }
}

pub struct MockGpu {
    state: Arc<Mutex<MockState>>,
    instance: u64,
    surface: u64,
    device: u64,
}

impl Drop for MockGpu {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.release("surface", self.surface);
        state.release("device", self.device);
        state.release("instance", self.instance);
    }
}

impl GpuDevice for MockGpu {
    fn line_width_range(&self) -> Option<[f32; 2]> {
        self.state.lock().line_width_range
    }

    fn wait_idle(&self) -> Result<()> {
        self.state.lock().wait_idles += 1;
        Ok(())
    }

    fn surface_capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR> {
        let state = self.state.lock();
        let current_extent = if state.extent_defined {
            state.window
        } else {
            vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            }
        };

        Ok(vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent,
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        })
    }

    fn surface_formats(&self) -> Result<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.state.lock().formats.clone())
    }

    fn present_modes(&self) -> Result<Vec<vk::PresentModeKHR>> {
        Ok(self.state.lock().present_modes.clone())
    }

    fn create_command_pool(&mut self) -> Result<vk::CommandPool> {
        Ok(vk::CommandPool::from_raw(self.state.lock().mint("command_pool")?))
    }

    fn destroy_command_pool(&mut self, pool: vk::CommandPool) {
        self.state.lock().release("command_pool", pool.as_raw());
    }

    fn allocate_command_buffers(
        &mut self,
        _pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let mut state = self.state.lock();
        let mut buffers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            match state.mint("command_buffer") {
                Ok(raw) => buffers.push(vk::CommandBuffer::from_raw(raw)),
                Err(e) => {
                    for buffer in buffers {
                        state.release("command_buffer", buffer.as_raw());
                    }
                    return Err(e);
                }
            }
        }
        Ok(buffers)
    }

    fn free_command_buffers(&mut self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let mut state = self.state.lock();
        for buffer in buffers {
            state.recording.remove(&buffer.as_raw());
            state.release("command_buffer", buffer.as_raw());
        }
    }

    fn create_semaphore(&mut self) -> Result<vk::Semaphore> {
        Ok(vk::Semaphore::from_raw(self.state.lock().mint("semaphore")?))
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        let mut state = self.state.lock();
        state.signaled_semaphores.remove(&semaphore.as_raw());
        state.release("semaphore", semaphore.as_raw());
    }

    fn create_fence(&mut self, signaled: bool) -> Result<vk::Fence> {
        let mut state = self.state.lock();
        let raw = state.mint("fence")?;
        state.fences.insert(raw, signaled);
        Ok(vk::Fence::from_raw(raw))
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        let mut state = self.state.lock();
        state.fences.remove(&fence.as_raw());
        state.release("fence", fence.as_raw());
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> Result<()> {
        match self.state.lock().fences.get(&fence.as_raw()) {
            Some(true) => Ok(()),
            Some(false) => bail!("waiting on an unsignaled fence with nothing in flight"),
            None => bail!("waiting on an unknown fence"),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        self.state.lock().fences.insert(fence.as_raw(), false);
        Ok(())
    }

    fn create_render_pass(&mut self, _format: vk::Format) -> Result<vk::RenderPass> {
        Ok(vk::RenderPass::from_raw(self.state.lock().mint("render_pass")?))
    }

    fn destroy_render_pass(&mut self, render_pass: vk::RenderPass) {
        self.state.lock().release("render_pass", render_pass.as_raw());
    }

    fn create_pipeline_layout(&mut self, _push_constant_bytes: u32) -> Result<vk::PipelineLayout> {
        Ok(vk::PipelineLayout::from_raw(self.state.lock().mint("pipeline_layout")?))
    }

    fn destroy_pipeline_layout(&mut self, layout: vk::PipelineLayout) {
        self.state.lock().release("pipeline_layout", layout.as_raw());
    }

    fn create_line_pipeline(&mut self, desc: &LinePipelineDesc) -> Result<vk::Pipeline> {
        let mut state = self.state.lock();
        let raw = state.mint("pipeline")?;
        state.pipelines.insert(raw, desc.vertex);
        Ok(vk::Pipeline::from_raw(raw))
    }

    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline) {
        let mut state = self.state.lock();
        state.pipelines.remove(&pipeline.as_raw());
        state.release("pipeline", pipeline.as_raw());
    }

    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> Result<vk::SwapchainKHR> {
        let mut state = self.state.lock();
        let raw = state.mint("swapchain")?;
        state.swapchains.insert(raw, desc.image_count);
        state.swapchains_created += 1;
        state.last_swapchain = Some(*desc);
        state.next_image = 0;
        Ok(vk::SwapchainKHR::from_raw(raw))
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
        let state = self.state.lock();
        let Some(&count) = state.swapchains.get(&swapchain.as_raw()) else {
            bail!("unknown swapchain");
        };
        // Images belong to the swapchain and are not counted
        Ok((0..count)
            .map(|i| vk::Image::from_raw(0x1000_0000 + swapchain.as_raw() * 16 + i as u64))
            .collect())
    }

    fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state.lock();
        state.swapchains.remove(&swapchain.as_raw());
        state.release("swapchain", swapchain.as_raw());
    }

    fn create_image_view(
        &mut self,
        _image: vk::Image,
        _format: vk::Format,
    ) -> Result<vk::ImageView> {
        Ok(vk::ImageView::from_raw(self.state.lock().mint("image_view")?))
    }

    fn destroy_image_view(&mut self, view: vk::ImageView) {
        self.state.lock().release("image_view", view.as_raw());
    }

    fn create_framebuffer(
        &mut self,
        _render_pass: vk::RenderPass,
        _view: vk::ImageView,
        _extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer> {
        Ok(vk::Framebuffer::from_raw(self.state.lock().mint("framebuffer")?))
    }

    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer) {
        self.state.lock().release("framebuffer", framebuffer.as_raw());
    }

    fn create_host_buffer(&mut self, size: u64) -> Result<HostBuffer> {
        let mut state = self.state.lock();
        let raw = state.mint("buffer")?;
        let mut storage = vec![0u8; size as usize];
        let mapped = NonNull::new(storage.as_mut_ptr()).expect("vec pointer");
        // Moving the Vec into the map keeps its heap allocation in place
        state.buffers.insert(raw, storage);

        Ok(HostBuffer {
            buffer: vk::Buffer::from_raw(raw),
            memory: vk::DeviceMemory::from_raw(raw),
            mapped,
            size,
        })
    }

    fn destroy_host_buffer(&mut self, buffer: &HostBuffer) {
        let mut state = self.state.lock();
        state.buffers.remove(&buffer.buffer.as_raw());
        state.release("buffer", buffer.buffer.as_raw());
    }

    fn acquire_next_image(
        &mut self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> Result<AcquireOutcome> {
        let mut state = self.state.lock();
        let Some(&count) = state.swapchains.get(&swapchain.as_raw()) else {
            bail!("acquire on unknown swapchain");
        };

        let outcome = match state.acquire_script.pop_front() {
            Some(outcome) => outcome,
            None => {
                let index = state.next_image % count;
                state.next_image += 1;
                AcquireOutcome::Acquired(index)
            }
        };

        if let AcquireOutcome::Acquired(_) | AcquireOutcome::Suboptimal(_) = outcome {
            if !state.signaled_semaphores.insert(signal.as_raw()) {
                bail!("acquire signals a semaphore that is already signaled");
            }
        }
        Ok(outcome)
    }

    fn begin_render_pass(&mut self, cmd: vk::CommandBuffer, begin: &PassBegin) -> Result<()> {
        let mut state = self.state.lock();
        state.check("begin_pass")?;
        if !state.recording.insert(cmd.as_raw()) {
            bail!("command buffer is already recording");
        }
        state.commands.push(Command::BeginPass {
            extent: (begin.extent.width, begin.extent.height),
            clear_color: begin.clear_color,
        });
        Ok(())
    }

    fn draw_lines(&mut self, cmd: vk::CommandBuffer, draw: &LineDraw) {
        let mut state = self.state.lock();
        assert!(state.recording.contains(&cmd.as_raw()), "draw outside a render pass");

        let components = state
            .pipelines
            .get(&draw.pipeline.as_raw())
            .map_or(3, |layout| layout.components() as usize);
        let bytes = state
            .buffers
            .get(&draw.vertex_buffer.as_raw())
            .map(|b| &b[..draw.vertex_count as usize * components * 4])
            .unwrap_or_default();
        let vertices = bytes
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        state.commands.push(Command::Draw(DrawRecord {
            vertex_count: draw.vertex_count,
            color: draw.color.rgba,
            line_width: draw.line_width,
            vertices,
        }));
    }

    fn end_render_pass(&mut self, cmd: vk::CommandBuffer) -> Result<()> {
        let mut state = self.state.lock();
        if !state.recording.remove(&cmd.as_raw()) {
            bail!("ending a command buffer that is not recording");
        }
        // A failed end leaves the buffer to be reset by its next begin
        state.check("end_pass")?;
        state.commands.push(Command::EndPass);
        Ok(())
    }

    fn submit(
        &mut self,
        cmd: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if state.recording.contains(&cmd.as_raw()) {
            bail!("submitting a command buffer that is still recording");
        }
        state.check("submit")?;
        if !state.signaled_semaphores.remove(&wait.as_raw()) {
            bail!("submit waits on a semaphore nothing signals");
        }
        if !state.signaled_semaphores.insert(signal.as_raw()) {
            bail!("submit signals a semaphore that is already signaled");
        }
        match state.fences.get_mut(&fence.as_raw()) {
            Some(signaled) if !*signaled => *signaled = true,
            Some(_) => bail!("submit with a fence that is still signaled"),
            None => bail!("submit with an unknown fence"),
        }
        state.commands.push(Command::Submit);
        Ok(())
    }

    fn present(
        &mut self,
        _swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<PresentOutcome> {
        let mut state = self.state.lock();
        let outcome = state
            .present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Presented);

        // An out-of-date present leaves its wait semaphore signaled
        if outcome != PresentOutcome::OutOfDate {
            if !state.signaled_semaphores.remove(&wait.as_raw()) {
                bail!("present waits on a semaphore nothing signals");
            }
            state.commands.push(Command::Present(image_index));
        }
        Ok(outcome)
    }
}
