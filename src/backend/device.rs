// Vulkan Device - instance, surface, adapter, logical device and queue
//
// Responsibilities:
// - Instance creation, with validation layers when requested and installed
// - Presentation surface for the host's window
// - Adapter selection (first with graphics + present queue and swapchain support)
// - Logical device + queue creation
//
// Everything else the renderer needs is created through the GpuDevice impl
// in commands.rs.

use anyhow::{bail, Context, Result};
use ash::extensions::{ext::DebugUtils, khr};
use ash::{vk, Entry};
use std::ffi::{c_void, CStr, CString};

use super::surface;
use crate::gpu::{DeviceDesc, GpuBackend};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Opens Vulkan devices for host windows.
#[derive(Debug, Default, Clone, Copy)]
pub struct VulkanBackend;

impl GpuBackend for VulkanBackend {
    type Device = VulkanDevice;

    fn open(&self, desc: &DeviceDesc) -> Result<VulkanDevice> {
        VulkanDevice::new(desc)
    }
}

/// One window's device: owns instance, surface, logical device and queue
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    _entry: Entry,

    pub queue: vk::Queue,
    pub queue_family: u32,

    pub(super) surface: vk::SurfaceKHR,
    pub(super) surface_loader: khr::Surface,
    pub(super) swapchain_loader: khr::Swapchain,

    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,

    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub(super) wide_lines: bool,
}

/// Destroys whatever bootstrap created if `VulkanDevice::new` bails early
struct Bootstrap {
    _entry: Entry,
    instance: Option<ash::Instance>,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    surface: Option<(khr::Surface, vk::SurfaceKHR)>,
    device: Option<ash::Device>,
}

impl Bootstrap {
    /// Hand ownership over to the finished device.
    fn disarm(&mut self) -> Option<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
        self.device = None;
        self.surface = None;
        self.instance = None;
        self.debug_utils.take()
    }
}

impl Drop for Bootstrap {
    fn drop(&mut self) {
        unsafe {
            if let Some(device) = self.device.take() {
                device.destroy_device(None);
            }
            if let Some((loader, surface)) = self.surface.take() {
                loader.destroy_surface(surface, None);
            }
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            if let Some(instance) = self.instance.take() {
                instance.destroy_instance(None);
            }
        }
    }
}

impl VulkanDevice {
    pub fn new(desc: &DeviceDesc) -> Result<Self> {
        log::info!("Creating Vulkan device: {}", desc.app_name);

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;
        let mut boot = Bootstrap {
            _entry: entry.clone(),
            instance: None,
            debug_utils: None,
            surface: None,
            device: None,
        };

        // Step 2: Create instance
        let validation = desc.validation && Self::validation_available(&entry);
        let surface_extension = surface::required_extension(&desc.window)?;
        let instance =
            Self::create_instance(&entry, &desc.app_name, surface_extension, validation)?;
        boot.instance = Some(instance.clone());

        // Step 3: Debug messenger
        if validation {
            boot.debug_utils = Some(Self::setup_debug_messenger(&entry, &instance)?);
        }

        // Step 4: Surface for the host's window
        let surface_loader = khr::Surface::new(&entry, &instance);
        let surface = unsafe { surface::create_surface(&entry, &instance, &desc.window)? };
        boot.surface = Some((surface_loader.clone(), surface));

        // Step 5: Pick adapter
        let (physical_device, queue_family) =
            Self::pick_physical_device(&instance, &surface_loader, surface)?;
        let features = unsafe { instance.get_physical_device_features(physical_device) };
        let wide_lines = features.wide_lines == vk::TRUE;

        // Step 6: Logical device
        let device =
            Self::create_logical_device(&instance, physical_device, queue_family, wide_lines)?;
        boot.device = Some(device.clone());
        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{} (wide lines: {})",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version),
            wide_lines
        );

        let swapchain_loader = khr::Swapchain::new(&instance, &device);
        let debug_utils = boot.disarm();

        Ok(Self {
            device,
            physical_device,
            instance,
            _entry: entry,
            queue,
            queue_family,
            surface,
            surface_loader,
            swapchain_loader,
            debug_utils,
            properties,
            memory_properties,
            wide_lines,
        })
    }

    fn validation_available(entry: &Entry) -> bool {
        let layers = entry.enumerate_instance_layer_properties().unwrap_or_default();
        let found = layers
            .iter()
            .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER);

        if !found {
            log::warn!("Validation requested but VK_LAYER_KHRONOS_validation is not installed");
        }
        found
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        surface_extension: &CStr,
        validation: bool,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name.replace('\0', " "))?;
        let engine_name = c"fw-renderer";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);

        let mut extensions = vec![khr::Surface::name().as_ptr(), surface_extension.as_ptr()];
        if validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")?;

        Ok((debug_utils, messenger))
    }

    /// First adapter with a queue family that does graphics and can present
    /// to `surface`, and that exposes VK_KHR_swapchain
    fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> Result<(vk::PhysicalDevice, u32)> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .context("Failed to enumerate adapters")?;

        if devices.is_empty() {
            bail!("No Vulkan-capable GPU found");
        }

        for device in devices {
            if !Self::supports_swapchain(instance, device) {
                continue;
            }

            let queue_families =
                unsafe { instance.get_physical_device_queue_family_properties(device) };

            for (index, family) in queue_families.iter().enumerate() {
                let index = index as u32;
                let presents = unsafe {
                    surface_loader.get_physical_device_surface_support(device, index, surface)
                }
                .unwrap_or(false);

                if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && presents {
                    return Ok((device, index));
                }
            }
        }

        bail!("No suitable adapter: none can both render and present to this window")
    }

    fn supports_swapchain(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
        let extensions =
            unsafe { instance.enumerate_device_extension_properties(device) }.unwrap_or_default();
        has_extension(&extensions, khr::Swapchain::name())
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
        wide_lines: bool,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family)
            .queue_priorities(&queue_priorities)
            .build();

        let extensions = [khr::Swapchain::name().as_ptr()];
        let features = vk::PhysicalDeviceFeatures::builder().wide_lines(wide_lines);

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        unsafe {
            let _ = self.device.device_wait_idle();

            self.surface_loader.destroy_surface(self.surface, None);
            self.device.destroy_device(None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

fn has_extension(extensions: &[vk::ExtensionProperties], wanted: &CStr) -> bool {
    extensions.iter().any(|ext| {
        // extension_name is a NUL-terminated fixed array filled by the driver
        let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
        name == wanted
    })
}

// Validation messages go through the log facade like everything else
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message).to_string_lossy();

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("[Vulkan] {}", message),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("[Vulkan] {}", message),
        _ => log::debug!("[Vulkan] {}", message),
    }

    vk::FALSE
}
