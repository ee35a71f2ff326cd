// Error types and ABI result codes.
//
// Every fallible core operation returns Result<T>. At the process
// boundary the error collapses into a ResultCode and its message is
// parked in a thread-local slot readable through `get_last_error()`.

use std::cell::RefCell;
use std::ffi::{c_char, CString};

use ash::vk;
use thiserror::Error;

/// Integer codes returned across the ABI. Negative values are errors.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Ok = 0,
    Unspecified = -1,
    BadArgs = -2,
    NoMem = -3,
    Device = -4,
    NotReady = -5,
    OutOfDate = -6,
    Unsupported = -7,
}

impl ResultCode {
    pub const fn as_raw(self) -> i32 {
        self as i32
    }

    /// Transient codes are steady-state signals during resize, not failures.
    pub const fn is_transient(self) -> bool {
        matches!(self, ResultCode::NotReady | ResultCode::OutOfDate)
    }
}

/// The main error type for the renderer core.
#[derive(Error, Debug)]
pub enum Error {
    /// Null/zero handle, null buffer, zero count and similar caller mistakes.
    #[error("Invalid argument: {0}")]
    BadArgs(&'static str),

    /// The staging buffer cannot hold the requested vertex data.
    #[error("Staging buffer too small: {needed} bytes requested, capacity is {capacity}")]
    StagingExhausted { needed: u64, capacity: u64 },

    /// Fatal GPU-side failure (construction, submission, lost device).
    #[error("Device error: {0:#}")]
    Device(#[from] anyhow::Error),

    /// Zero client area or no presentable swapchain yet.
    #[error("Not ready: {0}")]
    NotReady(&'static str),

    /// The swapchain went stale; it is rebuilt on the next frame.
    #[error("Swapchain out of date")]
    OutOfDate,

    #[error("Unsupported ABI version {requested} (this build implements {supported})")]
    Unsupported { requested: u32, supported: u32 },

    /// Per-frame calls issued out of order.
    #[error("Frame sequencing error: {0}")]
    Sequence(&'static str),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn code(&self) -> ResultCode {
        match self {
            Error::BadArgs(_) | Error::Sequence(_) => ResultCode::BadArgs,
            Error::StagingExhausted { .. } => ResultCode::NoMem,
            Error::Device(e) if is_out_of_memory(e) => ResultCode::NoMem,
            Error::Device(_) => ResultCode::Device,
            Error::NotReady(_) => ResultCode::NotReady,
            Error::OutOfDate => ResultCode::OutOfDate,
            Error::Unsupported { .. } => ResultCode::Unsupported,
            Error::Internal(_) => ResultCode::Unspecified,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.code().is_transient()
    }
}

fn is_out_of_memory(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<vk::Result>(),
            Some(&vk::Result::ERROR_OUT_OF_HOST_MEMORY)
                | Some(&vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
        )
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-thread last error
// ─────────────────────────────────────────────────────────────────────────────

thread_local! {
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::default());
}

/// Store `message` as this thread's last error.
pub fn set_last_error(message: &str) {
    let message = CString::new(message.replace('\0', " ")).unwrap_or_default();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = message);
}

/// Pointer to this thread's last error message. Never null; valid until the
/// next failing call on the same thread.
pub fn last_error_ptr() -> *const c_char {
    LAST_ERROR.with(|slot| slot.borrow().as_ptr())
}

/// Copy of this thread's last error message.
pub fn last_error() -> String {
    LAST_ERROR.with(|slot| slot.borrow().to_string_lossy().into_owned())
}
