//! COM apartment setup and the HRESULT → `AudioError` mapping shared by the backend.

use std::marker::PhantomData;
use std::time::Duration;

use windows::core::{Error, HRESULT, PCWSTR, PWSTR};
use windows::Win32::Foundation::{E_ACCESSDENIED, E_NOTFOUND, RPC_E_CHANGED_MODE};
use windows::Win32::Media::Audio::{
    AUDCLNT_E_BUFFER_TOO_LARGE, AUDCLNT_E_DEVICE_INVALIDATED, AUDCLNT_E_UNSUPPORTED_FORMAT,
};
use windows::Win32::System::Com::{CoInitializeEx, CoTaskMemFree, CoUninitialize, COINIT_MULTITHREADED};

use audio_endpoint_core::AudioError;

/// RAII guard for COM initialization on the current thread.
///
/// Calls `CoUninitialize` on drop only when this guard's `CoInitializeEx` took
/// effect. Not `Send`: COM must be uninitialized on the thread that initialized it.
pub struct ComGuard {
    owns_init: bool,
    _thread_bound: PhantomData<*const ()>,
}

impl ComGuard {
    /// Join the multithreaded apartment.
    ///
    /// A thread already in an STA keeps it; the guard then does nothing on drop.
    pub fn init_mta() -> Result<Self, AudioError> {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr == RPC_E_CHANGED_MODE {
            log::warn!("COM already initialized as STA on this thread; keeping it");
            return Ok(Self {
                owns_init: false,
                _thread_bound: PhantomData,
            });
        }
        hr.ok().map_err(|e| AudioError::platform("CoInitializeEx", e.code().0))?;
        Ok(Self {
            owns_init: true,
            _thread_bound: PhantomData,
        })
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        if self.owns_init {
            unsafe {
                CoUninitialize();
            }
        }
    }
}

/// Map a failed platform call onto the endpoint error kinds.
pub(crate) fn map_error(operation: &str, err: &Error) -> AudioError {
    map_hresult(operation, err.code())
}

pub(crate) fn map_hresult(operation: &str, code: HRESULT) -> AudioError {
    if code == AUDCLNT_E_DEVICE_INVALIDATED {
        AudioError::DeviceLost(format!("{} reported the device invalidated", operation))
    } else if code == E_NOTFOUND {
        AudioError::DeviceNotFound(operation.to_string())
    } else if code == AUDCLNT_E_UNSUPPORTED_FORMAT {
        AudioError::FormatNotSupported(format!("{} rejected the format", operation))
    } else if code == AUDCLNT_E_BUFFER_TOO_LARGE {
        AudioError::InvalidArgument(format!("{}: request exceeds free buffer space", operation))
    } else {
        if code == E_ACCESSDENIED {
            log::warn!("{}: access denied, microphone privacy settings may block capture", operation);
        }
        AudioError::platform(operation, code.0)
    }
}

/// Null-terminated UTF-16 copy of `s`, kept alive by the caller while a `PCWSTR` points into it.
pub(crate) fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

pub(crate) fn pcwstr(buf: &[u16]) -> PCWSTR {
    PCWSTR(buf.as_ptr())
}

/// Take ownership of a COM-allocated string.
///
/// # Safety
/// `raw` must be null or a `CoTaskMemAlloc`ed, null-terminated UTF-16 string.
pub(crate) unsafe fn take_pwstr(raw: PWSTR) -> Option<String> {
    if raw.is_null() {
        return None;
    }
    let text = raw.to_string().ok();
    CoTaskMemFree(Some(raw.0 as *const _));
    text
}

/// `REFERENCE_TIME` (100 ns units) for a duration.
pub(crate) fn to_reference_time(duration: Duration) -> i64 {
    (duration.as_nanos() / 100).min(i64::MAX as u128) as i64
}

pub(crate) fn from_reference_time(hns: i64) -> Duration {
    Duration::from_nanos(hns.max(0) as u64 * 100)
}
