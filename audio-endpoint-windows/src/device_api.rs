//! `DeviceApi` over the Windows MMDevice API.
//!
//! Enumerates endpoints through `IMMDeviceEnumerator`, reads friendly names from
//! the endpoint property store, negotiates formats with `IAudioClient`, and keeps
//! one `IMMNotificationClient` registration per token.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use windows::core::Interface;
use windows::Win32::Devices::FunctionDiscovery::PKEY_Device_FriendlyName;
use windows::Win32::Foundation::{S_FALSE, S_OK};
use windows::Win32::Media::Audio::{
    IAudioCaptureClient, IAudioClient, IAudioRenderClient, IMMDevice, IMMDeviceEnumerator, IMMEndpoint,
    IMMNotificationClient, MMDeviceEnumerator, AUDCLNT_E_UNSUPPORTED_FORMAT, AUDCLNT_SHAREMODE,
    AUDCLNT_SHAREMODE_EXCLUSIVE, AUDCLNT_SHAREMODE_SHARED, AUDCLNT_STREAMFLAGS_NOPERSIST, DEVICE_STATE,
    WAVEFORMATEX,
};
use windows::Win32::System::Com::StructuredStorage::PropVariantClear;
use windows::Win32::System::Com::{CoCreateInstance, CoTaskMemFree, CLSCTX_ALL, STGM_READ};
use windows::Win32::System::Variant::VT_LPWSTR;

use audio_endpoint_core::models::format::BASIC_FORMAT_DESCRIPTOR_SIZE;
use audio_endpoint_core::{
    AudioError, DataFlow, DeviceApi, DeviceRole, DeviceState, EndpointDescriptor, FormatSupport,
    NotificationSink, NotificationToken, ShareMode, StateMask, StreamBackend, StreamFormat, StreamParams,
};

use crate::com::{map_error, map_hresult, pcwstr, take_pwstr, to_reference_time, wide};
use crate::notification_client::{flow_from_platform, flow_to_platform, role_to_platform, NotificationClient};
use crate::policy;
use crate::stream::WasapiStream;

/// Audio endpoint access through `IMMDeviceEnumerator`.
pub struct WasapiDeviceApi {
    enumerator: IMMDeviceEnumerator,
    clients: Mutex<HashMap<NotificationToken, IMMNotificationClient>>,
    next_token: AtomicU64,
}

// SAFETY: MMDeviceEnumerator is free-threaded and created in the MTA; every thread
// that calls into it is either MTA-initialized or in the implicit MTA. The
// notification client map is guarded by a Mutex.
unsafe impl Send for WasapiDeviceApi {}
unsafe impl Sync for WasapiDeviceApi {}

impl WasapiDeviceApi {
    /// Create the enumerator.
    ///
    /// Requires COM to be initialized (MTA) on the calling thread; see `ComGuard`.
    pub fn new() -> Result<Self, AudioError> {
        let enumerator: IMMDeviceEnumerator = unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL) }
            .map_err(|e| map_error("CoCreateInstance(MMDeviceEnumerator)", &e))?;
        Ok(Self {
            enumerator,
            clients: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        })
    }

    fn device(&self, id: &str) -> Result<IMMDevice, AudioError> {
        let wide_id = wide(id);
        unsafe { self.enumerator.GetDevice(pcwstr(&wide_id)) }.map_err(|e| match map_error("GetDevice", &e) {
            AudioError::DeviceNotFound(_) => AudioError::DeviceNotFound(id.to_string()),
            other => other,
        })
    }

    fn audio_client(&self, id: &str) -> Result<IAudioClient, AudioError> {
        let device = self.device(id)?;
        unsafe { device.Activate::<IAudioClient>(CLSCTX_ALL, None) }
            .map_err(|e| map_error("IMMDevice::Activate(IAudioClient)", &e))
    }

    fn descriptor(device: &IMMDevice) -> Result<EndpointDescriptor, AudioError> {
        unsafe {
            let id = device
                .GetId()
                .map_err(|e| map_error("IMMDevice::GetId", &e))
                .map(|raw| take_pwstr(raw).unwrap_or_default())?;
            let state = device.GetState().map_err(|e| map_error("IMMDevice::GetState", &e))?;
            let flow = device
                .cast::<IMMEndpoint>()
                .and_then(|endpoint| endpoint.GetDataFlow())
                .map_err(|e| map_error("IMMEndpoint::GetDataFlow", &e))?;
            let flow = flow_from_platform(flow)
                .ok_or_else(|| AudioError::platform("IMMEndpoint::GetDataFlow", flow.0))?;
            let name = Self::friendly_name(device).unwrap_or_else(|| id.clone());
            Ok(EndpointDescriptor::new(id, name, flow, DeviceState::from_bits(state.0)))
        }
    }

    /// Read `PKEY_Device_FriendlyName` from the endpoint property store.
    fn friendly_name(device: &IMMDevice) -> Option<String> {
        unsafe {
            let store = device.OpenPropertyStore(STGM_READ).ok()?;
            let mut value = store.GetValue(&PKEY_Device_FriendlyName).ok()?;

            let name = if value.Anonymous.Anonymous.vt == VT_LPWSTR {
                let pwsz = value.Anonymous.Anonymous.Anonymous.pwszVal;
                if pwsz.is_null() {
                    None
                } else {
                    pwsz.to_string().ok()
                }
            } else {
                None
            };

            PropVariantClear(&mut value).ok();
            name
        }
    }
}

/// Copy a COM-allocated `WAVEFORMATEX` into a `StreamFormat` and free it.
///
/// # Safety
/// `ptr` must be null or point at a `CoTaskMemAlloc`ed format followed by `cbSize` extra bytes.
unsafe fn take_wave_format(ptr: *mut WAVEFORMATEX) -> Result<StreamFormat, AudioError> {
    if ptr.is_null() {
        return Err(AudioError::platform("GetMixFormat", 0));
    }
    let extra = (*ptr).cbSize as usize;
    let bytes = std::slice::from_raw_parts(ptr as *const u8, BASIC_FORMAT_DESCRIPTOR_SIZE + extra);
    let format = StreamFormat::from_bytes(bytes);
    CoTaskMemFree(Some(ptr as *const _));
    format
}

fn share_mode(mode: ShareMode) -> AUDCLNT_SHAREMODE {
    match mode {
        ShareMode::Shared => AUDCLNT_SHAREMODE_SHARED,
        ShareMode::Exclusive => AUDCLNT_SHAREMODE_EXCLUSIVE,
    }
}

impl DeviceApi for WasapiDeviceApi {
    fn enumerate(&self, flow: DataFlow, mask: StateMask) -> Result<Vec<EndpointDescriptor>, AudioError> {
        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(flow_to_platform(flow), DEVICE_STATE(mask.bits()))
                .map_err(|e| map_error("EnumAudioEndpoints", &e))?;
            let count = collection
                .GetCount()
                .map_err(|e| map_error("IMMDeviceCollection::GetCount", &e))?;

            let mut endpoints = Vec::with_capacity(count as usize);
            for i in 0..count {
                let device = match collection.Item(i) {
                    Ok(d) => d,
                    Err(e) => {
                        log::debug!("skipping endpoint {}: {}", i, e);
                        continue;
                    }
                };
                match Self::descriptor(&device) {
                    Ok(descriptor) => endpoints.push(descriptor),
                    // Removed between enumeration and inspection.
                    Err(e) => log::debug!("skipping endpoint {}: {}", i, e),
                }
            }
            Ok(endpoints)
        }
    }

    fn default_endpoint(&self, flow: DataFlow, role: DeviceRole) -> Result<Option<String>, AudioError> {
        let device = unsafe {
            self.enumerator
                .GetDefaultAudioEndpoint(flow_to_platform(flow), role_to_platform(role))
        };
        match device {
            Ok(device) => unsafe {
                let raw = device.GetId().map_err(|e| map_error("IMMDevice::GetId", &e))?;
                Ok(take_pwstr(raw))
            },
            Err(e) => match map_error("GetDefaultAudioEndpoint", &e) {
                AudioError::DeviceNotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    fn describe(&self, id: &str) -> Result<Option<EndpointDescriptor>, AudioError> {
        match self.device(id) {
            Ok(device) => Self::descriptor(&device).map(Some),
            Err(AudioError::DeviceNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn set_default_endpoint(&self, id: &str, role: DeviceRole) -> Result<(), AudioError> {
        policy::set_default_endpoint(id, role)
    }

    fn mix_format(&self, id: &str) -> Result<StreamFormat, AudioError> {
        let client = self.audio_client(id)?;
        unsafe {
            let ptr = client
                .GetMixFormat()
                .map_err(|e| map_error("IAudioClient::GetMixFormat", &e))?;
            take_wave_format(ptr)
        }
    }

    fn check_format(&self, id: &str, mode: ShareMode, format: &StreamFormat) -> Result<FormatSupport, AudioError> {
        format.validate()?;
        let client = self.audio_client(id)?;
        let bytes = format.to_bytes();
        let requested = bytes.as_ptr() as *const WAVEFORMATEX;

        unsafe {
            match mode {
                ShareMode::Shared => {
                    let mut closest: *mut WAVEFORMATEX = std::ptr::null_mut();
                    let hr = client.IsFormatSupported(AUDCLNT_SHAREMODE_SHARED, requested, Some(&mut closest));
                    if hr == S_OK {
                        Ok(FormatSupport::Supported)
                    } else if hr == S_FALSE {
                        take_wave_format(closest).map(FormatSupport::ClosestMatch)
                    } else if hr == AUDCLNT_E_UNSUPPORTED_FORMAT {
                        Ok(FormatSupport::Unsupported)
                    } else {
                        Err(map_hresult("IAudioClient::IsFormatSupported", hr))
                    }
                }
                ShareMode::Exclusive => {
                    let hr = client.IsFormatSupported(AUDCLNT_SHAREMODE_EXCLUSIVE, requested, None);
                    if hr == S_OK {
                        Ok(FormatSupport::Supported)
                    } else if hr == AUDCLNT_E_UNSUPPORTED_FORMAT {
                        Ok(FormatSupport::Unsupported)
                    } else {
                        Err(map_hresult("IAudioClient::IsFormatSupported", hr))
                    }
                }
            }
        }
    }

    fn open_stream(&self, id: &str, params: &StreamParams) -> Result<Box<dyn StreamBackend>, AudioError> {
        params.format.validate()?;
        let device = self.device(id)?;
        let endpoint = Self::descriptor(&device)?;
        if endpoint.flow != params.flow {
            return Err(AudioError::InvalidArgument(format!(
                "{} is an {:?} endpoint, not {:?}",
                endpoint, endpoint.flow, params.flow
            )));
        }

        let bytes = params.format.to_bytes();
        let periodicity = match params.share_mode {
            ShareMode::Shared => 0,
            ShareMode::Exclusive => to_reference_time(params.periodicity),
        };

        unsafe {
            let client: IAudioClient = device
                .Activate(CLSCTX_ALL, None)
                .map_err(|e| map_error("IMMDevice::Activate(IAudioClient)", &e))?;
            client
                .Initialize(
                    share_mode(params.share_mode),
                    AUDCLNT_STREAMFLAGS_NOPERSIST,
                    to_reference_time(params.buffer_duration),
                    periodicity,
                    bytes.as_ptr() as *const WAVEFORMATEX,
                    None,
                )
                .map_err(|e| map_error("IAudioClient::Initialize", &e))?;

            let block_align = params.format.block_align();
            let stream = match params.flow {
                DataFlow::Input => {
                    let service: IAudioCaptureClient = client
                        .GetService()
                        .map_err(|e| map_error("IAudioClient::GetService(IAudioCaptureClient)", &e))?;
                    WasapiStream::capture(client, service, block_align)?
                }
                DataFlow::Output => {
                    let service: IAudioRenderClient = client
                        .GetService()
                        .map_err(|e| map_error("IAudioClient::GetService(IAudioRenderClient)", &e))?;
                    WasapiStream::render(client, service, block_align)?
                }
            };
            log::info!(
                "opened {:?} {:?} stream on {} ({} Hz, {} ch, {} frames)",
                params.share_mode,
                params.flow,
                endpoint,
                params.format.sample_rate,
                params.format.channels,
                stream.buffer_frames()
            );
            Ok(Box::new(stream))
        }
    }

    fn register_notifications(&self, sink: Arc<dyn NotificationSink>) -> Result<NotificationToken, AudioError> {
        let client = NotificationClient::new(sink).into_interface();
        unsafe { self.enumerator.RegisterEndpointNotificationCallback(&client) }
            .map_err(|e| map_error("RegisterEndpointNotificationCallback", &e))?;
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        self.clients.lock().insert(token, client);
        Ok(token)
    }

    fn unregister_notifications(&self, token: NotificationToken) -> Result<(), AudioError> {
        let Some(client) = self.clients.lock().remove(&token) else {
            return Ok(());
        };
        unsafe { self.enumerator.UnregisterEndpointNotificationCallback(&client) }
            .map_err(|e| map_error("UnregisterEndpointNotificationCallback", &e))
    }
}

impl Drop for WasapiDeviceApi {
    fn drop(&mut self) {
        for (token, client) in self.clients.lock().drain() {
            if let Err(e) = unsafe { self.enumerator.UnregisterEndpointNotificationCallback(&client) } {
                log::warn!("failed to unregister notification client {}: {}", token, e);
            }
        }
    }
}
