//! WASAPI stream backend.
//!
//! Wraps an initialized `IAudioClient` and its capture or render service. Buffer
//! sequencing is enforced by `StreamSession`; this type translates calls and maps
//! `AUDCLNT_E_DEVICE_INVALIDATED` to `AudioError::DeviceLost`.

use std::time::Duration;

use windows::core::PCWSTR;
use windows::Win32::Media::Audio::{IAudioCaptureClient, IAudioClient, IAudioRenderClient};
use windows::Win32::System::Threading::AvSetMmThreadCharacteristicsW;

use audio_endpoint_core::{AudioError, BufferFlags, RawCapture, StreamBackend};

use crate::com::{from_reference_time, map_error, wide};

enum Service {
    Capture(IAudioCaptureClient),
    Render(IAudioRenderClient),
}

/// An initialized WASAPI stream.
pub struct WasapiStream {
    client: IAudioClient,
    service: Service,
    buffer_frames: u32,
    block_align: usize,
    latency: Duration,
    mmcss_registered: bool,
}

// SAFETY: the endpoint enumerator and audio clients are free-threaded objects in the
// MTA. The session serializes every call behind its own lock, so the stream is used
// by one thread at a time.
unsafe impl Send for WasapiStream {}

impl WasapiStream {
    pub(crate) fn capture(client: IAudioClient, service: IAudioCaptureClient, block_align: usize) -> Result<Self, AudioError> {
        Self::new(client, Service::Capture(service), block_align)
    }

    pub(crate) fn render(client: IAudioClient, service: IAudioRenderClient, block_align: usize) -> Result<Self, AudioError> {
        Self::new(client, Service::Render(service), block_align)
    }

    fn new(client: IAudioClient, service: Service, block_align: usize) -> Result<Self, AudioError> {
        let buffer_frames = unsafe { client.GetBufferSize() }
            .map_err(|e| map_error("IAudioClient::GetBufferSize", &e))?;
        let latency = unsafe { client.GetStreamLatency() }
            .map(from_reference_time)
            .map_err(|e| map_error("IAudioClient::GetStreamLatency", &e))?;
        Ok(Self {
            client,
            service,
            buffer_frames,
            block_align,
            latency,
            mmcss_registered: false,
        })
    }

    /// Register the polling thread with MMCSS the first time it touches a buffer.
    /// The registration ends when that thread exits.
    fn register_mmcss(&mut self) {
        if self.mmcss_registered {
            return;
        }
        self.mmcss_registered = true;
        let task_name = wide("Pro Audio");
        let mut task_index: u32 = 0;
        match unsafe { AvSetMmThreadCharacteristicsW(PCWSTR(task_name.as_ptr()), &mut task_index) } {
            Ok(_) => log::debug!("stream thread registered with MMCSS (task {})", task_index),
            Err(e) => log::warn!("MMCSS registration failed: {}", e),
        }
    }

    fn capture_client(&self) -> Result<&IAudioCaptureClient, AudioError> {
        match &self.service {
            Service::Capture(client) => Ok(client),
            Service::Render(_) => Err(AudioError::InvalidState("render stream has no capture buffer".into())),
        }
    }

    fn render_client(&self) -> Result<&IAudioRenderClient, AudioError> {
        match &self.service {
            Service::Render(client) => Ok(client),
            Service::Capture(_) => Err(AudioError::InvalidState("capture stream has no render buffer".into())),
        }
    }
}

impl StreamBackend for WasapiStream {
    fn buffer_frames(&self) -> u32 {
        self.buffer_frames
    }

    fn padding(&self) -> Result<u32, AudioError> {
        unsafe { self.client.GetCurrentPadding() }.map_err(|e| map_error("IAudioClient::GetCurrentPadding", &e))
    }

    fn latency(&self) -> Duration {
        self.latency
    }

    fn start(&mut self) -> Result<(), AudioError> {
        unsafe { self.client.Start() }.map_err(|e| map_error("IAudioClient::Start", &e))
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        unsafe { self.client.Stop() }.map_err(|e| map_error("IAudioClient::Stop", &e))
    }

    fn reset(&mut self) -> Result<(), AudioError> {
        unsafe { self.client.Reset() }.map_err(|e| map_error("IAudioClient::Reset", &e))
    }

    fn capture_buffer(&mut self) -> Result<RawCapture<'_>, AudioError> {
        self.register_mmcss();
        let block_align = self.block_align;
        let client = self.capture_client()?;

        let packet = unsafe { client.GetNextPacketSize() }
            .map_err(|e| map_error("IAudioCaptureClient::GetNextPacketSize", &e))?;
        if packet == 0 {
            return Err(AudioError::BufferEmpty);
        }

        let mut data: *mut u8 = std::ptr::null_mut();
        let mut frames: u32 = 0;
        let mut flags: u32 = 0;
        let mut device_position: u64 = 0;
        unsafe { client.GetBuffer(&mut data, &mut frames, &mut flags, Some(&mut device_position), None) }
            .map_err(|e| map_error("IAudioCaptureClient::GetBuffer", &e))?;

        // AUDCLNT_S_BUFFER_EMPTY succeeds with no frames and needs no release.
        if frames == 0 || data.is_null() {
            return Err(AudioError::BufferEmpty);
        }

        // SAFETY: the device guarantees `frames * block_align` readable bytes at `data`
        // until ReleaseBuffer, and the returned borrow keeps `self` locked until then.
        let bytes = unsafe { std::slice::from_raw_parts(data, frames as usize * block_align) };
        Ok(RawCapture {
            frames,
            data: bytes,
            flags: BufferFlags::from_bits(flags),
            device_position,
        })
    }

    fn release_capture(&mut self, frames: u32) -> Result<(), AudioError> {
        let client = self.capture_client()?;
        unsafe { client.ReleaseBuffer(frames) }.map_err(|e| map_error("IAudioCaptureClient::ReleaseBuffer", &e))
    }

    fn render_buffer(&mut self, frames: u32) -> Result<&mut [u8], AudioError> {
        self.register_mmcss();
        let len = frames as usize * self.block_align;
        let client = self.render_client()?;
        let data = unsafe { client.GetBuffer(frames) }.map_err(|e| map_error("IAudioRenderClient::GetBuffer", &e))?;
        if data.is_null() {
            return Err(AudioError::BufferFull);
        }
        // SAFETY: GetBuffer hands out `frames * block_align` writable bytes until ReleaseBuffer.
        Ok(unsafe { std::slice::from_raw_parts_mut(data, len) })
    }

    fn release_render(&mut self, frames: u32, flags: BufferFlags) -> Result<(), AudioError> {
        let client = self.render_client()?;
        unsafe { client.ReleaseBuffer(frames, flags.bits()) }
            .map_err(|e| map_error("IAudioRenderClient::ReleaseBuffer", &e))
    }
}

impl Drop for WasapiStream {
    fn drop(&mut self) {
        if let Err(e) = unsafe { self.client.Stop() } {
            log::debug!("IAudioClient::Stop on drop: {}", e);
        }
    }
}
