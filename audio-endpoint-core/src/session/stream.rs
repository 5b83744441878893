//! Capture/render stream session over one endpoint handle.

use std::fmt;
use std::time::Duration;

use uuid::Uuid;

use crate::device::handle::EndpointHandle;
use crate::models::buffer_flags::BufferFlags;
use crate::models::endpoint::DataFlow;
use crate::models::error::AudioError;
use crate::models::format::{ShareMode, StreamFormat};
use crate::models::state::SessionState;
use crate::processing::samples::{decode_to_f32, downmix_to_mono, encode_to_slice};
use crate::traits::device_api::{DeviceApi, FormatSupport, StreamParams};
use crate::traits::stream_backend::StreamBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lease {
    Capture(u32),
    Render(u32),
}

/// Window of captured audio, valid until the matching `release_capture`.
#[derive(Debug)]
pub struct CaptureLease<'a> {
    pub frames: u32,
    pub data: &'a [u8],
    pub flags: BufferFlags,
    pub device_position: u64,
    format: StreamFormat,
}

impl CaptureLease<'_> {
    /// Interleaved normalized samples.
    pub fn samples(&self) -> Result<Vec<f32>, AudioError> {
        decode_to_f32(self.data, &self.format)
    }

    /// One normalized sample per frame, channels averaged.
    pub fn mono_samples(&self) -> Result<Vec<f32>, AudioError> {
        Ok(downmix_to_mono(&self.samples()?, self.format.channels as usize))
    }
}

/// Writable window for render audio, committed by `release_render`.
pub struct RenderLease<'a> {
    pub frames: u32,
    pub data: &'a mut [u8],
    format: StreamFormat,
}

impl RenderLease<'_> {
    /// Encode interleaved samples into the front of the window. Returns frames written.
    pub fn write_samples(&mut self, samples: &[f32]) -> Result<u32, AudioError> {
        let channels = self.format.channels as usize;
        if samples.len() % channels != 0 {
            return Err(AudioError::InvalidArgument(format!(
                "{} samples is not a whole number of {}-channel frames",
                samples.len(),
                channels
            )));
        }
        let frames = (samples.len() / channels) as u32;
        if frames > self.frames {
            return Err(AudioError::InvalidArgument(format!(
                "{} frames do not fit a lease of {}",
                frames, self.frames
            )));
        }
        let bytes = frames as usize * self.format.block_align();
        encode_to_slice(samples, &self.format, &mut self.data[..bytes])?;
        Ok(frames)
    }
}

impl fmt::Debug for RenderLease<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderLease")
            .field("frames", &self.frames)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// One stream on one endpoint.
///
/// State machine: `open` yields `Opened`; `start` → `Running`; `stop` →
/// `Stopped` (restartable); `reset` → `Opened`; `close` (or drop) → `Closed`.
/// At most one buffer lease is outstanding at a time. Every operation first
/// checks that the endpoint handle is still live.
pub struct StreamSession {
    id: Uuid,
    handle: EndpointHandle,
    backend: Option<Box<dyn StreamBackend>>,
    format: StreamFormat,
    share_mode: ShareMode,
    state: SessionState,
    outstanding: Option<Lease>,
}

impl StreamSession {
    /// Negotiate a format and initialize a stream on `handle`.
    ///
    /// Shared mode adopts the device's closest match (or its mix format) when
    /// `requested` is not accepted. Exclusive mode fails with
    /// `FormatNotSupported`; the handle stays usable for another attempt.
    pub fn open(
        api: &dyn DeviceApi,
        handle: EndpointHandle,
        requested: StreamFormat,
        share_mode: ShareMode,
        buffer_duration: Duration,
    ) -> Result<Self, AudioError> {
        handle.ensure_live()?;
        requested.validate()?;
        if buffer_duration.is_zero() {
            return Err(AudioError::InvalidArgument("buffer duration must be positive".into()));
        }

        let format = negotiate(api, &handle, requested, share_mode)?;
        let params = StreamParams {
            flow: handle.flow(),
            format,
            share_mode,
            buffer_duration,
            periodicity: match share_mode {
                ShareMode::Exclusive => buffer_duration,
                ShareMode::Shared => Duration::ZERO,
            },
        };
        let backend = api.open_stream(handle.id(), &params)?;
        // The device may have gone while the platform was initializing.
        handle.ensure_live()?;

        let id = Uuid::new_v4();
        log::info!(
            "Session {} opened on {} ({:?}, {}, {} frame buffer)",
            id,
            handle,
            share_mode,
            format,
            backend.buffer_frames()
        );

        Ok(Self {
            id,
            handle,
            backend: Some(backend),
            format,
            share_mode,
            state: SessionState::Opened,
            outstanding: None,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn handle(&self) -> &EndpointHandle {
        &self.handle
    }

    pub fn flow(&self) -> DataFlow {
        self.handle.flow()
    }

    /// The negotiated format.
    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn share_mode(&self) -> ShareMode {
        self.share_mode
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn start(&mut self) -> Result<(), AudioError> {
        self.ensure_usable()?;
        if !self.state.can_start() {
            return Err(AudioError::InvalidState(format!("cannot start from {:?}", self.state)));
        }
        self.backend_mut()?.start()?;
        self.state = SessionState::Running;
        log::info!("Session {} started", self.id);
        Ok(())
    }

    /// Stop the stream. Stopping a stopped session is a no-op.
    pub fn stop(&mut self) -> Result<(), AudioError> {
        self.ensure_usable()?;
        match self.state {
            SessionState::Stopped => Ok(()),
            SessionState::Running => {
                self.backend_mut()?.stop()?;
                self.state = SessionState::Stopped;
                log::info!("Session {} stopped", self.id);
                Ok(())
            }
            other => Err(AudioError::InvalidState(format!("cannot stop from {:?}", other))),
        }
    }

    /// Discard buffered audio and return to `Opened`.
    pub fn reset(&mut self) -> Result<(), AudioError> {
        self.ensure_usable()?;
        if !self.state.can_reset() {
            return Err(AudioError::InvalidState(format!("cannot reset from {:?}", self.state)));
        }
        self.backend_mut()?.reset()?;
        self.outstanding = None;
        self.state = SessionState::Opened;
        log::debug!("Session {} reset", self.id);
        Ok(())
    }

    /// Stop (if running) and release the platform stream. Idempotent.
    pub fn close(&mut self) {
        let Some(mut backend) = self.backend.take() else {
            return;
        };
        if self.state.is_running() {
            if let Err(e) = backend.stop() {
                // A lost device cannot be stopped; releasing it is all that is left.
                log::debug!("Session {} stop during close failed: {}", self.id, e);
            }
        }
        drop(backend);
        self.outstanding = None;
        self.state = SessionState::Closed;
        log::info!("Session {} closed", self.id);
    }

    pub fn buffer_frames(&self) -> Result<u32, AudioError> {
        self.ensure_usable()?;
        Ok(self.backend_ref()?.buffer_frames())
    }

    /// Frames queued in the device buffer.
    pub fn padding(&self) -> Result<u32, AudioError> {
        self.ensure_usable()?;
        self.backend_ref()?.padding()
    }

    pub fn latency(&self) -> Result<Duration, AudioError> {
        self.ensure_usable()?;
        Ok(self.backend_ref()?.latency())
    }

    /// Free space in a render buffer, in frames.
    pub fn render_frames_available(&self) -> Result<u32, AudioError> {
        self.ensure_usable()?;
        let backend = self.backend_ref()?;
        Ok(backend.buffer_frames().saturating_sub(backend.padding()?))
    }

    /// Lease the next capture packet. `BufferEmpty` means retry next period.
    pub fn acquire_capture(&mut self) -> Result<CaptureLease<'_>, AudioError> {
        self.ensure_usable()?;
        self.ensure_flow(DataFlow::Input)?;
        if let Some(lease) = self.outstanding {
            return Err(AudioError::InvalidArgument(format!(
                "{:?} lease still outstanding",
                lease
            )));
        }

        let format = self.format;
        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| AudioError::InvalidState("session is closed".into()))?;
        let raw = backend.capture_buffer()?;
        self.outstanding = Some(Lease::Capture(raw.frames));
        Ok(CaptureLease {
            frames: raw.frames,
            data: raw.data,
            flags: raw.flags,
            device_position: raw.device_position,
            format,
        })
    }

    /// Release the outstanding capture lease.
    ///
    /// `frames` must equal the leased frame count, or be 0 to leave the
    /// packet in place for the next `acquire_capture`.
    pub fn release_capture(&mut self, frames: u32) -> Result<(), AudioError> {
        self.ensure_usable()?;
        let leased = match self.outstanding {
            Some(Lease::Capture(n)) => n,
            _ => return Err(AudioError::InvalidArgument("no capture lease outstanding".into())),
        };
        if frames != 0 && frames != leased {
            return Err(AudioError::InvalidArgument(format!(
                "release of {} frames, {} leased",
                frames, leased
            )));
        }
        self.backend_mut()?.release_capture(frames)?;
        self.outstanding = None;
        Ok(())
    }

    /// Lease `frames` frames of render buffer.
    ///
    /// A full buffer yields `BufferFull`; asking for more than the free space
    /// is a caller error.
    pub fn acquire_render(&mut self, frames: u32) -> Result<RenderLease<'_>, AudioError> {
        self.ensure_usable()?;
        self.ensure_flow(DataFlow::Output)?;
        if let Some(lease) = self.outstanding {
            return Err(AudioError::InvalidArgument(format!(
                "{:?} lease still outstanding",
                lease
            )));
        }
        let available = self.render_frames_available()?;
        if available == 0 {
            return Err(AudioError::BufferFull);
        }
        if frames > available {
            return Err(AudioError::InvalidArgument(format!(
                "{} frames requested, {} available",
                frames, available
            )));
        }

        let format = self.format;
        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| AudioError::InvalidState("session is closed".into()))?;
        let data = backend.render_buffer(frames)?;
        self.outstanding = Some(Lease::Render(frames));
        Ok(RenderLease { frames, data, format })
    }

    /// Commit `frames` frames of the outstanding render lease.
    pub fn release_render(&mut self, frames: u32, flags: BufferFlags) -> Result<(), AudioError> {
        self.ensure_usable()?;
        let leased = match self.outstanding {
            Some(Lease::Render(n)) => n,
            _ => return Err(AudioError::InvalidArgument("no render lease outstanding".into())),
        };
        if frames > leased {
            return Err(AudioError::InvalidArgument(format!(
                "{} frames written, {} leased",
                frames, leased
            )));
        }
        self.backend_mut()?.release_render(frames, flags)?;
        self.outstanding = None;
        Ok(())
    }

    fn ensure_usable(&self) -> Result<(), AudioError> {
        if self.state.is_closed() {
            return Err(AudioError::InvalidState("session is closed".into()));
        }
        self.handle.ensure_live()
    }

    fn ensure_flow(&self, flow: DataFlow) -> Result<(), AudioError> {
        if self.handle.flow() == flow {
            Ok(())
        } else {
            Err(AudioError::InvalidState(format!(
                "{:?} operation on a {:?} session",
                flow,
                self.handle.flow()
            )))
        }
    }

    fn backend_ref(&self) -> Result<&dyn StreamBackend, AudioError> {
        self.backend
            .as_deref()
            .ok_or_else(|| AudioError::InvalidState("session is closed".into()))
    }

    fn backend_mut(&mut self) -> Result<&mut (dyn StreamBackend + 'static), AudioError> {
        self.backend
            .as_deref_mut()
            .ok_or_else(|| AudioError::InvalidState("session is closed".into()))
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("device", &self.handle.id())
            .field("format", &self.format)
            .field("share_mode", &self.share_mode)
            .field("state", &self.state)
            .finish()
    }
}

fn negotiate(
    api: &dyn DeviceApi,
    handle: &EndpointHandle,
    requested: StreamFormat,
    share_mode: ShareMode,
) -> Result<StreamFormat, AudioError> {
    match (api.check_format(handle.id(), share_mode, &requested)?, share_mode) {
        (FormatSupport::Supported, _) => Ok(requested),
        (FormatSupport::ClosestMatch(alternative), ShareMode::Shared) => {
            log::warn!(
                "{} does not accept {} in shared mode; using closest match {}",
                handle,
                requested,
                alternative
            );
            Ok(alternative)
        }
        (FormatSupport::Unsupported, ShareMode::Shared) => {
            let mix = api.mix_format(handle.id())?;
            log::warn!("{} rejected {}; falling back to mix format {}", handle, requested, mix);
            Ok(mix)
        }
        (_, ShareMode::Exclusive) => Err(AudioError::FormatNotSupported(format!(
            "{} in exclusive mode on {}",
            requested,
            handle.id()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::registry::DeviceRegistry;
    use crate::models::event::DeviceEvent;
    use crate::device::notifications::NotificationChannel;
    use crate::sim::{SimulatedDeviceApi, SIM_DEFAULT_MIC, SIM_SPEAKERS, SIM_USB_MIC};
    use std::sync::Arc;

    struct Fixture {
        sim: Arc<SimulatedDeviceApi>,
        registry: DeviceRegistry,
        channel: NotificationChannel,
        _sub: crate::device::notifications::Subscription,
    }

    fn fixture() -> Fixture {
        let sim = Arc::new(SimulatedDeviceApi::with_default_devices());
        let api: Arc<dyn DeviceApi> = sim.clone();
        let channel = NotificationChannel::new(&api);
        let registry = DeviceRegistry::new(api);
        let _sub = registry.attach(&channel);
        Fixture {
            sim,
            registry,
            channel,
            _sub,
        }
    }

    fn open_mic(fx: &Fixture) -> StreamSession {
        let handle = fx.registry.open(SIM_DEFAULT_MIC).unwrap();
        StreamSession::open(
            fx.sim.as_ref(),
            handle,
            StreamFormat::pcm(48000, 16, 1),
            ShareMode::Shared,
            Duration::from_millis(100),
        )
        .unwrap()
    }

    #[test]
    fn state_machine_transitions() {
        let fx = fixture();
        let mut session = open_mic(&fx);
        assert_eq!(session.state(), SessionState::Opened);
        assert!(matches!(session.stop(), Err(AudioError::InvalidState(_))));

        session.start().unwrap();
        assert!(matches!(session.reset(), Err(AudioError::InvalidState(_))));
        session.stop().unwrap();
        session.stop().unwrap();
        assert_eq!(session.state(), SessionState::Stopped);

        session.start().unwrap();
        session.stop().unwrap();
        session.reset().unwrap();
        assert_eq!(session.state(), SessionState::Opened);

        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(session.start(), Err(AudioError::InvalidState(_))));
        assert_eq!(fx.sim.open_stream_count(), 0);
    }

    #[test]
    fn second_acquire_before_release_is_rejected() {
        let fx = fixture();
        let mut session = open_mic(&fx);
        session.start().unwrap();
        fx.sim.tick();
        fx.sim.tick();

        let frames = session.acquire_capture().unwrap().frames;
        assert_eq!(frames, 480);
        assert!(matches!(session.acquire_capture(), Err(AudioError::InvalidArgument(_))));
        assert!(matches!(
            session.release_capture(frames + 1),
            Err(AudioError::InvalidArgument(_))
        ));
        assert!(matches!(
            session.release_capture(frames - 1),
            Err(AudioError::InvalidArgument(_))
        ));
        session.release_capture(frames).unwrap();
        assert!(matches!(session.release_capture(frames), Err(AudioError::InvalidArgument(_))));
    }

    #[test]
    fn release_zero_keeps_packet() {
        let fx = fixture();
        let mut session = open_mic(&fx);
        session.start().unwrap();
        fx.sim.tick();

        let first = session.acquire_capture().unwrap().device_position;
        session.release_capture(0).unwrap();
        let lease = session.acquire_capture().unwrap();
        assert_eq!(lease.device_position, first);
        let samples = lease.mono_samples().unwrap();
        assert_eq!(samples.len(), 480);
        let frames = lease.frames;
        session.release_capture(frames).unwrap();
        assert_eq!(session.acquire_capture().unwrap_err(), AudioError::BufferEmpty);
    }

    #[test]
    fn shared_mode_adopts_closest_match() {
        let fx = fixture();
        let handle = fx.registry.open(SIM_USB_MIC).unwrap();
        let session = StreamSession::open(
            fx.sim.as_ref(),
            handle,
            StreamFormat::pcm(48000, 16, 1),
            ShareMode::Shared,
            Duration::from_millis(50),
        )
        .unwrap();
        assert_eq!(session.format(), StreamFormat::float(48000, 2));
        assert_eq!(session.buffer_frames().unwrap(), 2400);
    }

    #[test]
    fn exclusive_rejection_leaves_handle_usable() {
        let fx = fixture();
        let handle = fx.registry.open(SIM_DEFAULT_MIC).unwrap();
        let err = StreamSession::open(
            fx.sim.as_ref(),
            handle.clone(),
            StreamFormat::pcm(44100, 24, 1),
            ShareMode::Exclusive,
            Duration::from_millis(20),
        )
        .unwrap_err();
        assert!(matches!(err, AudioError::FormatNotSupported(_)));
        assert!(handle.is_live());

        let session = StreamSession::open(
            fx.sim.as_ref(),
            handle,
            StreamFormat::pcm(48000, 16, 1),
            ShareMode::Shared,
            Duration::from_millis(20),
        )
        .unwrap();
        assert_eq!(session.state(), SessionState::Opened);
    }

    #[test]
    fn stale_handle_fails_every_operation_with_device_lost() {
        let fx = fixture();
        let mut session = open_mic(&fx);
        session.start().unwrap();
        fx.channel.inject(DeviceEvent::DeviceRemoved {
            id: SIM_DEFAULT_MIC.into(),
        });

        let lost = AudioError::DeviceLost(SIM_DEFAULT_MIC.into());
        assert_eq!(session.acquire_capture().unwrap_err(), lost);
        assert_eq!(session.padding().unwrap_err(), lost);
        assert_eq!(session.stop().unwrap_err(), lost);
        session.close();
        assert!(session.state().is_closed());
    }

    #[test]
    fn render_lease_bounds() {
        let fx = fixture();
        let handle = fx.registry.open(SIM_SPEAKERS).unwrap();
        let mut session = StreamSession::open(
            fx.sim.as_ref(),
            handle,
            StreamFormat::float(48000, 2),
            ShareMode::Shared,
            Duration::from_millis(20),
        )
        .unwrap();
        assert!(matches!(session.acquire_capture(), Err(AudioError::InvalidState(_))));

        let available = session.render_frames_available().unwrap();
        assert_eq!(available, 960);
        assert!(matches!(
            session.acquire_render(available + 1),
            Err(AudioError::InvalidArgument(_))
        ));

        let tone: Vec<f32> = (0..480).flat_map(|i| {
            let s = 0.25 * (i as f32 * 0.05).sin();
            [s, s]
        }).collect();
        let mut lease = session.acquire_render(480).unwrap();
        let written = lease.write_samples(&tone).unwrap();
        assert_eq!(written, 480);
        assert!(matches!(
            session.release_render(481, BufferFlags::NONE),
            Err(AudioError::InvalidArgument(_))
        ));
        session.release_render(written, BufferFlags::NONE).unwrap();
        assert_eq!(session.padding().unwrap(), 480);

        let lease = session.acquire_render(480).unwrap();
        let frames = lease.frames;
        session.release_render(frames, BufferFlags::NONE).unwrap();
        assert_eq!(session.acquire_render(1).unwrap_err(), AudioError::BufferFull);

        assert_eq!(fx.sim.rendered_frames(SIM_SPEAKERS), 960);
        assert!(fx.sim.rendered_peak(SIM_SPEAKERS) > 0.2);
    }

    #[test]
    fn drop_closes_backend() {
        let fx = fixture();
        let mut session = open_mic(&fx);
        session.start().unwrap();
        assert_eq!(fx.sim.running_stream_count(), 1);
        drop(session);
        assert_eq!(fx.sim.open_stream_count(), 0);
    }
}
