use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::models::buffer_flags::BufferFlags;
use crate::models::endpoint::{DataFlow, DeviceRole, DeviceState, EndpointDescriptor, StateMask};
use crate::models::error::AudioError;
use crate::models::format::{ShareMode, StreamFormat};
use crate::models::property::PropertyKey;
use crate::traits::device_api::{DeviceApi, FormatSupport, NotificationToken, StreamParams};
use crate::traits::notification_sink::NotificationSink;
use crate::traits::stream_backend::StreamBackend;

use super::stream::{SimStream, StreamCore};
use super::{SIM_DEFAULT_MIC, SIM_SPEAKERS, SIM_USB_MIC};

/// Device period of every simulated endpoint.
pub const SIM_DEVICE_PERIOD: Duration = Duration::from_millis(10);

/// How simulated streams advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimClock {
    /// Only `tick()` / `advance()` move audio.
    Manual,
    /// Streams catch up with elapsed wall-clock time when polled.
    Realtime,
}

/// One row of the simulated device table.
#[derive(Debug, Clone)]
pub struct SimDevice {
    pub descriptor: EndpointDescriptor,
    pub mix_format: StreamFormat,
    /// Formats accepted in exclusive mode.
    pub exclusive_formats: Vec<StreamFormat>,
}

impl SimDevice {
    pub fn new(descriptor: EndpointDescriptor, mix_format: StreamFormat) -> Self {
        Self {
            descriptor,
            mix_format,
            exclusive_formats: vec![mix_format],
        }
    }

    pub fn with_exclusive_formats(mut self, formats: Vec<StreamFormat>) -> Self {
        self.exclusive_formats = formats;
        self
    }
}

struct SimState {
    devices: Vec<SimDevice>,
    defaults: HashMap<(DataFlow, DeviceRole), String>,
    sinks: Vec<(NotificationToken, Arc<dyn NotificationSink>)>,
    next_token: NotificationToken,
    streams: Vec<Weak<Mutex<StreamCore>>>,
    fail_next_open: Option<AudioError>,
    clock: SimClock,
    tone_hz: f32,
}

impl SimState {
    fn device(&self, id: &str) -> Result<&SimDevice, AudioError> {
        self.devices
            .iter()
            .find(|d| d.descriptor.id == id)
            .ok_or_else(|| AudioError::DeviceNotFound(id.to_string()))
    }

    fn live_streams(&mut self) -> Vec<Arc<Mutex<StreamCore>>> {
        self.streams.retain(|w| w.strong_count() > 0);
        self.streams.iter().filter_map(Weak::upgrade).collect()
    }

    fn invalidate_streams(&mut self, id: &str) {
        for core in self.live_streams() {
            let mut core = core.lock();
            if core.device_id == id {
                core.invalidate();
            }
        }
    }

    /// Move defaults away from `id`; returns the (flow, role, new default) changes.
    fn reassign_defaults(&mut self, id: &str) -> Vec<(DataFlow, DeviceRole, Option<String>)> {
        let mut changes = Vec::new();
        let affected: Vec<(DataFlow, DeviceRole)> = self
            .defaults
            .iter()
            .filter(|(_, v)| v.as_str() == id)
            .map(|(k, _)| *k)
            .collect();
        for (flow, role) in affected {
            let replacement = self
                .devices
                .iter()
                .find(|d| d.descriptor.flow == flow && d.descriptor.state.is_active() && d.descriptor.id != id)
                .map(|d| d.descriptor.id.clone());
            match &replacement {
                Some(new_id) => {
                    self.defaults.insert((flow, role), new_id.clone());
                }
                None => {
                    self.defaults.remove(&(flow, role));
                }
            }
            changes.push((flow, role, replacement));
        }
        changes.sort_by_key(|(flow, role, _)| (*flow as u8, *role as u32));
        changes
    }

    fn sinks(&self) -> Vec<Arc<dyn NotificationSink>> {
        self.sinks.iter().map(|(_, s)| Arc::clone(s)).collect()
    }
}

/// Scriptable `DeviceApi` backed by an in-memory device table.
pub struct SimulatedDeviceApi {
    state: Mutex<SimState>,
}

impl Default for SimulatedDeviceApi {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDeviceApi {
    /// No devices, manual clock, 440 Hz test tone.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                devices: Vec::new(),
                defaults: HashMap::new(),
                sinks: Vec::new(),
                next_token: 1,
                streams: Vec::new(),
                fail_next_open: None,
                clock: SimClock::Manual,
                tone_hz: 440.0,
            }),
        }
    }

    /// Built-in mic (default input), USB mic, and speakers (default output).
    pub fn with_default_devices() -> Self {
        let sim = Self::new();
        {
            let mut state = sim.state.lock();
            state.devices = vec![
                SimDevice::new(
                    EndpointDescriptor::new(SIM_DEFAULT_MIC, "Microphone (Built-in)", DataFlow::Input, DeviceState::Active),
                    StreamFormat::pcm(48000, 16, 1),
                ),
                SimDevice::new(
                    EndpointDescriptor::new(SIM_USB_MIC, "Headset Microphone (USB)", DataFlow::Input, DeviceState::Active),
                    StreamFormat::float(48000, 2),
                )
                .with_exclusive_formats(vec![StreamFormat::pcm(48000, 16, 2), StreamFormat::pcm(48000, 24, 2)]),
                SimDevice::new(
                    EndpointDescriptor::new(SIM_SPEAKERS, "Speakers (Built-in)", DataFlow::Output, DeviceState::Active),
                    StreamFormat::float(48000, 2),
                )
                .with_exclusive_formats(vec![StreamFormat::pcm(48000, 16, 2)]),
            ];
            for role in DeviceRole::ALL {
                state.defaults.insert((DataFlow::Input, role), SIM_DEFAULT_MIC.to_string());
                state.defaults.insert((DataFlow::Output, role), SIM_SPEAKERS.to_string());
            }
        }
        sim
    }

    pub fn with_clock(self, clock: SimClock) -> Self {
        self.state.lock().clock = clock;
        self
    }

    pub fn with_tone(self, hz: f32) -> Self {
        self.state.lock().tone_hz = hz;
        self
    }

    /// Add (or replace) a device and announce it.
    pub fn add_device(&self, device: SimDevice) {
        let id = device.descriptor.id.clone();
        let sinks = {
            let mut state = self.state.lock();
            state.devices.retain(|d| d.descriptor.id != id);
            state.devices.push(device);
            state.sinks()
        };
        log::debug!("sim: device {} added", id);
        for sink in sinks {
            sink.on_device_added(&id);
        }
    }

    /// Remove a device. Open streams on it fail with `DeviceLost` from now on.
    pub fn remove_device(&self, id: &str) {
        let (sinks, default_changes) = {
            let mut state = self.state.lock();
            let before = state.devices.len();
            state.devices.retain(|d| d.descriptor.id != id);
            if state.devices.len() == before {
                return;
            }
            state.invalidate_streams(id);
            let changes = state.reassign_defaults(id);
            (state.sinks(), changes)
        };
        log::debug!("sim: device {} removed", id);
        for sink in &sinks {
            sink.on_device_removed(id);
        }
        Self::announce_defaults(&sinks, default_changes);
    }

    pub fn set_state(&self, id: &str, new_state: DeviceState) {
        let (sinks, default_changes) = {
            let mut state = self.state.lock();
            let Some(device) = state.devices.iter_mut().find(|d| d.descriptor.id == id) else {
                return;
            };
            device.descriptor.state = new_state;
            let changes = if new_state.is_active() {
                Vec::new()
            } else {
                state.invalidate_streams(id);
                state.reassign_defaults(id)
            };
            (state.sinks(), changes)
        };
        log::debug!("sim: device {} now {:?}", id, new_state);
        for sink in &sinks {
            sink.on_device_state_changed(id, new_state);
        }
        Self::announce_defaults(&sinks, default_changes);
    }

    /// Change the friendly name and announce the property change.
    pub fn rename_device(&self, id: &str, name: &str) {
        {
            let mut state = self.state.lock();
            let Some(device) = state.devices.iter_mut().find(|d| d.descriptor.id == id) else {
                return;
            };
            device.descriptor.name = name.to_string();
        }
        self.change_property(id, PropertyKey::DEVICE_FRIENDLY_NAME);
    }

    pub fn change_property(&self, id: &str, key: PropertyKey) {
        let sinks = self.state.lock().sinks();
        for sink in sinks {
            sink.on_property_value_changed(id, key);
        }
    }

    /// Make the next `open_stream` fail with `error`.
    pub fn fail_next_open(&self, error: AudioError) {
        self.state.lock().fail_next_open = Some(error);
    }

    /// Advance every running stream by one device period.
    pub fn tick(&self) {
        for core in self.state.lock().live_streams() {
            let mut core = core.lock();
            let frames = core.period_frames();
            core.advance(frames);
        }
    }

    /// Advance every running stream by `duration` (whole periods only).
    pub fn advance(&self, duration: Duration) {
        let ticks = (duration.as_micros() / SIM_DEVICE_PERIOD.as_micros()) as usize;
        for _ in 0..ticks {
            self.tick();
        }
    }

    /// Attach `flags` to the next packet every capture stream on `id` produces.
    pub fn flag_next_capture(&self, id: &str, flags: BufferFlags) {
        for core in self.state.lock().live_streams() {
            let mut core = core.lock();
            if core.device_id == id {
                core.flag_next_packet(flags);
            }
        }
    }

    pub fn sink_count(&self) -> usize {
        self.state.lock().sinks.len()
    }

    /// Streams still held open by someone.
    pub fn open_stream_count(&self) -> usize {
        self.state.lock().live_streams().len()
    }

    pub fn running_stream_count(&self) -> usize {
        self.state
            .lock()
            .live_streams()
            .iter()
            .filter(|c| c.lock().is_running())
            .count()
    }

    /// Frames committed by render streams on `id`.
    pub fn rendered_frames(&self, id: &str) -> u64 {
        self.state
            .lock()
            .live_streams()
            .iter()
            .map(|c| c.lock())
            .filter(|c| c.device_id == id)
            .map(|c| c.rendered_frames())
            .sum()
    }

    /// Highest absolute sample committed by render streams on `id`.
    pub fn rendered_peak(&self, id: &str) -> f32 {
        self.state
            .lock()
            .live_streams()
            .iter()
            .map(|c| c.lock())
            .filter(|c| c.device_id == id)
            .map(|c| c.rendered_peak())
            .fold(0.0, f32::max)
    }

    fn announce_defaults(
        sinks: &[Arc<dyn NotificationSink>],
        changes: Vec<(DataFlow, DeviceRole, Option<String>)>,
    ) {
        for (flow, role, new_id) in changes {
            for sink in sinks {
                sink.on_default_device_changed(flow, role, new_id.as_deref());
            }
        }
    }
}

impl DeviceApi for SimulatedDeviceApi {
    fn enumerate(&self, flow: DataFlow, mask: StateMask) -> Result<Vec<EndpointDescriptor>, AudioError> {
        Ok(self
            .state
            .lock()
            .devices
            .iter()
            .map(|d| &d.descriptor)
            .filter(|d| d.flow == flow && mask.contains(d.state))
            .cloned()
            .collect())
    }

    fn default_endpoint(&self, flow: DataFlow, role: DeviceRole) -> Result<Option<String>, AudioError> {
        let state = self.state.lock();
        Ok(state
            .defaults
            .get(&(flow, role))
            .filter(|id| state.device(id).is_ok_and(|d| d.descriptor.state.is_active()))
            .cloned())
    }

    fn describe(&self, id: &str) -> Result<Option<EndpointDescriptor>, AudioError> {
        Ok(self.state.lock().device(id).ok().map(|d| d.descriptor.clone()))
    }

    fn set_default_endpoint(&self, id: &str, role: DeviceRole) -> Result<(), AudioError> {
        let (flow, sinks) = {
            let mut state = self.state.lock();
            let device = state.device(id)?;
            if !device.descriptor.state.is_active() {
                return Err(AudioError::DeviceNotFound(id.to_string()));
            }
            let flow = device.descriptor.flow;
            if state.defaults.get(&(flow, role)).is_some_and(|current| current == id) {
                return Ok(());
            }
            state.defaults.insert((flow, role), id.to_string());
            (flow, state.sinks())
        };
        for sink in sinks {
            sink.on_default_device_changed(flow, role, Some(id));
        }
        Ok(())
    }

    fn mix_format(&self, id: &str) -> Result<StreamFormat, AudioError> {
        Ok(self.state.lock().device(id)?.mix_format)
    }

    fn check_format(&self, id: &str, share_mode: ShareMode, format: &StreamFormat) -> Result<FormatSupport, AudioError> {
        format.validate()?;
        let state = self.state.lock();
        let device = state.device(id)?;
        Ok(match share_mode {
            ShareMode::Shared if *format == device.mix_format => FormatSupport::Supported,
            ShareMode::Shared => FormatSupport::ClosestMatch(device.mix_format),
            ShareMode::Exclusive if device.exclusive_formats.contains(format) => FormatSupport::Supported,
            ShareMode::Exclusive => FormatSupport::Unsupported,
        })
    }

    fn open_stream(&self, id: &str, params: &StreamParams) -> Result<Box<dyn StreamBackend>, AudioError> {
        let mut state = self.state.lock();
        if let Some(error) = state.fail_next_open.take() {
            return Err(error);
        }

        let device = state.device(id)?;
        if !device.descriptor.state.is_active() {
            return Err(AudioError::DeviceLost(id.to_string()));
        }
        if device.descriptor.flow != params.flow {
            return Err(AudioError::InvalidArgument(format!(
                "{} is not a {:?} device",
                id, params.flow
            )));
        }
        params.format.validate()?;
        let accepted = match params.share_mode {
            ShareMode::Shared => params.format == device.mix_format,
            ShareMode::Exclusive => device.exclusive_formats.contains(&params.format),
        };
        if !accepted {
            return Err(AudioError::FormatNotSupported(params.format.to_string()));
        }
        if params.share_mode == ShareMode::Exclusive && params.periodicity != params.buffer_duration {
            return Err(AudioError::InvalidArgument(
                "exclusive mode requires periodicity equal to buffer duration".into(),
            ));
        }

        let period_frames = params.format.frames_for(SIM_DEVICE_PERIOD).max(1);
        let buffer_frames = params.format.frames_for(params.buffer_duration).max(period_frames);
        let core = Arc::new(Mutex::new(StreamCore::new(
            id,
            params.flow,
            params.format,
            buffer_frames,
            period_frames,
            state.clock,
            state.tone_hz,
        )));
        state.streams.push(Arc::downgrade(&core));
        log::debug!(
            "sim: opened {:?} stream on {} ({}, {} frames)",
            params.share_mode,
            id,
            params.format,
            buffer_frames
        );
        Ok(Box::new(SimStream::new(core)))
    }

    fn register_notifications(&self, sink: Arc<dyn NotificationSink>) -> Result<NotificationToken, AudioError> {
        let mut state = self.state.lock();
        let token = state.next_token;
        state.next_token += 1;
        state.sinks.push((token, sink));
        Ok(token)
    }

    fn unregister_notifications(&self, token: NotificationToken) -> Result<(), AudioError> {
        self.state.lock().sinks.retain(|(t, _)| *t != token);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::DeviceEvent;
    use crate::device::notifications::NotificationChannel;

    fn params(format: StreamFormat, share_mode: ShareMode) -> StreamParams {
        StreamParams {
            flow: DataFlow::Input,
            format,
            share_mode,
            buffer_duration: Duration::from_millis(100),
            periodicity: Duration::from_millis(100),
        }
    }

    #[test]
    fn capture_stream_produces_one_period_per_tick() {
        let sim = SimulatedDeviceApi::with_default_devices();
        let mut stream = sim
            .open_stream(SIM_DEFAULT_MIC, &params(StreamFormat::pcm(48000, 16, 1), ShareMode::Shared))
            .unwrap();
        assert_eq!(stream.buffer_frames(), 4800);
        assert_eq!(stream.capture_buffer().unwrap_err(), AudioError::BufferEmpty);

        stream.start().unwrap();
        sim.tick();
        sim.tick();
        assert_eq!(stream.padding().unwrap(), 960);

        let packet = stream.capture_buffer().unwrap();
        assert_eq!(packet.frames, 480);
        assert_eq!(packet.data.len(), 960);
        assert_eq!(packet.device_position, 0);
        stream.release_capture(480).unwrap();
        assert_eq!(stream.capture_buffer().unwrap().device_position, 480);
    }

    #[test]
    fn overrun_flags_discontinuity() {
        let sim = SimulatedDeviceApi::with_default_devices();
        let mut stream = sim
            .open_stream(SIM_DEFAULT_MIC, &params(StreamFormat::pcm(48000, 16, 1), ShareMode::Shared))
            .unwrap();
        stream.start().unwrap();
        sim.advance(Duration::from_millis(150));

        assert_eq!(stream.padding().unwrap(), 4800);
        let packet = stream.capture_buffer().unwrap();
        assert!(packet.flags.data_discontinuity);
        assert_eq!(packet.device_position, 480 * 5);
    }

    #[test]
    fn removal_invalidates_open_streams() {
        let sim = SimulatedDeviceApi::with_default_devices();
        let mut stream = sim
            .open_stream(SIM_DEFAULT_MIC, &params(StreamFormat::pcm(48000, 16, 1), ShareMode::Shared))
            .unwrap();
        sim.remove_device(SIM_DEFAULT_MIC);
        assert_eq!(
            stream.start().unwrap_err(),
            AudioError::DeviceLost(SIM_DEFAULT_MIC.into())
        );
        assert_eq!(
            sim.default_endpoint(DataFlow::Input, DeviceRole::Console).unwrap(),
            Some(SIM_USB_MIC.to_string())
        );
    }

    #[test]
    fn open_rejects_unnegotiated_formats() {
        let sim = SimulatedDeviceApi::with_default_devices();
        let shared = sim.open_stream(SIM_USB_MIC, &params(StreamFormat::pcm(44100, 16, 1), ShareMode::Shared));
        assert!(matches!(shared, Err(AudioError::FormatNotSupported(_))));

        assert_eq!(
            sim.check_format(SIM_USB_MIC, ShareMode::Shared, &StreamFormat::pcm(44100, 16, 1))
                .unwrap(),
            FormatSupport::ClosestMatch(StreamFormat::float(48000, 2))
        );
        assert_eq!(
            sim.check_format(SIM_USB_MIC, ShareMode::Exclusive, &StreamFormat::pcm(48000, 24, 2))
                .unwrap(),
            FormatSupport::Supported
        );
    }

    #[test]
    fn injected_open_failure_fires_once() {
        let sim = SimulatedDeviceApi::with_default_devices();
        sim.fail_next_open(AudioError::platform("Initialize", -2004287480));
        let p = params(StreamFormat::pcm(48000, 16, 1), ShareMode::Shared);
        assert!(matches!(
            sim.open_stream(SIM_DEFAULT_MIC, &p),
            Err(AudioError::PlatformFailure { .. })
        ));
        assert!(sim.open_stream(SIM_DEFAULT_MIC, &p).is_ok());
    }

    #[test]
    fn mutations_reach_registered_sinks() {
        let sim = Arc::new(SimulatedDeviceApi::with_default_devices());
        let api: Arc<dyn DeviceApi> = sim.clone();
        let channel = Arc::new(NotificationChannel::new(&api));
        let token = api.register_notifications(channel.clone()).unwrap();
        let (_sub, rx) = channel.subscribe_queue(&[]);

        sim.set_default_endpoint(SIM_USB_MIC, DeviceRole::Communications).unwrap();
        sim.rename_device(SIM_USB_MIC, "Renamed");

        assert_eq!(
            rx.try_recv().unwrap(),
            DeviceEvent::DefaultDeviceChanged {
                flow: DataFlow::Input,
                role: DeviceRole::Communications,
                new_id: Some(SIM_USB_MIC.into()),
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            DeviceEvent::PropertyValueChanged {
                id: SIM_USB_MIC.into(),
                key: PropertyKey::DEVICE_FRIENDLY_NAME,
            }
        );

        api.unregister_notifications(token).unwrap();
        sim.remove_device(SIM_USB_MIC);
        assert!(rx.try_recv().is_err());
    }
}
