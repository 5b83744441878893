//! Session controller: device selection, auto-reconnect, and forced teardown.

use std::path::PathBuf;
use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::device::context::AudioContext;
use crate::device::handle::EndpointHandle;
use crate::device::notifications::Subscription;
use crate::exchange::result_exchange::ResultExchange;
use crate::models::config::SessionConfiguration;
use crate::models::endpoint::{DataFlow, EndpointDescriptor};
use crate::models::error::AudioError;
use crate::models::event::{DeviceEvent, EventKind};
use crate::models::format::StreamFormat;
use crate::models::state::SessionState;
use crate::processing::analyzer::LevelAnalyzer;
use crate::session::capture_loop::{CaptureLoop, LoopStatus};
use crate::session::stream::StreamSession;
use crate::storage::preferences::Preferences;
use crate::traits::analyzer::Analyzer;
use crate::traits::controller_delegate::ControllerDelegate;

/// Builds a fresh analyzer for each capture session.
pub type AnalyzerFactory = Box<dyn Fn() -> Box<dyn Analyzer> + Send + Sync>;

struct ActiveCapture {
    handle: EndpointHandle,
    capture: CaptureLoop,
    follows_default: bool,
}

/// Owns the active capture session and reacts to device changes.
///
/// All work happens on the thread that calls into the controller. Device
/// notifications are queued by the notification thread and handled by
/// `pump_events`, which the application calls from its tick loop.
///
/// Selection is all-or-nothing: the new session is opened, started, and
/// running before the previous one is torn down. A failure at any step
/// leaves the previous capture untouched.
pub struct SessionController {
    // Declared first so captures are torn down before the context goes away.
    active: Option<ActiveCapture>,
    events: Receiver<DeviceEvent>,
    _subscription: Subscription,
    config: SessionConfiguration,
    exchange: Arc<ResultExchange>,
    delegate: Option<Arc<dyn ControllerDelegate>>,
    preferences: Preferences,
    preferences_path: Option<PathBuf>,
    analyzer_factory: AnalyzerFactory,
    /// Capture was requested and not stopped since.
    wanted: bool,
    context: AudioContext,
}

impl SessionController {
    pub fn new(context: AudioContext, config: SessionConfiguration) -> Result<Self, AudioError> {
        config.validate()?;
        let (subscription, events) = context.channel().subscribe_queue(&[
            EventKind::DeviceAdded,
            EventKind::DeviceRemoved,
            EventKind::DeviceStateChanged,
            EventKind::DefaultDeviceChanged,
        ]);
        Ok(Self {
            active: None,
            events,
            _subscription: subscription,
            config,
            exchange: Arc::new(ResultExchange::new()),
            delegate: None,
            preferences: Preferences::default(),
            preferences_path: None,
            analyzer_factory: Box::new(|| Box::new(LevelAnalyzer::default())),
            wanted: false,
            context,
        })
    }

    pub fn with_delegate(mut self, delegate: Arc<dyn ControllerDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Load and persist preferences at `path`. An unreadable file is logged
    /// and replaced by defaults.
    pub fn with_preferences_path(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.preferences = Preferences::load(&path).unwrap_or_else(|e| {
            log::warn!("Ignoring unreadable preferences: {}", e);
            Preferences::default()
        });
        self.preferences_path = Some(path);
        self
    }

    pub fn with_preferences(mut self, preferences: Preferences) -> Self {
        self.preferences = preferences;
        self
    }

    pub fn with_analyzer<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Analyzer> + Send + Sync + 'static,
    {
        self.analyzer_factory = Box::new(factory);
        self
    }

    /// Start capturing on the remembered device, or the default device when
    /// nothing is remembered or the remembered device is gone.
    pub fn start(&mut self) -> Result<(), AudioError> {
        self.wanted = true;
        if let Some(id) = self.preferences.last_device_id.clone() {
            match self.context.registry().open(&id) {
                Ok(handle) => return self.activate(handle, false),
                Err(AudioError::DeviceNotFound(_)) => {
                    log::warn!("Remembered device {} is not available; using the default device", id);
                }
                Err(e) => return Err(self.report_failure(e)),
            }
        } else {
            log::info!("No remembered capture device; using the default device");
        }
        self.activate_default()
    }

    /// Switch capture to `id` and remember it.
    ///
    /// Pinning the device that is already capturing keeps the running session.
    pub fn select_device(&mut self, id: &str) -> Result<(), AudioError> {
        self.wanted = true;
        if let Some(active) = self.active.as_mut().filter(|a| a.handle.id() == id && a.handle.is_live()) {
            if active.follows_default {
                log::info!("Pinning capture to {}", active.handle);
                active.follows_default = false;
            }
            self.remember(Some(id.to_string()));
            return Ok(());
        }
        let handle = self
            .context
            .registry()
            .open(id)
            .map_err(|e| self.report_failure(e))?;
        if handle.flow() != DataFlow::Input {
            return Err(self.report_failure(AudioError::InvalidArgument(format!(
                "{} is not a capture device",
                id
            ))));
        }
        self.activate(handle, false)?;
        self.remember(Some(id.to_string()));
        Ok(())
    }

    /// Switch capture to the default device and follow it from now on.
    ///
    /// When the default is already capturing, only the follow flag changes.
    pub fn select_default(&mut self) -> Result<(), AudioError> {
        self.wanted = true;
        let handle = self
            .context
            .registry()
            .resolve_default(DataFlow::Input, self.config.role)
            .map_err(|e| self.report_failure(e))?;
        match self.active.as_mut().filter(|a| a.handle.same_binding(&handle)) {
            Some(active) => {
                log::info!("Capture on {} now follows the default device", active.handle);
                active.follows_default = true;
            }
            None => self.activate(handle, true)?,
        }
        self.remember(None);
        Ok(())
    }

    /// Stop and close the active capture, if any.
    pub fn stop(&mut self) {
        self.wanted = false;
        if let Some(active) = self.active.take() {
            let descriptor = active.handle.descriptor().clone();
            Self::teardown(active);
            log::info!("Capture stopped on {}", descriptor);
            if let Some(delegate) = &self.delegate {
                delegate.on_capture_stopped(&descriptor);
            }
        }
    }

    /// Handle queued device notifications and capture-thread exits.
    /// Returns the number of notifications handled.
    pub fn pump_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
            handled += 1;
        }

        let status = self.active.as_ref().map(|a| a.capture.status());
        match status {
            Some(LoopStatus::DeviceLost) => self.lose_active(),
            Some(LoopStatus::Failed(e)) => {
                if let Some(active) = self.active.take() {
                    Self::teardown(active);
                }
                log::error!("Capture failed: {}", e);
                if let Some(delegate) = &self.delegate {
                    delegate.on_capture_failed(&e);
                }
            }
            _ => {}
        }
        handled
    }

    pub fn exchange(&self) -> Arc<ResultExchange> {
        Arc::clone(&self.exchange)
    }

    pub fn active_device(&self) -> Option<EndpointDescriptor> {
        self.active.as_ref().map(|a| a.handle.descriptor().clone())
    }

    /// Whether the active capture follows the system default.
    pub fn follows_default(&self) -> bool {
        self.active.as_ref().is_some_and(|a| a.follows_default)
    }

    /// State of the active session; `Closed` when nothing is active.
    pub fn session_state(&self) -> SessionState {
        self.active
            .as_ref()
            .and_then(|a| a.capture.session_state())
            .unwrap_or(SessionState::Closed)
    }

    pub fn loop_status(&self) -> Option<LoopStatus> {
        self.active.as_ref().map(|a| a.capture.status())
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    pub fn config(&self) -> &SessionConfiguration {
        &self.config
    }

    pub fn context(&self) -> &AudioContext {
        &self.context
    }

    fn handle_event(&mut self, event: DeviceEvent) {
        log::debug!("Controller handling {}", event);
        let active_id = self.active.as_ref().map(|a| a.handle.id().to_string());

        if let Some(active) = &self.active {
            // Queued events can predate a reopen; the registry has already
            // invalidated the handle if the device is really gone.
            if event.invalidates(active.handle.id()) {
                if !active.handle.is_live() {
                    self.lose_active();
                } else {
                    log::debug!("Ignoring stale {} for live {}", event, active.handle);
                }
                return;
            }
        }

        match &event {
            DeviceEvent::DeviceAdded(_) | DeviceEvent::DeviceStateChanged { .. } => {
                let Some(id) = event.device_id() else { return };
                let reconnect = self.wanted
                    && event.revives(id)
                    && self.preferences.prefers(id)
                    && active_id.as_deref() != Some(id);
                if reconnect {
                    log::info!("Preferred device {} is back; reconnecting", id);
                    let id = id.to_string();
                    match self.context.registry().open(&id) {
                        Ok(handle) => {
                            if let Err(e) = self.activate(handle, false) {
                                log::warn!("Reconnect to {} failed: {}", id, e);
                            }
                        }
                        Err(e) => log::warn!("Reconnect to {} failed: {}", id, e),
                    }
                }
            }
            DeviceEvent::DefaultDeviceChanged { flow, role, new_id } => {
                if *flow != DataFlow::Input || *role != self.config.role || !self.wanted {
                    return;
                }
                let following = match &self.active {
                    Some(active) => active.follows_default,
                    // Nothing running and nothing remembered: pick up a new default.
                    None => self.preferences.last_device_id.is_none(),
                };
                if !following || new_id.as_deref() == active_id.as_deref() {
                    return;
                }
                match new_id {
                    Some(_) => {
                        if let Err(e) = self.activate_default() {
                            log::warn!("Switching to the new default device failed: {}", e);
                            self.lose_active();
                        }
                    }
                    None => self.lose_active(),
                }
            }
            DeviceEvent::DeviceRemoved { .. } | DeviceEvent::PropertyValueChanged { .. } => {}
        }
    }

    fn activate_default(&mut self) -> Result<(), AudioError> {
        let handle = self
            .context
            .registry()
            .resolve_default(DataFlow::Input, self.config.role)
            .map_err(|e| self.report_failure(e))?;
        self.activate(handle, true)
    }

    /// Open, start, and spawn a capture on `handle`, then replace the active one.
    fn activate(&mut self, handle: EndpointHandle, follows_default: bool) -> Result<(), AudioError> {
        let (capture, format) = self.build_capture(&handle).map_err(|e| self.report_failure(e))?;

        if let Some(previous) = self.active.take() {
            let descriptor = previous.handle.descriptor().clone();
            Self::teardown(previous);
            log::info!("Capture moved off {}", descriptor);
            if let Some(delegate) = &self.delegate {
                delegate.on_capture_stopped(&descriptor);
            }
        }

        log::info!("Capture started on {} ({})", handle, format);
        if let Some(delegate) = &self.delegate {
            delegate.on_capture_started(handle.descriptor(), &format);
        }
        self.active = Some(ActiveCapture {
            handle,
            capture,
            follows_default,
        });
        Ok(())
    }

    fn build_capture(&self, handle: &EndpointHandle) -> Result<(CaptureLoop, StreamFormat), AudioError> {
        let mut session = StreamSession::open(
            self.context.api().as_ref(),
            handle.clone(),
            self.config.format,
            self.config.share_mode,
            self.config.buffer_duration,
        )?;
        session.start()?;
        let format = session.format();
        let capture = CaptureLoop::spawn(
            session,
            Arc::clone(&self.exchange),
            (self.analyzer_factory)(),
            self.config.analysis_window,
            self.config.period,
        )?;
        Ok((capture, format))
    }

    fn lose_active(&mut self) {
        let Some(active) = self.active.take() else { return };
        let descriptor = active.handle.descriptor().clone();
        Self::teardown(active);
        log::warn!("Capture device lost: {}", descriptor);
        if let Some(delegate) = &self.delegate {
            delegate.on_device_lost(&descriptor);
        }
    }

    fn teardown(active: ActiveCapture) {
        if let Some(mut session) = active.capture.stop() {
            session.close();
        }
    }

    fn report_failure(&self, error: AudioError) -> AudioError {
        log::error!("Could not start capture: {}", error);
        if let Some(delegate) = &self.delegate {
            delegate.on_capture_failed(&error);
        }
        error
    }

    fn remember(&mut self, id: Option<String>) {
        if self.preferences.last_device_id == id {
            return;
        }
        self.preferences.last_device_id = id;
        if let Some(path) = &self.preferences_path {
            if let Err(e) = self.preferences.save(path) {
                log::warn!("Failed to save preferences: {}", e);
            }
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            Self::teardown(active);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::endpoint::DeviceState;
    use crate::sim::{SimClock, SimulatedDeviceApi, SIM_DEFAULT_MIC, SIM_USB_MIC};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.events.lock())
        }
    }

    impl ControllerDelegate for Recorder {
        fn on_capture_started(&self, device: &EndpointDescriptor, _format: &StreamFormat) {
            self.events.lock().push(format!("started {}", device.id));
        }
        fn on_capture_stopped(&self, device: &EndpointDescriptor) {
            self.events.lock().push(format!("stopped {}", device.id));
        }
        fn on_device_lost(&self, device: &EndpointDescriptor) {
            self.events.lock().push(format!("lost {}", device.id));
        }
        fn on_capture_failed(&self, error: &AudioError) {
            self.events.lock().push(format!("failed {}", error));
        }
    }

    fn controller() -> (Arc<SimulatedDeviceApi>, SessionController, Arc<Recorder>) {
        let sim = Arc::new(SimulatedDeviceApi::with_default_devices().with_clock(SimClock::Realtime));
        let context = AudioContext::new(sim.clone()).unwrap();
        let recorder = Arc::new(Recorder::default());
        let controller = SessionController::new(context, SessionConfiguration::default())
            .unwrap()
            .with_delegate(recorder.clone());
        (sim, controller, recorder)
    }

    #[test]
    fn start_without_preference_uses_default() {
        let (_sim, mut controller, recorder) = controller();
        controller.start().unwrap();
        assert_eq!(controller.active_device().unwrap().id, SIM_DEFAULT_MIC);
        assert!(controller.follows_default());
        assert_eq!(controller.session_state(), SessionState::Running);
        assert_eq!(recorder.take(), vec![format!("started {}", SIM_DEFAULT_MIC)]);
    }

    #[test]
    fn missing_preferred_device_falls_back_to_default() {
        let (_sim, controller, _recorder) = controller();
        let mut controller = controller.with_preferences(Preferences {
            last_device_id: Some("unplugged-long-ago".into()),
            saved_at: None,
        });
        controller.start().unwrap();
        assert_eq!(controller.active_device().unwrap().id, SIM_DEFAULT_MIC);
        // The preference survives the fallback.
        assert!(controller.preferences().prefers("unplugged-long-ago"));
    }

    #[test]
    fn failed_selection_keeps_previous_capture() {
        let (sim, mut controller, recorder) = controller();
        controller.start().unwrap();
        recorder.take();

        sim.fail_next_open(AudioError::platform("Initialize", -2004287478));
        let err = controller.select_device(SIM_USB_MIC).unwrap_err();
        assert!(matches!(err, AudioError::PlatformFailure { .. }));
        assert_eq!(controller.active_device().unwrap().id, SIM_DEFAULT_MIC);
        assert_eq!(controller.session_state(), SessionState::Running);
        assert_eq!(controller.preferences().last_device_id, None);
        assert_eq!(recorder.take().len(), 1);

        assert!(matches!(
            controller.select_device("no-such-device"),
            Err(AudioError::DeviceNotFound(_))
        ));
        assert_eq!(controller.active_device().unwrap().id, SIM_DEFAULT_MIC);
    }

    #[test]
    fn select_device_switches_and_remembers() {
        let (sim, mut controller, recorder) = controller();
        controller.start().unwrap();
        controller.select_device(SIM_USB_MIC).unwrap();

        assert_eq!(controller.active_device().unwrap().id, SIM_USB_MIC);
        assert!(!controller.follows_default());
        assert!(controller.preferences().prefers(SIM_USB_MIC));
        assert_eq!(sim.running_stream_count(), 1);
        assert_eq!(
            recorder.take(),
            vec![
                format!("started {}", SIM_DEFAULT_MIC),
                format!("stopped {}", SIM_DEFAULT_MIC),
                format!("started {}", SIM_USB_MIC),
            ]
        );
    }

    #[test]
    fn stale_queued_removal_keeps_reopened_session() {
        let (sim, mut controller, recorder) = controller();
        controller.start().unwrap();

        sim.set_state(SIM_USB_MIC, DeviceState::Disabled);
        sim.set_state(SIM_USB_MIC, DeviceState::Active);
        controller.select_device(SIM_USB_MIC).unwrap();
        recorder.take();

        // The Disabled/Active pair is still queued for a device that is back.
        assert_eq!(controller.pump_events(), 2);
        assert_eq!(recorder.take(), Vec::<String>::new());
        assert_eq!(controller.active_device().unwrap().id, SIM_USB_MIC);
        assert_eq!(controller.session_state(), SessionState::Running);
        assert_eq!(sim.running_stream_count(), 1);
    }

    #[test]
    fn pinning_active_default_keeps_session() {
        let (sim, mut controller, recorder) = controller();
        controller.start().unwrap();
        recorder.take();

        controller.select_device(SIM_DEFAULT_MIC).unwrap();
        assert!(!controller.follows_default());
        assert!(controller.preferences().prefers(SIM_DEFAULT_MIC));
        assert_eq!(sim.open_stream_count(), 1);

        controller.select_default().unwrap();
        assert!(controller.follows_default());
        assert_eq!(controller.preferences().last_device_id, None);
        assert_eq!(sim.open_stream_count(), 1);
        assert_eq!(controller.session_state(), SessionState::Running);
        assert_eq!(recorder.take(), Vec::<String>::new());
    }

    #[test]
    fn removal_tears_down_and_preferred_device_reconnects() {
        let (sim, mut controller, recorder) = controller();
        controller.select_device(SIM_USB_MIC).unwrap();
        recorder.take();

        sim.set_state(SIM_USB_MIC, DeviceState::Unplugged);
        controller.pump_events();
        assert_eq!(controller.active_device(), None);
        assert_eq!(controller.session_state(), SessionState::Closed);
        assert_eq!(recorder.take(), vec![format!("lost {}", SIM_USB_MIC)]);

        sim.set_state(SIM_USB_MIC, DeviceState::Active);
        controller.pump_events();
        assert_eq!(controller.active_device().unwrap().id, SIM_USB_MIC);
        assert_eq!(recorder.take(), vec![format!("started {}", SIM_USB_MIC)]);
    }

    #[test]
    fn following_default_moves_with_default_change() {
        let (sim, mut controller, recorder) = controller();
        controller.start().unwrap();
        recorder.take();

        sim.remove_device(SIM_DEFAULT_MIC);
        controller.pump_events();
        assert_eq!(controller.active_device().unwrap().id, SIM_USB_MIC);
        assert!(controller.follows_default());
        assert_eq!(
            recorder.take(),
            vec![format!("lost {}", SIM_DEFAULT_MIC), format!("started {}", SIM_USB_MIC)]
        );
    }

    #[test]
    fn stop_is_idempotent_and_blocks_reconnect() {
        let (sim, mut controller, recorder) = controller();
        controller.select_device(SIM_USB_MIC).unwrap();
        controller.stop();
        controller.stop();
        assert_eq!(controller.session_state(), SessionState::Closed);
        assert_eq!(sim.open_stream_count(), 0);

        sim.set_state(SIM_USB_MIC, DeviceState::Disabled);
        sim.set_state(SIM_USB_MIC, DeviceState::Active);
        controller.pump_events();
        assert_eq!(controller.active_device(), None);
        assert_eq!(
            recorder.take(),
            vec![format!("started {}", SIM_USB_MIC), format!("stopped {}", SIM_USB_MIC)]
        );
    }
}
