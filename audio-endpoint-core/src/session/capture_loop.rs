//! Capture-processing context: drains the capture session once per period.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::exchange::result_exchange::ResultExchange;
use crate::models::buffer_flags::BufferFlags;
use crate::models::error::AudioError;
use crate::models::snapshot::AnalysisSnapshot;
use crate::processing::ring_buffer::RingBuffer;
use crate::models::state::SessionState;
use crate::session::stream::StreamSession;
use crate::traits::analyzer::{AnalysisResult, Analyzer};

/// What one period of work achieved.
#[derive(Debug, Clone, PartialEq)]
pub enum PeriodOutcome {
    /// Packets were drained and one snapshot was published.
    Processed { packets: usize, frames: u64 },
    /// Nothing was ready; try again next period.
    Idle,
    /// A stop was requested or the session is already closed.
    Stopped,
    /// The device went away; the session has been closed.
    DeviceLost,
    Failed(AudioError),
}

/// Why the capture thread is (or is not) still running.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopStatus {
    Running,
    Stopped,
    DeviceLost,
    Failed(AudioError),
}

impl LoopStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Per-period capture work, independent of any thread.
pub struct CaptureWorker {
    session: Arc<Mutex<StreamSession>>,
    exchange: Arc<ResultExchange>,
    analyzer: Box<dyn Analyzer>,
    window: RingBuffer,
    scratch: Vec<f32>,
    sample_rate: u32,
    sequence: u64,
    frames_analyzed: u64,
    stop: Arc<AtomicBool>,
}

impl CaptureWorker {
    pub fn new(
        session: Arc<Mutex<StreamSession>>,
        exchange: Arc<ResultExchange>,
        analyzer: Box<dyn Analyzer>,
        window_len: usize,
    ) -> Self {
        let sample_rate = session.lock().format().sample_rate;
        // Continue the sequence so readers stay monotonic across sessions.
        let sequence = exchange.latest_sequence();
        Self {
            session,
            exchange,
            analyzer,
            window: RingBuffer::new(window_len),
            scratch: Vec::with_capacity(window_len),
            sample_rate,
            sequence,
            frames_analyzed: 0,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked at the start of every period.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Run one period: drain every ready packet, then publish one snapshot.
    ///
    /// The session lock is held until every lease taken this period has been
    /// released, so a concurrent `stop`/`close` lands between periods.
    pub fn run_period(&mut self) -> PeriodOutcome {
        let mut packets = 0usize;
        let mut frames = 0u64;
        let mut flags = BufferFlags::NONE;
        let mut all_silent = true;

        {
            let mut session = self.session.lock();
            if self.stop.load(Ordering::SeqCst) || session.state().is_closed() {
                return PeriodOutcome::Stopped;
            }
            if !session.handle().is_live() {
                log::warn!("Capture device {} is gone; closing session", session.handle());
                session.close();
                return PeriodOutcome::DeviceLost;
            }

            loop {
                let (n, packet_flags, decoded) = match session.acquire_capture() {
                    Ok(lease) => (lease.frames, lease.flags, lease.mono_samples()),
                    Err(AudioError::BufferEmpty) => break,
                    Err(e) => return Self::fail(&mut session, e),
                };

                if let Err(e) = session.release_capture(n) {
                    return Self::fail(&mut session, e);
                }
                let mono = match decoded {
                    Ok(mono) => mono,
                    Err(e) => return Self::fail(&mut session, e),
                };

                if packet_flags.data_discontinuity {
                    log::debug!("Discontinuity in capture stream; restarting analysis window");
                    self.window.reset();
                    self.analyzer.reset();
                }
                if packet_flags.silent {
                    self.window.write(&vec![0.0; mono.len()]);
                } else {
                    self.window.write(&mono);
                    all_silent = false;
                }

                packets += 1;
                frames += n as u64;
                flags = flags.merge(packet_flags);
            }
        }

        if packets == 0 {
            return PeriodOutcome::Idle;
        }

        self.frames_analyzed += frames;
        self.window.copy_latest(self.window.capacity(), &mut self.scratch);
        let result = if all_silent {
            AnalysisResult::default()
        } else {
            self.analyzer.analyze(&self.scratch, self.sample_rate, flags)
        };

        self.sequence += 1;
        self.exchange.publish(AnalysisSnapshot {
            sequence: self.sequence,
            pitch_hz: result.pitch_hz,
            clarity: result.clarity,
            rms: result.rms,
            peak: result.peak,
            flags,
            frames_analyzed: self.frames_analyzed,
            waveform: self.scratch.clone(),
        });
        log::trace!("Period processed {} packet(s), {} frames", packets, frames);

        PeriodOutcome::Processed { packets, frames }
    }

    fn fail(session: &mut StreamSession, error: AudioError) -> PeriodOutcome {
        if error.is_device_lost() {
            log::warn!("Capture device {} lost mid-period: {}", session.handle(), error);
            session.close();
            PeriodOutcome::DeviceLost
        } else {
            log::error!("Capture on {} failed: {}", session.handle(), error);
            PeriodOutcome::Failed(error)
        }
    }
}

/// Capture worker running on its own thread at the configured period.
pub struct CaptureLoop {
    session: Option<Arc<Mutex<StreamSession>>>,
    stop: Arc<AtomicBool>,
    status: Arc<Mutex<LoopStatus>>,
    periods: Arc<AtomicU64>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CaptureLoop {
    /// Run `session` (already started) on a named capture thread.
    pub fn spawn(
        session: StreamSession,
        exchange: Arc<ResultExchange>,
        analyzer: Box<dyn Analyzer>,
        window_len: usize,
        period: Duration,
    ) -> Result<Self, AudioError> {
        let session = Arc::new(Mutex::new(session));
        let mut worker = CaptureWorker::new(Arc::clone(&session), exchange, analyzer, window_len);
        let stop = worker.stop_flag();
        let status = Arc::new(Mutex::new(LoopStatus::Running));
        let periods = Arc::new(AtomicU64::new(0));

        let thread_status = Arc::clone(&status);
        let thread_periods = Arc::clone(&periods);
        let handle = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || loop {
                let outcome = worker.run_period();
                thread_periods.fetch_add(1, Ordering::Relaxed);
                let exit = match outcome {
                    PeriodOutcome::Processed { .. } | PeriodOutcome::Idle => None,
                    PeriodOutcome::Stopped => Some(LoopStatus::Stopped),
                    PeriodOutcome::DeviceLost => Some(LoopStatus::DeviceLost),
                    PeriodOutcome::Failed(e) => Some(LoopStatus::Failed(e)),
                };
                if let Some(exit) = exit {
                    log::debug!("Capture thread exiting: {:?}", exit);
                    *thread_status.lock() = exit;
                    break;
                }
                thread::sleep(period);
            })
            .map_err(|e| AudioError::platform("spawn capture thread", e.raw_os_error().unwrap_or(-1)))?;

        Ok(Self {
            session: Some(session),
            stop,
            status,
            periods,
            handle: Some(handle),
        })
    }

    pub fn status(&self) -> LoopStatus {
        self.status.lock().clone()
    }

    pub fn periods_run(&self) -> u64 {
        self.periods.load(Ordering::Relaxed)
    }

    /// Current state of the session; waits for an in-progress period.
    pub fn session_state(&self) -> Option<SessionState> {
        self.session.as_ref().map(|s| s.lock().state())
    }

    /// Stop the thread at the next period boundary and hand back the session,
    /// stopped (or closed if the device was lost).
    pub fn stop(mut self) -> Option<StreamSession> {
        self.join();
        let session = self.session.take()?;
        let mut session = match Arc::try_unwrap(session) {
            Ok(mutex) => mutex.into_inner(),
            Err(_) => {
                log::error!("Capture session still shared after the thread exited");
                return None;
            }
        };
        if session.state().is_running() {
            if let Err(e) = session.stop() {
                log::warn!("Stopping session {} failed: {}", session.id(), e);
            }
        }
        Some(session)
    }

    fn join(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Capture thread panicked");
                *self.status.lock() = LoopStatus::Failed(AudioError::InvalidState("capture thread panicked".into()));
            }
        }
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::notifications::NotificationChannel;
    use crate::device::registry::DeviceRegistry;
    use crate::models::format::{ShareMode, StreamFormat};
    use crate::processing::analyzer::LevelAnalyzer;
    use crate::sim::{SimClock, SimulatedDeviceApi, SIM_DEFAULT_MIC};
    use crate::traits::device_api::DeviceApi;
    use approx::assert_abs_diff_eq;
    use std::time::Instant;

    fn started_session(sim: &Arc<SimulatedDeviceApi>, registry: &DeviceRegistry) -> StreamSession {
        let handle = registry.open(SIM_DEFAULT_MIC).unwrap();
        let mut session = StreamSession::open(
            sim.as_ref(),
            handle,
            StreamFormat::pcm(48000, 16, 1),
            ShareMode::Shared,
            Duration::from_millis(100),
        )
        .unwrap();
        session.start().unwrap();
        session
    }

    fn setup() -> (Arc<SimulatedDeviceApi>, DeviceRegistry) {
        let sim = Arc::new(SimulatedDeviceApi::with_default_devices());
        let registry = DeviceRegistry::new(sim.clone());
        (sim, registry)
    }

    #[test]
    fn one_second_of_periods_is_fully_processed() {
        let (sim, registry) = setup();
        let session = Arc::new(Mutex::new(started_session(&sim, &registry)));
        let exchange = Arc::new(ResultExchange::new());
        let mut worker = CaptureWorker::new(session, Arc::clone(&exchange), Box::new(LevelAnalyzer::default()), 2048);

        assert_eq!(worker.run_period(), PeriodOutcome::Idle);
        let mut total = 0;
        for _ in 0..100 {
            sim.tick();
            match worker.run_period() {
                PeriodOutcome::Processed { frames, .. } => total += frames,
                other => panic!("unexpected outcome {:?}", other),
            }
        }
        assert_eq!(total, 48000);

        let snapshot = exchange.read_copy();
        assert_eq!(snapshot.sequence, 100);
        assert_eq!(snapshot.frames_analyzed, 48000);
        assert_eq!(snapshot.waveform.len(), 2048);
        assert_abs_diff_eq!(snapshot.pitch_hz.unwrap(), 440.0, epsilon = 3.0);
    }

    #[test]
    fn removed_device_closes_session_before_next_period() {
        let (sim, registry) = setup();
        let api: Arc<dyn DeviceApi> = sim.clone();
        let channel = Arc::new(NotificationChannel::new(&api));
        let _sub = registry.attach(&channel);
        let _token = api.register_notifications(channel.clone()).unwrap();

        let session = Arc::new(Mutex::new(started_session(&sim, &registry)));
        let mut worker = CaptureWorker::new(
            Arc::clone(&session),
            Arc::new(ResultExchange::new()),
            Box::new(LevelAnalyzer::default()),
            1024,
        );
        sim.tick();
        assert!(matches!(worker.run_period(), PeriodOutcome::Processed { .. }));

        sim.remove_device(SIM_DEFAULT_MIC);
        assert_eq!(worker.run_period(), PeriodOutcome::DeviceLost);
        assert_eq!(session.lock().state(), SessionState::Closed);
        assert_eq!(worker.run_period(), PeriodOutcome::Stopped);
    }

    #[test]
    fn discontinuity_restarts_window_and_silence_skips_analysis() {
        let (sim, registry) = setup();
        let session = Arc::new(Mutex::new(started_session(&sim, &registry)));
        let exchange = Arc::new(ResultExchange::new());
        let mut worker = CaptureWorker::new(session, Arc::clone(&exchange), Box::new(LevelAnalyzer::default()), 4096);

        sim.advance(Duration::from_millis(50));
        worker.run_period();
        assert_eq!(exchange.read_copy().waveform.len(), 2400);

        sim.flag_next_capture(SIM_DEFAULT_MIC, BufferFlags::from_bits(BufferFlags::DATA_DISCONTINUITY));
        sim.tick();
        worker.run_period();
        let snapshot = exchange.read_copy();
        assert!(snapshot.flags.data_discontinuity);
        assert_eq!(snapshot.waveform.len(), 480);

        sim.flag_next_capture(SIM_DEFAULT_MIC, BufferFlags::from_bits(BufferFlags::SILENT));
        sim.tick();
        worker.run_period();
        let snapshot = exchange.read_copy();
        assert!(snapshot.flags.silent);
        assert_eq!(snapshot.pitch_hz, None);
        assert_eq!(snapshot.rms, 0.0);
    }

    #[test]
    fn stop_flag_ends_worker() {
        let (sim, registry) = setup();
        let session = Arc::new(Mutex::new(started_session(&sim, &registry)));
        let mut worker = CaptureWorker::new(session, Arc::new(ResultExchange::new()), Box::new(LevelAnalyzer::default()), 256);
        worker.stop_flag().store(true, Ordering::SeqCst);
        sim.tick();
        assert_eq!(worker.run_period(), PeriodOutcome::Stopped);
    }

    #[test]
    fn threaded_loop_publishes_and_returns_stopped_session() {
        let sim = Arc::new(SimulatedDeviceApi::with_default_devices().with_clock(SimClock::Realtime));
        let registry = DeviceRegistry::new(sim.clone());
        let exchange = Arc::new(ResultExchange::new());
        let capture = CaptureLoop::spawn(
            started_session(&sim, &registry),
            Arc::clone(&exchange),
            Box::new(LevelAnalyzer::default()),
            2048,
            Duration::from_millis(5),
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while exchange.published_count() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(exchange.published_count() >= 3);
        assert!(capture.status().is_running());

        let session = capture.stop().unwrap();
        assert_eq!(session.state(), SessionState::Stopped);
    }
}
