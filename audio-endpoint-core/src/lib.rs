//! # audio-endpoint-core
//!
//! Platform-agnostic audio endpoint lifecycle and buffer exchange.
//!
//! Enumerates capture/render endpoints, hands out reference-counted endpoint
//! handles, bridges platform device notifications into typed events, runs
//! shared/exclusive stream sessions with a strict acquire/release buffer
//! protocol, and publishes per-period analysis snapshots through a
//! single-slot result exchange. Platform backends (Windows WASAPI in
//! `audio-endpoint-windows`, the in-process simulator in `sim`) implement the
//! `DeviceApi` / `StreamBackend` traits.
//!
//! ## Architecture
//!
//! ```text
//! audio-endpoint-core (this crate)
//! ├── traits/       ← DeviceApi, StreamBackend, NotificationSink, Analyzer, ControllerDelegate
//! ├── models/       ← AudioError, EndpointDescriptor, StreamFormat, DeviceEvent, SessionState, etc.
//! ├── device/       ← EndpointHandle, DeviceRegistry, NotificationChannel, AudioContext
//! ├── session/      ← StreamSession, CaptureWorker/CaptureLoop, SessionController
//! ├── exchange/     ← ResultExchange
//! ├── processing/   ← sample conversion, RingBuffer, LevelAnalyzer
//! ├── storage/      ← Preferences
//! └── sim/          ← SimulatedDeviceApi
//! ```
//!
//! ## Threads
//!
//! ```text
//! [platform notifications] → NotificationChannel ─┬→ DeviceRegistry (invalidate handles)
//!                                                 └→ queue → SessionController::pump_events
//! [audio-capture thread]   → StreamSession → Analyzer → ResultExchange::publish
//! [consumer tick loop]     → ResultExchange::read_copy
//! ```

pub mod device;
pub mod exchange;
pub mod models;
pub mod processing;
pub mod session;
pub mod sim;
pub mod storage;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use device::context::AudioContext;
pub use device::handle::EndpointHandle;
pub use device::notifications::{NotificationChannel, Subscription};
pub use device::registry::DeviceRegistry;
pub use exchange::result_exchange::ResultExchange;
pub use models::buffer_flags::BufferFlags;
pub use models::config::SessionConfiguration;
pub use models::endpoint::{DataFlow, DeviceRole, DeviceState, EndpointDescriptor, StateMask};
pub use models::error::AudioError;
pub use models::event::{DeviceEvent, EventKind};
pub use models::format::{SampleType, ShareMode, StreamFormat};
pub use models::property::PropertyKey;
pub use models::snapshot::AnalysisSnapshot;
pub use models::state::SessionState;
pub use processing::analyzer::LevelAnalyzer;
pub use processing::ring_buffer::RingBuffer;
pub use session::capture_loop::{CaptureLoop, CaptureWorker, LoopStatus, PeriodOutcome};
pub use session::controller::{AnalyzerFactory, SessionController};
pub use session::stream::{CaptureLease, RenderLease, StreamSession};
pub use storage::preferences::Preferences;
pub use traits::analyzer::{AnalysisResult, Analyzer};
pub use traits::controller_delegate::ControllerDelegate;
pub use traits::device_api::{DeviceApi, FormatSupport, NotificationToken, StreamParams};
pub use traits::notification_sink::NotificationSink;
pub use traits::stream_backend::{RawCapture, StreamBackend};
