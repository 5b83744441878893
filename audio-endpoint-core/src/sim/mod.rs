//! In-process device API used by the tests and for development off Windows.
//!
//! `SimulatedDeviceApi` keeps a device table, per-role defaults, and the
//! formats each device accepts. Mutations (`add_device`, `remove_device`,
//! `set_state`, ...) update the table and then fire the registered
//! notification sinks from the calling thread, like the platform would from
//! its own.
//!
//! Streams produce a sine test tone. With `SimClock::Manual` audio only moves
//! when the caller invokes `tick()` / `advance()`; with `SimClock::Realtime`
//! streams catch up with the wall clock whenever they are polled.

mod device_api;
mod stream;

pub use device_api::{SimClock, SimDevice, SimulatedDeviceApi, SIM_DEVICE_PERIOD};

/// Built-in microphone; default capture device for every role.
pub const SIM_DEFAULT_MIC: &str = "sim-mic-builtin";
/// USB headset microphone, stereo float mix format.
pub const SIM_USB_MIC: &str = "sim-mic-usb";
/// Speakers; default render device for every role.
pub const SIM_SPEAKERS: &str = "sim-speakers";
