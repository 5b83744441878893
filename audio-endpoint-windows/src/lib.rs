//! # audio-endpoint-windows
//!
//! Windows WASAPI / MMDevice backend for audio-endpoint-core.
//!
//! Provides:
//! - `WasapiDeviceApi`: `DeviceApi` over `IMMDeviceEnumerator` and `IAudioClient`
//! - `WasapiStream`: `StreamBackend` over `IAudioCaptureClient` / `IAudioRenderClient`
//! - `NotificationClient`: `IMMNotificationClient` forwarding to a `NotificationSink`
//! - `policy`: default endpoint assignment through `IPolicyConfig`
//! - `ComGuard`: per-thread COM initialization
//!
//! ## Threading
//! Create a `ComGuard` (MTA) on the thread that builds the `WasapiDeviceApi` and keep
//! it alive for as long as the API is in use. Worker threads that poll streams run in
//! the implicit MTA and need no initialization of their own.
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use audio_endpoint_core::{AudioContext, SessionConfiguration, SessionController};
//! use audio_endpoint_windows::{ComGuard, WasapiDeviceApi};
//!
//! let _com = ComGuard::init_mta()?;
//! let context = AudioContext::new(Arc::new(WasapiDeviceApi::new()?))?;
//! let mut controller = SessionController::new(context, SessionConfiguration::default())?;
//! controller.start()?;
//! ```

#[cfg(target_os = "windows")]
pub mod com;
#[cfg(target_os = "windows")]
pub mod device_api;
#[cfg(target_os = "windows")]
pub mod notification_client;
#[cfg(target_os = "windows")]
pub mod policy;
#[cfg(target_os = "windows")]
pub mod stream;

#[cfg(target_os = "windows")]
pub use com::ComGuard;
#[cfg(target_os = "windows")]
pub use device_api::WasapiDeviceApi;
#[cfg(target_os = "windows")]
pub use notification_client::NotificationClient;
#[cfg(target_os = "windows")]
pub use stream::WasapiStream;
