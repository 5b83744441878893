use std::sync::Arc;
use std::time::Duration;

use crate::models::endpoint::{DataFlow, DeviceRole, EndpointDescriptor, StateMask};
use crate::models::error::AudioError;
use crate::models::format::{ShareMode, StreamFormat};
use crate::traits::notification_sink::NotificationSink;
use crate::traits::stream_backend::StreamBackend;

/// Token identifying one registered notification sink.
pub type NotificationToken = u64;

/// Parameters for opening a stream on an endpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamParams {
    pub flow: DataFlow,
    pub format: StreamFormat,
    pub share_mode: ShareMode,
    /// Requested device buffer duration.
    pub buffer_duration: Duration,
    /// Device period. Exclusive mode requires it to equal the buffer duration;
    /// shared mode ignores it.
    pub periodicity: Duration,
}

/// Result of asking the device whether it accepts a format.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FormatSupport {
    Supported,
    /// Not supported as requested; the device proposes this alternative.
    ClosestMatch(StreamFormat),
    Unsupported,
}

/// Platform device API: the fixed capability surface the endpoint layer consumes.
///
/// Implemented by:
/// - `WasapiDeviceApi` (Windows, `audio-endpoint-windows`)
/// - `SimulatedDeviceApi` (tests and non-Windows development)
///
/// Identities are opaque platform strings. Methods may be called from any thread.
pub trait DeviceApi: Send + Sync {
    /// Endpoints of `flow` whose state is in `mask`, in platform order.
    fn enumerate(&self, flow: DataFlow, mask: StateMask) -> Result<Vec<EndpointDescriptor>, AudioError>;

    /// Identity of the default endpoint for `flow` and `role`, if there is one.
    fn default_endpoint(&self, flow: DataFlow, role: DeviceRole) -> Result<Option<String>, AudioError>;

    /// Current descriptor of `id` in any state, `None` if the platform no longer knows it.
    fn describe(&self, id: &str) -> Result<Option<EndpointDescriptor>, AudioError>;

    /// Make `id` the default endpoint for `role`.
    fn set_default_endpoint(&self, id: &str, role: DeviceRole) -> Result<(), AudioError>;

    /// Format the shared-mode engine mixes in for `id`.
    fn mix_format(&self, id: &str) -> Result<StreamFormat, AudioError>;

    /// Whether `id` accepts `format` in `share_mode`.
    fn check_format(
        &self,
        id: &str,
        share_mode: ShareMode,
        format: &StreamFormat,
    ) -> Result<FormatSupport, AudioError>;

    /// Open (initialize, not start) a stream on `id`.
    fn open_stream(&self, id: &str, params: &StreamParams) -> Result<Box<dyn StreamBackend>, AudioError>;

    /// Start delivering device notifications to `sink`.
    fn register_notifications(&self, sink: Arc<dyn NotificationSink>) -> Result<NotificationToken, AudioError>;

    /// Stop delivering notifications for `token`. Unknown tokens are ignored.
    fn unregister_notifications(&self, token: NotificationToken) -> Result<(), AudioError>;
}
