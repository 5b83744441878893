use crate::models::endpoint::EndpointDescriptor;
use crate::models::error::AudioError;
use crate::models::format::StreamFormat;

/// Event delegate for session controller notifications.
///
/// All methods are called from whichever thread drives the controller
/// (`select_device`, `stop`, `pump_events`), never from the notification or
/// capture threads.
pub trait ControllerDelegate: Send + Sync {
    /// Capture is running on `device` with the negotiated `format`.
    fn on_capture_started(&self, device: &EndpointDescriptor, format: &StreamFormat);

    /// Capture on `device` was stopped on request.
    fn on_capture_stopped(&self, device: &EndpointDescriptor);

    /// The active device disappeared or was disabled; capture was torn down.
    fn on_device_lost(&self, device: &EndpointDescriptor);

    /// A selection attempt failed; the previous capture (if any) is untouched.
    fn on_capture_failed(&self, error: &AudioError);
}
