use crate::models::endpoint::{DataFlow, DeviceRole, DeviceState};
use crate::models::property::PropertyKey;

/// Raw device notification callbacks.
///
/// Called by the platform on a thread the application does not control, possibly
/// concurrently with registry or session teardown. Implementations must return
/// quickly and must not fail: there is no error path back into the platform.
pub trait NotificationSink: Send + Sync {
    fn on_device_state_changed(&self, id: &str, new_state: DeviceState);

    fn on_device_added(&self, id: &str);

    fn on_device_removed(&self, id: &str);

    fn on_default_device_changed(&self, flow: DataFlow, role: DeviceRole, id: Option<&str>);

    fn on_property_value_changed(&self, id: &str, key: PropertyKey);
}
