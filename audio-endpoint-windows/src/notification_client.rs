//! `IMMNotificationClient` bridge.
//!
//! The endpoint enumerator calls back on its own threads; every callback converts
//! the platform arguments and forwards them to the registered `NotificationSink`.

use std::sync::Arc;

use windows::core::{implement, PCWSTR};
use windows::Win32::Foundation::PROPERTYKEY;
use windows::Win32::Media::Audio::{
    eCapture, eCommunications, eConsole, eMultimedia, eRender, EDataFlow, ERole,
    IMMNotificationClient, IMMNotificationClient_Impl, DEVICE_STATE,
};

use audio_endpoint_core::{DataFlow, DeviceRole, DeviceState, NotificationSink, PropertyKey};

/// COM object that forwards endpoint notifications to a sink.
#[implement(IMMNotificationClient)]
pub struct NotificationClient {
    sink: Arc<dyn NotificationSink>,
}

impl NotificationClient {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    /// COM interface pointer owning this client.
    pub fn into_interface(self) -> IMMNotificationClient {
        self.into()
    }
}

pub(crate) fn flow_from_platform(flow: EDataFlow) -> Option<DataFlow> {
    if flow == eCapture {
        Some(DataFlow::Input)
    } else if flow == eRender {
        Some(DataFlow::Output)
    } else {
        None
    }
}

pub(crate) fn flow_to_platform(flow: DataFlow) -> EDataFlow {
    match flow {
        DataFlow::Input => eCapture,
        DataFlow::Output => eRender,
    }
}

pub(crate) fn role_to_platform(role: DeviceRole) -> ERole {
    match role {
        DeviceRole::Console => eConsole,
        DeviceRole::Multimedia => eMultimedia,
        DeviceRole::Communications => eCommunications,
    }
}

fn role_from_platform(role: ERole) -> Option<DeviceRole> {
    if role == eConsole {
        Some(DeviceRole::Console)
    } else if role == eMultimedia {
        Some(DeviceRole::Multimedia)
    } else if role == eCommunications {
        Some(DeviceRole::Communications)
    } else {
        None
    }
}

fn id_string(id: &PCWSTR) -> Option<String> {
    if id.is_null() {
        return None;
    }
    unsafe { id.to_string().ok() }
}

impl IMMNotificationClient_Impl for NotificationClient_Impl {
    fn OnDeviceStateChanged(&self, pwstrdeviceid: &PCWSTR, dwnewstate: DEVICE_STATE) -> windows::core::Result<()> {
        if let Some(id) = id_string(pwstrdeviceid) {
            self.sink
                .on_device_state_changed(&id, DeviceState::from_bits(dwnewstate.0));
        }
        Ok(())
    }

    fn OnDeviceAdded(&self, pwstrdeviceid: &PCWSTR) -> windows::core::Result<()> {
        if let Some(id) = id_string(pwstrdeviceid) {
            self.sink.on_device_added(&id);
        }
        Ok(())
    }

    fn OnDeviceRemoved(&self, pwstrdeviceid: &PCWSTR) -> windows::core::Result<()> {
        if let Some(id) = id_string(pwstrdeviceid) {
            self.sink.on_device_removed(&id);
        }
        Ok(())
    }

    fn OnDefaultDeviceChanged(
        &self,
        flow: EDataFlow,
        role: ERole,
        pwstrdefaultdeviceid: &PCWSTR,
    ) -> windows::core::Result<()> {
        let (Some(flow), Some(role)) = (flow_from_platform(flow), role_from_platform(role)) else {
            return Ok(());
        };
        let id = id_string(pwstrdefaultdeviceid);
        self.sink.on_default_device_changed(flow, role, id.as_deref());
        Ok(())
    }

    fn OnPropertyValueChanged(&self, pwstrdeviceid: &PCWSTR, key: &PROPERTYKEY) -> windows::core::Result<()> {
        if let Some(id) = id_string(pwstrdeviceid) {
            self.sink
                .on_property_value_changed(&id, PropertyKey::new(key.fmtid.to_u128(), key.pid));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_and_role_conversions() {
        assert_eq!(flow_from_platform(flow_to_platform(DataFlow::Input)), Some(DataFlow::Input));
        assert_eq!(flow_from_platform(flow_to_platform(DataFlow::Output)), Some(DataFlow::Output));
        for role in DeviceRole::ALL {
            assert_eq!(role_from_platform(role_to_platform(role)), Some(role));
        }
    }
}
