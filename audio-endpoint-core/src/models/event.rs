use std::fmt;

use super::endpoint::{DataFlow, DeviceRole, DeviceState, EndpointDescriptor};
use super::property::PropertyKey;

/// Typed device notification, re-dispatched from the platform notification thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Connectivity state changed (active, disabled, not present, unplugged).
    DeviceStateChanged {
        id: String,
        old_state: DeviceState,
        new_state: DeviceState,
    },

    /// A new endpoint appeared.
    DeviceAdded(EndpointDescriptor),

    /// An endpoint disappeared.
    DeviceRemoved { id: String },

    /// The default endpoint for a direction and role changed. `None` when no default remains.
    DefaultDeviceChanged {
        flow: DataFlow,
        role: DeviceRole,
        new_id: Option<String>,
    },

    /// A property of an endpoint changed.
    PropertyValueChanged { id: String, key: PropertyKey },
}

/// Discriminant of `DeviceEvent`, used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    DeviceStateChanged,
    DeviceAdded,
    DeviceRemoved,
    DefaultDeviceChanged,
    PropertyValueChanged,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        Self::DeviceStateChanged,
        Self::DeviceAdded,
        Self::DeviceRemoved,
        Self::DefaultDeviceChanged,
        Self::PropertyValueChanged,
    ];
}

impl DeviceEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::DeviceStateChanged { .. } => EventKind::DeviceStateChanged,
            Self::DeviceAdded(_) => EventKind::DeviceAdded,
            Self::DeviceRemoved { .. } => EventKind::DeviceRemoved,
            Self::DefaultDeviceChanged { .. } => EventKind::DefaultDeviceChanged,
            Self::PropertyValueChanged { .. } => EventKind::PropertyValueChanged,
        }
    }

    /// The endpoint this event is about, if any.
    pub fn device_id(&self) -> Option<&str> {
        match self {
            Self::DeviceStateChanged { id, .. }
            | Self::DeviceRemoved { id }
            | Self::PropertyValueChanged { id, .. } => Some(id),
            Self::DeviceAdded(descriptor) => Some(&descriptor.id),
            Self::DefaultDeviceChanged { new_id, .. } => new_id.as_deref(),
        }
    }

    /// True when this event means `id` can no longer be used.
    pub fn invalidates(&self, id: &str) -> bool {
        match self {
            Self::DeviceRemoved { id: removed } => removed == id,
            Self::DeviceStateChanged { id: changed, new_state, .. } => {
                changed == id && !new_state.is_active()
            }
            _ => false,
        }
    }

    /// True when this event means `id` has (re)appeared as usable.
    pub fn revives(&self, id: &str) -> bool {
        match self {
            Self::DeviceAdded(descriptor) => descriptor.id == id && descriptor.state.is_active(),
            Self::DeviceStateChanged { id: changed, new_state, .. } => {
                changed == id && new_state.is_active()
            }
            _ => false,
        }
    }
}

impl fmt::Display for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceStateChanged { id, old_state, new_state } => {
                write!(f, "state of {} changed {:?} -> {:?}", id, old_state, new_state)
            }
            Self::DeviceAdded(descriptor) => write!(f, "added {}", descriptor),
            Self::DeviceRemoved { id } => write!(f, "removed {}", id),
            Self::DefaultDeviceChanged { flow, role, new_id } => write!(
                f,
                "default {:?}/{:?} is now {}",
                flow,
                role,
                new_id.as_deref().unwrap_or("<none>")
            ),
            Self::PropertyValueChanged { id, key } => {
                write!(f, "property {} of {} changed", key.name().unwrap_or("unknown"), id)
            }
        }
    }
}
