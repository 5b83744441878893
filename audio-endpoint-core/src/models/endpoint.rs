use std::fmt;

use serde::{Deserialize, Serialize};

/// Data-flow direction of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFlow {
    /// Capture endpoints (microphones, line-in).
    Input,
    /// Render endpoints (speakers, headphones).
    Output,
}

/// Default-use category of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u32)]
pub enum DeviceRole {
    /// Games, system sounds, voice commands.
    Console = 0,
    /// Music and video playback.
    Multimedia = 1,
    /// VoIP and chat applications.
    Communications = 2,
}

impl DeviceRole {
    pub const ALL: [DeviceRole; 3] = [Self::Console, Self::Multimedia, Self::Communications];
}

/// Connectivity state of an endpoint. Discriminants match the platform bit values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u32)]
pub enum DeviceState {
    Active = 0x1,
    Disabled = 0x2,
    NotPresent = 0x4,
    Unplugged = 0x8,
}

impl DeviceState {
    pub fn bits(self) -> u32 {
        self as u32
    }

    /// Decode a single platform state bit. Unknown values map to `NotPresent`.
    pub fn from_bits(bits: u32) -> Self {
        match bits {
            0x1 => Self::Active,
            0x2 => Self::Disabled,
            0x8 => Self::Unplugged,
            _ => Self::NotPresent,
        }
    }

    pub fn is_active(self) -> bool {
        self == Self::Active
    }
}

/// Set of device states used to filter enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateMask(u32);

impl StateMask {
    pub const ACTIVE: StateMask = StateMask(0x1);
    pub const DISABLED: StateMask = StateMask(0x2);
    pub const NOT_PRESENT: StateMask = StateMask(0x4);
    pub const UNPLUGGED: StateMask = StateMask(0x8);
    pub const ALL: StateMask = StateMask(0xF);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, state: DeviceState) -> bool {
        self.0 & state.bits() != 0
    }

    pub const fn union(self, other: StateMask) -> Self {
        Self(self.0 | other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl From<DeviceState> for StateMask {
    fn from(state: DeviceState) -> Self {
        Self(state.bits())
    }
}

impl std::ops::BitOr for StateMask {
    type Output = StateMask;

    fn bitor(self, rhs: StateMask) -> StateMask {
        self.union(rhs)
    }
}

/// Immutable snapshot of one endpoint, re-created on every enumeration or notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    /// Opaque, stable platform identity.
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    pub flow: DataFlow,
    pub state: DeviceState,
}

impl EndpointDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, flow: DataFlow, state: DeviceState) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            flow,
            state,
        }
    }

    /// Copy of this descriptor with a different state.
    pub fn with_state(&self, state: DeviceState) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }
}

impl fmt::Display for EndpointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_filters_states() {
        let mask = StateMask::ACTIVE | StateMask::UNPLUGGED;
        assert!(mask.contains(DeviceState::Active));
        assert!(mask.contains(DeviceState::Unplugged));
        assert!(!mask.contains(DeviceState::Disabled));
        assert!(!mask.contains(DeviceState::NotPresent));
        assert_eq!(StateMask::from_bits(0xFF), StateMask::ALL);
    }

    #[test]
    fn state_bits_round_trip_platform_values() {
        for state in [
            DeviceState::Active,
            DeviceState::Disabled,
            DeviceState::NotPresent,
            DeviceState::Unplugged,
        ] {
            assert_eq!(DeviceState::from_bits(state.bits()), state);
        }
        assert_eq!(DeviceState::from_bits(0x40), DeviceState::NotPresent);
    }

    #[test]
    fn with_state_keeps_identity() {
        let mic = EndpointDescriptor::new("{mic}", "USB Mic", DataFlow::Input, DeviceState::Active);
        let unplugged = mic.with_state(DeviceState::Unplugged);
        assert_eq!(unplugged.id, mic.id);
        assert_eq!(unplugged.state, DeviceState::Unplugged);
        assert_eq!(mic.state, DeviceState::Active);
    }
}
