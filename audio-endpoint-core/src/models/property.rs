//! Catalog of endpoint property keys.
//!
//! A property key is a (format id GUID, property id) pair. Only the keys the
//! endpoint layer reads or reports are catalogued here.

use std::fmt;

/// Identity of one endpoint property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropertyKey {
    pub fmtid: u128,
    pub pid: u32,
}

const FMTID_DEVICE: u128 = 0xa45c254e_df1c_4efd_8020_67d146a850e0;
const FMTID_DEVICE_INTERFACE: u128 = 0x026e516e_b814_414b_83cd_856d6fef4822;
const FMTID_AUDIO_ENDPOINT: u128 = 0x1da5d803_d492_4edd_8c23_e0c0ffee7f0e;
const FMTID_AUDIO_ENGINE_DEVICE: u128 = 0xf19f064d_082c_4e27_bc73_6882a1bb8e4c;
const FMTID_AUDIO_ENGINE_OEM: u128 = 0xe4870e26_3cc5_4cd2_ba46_ca0a9a70ed04;

impl PropertyKey {
    pub const DEVICE_DESCRIPTION: PropertyKey = PropertyKey::new(FMTID_DEVICE, 2);
    pub const DEVICE_FRIENDLY_NAME: PropertyKey = PropertyKey::new(FMTID_DEVICE, 14);
    pub const DEVICE_ENUMERATOR_NAME: PropertyKey = PropertyKey::new(FMTID_DEVICE, 24);
    pub const INTERFACE_FRIENDLY_NAME: PropertyKey = PropertyKey::new(FMTID_DEVICE_INTERFACE, 2);
    pub const ENDPOINT_FORM_FACTOR: PropertyKey = PropertyKey::new(FMTID_AUDIO_ENDPOINT, 0);
    pub const ENDPOINT_PHYSICAL_SPEAKERS: PropertyKey = PropertyKey::new(FMTID_AUDIO_ENDPOINT, 3);
    pub const ENDPOINT_GUID: PropertyKey = PropertyKey::new(FMTID_AUDIO_ENDPOINT, 4);
    pub const ENDPOINT_JACK_SUBTYPE: PropertyKey = PropertyKey::new(FMTID_AUDIO_ENDPOINT, 8);
    pub const ENGINE_DEVICE_FORMAT: PropertyKey = PropertyKey::new(FMTID_AUDIO_ENGINE_DEVICE, 0);
    pub const ENGINE_OEM_FORMAT: PropertyKey = PropertyKey::new(FMTID_AUDIO_ENGINE_OEM, 3);

    pub const fn new(fmtid: u128, pid: u32) -> Self {
        Self { fmtid, pid }
    }

    /// Every catalogued key with its human name, in a fixed order.
    pub const CATALOG: [(PropertyKey, &'static str); 10] = [
        (Self::DEVICE_DESCRIPTION, "Device_DeviceDesc"),
        (Self::DEVICE_FRIENDLY_NAME, "Device_FriendlyName"),
        (Self::DEVICE_ENUMERATOR_NAME, "Device_EnumeratorName"),
        (Self::INTERFACE_FRIENDLY_NAME, "DeviceInterface_FriendlyName"),
        (Self::ENDPOINT_FORM_FACTOR, "AudioEndpoint_FormFactor"),
        (Self::ENDPOINT_PHYSICAL_SPEAKERS, "AudioEndpoint_PhysicalSpeakers"),
        (Self::ENDPOINT_GUID, "AudioEndpoint_GUID"),
        (Self::ENDPOINT_JACK_SUBTYPE, "AudioEndpoint_JackSubType"),
        (Self::ENGINE_DEVICE_FORMAT, "AudioEngine_DeviceFormat"),
        (Self::ENGINE_OEM_FORMAT, "AudioEngine_OEMFormat"),
    ];

    /// Human name of a catalogued key.
    pub fn name(&self) -> Option<&'static str> {
        Self::CATALOG
            .iter()
            .find(|(key, _)| key == self)
            .map(|(_, name)| *name)
    }

    /// Reverse lookup. Accepts the name with or without the `PKEY_` prefix.
    pub fn from_name(name: &str) -> Option<PropertyKey> {
        let name = name.strip_prefix("PKEY_").unwrap_or(name);
        Self::CATALOG
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(key, _)| *key)
    }

    /// The all-zero key some drivers report when no specific property changed.
    pub fn is_empty(&self) -> bool {
        self.fmtid == 0 && self.pid == 0
    }

    /// Keys whose change can alter what the endpoint layer reports (name or format).
    pub fn affects_descriptor(&self) -> bool {
        *self == Self::DEVICE_FRIENDLY_NAME
            || *self == Self::DEVICE_DESCRIPTION
            || *self == Self::INTERFACE_FRIENDLY_NAME
            || *self == Self::ENGINE_DEVICE_FORMAT
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let g = self.fmtid;
        write!(
            f,
            "{{{:08x}-{:04x}-{:04x}-{:04x}-{:012x}}},{}",
            (g >> 96) as u32,
            (g >> 80) as u16,
            (g >> 64) as u16,
            (g >> 48) as u16,
            (g & 0xffff_ffff_ffff) as u64,
            self.pid
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_both_ways() {
        assert_eq!(PropertyKey::DEVICE_FRIENDLY_NAME.name(), Some("Device_FriendlyName"));
        assert_eq!(
            PropertyKey::from_name("PKEY_AudioEndpoint_FormFactor"),
            Some(PropertyKey::ENDPOINT_FORM_FACTOR)
        );
        assert_eq!(
            PropertyKey::from_name("audioendpoint_physicalspeakers"),
            Some(PropertyKey::ENDPOINT_PHYSICAL_SPEAKERS)
        );
        assert_eq!(PropertyKey::from_name("Nope"), None);
        assert_eq!(PropertyKey::new(FMTID_DEVICE, 999).name(), None);
        assert!(PropertyKey::new(0, 0).is_empty());
        assert!(!PropertyKey::new(0, 2).is_empty());
    }

    #[test]
    fn catalog_names_are_unique() {
        for (i, (key, name)) in PropertyKey::CATALOG.iter().enumerate() {
            assert_eq!(PropertyKey::from_name(name), Some(*key), "entry {}", i);
        }
    }

    #[test]
    fn display_matches_registry_notation() {
        assert_eq!(
            PropertyKey::DEVICE_FRIENDLY_NAME.to_string(),
            "{a45c254e-df1c-4efd-8020-67d146a850e0},14"
        );
    }
}
