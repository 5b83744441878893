//! Default endpoint assignment.
//!
//! Windows has no public API for changing the default endpoint; the shell's
//! `IPolicyConfig` interface is undocumented but stable since Windows 7.

use windows::core::{interface, IUnknown, IUnknown_Vtbl, GUID, HRESULT, PCWSTR};
use windows::Win32::System::Com::{CoCreateInstance, CLSCTX_ALL};

use audio_endpoint_core::{AudioError, DeviceRole};

use crate::com::{map_error, map_hresult, pcwstr, wide};

#[interface("F8679F50-850A-41CF-9C72-430F290290C8")]
unsafe trait IPolicyConfig: IUnknown {
    // Placeholders keep SetDefaultEndpoint at its vtable slot.
    fn reserved1(&self) -> HRESULT;
    fn reserved2(&self) -> HRESULT;
    fn reserved3(&self) -> HRESULT;
    fn reserved4(&self) -> HRESULT;
    fn reserved5(&self) -> HRESULT;
    fn reserved6(&self) -> HRESULT;
    fn reserved7(&self) -> HRESULT;
    fn reserved8(&self) -> HRESULT;
    fn reserved9(&self) -> HRESULT;
    fn reserved10(&self) -> HRESULT;

    fn SetDefaultEndpoint(&self, device_id: PCWSTR, role: u32) -> HRESULT;
}

const CLSID_POLICY_CONFIG_CLIENT: GUID = GUID::from_u128(0x870af99c_171d_4f9e_af0d_e63df40c2bc9);

/// Make `device_id` the default endpoint for `role`.
pub fn set_default_endpoint(device_id: &str, role: DeviceRole) -> Result<(), AudioError> {
    let id = wide(device_id);
    unsafe {
        let policy: IPolicyConfig = CoCreateInstance(&CLSID_POLICY_CONFIG_CLIENT, None, CLSCTX_ALL)
            .map_err(|e| map_error("CoCreateInstance(PolicyConfig)", &e))?;
        let hr = policy.SetDefaultEndpoint(pcwstr(&id), role as u32);
        if hr.is_err() {
            return Err(map_hresult("IPolicyConfig::SetDefaultEndpoint", hr));
        }
    }
    log::info!("default {:?} endpoint set to {}", role, device_id);
    Ok(())
}
