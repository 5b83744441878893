//! Device registry: enumeration, default resolution, and handle bookkeeping.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::device::handle::{EndpointHandle, HandleInner};
use crate::device::notifications::{NotificationChannel, Subscription};
use crate::models::endpoint::{DataFlow, DeviceRole, EndpointDescriptor, StateMask};
use crate::models::error::AudioError;
use crate::models::event::{DeviceEvent, EventKind};
use crate::traits::device_api::DeviceApi;

/// States the registry keeps in its known-endpoint list.
const KNOWN_STATES: StateMask = StateMask::ACTIVE
    .union(StateMask::DISABLED)
    .union(StateMask::UNPLUGGED);

struct RegistryShared {
    api: Arc<dyn DeviceApi>,
    /// One binding per device id; a removed device's binding is invalidated and dropped.
    handles: Mutex<HashMap<String, Weak<HandleInner>>>,
    /// Ordered list of currently known endpoints (inputs first, then outputs).
    known: Mutex<Vec<EndpointDescriptor>>,
}

impl RegistryShared {
    fn invalidate(&self, id: &str) {
        let weak = self.handles.lock().remove(id);
        if let Some(inner) = weak.and_then(|w| w.upgrade()) {
            if inner.invalidate() {
                log::info!("Endpoint handle for {} invalidated", id);
            }
        }
    }

    fn apply_event(&self, event: &DeviceEvent) {
        match event {
            DeviceEvent::DeviceRemoved { id } => {
                self.invalidate(id);
                self.known.lock().retain(|d| &d.id != id);
            }
            DeviceEvent::DeviceStateChanged { id, new_state, .. } => {
                if !new_state.is_active() {
                    self.invalidate(id);
                }
                if !KNOWN_STATES.contains(*new_state) {
                    self.known.lock().retain(|d| &d.id != id);
                    return;
                }
                let updated = {
                    let mut known = self.known.lock();
                    match known.iter_mut().find(|d| &d.id == id) {
                        Some(entry) => {
                            *entry = entry.with_state(*new_state);
                            true
                        }
                        None => false,
                    }
                };
                // Re-plugged devices often report a state change without an add.
                if !updated {
                    self.redescribe(id);
                }
            }
            DeviceEvent::DeviceAdded(descriptor) => self.upsert(descriptor.clone()),
            DeviceEvent::PropertyValueChanged { id, key } => {
                if key.affects_descriptor() {
                    self.redescribe(id);
                }
            }
            DeviceEvent::DefaultDeviceChanged { .. } => {}
        }
    }

    /// Fetch the current descriptor of `id` and store it in the known list.
    fn redescribe(&self, id: &str) {
        match self.api.describe(id) {
            Ok(Some(descriptor)) => self.upsert(descriptor),
            Ok(None) => {
                self.known.lock().retain(|d| d.id != id);
            }
            Err(e) => log::warn!("Failed to describe endpoint {}: {}", id, e),
        }
    }

    /// Replace the entry for the descriptor's id in place, or append it.
    fn upsert(&self, descriptor: EndpointDescriptor) {
        let mut known = self.known.lock();
        if !KNOWN_STATES.contains(descriptor.state) {
            known.retain(|d| d.id != descriptor.id);
            return;
        }
        match known.iter_mut().find(|d| d.id == descriptor.id) {
            Some(entry) => *entry = descriptor,
            None => known.push(descriptor),
        }
    }
}

/// Enumerates endpoints and hands out reference-counted handles.
///
/// All handles returned by `open` / `resolve_default` belong to the caller and
/// are released by dropping them.
#[derive(Clone)]
pub struct DeviceRegistry {
    shared: Arc<RegistryShared>,
}

impl DeviceRegistry {
    pub fn new(api: Arc<dyn DeviceApi>) -> Self {
        Self {
            shared: Arc::new(RegistryShared {
                api,
                handles: Mutex::new(HashMap::new()),
                known: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Endpoints of `flow` whose state is in `mask`, without duplicates.
    pub fn enumerate(&self, flow: DataFlow, mask: StateMask) -> Result<Vec<EndpointDescriptor>, AudioError> {
        let raw = self.shared.api.enumerate(flow, mask)?;
        let mut seen = HashSet::with_capacity(raw.len());
        let endpoints: Vec<EndpointDescriptor> = raw
            .into_iter()
            .filter(|d| d.flow == flow && mask.contains(d.state))
            .filter(|d| seen.insert(d.id.clone()))
            .collect();
        log::debug!(
            "Enumerated {} {:?} endpoint(s) for mask {:#x}",
            endpoints.len(),
            flow,
            mask.bits()
        );
        Ok(endpoints)
    }

    /// Handle to the default endpoint for `flow` and `role`.
    pub fn resolve_default(&self, flow: DataFlow, role: DeviceRole) -> Result<EndpointHandle, AudioError> {
        let id = self
            .shared
            .api
            .default_endpoint(flow, role)?
            .ok_or_else(|| AudioError::DeviceNotFound(format!("no default {:?} device for {:?}", flow, role)))?;
        let handle = self.open(&id)?;
        if handle.flow() != flow {
            return Err(AudioError::DeviceNotFound(format!(
                "default {:?} device {} reports flow {:?}",
                flow,
                id,
                handle.flow()
            )));
        }
        Ok(handle)
    }

    /// Handle to the active endpoint `id`.
    pub fn open(&self, id: &str) -> Result<EndpointHandle, AudioError> {
        // Held across the lookup so a removal cannot slip in before the binding exists.
        let mut handles = self.shared.handles.lock();
        let descriptor = self
            .shared
            .api
            .describe(id)?
            .filter(|d| d.state.is_active())
            .ok_or_else(|| AudioError::DeviceNotFound(id.to_string()))?;

        if let Some(inner) = handles.get(id).and_then(Weak::upgrade) {
            if inner.is_live() {
                return Ok(EndpointHandle::from_inner(inner));
            }
        }
        let handle = EndpointHandle::new(descriptor);
        handles.insert(id.to_string(), handle.downgrade());
        log::debug!("Opened endpoint handle for {}", id);
        Ok(handle)
    }

    /// Make `id` the default endpoint for `role`.
    pub fn set_default(&self, id: &str, role: DeviceRole) -> Result<(), AudioError> {
        self.open(id)?;
        self.shared.api.set_default_endpoint(id, role)?;
        log::info!("Default {:?} endpoint set to {}", role, id);
        Ok(())
    }

    /// Re-enumerate both directions and replace the known-endpoint list.
    pub fn refresh(&self) -> Result<Vec<EndpointDescriptor>, AudioError> {
        let mut endpoints = self.enumerate(DataFlow::Input, KNOWN_STATES)?;
        endpoints.extend(self.enumerate(DataFlow::Output, KNOWN_STATES)?);
        *self.shared.known.lock() = endpoints.clone();
        Ok(endpoints)
    }

    /// Snapshot of the known-endpoint list.
    pub fn known_endpoints(&self) -> Vec<EndpointDescriptor> {
        self.shared.known.lock().clone()
    }

    /// Number of device bindings that still have live holders.
    pub fn live_handle_count(&self) -> usize {
        self.shared
            .handles
            .lock()
            .values()
            .filter(|w| w.upgrade().is_some_and(|inner| inner.is_live()))
            .count()
    }

    /// Keep handles and the known list current from `channel`'s events.
    ///
    /// The handler holds only a weak reference: events arriving after the
    /// registry is dropped are ignored.
    pub fn attach(&self, channel: &NotificationChannel) -> Subscription {
        let weak = Arc::downgrade(&self.shared);
        channel.subscribe(
            &[
                EventKind::DeviceAdded,
                EventKind::DeviceRemoved,
                EventKind::DeviceStateChanged,
                EventKind::PropertyValueChanged,
            ],
            move |event| {
                if let Some(shared) = weak.upgrade() {
                    shared.apply_event(event);
                }
            },
        )
    }

    pub fn api(&self) -> &Arc<dyn DeviceApi> {
        &self.shared.api
    }
}
