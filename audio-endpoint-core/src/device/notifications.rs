//! Notification channel: bridges platform device callbacks into typed events.
//!
//! The platform invokes `NotificationSink` methods on its own thread, possibly
//! while the application is tearing down sessions or dropping the registry.
//! The channel translates each callback into a `DeviceEvent` and dispatches it
//! synchronously, in subscription order, to the handlers registered for that
//! event kind.
//!
//! Guarantees:
//! - After `unsubscribe` (or dropping the `Subscription`) returns, the handler
//!   is never invoked again, even if a dispatch was racing with it.
//! - Late callbacks for disposed targets (dropped device API, closed channel,
//!   unknown devices) are no-ops.
//! - Nothing raised by a handler crosses back into the platform: panics are
//!   caught and logged.
//!
//! Handlers run on the notification thread and must only queue work.
//! `subscribe_queue` does exactly that. A handler must not unsubscribe its own
//! subscription from inside the callback.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_channel::{unbounded, Receiver};
use parking_lot::Mutex;

use crate::models::endpoint::{DataFlow, DeviceRole, DeviceState, EndpointDescriptor};
use crate::models::event::{DeviceEvent, EventKind};
use crate::models::property::PropertyKey;
use crate::traits::device_api::DeviceApi;
use crate::traits::notification_sink::NotificationSink;

type Handler = Box<dyn Fn(&DeviceEvent) + Send + Sync>;

/// The handler lives behind its own lock so that unsubscription can wait for
/// an in-flight invocation without holding the subscription table.
type HandlerSlot = Arc<Mutex<Option<Handler>>>;

struct Entry {
    id: u64,
    kinds: Vec<EventKind>,
    slot: HandlerSlot,
}

struct ChannelShared {
    entries: Mutex<Vec<Entry>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl ChannelShared {
    fn remove(&self, id: u64) -> bool {
        let entry = {
            let mut entries = self.entries.lock();
            match entries.iter().position(|e| e.id == id) {
                Some(pos) => entries.remove(pos),
                None => return false,
            }
        };
        // Waits for a racing dispatch to finish with this handler.
        let handler = entry.slot.lock().take();
        drop(handler);
        true
    }
}

/// Registration of one handler. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    channel: Weak<ChannelShared>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.upgrade() {
            channel.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Typed publish/subscribe front for platform device notifications.
pub struct NotificationChannel {
    shared: Arc<ChannelShared>,
    api: Weak<dyn DeviceApi>,
    states: Mutex<HashMap<String, DeviceState>>,
}

impl NotificationChannel {
    /// The channel keeps only a weak reference to `api`, used to describe newly
    /// added devices. Once the API is dropped, add notifications are ignored.
    pub fn new(api: &Arc<dyn DeviceApi>) -> Self {
        Self {
            shared: Arc::new(ChannelShared {
                entries: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
            api: Arc::downgrade(api),
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Register `handler` for the given event kinds (all kinds if empty).
    pub fn subscribe<F>(&self, kinds: &[EventKind], handler: F) -> Subscription
    where
        F: Fn(&DeviceEvent) + Send + Sync + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let kinds = if kinds.is_empty() {
            EventKind::ALL.to_vec()
        } else {
            kinds.to_vec()
        };
        self.shared.entries.lock().push(Entry {
            id,
            kinds,
            slot: Arc::new(Mutex::new(Some(Box::new(handler)))),
        });
        log::debug!("Notification subscription {} registered", id);
        Subscription {
            id,
            channel: Arc::downgrade(&self.shared),
        }
    }

    /// Register a handler that only queues events for another thread to drain.
    pub fn subscribe_queue(&self, kinds: &[EventKind]) -> (Subscription, Receiver<DeviceEvent>) {
        let (tx, rx) = unbounded();
        let subscription = self.subscribe(kinds, move |event| {
            // Receiver gone means the owner is shutting down.
            let _ = tx.send(event.clone());
        });
        (subscription, rx)
    }

    /// Remove a subscription. Once this returns the handler will not run again.
    ///
    /// Returns false if the subscription was already removed or belongs to
    /// another channel. Dropping the `Subscription` later is a no-op.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        if !std::ptr::eq(subscription.channel.as_ptr(), Arc::as_ptr(&self.shared)) {
            return false;
        }
        self.shared.remove(subscription.id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.entries.lock().len()
    }

    /// Record the current state of known endpoints so state-change events can
    /// report the previous state. Existing entries are kept.
    pub fn seed_states(&self, endpoints: &[EndpointDescriptor]) {
        let mut states = self.states.lock();
        for endpoint in endpoints {
            states.entry(endpoint.id.clone()).or_insert(endpoint.state);
        }
    }

    /// Last state the channel saw for `id`.
    pub fn last_known_state(&self, id: &str) -> Option<DeviceState> {
        self.states.lock().get(id).copied()
    }

    /// Stop dispatching. Callbacks arriving afterwards are ignored.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Dispatch a synthetic event as if the platform had delivered it.
    pub fn inject(&self, event: DeviceEvent) {
        self.record(&event);
        self.dispatch(&event);
    }

    fn record(&self, event: &DeviceEvent) {
        let mut states = self.states.lock();
        match event {
            DeviceEvent::DeviceStateChanged { id, new_state, .. } => {
                states.insert(id.clone(), *new_state);
            }
            DeviceEvent::DeviceAdded(descriptor) => {
                states.insert(descriptor.id.clone(), descriptor.state);
            }
            DeviceEvent::DeviceRemoved { id } => {
                states.remove(id);
            }
            DeviceEvent::DefaultDeviceChanged { .. } | DeviceEvent::PropertyValueChanged { .. } => {}
        }
    }

    fn dispatch(&self, event: &DeviceEvent) {
        if self.is_closed() {
            log::trace!("Dropping {} on closed channel", event);
            return;
        }

        let kind = event.kind();
        let targets: Vec<HandlerSlot> = {
            let entries = self.shared.entries.lock();
            entries
                .iter()
                .filter(|e| e.kinds.contains(&kind))
                .map(|e| Arc::clone(&e.slot))
                .collect()
        };

        log::debug!("Dispatching {} to {} handler(s)", event, targets.len());

        for slot in targets {
            let guard = slot.lock();
            // `None` means the subscription was removed after the snapshot.
            if let Some(handler) = guard.as_ref() {
                if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                    log::error!("Notification handler panicked while handling {}", event);
                }
            }
        }
    }
}

impl NotificationSink for NotificationChannel {
    fn on_device_state_changed(&self, id: &str, new_state: DeviceState) {
        if self.is_closed() {
            return;
        }
        let old_state = {
            let mut states = self.states.lock();
            states
                .insert(id.to_string(), new_state)
                .unwrap_or(DeviceState::NotPresent)
        };
        if old_state == new_state {
            log::trace!("Ignoring repeated state {:?} for {}", new_state, id);
            return;
        }
        self.dispatch(&DeviceEvent::DeviceStateChanged {
            id: id.to_string(),
            old_state,
            new_state,
        });
    }

    fn on_device_added(&self, id: &str) {
        if self.is_closed() {
            return;
        }
        let Some(api) = self.api.upgrade() else {
            log::debug!("Device API disposed; ignoring add of {}", id);
            return;
        };
        let descriptor = match api.describe(id) {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => {
                // Removed again before we could look at it.
                log::debug!("Added device {} vanished before it could be described", id);
                return;
            }
            Err(e) => {
                log::warn!("Failed to describe added device {}: {}", id, e);
                return;
            }
        };
        drop(api);

        let event = DeviceEvent::DeviceAdded(descriptor);
        self.record(&event);
        self.dispatch(&event);
    }

    fn on_device_removed(&self, id: &str) {
        if self.is_closed() {
            return;
        }
        let event = DeviceEvent::DeviceRemoved { id: id.to_string() };
        self.record(&event);
        self.dispatch(&event);
    }

    fn on_default_device_changed(&self, flow: DataFlow, role: DeviceRole, id: Option<&str>) {
        if self.is_closed() {
            return;
        }
        self.dispatch(&DeviceEvent::DefaultDeviceChanged {
            flow,
            role,
            new_id: id.map(str::to_string),
        });
    }

    fn on_property_value_changed(&self, id: &str, key: PropertyKey) {
        if self.is_closed() {
            return;
        }
        if key.is_empty() {
            log::trace!("Ignoring property change with empty key for {}", id);
            return;
        }
        self.dispatch(&DeviceEvent::PropertyValueChanged {
            id: id.to_string(),
            key,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedDeviceApi;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    fn channel() -> (Arc<dyn DeviceApi>, NotificationChannel) {
        let api: Arc<dyn DeviceApi> = Arc::new(SimulatedDeviceApi::with_default_devices());
        let channel = NotificationChannel::new(&api);
        (api, channel)
    }

    fn counter(channel: &NotificationChannel, kinds: &[EventKind]) -> (Subscription, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let sub = channel.subscribe(kinds, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (sub, count)
    }

    #[test]
    fn dispatches_only_subscribed_kinds() {
        let (_api, channel) = channel();
        let (_removed_sub, removed) = counter(&channel, &[EventKind::DeviceRemoved]);
        let (_all_sub, all) = counter(&channel, &[]);

        channel.on_device_removed("x");
        channel.on_default_device_changed(DataFlow::Input, DeviceRole::Console, None);

        assert_eq!(removed.load(Ordering::SeqCst), 1);
        assert_eq!(all.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn handlers_run_in_subscription_order() {
        let (_api, channel) = channel();
        let order = Arc::new(Mutex::new(Vec::new()));
        let subs: Vec<Subscription> = (0..3)
            .map(|i| {
                let order = Arc::clone(&order);
                channel.subscribe(&[], move |_| order.lock().push(i))
            })
            .collect();

        channel.on_device_removed("x");
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        drop(subs);
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[test]
    fn unsubscribed_handler_never_fires() {
        let (_api, channel) = channel();
        let (sub, count) = counter(&channel, &[EventKind::DeviceAdded]);
        channel.unsubscribe(&sub);

        channel.inject(DeviceEvent::DeviceAdded(EndpointDescriptor::new(
            "mic",
            "Mic",
            DataFlow::Input,
            DeviceState::Active,
        )));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsubscribe_is_scoped_to_its_channel() {
        let (api, channel) = channel();
        let other = NotificationChannel::new(&api);
        let (sub, _count) = counter(&channel, &[]);

        assert!(!other.unsubscribe(&sub));
        assert_eq!(channel.subscriber_count(), 1);
        assert!(channel.unsubscribe(&sub));
        assert!(!channel.unsubscribe(&sub));
        drop(sub);
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[test]
    fn empty_property_key_is_dropped() {
        let (_api, channel) = channel();
        let (_sub, rx) = channel.subscribe_queue(&[EventKind::PropertyValueChanged]);

        channel.on_property_value_changed("mic", PropertyKey::new(0, 0));
        assert!(rx.try_recv().is_err());

        channel.on_property_value_changed("mic", PropertyKey::DEVICE_FRIENDLY_NAME);
        assert_eq!(
            rx.try_recv().unwrap(),
            DeviceEvent::PropertyValueChanged {
                id: "mic".into(),
                key: PropertyKey::DEVICE_FRIENDLY_NAME,
            }
        );
    }

    #[test]
    fn unsubscribe_waits_for_in_flight_handler() {
        let (_api, channel) = channel();
        let channel = Arc::new(channel);
        let started = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let (s, f) = (Arc::clone(&started), Arc::clone(&finished));
        let sub = channel.subscribe(&[], move |_| {
            s.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(50));
            f.store(true, Ordering::SeqCst);
        });

        let dispatcher = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || channel.on_device_removed("x"))
        };
        while !started.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
        channel.unsubscribe(&sub);
        // The racing invocation completed before unsubscribe returned.
        assert!(finished.load(Ordering::SeqCst));
        dispatcher.join().unwrap();
    }

    #[test]
    fn state_change_reports_previous_state() {
        let (_api, channel) = channel();
        channel.seed_states(&[EndpointDescriptor::new(
            "mic",
            "Mic",
            DataFlow::Input,
            DeviceState::Active,
        )]);
        let (_sub, rx) = channel.subscribe_queue(&[EventKind::DeviceStateChanged]);

        channel.on_device_state_changed("mic", DeviceState::Unplugged);
        channel.on_device_state_changed("mic", DeviceState::Unplugged);

        assert_eq!(
            rx.try_recv().unwrap(),
            DeviceEvent::DeviceStateChanged {
                id: "mic".into(),
                old_state: DeviceState::Active,
                new_state: DeviceState::Unplugged,
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn panicking_handler_is_contained() {
        let (_api, channel) = channel();
        let _bad = channel.subscribe(&[], |_| panic!("handler bug"));
        let (_good, count) = counter(&channel, &[]);

        channel.on_device_removed("x");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn add_after_api_dropped_is_noop() {
        let (api, channel) = channel();
        let (_sub, count) = counter(&channel, &[]);
        drop(api);

        channel.on_device_added("sim-mic-usb");
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn closed_channel_ignores_callbacks() {
        let (_api, channel) = channel();
        let (_sub, count) = counter(&channel, &[]);
        channel.close();

        channel.on_device_removed("x");
        channel.on_property_value_changed("x", PropertyKey::DEVICE_FRIENDLY_NAME);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn subscription_outliving_channel_drops_quietly() {
        let (_api, channel) = channel();
        let (sub, _count) = counter(&channel, &[]);
        drop(channel);
        drop(sub);
    }
}
