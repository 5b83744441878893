//! Explicit owner of the device API, registry, and notification channel.

use std::sync::Arc;

use crate::device::notifications::{NotificationChannel, Subscription};
use crate::device::registry::DeviceRegistry;
use crate::models::error::AudioError;
use crate::traits::device_api::{DeviceApi, NotificationToken};
use crate::traits::notification_sink::NotificationSink;

/// Everything a controller needs to talk to devices, wired together.
///
/// Construction registers the notification channel with the platform and
/// attaches the registry to it. Dropping the context closes the channel first,
/// so late platform callbacks become no-ops, then unregisters it.
pub struct AudioContext {
    api: Arc<dyn DeviceApi>,
    registry: DeviceRegistry,
    channel: Arc<NotificationChannel>,
    token: NotificationToken,
    registry_subscription: Option<Subscription>,
}

impl AudioContext {
    pub fn new(api: Arc<dyn DeviceApi>) -> Result<Self, AudioError> {
        let channel = Arc::new(NotificationChannel::new(&api));
        let registry = DeviceRegistry::new(Arc::clone(&api));
        let registry_subscription = registry.attach(&channel);

        let sink: Arc<dyn NotificationSink> = channel.clone();
        let token = api.register_notifications(sink)?;

        let known = match registry.refresh() {
            Ok(known) => known,
            Err(e) => {
                channel.close();
                if let Err(ue) = api.unregister_notifications(token) {
                    log::warn!("Failed to unregister notifications after refresh error: {}", ue);
                }
                return Err(e);
            }
        };
        channel.seed_states(&known);
        log::info!("Audio context ready with {} known endpoint(s)", known.len());

        Ok(Self {
            api,
            registry,
            channel,
            token,
            registry_subscription: Some(registry_subscription),
        })
    }

    pub fn api(&self) -> &Arc<dyn DeviceApi> {
        &self.api
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn channel(&self) -> &Arc<NotificationChannel> {
        &self.channel
    }
}

impl Drop for AudioContext {
    fn drop(&mut self) {
        self.channel.close();
        if let Err(e) = self.api.unregister_notifications(self.token) {
            log::warn!("Failed to unregister device notifications: {}", e);
        }
        self.registry_subscription.take();
        log::debug!("Audio context disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::endpoint::DataFlow;
    use crate::sim::{SimulatedDeviceApi, SIM_USB_MIC};

    #[test]
    fn new_context_knows_devices_and_tracks_removal() {
        let sim = Arc::new(SimulatedDeviceApi::with_default_devices());
        let ctx = AudioContext::new(sim.clone()).unwrap();
        assert!(ctx
            .registry()
            .known_endpoints()
            .iter()
            .any(|d| d.id == SIM_USB_MIC && d.flow == DataFlow::Input));
        assert_eq!(sim.sink_count(), 1);

        let handle = ctx.registry().open(SIM_USB_MIC).unwrap();
        sim.remove_device(SIM_USB_MIC);
        assert!(!handle.is_live());
    }

    #[test]
    fn drop_unregisters_sink() {
        let sim = Arc::new(SimulatedDeviceApi::with_default_devices());
        let ctx = AudioContext::new(sim.clone()).unwrap();
        let channel = Arc::clone(ctx.channel());
        drop(ctx);
        assert_eq!(sim.sink_count(), 0);
        assert!(channel.is_closed());
    }
}
