use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::models::endpoint::{DataFlow, EndpointDescriptor};
use crate::models::error::AudioError;

pub(crate) struct HandleInner {
    descriptor: EndpointDescriptor,
    live: AtomicBool,
}

impl HandleInner {
    /// Mark the device behind this handle as gone. Returns whether it was live.
    pub(crate) fn invalidate(&self) -> bool {
        self.live.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

/// Reference-counted binding to one endpoint.
///
/// Cloning adds a reference; the binding is released when the last clone is
/// dropped. Holding a handle does not keep the device present: once the
/// registry learns the device was removed or deactivated, the handle goes
/// stale and every operation through it fails with `AudioError::DeviceLost`.
#[derive(Clone)]
pub struct EndpointHandle {
    inner: Arc<HandleInner>,
}

impl EndpointHandle {
    pub(crate) fn new(descriptor: EndpointDescriptor) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                descriptor,
                live: AtomicBool::new(true),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<HandleInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<HandleInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn id(&self) -> &str {
        &self.inner.descriptor.id
    }

    pub fn name(&self) -> &str {
        &self.inner.descriptor.name
    }

    pub fn flow(&self) -> DataFlow {
        self.inner.descriptor.flow
    }

    /// Descriptor as it was when the handle was opened.
    pub fn descriptor(&self) -> &EndpointDescriptor {
        &self.inner.descriptor
    }

    pub fn is_live(&self) -> bool {
        self.inner.is_live()
    }

    pub fn ensure_live(&self) -> Result<(), AudioError> {
        if self.is_live() {
            Ok(())
        } else {
            Err(AudioError::DeviceLost(self.id().to_string()))
        }
    }

    /// Number of live references to this binding.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// True when both handles are the same binding (not merely the same device id).
    pub fn same_binding(&self, other: &EndpointHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for EndpointHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointHandle")
            .field("id", &self.id())
            .field("flow", &self.flow())
            .field("live", &self.is_live())
            .field("refs", &self.ref_count())
            .finish()
    }
}

impl fmt::Display for EndpointHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name(), self.id())
    }
}
