//! VM configuration

use crate::defaults::DEFAULT_STACK_CAPACITY;
use std::fmt;
use std::sync::Arc;

/// Resource limits for a VM
#[derive(Debug, Clone, Default)]
pub struct ResourceLimits {
    /// Maximum number of live objects (None = unlimited)
    pub max_objects: Option<usize>,
}

impl ResourceLimits {
    /// Create unlimited resource limits
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Create resource limits with an object limit
    pub fn with_object_limit(max_objects: usize) -> Self {
        Self {
            max_objects: Some(max_objects),
        }
    }
}

/// A VM component changed state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentEvent {
    /// The named component started
    Started(&'static str),
    /// The named component shut down
    Stopped(&'static str),
}

/// Callback observing component startup and shutdown
pub type LifecycleObserver = Arc<dyn Fn(ComponentEvent) + Send + Sync>;

/// Options for starting a VM
#[derive(Clone)]
pub struct VmOptions {
    /// Resource limits
    pub limits: ResourceLimits,

    /// Capacity of the operand stack, in values (must be nonzero)
    pub stack_capacity: usize,

    /// Component lifecycle observer
    pub observer: Option<LifecycleObserver>,
}

impl VmOptions {
    /// Set resource limits
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the operand stack capacity
    pub fn with_stack_capacity(mut self, capacity: usize) -> Self {
        self.stack_capacity = capacity;
        self
    }

    /// Observe component startup and shutdown
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(ComponentEvent) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub(crate) fn notify(&self, event: ComponentEvent) {
        if let Some(observer) = &self.observer {
            observer(event);
        }
    }
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            limits: ResourceLimits::default(),
            stack_capacity: DEFAULT_STACK_CAPACITY,
            observer: None,
        }
    }
}

impl fmt::Debug for VmOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmOptions")
            .field("limits", &self.limits)
            .field("stack_capacity", &self.stack_capacity)
            .field("has_observer", &self.observer.is_some())
            .finish()
    }
}
