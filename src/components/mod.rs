//! Shared infrastructure components available to policies.
//!
//! Policies obtain components by capability type through the per-request
//! [`crate::policy::PolicyContext`]; the registry itself lives for the
//! process lifetime and is shared across requests.

pub mod rate_limiter;

pub use rate_limiter::RateLimiter;

use crate::error::ComponentNotFoundError;
use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::Arc;

/// Lookup-by-capability-type registry.
///
/// Hosts register concrete components up front; policies look them up by
/// type. A missing component is a [`ComponentNotFoundError`], which a
/// policy surfaces as a hard (request-fatal) error rather than a rejection.
#[derive(Default)]
pub struct ComponentRegistry {
    components: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a component, replacing any previous one of the same type.
    pub fn register<T: Any + Send + Sync>(&mut self, component: Arc<T>) {
        self.components.insert(TypeId::of::<T>(), component);
    }

    /// Looks up a component by type.
    pub fn get<T: Any + Send + Sync>(&self) -> Result<Arc<T>, ComponentNotFoundError> {
        self.components
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|c| c.downcast::<T>().ok())
            .ok_or(ComponentNotFoundError {
                component: type_name::<T>(),
            })
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.components.contains_key(&TypeId::of::<T>())
    }
}
