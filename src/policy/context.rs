//! Per-request policy context.

use crate::components::ComponentRegistry;
use crate::connector::ConnectorInterceptor;
use crate::error::ComponentNotFoundError;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Key/value store plus component access, scoped to one request's chain.
///
/// Exclusively owned by a single request; never shared or mutated across
/// concurrent requests. Policies use attributes to pass state between the
/// request and response phases of the same request.
pub struct PolicyContext {
    components: Arc<ComponentRegistry>,
    attributes: HashMap<String, Box<dyn Any + Send>>,
    interceptor: Option<Box<dyn ConnectorInterceptor>>,
}

impl PolicyContext {
    pub fn new(components: Arc<ComponentRegistry>) -> Self {
        Self {
            components,
            attributes: HashMap::new(),
            interceptor: None,
        }
    }

    pub fn set_attribute<T: Any + Send>(&mut self, name: impl Into<String>, value: T) {
        self.attributes.insert(name.into(), Box::new(value));
    }

    pub fn attribute<T: Any + Send>(&self, name: &str) -> Option<&T> {
        self.attributes.get(name).and_then(|v| v.downcast_ref())
    }

    /// Removes an attribute, returning whether it was present.
    pub fn remove_attribute(&mut self, name: &str) -> bool {
        self.attributes.remove(name).is_some()
    }

    /// Looks up a shared infrastructure component by capability type.
    pub fn component<T: Any + Send + Sync>(&self) -> Result<Arc<T>, ComponentNotFoundError> {
        self.components.get::<T>()
    }

    /// Replaces the backend connector for this request (e.g. to serve a
    /// cached response instead of calling the real backend).
    pub fn set_connector_interceptor(&mut self, interceptor: Box<dyn ConnectorInterceptor>) {
        self.interceptor = Some(interceptor);
    }

    pub(crate) fn take_connector_interceptor(&mut self) -> Option<Box<dyn ConnectorInterceptor>> {
        self.interceptor.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_round_trip() {
        let mut context = PolicyContext::new(Arc::new(ComponentRegistry::new()));

        context.set_attribute("count", 3u64);
        assert_eq!(context.attribute::<u64>("count"), Some(&3));
        // Wrong type reads back as absent
        assert_eq!(context.attribute::<String>("count"), None);

        assert!(context.remove_attribute("count"));
        assert!(!context.remove_attribute("count"));
    }

    #[test]
    fn missing_component_errors() {
        let context = PolicyContext::new(Arc::new(ComponentRegistry::new()));
        assert!(context.component::<crate::components::RateLimiter>().is_err());
    }
}
