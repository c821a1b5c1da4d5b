//! Named application services shared by handlers and middleware.
//!
//! Services are registered while the server is being configured and looked
//! up by name from the request context (`ctx.server().service::<T>(name)`).

use std::any::Any;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// A cross-cutting application service.
pub trait Service: Send + Sync + 'static {
    /// Unique name under which the service is registered.
    fn name(&self) -> &str;
}

/// Registry of services keyed by name.
#[derive(Default)]
pub struct Services {
    entries: DashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl Services {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Panics
    /// When a service with the same name is already registered.
    pub fn register<S: Service>(&self, service: S) {
        let name = service.name().to_string();
        let taken = match self.entries.entry(name.clone()) {
            Entry::Occupied(_) => true,
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(service));
                false
            }
        };
        if taken {
            panic!("service {name:?} is already registered");
        }
        tracing::debug!(service = %name, "Service registered");
    }

    /// Service registered under `name`, if it exists and has type `S`.
    pub fn lookup<S: Service>(&self, name: &str) -> Option<Arc<S>> {
        let entry = self.entries.get(name)?;
        Arc::clone(entry.value()).downcast::<S>().ok()
    }

    /// # Panics
    /// When no service of type `S` is registered under `name`.
    pub fn get<S: Service>(&self, name: &str) -> Arc<S> {
        match self.lookup(name) {
            Some(service) => service,
            None => panic!(
                "service {name:?} of type {} is not registered",
                std::any::type_name::<S>()
            ),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set()
            .entries(self.entries.iter().map(|e| e.key().clone()))
            .finish()
    }
}
