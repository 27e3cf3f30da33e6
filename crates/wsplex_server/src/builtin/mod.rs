//! Built-in filters and plug-ins and the registry that instantiates
//! components by name.

pub mod echo;
pub mod packet_size;
pub mod relay;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use wsplex_core::{Descriptor, FilterRef, PlugInRef};

pub use echo::EchoPlugIn;
pub use packet_size::PacketSizeFilter;
pub use relay::RelayPlugIn;

/// Creates a filter from its descriptor.
pub type FilterFactory = Arc<dyn Fn(Descriptor) -> FilterRef + Send + Sync>;
/// Creates a plug-in from its descriptor.
pub type PlugInFactory = Arc<dyn Fn(Descriptor) -> PlugInRef + Send + Sync>;

/// Maps component names from the configuration file to factories.
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    filters: HashMap<String, FilterFactory>,
    plugins: HashMap<String, PlugInFactory>,
}

impl ComponentRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with `echo`, `relay` and `packet_size`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_plugin("echo", |descriptor| Arc::new(EchoPlugIn::new(descriptor)));
        registry.register_plugin("relay", |descriptor| Arc::new(RelayPlugIn::new(descriptor)));
        registry.register_filter("packet_size", |descriptor| Arc::new(PacketSizeFilter::new(descriptor)));
        registry
    }

    pub fn register_filter<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(Descriptor) -> FilterRef + Send + Sync + 'static,
    {
        self.filters.insert(name.into(), Arc::new(factory));
    }

    pub fn register_plugin<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(Descriptor) -> PlugInRef + Send + Sync + 'static,
    {
        self.plugins.insert(name.into(), Arc::new(factory));
    }

    pub fn create_filter(&self, name: &str, descriptor: Descriptor) -> Option<FilterRef> {
        self.filters.get(name).map(|factory| factory(descriptor))
    }

    pub fn create_plugin(&self, name: &str, descriptor: Descriptor) -> Option<PlugInRef> {
        self.plugins.get(name).map(|factory| factory(descriptor))
    }

    pub fn has_filter(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    pub fn has_plugin(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("filters", &self.filters.keys().collect::<Vec<_>>())
            .field("plugins", &self.plugins.keys().collect::<Vec<_>>())
            .finish()
    }
}
