//! The process-wide addon registry: `(kind, name) → factory`. Registration
//! happens at process start (static registrars) or through an addon loader;
//! lookups clone an immutable snapshot, so the hot path takes no lock
//! longer than an Arc bump.

use crate::protocol::ProtocolAddon;
use crate::{Error, ErrorCode, Extension, Result};
use models::AddonKind;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Manufactures and retires extension instances.
pub trait ExtensionAddon: Send + Sync {
    fn create(&self, instance_name: &str) -> Box<dyn Extension>;

    /// Retire an instance this addon created. Runs on the instance's owning
    /// thread, after its deinit acknowledgement.
    fn destroy(&self, instance: Box<dyn Extension>) {
        drop(instance);
    }

    /// The addon's default property document (its `property.json`), merged
    /// under each instance's node-level properties.
    fn default_property(&self) -> Option<serde_json::Value> {
        None
    }
}

impl<F> ExtensionAddon for F
where
    F: Fn(&str) -> Box<dyn Extension> + Send + Sync,
{
    fn create(&self, instance_name: &str) -> Box<dyn Extension> {
        self(instance_name)
    }
}

/// An addon loader pulls further registrations in at runtime (a dynamic
/// module, a foreign-language binding). The core only drives the seam.
pub trait AddonLoader: Send + Sync {
    fn load(&self, registry: &AddonRegistry) -> Result<()>;
    fn unload(&self, registry: &AddonRegistry);
}

#[derive(Clone)]
pub enum AddonFactory {
    Extension(Arc<dyn ExtensionAddon>),
    Protocol(Arc<dyn ProtocolAddon>),
    AddonLoader(Arc<dyn AddonLoader>),
}

impl AddonFactory {
    fn kind(&self) -> AddonKind {
        match self {
            AddonFactory::Extension(_) => AddonKind::Extension,
            AddonFactory::Protocol(_) => AddonKind::Protocol,
            AddonFactory::AddonLoader(_) => AddonKind::AddonLoader,
        }
    }
}

type Snapshot = Arc<HashMap<(AddonKind, String), AddonFactory>>;

pub struct AddonRegistry {
    // Writers clone the map and swap the Arc; readers clone the Arc.
    snapshot: RwLock<Snapshot>,
}

lazy_static::lazy_static! {
    static ref REGISTRY: AddonRegistry = AddonRegistry::new();
}

/// The process-wide registry.
pub fn registry() -> &'static AddonRegistry {
    &REGISTRY
}

impl AddonRegistry {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    pub fn register(&self, name: &str, factory: AddonFactory) -> Result<()> {
        let kind = factory.kind();
        let mut snapshot = self.snapshot.write().unwrap();

        let mut next = HashMap::clone(&snapshot);
        if next.insert((kind, name.to_string()), factory).is_some() {
            tracing::warn!(%kind, name, "replacing an existing addon registration");
        }
        *snapshot = Arc::new(next);
        Ok(())
    }

    pub fn unregister(&self, kind: AddonKind, name: &str) {
        let mut snapshot = self.snapshot.write().unwrap();

        let mut next = HashMap::clone(&snapshot);
        next.remove(&(kind, name.to_string()));
        *snapshot = Arc::new(next);
    }

    /// Drop every registration of `kind`. Used when an app closes, unless
    /// the host opted out to keep addons across apps.
    pub fn unregister_kind(&self, kind: AddonKind) {
        let mut snapshot = self.snapshot.write().unwrap();

        let mut next = HashMap::clone(&snapshot);
        next.retain(|(entry_kind, _), _| *entry_kind != kind);
        *snapshot = Arc::new(next);
    }

    fn lookup(&self, kind: AddonKind, name: &str) -> Option<AddonFactory> {
        let snapshot = self.snapshot.read().unwrap().clone();
        snapshot.get(&(kind, name.to_string())).cloned()
    }

    pub fn has(&self, kind: AddonKind, name: &str) -> bool {
        self.lookup(kind, name).is_some()
    }

    pub fn extension_addon(&self, name: &str) -> Result<Arc<dyn ExtensionAddon>> {
        match self.lookup(AddonKind::Extension, name) {
            Some(AddonFactory::Extension(addon)) => Ok(addon),
            _ => Err(Error::new(
                ErrorCode::InvalidGraph,
                format!("extension addon '{name}' is not registered"),
            )),
        }
    }

    pub fn protocol_addon(&self, name: &str) -> Result<Arc<dyn ProtocolAddon>> {
        match self.lookup(AddonKind::Protocol, name) {
            Some(AddonFactory::Protocol(addon)) => Ok(addon),
            _ => Err(Error::protocol(format!(
                "protocol addon '{name}' is not registered"
            ))),
        }
    }

    /// Run every registered loader, letting each contribute registrations.
    pub fn run_loaders(&self) -> Result<()> {
        let snapshot = self.snapshot.read().unwrap().clone();
        for factory in snapshot.values() {
            if let AddonFactory::AddonLoader(loader) = factory {
                loader.load(self)?;
            }
        }
        Ok(())
    }
}

impl Default for AddonRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Register an extension addon under `name` in the process-wide registry.
pub fn register_addon_as_extension(name: &str, addon: impl ExtensionAddon + 'static) {
    let _ = registry().register(name, AddonFactory::Extension(Arc::new(addon)));
}

/// Register an extension addon under the name its on-disk metadata
/// declares, with its `property.json` as the instances' default property
/// tree.
pub fn register_addon_with_metadata(
    metadata: &crate::metadata::AddonMetadata,
    addon: impl ExtensionAddon + 'static,
) {
    let defaults = metadata.property.as_ref().map(|doc| doc.0.clone());
    let _ = registry().register(
        &metadata.manifest.name,
        AddonFactory::Extension(Arc::new(WithDefaults {
            inner: Arc::new(addon),
            defaults,
        })),
    );
}

// Forwards to the wrapped addon, supplying on-disk defaults.
struct WithDefaults {
    inner: Arc<dyn ExtensionAddon>,
    defaults: Option<serde_json::Value>,
}

impl ExtensionAddon for WithDefaults {
    fn create(&self, instance_name: &str) -> Box<dyn Extension> {
        self.inner.create(instance_name)
    }

    fn destroy(&self, instance: Box<dyn Extension>) {
        self.inner.destroy(instance);
    }

    fn default_property(&self) -> Option<serde_json::Value> {
        self.defaults.clone()
    }
}

/// Register a protocol addon under its URI scheme.
pub fn register_addon_as_protocol(scheme: &str, addon: impl ProtocolAddon + 'static) {
    let _ = registry().register(scheme, AddonFactory::Protocol(Arc::new(addon)));
}

#[cfg(test)]
mod test {
    use super::*;

    struct Nop;
    impl Extension for Nop {}

    #[test]
    fn test_register_and_lookup() {
        let registry = AddonRegistry::new();
        registry
            .register(
                "nop",
                AddonFactory::Extension(Arc::new(|_name: &str| {
                    Box::new(Nop) as Box<dyn Extension>
                })),
            )
            .unwrap();

        assert!(registry.has(AddonKind::Extension, "nop"));
        assert!(!registry.has(AddonKind::Protocol, "nop"));
        registry.extension_addon("nop").unwrap();
        assert!(registry.extension_addon("missing").is_err());

        registry.unregister(AddonKind::Extension, "nop");
        assert!(!registry.has(AddonKind::Extension, "nop"));
    }

    #[test]
    fn test_unregister_kind() {
        let registry = AddonRegistry::new();
        for name in ["a", "b"] {
            registry
                .register(
                    name,
                    AddonFactory::Extension(Arc::new(|_name: &str| {
                        Box::new(Nop) as Box<dyn Extension>
                    })),
                )
                .unwrap();
        }
        registry.unregister_kind(AddonKind::Extension);
        assert!(!registry.has(AddonKind::Extension, "a"));
        assert!(!registry.has(AddonKind::Extension, "b"));
    }
}
