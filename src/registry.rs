//! Plugin registration and lookup.
//!
//! Registration is startup-time and fail-fast: a duplicate id or a domain
//! already claimed by another plugin aborts the boot instead of silently
//! shadowing a retailer. Lookups are by plugin id or by the registrable
//! domain of a target URL. Plugin construction is deferred behind a
//! loader so registering a hundred sites costs nothing until one is used.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::plugin::{ManifestError, PluginManifest, SitePlugin};
use crate::urlnorm::registrable_domain;

/// Deferred plugin constructor.
pub type PluginLoader = Box<dyn Fn() -> Arc<dyn SitePlugin> + Send + Sync>;

struct RegistryEntry {
    manifest: PluginManifest,
    loader: PluginLoader,
    instance: OnceLock<Arc<dyn SitePlugin>>,
}

#[derive(Default)]
struct RegistryInner {
    by_id: HashMap<String, Arc<RegistryEntry>>,
    /// registrable domain -> owning plugin id
    domain_owner: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("plugin {id:?} rejected: {reason}")]
    InvalidManifest { id: String, reason: ManifestError },
    #[error("plugin id {0:?} is already registered")]
    DuplicateId(String),
    #[error("domain {domain:?} is already claimed by plugin {owner:?}")]
    DomainCollision { domain: String, owner: String },
}

/// Source-of-truth mapping from plugin ids and domains to plugins.
#[derive(Default)]
pub struct PluginRegistry {
    inner: RwLock<RegistryInner>,
}

/// Difference between the registry and an external source list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParityReport {
    /// Source ids with no registered plugin.
    pub missing_in_registry: Vec<String>,
    /// Registered plugins absent from the source list.
    pub unknown_in_registry: Vec<String>,
}

impl ParityReport {
    pub fn is_clean(&self) -> bool {
        self.missing_in_registry.is_empty() && self.unknown_in_registry.is_empty()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        PluginRegistry::default()
    }

    /// Registers a plugin behind a loader. All-or-nothing: on any error
    /// the registry is left exactly as it was.
    pub fn register(
        &self,
        manifest: PluginManifest,
        loader: PluginLoader,
    ) -> Result<(), RegistryError> {
        manifest.validate().map_err(|reason| RegistryError::InvalidManifest {
            id: manifest.id.clone(),
            reason,
        })?;

        let domains = manifest.claimed_domains();
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        if inner.by_id.contains_key(&manifest.id) {
            return Err(RegistryError::DuplicateId(manifest.id));
        }
        for domain in &domains {
            if let Some(owner) = inner.domain_owner.get(domain) {
                if owner != &manifest.id {
                    return Err(RegistryError::DomainCollision {
                        domain: domain.clone(),
                        owner: owner.clone(),
                    });
                }
            }
        }

        let id = manifest.id.clone();
        let version = manifest.version.clone();
        for domain in &domains {
            inner.domain_owner.insert(domain.clone(), id.clone());
        }
        inner.by_id.insert(
            id.clone(),
            Arc::new(RegistryEntry { manifest, loader, instance: OnceLock::new() }),
        );
        info!(plugin = %id, %version, domains = domains.len(), "plugin_registered");
        Ok(())
    }

    /// Instantiates (once) and returns the plugin with this id.
    pub fn load(&self, id: &str) -> Option<Arc<dyn SitePlugin>> {
        let entry = {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            inner.by_id.get(id).cloned()
        }?;
        Some(entry.instance.get_or_init(|| (entry.loader)()).clone())
    }

    /// Finds the plugin whose claimed domain covers this URL.
    pub fn plugin_for_url(&self, url: &Url) -> Option<Arc<dyn SitePlugin>> {
        let domain = registrable_domain(url);
        let id = {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            inner.domain_owner.get(&domain).cloned()
        }?;
        self.load(&id)
    }

    pub fn manifest(&self, id: &str) -> Option<PluginManifest> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.by_id.get(id).map(|entry| entry.manifest.clone())
    }

    /// Registered plugin ids, sorted for stable reporting.
    pub fn manifest_ids(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = inner.by_id.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compares registered plugins against the ingestion source list, both
    /// directions. Run at startup so a source without a plugin (or a
    /// plugin nobody schedules) is caught before the first run.
    pub fn parity_report(&self, source_ids: &[&str]) -> ParityReport {
        let registered = self.manifest_ids();
        let mut missing_in_registry: Vec<String> = source_ids
            .iter()
            .filter(|id| !registered.iter().any(|r| r == *id))
            .map(|id| id.to_string())
            .collect();
        missing_in_registry.sort();
        let unknown_in_registry: Vec<String> = registered
            .into_iter()
            .filter(|id| !source_ids.contains(&id.as_str()))
            .collect();
        ParityReport { missing_in_registry, unknown_in_registry }
    }
}
