//! Built-in site adapters.
//!
//! One module per retailer. [`ammobunker`] is the template for HTML
//! JSON-LD sites, [`rangefeed`] for JSON inventory APIs; new sites start
//! as a copy of whichever is closer.

use std::sync::Arc;

use crate::plugin::SitePlugin;
use crate::registry::{PluginRegistry, RegistryError};

pub mod jsonld;

mod ammobunker;
mod rangefeed;

pub use ammobunker::AmmoBunker;
pub use rangefeed::RangeFeed;

/// Registry preloaded with every built-in adapter.
pub fn builtin_registry() -> Result<PluginRegistry, RegistryError> {
    let registry = PluginRegistry::new();
    registry.register(
        AmmoBunker::new().manifest().clone(),
        Box::new(|| Arc::new(AmmoBunker::new()) as Arc<dyn SitePlugin>),
    )?;
    registry.register(
        RangeFeed::new().manifest().clone(),
        Box::new(|| Arc::new(RangeFeed::new()) as Arc<dyn SitePlugin>),
    )?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    #[test]
    fn builtins_register_cleanly() {
        let registry = builtin_registry().unwrap();
        assert_eq!(
            registry.manifest_ids(),
            vec!["ammobunker".to_string(), "rangefeed".to_string()]
        );

        let url = Url::parse("https://ammobunker.com/ammo/10mm").unwrap();
        let plugin = registry.plugin_for_url(&url).unwrap();
        assert_eq!(plugin.manifest().id, "ammobunker");
    }
}
