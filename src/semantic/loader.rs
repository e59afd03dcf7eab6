//! Catalog Loader
//!
//! Loads the catalog from a JSON file (same shape as [`CatalogSpec`]) or falls
//! back to the built-in one. Any failure here is fatal at startup.

use crate::config::EngineConfig;
use crate::error::{NlqError, Result};
use crate::semantic::builtin;
use crate::semantic::catalog::{Catalog, CatalogSpec};
use std::path::Path;
use tracing::info;

/// Parse and validate a catalog from JSON text
pub fn load_from_json(json_str: &str) -> Result<Catalog> {
    let spec: CatalogSpec = serde_json::from_str(json_str).map_err(|e| {
        NlqError::CatalogUnavailable(format!("Failed to parse catalog JSON: {}", e))
    })?;
    Catalog::build(spec)
}

pub fn load_from_file(path: &Path) -> Result<Catalog> {
    let json = std::fs::read_to_string(path).map_err(|e| {
        NlqError::CatalogUnavailable(format!("Failed to read catalog {}: {}", path.display(), e))
    })?;
    load_from_json(&json)
}

/// Load the catalog named by the configuration, or the built-in one.
pub fn load_catalog(config: &EngineConfig) -> Result<Catalog> {
    let catalog = match &config.catalog_path {
        Some(path) => {
            info!("Loading catalog from {}", path.display());
            load_from_file(path)?
        }
        None => builtin::catalog()?,
    };
    info!(
        tables = catalog.tables().count(),
        metrics = catalog.metrics().count(),
        dimensions = catalog.dimensions().count(),
        "Catalog loaded"
    );
    Ok(catalog)
}

/// Serialize a catalog back to the JSON accepted by [`load_from_json`].
pub fn dump_to_json(catalog: &Catalog) -> Result<String> {
    Ok(serde_json::to_string_pretty(catalog.spec())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_builtin_survives_json_dump_and_reload() {
        let catalog = builtin::catalog().unwrap();
        let json = dump_to_json(&catalog).unwrap();
        let reloaded = load_from_json(&json).unwrap();
        assert_eq!(reloaded.spec(), catalog.spec());
    }

    #[test]
    fn test_malformed_json_is_catalog_unavailable() {
        let err = load_from_json("{\"tables\": 3}").unwrap_err();
        assert!(matches!(err, NlqError::CatalogUnavailable(_)));
    }

    #[test]
    fn test_missing_file_is_catalog_unavailable() {
        let config = EngineConfig {
            catalog_path: Some(PathBuf::from("/nonexistent/catalog.json")),
            ..EngineConfig::default()
        };
        assert!(matches!(
            load_catalog(&config),
            Err(NlqError::CatalogUnavailable(_))
        ));
    }
}
