//! Shared environment for data-source engines
//!
//! Engines need the connection-pool registry, the descriptor directory and
//! the criteria-compiler mode. The context is built once at startup and
//! threaded through the pools, never global.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use gridway_rdbc::registry::ConnectionPools;

/// The `data_source` configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSourceSection {
    /// Directory holding `<id>.ds.xml` / `<id>.ds.js` descriptors and the
    /// files of JSON-file data sources
    pub path: String,
    /// Idle engine instances retained per data source
    pub pool_max_idle: usize,
    /// Compile criteria with plain three-valued SQL semantics instead of
    /// the lenient null handling
    pub strict_sql_filtering: bool,
}

impl Default for DataSourceSection {
    fn default() -> Self {
        Self {
            path: "ds".to_string(),
            pool_max_idle: 8,
            strict_sql_filtering: false,
        }
    }
}

/// Shared engine environment.
pub struct DsContext {
    /// Named connection-pool registry
    pub connection_pools: Arc<ConnectionPools>,
    /// Descriptor and data-file directory
    pub path: PathBuf,
    /// Idle engine instances retained per data source
    pub pool_max_idle: usize,
    /// Criteria-compiler mode
    pub strict_sql_filtering: bool,
}

impl DsContext {
    /// Build a context from the config section and the pool registry.
    pub fn new(section: &DataSourceSection, connection_pools: Arc<ConnectionPools>) -> Arc<Self> {
        Arc::new(Self {
            connection_pools,
            path: PathBuf::from(&section.path),
            pool_max_idle: section.pool_max_idle,
            strict_sql_filtering: section.strict_sql_filtering,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_defaults() {
        let section = DataSourceSection::default();
        assert_eq!(section.path, "ds");
        assert_eq!(section.pool_max_idle, 8);
        assert!(!section.strict_sql_filtering);
    }

    #[test]
    fn test_section_deserialization() {
        let section: DataSourceSection = toml::from_str(
            r#"
            path = "descriptors"
            strict_sql_filtering = true
            "#,
        )
        .unwrap();
        assert_eq!(section.path, "descriptors");
        assert!(section.strict_sql_filtering);
        assert_eq!(section.pool_max_idle, 8);
    }
}
