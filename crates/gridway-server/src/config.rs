//! Server configuration
//!
//! One TOML document configures the whole broker: the `db` section feeds
//! the connection-pool registry, `data_source` the descriptor loader and
//! criteria compiler, `rest`/`rpc` the front-ends, and `router` the HTTP
//! paths. Every section has working defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;

use gridway_ds::DataSourceSection;
use gridway_rdbc::registry::DbSection;

use crate::error::{Result, ServerError};

/// REST front-end settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestSection {
    /// Security prefix prepended to JSON bodies (defeats JSON hijacking)
    pub json_prefix: Option<String>,
    /// Security suffix appended to JSON bodies
    pub json_suffix: Option<String>,
    /// Wrap REST JSON responses in `{response: ...}` envelopes
    pub wrap_json_responses: bool,
    /// Query parameter selecting the response format
    pub dynamic_data_format_param_name: String,
}

impl Default for RestSection {
    fn default() -> Self {
        Self {
            json_prefix: None,
            json_suffix: None,
            wrap_json_responses: true,
            dynamic_data_format_param_name: "isc_dataFormat".to_string(),
        }
    }
}

/// RPC behaviour settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcSection {
    /// Include server stack traces in RPC failure responses
    pub exception_stacktrace: bool,
}

/// HTTP route paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSection {
    /// Path of the IDA transaction endpoint
    pub ida_call: String,
    /// Base path of the REST endpoint
    pub rest_call: String,
    /// Path of the descriptor loader endpoint
    pub data_source_loader: String,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            ida_call: "/gridway/ida".to_string(),
            rest_call: "/gridway/rest".to_string(),
            data_source_loader: "/gridway/dataSourceLoader".to_string(),
        }
    }
}

/// Logging settings for the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Default log level when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Complete broker configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for the HTTP server
    pub host: Option<String>,
    /// Bind port for the HTTP server
    pub port: Option<u16>,
    /// Named databases and the default
    pub db: DbSection,
    /// Descriptor directory and compiler mode
    pub data_source: DataSourceSection,
    /// REST front-end settings
    pub rest: RestSection,
    /// RPC behaviour settings
    pub rpc: RpcSection,
    /// HTTP route paths
    pub router: RouterSection,
    /// Logging settings
    pub logging: LoggingSection,
}

impl ServerConfig {
    /// Parse a configuration document.
    pub fn from_toml_str(content: &str) -> Result<ServerConfig> {
        toml::from_str(content).map_err(|e| ServerError::Config(e.to_string()))
    }

    /// Load a configuration file.
    pub async fn load(path: &Path) -> Result<ServerConfig> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ServerError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// The HTTP bind address.
    pub fn bind_address(&self) -> String {
        format!(
            "{}:{}",
            self.host.as_deref().unwrap_or("127.0.0.1"),
            self.port.unwrap_or(8080)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
        assert_eq!(config.router.ida_call, "/gridway/ida");
        assert_eq!(
            config.rest.dynamic_data_format_param_name,
            "isc_dataFormat"
        );
        assert!(config.rest.wrap_json_responses);
        assert!(!config.rpc.exception_stacktrace);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_full_document() {
        let config = ServerConfig::from_toml_str(
            r#"
            host = "0.0.0.0"
            port = 9000

            [db]
            default_database = "main"

            [db.main]
            type = "postgresql"
            factory = "postgres"

            [db.main.connection]
            url = "postgres://localhost/app"

            [data_source]
            path = "descriptors"
            strict_sql_filtering = true

            [rest]
            json_prefix = "while(1);"
            wrap_json_responses = true

            [rpc]
            exception_stacktrace = true

            [router]
            ida_call = "/isomorphic/IDACall"

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.bind_address(), "0.0.0.0:9000");
        assert_eq!(config.db.default_database.as_deref(), Some("main"));
        assert_eq!(config.data_source.path, "descriptors");
        assert!(config.data_source.strict_sql_filtering);
        assert_eq!(config.rest.json_prefix.as_deref(), Some("while(1);"));
        assert!(config.rpc.exception_stacktrace);
        assert_eq!(config.router.ida_call, "/isomorphic/IDACall");
        assert_eq!(config.router.rest_call, "/gridway/rest");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_document() {
        assert!(matches!(
            ServerConfig::from_toml_str("db = 4"),
            Err(ServerError::Config(_))
        ));
    }
}
