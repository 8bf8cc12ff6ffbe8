//! Reporter configuration.
//!
//! Two surfaces feed the same validated [`ReporterConfig`]: the key-value
//! property map a host configuration framework passes to `configure`, and a
//! JSON5 [`ReporterOptions`] document for file-based setups.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use promlink_common::LoggingConfig;

use crate::allowlist::Allowlist;
use crate::error::ConfigError;
use crate::listener::ListenerAddress;

/// Property key for the listener address string.
pub const LISTENER_CONFIG: &str = "listener";

/// Default listener address.
pub const LISTENER_CONFIG_DEFAULT: &str = "http://:8080";

/// Property key enabling/disabling the listener for this reporter instance.
pub const LISTENER_ENABLE_CONFIG: &str = "listener.enable";

/// Property key for the comma-separated allow-list pattern fragments.
/// Absent means "allow everything"; an empty value means "allow nothing".
pub const ALLOWLIST_CONFIG: &str = "allowlist";

/// Reporter options as written in configuration (JSON5 loadable).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReporterOptions {
    /// Listener address string (default: "http://:8080").
    #[serde(default = "default_listener")]
    pub listener: String,

    /// Whether this reporter instance binds a listener at all.
    #[serde(default = "default_listener_enable")]
    pub listener_enable: bool,

    /// Allow-list pattern fragments. `None` allows every metric name; an
    /// empty list allows none.
    #[serde(default)]
    pub allowlist: Option<Vec<String>>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_listener() -> String {
    LISTENER_CONFIG_DEFAULT.to_string()
}

fn default_listener_enable() -> bool {
    true
}

impl Default for ReporterOptions {
    fn default() -> Self {
        Self {
            listener: default_listener(),
            listener_enable: default_listener_enable(),
            allowlist: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl ReporterOptions {
    /// Load options from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let options: ReporterOptions = json5::from_str(&content)?;
        Ok(options)
    }

    /// Parse options from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let options: ReporterOptions = json5::from_str(content)?;
        Ok(options)
    }

    /// Build options from a key-value property map.
    pub fn from_props(props: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let listener = props
            .get(LISTENER_CONFIG)
            .cloned()
            .unwrap_or_else(default_listener);

        let listener_enable = match props.get(LISTENER_ENABLE_CONFIG) {
            None => default_listener_enable(),
            Some(raw) => raw.parse::<bool>().map_err(|_| {
                ConfigError::Validation(format!(
                    "{} must be 'true' or 'false', got '{}'",
                    LISTENER_ENABLE_CONFIG, raw
                ))
            })?,
        };

        let allowlist = props.get(ALLOWLIST_CONFIG).map(|raw| {
            if raw.is_empty() {
                Vec::new()
            } else {
                raw.split(',').map(|s| s.trim().to_string()).collect()
            }
        });

        Ok(Self {
            listener,
            listener_enable,
            allowlist,
            logging: LoggingConfig::default(),
        })
    }

    /// Validate and compile into a runtime configuration.
    pub fn build(self) -> Result<ReporterConfig, ConfigError> {
        let address = ListenerAddress::parse(&self.listener)?;

        let allowlist = match &self.allowlist {
            None => Allowlist::match_all(),
            Some(fragments) => Allowlist::compile(fragments),
        };

        Ok(ReporterConfig {
            listener: self.listener,
            address,
            listener_enable: self.listener_enable,
            allowlist,
            logging: self.logging,
        })
    }
}

/// Validated runtime configuration for one reporter instance.
#[derive(Debug)]
pub struct ReporterConfig {
    listener: String,
    address: ListenerAddress,
    listener_enable: bool,
    allowlist: Allowlist,
    logging: LoggingConfig,
}

impl ReporterConfig {
    /// Build a validated configuration from a key-value property map.
    pub fn from_props(props: &HashMap<String, String>) -> Result<Self, ConfigError> {
        ReporterOptions::from_props(props)?.build()
    }

    /// The configured listener string, as written.
    pub fn listener(&self) -> &str {
        &self.listener
    }

    /// The parsed listener address.
    pub fn address(&self) -> &ListenerAddress {
        &self.address
    }

    /// Whether this reporter instance binds a listener.
    pub fn is_listener_enabled(&self) -> bool {
        self.listener_enable
    }

    /// Whether a metric name passes the configured allow-list.
    pub fn is_allowed(&self, name: &str) -> bool {
        self.allowlist.is_allowed(name)
    }

    /// Logging configuration.
    pub fn logging(&self) -> &LoggingConfig {
        &self.logging
    }
}
