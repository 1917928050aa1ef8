//! Configuration: connection parameters, scripts to load and per-script
//! settings.
//!
//! A config file is JSON. Command-line flags are applied on top of it by the
//! binary.
//!
//! ```json
//! {
//!   "connection": { "kind": "tcp", "host": "192.168.0.10", "password": "vbus" },
//!   "scripts": ["clock", "frame-logger"],
//!   "script_config": { "frame-logger": { "duration_ms": 60000 } }
//! }
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::impls::{TcpChannel, VirtualChannel};
use crate::ports::Channel;

pub const DEFAULT_TCP_PORT: u16 = 7053;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot mix options for different connection types: \"{existing}\" vs \"{requested}\"")]
    MixedConnectionKinds {
        existing: &'static str,
        requested: &'static str,
    },

    #[error("no connection configured (use --host, --path or --virtual)")]
    MissingConnection,

    #[error("tcp connection has no host (use --host)")]
    MissingTcpHost,

    #[error("{0} connections are not supported by this build")]
    UnsupportedConnection(&'static str),

    #[error("invalid settings for script config \"{key}\": {source}")]
    ScriptConfig {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpOptions {
    pub host: String,
    #[serde(default = "default_tcp_port")]
    pub port: u16,
    #[serde(default)]
    pub via_tag: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub channel: Option<u8>,
}

fn default_tcp_port() -> u16 {
    DEFAULT_TCP_PORT
}

impl TcpOptions {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_TCP_PORT,
            via_tag: None,
            password: None,
            channel: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ConnectionConfig {
    Tcp(TcpOptions),
    Serial { path: PathBuf },
    Virtual,
}

impl ConnectionConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectionConfig::Tcp(_) => "tcp",
            ConnectionConfig::Serial { .. } => "serial",
            ConnectionConfig::Virtual => "virtual",
        }
    }

    /// Build the channel for this connection.
    pub fn into_channel(self) -> Result<Arc<dyn Channel>, ConfigError> {
        match self {
            ConnectionConfig::Tcp(options) => Ok(Arc::new(TcpChannel::new(options))),
            ConnectionConfig::Virtual => Ok(Arc::new(VirtualChannel::new())),
            ConnectionConfig::Serial { .. } => Err(ConfigError::UnsupportedConnection("serial")),
        }
    }
}

/// Settings for individual scripts, keyed by the name each script asks for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScriptConfigs(HashMap<String, serde_json::Value>);

impl ScriptConfigs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.0.insert(key.into(), value);
    }

    /// Resolve the settings stored under `key`.
    ///
    /// Missing fields are filled in from `T::default()`, so a config file
    /// only has to mention what it changes.
    pub fn resolve<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: Serialize + DeserializeOwned + Default,
    {
        let to_err = |source: serde_json::Error| ConfigError::ScriptConfig {
            key: key.to_string(),
            source,
        };

        let mut merged = serde_json::to_value(T::default()).map_err(to_err)?;
        if let Some(overrides) = self.0.get(key) {
            match (&mut merged, overrides) {
                (serde_json::Value::Object(base), serde_json::Value::Object(fields)) => {
                    for (name, value) in fields {
                        base.insert(name.clone(), value.clone());
                    }
                }
                (slot, value) => *slot = value.clone(),
            }
        }
        serde_json::from_value(merged).map_err(to_err)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolboxConfig {
    pub connection: Option<ConnectionConfig>,

    /// Specification file handed to scripts as an opaque blob.
    pub vsf: Option<PathBuf>,

    /// Scripts to load, in order.
    pub scripts: Vec<String>,

    pub script_config: ScriptConfigs,
}

impl ToolboxConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Use `requested` as the connection, refusing to switch kinds.
    ///
    /// Options of the same kind are merged by the caller, so a second TCP
    /// flag updates the existing TCP options instead of failing.
    pub fn connection_mut(
        &mut self,
        requested: ConnectionConfig,
    ) -> Result<&mut ConnectionConfig, ConfigError> {
        if let Some(existing) = &self.connection
            && existing.kind() != requested.kind()
        {
            return Err(ConfigError::MixedConnectionKinds {
                existing: existing.kind(),
                requested: requested.kind(),
            });
        }
        Ok(self.connection.get_or_insert(requested))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct LoggerConfig {
        interval_ms: u64,
        prefix: String,
    }

    #[test]
    fn script_config_fills_defaults() {
        let mut configs = ScriptConfigs::new();
        configs.insert("logger", json!({ "interval_ms": 250 }));

        let cfg: LoggerConfig = configs.resolve("logger").unwrap();
        assert_eq!(
            cfg,
            LoggerConfig {
                interval_ms: 250,
                prefix: String::new(),
            }
        );
    }

    #[test]
    fn missing_script_config_is_default() {
        let cfg: LoggerConfig = ScriptConfigs::new().resolve("logger").unwrap();
        assert_eq!(cfg, LoggerConfig::default());
    }

    #[test]
    fn script_config_with_wrong_type_is_error() {
        let mut configs = ScriptConfigs::new();
        configs.insert("logger", json!({ "interval_ms": "soon" }));

        let err = configs.resolve::<LoggerConfig>("logger").unwrap_err();
        assert!(matches!(err, ConfigError::ScriptConfig { ref key, .. } if key == "logger"));
    }

    #[test]
    fn parses_config_document() {
        let cfg: ToolboxConfig = serde_json::from_value(json!({
            "connection": { "kind": "tcp", "host": "10.0.0.2", "password": "vbus" },
            "scripts": ["clock"],
            "script_config": { "clock": { "tick_ms": 10 } }
        }))
        .unwrap();

        let Some(ConnectionConfig::Tcp(tcp)) = &cfg.connection else {
            panic!("expected tcp connection");
        };
        assert_eq!(tcp.port, DEFAULT_TCP_PORT);
        assert_eq!(tcp.password.as_deref(), Some("vbus"));
        assert_eq!(cfg.scripts, vec!["clock".to_string()]);
    }

    #[test]
    fn switching_connection_kind_is_rejected() {
        let mut cfg = ToolboxConfig::default();
        cfg.connection_mut(ConnectionConfig::Tcp(TcpOptions::new("host")))
            .unwrap();

        let err = cfg.connection_mut(ConnectionConfig::Virtual).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot mix options for different connection types: \"tcp\" vs \"virtual\""
        );
    }

    #[test]
    fn serial_connection_is_unsupported() {
        let conn = ConnectionConfig::Serial {
            path: PathBuf::from("/dev/ttyUSB0"),
        };
        assert!(matches!(
            conn.into_channel(),
            Err(ConfigError::UnsupportedConnection("serial"))
        ));
    }
}
