use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::constants::*;
use super::error::ConfigError;
use super::raw_writer::raw_file_path;

fn deserialize_port<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Text(String),
        Number(u64),
    }

    Ok(match Option::<Port>::deserialize(deserializer)? {
        Some(Port::Text(s)) => Some(s),
        Some(Port::Number(n)) => Some(n.to_string()),
        None => None,
    })
}

/// Placement of a front end in the detector, used by visualization and external tracking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceGeometry {
    pub position: [f64; 3],
    pub angle: [f64; 3],
    pub size: [f64; 2],
    pub rowcol: [u32; 2],
}

/// Configuration for a single data source (one front end).
///
/// Every field is optional in the file; defaults are applied here and requiredness is checked
/// by whichever component consumes the field, so a DataLoader only complains about what it
/// actually needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub name: Option<String>,
    pub loader: String,
    pub enable: bool,
    pub server_ip: String,
    #[serde(deserialize_with = "deserialize_port")]
    pub port: Option<String>,
    pub max_connection_retries: u32,
    /// milliseconds
    pub max_retry_delay: u64,
    /// microseconds
    pub block_timeout: u64,
    /// milliseconds
    pub receive_timeout: u64,
    pub max_events_per_block: Option<usize>,
    pub auto: bool,
    pub path: Option<PathBuf>,
    pub trigger_multiplier: Option<u32>,
    pub position: Option<[f64; 3]>,
    pub angle: Option<[f64; 3]>,
    pub size: Option<[f64; 2]>,
    pub rowcol: Option<[u32; 2]>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            name: None,
            loader: String::from(DEFAULT_LOADER_KIND),
            enable: true,
            server_ip: String::from(DEFAULT_SERVER_IP),
            port: None,
            max_connection_retries: DEFAULT_MAX_CONNECTION_RETRIES,
            max_retry_delay: DEFAULT_MAX_RETRY_DELAY_MS,
            block_timeout: DEFAULT_BLOCK_TIMEOUT_US,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT_MS,
            max_events_per_block: None,
            auto: false,
            path: None,
            trigger_multiplier: None,
            position: None,
            angle: None,
            size: None,
            rowcol: None,
        }
    }
}

impl SourceConfig {
    /// Create a config with only the name set
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn name(&self) -> Result<&str, ConfigError> {
        self.name.as_deref().ok_or(ConfigError::MissingField("name"))
    }

    pub fn port(&self) -> Result<u16, ConfigError> {
        let port = self.port.as_deref().ok_or(ConfigError::MissingField("port"))?;
        port.trim()
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidField {
                field: "port",
                reason: format!("'{port}' is not a port number ({e})"),
            })
    }

    /// The `host:port` address of a socket source
    pub fn address(&self) -> Result<String, ConfigError> {
        Ok(format!("{}:{}", self.server_ip, self.port()?))
    }

    /// Path to a file source. With `auto` the path is treated as a directory and the file name
    /// is built from the source name.
    pub fn file_path(&self) -> Result<PathBuf, ConfigError> {
        let path = self.path.as_ref().ok_or(ConfigError::MissingField("path"))?;
        if self.auto {
            Ok(raw_file_path(path, self.name()?))
        } else {
            Ok(path.clone())
        }
    }

    pub fn block_timeout(&self) -> Duration {
        Duration::from_micros(self.block_timeout)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout.max(1))
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay)
    }

    pub fn max_events_per_block(&self) -> usize {
        self.max_events_per_block.unwrap_or(usize::MAX).max(1)
    }

    pub fn geometry(&self) -> Result<SourceGeometry, ConfigError> {
        Ok(SourceGeometry {
            position: self.position.ok_or(ConfigError::MissingField("position"))?,
            angle: self.angle.ok_or(ConfigError::MissingField("angle"))?,
            size: self.size.ok_or(ConfigError::MissingField("size"))?,
            rowcol: self.rowcol.ok_or(ConfigError::MissingField("rowcol"))?,
        })
    }
}

/// Configuration of the external reconstruction bridge
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BridgeConfig {
    pub geometry: Option<PathBuf>,
    pub run_script: Option<PathBuf>,
    pub program: Option<String>,
    pub work_dir: Option<PathBuf>,
}

/// The configuration document as it appears on disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConfigFile {
    pub global_source_config: Map<String, Value>,
    pub sources: Vec<Value>,
    pub trigger_multiplier: Option<u32>,
    pub bridge: Option<BridgeConfig>,
}

impl ConfigFile {
    /// A small example document, used by the CLI to write a starting point
    pub fn template() -> Self {
        let mut global = Map::new();
        global.insert("auto".into(), Value::Bool(true));
        global.insert("path".into(), Value::String("./data".into()));
        global.insert("block_timeout".into(), Value::from(DEFAULT_BLOCK_TIMEOUT_US));
        let source = serde_json::json!({
            "name": "fe0",
            "loader": "file",
            "position": [0.0, 0.0, 0.0],
            "angle": [0.0, 0.0, 0.0],
            "size": [20.0, 16.8],
            "rowcol": [336, 80],
        });
        Self {
            global_source_config: global,
            sources: vec![source],
            trigger_multiplier: None,
            bridge: None,
        }
    }

    /// Merge the global source config into every source; keys set on the source win
    fn merged_sources(&self) -> Result<Vec<SourceConfig>, ConfigError> {
        let mut global = self.global_source_config.clone();
        if let Some(mult) = self.trigger_multiplier {
            global
                .entry("trigger_multiplier")
                .or_insert_with(|| Value::from(mult));
        }
        self.sources
            .iter()
            .map(|source| {
                let Value::Object(fields) = source else {
                    return Err(ConfigError::InvalidField {
                        field: "sources",
                        reason: format!("expected an object, found {source}"),
                    });
                };
                let mut merged = global.clone();
                for (key, value) in fields {
                    merged.insert(key.clone(), value.clone());
                }
                SourceConfig::from_value(Value::Object(merged))
            })
            .collect()
    }
}

/// Structure representing the application configuration.
///
/// Configs are read from JSON or YAML (chosen by file extension). Sources already have the
/// global source config merged in.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub sources: Vec<SourceConfig>,
    pub trigger_multiplier: Option<u32>,
    pub bridge: Option<BridgeConfig>,
}

impl Config {
    /// Read the configuration in a JSON or YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(config_path)?;
        let value: Value = match config_path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("yml") | Some("yaml") => serde_yaml::from_str(&contents)?,
            _ => return Err(ConfigError::UnknownFormat(config_path.to_path_buf())),
        };
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        Self::from_file(serde_json::from_value::<ConfigFile>(value)?)
    }

    pub fn from_file(file: ConfigFile) -> Result<Self, ConfigError> {
        Ok(Self {
            sources: file.merged_sources()?,
            trigger_multiplier: file.trigger_multiplier,
            bridge: file.bridge,
        })
    }

    /// Sources with `enable` set; disabled sources are skipped entirely
    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enable)
    }

    /// Check everything a pipeline needs before any thread starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut count = 0;
        for source in self.enabled_sources() {
            source.name()?;
            source.geometry()?;
            count += 1;
        }
        if count == 0 {
            return Err(ConfigError::NoSources);
        }
        Ok(())
    }
}
