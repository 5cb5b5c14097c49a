use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum EventError {
    #[error("Event cannot hold {0} hits; the raw format stores at most {max}", max=u16::MAX)]
    TooManyHits(usize),
}

#[derive(Debug, Error)]
pub enum RawFormatError {
    #[error("Failed to read raw event data: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Raw event record is truncated -- needed {needed} bytes, found {found}")]
    Truncated { needed: usize, found: usize },
    #[error("Raw event could not be encoded: {0}")]
    BadEvent(#[from] EventError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("Config failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Config file {0:?} has an unsupported extension; expected .json, .yml, or .yaml")]
    UnknownFormat(PathBuf),
    #[error("Config is missing required field '{0}'")]
    MissingField(&'static str),
    #[error("Config field '{field}' is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("Config does not contain any enabled sources")]
    NoSources,
}

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("DataLoader configuration failed: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("DataLoader {0} was started before being connected to a ClipBoard")]
    NotConnected(String),
    #[error("DataLoader {0} is already running")]
    AlreadyRunning(String),
    #[error("DataLoader {0} was started before being configured")]
    NotConfigured(String),
    #[error("No DataLoader is registered for kind '{0}'")]
    UnknownKind(String),
    #[error("DataLoader failed to spawn its worker thread: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ReconstructorError {
    #[error("EventReconstructor slot {0} is already connected to a DataLoader")]
    SlotTaken(usize),
    #[error("EventReconstructor failed due to configuration error: {0}")]
    ConfigError(#[from] ConfigError),
}

#[derive(Debug, Clone, Error)]
pub enum FeBookieError {
    #[error("Front end {0} is already registered as '{1}'")]
    DuplicateId(u32, String),
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Bridge failed due to configuration error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Bridge geometry file {0:?} does not exist")]
    MissingGeometry(PathBuf),
    #[error("Bridge run script {0:?} does not exist")]
    MissingRunScript(PathBuf),
    #[error("Bridge failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Bridge failed to write raw events: {0}")]
    RawFormatError(#[from] RawFormatError),
    #[error("Bridge failed to generate its reconstruction config: {0}")]
    TomlError(#[from] toml::ser::Error),
    #[error("Bridge failed to format its working directory timestamp: {0}")]
    TimeError(#[from] time::error::Format),
    #[error("External reconstruction exited with status {0}")]
    ExternalFailed(std::process::ExitStatus),
    #[error("Bridge was started before being configured")]
    NotConfigured,
    #[error("Bridge is already running")]
    AlreadyRunning,
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to DataLoader error: {0}")]
    LoaderError(#[from] LoaderError),
    #[error("Processor failed due to EventReconstructor error: {0}")]
    ReconstructorError(#[from] ReconstructorError),
    #[error("Processor failed due to FeBookie error: {0}")]
    FeBookieError(#[from] FeBookieError),
    #[error("Processor failed due to Bridge error: {0}")]
    BridgeError(#[from] BridgeError),
    #[error("Processor failed due to raw format error: {0}")]
    RawFormatError(#[from] RawFormatError),
    #[error("Processor failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}
