//! JSON run configuration. Every field is optional; missing ones take the defaults below.
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use crate::capture::containers::Protocol;
use crate::error::ConfigError;

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub input_file_address: Option<PathBuf>,
    pub output_file_path: PathBuf,
    pub protocols: Vec<Protocol>,
    /// Seconds.
    pub ethercat_activity_timeout: u64,
    /// Seconds.
    pub max_ethercat_session_duration: u64,
    /// Seconds.
    pub zwave_activity_timeout: u64,
    /// Seconds.
    pub max_zwave_session_duration: u64,
    pub float_precision: usize,
    pub features_ignore_list: Vec<String>,
    pub label: String,
    pub log_every_records: u64,
    pub max_rows_number: usize,
    pub csv_delimiter: char,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_file_address: None,
            output_file_path: PathBuf::from("./"),
            protocols: Protocol::ALL.to_vec(),
            ethercat_activity_timeout: 5_000,
            max_ethercat_session_duration: 120_000,
            zwave_activity_timeout: 600,
            max_zwave_session_duration: 1_200,
            float_precision: 4,
            features_ignore_list: Vec::new(),
            label: String::from("Unknown"),
            log_every_records: 10_000,
            max_rows_number: 800_000,
            csv_delimiter: ';',
        }
    }
}

impl Config {
    /// Reads and validates a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::warn!("Config file {} not found, using default values.", path.display());
            return Ok(Self::default());
        }

        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&text).map_err(|err| match err {
            ConfigError::Json { source, .. } => ConfigError::Json { path: path.to_path_buf(), source },
            other => other,
        })?;

        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(text).map_err(|source| ConfigError::Json {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("ethercat_activity_timeout", self.ethercat_activity_timeout),
            ("max_ethercat_session_duration", self.max_ethercat_session_duration),
            ("zwave_activity_timeout", self.zwave_activity_timeout),
            ("max_zwave_session_duration", self.max_zwave_session_duration),
            ("log_every_records", self.log_every_records),
            ("max_rows_number", self.max_rows_number as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid { field, reason: String::from("must be greater than zero") });
            }
        }

        if self.protocols.is_empty() {
            return Err(ConfigError::Invalid {
                field: "protocols",
                reason: String::from("at least one protocol must be enabled"),
            });
        }

        if !self.csv_delimiter.is_ascii() {
            return Err(ConfigError::Invalid {
                field: "csv_delimiter",
                reason: format!("{:?} is not a single-byte character", self.csv_delimiter),
            });
        }

        Ok(())
    }

    pub fn is_enabled(&self, protocol: Protocol) -> bool {
        self.protocols.contains(&protocol)
    }

    /// `(activity_timeout, max_duration)` in seconds for `protocol`.
    pub fn timeouts(&self, protocol: Protocol) -> (u64, u64) {
        match protocol {
            Protocol::EtherCat => (self.ethercat_activity_timeout, self.max_ethercat_session_duration),
            Protocol::Zwave => (self.zwave_activity_timeout, self.max_zwave_session_duration),
        }
    }
}
