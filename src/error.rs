use std::path::PathBuf;
use thiserror::Error;
use crate::capture::containers::Protocol;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("no input file given, set `input_file_address` or pass --file")]
    MissingInput,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("error running tshark on {path}: {source}")]
    Tshark {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("error opening sniffer log {path}: {source}")]
    Log {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("protocol {0} is not enabled in the configuration")]
    ProtocolNotEnabled(Protocol),
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("output I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON encode error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Anything that stops a run before results are written.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Output(#[from] OutputError),
}
