use crate::value::ValueKind;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Problems with the shape of an experiment. Fatal at `initialize()`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("lower run number ({lower}) is greater than upper run number ({upper})")]
    RunBounds { lower: u32, upper: u32 },

    #[error("no datasets have been specified")]
    NoDatasets,

    #[error("property iterator is enabled but no property path is set")]
    MissingPropertyPath,

    #[error("property iterator is enabled but no property values are set")]
    MissingPropertyValues,

    #[error("no result producer set")]
    MissingProducer,

    #[error("no result listener set")]
    MissingListener,

    #[error("{component} has no field named '{field}'")]
    UnknownField { component: String, field: String },

    #[error("field '{field}' on {component} expects {expected}, got {found}")]
    TypeMismatch {
        component: String,
        field: String,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("field '{field}' on {component} is not a nested component")]
    NotNested { component: String, field: String },

    #[error("field '{field}' on {component} is a nested component and cannot be assigned")]
    NotAssignable { component: String, field: String },

    #[error("property path node {index} is declared on {expected} but resolves to {found}")]
    OwnerMismatch {
        index: usize,
        expected: String,
        found: String,
    },

    #[error("invalid value for field '{field}': {message}")]
    InvalidValue { field: String, message: String },

    #[error("unknown {role} kind '{kind}'")]
    UnknownComponent { role: &'static str, kind: String },

    #[error("invalid settings for {role} '{kind}': {message}")]
    ComponentSettings {
        role: &'static str,
        kind: String,
        message: String,
    },
}

/// Persisting or restoring an experiment failed. Never affects a running sweep.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("unsupported experiment schema_version: {0}")]
    UnsupportedSchema(String),
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("dataset {0} has no header line")]
    MissingHeader(PathBuf),

    #[error("dataset has no attributes")]
    NoAttributes,

    #[error("class index {index} out of range for {attributes} attributes")]
    ClassIndexOutOfRange { index: usize, attributes: usize },
}

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("no dataset has been bound to the producer")]
    NoDataset,

    #[error("iteration exceeded its deadline ({0:?})")]
    DeadlineExceeded(Duration),

    #[error("iteration cancelled")]
    Cancelled,

    #[error("listener error: {0}")]
    Listener(#[from] ListenerError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Failed(String),
}

/// Why a single sweep cell did not complete.
#[derive(Debug, Error)]
pub enum IterationFailure {
    #[error("failed to apply property value: {0}")]
    Property(#[source] ConfigError),

    #[error("failed to load dataset {reference}: {source}")]
    DatasetLoad {
        reference: String,
        #[source]
        source: DatasetError,
    },

    #[error("producer failed: {0}")]
    Producer(#[source] ProducerError),

    #[error("no result producer set")]
    NoProducer,

    #[error("no result listener set")]
    NoListener,

    #[error("sweep has finished or was never initialized")]
    Finished,

    #[error("sweep cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
#[error("run {run}, dataset {dataset_index}, custom {custom_index}: {cause}")]
pub struct IterationError {
    pub run: u32,
    pub dataset_index: usize,
    pub custom_index: usize,
    #[source]
    pub cause: IterationFailure,
}

impl IterationError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.cause,
            IterationFailure::Cancelled | IterationFailure::Producer(ProducerError::Cancelled)
        )
    }
}

/// Errors from the one-time setup and teardown around a sweep.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("producer pre-process failed: {0}")]
    PreProcess(#[source] ProducerError),

    #[error("producer post-process failed: {0}")]
    PostProcess(#[source] ProducerError),

    #[error("listener error: {0}")]
    Listener(#[from] ListenerError),
}
