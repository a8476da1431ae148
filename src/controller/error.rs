//! Error types for the adapter, the interface state machines and the store

use thiserror::Error;

/// Failures reported by a [`CommandAdapter`](super::adapter::CommandAdapter) call
#[derive(Error, Debug)]
pub enum AdapterError {
    /// The external program could not be started
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The external program ran but reported failure
    #[error("`{command}` exited with status {status}: {stderr}")]
    Failed {
        command: String,
        status: i32,
        stderr: String,
    },

    /// The external program did not finish before the per-call deadline
    #[error("`{command}` timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },

    /// Output that could not be understood
    #[error("unexpected output from `{command}`: {detail}")]
    Parse { command: String, detail: String },
}

pub type AdapterResult<T> = Result<T, AdapterError>;

/// Errors raised by the interface state machines and their parameter accessors
#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("invalid connection type: {value}, available types are: {expected}")]
    InvalidConnectionType { value: String, expected: String },

    #[error("credentials required: {0} mode needs both an SSID and a passphrase")]
    MissingCredentials(&'static str),

    #[error("configuration for {device} is missing parameter: {field}")]
    ConfigurationIncomplete { device: String, field: &'static str },

    #[error("configuration for {device} has type {found}, expected {expected}")]
    KindMismatch {
        device: String,
        expected: String,
        found: String,
    },

    #[error(transparent)]
    ExternalCommand(#[from] AdapterError),

    #[error("'{name}' not found, acceptable parameters are: {available}")]
    UnknownParameter { name: String, available: String },

    #[error("'{0}' is not writable")]
    NotWritable(String),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("invalid value for {field}: {detail}")]
    InvalidValue { field: String, detail: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("failed to persist configuration: {0}")]
    Persist(#[from] StoreError),
}

pub type InterfaceResult<T> = Result<T, InterfaceError>;

/// Errors from the persisted configuration store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration document: {0}")]
    Parse(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(context: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        move |source| StoreError::Io { context, source }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
