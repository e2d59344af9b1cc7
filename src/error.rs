use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::ConfigError,
    types::{TSDataType, TSEncoding},
};

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionError {
    #[error("endpoint {0} is unreachable")]
    Unreachable(String),
    #[error("authentication failed for user `{0}`")]
    Authentication(String),
    #[error("connection to {0} was lost")]
    Lost(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaError {
    #[error("malformed path `{path}`: {reason}")]
    MalformedPath { path: String, reason: String },
    #[error("storage group `{0}` does not exist")]
    StorageGroupNotFound(String),
    #[error("`{path}` overlaps with existing storage group `{existing}`")]
    StorageGroupOverlap { path: String, existing: String },
    #[error("no storage group is set for `{0}`")]
    NoStorageGroup(String),
    #[error("timeseries `{0}` already exists with a different definition")]
    ConflictingTimeseries(String),
    #[error("timeseries `{path}` conflicts with existing path `{existing}`")]
    PathConflict { path: String, existing: String },
    #[error("timeseries `{0}` does not exist")]
    TimeseriesNotFound(String),
    #[error("encoding {encoding} does not support data type {data_type}")]
    UnsupportedEncoding {
        data_type: TSDataType,
        encoding: TSEncoding,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WriteError {
    #[error("{measurements} measurements but {values} values")]
    ArityMismatch { measurements: usize, values: usize },
    #[error("no measurements to write")]
    EmptyRow,
    #[error("measurement `{0}` appears more than once")]
    DuplicateMeasurement(String),
    #[error("timeseries `{0}` was not declared")]
    UndeclaredTimeseries(String),
    #[error("value `{value}` does not match type {expected} of `{series}`")]
    TypeMismatch {
        series: String,
        expected: TSDataType,
        value: String,
    },
    #[error("malformed path `{0}`")]
    MalformedPath(String),
    #[error("timestamp {0} is outside of the insert window")]
    OutOfWindow(i64),
    #[error("storage rejected the write: {0}")]
    Storage(String),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    #[error("session is not open")]
    NotOpen,
    #[error("session is already open")]
    AlreadyOpen,
    #[error("session closed")]
    Closed,
}

/// Every failure a session operation can report, grouped by kind.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("invalid session config")]
    Config(#[from] ConfigError),
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("write error: {0}")]
    Write(#[from] WriteError),
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error("server error: {0}")]
    Internal(String),
}

/// Failures the server sends back in place of a response.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error("{0}")]
    Internal(String),
}

impl From<ServerError> for SessionError {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Connection(e) => SessionError::Connection(e),
            ServerError::Schema(e) => SessionError::Schema(e),
            ServerError::Write(e) => SessionError::Write(e),
            ServerError::Internal(message) => SessionError::Internal(message),
        }
    }
}
