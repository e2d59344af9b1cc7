use serde::{Deserialize, Serialize};

use crate::{
    config::Endpoint,
    error::{ConnectionError, ServerError},
    metric::DataPoint,
    path::Path,
    schema::TimeseriesSchema,
    tablet::Tablet,
    types::{CompressionType, TSDataType, TSEncoding, Value},
};

/// Requests a session sends to its server. Paths travel as plain strings
/// and are validated by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    SetStorageGroup {
        path: String,
    },
    DeleteStorageGroups {
        paths: Vec<String>,
    },
    CreateTimeseries {
        path: String,
        data_type: TSDataType,
        encoding: TSEncoding,
        compression: CompressionType,
    },
    DeleteTimeseries {
        paths: Vec<String>,
    },
    Insert {
        device_id: String,
        timestamp: i64,
        measurements: Vec<String>,
        values: Vec<Value>,
    },
    InsertTablet(Tablet),
    DeleteData {
        paths: Vec<String>,
        end_time: i64,
    },
    ShowStorageGroups,
    ShowTimeseries {
        pattern: String,
    },
    CheckTimeseriesExists {
        path: String,
    },
    Select {
        path: String,
        start: i64,
        end: i64,
    },
    Version,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Deleted(usize),
    StorageGroups(Vec<Path>),
    Timeseries(Vec<TimeseriesSchema>),
    Exists(bool),
    DataPoints(Vec<DataPoint>),
    Version(String),
}

/// Opens connections to a database server.
pub trait Transport: Send + Sync {
    fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, ConnectionError>;
}

/// One open, authenticated connection. Every call blocks until the server
/// answers.
pub trait Connection: Send {
    fn call(&mut self, request: Request) -> Result<Response, ServerError>;
    fn close(&mut self) -> Result<(), ConnectionError>;
}
