use serde::{Deserialize, Serialize};

use crate::types::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub timestamp: i64,
    pub value: Value,
}

impl DataPoint {
    pub fn new(timestamp: i64, value: impl Into<Value>) -> Self {
        Self {
            timestamp,
            value: value.into(),
        }
    }
}

/// A point addressed to one timeseries, keyed by its full path.
#[derive(Debug)]
pub struct Row<'a> {
    pub series: &'a str,
    pub data_point: DataPoint,
}
