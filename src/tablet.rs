use serde::{Deserialize, Serialize};

use crate::{error::WriteError, types::Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabletRow {
    pub timestamp: i64,
    pub values: Vec<Value>,
}

/// Rows of one device sharing a measurement list, written in one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tablet {
    device_id: String,
    measurements: Vec<String>,
    rows: Vec<TabletRow>,
}

impl Tablet {
    pub fn new<M>(device_id: impl Into<String>, measurements: impl IntoIterator<Item = M>) -> Self
    where
        M: Into<String>,
    {
        Self {
            device_id: device_id.into(),
            measurements: measurements.into_iter().map(Into::into).collect(),
            rows: vec![],
        }
    }

    pub fn add_row<V>(
        &mut self,
        timestamp: i64,
        values: impl IntoIterator<Item = V>,
    ) -> Result<(), WriteError>
    where
        V: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        if values.len() != self.measurements.len() {
            return Err(WriteError::ArityMismatch {
                measurements: self.measurements.len(),
                values: values.len(),
            });
        }
        self.rows.push(TabletRow { timestamp, values });
        Ok(())
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn measurements(&self) -> &[String] {
        &self.measurements
    }

    pub fn rows(&self) -> &[TabletRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn sort_by_timestamp(&mut self) {
        self.rows.sort_by_key(|row| row.timestamp);
    }

    pub fn into_rows(self) -> (String, Vec<String>, Vec<TabletRow>) {
        (self.device_id, self.measurements, self.rows)
    }
}
