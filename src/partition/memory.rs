use crate::metric::{DataPoint, Row};
use anyhow::Result;

use super::{Boundary, Partition, PartitionError, PointPartitionOrdering};

#[derive(Debug)]
pub struct MemoryPartition {
    pub map: dashmap::DashMap<String, SeriesEntry>,
    partition_boundary: Boundary,
}

impl Partition for MemoryPartition {
    fn select(&self, name: &str, start: i64, end: i64) -> Result<Vec<DataPoint>> {
        Ok(match self.partition_boundary.contains_range(start, end) {
            true => match self.map.get(name) {
                Some(entry) => entry.select(start, end),
                None => vec![],
            },
            false => vec![],
        })
    }

    fn insert(&self, row: &Row) -> Result<(), PartitionError> {
        let timestamp = row.data_point.timestamp;
        if !self.partition_boundary.contains_point(timestamp) {
            return Err(PartitionError::OutOfBounds(timestamp));
        }
        match self.map.get_mut(row.series) {
            Some(mut entry) => entry.insert(row.data_point.clone()),
            None => {
                self.map.insert(
                    row.series.to_string(),
                    SeriesEntry::new(row.data_point.clone()),
                );
            }
        };
        Ok(())
    }

    fn delete(&self, name: &str, end: i64) -> usize {
        if end < self.partition_boundary.min_timestamp() {
            return 0;
        }
        let deleted = match self.map.get_mut(name) {
            Some(mut entry) => entry.delete(end),
            None => 0,
        };
        self.map.remove_if(name, |_, entry| entry.data_points.is_empty());
        deleted
    }

    fn remove(&self, name: &str) -> usize {
        self.map
            .remove(name)
            .map(|(_, entry)| entry.data_points.len())
            .unwrap_or(0)
    }

    fn ordering(&self, row: &Row) -> PointPartitionOrdering {
        self.partition_boundary.ordering(row.data_point.timestamp)
    }

    fn boundary(&self) -> Boundary {
        self.partition_boundary
    }
}

impl MemoryPartition {
    pub fn new(partition_boundary: Boundary) -> Self {
        Self {
            map: dashmap::DashMap::new(),
            partition_boundary,
        }
    }
}

/// Points of one series, sorted by timestamp with at most one point per
/// timestamp.
#[derive(Debug)]
pub struct SeriesEntry {
    pub data_points: Vec<DataPoint>,
}

impl SeriesEntry {
    pub fn new(data_point: DataPoint) -> Self {
        Self {
            data_points: vec![data_point],
        }
    }

    pub fn select(&self, start: i64, end: i64) -> Vec<DataPoint> {
        let (first, last) = match (self.data_points.first(), self.data_points.last()) {
            (Some(first), Some(last)) => (first.timestamp, last.timestamp),
            _ => return vec![],
        };
        if first > end || last < start {
            // Out of range
            return vec![];
        }

        let start_idx = self.data_points.partition_point(|dp| dp.timestamp < start);
        let end_idx = self.data_points.partition_point(|dp| dp.timestamp <= end);
        self.data_points[start_idx..end_idx].to_vec()
    }

    pub fn insert(&mut self, data_point: DataPoint) {
        match self.data_points.last() {
            Some(last) if data_point.timestamp > last.timestamp => self.data_points.push(data_point),
            None => self.data_points.push(data_point),
            Some(_) => {
                // Out-of-order insert, or an overwrite of an existing timestamp.
                match self
                    .data_points
                    .binary_search_by_key(&data_point.timestamp, |d| d.timestamp)
                {
                    Ok(pos) => self.data_points[pos] = data_point,
                    Err(pos) => self.data_points.insert(pos, data_point),
                }
            }
        }
    }

    pub fn delete(&mut self, end: i64) -> usize {
        let idx = self.data_points.partition_point(|dp| dp.timestamp <= end);
        self.data_points.drain(..idx).count()
    }
}
