use crate::metric::{DataPoint, Row};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod memory;

pub trait Partition {
    /// Points of `name` with `start <= timestamp <= end`, oldest first.
    fn select(&self, name: &str, start: i64, end: i64) -> Result<Vec<DataPoint>>;
    fn insert(&self, row: &Row) -> Result<(), PartitionError>;
    /// Drops the points of `name` with `timestamp <= end`, returning how many went.
    fn delete(&self, name: &str, end: i64) -> usize;
    /// Drops every point of `name`, returning how many went.
    fn remove(&self, name: &str) -> usize;
    fn ordering(&self, row: &Row) -> PointPartitionOrdering;
    fn boundary(&self) -> Boundary;
}

#[derive(Error, Debug, PartialEq)]
pub enum PartitionError {
    #[error("data point at {0} inserted outside of partition boundary")]
    OutOfBounds(i64),
}

// Whether a point belongs in a particular partition, or in a later
// one (future) or an earlier one (past).
#[derive(Debug, PartialEq)]
pub enum PointPartitionOrdering {
    Current,
    Future,
    Past,
}

/// Time range covered by a partition. Both ends are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Boundary {
    min_timestamp: i64,
    max_timestamp: i64,
}

fn clamp(timestamp: i128) -> i64 {
    timestamp.clamp(i64::MIN.into(), i64::MAX.into()) as i64
}

impl Boundary {
    /// The `duration`-wide slot holding `timestamp`, aligned on multiples
    /// of `duration`. Slots at either end of the i64 range are clipped.
    pub fn aligned(timestamp: i64, duration: i64) -> Self {
        let duration = i128::from(duration.max(1));
        let timestamp = i128::from(timestamp);
        let floor = timestamp - timestamp.rem_euclid(duration);
        Self {
            min_timestamp: clamp(floor),
            max_timestamp: clamp(floor + duration - 1),
        }
    }

    fn contains_range(&self, start: i64, end: i64) -> bool {
        !(start > self.max_timestamp || end < self.min_timestamp)
    }

    fn contains_point(&self, timestamp: i64) -> bool {
        timestamp >= self.min_timestamp && timestamp <= self.max_timestamp
    }

    fn ordering(&self, timestamp: i64) -> PointPartitionOrdering {
        if timestamp < self.min_timestamp {
            return PointPartitionOrdering::Past;
        }

        if timestamp > self.max_timestamp {
            return PointPartitionOrdering::Future;
        }

        PointPartitionOrdering::Current
    }

    pub fn min_timestamp(&self) -> i64 {
        self.min_timestamp
    }

    pub fn max_timestamp(&self) -> i64 {
        self.max_timestamp
    }
}

#[cfg(test)]
pub mod tests {
    use super::{Boundary, PointPartitionOrdering};

    #[test]
    fn test_partition_boundary() {
        let boundaries = Boundary::aligned(1500, 1000);
        assert_eq!(boundaries.min_timestamp(), 1000);
        assert_eq!(boundaries.max_timestamp(), 1999);
        assert!(boundaries.contains_range(1500, 1800));
        assert!(boundaries.contains_range(0, 3000));
        assert!(boundaries.contains_range(1999, 2000));

        assert!(!boundaries.contains_range(2000, 2001));
        assert!(!boundaries.contains_range(0, 999));
    }

    #[test]
    fn test_boundary_ordering() {
        let boundaries = Boundary::aligned(1000, 1000);
        assert_eq!(boundaries.ordering(999), PointPartitionOrdering::Past);
        assert_eq!(boundaries.ordering(1000), PointPartitionOrdering::Current);
        assert_eq!(boundaries.ordering(1999), PointPartitionOrdering::Current);
        assert_eq!(boundaries.ordering(2000), PointPartitionOrdering::Future);
    }

    #[test]
    fn test_boundary_negative_timestamps() {
        let boundaries = Boundary::aligned(-1, 1000);
        assert_eq!(boundaries.min_timestamp(), -1000);
        assert_eq!(boundaries.max_timestamp(), -1);
        assert!(boundaries.contains_point(-1000));
        assert!(!boundaries.contains_point(0));
    }

    #[test]
    fn test_boundary_extremes() {
        let last = Boundary::aligned(i64::MAX, 3_600_000);
        assert_eq!(last.max_timestamp(), i64::MAX);
        assert!(last.contains_point(i64::MAX));
        assert_eq!(last.ordering(i64::MAX), PointPartitionOrdering::Current);

        let first = Boundary::aligned(i64::MIN, 3_600_000);
        assert_eq!(first.min_timestamp(), i64::MIN);
        assert!(first.contains_point(i64::MIN));
        assert!(first.max_timestamp() < Boundary::aligned(0, 3_600_000).min_timestamp());
    }
}
