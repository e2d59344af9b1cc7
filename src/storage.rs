use crate::{
    metric::{DataPoint, Row},
    partition::{
        memory::MemoryPartition, Boundary, Partition, PartitionError, PointPartitionOrdering,
    },
    window::{Bounds, InsertWindow},
};
use log::{debug, error};
use std::{
    num::TryFromIntError,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, RwLock, RwLockReadGuard,
    },
    thread::JoinHandle,
    time::Duration,
};
use thiserror::Error;

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub partition: PartitionConfig,
    // Insert window relative to the maximum timestamp in the database.
    // Points of any age are accepted when None and no partition limit is set.
    pub insert_bounds: Option<Bounds>,
    // Seconds between retention sweeps. No background sweeper when None.
    pub sweep_interval: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct PartitionConfig {
    // Number of most recent partitions that still accept writes. Every
    // partition is writable when None.
    pub hot_partitions: Option<usize>,
    // Maximum number of partitions to retain. The database will evict
    // partitions older than this. Nothing is evicted when None.
    pub max_partitions: Option<usize>,
    // The width of a partition, in milliseconds.
    pub duration: i64,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        // One hour partitions, all writable, kept forever.
        Self {
            hot_partitions: None,
            max_partitions: None,
            duration: 3_600_000,
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("hot_partitions is greater than max_partitions")]
    NumPartitionsError,
    #[error("insert window is larger than writable window")]
    InsertWindowError,
    #[error("hot partitions must be greater than zero to support writing data")]
    HotPartitionsError,
    #[error("max partitions must be greater than zero to retain data")]
    RetentionError,
    #[error("partition duration must be greater than zero")]
    DurationError,
    #[error("error converting writable_window to u64")]
    WritableWindowFormatError(TryFromIntError),
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let partition = &self.partition;
        if partition.hot_partitions == Some(0) {
            return Err(ConfigError::HotPartitionsError);
        }
        if partition.max_partitions == Some(0) {
            return Err(ConfigError::RetentionError);
        }
        if partition.duration <= 0 {
            return Err(ConfigError::DurationError);
        }
        if let (Some(hot), Some(max)) = (partition.hot_partitions, partition.max_partitions) {
            if hot > max {
                return Err(ConfigError::NumPartitionsError);
            }
        }
        if let (Some(past), Some(window)) = (
            self.insert_bounds.and_then(|bounds| bounds.past),
            self.writable_window()?,
        ) {
            if past > window {
                return Err(ConfigError::InsertWindowError);
            }
        }
        Ok(())
    }

    // Partitions that accept writes, counted from the newest. Retained
    // partitions are all writable unless hot_partitions says otherwise.
    fn writable_partitions(&self) -> Option<usize> {
        self.partition
            .hot_partitions
            .or(self.partition.max_partitions)
    }

    fn writable_window(&self) -> Result<Option<u64>, ConfigError> {
        let partitions = match self.writable_partitions() {
            Some(partitions) => partitions,
            None => return Ok(None),
        };
        let partitions =
            i64::try_from(partitions).map_err(ConfigError::WritableWindowFormatError)?;
        let window = u64::try_from(partitions.saturating_mul(self.partition.duration))
            .map_err(ConfigError::WritableWindowFormatError)?;
        Ok(Some(window))
    }
}

pub type StoragePartition = dyn Partition + Send + Sync;
pub type PartitionList = Vec<Box<StoragePartition>>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("error validating config")]
    InvalidConfig(#[from] ConfigError),
    #[error("data point inserted outside of storage insert window")]
    OutOfBounds,
    #[error("error inserting data point into partition")]
    FailedInsert(PartitionError),
    #[error("failed to get partition lock")]
    LockFailure,
    #[error("failed to get data from partition")]
    FailedSelect,
    #[error("storage is closed")]
    Closed,
}

/// Time-partitioned in-memory store for the points of every series.
pub struct Storage {
    inner: Arc<StorageInner>,
    shutdown: Arc<AtomicBool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Storage {
    pub fn new(config: Config) -> Result<Self, StorageError> {
        let sweep_interval = config.sweep_interval;

        let inner = Arc::new(StorageInner::new(config)?);
        let shutdown = Arc::new(AtomicBool::new(false));

        let sweeper = sweep_interval.map(|sweep_interval| {
            let inner = inner.clone();
            let shutdown = shutdown.clone();
            std::thread::spawn(move || loop {
                std::thread::park_timeout(Duration::from_secs(sweep_interval));
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = inner.remove_expired_partitions() {
                    error!("error removing expired partitions: {}", e);
                }
            })
        });

        Ok(Self {
            inner,
            shutdown,
            sweeper: Mutex::new(sweeper),
        })
    }

    pub fn insert(&self, row: &Row) -> Result<(), StorageError> {
        self.check_open()?;
        self.inner.insert(row)
    }

    pub fn select(&self, name: &str, start: i64, end: i64) -> Result<Vec<DataPoint>, StorageError> {
        self.check_open()?;
        self.inner.select(name, start, end)
    }

    pub fn delete(&self, name: &str, end: i64) -> Result<usize, StorageError> {
        self.check_open()?;
        self.inner.delete(name, end)
    }

    pub fn remove(&self, name: &str) -> Result<usize, StorageError> {
        self.check_open()?;
        self.inner.remove(name)
    }

    /// Whether `timestamp` would currently pass the insert window.
    pub fn accepts(&self, timestamp: i64) -> bool {
        self.inner.insert_window.contains(timestamp)
    }

    pub fn close(&self) -> Result<(), StorageError> {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let sweeper = match self.sweeper.lock() {
            Ok(mut sweeper) => sweeper.take(),
            Err(_) => return Err(StorageError::LockFailure),
        };
        if let Some(sweeper) = sweeper {
            sweeper.thread().unpark();
            if sweeper.join().is_err() {
                error!("retention sweeper panicked");
            }
        }
        self.inner.remove_expired_partitions()
    }

    fn check_open(&self) -> Result<(), StorageError> {
        match self.shutdown.load(Ordering::SeqCst) {
            true => Err(StorageError::Closed),
            false => Ok(()),
        }
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("error closing storage: {}", e);
        }
    }
}

struct StorageInner {
    // Sorted by time. Partitions never overlap.
    partitions: RwLock<PartitionList>,
    insert_window: InsertWindow,
    partition_config: PartitionConfig,
    writable_partitions: Option<usize>,
}

impl StorageInner {
    pub fn new(config: Config) -> Result<Self, StorageError> {
        config.validate()?;

        let default_past = config.writable_window()?;
        let insert_bounds = match config.insert_bounds {
            Some(bounds) => Bounds {
                past: bounds.past.or(default_past),
                future: bounds.future,
            },
            None => Bounds {
                past: default_past,
                future: None,
            },
        };

        Ok(Self {
            partitions: RwLock::new(vec![]),
            insert_window: InsertWindow::new(insert_bounds),
            writable_partitions: config.writable_partitions(),
            partition_config: config.partition,
        })
    }

    // Oldest partitions past the retention limit, not yet swept.
    fn expired(&self, partitions: &PartitionList) -> usize {
        match self.partition_config.max_partitions {
            Some(max) => partitions.len().saturating_sub(max),
            None => 0,
        }
    }

    pub fn select(&self, name: &str, start: i64, end: i64) -> Result<Vec<DataPoint>, StorageError> {
        match self.partitions.read() {
            Ok(partitions) => self.select_inner(partitions, name, start, end),
            Err(_) => Err(StorageError::LockFailure),
        }
    }

    fn select_inner(
        &self,
        partitions: RwLockReadGuard<PartitionList>,
        name: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<DataPoint>, StorageError> {
        let mut result = vec![];
        // Expired partitions that haven't been swept yet are ignored.
        let skip = self.expired(&partitions);
        for partition in partitions.iter().skip(skip) {
            let points = &mut partition
                .select(name, start, end)
                .map_err(|_| StorageError::FailedSelect)?;
            result.append(points);
        }
        Ok(result)
    }

    pub fn insert(&self, row: &Row) -> Result<(), StorageError> {
        if !self.insert_window.contains(row.data_point.timestamp) {
            return Err(StorageError::OutOfBounds);
        }
        self.insert_row(row)?;
        self.insert_window.update(row.data_point.timestamp);
        Ok(())
    }

    fn insert_row(&self, row: &Row) -> Result<(), StorageError> {
        match self.partitions.write().as_mut() {
            Ok(partitions) => self.insert_row_inner(partitions, row),
            Err(_) => Err(StorageError::LockFailure),
        }
    }

    fn insert_row_inner(&self, partitions: &mut PartitionList, row: &Row) -> Result<(), StorageError> {
        let timestamp = row.data_point.timestamp;
        let idx = partitions.partition_point(|p| p.boundary().max_timestamp() < timestamp);
        let existing = matches!(
            partitions.get(idx).map(|p| p.ordering(row)),
            Some(PointPartitionOrdering::Current)
        );

        if let Some(writable) = self.writable_partitions {
            let newer = partitions.len() - idx - usize::from(existing);
            if newer >= writable {
                // Older than every writable partition.
                debug!("no writable partition for data point {:?}", row);
                return Err(StorageError::OutOfBounds);
            }
        }

        if existing {
            return partitions[idx].insert(row).map_err(StorageError::FailedInsert);
        }
        let partition = MemoryPartition::new(Boundary::aligned(
            timestamp,
            self.partition_config.duration,
        ));
        partition.insert(row).map_err(StorageError::FailedInsert)?;
        debug!(
            "created partition starting at {}",
            partition.boundary().min_timestamp()
        );
        partitions.insert(idx, Box::new(partition));
        Ok(())
    }

    pub fn delete(&self, name: &str, end: i64) -> Result<usize, StorageError> {
        match self.partitions.read() {
            Ok(partitions) => Ok(partitions
                .iter()
                .map(|p| p.delete(name, end))
                .sum()),
            Err(_) => Err(StorageError::LockFailure),
        }
    }

    pub fn remove(&self, name: &str) -> Result<usize, StorageError> {
        match self.partitions.read() {
            Ok(partitions) => Ok(partitions.iter().map(|p| p.remove(name)).sum()),
            Err(_) => Err(StorageError::LockFailure),
        }
    }

    pub fn remove_expired_partitions(&self) -> Result<(), StorageError> {
        match self.partitions.write() {
            Ok(mut partitions) => {
                let expired = self.expired(&partitions);
                if expired > 0 {
                    debug!("removing {} expired partitions", expired);
                    partitions.drain(..expired);
                }
                Ok(())
            }
            Err(_) => Err(StorageError::LockFailure),
        }
    }
}

#[cfg(test)]
pub mod tests {
    use crate::{
        metric::{DataPoint, Row},
        storage::{ConfigError, PartitionConfig, StorageError},
        window::Bounds,
    };

    use super::{Config, Storage, StorageInner};

    const SERIES: &str = "root.sg1.d1.s1";

    fn insert_all(storage: &StorageInner, data_points: &[DataPoint]) {
        insert_all_series(storage, SERIES, data_points)
    }

    fn insert_all_series(storage: &StorageInner, series: &str, data_points: &[DataPoint]) {
        for data_point in data_points {
            storage
                .insert(&Row {
                    series,
                    data_point: data_point.clone(),
                })
                .unwrap();
        }
    }

    fn insert_err(storage: &StorageInner, data_point: DataPoint) -> Option<StorageError> {
        storage
            .insert(&Row {
                series: SERIES,
                data_point,
            })
            .err()
    }

    fn storage_with(duration: i64, hot_partitions: usize, max_partitions: usize) -> StorageInner {
        StorageInner::new(Config {
            partition: PartitionConfig {
                duration,
                hot_partitions: Some(hot_partitions),
                max_partitions: Some(max_partitions),
            },
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_storage_insert_multiple_partitions() {
        let storage = storage_with(2, 3, 3);

        let data_points = [
            DataPoint::new(0, 0i64), // start of 1st partition
            DataPoint::new(1, 1i64),
            DataPoint::new(2, 0i64), // start of 2nd partition
            DataPoint::new(3, 2i64),
            DataPoint::new(4, 1i64), // start of 3rd partition
            DataPoint::new(5, 2i64),
        ];
        insert_all(&storage, &data_points);
        assert_eq!(storage.partitions.read().unwrap().len(), 3);

        let result = storage.select(SERIES, 0, 7).unwrap();
        assert_eq!(result, data_points);
    }

    #[test]
    fn test_storage_insert_window() {
        let storage = StorageInner::new(Config {
            partition: PartitionConfig {
                duration: 100,
                hot_partitions: Some(2),
                max_partitions: Some(2),
            },
            insert_bounds: Some(Bounds {
                past: Some(5),
                future: None,
            }),
            ..Default::default()
        })
        .unwrap();

        let data_points = [
            DataPoint::new(10, 0i64),
            DataPoint::new(20, 1i64),
            DataPoint::new(15, 0i64), // Within insert window (20-15<=5)
        ];
        insert_all(&storage, &data_points);

        // Outside of insert window
        assert!(matches!(
            insert_err(&storage, DataPoint::new(14, 0i64)),
            Some(StorageError::OutOfBounds)
        ));

        let result = storage.select(SERIES, 0, 20).unwrap();
        assert_eq!(
            result,
            vec![
                data_points[0].clone(),
                data_points[2].clone(),
                data_points[1].clone()
            ]
        );
    }

    #[test]
    fn test_storage_insert_window_future() {
        let storage = StorageInner::new(Config {
            insert_bounds: Some(Bounds {
                past: None,
                future: Some(10),
            }),
            ..Default::default()
        })
        .unwrap();

        insert_all(&storage, &[DataPoint::new(10, 0i64), DataPoint::new(20, 1i64)]);
        // Outside of future bounds (31-20)>10
        assert!(matches!(
            insert_err(&storage, DataPoint::new(31, 0i64)),
            Some(StorageError::OutOfBounds)
        ));
        // No past bound configured.
        insert_all(&storage, &[DataPoint::new(-1_000_000, 2i64)]);
    }

    #[test]
    fn test_storage_default_keeps_everything() {
        let storage = StorageInner::new(Config::default()).unwrap();

        let data_points = [
            DataPoint::new(1_700_000_000_000, 2i64),
            DataPoint::new(0, 1i64),                 // days older, new partition
            DataPoint::new(1_600_000_000_000, 3i64), // in between
            DataPoint::new(i64::MAX, 4i64),
            DataPoint::new(i64::MIN, 5i64),
            DataPoint::new(i64::MAX - 1, 6i64), // same partition as i64::MAX
        ];
        insert_all(&storage, &data_points);
        assert_eq!(storage.partitions.read().unwrap().len(), 5);

        let mut expected = data_points.to_vec();
        expected.sort_by_key(|d| d.timestamp);
        assert_eq!(storage.select(SERIES, i64::MIN, i64::MAX).unwrap(), expected);

        // Nothing is swept without a retention limit.
        storage.remove_expired_partitions().unwrap();
        assert_eq!(storage.partitions.read().unwrap().len(), 5);
    }

    #[test]
    fn test_storage_partitions_sorted() {
        let storage = StorageInner::new(Config::default()).unwrap();
        for ts in [50_000_000, 10_000_000, 30_000_000, -10_000_000, 20_000_000] {
            insert_all(&storage, &[DataPoint::new(ts, ts)]);
        }
        let partitions = storage.partitions.read().unwrap();
        let mins: Vec<i64> = partitions.iter().map(|p| p.boundary().min_timestamp()).collect();
        assert_eq!(
            mins,
            vec![-10_800_000, 7_200_000, 18_000_000, 28_800_000, 46_800_000]
        );
    }

    #[test]
    fn test_storage_cold_partition() {
        let storage = storage_with(100, 1, 2);

        insert_all(&storage, &[DataPoint::new(10, 0i64), DataPoint::new(250, 1i64)]);
        // Only the newest partition takes writes.
        assert!(matches!(
            insert_err(&storage, DataPoint::new(150, 2i64)),
            Some(StorageError::OutOfBounds)
        ));
        insert_all(&storage, &[DataPoint::new(260, 3i64)]);

        let result = storage.select(SERIES, 0, 300).unwrap();
        assert_eq!(
            result,
            vec![
                DataPoint::new(10, 0i64),
                DataPoint::new(250, 1i64),
                DataPoint::new(260, 3i64)
            ]
        );
    }

    #[test]
    fn test_storage_insert_window_across_partitions() {
        let storage = storage_with(2, 2, 2);

        let data_points = [
            DataPoint::new(1, 0i64),
            DataPoint::new(2, 0i64), // start of 2nd partition
            DataPoint::new(1, 1i64), // overwrites in previous partition
        ];
        insert_all(&storage, &data_points);

        let result = storage.select(SERIES, 0, 20).unwrap();
        assert_eq!(
            result,
            vec![DataPoint::new(1, 1i64), DataPoint::new(2, 0i64)]
        );
    }

    #[test]
    fn test_storage_retention() {
        let storage = storage_with(10, 1, 1);

        insert_all(&storage, &[DataPoint::new(10, 1i64)]);
        let result = storage.select(SERIES, 0, 50).unwrap();
        assert_eq!(result, vec![DataPoint::new(10, 1i64)]);

        // start of 2nd partition, 1st will be marked as expired
        insert_all(&storage, &[DataPoint::new(20, 2i64)]);
        let result = storage.select(SERIES, 0, 50).unwrap();
        assert_eq!(result, vec![DataPoint::new(20, 2i64)]);

        assert_eq!(2, storage.partitions.read().unwrap().len());
        storage.remove_expired_partitions().unwrap();
        assert_eq!(1, storage.partitions.read().unwrap().len());

        // Ensure results are unchanged
        let result = storage.select(SERIES, 0, 50).unwrap();
        assert_eq!(result, vec![DataPoint::new(20, 2i64)]);
    }

    #[test]
    fn test_storage_partition_bounds() {
        let storage = storage_with(10, 3, 3);

        let data_points = [
            DataPoint::new(0, 0i64),  // start of 1st partition
            DataPoint::new(12, 0i64), // start of 2nd partition
            DataPoint::new(10, 1i64), // lands at the start of the 2nd partition
        ];
        insert_all(&storage, &data_points);
        assert_eq!(storage.partitions.read().unwrap().len(), 2);

        let result = storage.select(SERIES, 0, 20).unwrap();
        let mut expected = data_points.to_vec();
        expected.sort_by_key(|d| d.timestamp);
        assert_eq!(result, expected);
    }

    #[test]
    fn test_storage_sparse_partitions() {
        let storage = storage_with(10, 3, 3);

        let data_points = [
            DataPoint::new(0, 0i64),
            DataPoint::new(10, 0i64),
            DataPoint::new(95, 1i64), // gap is not materialized
        ];
        insert_all(&storage, &data_points);
        assert_eq!(storage.partitions.read().unwrap().len(), 3);
        assert_eq!(storage.select(SERIES, 0, 100).unwrap(), data_points);

        insert_all(&storage, &[DataPoint::new(200, 2i64)]);
        // select ignores expired partitions
        let result = storage.select(SERIES, 0, 300).unwrap();
        assert_eq!(
            result,
            vec![
                data_points[1].clone(),
                data_points[2].clone(),
                DataPoint::new(200, 2i64)
            ]
        );

        storage.remove_expired_partitions().unwrap();
        assert_eq!(storage.partitions.read().unwrap().len(), 3);
        assert_eq!(
            storage.partitions.read().unwrap()[0].boundary().min_timestamp(),
            10
        );
    }

    #[test]
    fn test_storage_delete() {
        let storage = storage_with(10, 3, 3);
        let data_points: Vec<DataPoint> = (0..30).map(|ts| DataPoint::new(ts, ts)).collect();
        insert_all(&storage, &data_points);
        insert_all_series(&storage, "root.sg1.d1.s2", &data_points);

        // Spans two partitions.
        assert_eq!(storage.delete(SERIES, 14).unwrap(), 15);
        assert_eq!(storage.select(SERIES, 0, 100).unwrap(), data_points[15..]);
        // Other series untouched.
        assert_eq!(
            storage.select("root.sg1.d1.s2", 0, 100).unwrap(),
            data_points
        );

        assert_eq!(storage.remove("root.sg1.d1.s2").unwrap(), 30);
        assert!(storage.select("root.sg1.d1.s2", 0, 100).unwrap().is_empty());
    }

    #[test]
    fn test_storage_closed() {
        let storage = Storage::new(Config {
            sweep_interval: Some(60),
            ..Default::default()
        })
        .unwrap();
        storage
            .insert(&Row {
                series: SERIES,
                data_point: DataPoint::new(0, 1i64),
            })
            .unwrap();
        storage.close().unwrap();
        // Closing twice is harmless.
        storage.close().unwrap();

        assert!(matches!(
            storage.select(SERIES, 0, 10),
            Err(StorageError::Closed)
        ));
        assert!(matches!(
            storage.insert(&Row {
                series: SERIES,
                data_point: DataPoint::new(1, 1i64),
            }),
            Err(StorageError::Closed)
        ));
    }

    #[test]
    fn test_default_config_is_unbounded() {
        let config = Config::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.writable_partitions(), None);
        assert_eq!(config.writable_window(), Ok(None));
    }

    #[test]
    fn test_invalid_config_no_hot_partitions() {
        let config = Config {
            partition: PartitionConfig {
                duration: 10,
                hot_partitions: Some(0),
                max_partitions: None,
            },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::HotPartitionsError)
        ));

        let config = Config {
            partition: PartitionConfig {
                duration: 10,
                hot_partitions: None,
                max_partitions: Some(0),
            },
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::RetentionError)));
    }

    #[test]
    fn test_invalid_config_writable_window() {
        let config = Config {
            partition: PartitionConfig {
                duration: 10,
                hot_partitions: Some(10),
                max_partitions: Some(10),
            },
            insert_bounds: Some(Bounds {
                past: Some(200),
                future: None,
            }),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InsertWindowError)
        ));

        // Any past bound is fine when every partition is writable.
        let config = Config {
            insert_bounds: Some(Bounds {
                past: Some(u64::MAX),
                future: None,
            }),
            ..Default::default()
        };
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_invalid_config_partitions() {
        let config = Config {
            partition: PartitionConfig {
                duration: 10,
                hot_partitions: Some(10),
                max_partitions: Some(9),
            },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NumPartitionsError)
        ));

        let config = Config {
            partition: PartitionConfig {
                duration: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::DurationError)));
    }
}
