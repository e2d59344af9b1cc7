use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::{
    error::SchemaError,
    path::Path,
    types::{CompressionType, TSDataType, TSEncoding},
};

/// Definition of one declared timeseries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeseriesSchema {
    pub path: Path,
    pub storage_group: Path,
    pub data_type: TSDataType,
    pub encoding: TSEncoding,
    pub compression: CompressionType,
}

impl TimeseriesSchema {
    fn same_definition(&self, other: &TimeseriesSchema) -> bool {
        self.data_type == other.data_type
            && self.encoding == other.encoding
            && self.compression == other.compression
    }
}

#[derive(Default)]
struct Tree {
    storage_groups: BTreeSet<Path>,
    timeseries: BTreeMap<Path, TimeseriesSchema>,
}

/// Storage groups and timeseries declared on a server.
#[derive(Default)]
pub struct SchemaRegistry {
    tree: RwLock<Tree>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned lock only means a writer panicked; the maps themselves are
    // always left consistent, so keep serving them.
    fn read(&self) -> RwLockReadGuard<Tree> {
        self.tree.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<Tree> {
        self.tree.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Declares a storage group. Returns false if it was already declared.
    pub fn set_storage_group(&self, path: &str) -> Result<bool, SchemaError> {
        let path = Path::parse(path)?;
        if path.depth() < 2 {
            return Err(SchemaError::MalformedPath {
                path: path.to_string(),
                reason: "a storage group needs at least one node below root".to_string(),
            });
        }

        let mut tree = self.write();
        if tree.storage_groups.contains(&path) {
            return Ok(false);
        }
        if let Some(existing) = tree
            .storage_groups
            .iter()
            .find(|sg| sg.is_prefix_of(&path) || path.is_prefix_of(sg))
        {
            return Err(SchemaError::StorageGroupOverlap {
                path: path.to_string(),
                existing: existing.to_string(),
            });
        }
        tree.storage_groups.insert(path);
        Ok(true)
    }

    /// Removes storage groups and everything declared under them, returning
    /// the timeseries that went with them. Nothing is removed unless every
    /// group exists.
    pub fn delete_storage_groups(&self, paths: &[String]) -> Result<Vec<Path>, SchemaError> {
        let paths = paths
            .iter()
            .map(|p| Path::parse(p))
            .collect::<Result<Vec<_>, _>>()?;

        let mut tree = self.write();
        if let Some(missing) = paths.iter().find(|p| !tree.storage_groups.contains(*p)) {
            return Err(SchemaError::StorageGroupNotFound(missing.to_string()));
        }

        let mut removed = vec![];
        for path in &paths {
            tree.storage_groups.remove(path);
            let series: Vec<Path> = tree
                .timeseries
                .values()
                .filter(|ts| ts.storage_group == *path)
                .map(|ts| ts.path.clone())
                .collect();
            for s in &series {
                tree.timeseries.remove(s);
            }
            removed.extend(series);
        }
        Ok(removed)
    }

    /// Declares a timeseries. Returns false if an identical one was
    /// already declared.
    pub fn create_timeseries(
        &self,
        path: &str,
        data_type: TSDataType,
        encoding: TSEncoding,
        compression: CompressionType,
    ) -> Result<bool, SchemaError> {
        let path = Path::parse(path)?;
        if !data_type.supports(encoding) {
            return Err(SchemaError::UnsupportedEncoding {
                data_type,
                encoding,
            });
        }

        let mut tree = self.write();
        let storage_group = match tree
            .storage_groups
            .iter()
            .find(|sg| sg.is_prefix_of(&path))
        {
            Some(sg) if *sg == path => {
                return Err(SchemaError::PathConflict {
                    path: path.to_string(),
                    existing: sg.to_string(),
                })
            }
            Some(sg) => sg.clone(),
            None => return Err(SchemaError::NoStorageGroup(path.to_string())),
        };

        let schema = TimeseriesSchema {
            path: path.clone(),
            storage_group,
            data_type,
            encoding,
            compression,
        };
        if let Some(existing) = tree.timeseries.get(&path) {
            return match existing.same_definition(&schema) {
                true => Ok(false),
                false => Err(SchemaError::ConflictingTimeseries(path.to_string())),
            };
        }
        // A node is either a measurement or a device, never both.
        if let Some(existing) = tree
            .timeseries
            .keys()
            .find(|ts| ts.is_prefix_of(&path) || path.is_prefix_of(ts))
        {
            return Err(SchemaError::PathConflict {
                path: path.to_string(),
                existing: existing.to_string(),
            });
        }

        tree.timeseries.insert(path, schema);
        Ok(true)
    }

    /// Removes timeseries definitions. Nothing is removed unless every path
    /// is a declared timeseries.
    pub fn delete_timeseries(&self, paths: &[String]) -> Result<Vec<Path>, SchemaError> {
        let paths = paths
            .iter()
            .map(|p| Path::parse(p))
            .collect::<Result<Vec<_>, _>>()?;

        let mut tree = self.write();
        if let Some(missing) = paths.iter().find(|p| !tree.timeseries.contains_key(*p)) {
            return Err(SchemaError::TimeseriesNotFound(missing.to_string()));
        }
        for path in &paths {
            tree.timeseries.remove(path);
        }
        Ok(paths)
    }

    pub fn get(&self, path: &Path) -> Option<TimeseriesSchema> {
        self.read().timeseries.get(path).cloned()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.read().timeseries.contains_key(path)
    }

    pub fn storage_groups(&self) -> Vec<Path> {
        self.read().storage_groups.iter().cloned().collect()
    }

    /// Every timeseries selected by `pattern`, sorted by path.
    pub fn show_timeseries(&self, pattern: &str) -> Result<Vec<TimeseriesSchema>, SchemaError> {
        let pattern = Path::parse_pattern(pattern)?;
        Ok(self
            .read()
            .timeseries
            .values()
            .filter(|ts| pattern.matches(&ts.path))
            .cloned()
            .collect())
    }
}
