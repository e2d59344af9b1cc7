use chrono::{serde::ts_seconds, DateTime, Utc};
use dashmap::DashMap;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
};
use thiserror::Error;

use crate::{
    config::{ConfigError, Endpoint, DEFAULT_HOST, DEFAULT_PASSWORD, DEFAULT_PORT, DEFAULT_USER},
    error::{ConnectionError, SchemaError, ServerError, WriteError},
    metric::{DataPoint, Row},
    path::Path,
    schema::SchemaRegistry,
    storage::{self, Storage, StorageError},
    tablet::{Tablet, TabletRow},
    transport::{Connection, Request, Response, Transport},
    types::Value,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    // Username to password.
    pub users: HashMap<String, String>,
    pub storage: storage::Config,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            users: HashMap::from([(DEFAULT_USER.to_string(), DEFAULT_PASSWORD.to_string())]),
            storage: storage::Config::default(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.users.is_empty() {
            return Err(ConfigError::NoUsers);
        }
        if self.users.keys().any(|user| user.is_empty()) {
            return Err(ConfigError::EmptyUsername);
        }
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Error, Debug)]
pub enum StartError {
    #[error("invalid server config")]
    Config(#[from] ConfigError),
    #[error("failed to open storage")]
    Storage(#[from] StorageError),
}

/// A session the server has accepted and not yet released.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: u64,
    pub username: String,
    #[serde(with = "ts_seconds")]
    pub opened_at: DateTime<Utc>,
}

/// An in-process database server, reachable through [`Transport`].
///
/// Clones share the same server.
#[derive(Clone)]
pub struct EmbeddedServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    address: String,
    users: HashMap<String, String>,
    schema: SchemaRegistry,
    storage: Storage,
    // Held shared while a request checks the schema and then touches
    // storage, exclusively while series are dropped from both.
    series_lock: RwLock<()>,
    sessions: DashMap<u64, SessionInfo>,
    next_session_id: AtomicU64,
    running: AtomicBool,
}

impl EmbeddedServer {
    pub fn start(config: ServerConfig) -> Result<Self, StartError> {
        config.validate()?;
        let address = config.address();
        let storage = Storage::new(config.storage)?;
        info!("embedded server listening on {}", address);
        Ok(Self {
            inner: Arc::new(ServerInner {
                address,
                users: config.users,
                schema: SchemaRegistry::new(),
                storage,
                series_lock: RwLock::new(()),
                sessions: DashMap::new(),
                next_session_id: AtomicU64::new(1),
                running: AtomicBool::new(true),
            }),
        })
    }

    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }

    /// Stops accepting connections. Connections still open are lost.
    pub fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let dropped = self.inner.sessions.len();
        self.inner.sessions.clear();
        if let Err(e) = self.inner.storage.close() {
            warn!("error closing storage: {}", e);
        }
        info!(
            "embedded server on {} shut down, {} sessions dropped",
            self.inner.address, dropped
        );
    }
}

impl Transport for EmbeddedServer {
    fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, ConnectionError> {
        if !self.is_running() || endpoint.address() != self.inner.address {
            return Err(ConnectionError::Unreachable(endpoint.address()));
        }
        match self.inner.users.get(endpoint.username()) {
            Some(password) if password == endpoint.password() => {}
            _ => {
                warn!("rejected login for user {}", endpoint.username());
                return Err(ConnectionError::Authentication(
                    endpoint.username().to_string(),
                ));
            }
        }

        let id = self.inner.next_session_id.fetch_add(1, Ordering::SeqCst);
        self.inner.sessions.insert(
            id,
            SessionInfo {
                id,
                username: endpoint.username().to_string(),
                opened_at: Utc::now(),
            },
        );
        info!("session {} opened by {}", id, endpoint.username());
        Ok(Box::new(EmbeddedConnection {
            server: self.inner.clone(),
            session_id: id,
        }))
    }
}

struct EmbeddedConnection {
    server: Arc<ServerInner>,
    session_id: u64,
}

impl Connection for EmbeddedConnection {
    fn call(&mut self, request: Request) -> Result<Response, ServerError> {
        if !self.server.running.load(Ordering::SeqCst)
            || !self.server.sessions.contains_key(&self.session_id)
        {
            return Err(ConnectionError::Lost(self.server.address.clone()).into());
        }
        debug!("session {}: {:?}", self.session_id, request);
        self.server.handle(request)
    }

    fn close(&mut self) -> Result<(), ConnectionError> {
        if self.server.sessions.remove(&self.session_id).is_some() {
            info!("session {} closed", self.session_id);
        }
        Ok(())
    }
}

fn storage_error(timestamp: i64, err: StorageError) -> WriteError {
    match err {
        StorageError::OutOfBounds => WriteError::OutOfWindow(timestamp),
        err => WriteError::Storage(err.to_string()),
    }
}

fn write_path(path: &str) -> Result<Path, WriteError> {
    Path::parse(path).map_err(|_| WriteError::MalformedPath(path.to_string()))
}

impl ServerInner {
    fn handle(&self, request: Request) -> Result<Response, ServerError> {
        match request {
            Request::SetStorageGroup { path } => {
                if self.schema.set_storage_group(&path)? {
                    info!("storage group {} set", path);
                }
                Ok(Response::Ok)
            }
            Request::DeleteStorageGroups { paths } => {
                let _guard = self.series_write()?;
                let removed = self.schema.delete_storage_groups(&paths)?;
                self.remove_series(&removed)?;
                info!("storage groups {:?} deleted", paths);
                Ok(Response::Ok)
            }
            Request::CreateTimeseries {
                path,
                data_type,
                encoding,
                compression,
            } => {
                if self
                    .schema
                    .create_timeseries(&path, data_type, encoding, compression)?
                {
                    info!(
                        "timeseries {} created ({}, {}, {})",
                        path, data_type, encoding, compression
                    );
                }
                Ok(Response::Ok)
            }
            Request::DeleteTimeseries { paths } => {
                let _guard = self.series_write()?;
                let removed = self.schema.delete_timeseries(&paths)?;
                self.remove_series(&removed)?;
                Ok(Response::Ok)
            }
            Request::Insert {
                device_id,
                timestamp,
                measurements,
                values,
            } => {
                let _guard = self.series_read()?;
                let points = self.resolve_row(&device_id, timestamp, &measurements, values)?;
                self.write_points(points)?;
                Ok(Response::Ok)
            }
            Request::InsertTablet(tablet) => {
                let _guard = self.series_read()?;
                self.insert_tablet(tablet)?;
                Ok(Response::Ok)
            }
            Request::DeleteData { paths, end_time } => {
                let _guard = self.series_read()?;
                Ok(Response::Deleted(self.delete_data(&paths, end_time)?))
            }
            Request::ShowStorageGroups => Ok(Response::StorageGroups(self.schema.storage_groups())),
            Request::ShowTimeseries { pattern } => {
                Ok(Response::Timeseries(self.schema.show_timeseries(&pattern)?))
            }
            Request::CheckTimeseriesExists { path } => {
                Ok(Response::Exists(self.schema.contains(&Path::parse(&path)?)))
            }
            Request::Select { path, start, end } => {
                let path = Path::parse(&path)?;
                let _guard = self.series_read()?;
                if !self.schema.contains(&path) {
                    return Err(SchemaError::TimeseriesNotFound(path.to_string()).into());
                }
                let points = self
                    .storage
                    .select(path.as_str(), start, end)
                    .map_err(|e| ServerError::Internal(e.to_string()))?;
                Ok(Response::DataPoints(points))
            }
            Request::Version => Ok(Response::Version(VERSION.to_string())),
        }
    }

    fn series_read(&self) -> Result<RwLockReadGuard<'_, ()>, ServerError> {
        self.series_lock
            .read()
            .map_err(|_| ServerError::Internal("series lock poisoned".to_string()))
    }

    fn series_write(&self) -> Result<RwLockWriteGuard<'_, ()>, ServerError> {
        self.series_lock
            .write()
            .map_err(|_| ServerError::Internal("series lock poisoned".to_string()))
    }

    /// Checks a row against the schema and converts its values to the
    /// declared types, yielding one point per measurement.
    fn resolve_row(
        &self,
        device_id: &str,
        timestamp: i64,
        measurements: &[String],
        values: Vec<Value>,
    ) -> Result<Vec<(Path, DataPoint)>, WriteError> {
        if measurements.len() != values.len() {
            return Err(WriteError::ArityMismatch {
                measurements: measurements.len(),
                values: values.len(),
            });
        }
        if measurements.is_empty() {
            return Err(WriteError::EmptyRow);
        }

        let device = write_path(device_id)?;
        let mut seen = HashSet::new();
        let mut points = Vec::with_capacity(measurements.len());
        for (measurement, value) in measurements.iter().zip(values) {
            if !seen.insert(measurement.as_str()) {
                return Err(WriteError::DuplicateMeasurement(measurement.clone()));
            }
            let series = device
                .child(measurement)
                .map_err(|_| WriteError::MalformedPath(format!("{}.{}", device, measurement)))?;
            let schema = self
                .schema
                .get(&series)
                .ok_or_else(|| WriteError::UndeclaredTimeseries(series.to_string()))?;
            let value = value.coerce(series.as_str(), schema.data_type)?;
            points.push((series, DataPoint { timestamp, value }));
        }
        Ok(points)
    }

    fn write_points(&self, points: Vec<(Path, DataPoint)>) -> Result<(), WriteError> {
        for (series, data_point) in points {
            let timestamp = data_point.timestamp;
            self.storage
                .insert(&Row {
                    series: series.as_str(),
                    data_point,
                })
                .map_err(|e| storage_error(timestamp, e))?;
        }
        Ok(())
    }

    fn insert_tablet(&self, mut tablet: Tablet) -> Result<(), WriteError> {
        tablet.sort_by_timestamp();
        let (device_id, measurements, rows) = tablet.into_rows();

        // Validate every row before writing any of them.
        let mut points = Vec::with_capacity(rows.len() * measurements.len());
        for TabletRow { timestamp, values } in rows {
            if !self.storage.accepts(timestamp) {
                return Err(WriteError::OutOfWindow(timestamp));
            }
            points.extend(self.resolve_row(&device_id, timestamp, &measurements, values)?);
        }
        let count = points.len();
        self.write_points(points)?;
        debug!("tablet for {} wrote {} points", device_id, count);
        Ok(())
    }

    fn delete_data(&self, paths: &[String], end_time: i64) -> Result<usize, WriteError> {
        let series = paths
            .iter()
            .map(|p| write_path(p))
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(missing) = series.iter().find(|s| !self.schema.contains(s)) {
            return Err(WriteError::UndeclaredTimeseries(missing.to_string()));
        }

        let mut deleted = 0;
        for s in &series {
            deleted += self
                .storage
                .delete(s.as_str(), end_time)
                .map_err(|e| WriteError::Storage(e.to_string()))?;
        }
        debug!("deleted {} points up to {}", deleted, end_time);
        Ok(deleted)
    }

    fn remove_series(&self, series: &[Path]) -> Result<(), ServerError> {
        for s in series {
            self.storage
                .remove(s.as_str())
                .map_err(|e| ServerError::Internal(e.to_string()))?;
        }
        Ok(())
    }
}
