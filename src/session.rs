use log::{debug, info, warn};
use std::collections::HashSet;

use crate::{
    config::Config,
    error::{SessionError, StateError, WriteError},
    metric::DataPoint,
    path::Path,
    schema::TimeseriesSchema,
    tablet::Tablet,
    transport::{Connection, Request, Response, Transport},
    types::{CompressionType, TSDataType, TSEncoding, Value},
};

enum State {
    Idle,
    Open(Box<dyn Connection>),
    Closed,
}

/// One logical connection to a database endpoint.
///
/// A session must be opened before use and cannot be reopened once closed.
/// Dropping an open session closes its connection, and [`Session::scoped`]
/// closes it on every exit path of a closure.
///
/// ```ignore
/// let server = EmbeddedServer::start(ServerConfig::default())?;
/// let mut session = Session::connect(Config::default(), server)?;
/// session.set_storage_group("root.sg1")?;
/// session.create_timeseries("root.sg1.d1.s1", TSDataType::Int64, TSEncoding::Rle, CompressionType::Snappy)?;
/// session.insert("root.sg1.d1", 0, &["s1"], ["1"])?;
/// session.close()?;
/// ```
pub struct Session {
    config: Config,
    transport: Box<dyn Transport>,
    state: State,
}

impl Session {
    pub fn new(config: Config, transport: impl Transport + 'static) -> Result<Self, SessionError> {
        config.validate()?;
        Ok(Self {
            config,
            transport: Box::new(transport),
            state: State::Idle,
        })
    }

    /// Builds a session and opens it.
    pub fn connect(config: Config, transport: impl Transport + 'static) -> Result<Self, SessionError> {
        let mut session = Self::new(config, transport)?;
        session.open()?;
        Ok(session)
    }

    /// Opens a session, hands it to `f`, and closes it afterwards whether or
    /// not `f` succeeded.
    pub fn scoped<T, E, F>(
        config: Config,
        transport: impl Transport + 'static,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&mut Session) -> Result<T, E>,
        E: From<SessionError>,
    {
        let mut session = Session::connect(config, transport)?;
        let result = f(&mut session);
        if !session.is_open() {
            return result;
        }
        match result {
            Ok(value) => {
                session.close()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(close_err) = session.close() {
                    warn!("error closing session after failure: {}", close_err);
                }
                Err(e)
            }
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, State::Open(_))
    }

    pub fn open(&mut self) -> Result<(), SessionError> {
        match self.state {
            State::Idle => {}
            State::Open(_) => return Err(StateError::AlreadyOpen.into()),
            State::Closed => return Err(StateError::Closed.into()),
        }
        let endpoint = &self.config.endpoint;
        let connection = self.transport.connect(endpoint)?;
        info!(
            "session opened to {} as {}",
            endpoint.address(),
            endpoint.username()
        );
        self.state = State::Open(connection);
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), SessionError> {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Open(mut connection) => {
                connection.close()?;
                info!("session to {} closed", self.config.endpoint.address());
                Ok(())
            }
            State::Idle => {
                self.state = State::Idle;
                Err(StateError::NotOpen.into())
            }
            State::Closed => Err(StateError::Closed.into()),
        }
    }

    fn connection(&mut self) -> Result<&mut Box<dyn Connection>, StateError> {
        match &mut self.state {
            State::Open(connection) => Ok(connection),
            State::Idle => Err(StateError::NotOpen),
            State::Closed => Err(StateError::Closed),
        }
    }

    fn call(&mut self, request: Request) -> Result<Response, SessionError> {
        let connection = self.connection()?;
        debug!("sending {:?}", request);
        Ok(connection.call(request)?)
    }

    fn call_ok(&mut self, request: Request) -> Result<(), SessionError> {
        match self.call(request)? {
            Response::Ok | Response::Deleted(_) => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub fn set_storage_group(&mut self, path: &str) -> Result<(), SessionError> {
        self.call_ok(Request::SetStorageGroup {
            path: path.to_string(),
        })
    }

    pub fn delete_storage_group(&mut self, path: &str) -> Result<(), SessionError> {
        self.delete_storage_groups(&[path])
    }

    pub fn delete_storage_groups<P: AsRef<str>>(&mut self, paths: &[P]) -> Result<(), SessionError> {
        self.call_ok(Request::DeleteStorageGroups {
            paths: to_strings(paths),
        })
    }

    pub fn create_timeseries(
        &mut self,
        path: &str,
        data_type: TSDataType,
        encoding: TSEncoding,
        compression: CompressionType,
    ) -> Result<(), SessionError> {
        self.call_ok(Request::CreateTimeseries {
            path: path.to_string(),
            data_type,
            encoding,
            compression,
        })
    }

    pub fn delete_timeseries<P: AsRef<str>>(&mut self, paths: &[P]) -> Result<(), SessionError> {
        self.call_ok(Request::DeleteTimeseries {
            paths: to_strings(paths),
        })
    }

    /// Writes one row: `values[i]` goes to `device_id.measurements[i]`.
    ///
    /// Values may be typed, or text that the server parses as the declared
    /// type of each series.
    pub fn insert<M, V>(
        &mut self,
        device_id: &str,
        timestamp: i64,
        measurements: &[M],
        values: impl IntoIterator<Item = V>,
    ) -> Result<(), SessionError>
    where
        M: AsRef<str>,
        V: Into<Value>,
    {
        let measurements = to_strings(measurements);
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.connection()?;
        check_row(&measurements, values.len(), self.config.check_writes)?;
        self.call_ok(Request::Insert {
            device_id: device_id.to_string(),
            timestamp,
            measurements,
            values,
        })
    }

    pub fn insert_tablet(&mut self, tablet: Tablet) -> Result<(), SessionError> {
        self.connection()?;
        if tablet.is_empty() {
            return Ok(());
        }
        check_row(
            tablet.measurements(),
            tablet.measurements().len(),
            self.config.check_writes,
        )?;
        self.call_ok(Request::InsertTablet(tablet))
    }

    /// Deletes every point with `timestamp <= end_time` from each series.
    pub fn delete_data<P: AsRef<str>>(&mut self, paths: &[P], end_time: i64) -> Result<(), SessionError> {
        self.call_ok(Request::DeleteData {
            paths: to_strings(paths),
            end_time,
        })
    }

    pub fn show_storage_groups(&mut self) -> Result<Vec<Path>, SessionError> {
        match self.call(Request::ShowStorageGroups)? {
            Response::StorageGroups(groups) => Ok(groups),
            other => Err(unexpected(other)),
        }
    }

    pub fn show_timeseries(&mut self, pattern: &str) -> Result<Vec<TimeseriesSchema>, SessionError> {
        match self.call(Request::ShowTimeseries {
            pattern: pattern.to_string(),
        })? {
            Response::Timeseries(timeseries) => Ok(timeseries),
            other => Err(unexpected(other)),
        }
    }

    pub fn check_timeseries_exists(&mut self, path: &str) -> Result<bool, SessionError> {
        match self.call(Request::CheckTimeseriesExists {
            path: path.to_string(),
        })? {
            Response::Exists(exists) => Ok(exists),
            other => Err(unexpected(other)),
        }
    }

    /// Points of one series with `start <= timestamp <= end`, oldest first.
    pub fn select(&mut self, path: &str, start: i64, end: i64) -> Result<Vec<DataPoint>, SessionError> {
        match self.call(Request::Select {
            path: path.to_string(),
            start,
            end,
        })? {
            Response::DataPoints(points) => Ok(points),
            other => Err(unexpected(other)),
        }
    }

    pub fn version(&mut self) -> Result<String, SessionError> {
        match self.call(Request::Version)? {
            Response::Version(version) => Ok(version),
            other => Err(unexpected(other)),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let State::Open(mut connection) = std::mem::replace(&mut self.state, State::Closed) {
            warn!(
                "session to {} dropped while open, closing it",
                self.config.endpoint.address()
            );
            if let Err(e) = connection.close() {
                warn!("error closing dropped session: {}", e);
            }
        }
    }
}

fn to_strings<P: AsRef<str>>(items: &[P]) -> Vec<String> {
    items.iter().map(|p| p.as_ref().to_string()).collect()
}

fn unexpected(response: Response) -> SessionError {
    SessionError::Internal(format!("unexpected response {:?}", response))
}

// Shape checks that need no schema, done before anything is sent.
fn check_row(measurements: &[String], num_values: usize, thorough: bool) -> Result<(), WriteError> {
    if measurements.len() != num_values {
        return Err(WriteError::ArityMismatch {
            measurements: measurements.len(),
            values: num_values,
        });
    }
    if measurements.is_empty() {
        return Err(WriteError::EmptyRow);
    }
    if thorough {
        let mut seen = HashSet::new();
        for measurement in measurements {
            if !seen.insert(measurement.as_str()) {
                return Err(WriteError::DuplicateMeasurement(measurement.clone()));
            }
        }
    }
    Ok(())
}
