pub mod config;
pub mod error;
pub mod path;
pub mod schema;
pub mod server;
pub mod session;
pub mod storage;
pub mod tablet;
pub mod transport;
pub mod types;

pub use config::{Config, Endpoint};
pub use error::{ConnectionError, SchemaError, SessionError, StateError, WriteError};
pub use metric::{DataPoint, Row};
pub use path::Path;
pub use schema::TimeseriesSchema;
pub use server::{EmbeddedServer, ServerConfig};
pub use session::Session;
pub use tablet::Tablet;
pub use transport::{Connection, Request, Response, Transport};
pub use types::{CompressionType, TSDataType, TSEncoding, Value};
pub use window::Bounds;

mod metric;
mod partition;
mod window;
