use serde::{Deserialize, Serialize};
use std::{fmt, fs::File, io, io::BufReader, path::Path};
use thiserror::Error;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 6667;
pub const DEFAULT_USER: &str = "root";
pub const DEFAULT_PASSWORD: &str = "root";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("host is empty")]
    EmptyHost,
    #[error("port must be greater than zero")]
    InvalidPort,
    #[error("username is empty")]
    EmptyUsername,
    #[error("no users configured")]
    NoUsers,
    #[error("error reading config file")]
    Read(#[from] io::Error),
    #[error("error unmarshaling config file")]
    Unmarshal(#[from] serde_json::Error),
}

/// Address and credentials of a database server. Immutable once built.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    host: String,
    port: u16,
    username: String,
    password: String,
}

impl Endpoint {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// `host:port`, the form used to identify a server.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.username.is_empty() {
            return Err(ConfigError::EmptyUsername);
        }
        Ok(())
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT, DEFAULT_USER, DEFAULT_PASSWORD)
    }
}

// Keeps the password out of logs.
impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub endpoint: Endpoint,
    // Validate measurements and values locally before sending a write.
    #[serde(default = "default_check_writes")]
    pub check_writes: bool,
}

fn default_check_writes() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Endpoint::default())
    }
}

impl Config {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            check_writes: true,
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Config = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoint.validate()
    }
}
