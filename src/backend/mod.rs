//! Client side of the proxy: connections to real MySQL servers.

mod conn;

pub use conn::BackendConn;

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::{MysqlError, ProtocolError, QueryResult, Value};

/// Backend connection errors
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to connect to {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Server(MysqlError),

    #[error("authentication plugin {0} is not supported")]
    AuthPlugin(String),

    #[error("{0} is not supported")]
    Unsupported(&'static str),
}

impl BackendError {
    /// Errors after which the connection must be discarded
    pub fn is_fatal(&self) -> bool {
        match self {
            BackendError::Dial { .. } => true,
            BackendError::Protocol(e) => e.is_fatal(),
            _ => false,
        }
    }

    pub fn to_mysql_error(&self) -> MysqlError {
        match self {
            BackendError::Server(e) => e.clone(),
            BackendError::Protocol(e) => e.to_mysql_error(),
            other => MysqlError::unknown(other.to_string()),
        }
    }
}

/// Capability shared by direct backend connections and pooled wrappers
#[async_trait]
pub trait BackendClient: Send {
    /// Run a command. Non-empty `args` select the prepared-statement path.
    async fn execute(&mut self, command: &str, args: &[Value]) -> Result<QueryResult, BackendError>;

    /// Switch the default database if it differs from the current one
    async fn use_db(&mut self, db: &str) -> Result<(), BackendError>;

    async fn rollback(&mut self) -> Result<(), BackendError>;

    async fn close(&mut self) -> Result<(), BackendError>;

    /// Set once a transport failure has made the connection unusable
    fn is_broken(&self) -> bool;
}
