mod bounded;
mod pooled;

pub use bounded::{DialFn, Pool, PoolConfig, TestOnBorrowFn};
pub use pooled::PooledConn;

#[cfg(test)]
pub(crate) use bounded::tests::{fake_pool, FakeConn};

use thiserror::Error;

use crate::backend::BackendError;

/// Errors from pool acquisition and server selection
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("connection pool closed")]
    Closed,

    #[error("connection pool exhausted")]
    Exhausted,

    #[error("no available server")]
    NoAvailableServer,

    #[error(transparent)]
    Dial(#[from] BackendError),
}
