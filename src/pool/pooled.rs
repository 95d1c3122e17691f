use std::sync::Arc;

use async_trait::async_trait;

use super::bounded::Pool;
use crate::backend::{BackendClient, BackendError};
use crate::protocol::{ProtocolError, QueryResult, Value};

/// A connection borrowed from a [`Pool`].
///
/// `close` hands it back (or closes it if it broke); dropping it without
/// closing discards the connection and frees its slot.
pub struct PooledConn<C>
where
    C: BackendClient + 'static,
{
    pool: Arc<Pool<C>>,
    conn: Option<C>,
}

impl<C> PooledConn<C>
where
    C: BackendClient + 'static,
{
    pub(crate) fn new(pool: Arc<Pool<C>>, conn: C) -> Self {
        Self {
            pool,
            conn: Some(conn),
        }
    }

    pub fn pool(&self) -> &Arc<Pool<C>> {
        &self.pool
    }

    pub fn get_ref(&self) -> Option<&C> {
        self.conn.as_ref()
    }

    fn conn_mut(&mut self) -> Result<&mut C, BackendError> {
        self.conn
            .as_mut()
            .ok_or(BackendError::Protocol(ProtocolError::ConnectionClosed))
    }
}

#[async_trait]
impl<C> BackendClient for PooledConn<C>
where
    C: BackendClient + 'static,
{
    async fn execute(&mut self, command: &str, args: &[Value]) -> Result<QueryResult, BackendError> {
        self.conn_mut()?.execute(command, args).await
    }

    async fn use_db(&mut self, db: &str) -> Result<(), BackendError> {
        self.conn_mut()?.use_db(db).await
    }

    async fn rollback(&mut self) -> Result<(), BackendError> {
        self.conn_mut()?.rollback().await
    }

    /// Return the connection to its pool
    async fn close(&mut self) -> Result<(), BackendError> {
        if let Some(conn) = self.conn.take() {
            let broken = conn.is_broken();
            self.pool.put(conn, broken).await;
        }
        Ok(())
    }

    fn is_broken(&self) -> bool {
        self.conn.as_ref().map_or(true, |c| c.is_broken())
    }
}

impl<C> Drop for PooledConn<C>
where
    C: BackendClient + 'static,
{
    fn drop(&mut self) {
        if self.conn.take().is_some() {
            self.pool.discard();
        }
    }
}
