use std::time::Instant;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use super::{Session, SessionError};
use crate::backend::{BackendClient, BackendError};
use crate::parser::StatementKind;
use crate::pool::PooledConn;
use crate::protocol::buf::put_lenenc_int;
use crate::protocol::{OkPacket, QueryResult, Resultset, Value};

impl<S, C> Session<S, C>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    C: BackendClient + 'static,
{
    pub(super) async fn handle_query(&mut self, sql: &str) -> Result<(), SessionError> {
        let started = Instant::now();
        let kind = self
            .ctx
            .classifier
            .classify(sql)
            .map_err(|source| SessionError::Parse {
                sql: sql.to_string(),
                source,
            })?;
        debug!(kind = kind.as_str(), sql = %truncate_sql(sql, 200), "Handling query");

        let result = match kind {
            StatementKind::Select { .. } | StatementKind::Show => {
                self.handle_select(sql, kind.is_read_only()).await
            }
            StatementKind::ShowProxyStatus => self.handle_proxy_status().await,
            StatementKind::Use(ref db) => {
                self.state.change_database(db.as_str());
                self.write_ok().await
            }
            StatementKind::Other => Err(SessionError::UnsupportedStatement(sql.to_string())),
        };

        self.ctx
            .metrics
            .record_query(kind.as_str(), started.elapsed().as_secs_f64());
        result
    }

    /// Run a read statement on a backend and relay its result
    async fn handle_select(&mut self, sql: &str, read_only: bool) -> Result<(), SessionError> {
        let mut conn = self.acquire(read_only).await?;
        let result = execute_in(&mut conn, &self.state.database, sql).await;
        if let Ok(ref r) = result {
            self.state.update_from_backend(r.status);
        }
        self.release(conn, false).await;

        let result = result?;
        self.write_result(result).await
    }

    /// Answer `SHOW PROXY STATUS` from the proxy's own configuration
    async fn handle_proxy_status(&mut self) -> Result<(), SessionError> {
        let backend = &self.ctx.config.backend;
        let row = vec![
            Value::from(self.ctx.version.as_str()),
            Value::from(self.ctx.commit_id.as_str()),
            Value::from(backend.addr.as_str()),
            Value::from(backend.readers_display().as_str()),
        ];
        let rs = Resultset::from_rows(&["Version", "CommitID", "Master", "Slaves"], vec![row])
            .map_err(|e| SessionError::Internal(e.to_string()))?;

        let status = self.state.status;
        self.write_resultset(status, &rs).await
    }

    /// Borrow a backend: the transaction-bound one if any, else a reader
    /// for read-only statements and the writer otherwise
    async fn acquire(&mut self, read_only: bool) -> Result<PooledConn<C>, SessionError> {
        if let Some(conn) = self.held.take() {
            return Ok(conn);
        }

        let conn = if read_only {
            self.ctx.metrics.record_route("reader");
            self.ctx.readers.get().await?
        } else {
            self.ctx.metrics.record_route("writer");
            self.ctx.writer.get().await?
        };
        Ok(conn)
    }

    /// Return a backend after a statement, unless the session must keep it
    pub(super) async fn release(&mut self, mut conn: PooledConn<C>, rollback: bool) {
        if !rollback && self.state.holds_backend() && !conn.is_broken() {
            self.held = Some(conn);
            return;
        }

        if rollback && !conn.is_broken() {
            if let Err(e) = conn.rollback().await {
                warn!(error = %e, "Rollback on release failed");
            }
        }
        if let Err(e) = conn.close().await {
            warn!(error = %e, "Failed to release backend connection");
        }
    }

    async fn write_result(&mut self, result: QueryResult) -> Result<(), SessionError> {
        let status = self.state.status | result.status;
        match result.resultset {
            Some(ref rs) => self.write_resultset(status, rs).await,
            None => {
                let ok = OkPacket {
                    affected_rows: result.affected_rows,
                    last_insert_id: result.last_insert_id,
                    status,
                    warnings: 0,
                };
                self.stream
                    .write_ok(&ok, self.state.capability_flags)
                    .await?;
                Ok(())
            }
        }
    }

    /// Column count, column definitions, EOF, rows, EOF; one flush
    async fn write_resultset(&mut self, status: u16, rs: &Resultset) -> Result<(), SessionError> {
        let caps = self.state.capability_flags;

        let mut count = BytesMut::with_capacity(9);
        put_lenenc_int(&mut count, rs.fields.len() as u64);
        self.stream.queue_packet(&count).await?;

        for field in &rs.fields {
            self.stream.queue_packet(&field.dump()).await?;
        }
        self.stream.queue_eof(status, caps).await?;

        for row in &rs.row_datas {
            self.stream.queue_packet(row).await?;
        }
        self.stream.queue_eof(status, caps).await?;

        self.stream.flush().await?;
        Ok(())
    }
}

/// Sync the session database onto the backend, then run the statement
async fn execute_in<C: BackendClient>(
    conn: &mut C,
    db: &str,
    sql: &str,
) -> Result<QueryResult, BackendError> {
    if !db.is_empty() {
        conn.use_db(db).await?;
    }
    conn.execute(sql, &[]).await
}

/// Truncate SQL for logging (avoid huge log entries)
fn truncate_sql(sql: &str, max_len: usize) -> std::borrow::Cow<'_, str> {
    if sql.len() <= max_len {
        return std::borrow::Cow::Borrowed(sql);
    }
    let mut end = max_len;
    while !sql.is_char_boundary(end) {
        end -= 1;
    }
    std::borrow::Cow::Owned(format!("{}...", &sql[..end]))
}
