mod query;
mod state;

pub use state::SessionState;

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, instrument, warn};

use crate::backend::{BackendClient, BackendConn, BackendError};
use crate::parser::ClassifyError;
use crate::pool::{PoolError, PooledConn};
use crate::protocol::capabilities::{CLIENT_CONNECT_WITH_DB, DEFAULT_CAPABILITIES};
use crate::protocol::{
    codes, generate_salt, verify_auth_response, ClientCommand, HandshakeResponse, MysqlError,
    OkPacket, PacketStream, ProtocolError, ServerHandshake,
};
use crate::server::ServerContext;

/// One client connection: handshake, then one command at a time
pub struct Session<S, C = BackendConn>
where
    C: BackendClient + 'static,
{
    ctx: Arc<ServerContext<C>>,
    stream: PacketStream<S>,
    peer: SocketAddr,
    pub state: SessionState,
    /// Backend kept across statements while a transaction is open
    held: Option<PooledConn<C>>,
    closed: bool,
}

impl<S, C> Session<S, C>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    C: BackendClient + 'static,
{
    pub fn new(ctx: Arc<ServerContext<C>>, stream: S, peer: SocketAddr) -> Self {
        let connection_id = ctx.next_connection_id();
        Self {
            ctx,
            stream: PacketStream::new(stream),
            peer,
            state: SessionState::new(connection_id, generate_salt()),
            held: None,
            closed: false,
        }
    }

    pub fn id(&self) -> u32 {
        self.state.connection_id
    }

    /// Run the session until the client quits, disconnects or fails
    #[instrument(skip(self), fields(session_id = self.state.connection_id, peer = %self.peer))]
    pub async fn run(mut self) -> Result<(), SessionError> {
        self.ctx.metrics.record_connection_accepted();
        let result = self.serve().await;
        self.release_held().await;
        self.ctx.metrics.record_connection_closed();

        match result {
            Ok(()) => info!("Session ended"),
            Err(ref e) => warn!(error = %e, "Session ended with error"),
        }
        result
    }

    async fn serve(&mut self) -> Result<(), SessionError> {
        if let Err(e) = self.handshake().await {
            if !e.is_client_transport() {
                // Best effort: the client may already be gone
                let _ = self.write_error(&e.to_mysql_error()).await;
            }
            return Err(e);
        }
        info!(user = %self.state.username, db = %self.state.database, "Client authenticated");

        while !self.closed {
            let packet = match self.stream.read_packet().await {
                Ok(packet) => packet,
                Err(ProtocolError::ConnectionClosed) => {
                    debug!("Client disconnected");
                    break;
                }
                Err(e) => return Err(e.into()),
            };

            if let Err(e) = self.dispatch(packet).await {
                self.ctx.metrics.record_query_error(e.class());
                if e.closes_session() {
                    return Err(e);
                }
                warn!(error = %e, "Command failed");
                self.write_error(&e.to_mysql_error()).await?;
            }

            self.stream.reset_sequence();
        }
        Ok(())
    }

    /// Send the initial handshake, check the client's credentials and
    /// acknowledge with OK
    async fn handshake(&mut self) -> Result<(), SessionError> {
        let mut greeting = ServerHandshake::new(
            self.ctx.config.server.server_version.as_str(),
            self.state.connection_id,
            self.state.salt,
        );
        greeting.status = self.state.status;
        greeting.collation = self.state.collation;
        self.stream.write_packet(&greeting.encode()).await?;

        let response = HandshakeResponse::parse(&self.stream.read_packet().await?)?;
        self.state.set_from_handshake(
            response.username.clone(),
            response.capabilities & DEFAULT_CAPABILITIES,
        );

        let password = self.ctx.config.server.password.as_bytes();
        if !verify_auth_response(&self.state.salt, password, &response.auth_response) {
            return Err(SessionError::AccessDenied(MysqlError::access_denied(
                &response.username,
                &self.peer.ip().to_string(),
            )));
        }

        if response.capabilities & CLIENT_CONNECT_WITH_DB != 0 {
            if let Some(db) = response.database {
                if db.is_empty() {
                    let default_db = self.ctx.config.backend.database.clone();
                    self.state.change_database(default_db);
                } else {
                    self.state.change_database(db);
                }
            }
        }

        self.write_ok().await?;
        self.stream.reset_sequence();
        Ok(())
    }

    async fn dispatch(&mut self, packet: Bytes) -> Result<(), SessionError> {
        match ClientCommand::parse(&packet) {
            ClientCommand::Quit => {
                debug!("Client quit");
                self.closed = true;
                Ok(())
            }
            ClientCommand::Query(sql) => self.handle_query(&sql).await,
            ClientCommand::InitDb(db) => {
                self.state.change_database(db);
                self.write_ok().await
            }
            ClientCommand::Ping => self.write_ok().await,
            other => Err(SessionError::UnknownCommand(other.code())),
        }
    }

    async fn write_ok(&mut self) -> Result<(), SessionError> {
        let ok = OkPacket::new(self.state.status);
        self.stream
            .write_ok(&ok, self.state.capability_flags)
            .await?;
        Ok(())
    }

    async fn write_error(&mut self, err: &MysqlError) -> Result<(), SessionError> {
        self.stream
            .write_err(err, self.state.capability_flags)
            .await?;
        Ok(())
    }

    /// Give back a transaction-bound backend, rolling back first
    async fn release_held(&mut self) {
        if let Some(conn) = self.held.take() {
            self.release(conn, true).await;
        }
    }
}

/// Errors raised while serving a session
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Failure on the client connection itself
    #[error("client connection: {0}")]
    Client(#[from] ProtocolError),

    #[error("{0}")]
    AccessDenied(MysqlError),

    #[error("backend: {0}")]
    Backend(#[from] BackendError),

    #[error("pool: {0}")]
    Pool(#[from] PoolError),

    #[error("parse sql \"{sql}\" error \"{source}\"")]
    Parse {
        sql: String,
        #[source]
        source: ClassifyError,
    },

    #[error("statement [{0}] not supported now")]
    UnsupportedStatement(String),

    #[error("command {0} not supported now")]
    UnknownCommand(u8),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SessionError {
    fn is_client_transport(&self) -> bool {
        matches!(self, SessionError::Client(e) if e.is_fatal())
    }

    /// Whether the session must end after this error
    pub fn closes_session(&self) -> bool {
        matches!(
            self,
            SessionError::Client(_) | SessionError::AccessDenied(_)
        )
    }

    /// Client-visible rendering of this error
    pub fn to_mysql_error(&self) -> MysqlError {
        match self {
            SessionError::Client(e) => e.to_mysql_error(),
            SessionError::AccessDenied(e) => e.clone(),
            SessionError::Backend(e) => e.to_mysql_error(),
            SessionError::Pool(PoolError::Dial(e)) => e.to_mysql_error(),
            SessionError::Pool(PoolError::Exhausted) => MysqlError::too_many_connections(),
            SessionError::Pool(e) => MysqlError::unknown(e.to_string()),
            SessionError::Parse { .. } => MysqlError::new(codes::ER_PARSE_ERROR, self.to_string()),
            SessionError::UnsupportedStatement(_)
            | SessionError::UnknownCommand(_)
            | SessionError::Internal(_) => MysqlError::unknown(self.to_string()),
        }
    }

    /// Label used in metrics
    pub fn class(&self) -> &'static str {
        match self {
            SessionError::Client(_) => "client",
            SessionError::AccessDenied(_) => "auth",
            SessionError::Backend(_) => "backend",
            SessionError::Pool(_) => "pool",
            SessionError::Parse { .. } => "parse",
            SessionError::UnsupportedStatement(_) | SessionError::UnknownCommand(_) => {
                "unsupported"
            }
            SessionError::Internal(_) => "internal",
        }
    }
}
