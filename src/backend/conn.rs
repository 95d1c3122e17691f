use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::{BackendClient, BackendError};
use crate::protocol::buf::get_lenenc_int;
use crate::protocol::capabilities::{BACKEND_CAPABILITIES, CLIENT_CONNECT_WITH_DB};
use crate::protocol::constants::{
    status::SERVER_STATUS_AUTOCOMMIT, DEFAULT_CHARSET, DEFAULT_COLLATION_ID, LOCAL_INFILE_HEADER,
};
use crate::protocol::handshake::NATIVE_PASSWORD_PLUGIN;
use crate::protocol::packets::{parse_eof_status, parse_err};
use crate::protocol::{
    is_eof_packet, is_err_packet, is_ok_packet, scramble_password, AuthSwitchRequest,
    BackendHandshake, Command, Field, HandshakeResponse, OkPacket, PacketStream, ProtocolError,
    QueryResult, Resultset, Value,
};

/// A single authenticated connection to a MySQL server.
///
/// Always in autocommit mode once `connect` returns.
pub struct BackendConn {
    stream: PacketStream<TcpStream>,
    addr: String,
    user: String,
    db: String,
    capabilities: u32,
    status: u16,
    collation: u8,
    charset: &'static str,
    salt: Vec<u8>,
    server_version: String,
    connection_id: u32,
    broken: bool,
}

impl BackendConn {
    /// Dial, authenticate, and force autocommit on
    pub async fn connect(
        addr: &str,
        user: &str,
        password: &str,
        db: &str,
    ) -> Result<Self, BackendError> {
        debug!(addr = %addr, user = %user, "Connecting to backend");
        let tcp = TcpStream::connect(addr)
            .await
            .map_err(|source| BackendError::Dial {
                addr: addr.to_string(),
                source,
            })?;
        tcp.set_nodelay(true).ok();

        let mut stream = PacketStream::new(tcp);
        let handshake = BackendHandshake::parse(&stream.read_packet().await?)?;
        debug!(
            addr = %addr,
            server_version = %handshake.server_version,
            connection_id = handshake.connection_id,
            "Received backend handshake"
        );

        let mut conn = Self {
            stream,
            addr: addr.to_string(),
            user: user.to_string(),
            db: db.to_string(),
            capabilities: handshake.capabilities,
            status: handshake.status,
            collation: DEFAULT_COLLATION_ID,
            charset: DEFAULT_CHARSET,
            salt: handshake.salt,
            server_version: handshake.server_version,
            connection_id: handshake.connection_id,
            broken: false,
        };

        conn.authenticate(password).await?;

        if !conn.is_autocommit() {
            conn.exec("SET autocommit=1").await?;
        }
        debug!(addr = %addr, connection_id = conn.connection_id, "Backend connection ready");
        Ok(conn)
    }

    async fn authenticate(&mut self, password: &str) -> Result<(), BackendError> {
        let mut capabilities = BACKEND_CAPABILITIES & self.capabilities;
        if !self.db.is_empty() {
            capabilities |= CLIENT_CONNECT_WITH_DB;
        }

        let response = HandshakeResponse {
            capabilities,
            max_packet_size: 0,
            collation: self.collation,
            username: self.user.clone(),
            auth_response: scramble_password(&self.salt, password.as_bytes()),
            database: Some(self.db.clone()).filter(|db| !db.is_empty()),
        };
        // Negotiated from here on
        self.capabilities = capabilities;
        self.write(&response.encode()).await?;

        let reply = self.read().await?;
        if AuthSwitchRequest::is_auth_switch(&reply) && !is_eof_packet(&reply) {
            let switch = AuthSwitchRequest::parse(&reply)?;
            if switch.plugin_name != NATIVE_PASSWORD_PLUGIN {
                return Err(BackendError::AuthPlugin(switch.plugin_name));
            }
            debug!(addr = %self.addr, "Backend requested auth switch");
            self.salt = switch.salt;
            let scrambled = scramble_password(&self.salt, password.as_bytes());
            self.write(&scrambled).await?;
            let reply = self.read().await?;
            self.handle_ok(&reply)?;
        } else {
            self.handle_ok(&reply)?;
        }
        Ok(())
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn db(&self) -> &str {
        &self.db
    }

    pub fn charset(&self) -> &str {
        self.charset
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_autocommit(&self) -> bool {
        self.status & SERVER_STATUS_AUTOCOMMIT != 0
    }

    async fn read(&mut self) -> Result<Bytes, BackendError> {
        let result = self.stream.read_packet().await;
        self.check(result)
    }

    async fn write(&mut self, payload: &[u8]) -> Result<(), BackendError> {
        let result = self.stream.write_packet(payload).await;
        self.check(result)
    }

    fn check<T>(&mut self, result: Result<T, ProtocolError>) -> Result<T, BackendError> {
        result.map_err(|e| {
            if e.is_fatal() {
                self.broken = true;
            }
            BackendError::Protocol(e)
        })
    }

    async fn write_command(&mut self, command: Command, arg: &[u8]) -> Result<(), BackendError> {
        self.stream.reset_sequence();
        let mut payload = BytesMut::with_capacity(arg.len() + 1);
        payload.put_u8(command as u8);
        payload.extend_from_slice(arg);
        self.write(&payload).await
    }

    async fn exec(&mut self, query: &str) -> Result<QueryResult, BackendError> {
        self.write_command(Command::Query, query.as_bytes()).await?;
        self.read_result(false).await
    }

    fn handle_ok(&mut self, payload: &[u8]) -> Result<QueryResult, BackendError> {
        if is_err_packet(payload) {
            return Err(BackendError::Server(parse_err(payload, self.capabilities)?));
        }
        if !is_ok_packet(payload) {
            return Err(ProtocolError::malformed("invalid ok packet").into());
        }

        let ok = OkPacket::parse(payload, self.capabilities)?;
        self.status = ok.status;
        Ok(QueryResult {
            status: ok.status,
            affected_rows: ok.affected_rows,
            last_insert_id: ok.last_insert_id,
            resultset: None,
        })
    }

    async fn read_result(&mut self, binary: bool) -> Result<QueryResult, BackendError> {
        let first = self.read().await?;
        match first.first() {
            Some(&h) if h == LOCAL_INFILE_HEADER => {
                Err(ProtocolError::malformed("LOAD DATA LOCAL INFILE is not supported").into())
            }
            Some(_) if is_ok_packet(&first) || is_err_packet(&first) => self.handle_ok(&first),
            Some(_) => {
                let result = self.read_resultset(&first, binary).await;
                // A half-read result set leaves the stream out of step
                if let Err(BackendError::Protocol(_)) = result {
                    self.broken = true;
                }
                result
            }
            None => Err(ProtocolError::malformed("empty result packet").into()),
        }
    }

    async fn read_resultset(
        &mut self,
        first: &[u8],
        binary: bool,
    ) -> Result<QueryResult, BackendError> {
        let mut buf = first;
        let count = get_lenenc_int(&mut buf)?
            .ok_or_else(|| ProtocolError::malformed("NULL column count"))? as usize;
        if !buf.is_empty() {
            return Err(ProtocolError::malformed("trailing bytes after column count").into());
        }

        let mut result = QueryResult::default();

        let mut fields = Vec::with_capacity(count);
        loop {
            let data = self.read().await?;
            if is_eof_packet(&data) {
                result.status = parse_eof_status(&data);
                self.status = result.status;
                if fields.len() != count {
                    return Err(ProtocolError::malformed(format!(
                        "expected {} column definitions, got {}",
                        count,
                        fields.len()
                    ))
                    .into());
                }
                break;
            }
            if fields.len() == count {
                return Err(
                    ProtocolError::malformed("more column definitions than announced").into(),
                );
            }
            fields.push(Field::parse(data)?);
        }

        let mut rows = Vec::new();
        loop {
            let data = self.read().await?;
            if is_eof_packet(&data) {
                result.status = parse_eof_status(&data);
                self.status = result.status;
                break;
            }
            if is_err_packet(&data) {
                return Err(BackendError::Server(parse_err(&data, self.capabilities)?));
            }
            rows.push(data);
        }

        let mut resultset = Resultset::new(fields);
        for row in rows {
            resultset.push_row(row, binary)?;
        }
        result.resultset = Some(resultset);
        Ok(result)
    }
}

#[async_trait]
impl BackendClient for BackendConn {
    async fn execute(&mut self, command: &str, args: &[Value]) -> Result<QueryResult, BackendError> {
        if !args.is_empty() {
            return Err(BackendError::Unsupported("prepared statement execution"));
        }
        self.exec(command).await
    }

    async fn use_db(&mut self, db: &str) -> Result<(), BackendError> {
        if db.is_empty() || db == self.db {
            return Ok(());
        }
        self.write_command(Command::InitDb, db.as_bytes()).await?;
        let reply = self.read().await?;
        self.handle_ok(&reply)?;
        self.db = db.to_string();
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), BackendError> {
        self.exec("rollback").await.map(|_| ())
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        if self.broken {
            return Ok(());
        }
        self.broken = true;
        if let Err(e) = self.write_command(Command::Quit, &[]).await {
            warn!(addr = %self.addr, error = %e, "Failed to send COM_QUIT");
        }
        self.stream.shutdown().await.ok();
        Ok(())
    }

    fn is_broken(&self) -> bool {
        self.broken
    }
}
