//! Integration test entry point
//!
//! The `proxy` suite runs the proxy in-process against fake backends and
//! always runs. The `live` suite talks to a running proxy and only runs with
//! AEGIS_RUN_INTEGRATION_TESTS=1 cargo test --test integration
//!
//! Environment variables for the live suite:
//! - AEGIS_RUN_INTEGRATION_TESTS: Set to "1" to enable it
//! - AEGIS_TEST_PROXY_HOST: Proxy host (default: 127.0.0.1)
//! - AEGIS_TEST_PROXY_PORT: Proxy port (default: 4000)
//! - AEGIS_TEST_PROXY_USER: Proxy user (default: root)
//! - AEGIS_TEST_PROXY_PASS: Proxy password (default: empty)
//! - AEGIS_TEST_PROXY_DB: Database (default: test)

mod live;
mod proxy;

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use aegis::config::Config;
use aegis::protocol::capabilities::DEFAULT_CAPABILITIES;
use aegis::protocol::packets::encode_eof;
use aegis::protocol::{
    generate_salt, scramble_password, BackendHandshake, HandshakeResponse, OkPacket, PacketStream,
    Resultset, ServerHandshake, Value,
};
use aegis::server::{Server, ServerContext};
use bytes::Bytes;
use mysql::{Error as MySqlError, OptsBuilder, Pool, PooledConn};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const PROXY_PASSWORD: &str = "secret";

/// Check if the live suite should run
pub fn should_run_integration_tests() -> bool {
    env::var("AEGIS_RUN_INTEGRATION_TESTS")
        .map(|v| v == "1")
        .unwrap_or(false)
}

/// Skip test if integration tests are not enabled
#[macro_export]
macro_rules! skip_if_not_enabled {
    () => {
        if !crate::should_run_integration_tests() {
            eprintln!("Skipping integration test (set AEGIS_RUN_INTEGRATION_TESTS=1 to run)");
            return;
        }
    };
}

// ============================================================================
// Fake backend
// ============================================================================

/// A minimal MySQL server: accepts any credentials, answers every query
/// with a one-column `1` result set and records what it was sent
pub struct FakeBackend {
    pub addr: SocketAddr,
    seen: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl FakeBackend {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let task = tokio::spawn(async move {
            let mut next_id = 1;
            while let Ok((socket, _)) = listener.accept().await {
                next_id += 1;
                tokio::spawn(serve_backend(socket, next_id, log.clone()));
            }
        });
        Self { addr, seen, task }
    }

    /// Commands received so far, as "<code>:<payload>"
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_backend(socket: TcpStream, id: u32, seen: Arc<Mutex<Vec<String>>>) {
    let mut stream = PacketStream::new(socket);
    let hs = ServerHandshake::new("5.7.30-fake", id, generate_salt());
    if stream.write_packet(&hs.encode()).await.is_err() || stream.read_packet().await.is_err() {
        return;
    }
    let status = hs.status;
    if stream
        .write_ok(&OkPacket::new(status), DEFAULT_CAPABILITIES)
        .await
        .is_err()
    {
        return;
    }

    loop {
        stream.reset_sequence();
        let packet = match stream.read_packet().await {
            Ok(p) => p,
            Err(_) => return,
        };
        if packet.first() == Some(&0x01) {
            return;
        }
        let text = String::from_utf8_lossy(&packet[1..]).into_owned();
        seen.lock().push(format!("{:#04x}:{}", packet[0], text));

        let upper = text.to_ascii_uppercase();
        let result = match packet[0] {
            0x03 if !upper.starts_with("SET") && !upper.starts_with("ROLLBACK") => {
                write_one(&mut stream, status).await
            }
            _ => stream.write_ok(&OkPacket::new(status), DEFAULT_CAPABILITIES).await,
        };
        if result.is_err() {
            return;
        }
    }
}

async fn write_one(
    stream: &mut PacketStream<TcpStream>,
    status: u16,
) -> Result<(), aegis::protocol::ProtocolError> {
    let rs = Resultset::from_rows(&["1"], vec![vec![Value::Int(1)]]).unwrap();
    stream.queue_packet(&[1]).await?;
    stream.queue_packet(&rs.fields[0].dump()).await?;
    stream.queue_packet(&encode_eof(status, DEFAULT_CAPABILITIES)).await?;
    stream.queue_packet(&rs.row_datas[0]).await?;
    stream.queue_packet(&encode_eof(status, DEFAULT_CAPABILITIES)).await?;
    stream.flush().await
}

// ============================================================================
// In-process proxy
// ============================================================================

pub struct TestProxy {
    pub addr: SocketAddr,
    pub ctx: Arc<ServerContext>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TestProxy {
    /// Start a proxy in front of `master`, with optional weighted slaves
    pub async fn start(master: SocketAddr, slaves: &[(SocketAddr, u32)], max_per_ip: usize) -> Self {
        let mut toml = format!(
            r#"
[server]
addr = "127.0.0.1:0"
password = "{}"
max_conns_per_ip = {}

[backend]
addr = "{}"
user = "root"
"#,
            PROXY_PASSWORD, max_per_ip, master
        );
        for (addr, weight) in slaves {
            toml.push_str(&format!(
                "\n[[backend.slaves]]\naddr = \"{}\"\nweight = {}\n",
                addr, weight
            ));
        }
        let config: Config = toml::from_str(&toml).unwrap();

        let ctx = Arc::new(ServerContext::from_config(config).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Server::new(ctx.clone());
        let shutdown = server.shutdown_token();
        let task = tokio::spawn(async move { server.serve(listener).await });

        Self {
            addr,
            ctx,
            shutdown,
            task: Some(task),
        }
    }

    pub async fn stop(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            task.await.unwrap();
        }
        self.ctx.close().await;
    }
}

/// Raw protocol client
pub struct TestClient {
    pub stream: PacketStream<TcpStream>,
}

impl TestClient {
    /// Connect and log in; returns the client and the server's reply to the
    /// handshake response (OK or ERR)
    pub async fn login(addr: SocketAddr, password: &str, db: Option<&str>) -> (Self, Bytes) {
        let mut stream = PacketStream::new(TcpStream::connect(addr).await.unwrap());
        let greeting = BackendHandshake::parse(&stream.read_packet().await.unwrap()).unwrap();
        let response = HandshakeResponse {
            capabilities: DEFAULT_CAPABILITIES,
            max_packet_size: 1 << 24,
            collation: 33,
            username: "root".into(),
            auth_response: scramble_password(&greeting.salt, password.as_bytes()),
            database: db.map(str::to_string),
        };
        stream.write_packet(&response.encode()).await.unwrap();
        let reply = stream.read_packet().await.unwrap();
        (Self { stream }, reply)
    }

    /// Send one command and return the first reply packet
    pub async fn command(&mut self, code: u8, payload: &[u8]) -> Bytes {
        self.stream.reset_sequence();
        let mut packet = vec![code];
        packet.extend_from_slice(payload);
        self.stream.write_packet(&packet).await.unwrap();
        self.stream.read_packet().await.unwrap()
    }

    pub async fn query(&mut self, sql: &str) -> Bytes {
        self.command(0x03, sql.as_bytes()).await
    }

    pub async fn next(&mut self) -> Bytes {
        self.stream.read_packet().await.unwrap()
    }
}

// ============================================================================
// Live proxy
// ============================================================================

/// Proxy connection settings for the live suite
#[derive(Debug, Clone)]
pub struct ProxyTestConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

pub fn get_proxy_config() -> ProxyTestConfig {
    ProxyTestConfig {
        host: env::var("AEGIS_TEST_PROXY_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
        port: env::var("AEGIS_TEST_PROXY_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(4000),
        user: env::var("AEGIS_TEST_PROXY_USER").unwrap_or_else(|_| "root".to_string()),
        password: env::var("AEGIS_TEST_PROXY_PASS").unwrap_or_default(),
        database: env::var("AEGIS_TEST_PROXY_DB").unwrap_or_else(|_| "test".to_string()),
    }
}

impl ProxyTestConfig {
    pub fn pool(&self) -> Pool {
        let opts = OptsBuilder::new()
            .ip_or_hostname(Some(&self.host))
            .tcp_port(self.port)
            .user(Some(&self.user))
            .pass(Some(&self.password))
            .db_name(Some(&self.database));
        Pool::new(opts).expect("Failed to create connection pool")
    }

    pub fn conn(&self) -> PooledConn {
        self.pool().get_conn().expect("Failed to get connection")
    }
}

/// Assert that a query result is a MySQL error with given code and message
pub fn assert_query_error<T: std::fmt::Debug>(
    result: Result<T, MySqlError>,
    expected_code: u16,
    expected_msg: &str,
) {
    match result {
        Ok(v) => panic!(
            "Expected MySQL error {} with message containing '{}', but got: {:?}",
            expected_code, expected_msg, v
        ),
        Err(MySqlError::MySqlError(ref e)) => {
            assert_eq!(
                e.code, expected_code,
                "Expected error code {}, got {}. Message: {}",
                expected_code, e.code, e.message
            );
            assert!(
                e.message.contains(expected_msg),
                "Expected message containing '{}', got: {}",
                expected_msg,
                e.message
            );
        }
        Err(e) => panic!(
            "Expected MySQL error {} with message containing '{}', got different error: {:?}",
            expected_code, expected_msg, e
        ),
    }
}
