//! Listener side of the proxy: accept loop, admission and worker dispatch

mod context;
mod limiter;
mod worker;

pub use context::{ServerContext, BASE_CONNECTION_ID};
pub use limiter::{ipv4_to_u32, LimitError, PerIpGuard, PerIpLimiter};
pub use worker::{WorkerFn, WorkerPool};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendClient, BackendConn};
use crate::protocol::{MysqlError, PacketStream};
use crate::session::Session;

/// Minimum gap between two per-IP rejection warnings
const REJECT_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Rejection replies in flight at once; beyond this, connections are
/// closed without one
const MAX_PENDING_REJECTS: usize = 64;

/// Time allowed for writing a rejection reply
const REJECT_TIMEOUT: Duration = Duration::from_secs(1);

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Delay before retrying after a failed accept, doubling up to a cap
#[derive(Debug)]
struct AcceptBackoff {
    delay: Option<Duration>,
}

impl AcceptBackoff {
    fn new() -> Self {
        Self { delay: None }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = match self.delay {
            None => ACCEPT_BACKOFF_MIN,
            Some(d) => (d * 2).min(ACCEPT_BACKOFF_MAX),
        };
        self.delay = Some(delay);
        delay
    }

    fn reset(&mut self) {
        self.delay = None;
    }
}

/// An accepted client connection waiting for a worker
pub struct Accepted {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub guard: PerIpGuard,
}

/// The proxy listener
pub struct Server<C = BackendConn>
where
    C: BackendClient + 'static,
{
    ctx: Arc<ServerContext<C>>,
    limiter: Arc<PerIpLimiter>,
    rejects: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl<C> Server<C>
where
    C: BackendClient + 'static,
{
    pub fn new(ctx: Arc<ServerContext<C>>) -> Self {
        let limiter = Arc::new(PerIpLimiter::new(ctx.config.server.max_conns_per_ip));
        Self {
            ctx,
            limiter,
            rejects: Arc::new(Semaphore::new(MAX_PENDING_REJECTS)),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn context(&self) -> &Arc<ServerContext<C>> {
        &self.ctx
    }

    /// Cancelling this token stops the accept loop
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accept connections until shutdown
    ///
    /// Each connection is checked against the per-IP limit, then handed to
    /// a worker. Connections that cannot be admitted get an ERR packet and
    /// are closed.
    pub async fn serve(&self, listener: TcpListener) {
        let ctx = self.ctx.clone();
        let handler: WorkerFn<Accepted> = Arc::new(move |conn: Accepted| {
            let ctx = ctx.clone();
            async move {
                let Accepted { stream, peer, guard } = conn;
                // run() logs its own outcome
                let _ = Session::new(ctx, stream, peer).run().await;
                drop(guard);
                Ok(())
            }
            .boxed()
        });

        let server = &self.ctx.config.server;
        let workers = WorkerPool::start(
            server.max_workers,
            server.worker_idle_timeout(),
            handler,
        );
        info!(
            addr = ?listener.local_addr().ok(),
            max_workers = server.max_workers,
            max_conns_per_ip = server.max_conns_per_ip,
            "Aegis listening"
        );

        let mut last_reject_log: Option<Instant> = None;
        let mut backoff = AcceptBackoff::new();
        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(v) => {
                    backoff.reset();
                    v
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    error!(error = %e, retry_in = ?delay, "Failed to accept connection");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
            }

            let guard = match self.limiter.acquire(&peer) {
                Ok(guard) => guard,
                Err(e) => {
                    let now = Instant::now();
                    if last_reject_log.map_or(true, |t| now - t >= REJECT_LOG_INTERVAL) {
                        warn!(peer = %peer, error = %e, "Rejecting connection");
                        last_reject_log = Some(now);
                    }
                    self.ctx.metrics.record_connection_rejected("per_ip");
                    self.reject(stream, MysqlError::too_many_user_connections());
                    continue;
                }
            };

            debug!(peer = %peer, "Accepted connection");
            if let Err(conn) = workers.serve(Accepted { stream, peer, guard }) {
                warn!(peer = %peer, "No idle worker available, rejecting connection");
                self.ctx.metrics.record_connection_rejected("workers");
                let Accepted { stream, guard, .. } = conn;
                drop(guard);
                self.reject(stream, MysqlError::too_many_connections());
            }
        }

        workers.stop();
    }

    /// Reply with `err` in the background and close, or just close when too
    /// many replies are already pending
    fn reject(&self, stream: TcpStream, err: MysqlError) {
        match self.rejects.clone().try_acquire_owned() {
            Ok(permit) => {
                tokio::spawn(async move {
                    if tokio::time::timeout(REJECT_TIMEOUT, send_rejection(stream, err))
                        .await
                        .is_err()
                    {
                        debug!("Timed out sending rejection");
                    }
                    drop(permit);
                });
            }
            Err(_) => {
                debug!("Too many pending rejections, closing connection");
                drop(stream);
            }
        }
    }
}

/// Tell a client it was not admitted, then close the connection
///
/// No capabilities have been negotiated yet, so the ERR carries no SQL state.
async fn send_rejection(stream: TcpStream, err: MysqlError) {
    let mut stream = PacketStream::new(stream);
    if let Err(e) = stream.write_err(&err, 0).await {
        debug!(error = %e, "Failed to send rejection");
    }
    let _ = stream.shutdown().await;
}
