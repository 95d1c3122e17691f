use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::pooled::PooledConn;
use super::PoolError;
use crate::backend::{BackendClient, BackendError};

/// Creates a new backend connection
pub type DialFn<C> = Box<dyn Fn() -> BoxFuture<'static, Result<C, BackendError>> + Send + Sync>;

/// Health check run on an idle connection before handing it out.
/// Receives the time the connection went idle.
pub type TestOnBorrowFn<C> = Box<dyn Fn(&C, Instant) -> bool + Send + Sync>;

/// Configuration for a backend pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of idle connections to keep
    pub max_idle: usize,
    /// Maximum number of connections (idle + checked out); 0 = unbounded
    pub max_active: usize,
    /// Idle connections older than this are closed; zero disables eviction
    pub idle_timeout: Duration,
    /// Block in `get` when `max_active` is reached instead of failing
    pub wait: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle: 10,
            max_active: 0,
            idle_timeout: Duration::from_secs(240),
            wait: false,
        }
    }
}

struct IdleConn<C> {
    conn: C,
    since: Instant,
}

struct PoolState<C> {
    /// Most recently released at the front
    idle: VecDeque<IdleConn<C>>,
    active: usize,
    closed: bool,
}

/// A bounded pool of backend connections
///
/// Connections are borrowed for one statement and returned when the
/// [`PooledConn`] wrapper is closed. All state sits behind one mutex;
/// `available` wakes borrowers waiting for a release.
pub struct Pool<C> {
    name: String,
    config: PoolConfig,
    dial: DialFn<C>,
    test_on_borrow: Option<TestOnBorrowFn<C>>,
    state: Mutex<PoolState<C>>,
    available: Notify,
}

impl<C> Pool<C>
where
    C: BackendClient + 'static,
{
    /// Create a new pool; `name` identifies it in logs (usually the address)
    pub fn new(name: impl Into<String>, config: PoolConfig, dial: DialFn<C>) -> Self {
        Self {
            name: name.into(),
            config,
            dial,
            test_on_borrow: None,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                active: 0,
                closed: false,
            }),
            available: Notify::new(),
        }
    }

    pub fn with_test_on_borrow(mut self, test: TestOnBorrowFn<C>) -> Self {
        self.test_on_borrow = Some(test);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Get a connection from the pool
    ///
    /// Serves the most recently used idle connection if one passes the
    /// borrow test, otherwise dials a new one while under `max_active`.
    pub async fn get(self: &Arc<Self>) -> Result<PooledConn<C>, PoolError> {
        let conn = self.get_conn().await?;
        Ok(PooledConn::new(self.clone(), conn))
    }

    async fn get_conn(&self) -> Result<C, PoolError> {
        loop {
            // Also after every wakeup: a released entry may have aged out
            self.evict_stale().await;

            let notified = self.available.notified();
            tokio::pin!(notified);

            // Serve from the idle list, front first
            loop {
                let candidate = self.state.lock().idle.pop_front();
                let Some(ic) = candidate else { break };
                let healthy = match self.test_on_borrow {
                    Some(ref test) => test(&ic.conn, ic.since),
                    None => true,
                };
                if healthy && !ic.conn.is_broken() {
                    return Ok(ic.conn);
                }
                debug!(pool = %self.name, "Idle connection failed borrow test, closing");
                self.release();
                close_quietly(&self.name, ic.conn).await;
            }

            let dial = {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(PoolError::Closed);
                }

                if self.config.max_active == 0 || state.active < self.config.max_active {
                    state.active += 1;
                    true
                } else if !self.config.wait {
                    return Err(PoolError::Exhausted);
                } else {
                    // Register before unlocking so a release cannot slip past
                    notified.as_mut().enable();
                    false
                }
            };

            if dial {
                debug!(pool = %self.name, "Dialing new backend connection");
                return match (self.dial)().await {
                    Ok(conn) => Ok(conn),
                    Err(e) => {
                        warn!(pool = %self.name, error = %e, "Failed to dial backend");
                        self.release();
                        Err(PoolError::Dial(e))
                    }
                };
            }

            debug!(pool = %self.name, "Pool exhausted, waiting for a release");
            notified.await;
        }
    }

    /// Close idle connections older than the idle timeout, oldest first
    async fn evict_stale(&self) {
        if self.config.idle_timeout.is_zero() {
            return;
        }

        let stale: Vec<C> = {
            let mut state = self.state.lock();
            let now = Instant::now();
            let mut stale = Vec::new();
            while let Some(back) = state.idle.back() {
                if back.since + self.config.idle_timeout > now {
                    break;
                }
                if let Some(ic) = state.idle.pop_back() {
                    stale.push(ic.conn);
                }
                state.active -= 1;
                self.available.notify_one();
            }
            stale
        };

        if !stale.is_empty() {
            debug!(pool = %self.name, count = stale.len(), "Evicting idle connections");
        }
        for conn in stale {
            close_quietly(&self.name, conn).await;
        }
    }

    /// Return a connection; closes it when forced, when the pool is closed,
    /// or when it pushes the idle list past `max_idle`
    pub(crate) async fn put(&self, conn: C, force_close: bool) {
        let to_close = {
            let mut state = self.state.lock();
            if !state.closed && !force_close {
                state.idle.push_front(IdleConn {
                    conn,
                    since: Instant::now(),
                });
                if state.idle.len() > self.config.max_idle {
                    let evicted = state.idle.pop_back().map(|ic| ic.conn);
                    state.active -= 1;
                    self.available.notify_one();
                    evicted
                } else {
                    self.available.notify_one();
                    None
                }
            } else {
                state.active -= 1;
                self.available.notify_one();
                Some(conn)
            }
        };

        if let Some(conn) = to_close {
            close_quietly(&self.name, conn).await;
        }
    }

    /// Forget a checked-out connection without returning it
    pub(crate) fn discard(&self) {
        self.release();
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.active -= 1;
        self.available.notify_one();
    }

    /// Close the pool: idle connections are closed now, checked-out ones
    /// when they are returned, and waiters fail with `PoolError::Closed`
    pub async fn close(&self) {
        let idle = {
            let mut state = self.state.lock();
            let idle = std::mem::take(&mut state.idle);
            state.closed = true;
            state.active -= idle.len();
            self.available.notify_waiters();
            idle
        };

        debug!(pool = %self.name, count = idle.len(), "Closing pool");
        for ic in idle {
            close_quietly(&self.name, ic.conn).await;
        }
    }

    /// Connections currently open (idle + checked out)
    pub fn active_count(&self) -> usize {
        self.state.lock().active
    }

    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

async fn close_quietly<C: BackendClient>(pool: &str, mut conn: C) {
    if let Err(e) = conn.close().await {
        warn!(pool = %pool, error = %e, "Failed to close backend connection");
    }
}
