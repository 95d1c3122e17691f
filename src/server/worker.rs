//! Bounded pool of reusable connection workers
//!
//! Each worker is a task parked on its own single-slot channel. `serve`
//! hands a connection to the most recently parked worker, or spawns a new
//! one while under the limit. Workers idle for longer than the idle window
//! are retired by a periodic sweep, one per pass.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Per-connection handler run by a worker; the connection is dropped
/// (and so closed) when the returned future completes
pub type WorkerFn<T> = Arc<dyn Fn(T) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct ReadyWorker {
    slot: usize,
    since: Instant,
}

struct WorkerState<T> {
    /// Senders of live workers, indexed by slot
    slots: Vec<Option<mpsc::Sender<T>>>,
    /// Slot indexes free for reuse
    free: Vec<usize>,
    /// Parked workers, oldest first
    ready: Vec<ReadyWorker>,
    workers: usize,
    must_stop: bool,
}

struct Inner<T> {
    max_workers: usize,
    idle_timeout: Duration,
    handler: WorkerFn<T>,
    state: Mutex<WorkerState<T>>,
}

/// A bounded set of workers serving accepted connections
pub struct WorkerPool<T: Send + 'static> {
    inner: Arc<Inner<T>>,
    shutdown: CancellationToken,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Create the pool and start its idle sweep
    pub fn start(max_workers: usize, idle_timeout: Duration, handler: WorkerFn<T>) -> Self {
        let pool = Self::new(max_workers, idle_timeout, handler);

        let sweeper = pool.inner.clone();
        let token = pool.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweeper.idle_timeout.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => sweeper.clean(),
                }
            }
            debug!("Worker sweep stopped");
        });

        pool
    }

    fn new(max_workers: usize, idle_timeout: Duration, handler: WorkerFn<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                max_workers,
                idle_timeout,
                handler,
                state: Mutex::new(WorkerState {
                    slots: Vec::new(),
                    free: Vec::new(),
                    ready: Vec::new(),
                    workers: 0,
                    must_stop: false,
                }),
            }),
            shutdown: CancellationToken::new(),
        }
    }

    /// Hand `conn` to a worker; gives it back when every worker is busy
    pub fn serve(&self, conn: T) -> Result<(), T> {
        let tx = {
            let mut state = self.inner.state.lock();
            if state.must_stop {
                return Err(conn);
            }
            match state.ready.pop() {
                Some(w) => state.slots[w.slot].clone(),
                None if state.workers < self.inner.max_workers => {
                    state.workers += 1;
                    let (tx, rx) = mpsc::channel(1);
                    let slot = match state.free.pop() {
                        Some(slot) => {
                            state.slots[slot] = Some(tx.clone());
                            slot
                        }
                        None => {
                            state.slots.push(Some(tx.clone()));
                            state.slots.len() - 1
                        }
                    };
                    tokio::spawn(self.inner.clone().run(slot, rx));
                    Some(tx)
                }
                None => return Err(conn),
            }
        };

        match tx {
            Some(tx) => tx.try_send(conn).map_err(|e| e.into_inner()),
            None => Err(conn),
        }
    }

    /// Stop idle workers now and busy ones after their current connection
    pub fn stop(&self) {
        self.shutdown.cancel();
        let mut state = self.inner.state.lock();
        state.must_stop = true;
        let ready = std::mem::take(&mut state.ready);
        for w in ready {
            state.slots[w.slot] = None;
        }
    }

    /// Live workers (busy + parked)
    pub fn workers_count(&self) -> usize {
        self.inner.state.lock().workers
    }

    /// Parked workers
    pub fn ready_count(&self) -> usize {
        self.inner.state.lock().ready.len()
    }

    #[cfg(test)]
    fn clean(&self) {
        self.inner.clean();
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl<T: Send + 'static> Inner<T> {
    async fn run(self: Arc<Self>, slot: usize, mut rx: mpsc::Receiver<T>) {
        while let Some(conn) = rx.recv().await {
            let result = AssertUnwindSafe((self.handler)(conn)).catch_unwind().await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Error when serving connection"),
                Err(panic) => {
                    let msg = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(panic = %msg, "Connection handler panicked");
                }
            }

            if !self.park(slot) {
                break;
            }
        }

        let mut state = self.state.lock();
        state.slots[slot] = None;
        state.free.push(slot);
        state.workers -= 1;
    }

    /// Return a worker to the ready stack; false once the pool is stopping
    fn park(&self, slot: usize) -> bool {
        let mut state = self.state.lock();
        if state.must_stop {
            return false;
        }
        state.ready.push(ReadyWorker {
            slot,
            since: Instant::now(),
        });
        true
    }

    /// Retire the oldest parked worker if it has idled past the window
    fn clean(&self) {
        let mut state = self.state.lock();
        if state.ready.len() > 1 && state.ready[0].since.elapsed() > self.idle_timeout {
            let w = state.ready.remove(0);
            // Dropping the sender ends the worker's receive loop
            state.slots[w.slot] = None;
            debug!(slot = w.slot, "Retiring idle worker");
        }
    }
}
