use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tracing::info;

use crate::backend::{BackendClient, BackendConn};
use crate::balance::{Rebalancer, WeightedServer};
use crate::config::{BackendConfig, Config};
use crate::metrics::Metrics;
use crate::parser::SqlClassifier;
use crate::pool::{DialFn, Pool, PoolConfig};

/// Connection ids handed out start right after this value
pub const BASE_CONNECTION_ID: u32 = 10000;

/// Process-wide state shared by every session
///
/// Owns the backend pools, the connection-id counter and the metrics
/// registry; sessions receive it through an `Arc`.
pub struct ServerContext<C = BackendConn>
where
    C: BackendClient + 'static,
{
    pub config: Config,
    pub version: String,
    pub commit_id: String,
    pub writer: Arc<Pool<C>>,
    pub readers: Rebalancer<C>,
    pub metrics: Arc<Metrics>,
    pub classifier: SqlClassifier,
    next_connection_id: AtomicU32,
}

impl<C> ServerContext<C>
where
    C: BackendClient + 'static,
{
    pub fn new(
        config: Config,
        writer: Arc<Pool<C>>,
        readers: Rebalancer<C>,
        metrics: Metrics,
    ) -> Self {
        Self {
            config,
            version: env!("CARGO_PKG_VERSION").to_string(),
            commit_id: option_env!("AEGIS_COMMIT_ID").unwrap_or("unknown").to_string(),
            writer,
            readers,
            metrics: Arc::new(metrics),
            classifier: SqlClassifier::new(),
            next_connection_id: AtomicU32::new(BASE_CONNECTION_ID),
        }
    }

    pub fn next_connection_id(&self) -> u32 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Close every backend pool
    pub async fn close(&self) {
        self.writer.close().await;
        self.readers.close().await;
    }
}

impl ServerContext<BackendConn> {
    /// Build the writer pool and weighted reader pools from configuration
    pub fn from_config(config: Config) -> Result<Self, prometheus::Error> {
        let pool_config = PoolConfig::from(&config.pool);
        let writer = Arc::new(backend_pool(
            &config.backend,
            &config.backend.addr,
            pool_config.clone(),
        ));

        let readers = config
            .backend
            .readers()
            .into_iter()
            .map(|(addr, weight)| {
                // A reader on the master address shares the writer pool
                let pool = if addr == config.backend.addr {
                    writer.clone()
                } else {
                    Arc::new(backend_pool(&config.backend, &addr, pool_config.clone()))
                };
                info!(addr = %addr, weight, "Configured reader");
                WeightedServer::new(weight, pool)
            })
            .collect();

        Ok(Self::new(
            config,
            writer,
            Rebalancer::new(readers),
            Metrics::new()?,
        ))
    }
}

fn backend_pool(backend: &BackendConfig, addr: &str, config: PoolConfig) -> Pool<BackendConn> {
    let name = addr.to_string();
    let (addr, user, password, database) = (
        addr.to_string(),
        backend.user.clone(),
        backend.password.clone(),
        backend.database.clone(),
    );
    let dial: DialFn<BackendConn> = Box::new(move || {
        let (addr, user, password, database) =
            (addr.clone(), user.clone(), password.clone(), database.clone());
        async move { BackendConn::connect(&addr, &user, &password, &database).await }.boxed()
    });
    Pool::new(name, config, dial)
}
