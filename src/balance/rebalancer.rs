use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::backend::BackendClient;
use crate::pool::{Pool, PoolError, PooledConn};

/// A backend pool with its static weight and advisory health flag
pub struct WeightedServer<C>
where
    C: BackendClient + 'static,
{
    weight: i64,
    healthy: AtomicBool,
    pool: Arc<Pool<C>>,
}

impl<C> WeightedServer<C>
where
    C: BackendClient + 'static,
{
    pub fn new(weight: u32, pool: Arc<Pool<C>>) -> Self {
        Self {
            weight: weight as i64,
            healthy: AtomicBool::new(true),
            pool,
        }
    }

    pub fn weight(&self) -> i64 {
        self.weight
    }

    pub fn pool(&self) -> &Arc<Pool<C>> {
        &self.pool
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Weight used for selection: unhealthy servers count as zero
    fn effective_weight(&self) -> i64 {
        if self.is_healthy() {
            self.weight
        } else {
            0
        }
    }
}

struct Cursor {
    index: usize,
    current_weight: i64,
}

/// Smooth weighted round-robin over a fixed set of backend pools
///
/// Weights [2, 4, 8] yield the cycle 2, 2, 1, 2, 0, 1, 2.
pub struct Rebalancer<C>
where
    C: BackendClient + 'static,
{
    servers: Vec<WeightedServer<C>>,
    gcd: i64,
    cursor: Mutex<Cursor>,
}

impl<C> Rebalancer<C>
where
    C: BackendClient + 'static,
{
    pub fn new(servers: Vec<WeightedServer<C>>) -> Self {
        let gcd = servers.iter().fold(0, |acc, s| gcd(acc, s.weight));
        Self {
            servers,
            gcd,
            cursor: Mutex::new(Cursor {
                index: usize::MAX,
                current_weight: 0,
            }),
        }
    }

    pub fn servers(&self) -> &[WeightedServer<C>] {
        &self.servers
    }

    pub fn set_healthy(&self, index: usize, healthy: bool) {
        if let Some(server) = self.servers.get(index) {
            server.healthy.store(healthy, Ordering::Relaxed);
        }
    }

    /// Pick the next server index
    pub fn next_index(&self) -> Result<usize, PoolError> {
        let n = self.servers.len();
        if n == 0 {
            return Err(PoolError::NoAvailableServer);
        }

        let mut cursor = self.cursor.lock();
        loop {
            cursor.index = cursor.index.wrapping_add(1) % n;
            if cursor.index == 0 {
                cursor.current_weight -= self.gcd.max(1);
                if cursor.current_weight <= 0 {
                    cursor.current_weight = self.max_weight();
                    if cursor.current_weight == 0 {
                        return Err(PoolError::NoAvailableServer);
                    }
                }
            }

            let weight = self.servers[cursor.index].effective_weight();
            if weight > 0 && weight >= cursor.current_weight {
                return Ok(cursor.index);
            }
        }
    }

    /// Borrow a connection from the next server's pool
    pub async fn get(&self) -> Result<PooledConn<C>, PoolError> {
        let index = self.next_index()?;
        let server = &self.servers[index];
        debug!(server = %server.pool.name(), weight = server.weight, "Selected reader");
        server.pool.get().await
    }

    pub async fn close(&self) {
        for server in &self.servers {
            server.pool.close().await;
        }
    }

    fn max_weight(&self) -> i64 {
        self.servers
            .iter()
            .map(WeightedServer::effective_weight)
            .max()
            .unwrap_or(0)
    }
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{fake_pool, FakeConn, PoolConfig};

    fn rebalancer(weights: &[u32]) -> Rebalancer<FakeConn> {
        let servers = weights
            .iter()
            .map(|&w| WeightedServer::new(w, Arc::new(fake_pool(PoolConfig::default()).0)))
            .collect();
        Rebalancer::new(servers)
    }

    #[test]
    fn test_gcd() {
        assert_eq!(gcd(0, 2), 2);
        assert_eq!(gcd(2, 4), 2);
        assert_eq!(gcd(6, 8), 2);
        assert_eq!(gcd(0, 0), 0);
        assert_eq!(rebalancer(&[2, 4, 8]).gcd, 2);
    }

    #[test]
    fn test_smooth_order() {
        let rb = rebalancer(&[2, 4, 8]);
        let picks: Vec<usize> = (0..7).map(|_| rb.next_index().unwrap()).collect();
        assert_eq!(picks, vec![2, 2, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_proportional_over_two_cycles() {
        let rb = rebalancer(&[2, 4, 8]);
        let mut counts = [0usize; 3];
        for _ in 0..14 {
            counts[rb.next_index().unwrap()] += 1;
        }
        assert_eq!(counts, [2, 4, 8]);
    }

    #[test]
    fn test_equal_weights_round_robin() {
        let rb = rebalancer(&[5, 5]);
        let picks: Vec<usize> = (0..4).map(|_| rb.next_index().unwrap()).collect();
        assert_eq!(picks, vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_no_available_server() {
        assert!(matches!(
            rebalancer(&[]).next_index(),
            Err(PoolError::NoAvailableServer)
        ));
        assert!(matches!(
            rebalancer(&[0, 0]).next_index(),
            Err(PoolError::NoAvailableServer)
        ));

        let rb = rebalancer(&[3]);
        rb.set_healthy(0, false);
        assert!(matches!(rb.next_index(), Err(PoolError::NoAvailableServer)));
    }

    #[test]
    fn test_unhealthy_server_skipped() {
        let rb = rebalancer(&[2, 4, 8]);
        rb.set_healthy(2, false);
        let mut counts = [0usize; 3];
        for _ in 0..12 {
            counts[rb.next_index().unwrap()] += 1;
        }
        assert_eq!(counts[2], 0);
        assert_eq!(counts[0] * 2, counts[1]);
    }

    #[tokio::test]
    async fn test_get_delegates_to_selected_pool() {
        let rb = rebalancer(&[1, 3]);
        let conn = rb.get().await.unwrap();
        assert!(Arc::ptr_eq(conn.pool(), rb.servers()[1].pool()));
    }
}
