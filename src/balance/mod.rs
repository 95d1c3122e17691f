mod rebalancer;

pub use rebalancer::{Rebalancer, WeightedServer};
