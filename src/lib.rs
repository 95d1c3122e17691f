//! Aegis: a MySQL proxy that splits reads across weighted replicas and
//! sends everything else to the master

pub mod backend;
pub mod balance;
pub mod config;
pub mod metrics;
pub mod parser;
pub mod pidfile;
pub mod pool;
pub mod protocol;
pub mod server;
pub mod session;
