//! Connection pool and schema bootstrap.

pub mod migrate;
pub mod pool;

pub use pool::{DbPool, PooledConn};
