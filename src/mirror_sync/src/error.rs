//! Crate error type.

use thiserror::Error;
use upstream_clients::errors::UpstreamError;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("database error: {0}")]
    Db(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("configuration error: {0}")]
    Config(String),

    /// Another run of the same reconcile holds the entity lock.
    #[error("sync for {0} is already running")]
    AlreadyRunning(String),
}
