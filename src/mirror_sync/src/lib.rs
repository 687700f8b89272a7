//! Relational mirror of the POS and finance reference data.
//!
//! The heart of the crate is [`engine`]: a single reconcile template
//! (lock → audit row → fetch → map → batched upsert → mirror-delete →
//! terminal audit row, all writes in one transaction) parametrised per entity
//! through the [`engine::Reconcile`] trait, plus the parallel fan-outs that
//! run 8 POS / 13 finance / 16 entity-slice reconcilers concurrently.
//!
//! Everything time-related goes through [`tz::LocalClock`] — the project runs
//! in one operational timezone and the scheduler and audit log cross-reference
//! those instants, so no other module may call wall-clock primitives.

pub mod cache;
pub mod db;
pub mod engine;
pub mod error;
pub mod ft_models;
pub mod locks;
pub mod mappers;
pub mod mirror_delete;
pub mod models;
pub mod ops_models;
pub mod schema;
pub mod stock_balances;
pub mod sync_log;
pub mod tz;
pub mod upsert;

/// Rows per UPSERT statement. Round-trip latency to the remote database
/// dominates (~400 ms), so 500 rows per statement turns 500 round-trips
/// into one. No statement may ever carry more.
pub const BATCH_SIZE: usize = 500;
