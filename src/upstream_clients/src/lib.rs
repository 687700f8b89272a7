//! HTTP clients for the three upstream systems the back office talks to:
//!
//! - [`pos::PosClient`] — the on-prem POS server (XML + JSON, session token)
//! - [`finance::FinanceClient`] — the cloud finance system (JSON, Bearer)
//! - [`cloud::CloudClient`] — the POS cloud API (JSON, out-of-band token)
//!
//! Every client returns raw payloads (`serde_json::Value` records) without
//! business logic; mapping into mirror rows happens downstream. Errors are
//! classified once in [`errors::is_transient`] — that predicate is the only
//! source of truth for retry decisions anywhere in the workspace.

pub mod cloud;
pub mod errors;
pub mod finance;
pub mod pos;
pub mod redact;
