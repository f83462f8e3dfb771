//! Curation library for the roster index: a JSONL store of influencer
//! profiles plus an integrity manifest.

pub mod archive;
pub mod config;
pub mod dedupe;
pub mod error;
pub mod fetcher;
pub mod filter;
pub mod handles;
pub mod manifest;
pub mod migrate;
pub mod pipeline;
pub mod provenance;
pub mod score;
pub mod sort;
pub mod store;

pub use config::RunConfig;
pub use error::{CurateError, ReconcileError};
pub use pipeline::{ReconcileReport, Stage, reconcile};
