//! # SonoScore Common Library
//!
//! Shared code for the SonoScore services including:
//! - Database initialization and schema
//! - Domain models for the protocol taxonomy and evaluation ledger
//! - Configuration loading
//! - Protocol key derivation and score clamping

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod scoring;
pub mod slug;

pub use error::{Error, Result};
pub use models::{EvaluationStatus, TaxonomyLevel};
pub use scoring::clamp_score;
pub use slug::derive_key;
