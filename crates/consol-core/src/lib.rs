//! Multi-entity financial consolidation engine.
//!
//! Translates local-currency financial data into a group reporting
//! currency, eliminates intercompany activity, applies ownership-based
//! consolidation (full, proportional, equity method), attributes
//! non-controlling interest, validates and applies manual journal entries,
//! and reconciles balance-sheet accounts through a roll-forward model.
//!
//! The engine is stateless between cycles: all financial state lives in an
//! external multidimensional store addressed by a typed point-of-view key
//! ([`pov::PovKey`]), and all metadata comes from the hierarchy service
//! ([`store::MetadataService`]).

pub mod cycle;
pub mod elimination;
pub mod error;
pub mod flows;
pub mod journals;
pub mod ownership;
pub mod pov;
pub mod store;
pub mod translation;
pub mod types;

pub use error::ConsolError;
pub use types::*;

/// Standard result type for all consolidation operations
pub type ConsolResult<T> = Result<T, ConsolError>;
