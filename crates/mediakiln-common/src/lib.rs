//! Shared types for the mediakiln transcoding service.
//!
//! This crate holds the pieces every other crate depends on: typed IDs,
//! the quality-tier ladder with its static encode parameters, and the
//! common error type.

pub mod error;
pub mod ids;
pub mod quality;

pub use error::{Error, Result};
pub use ids::{JobId, MediaId};
pub use quality::{EncodeParams, QualityTier};
