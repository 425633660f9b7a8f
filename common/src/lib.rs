//! DuelSettle Common Types
//!
//! This crate contains shared types used across the DuelSettle engine,
//! including identifiers, amounts, round records and the error taxonomy.

pub mod identifiers;
pub mod monetary;
pub mod round;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use monetary::*;
pub use round::*;
pub use error::*;
pub use time::*;
