//! DuelSettle Hashing Primitives
//!
//! Digests used for deterministic winner selection and transaction hashes.

pub mod hash;

pub use hash::Transcript;
