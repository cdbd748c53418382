//! Shared types: the crate error and digest newtype

pub mod error;
pub mod hash;

pub use error::{MirrorError, Result};
pub use hash::Hash32;
