//! Shared utilities: the error taxonomy.

pub mod errors;

pub use errors::*;
