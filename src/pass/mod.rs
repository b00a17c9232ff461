//! Tree normalisation passes run around schedule primitives.
//!
//! None of them change what the program computes; they only move scopes
//! and sequence boundaries so that primitives see the shape they expect.

pub mod flatten;
pub mod hoist_var;
pub mod sink_var;

pub use flatten::flatten_stmt_seq;
pub use hoist_var::hoist_var_over_stmt_seq;
pub use sink_var::sink_var;
