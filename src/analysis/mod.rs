//! Analyses over the statement tree.
//!
//! Everything here is read-only: accesses, dependences between them, the
//! region a variable touches and which expressions vary with which loops.

pub mod access;
pub mod access_bound;
pub mod deps;
pub mod loop_variance;
pub mod lower;

pub use access::{collect_accesses, AccessKind, AccessPoint, CondInfo, LoopInfo};
pub use access_bound::{compute_access_bound, AccessBound, AccessBoundMode};
pub use deps::{DepDirection, DepKind, Dependency, FindDeps, FindDepsDir};
pub use loop_variance::{find_loop_variance, LoopVariance, Variance};
