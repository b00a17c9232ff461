//! # polysched - dependence-checked loop-nest scheduling
//!
//! A scheduling core for tree-structured loop programs:
//! - exact Presburger sets and maps (integer tuples under affine constraints)
//! - access collection and dependence queries (`FindDeps`)
//! - access bounds and loop variance
//! - scope normalisation passes
//! - legality-checked schedule primitives with transactions and a replayable log
//!
//! ## Architecture
//!
//! ```text
//! Tree (ast) → Accesses → Presburger relations → Dependences → Schedule primitives
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use polysched::prelude::*;
//!
//! let mut s = Schedule::new(ast);
//! let i = s.find("Li")?;
//! let j = s.find("Lj")?;
//! s.reorder(&[j, i])?;
//! println!("{}", s.ast());
//! ```

#![warn(clippy::all)]

pub mod presburger;
pub mod ast;
pub mod analysis;
pub mod pass;
pub mod schedule;
pub mod utils;

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::ast::{Expr, Stmt, StmtKind, TreeIndex, ID};
    pub use crate::presburger::{PBCtx, PBMap, PBSet};
    pub use crate::analysis::{
        DepDirection, DepKind, Dependency, FindDeps, AccessBoundMode, find_loop_variance,
    };
    pub use crate::schedule::{
        DepDiffDecider, FissionFuseDecider, FissionSide, MoveToSide, Schedule, ScheduleLog, SplitBy,
    };
    pub use crate::utils::errors::*;
    pub use crate::ScheduleConfig;
}

use serde::{Deserialize, Serialize};

/// Configuration of a scheduling session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Ignore write-after-write between reductions of the same operator
    pub ignore_reduction_waw: bool,
    /// Check access bounds against the coefficient set of the region
    pub verify_bounds: bool,
    /// Count Presburger operations per kind
    pub profile: bool,
    /// Let `auto_fission_fuse` split loops
    pub auto_fission: bool,
    /// Let `auto_fission_fuse` fuse loops
    pub auto_fuse: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            ignore_reduction_waw: true,
            verify_bounds: true,
            profile: false,
            auto_fission: true,
            auto_fuse: true,
        }
    }
}

impl ScheduleConfig {
    pub fn with_ignore_reduction_waw(mut self, on: bool) -> Self {
        self.ignore_reduction_waw = on;
        self
    }

    pub fn with_verify_bounds(mut self, on: bool) -> Self {
        self.verify_bounds = on;
        self
    }

    pub fn with_profile(mut self, on: bool) -> Self {
        self.profile = on;
        self
    }

    pub fn with_auto_fission(mut self, on: bool) -> Self {
        self.auto_fission = on;
        self
    }

    pub fn with_auto_fuse(mut self, on: bool) -> Self {
        self.auto_fuse = on;
        self
    }
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_config_builders() {
        let c = ScheduleConfig::default().with_auto_fuse(false).with_profile(true);
        assert!(!c.auto_fuse && c.profile && c.auto_fission && c.ignore_reduction_waw);
        let parsed: ScheduleConfig = serde_json::from_str(r#"{"verify_bounds": false}"#).unwrap();
        assert_eq!(parsed, ScheduleConfig::default().with_verify_bounds(false));
    }
}
