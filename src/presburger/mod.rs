//! Presburger arithmetic: exact integer sets and relations.
//!
//! This module provides:
//! - A context ([`PBCtx`]) that every set, map and point borrows
//! - Named spaces ([`PBSpace`], [`Tuple`])
//! - Sets ([`PBSet`]), maps ([`PBMap`]) and points ([`PBPoint`])
//! - Symbolic builders ([`PBSetBuilder`], [`PBMapBuilder`])
//! - An isl-like text syntax for both directions
//!
//! Emptiness is decided with the Omega test; subtraction and complement
//! are exact because existentials are rewritten into integer divisions
//! before negation.

mod basic;
pub mod builder;
mod context;
pub mod linear;
pub mod map;
mod omega;
pub mod ops;
mod parser;
pub mod point;
mod relation;
pub mod set;
pub mod space;

pub use builder::{BuildConstraints, CmpOp, PBBuildExpr, PBBuilder, PBMapBuilder, PBSetBuilder};
pub use context::{OpProfile, PBCtx};
pub use linear::{Constraint, ConstraintKind, LinExpr};
pub use map::PBMap;
pub use ops::PBOps;
pub use point::PBPoint;
pub use relation::{DimBounds, SymbolicBound};
pub use set::PBSet;
pub use space::{PBSpace, Tuple};
