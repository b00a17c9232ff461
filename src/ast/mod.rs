//! The statement/expression tree that schedules rewrite.
//!
//! Nodes are immutable `Rc` values carrying process-unique [`ID`]s. Rewrites
//! build new trees that share untouched sub-trees with the old one, so a
//! snapshot of a tree is just a clone of its root.

pub mod display;
pub mod expr;
pub mod id;
pub mod index;
pub mod stmt;
pub mod visit;

pub use expr::{BinaryOp, Expr, ExprKind, ExprNode, UnaryOp};
pub use id::ID;
pub use index::TreeIndex;
pub use stmt::{AccessType, Buffer, DataType, ForProperty, MemType, ReduceOp, Stmt, StmtKind, StmtNode};
pub use visit::{Mutator, Visitor};
