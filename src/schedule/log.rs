//! The schedule log: applied primitives, replayable.

use super::fission::FissionSide;
use super::move_to::MoveToSide;
use super::split::SplitBy;
use crate::ast::ID;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A primitive with its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "primitive", rename_all = "snake_case")]
pub enum ScheduleOp {
    Reorder { order: Vec<ID> },
    Swap { order: Vec<ID> },
    Fission { loop_id: ID, side: FissionSide, split_point: ID },
    Fuse { loop0: ID, loop1: ID },
    Split { loop_id: ID, by: SplitBy },
    Merge { loop0: ID, loop1: ID },
    MoveTo { stmt: ID, side: MoveToSide, dst: ID },
}

impl ScheduleOp {
    /// Short name of the primitive.
    pub fn name(&self) -> &'static str {
        match self {
            ScheduleOp::Reorder { .. } => "reorder",
            ScheduleOp::Swap { .. } => "swap",
            ScheduleOp::Fission { .. } => "fission",
            ScheduleOp::Fuse { .. } => "fuse",
            ScheduleOp::Split { .. } => "split",
            ScheduleOp::Merge { .. } => "merge",
            ScheduleOp::MoveTo { .. } => "move_to",
        }
    }

    /// The same operation with every id passed through `f`.
    pub fn map_ids(&self, f: impl Fn(ID) -> ID) -> ScheduleOp {
        let all = |ids: &[ID]| ids.iter().map(|&i| f(i)).collect();
        match self {
            ScheduleOp::Reorder { order } => ScheduleOp::Reorder { order: all(order) },
            ScheduleOp::Swap { order } => ScheduleOp::Swap { order: all(order) },
            ScheduleOp::Fission { loop_id, side, split_point } => {
                ScheduleOp::Fission { loop_id: f(*loop_id), side: *side, split_point: f(*split_point) }
            }
            ScheduleOp::Fuse { loop0, loop1 } => ScheduleOp::Fuse { loop0: f(*loop0), loop1: f(*loop1) },
            ScheduleOp::Split { loop_id, by } => ScheduleOp::Split { loop_id: f(*loop_id), by: *by },
            ScheduleOp::Merge { loop0, loop1 } => ScheduleOp::Merge { loop0: f(*loop0), loop1: f(*loop1) },
            ScheduleOp::MoveTo { stmt, side, dst } => ScheduleOp::MoveTo { stmt: f(*stmt), side: *side, dst: f(*dst) },
        }
    }
}

impl fmt::Display for ScheduleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = |ids: &[ID]| ids.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(", ");
        match self {
            ScheduleOp::Reorder { order } => write!(f, "reorder([{}])", list(order)),
            ScheduleOp::Swap { order } => write!(f, "swap([{}])", list(order)),
            ScheduleOp::Fission { loop_id, side, split_point } => {
                write!(f, "fission({}, {:?}, {})", loop_id, side, split_point)
            }
            ScheduleOp::Fuse { loop0, loop1 } => write!(f, "fuse({}, {})", loop0, loop1),
            ScheduleOp::Split { loop_id, by } => write!(f, "split({}, {:?})", loop_id, by),
            ScheduleOp::Merge { loop0, loop1 } => write!(f, "merge({}, {})", loop0, loop1),
            ScheduleOp::MoveTo { stmt, side, dst } => write!(f, "move_to({}, {:?}, {})", stmt, side, dst),
        }
    }
}

/// One applied primitive.
///
/// `new_ids` lists the statements the primitive created, in pre-order of
/// the resulting tree. Replaying the same operation on the same tree
/// creates the same number of statements in the same order, which is how
/// later entries referring to them are re-targeted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleLogItem {
    #[serde(flatten)]
    pub op: ScheduleOp,
    #[serde(default)]
    pub new_ids: Vec<ID>,
}

impl fmt::Display for ScheduleLogItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op)
    }
}

/// Ordered list of applied primitives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleLog {
    items: Vec<ScheduleLogItem>,
}

impl ScheduleLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[ScheduleLogItem] {
        &self.items
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScheduleLogItem> {
        self.items.iter()
    }

    pub(crate) fn push(&mut self, item: ScheduleLogItem) {
        self.items.push(item);
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.items.truncate(len);
    }
}

impl fmt::Display for ScheduleLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for item in &self.items {
            writeln!(f, "{}", item)?;
        }
        Ok(())
    }
}

/// Translation of recorded ids to the ids of a replayed tree.
#[derive(Debug, Default)]
pub(crate) struct IdTranslation {
    map: HashMap<ID, ID>,
}

impl IdTranslation {
    pub fn get(&self, id: ID) -> ID {
        self.map.get(&id).copied().unwrap_or(id)
    }

    pub fn learn(&mut self, recorded: &[ID], replayed: &[ID]) {
        self.map.extend(recorded.iter().copied().zip(replayed.iter().copied()));
    }
}
