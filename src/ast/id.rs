//! Process-unique node identities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a tree node.
///
/// Freshly generated when a node is constructed and kept by every rewrite
/// that preserves the node. Values are opaque: compare only for equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ID(u64);

impl ID {
    /// A new identity, never returned before in this process.
    pub fn new() -> Self {
        ID(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ID {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
