//! The relation-algebra context.
//!
//! Every set, map and point borrows the context it was built in, so a
//! context always outlives the objects derived from it. The context also
//! carries the optional profiling hook.

use log::info;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

/// Call statistics of one operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpProfile {
    /// Number of calls
    pub calls: u64,
    /// Total number of basic sets over all arguments
    pub basic_sets: u64,
}

/// Owner of one family of relation-algebra objects.
///
/// Not `Sync`: objects of one context are built on one thread.
#[derive(Debug, Default)]
pub struct PBCtx {
    profiling: Cell<bool>,
    profile: RefCell<BTreeMap<&'static str, OpProfile>>,
}

impl PBCtx {
    /// Create a context with profiling disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context, optionally recording operation statistics.
    pub fn with_profiling(enabled: bool) -> Self {
        let ctx = Self::new();
        ctx.profiling.set(enabled);
        ctx
    }

    /// Enable or disable profiling.
    pub fn set_profiling(&self, enabled: bool) {
        self.profiling.set(enabled);
    }

    /// Check if profiling is enabled.
    pub fn is_profiling(&self) -> bool {
        self.profiling.get()
    }

    pub(crate) fn record(&self, op: &'static str, basic_sets: usize) {
        if !self.profiling.get() {
            return;
        }
        let mut profile = self.profile.borrow_mut();
        let entry = profile.entry(op).or_default();
        entry.calls += 1;
        entry.basic_sets += basic_sets as u64;
    }

    /// Snapshot of the recorded statistics, by operation name.
    pub fn profile(&self) -> BTreeMap<&'static str, OpProfile> {
        self.profile.borrow().clone()
    }

    /// Clear the recorded statistics.
    pub fn reset_profile(&self) {
        self.profile.borrow_mut().clear();
    }

    /// Write the recorded statistics to the log.
    pub fn log_profile(&self) {
        for (op, p) in self.profile.borrow().iter() {
            let avg = if p.calls == 0 { 0.0 } else { p.basic_sets as f64 / p.calls as f64 };
            info!("presburger {:<16} calls={:<8} avg_basic_sets={:.2}", op, p.calls, avg);
        }
    }

    pub(crate) fn same(&self, other: &PBCtx) -> bool {
        std::ptr::eq(self, other)
    }
}
