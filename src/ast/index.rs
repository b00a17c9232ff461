//! Rebuildable navigation index over a tree.
//!
//! Trees own their children strictly top-down; parents, ordering and
//! lookups by id or label all live here instead.

use super::id::ID;
use super::stmt::{Stmt, StmtKind};
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct Entry {
    stmt: Stmt,
    parent: Option<ID>,
    pre: usize,
    post: usize,
    depth: usize,
}

/// Map from statement id to node, parent and traversal order.
#[derive(Debug, Clone, Default)]
pub struct TreeIndex {
    entries: HashMap<ID, Entry>,
    labels: HashMap<String, Vec<ID>>,
    root: Option<ID>,
}

impl TreeIndex {
    pub fn build(root: &Stmt) -> Self {
        let mut index = TreeIndex { root: Some(root.id), ..Default::default() };
        let (mut pre, mut post) = (0, 0);
        index.visit(root, None, 0, &mut pre, &mut post);
        index
    }

    fn visit(&mut self, s: &Stmt, parent: Option<ID>, depth: usize, pre: &mut usize, post: &mut usize) {
        let my_pre = *pre;
        *pre += 1;
        for c in s.children() {
            self.visit(c, Some(s.id), depth + 1, pre, post);
        }
        if let Some(l) = &s.label {
            self.labels.entry(l.clone()).or_default().push(s.id);
        }
        self.entries.insert(s.id, Entry { stmt: s.clone(), parent, pre: my_pre, post: *post, depth });
        *post += 1;
    }

    pub fn root(&self) -> Option<ID> {
        self.root
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: ID) -> Option<&Stmt> {
        self.entries.get(&id).map(|e| &e.stmt)
    }

    pub fn contains(&self, id: ID) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn parent(&self, id: ID) -> Option<ID> {
        self.entries.get(&id).and_then(|e| e.parent)
    }

    pub fn depth(&self, id: ID) -> Option<usize> {
        self.entries.get(&id).map(|e| e.depth)
    }

    /// Pre-order position.
    pub fn order(&self, id: ID) -> Option<usize> {
        self.entries.get(&id).map(|e| e.pre)
    }

    /// Statements carrying `label`, in pre-order.
    pub fn find_label(&self, label: &str) -> Vec<ID> {
        let mut ids = self.labels.get(label).cloned().unwrap_or_default();
        ids.sort_by_key(|id| self.entries[id].pre);
        ids
    }

    /// Whether `a` is an ancestor of `b` (or `b` itself).
    pub fn is_ancestor(&self, a: ID, b: ID) -> bool {
        match (self.entries.get(&a), self.entries.get(&b)) {
            (Some(x), Some(y)) => x.pre <= y.pre && x.post >= y.post,
            _ => false,
        }
    }

    /// Whether `a` finishes before `b` starts.
    pub fn is_before(&self, a: ID, b: ID) -> bool {
        match (self.entries.get(&a), self.entries.get(&b)) {
            (Some(x), Some(y)) => x.post < y.post && x.pre < y.pre,
            _ => false,
        }
    }

    /// Ancestors of `id` from the root down, excluding `id`.
    pub fn ancestors(&self, id: ID) -> Vec<ID> {
        let mut out = Vec::new();
        let mut cur = self.parent(id);
        while let Some(p) = cur {
            out.push(p);
            cur = self.parent(p);
        }
        out.reverse();
        out
    }

    /// Lowest common ancestor, which may be one of the two nodes.
    pub fn lca(&self, a: ID, b: ID) -> Option<ID> {
        if !self.contains(a) || !self.contains(b) {
            return None;
        }
        let mut cur = Some(a);
        while let Some(c) = cur {
            if self.is_ancestor(c, b) {
                return Some(c);
            }
            cur = self.parent(c);
        }
        None
    }

    /// Loops strictly enclosing `id`, outermost first.
    pub fn enclosing_loops(&self, id: ID) -> Vec<ID> {
        self.ancestors(id).into_iter().filter(|a| self.entries[a].stmt.is_for()).collect()
    }

    /// The `VarDef` of `name` in scope at `id`.
    pub fn find_var_def(&self, id: ID, name: &str) -> Option<ID> {
        let mut cur = Some(id);
        while let Some(c) = cur {
            if let StmtKind::VarDef { name: n, .. } = &self.entries.get(&c)?.stmt.kind {
                if n == name {
                    return Some(c);
                }
            }
            cur = self.parent(c);
        }
        None
    }

    /// Every indexed statement matching `pred`, in pre-order.
    pub fn filter(&self, pred: impl Fn(&Stmt) -> bool) -> Vec<ID> {
        let mut ids: Vec<(usize, ID)> =
            self.entries.iter().filter(|(_, e)| pred(&e.stmt)).map(|(id, e)| (e.pre, *id)).collect();
        ids.sort_unstable();
        ids.into_iter().map(|(_, id)| id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::expr::{int, var};
    use crate::ast::stmt::{for_range, labeled, seq, store};

    #[test]
    fn test_index_navigation() {
        let a = store("a", vec![var("i")], int(0));
        let b = store("b", vec![var("j")], int(1));
        let inner = labeled("Lj", for_range("j", int(0), int(4), b.clone()));
        let outer = labeled("Li", for_range("i", int(0), int(4), seq(vec![a.clone(), inner.clone()])));
        let idx = TreeIndex::build(&outer);

        assert_eq!(idx.len(), 5);
        assert_eq!(idx.find_label("Lj"), vec![inner.id]);
        assert!(idx.is_ancestor(outer.id, b.id));
        assert!(!idx.is_ancestor(inner.id, a.id));
        assert!(idx.is_before(a.id, b.id));
        assert!(!idx.is_before(b.id, a.id));
        assert!(!idx.is_before(outer.id, a.id));
        assert_eq!(idx.enclosing_loops(b.id), vec![outer.id, inner.id]);
        assert_eq!(idx.lca(a.id, b.id), idx.parent(a.id));
        assert_eq!(idx.lca(inner.id, b.id), Some(inner.id));
        assert_eq!(idx.filter(|s| s.is_for()), vec![outer.id, inner.id]);
    }
}
