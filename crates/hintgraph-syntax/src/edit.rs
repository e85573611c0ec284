//! Structural edit scripts.
//!
//! [`diff`] produces the script that turns one tree into another; it labels
//! graph edges and is what a hint hands to the student. Scripts are applied
//! in three phases:
//!
//! 1. deletes, by source path, deepest/last first;
//! 2. inserts, by target path, in preorder;
//! 3. relabels, by target path.
//!
//! After phase 1 only matched nodes remain, so every later path resolves
//! against a tree whose already-visited prefix agrees with the target.

use crate::digest::Fnv1a64;
use crate::distance::CostModel;
use crate::tree::{Label, NestedNode, SyntaxTree, TreePath};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditOp {
    Delete { path: TreePath, subtree: NestedNode },
    Insert { path: TreePath, subtree: NestedNode },
    Relabel { path: TreePath, from: Label, to: Label },
}

impl EditOp {
    pub fn path(&self) -> &TreePath {
        match self {
            EditOp::Delete { path, .. } | EditOp::Insert { path, .. } | EditOp::Relabel { path, .. } => {
                path
            }
        }
    }

    pub fn cost(&self, model: &CostModel) -> u64 {
        match self {
            EditOp::Delete { subtree, .. } => subtree.size() as u64 * u64::from(model.delete),
            EditOp::Insert { subtree, .. } => subtree.size() as u64 * u64::from(model.insert),
            EditOp::Relabel { .. } => u64::from(model.relabel),
        }
    }
}

impl fmt::Display for EditOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditOp::Delete { path, subtree } => write!(f, "- {path} {subtree}"),
            EditOp::Insert { path, subtree } => write!(f, "+ {path} {subtree}"),
            EditOp::Relabel { path, from, to } => write!(f, "~ {path} {from} -> {to}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditKind {
    Delete,
    Insert,
    Relabel,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("edit path {0} does not exist")]
    PathNotFound(TreePath),
    #[error("edit at {path} does not fit: {reason}")]
    Conflict { path: TreePath, reason: String },
}

/// Ordered edit script (deletes, then inserts, then relabels).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EditScript {
    ops: Vec<EditOp>,
}

impl EditScript {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a script from ops in any order; phases are re-established.
    pub fn from_ops(ops: Vec<EditOp>) -> Self {
        let mut deletes = Vec::new();
        let mut inserts = Vec::new();
        let mut relabels = Vec::new();
        for op in ops {
            match op {
                EditOp::Delete { .. } => deletes.push(op),
                EditOp::Insert { .. } => inserts.push(op),
                EditOp::Relabel { .. } => relabels.push(op),
            }
        }
        deletes.sort_by(|a, b| b.path().cmp(a.path()));
        inserts.sort_by(|a, b| a.path().cmp(b.path()));
        relabels.sort_by(|a, b| a.path().cmp(b.path()));
        deletes.extend(inserts);
        deletes.extend(relabels);
        Self { ops: deletes }
    }

    pub fn ops(&self) -> &[EditOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn cost(&self, model: &CostModel) -> u64 {
        self.ops.iter().map(|op| op.cost(model)).sum()
    }

    /// Most frequent operation kind (ties prefer delete, then insert).
    pub fn kind(&self) -> Option<EditKind> {
        let mut counts = [0usize; 3];
        for op in &self.ops {
            counts[match op {
                EditOp::Delete { .. } => 0,
                EditOp::Insert { .. } => 1,
                EditOp::Relabel { .. } => 2,
            }] += 1;
        }
        let kinds = [EditKind::Delete, EditKind::Insert, EditKind::Relabel];
        counts
            .iter()
            .zip(kinds)
            .filter(|(c, _)| **c > 0)
            .max_by(|(a, ka), (b, kb)| a.cmp(b).then(kb.cmp(ka)))
            .map(|(_, k)| k)
    }

    /// FNV-1a over the rendered script; edge identity key.
    pub fn digest(&self) -> u64 {
        let mut h = Fnv1a64::new();
        for op in &self.ops {
            h.write(op.to_string().as_bytes());
            h.write(b"\n");
        }
        h.finish()
    }

    pub fn apply(&self, root: &NestedNode) -> Result<NestedNode, ApplyError> {
        let mut out = root.clone();
        for op in &self.ops {
            apply_op(&mut out, op)?;
        }
        Ok(out)
    }

    pub fn apply_tree(&self, tree: &SyntaxTree) -> Result<SyntaxTree, ApplyError> {
        self.apply(&tree.to_nested())
            .map(|n| SyntaxTree::from_nested(&n))
    }
}

impl fmt::Display for EditScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, op) in self.ops.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{op}")?;
        }
        Ok(())
    }
}

fn node_at_mut<'a>(root: &'a mut NestedNode, path: &TreePath) -> Option<&'a mut NestedNode> {
    let mut cur = root;
    for &i in path.indices() {
        cur = cur.children.get_mut(i as usize)?;
    }
    Some(cur)
}

fn apply_op(root: &mut NestedNode, op: &EditOp) -> Result<(), ApplyError> {
    match op {
        EditOp::Delete { path, subtree } => {
            let (parent, index) = path.split_last().ok_or_else(|| ApplyError::Conflict {
                path: path.clone(),
                reason: "cannot delete the root".to_string(),
            })?;
            let parent =
                node_at_mut(root, &parent).ok_or_else(|| ApplyError::PathNotFound(path.clone()))?;
            match parent.children.get(index) {
                None => return Err(ApplyError::PathNotFound(path.clone())),
                Some(found) if found != subtree => {
                    return Err(ApplyError::Conflict {
                        path: path.clone(),
                        reason: format!("expected {subtree}, found {found}"),
                    });
                }
                Some(_) => {}
            }
            parent.children.remove(index);
        }
        EditOp::Insert { path, subtree } => {
            let (parent, index) = path.split_last().ok_or_else(|| ApplyError::Conflict {
                path: path.clone(),
                reason: "cannot insert a second root".to_string(),
            })?;
            let parent =
                node_at_mut(root, &parent).ok_or_else(|| ApplyError::PathNotFound(path.clone()))?;
            if index > parent.children.len() {
                return Err(ApplyError::PathNotFound(path.clone()));
            }
            parent.children.insert(index, subtree.clone());
        }
        EditOp::Relabel { path, from, to } => {
            let node = node_at_mut(root, path).ok_or_else(|| ApplyError::PathNotFound(path.clone()))?;
            if node.label() != *from {
                return Err(ApplyError::Conflict {
                    path: path.clone(),
                    reason: format!("expected label {from}, found {}", node.label()),
                });
            }
            node.kind = to.kind;
            node.value = to.value.clone();
        }
    }
    Ok(())
}

// ============================================================================
// Diff
// ============================================================================

/// Edit script turning `from` into `to`.
pub fn diff(from: &SyntaxTree, to: &SyntaxTree) -> EditScript {
    diff_nested(&from.to_nested(), &to.to_nested())
}

pub fn diff_nested(from: &NestedNode, to: &NestedNode) -> EditScript {
    let mut ops = Vec::new();
    let mut matched = vec![Matched {
        a: from,
        b: to,
        sp: TreePath::root(),
        dp: TreePath::root(),
    }];
    while let Some(pair) = matched.pop() {
        pair.diff(&mut ops, &mut matched);
    }
    EditScript::from_ops(ops)
}

/// Two nodes paired by the alignment, with their source and target paths.
struct Matched<'a> {
    a: &'a NestedNode,
    b: &'a NestedNode,
    sp: TreePath,
    dp: TreePath,
}

impl<'a> Matched<'a> {
    /// Emit a relabel if needed, then align children; paired children are
    /// queued on `work` instead of being descended into.
    fn diff(&self, ops: &mut Vec<EditOp>, work: &mut Vec<Matched<'a>>) {
        let (a, b) = (self.a, self.b);
        if a.kind != b.kind || a.value != b.value {
            ops.push(EditOp::Relabel {
                path: self.dp.clone(),
                from: a.label(),
                to: b.label(),
            });
        }
        if a.children == b.children {
            return;
        }

        let exact = lcs(&a.children, &b.children, |x, y| x == y);
        let mut prev = (0usize, 0usize);
        for &(i, j) in exact.iter().chain(std::iter::once(&(a.children.len(), b.children.len()))) {
            self.align_gap(prev.0..i, prev.1..j, ops, work);
            prev = (i + 1, j + 1);
        }
    }

    /// Align the unmatched children `a[ra]` with `b[rb]`: same-kind pairs
    /// are matched, positional leftovers are relabeled, the rest
    /// deleted/inserted.
    fn align_gap(
        &self,
        ra: std::ops::Range<usize>,
        rb: std::ops::Range<usize>,
        ops: &mut Vec<EditOp>,
        work: &mut Vec<Matched<'a>>,
    ) {
        let (a, b) = (self.a, self.b);
        let xs = &a.children[ra.clone()];
        let ys = &b.children[rb.clone()];
        if xs.is_empty() && ys.is_empty() {
            return;
        }
        let pair = move |si: usize, dj: usize| Matched {
            a: &a.children[si],
            b: &b.children[dj],
            sp: self.sp.child(si),
            dp: self.dp.child(dj),
        };

        let same_kind = lcs(xs, ys, |x, y| x.kind == y.kind);
        let mut prev = (0usize, 0usize);
        for &(i, j) in same_kind.iter().chain(std::iter::once(&(xs.len(), ys.len()))) {
            let (gx, gy) = (prev.0..i, prev.1..j);
            let paired = gx.len().min(gy.len());
            for k in 0..paired {
                work.push(pair(ra.start + gx.start + k, rb.start + gy.start + k));
            }
            for si in gx.start + paired..gx.end {
                let si = ra.start + si;
                ops.push(EditOp::Delete {
                    path: self.sp.child(si),
                    subtree: a.children[si].clone(),
                });
            }
            for dj in gy.start + paired..gy.end {
                let dj = rb.start + dj;
                ops.push(EditOp::Insert {
                    path: self.dp.child(dj),
                    subtree: b.children[dj].clone(),
                });
            }
            if i < xs.len() {
                work.push(pair(ra.start + i, rb.start + j));
            }
            prev = (i + 1, j + 1);
        }
    }
}

/// Longest common subsequence as matched index pairs (leftmost on ties).
fn lcs<T>(xs: &[T], ys: &[T], eq: impl Fn(&T, &T) -> bool) -> Vec<(usize, usize)> {
    let (n, m) = (xs.len(), ys.len());
    if n == 0 || m == 0 {
        return Vec::new();
    }
    // table[i][j] = LCS length of xs[i..], ys[j..]
    let w = m + 1;
    let mut table = vec![0u32; (n + 1) * w];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i * w + j] = if eq(&xs[i], &ys[j]) {
                table[(i + 1) * w + j + 1] + 1
            } else {
                table[(i + 1) * w + j].max(table[i * w + j + 1])
            };
        }
    }
    let mut pairs = Vec::with_capacity(table[0] as usize);
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if eq(&xs[i], &ys[j]) && table[i * w + j] == table[(i + 1) * w + j + 1] + 1 {
            pairs.push((i, j));
            i += 1;
            j += 1;
        } else if table[(i + 1) * w + j] >= table[i * w + j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notation::parse_nested;
    use crate::tree::NodeKind;

    fn n(text: &str) -> NestedNode {
        parse_nested(text).unwrap()
    }

    #[test]
    fn appended_statement_is_one_insert() {
        let a = n("(module (assign (name v0) (const 1)))");
        let b = n("(module (assign (name v0) (const 1)) (assign (name v1) (const 2)))");
        let script = diff_nested(&a, &b);
        assert_eq!(script.len(), 1);
        assert_eq!(
            script.ops()[0],
            EditOp::Insert {
                path: TreePath::from_indices(vec![1]),
                subtree: n("(assign (name v1) (const 2))"),
            }
        );
        assert_eq!(script.apply(&a).unwrap(), b);
        assert_eq!(script.cost(&CostModel::default()), 3);
    }

    #[test]
    fn changed_literal_is_a_relabel() {
        let a = n("(module (assign (name v0) (const 1)) (expr (name v0)))");
        let b = n("(module (assign (name v0) (const 2)) (expr (name v0)))");
        let script = diff_nested(&a, &b);
        assert_eq!(script.to_string(), "~ /0/1 const:1 -> const:2");
        assert_eq!(script.kind(), Some(EditKind::Relabel));
        assert_eq!(script.apply(&a).unwrap(), b);
    }

    #[test]
    fn mixed_edits_apply_in_phase_order() {
        let a = n("(module (pass) (assign (name v0) (const 1)) (expr (name v0)) (break))");
        let b = n(
            "(module (assign (name v0) (bin_op + (const 1) (name v1))) (while (name v0) (block (break))) (expr (name v0)))",
        );
        let script = diff_nested(&a, &b);
        assert_eq!(script.apply(&a).unwrap(), b);
        assert_eq!(diff_nested(&b, &a).apply(&b).unwrap(), a);
    }

    #[test]
    fn identical_trees_diff_to_nothing() {
        let a = n("(module (expr (call (name print) (const 1))))");
        assert!(diff_nested(&a, &a).is_empty());
        assert_eq!(diff_nested(&a, &a).digest(), EditScript::empty().digest());
    }

    #[test]
    fn apply_reports_conflicts() {
        let a = n("(module (assign (name v0) (const 1)))");
        let b = n("(module (assign (name v0) (const 2)))");
        let script = diff_nested(&a, &b);
        let other = n("(module (assign (name v0) (const 7)))");
        assert!(matches!(script.apply(&other), Err(ApplyError::Conflict { .. })));
        assert!(matches!(
            script.apply(&n("(module)")),
            Err(ApplyError::PathNotFound(_))
        ));
    }

    #[test]
    fn deep_trees_diff_and_apply() {
        fn chain(depth: usize, leaf: &str) -> NestedNode {
            let mut inner = NestedNode::new(NodeKind::Const, Some(leaf), Vec::new());
            for _ in 0..depth {
                inner = NestedNode::new(NodeKind::UnaryOp, Some("-"), vec![inner]);
            }
            NestedNode::new(
                NodeKind::Module,
                None,
                vec![NestedNode::new(NodeKind::Expr, None, vec![inner])],
            )
        }
        let a = chain(5_000, "1");
        let b = chain(5_000, "2");
        let script = diff_nested(&a, &b);
        assert_eq!(script.len(), 1);
        assert_eq!(script.ops()[0].path().indices().len(), 5_002);
        assert_eq!(script.apply(&a).unwrap(), b);

        let tree = SyntaxTree::from_nested(&a);
        assert_eq!(diff(&tree, &tree).len(), 0);
    }

    #[test]
    fn digest_tracks_content() {
        let a = n("(module)");
        let b1 = n("(module (pass))");
        let b2 = n("(module (break))");
        assert_ne!(diff_nested(&a, &b1).digest(), diff_nested(&a, &b2).digest());
    }
}
