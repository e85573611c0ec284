//! Tree edit distance.
//!
//! Exact distance is Zhang–Shasha over ordered labeled trees with a weighted
//! [`CostModel`]. [`ShapeSignature`] gives a cheap admissible lower bound so
//! nearest-state search can skip most exact computations.

use crate::tree::{NodeKind, SyntaxTree};
use serde::{Deserialize, Serialize};

/// Per-operation edit costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModel {
    pub insert: u32,
    pub delete: u32,
    pub relabel: u32,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            insert: 1,
            delete: 1,
            relabel: 1,
        }
    }
}

// ============================================================================
// Shape signatures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShapeSignature {
    pub nodes: u32,
    pub depth: u32,
    pub leaves: u32,
    /// Node count per [`NodeKind`] ordinal.
    pub kinds: Vec<u32>,
}

impl ShapeSignature {
    pub fn of(tree: &SyntaxTree) -> Self {
        let mut kinds = vec![0u32; NodeKind::COUNT];
        let mut nodes = 0u32;
        let mut leaves = 0u32;
        let mut depth = 0u32;
        let mut stack = vec![(tree.root(), 1u32)];
        while let Some((id, d)) = stack.pop() {
            let node = tree.node(id);
            nodes += 1;
            kinds[node.kind.ordinal()] += 1;
            depth = depth.max(d);
            if node.children.is_empty() {
                leaves += 1;
            }
            stack.extend(node.children.iter().map(|&c| (c, d + 1)));
        }
        Self {
            nodes,
            depth,
            leaves,
            kinds,
        }
    }

    /// Sum of per-kind count differences.
    pub fn kind_l1(&self, other: &Self) -> u64 {
        self.kinds
            .iter()
            .zip(&other.kinds)
            .map(|(a, b)| u64::from(a.abs_diff(*b)))
            .sum()
    }

    /// Lower bound on the edit distance from `self` to `other`.
    ///
    /// Growing by `n` nodes needs at least `n` inserts (shrinking, deletes).
    /// Each insert/delete moves the kind histogram by 1, a relabel by at most 2.
    pub fn lower_bound(&self, other: &Self, cost: &CostModel) -> u64 {
        let size = if other.nodes >= self.nodes {
            u64::from(other.nodes - self.nodes) * u64::from(cost.insert)
        } else {
            u64::from(self.nodes - other.nodes) * u64::from(cost.delete)
        };
        let per_two = u64::from(cost.insert)
            .min(u64::from(cost.delete))
            .saturating_mul(2)
            .min(u64::from(cost.relabel));
        let kinds = (self.kind_l1(other) * per_two).div_ceil(2);
        size.max(kinds)
    }
}

// ============================================================================
// Zhang–Shasha
// ============================================================================

/// Postorder view of a tree with leftmost-leaf and keyroot tables.
#[derive(Debug, Clone)]
pub struct PreparedTree<'a> {
    labels: Vec<(NodeKind, Option<&'a str>)>,
    lml: Vec<usize>,
    keyroots: Vec<usize>,
}

impl<'a> PreparedTree<'a> {
    pub fn new(tree: &'a SyntaxTree) -> Self {
        let n = tree.node_count();
        let mut labels = Vec::with_capacity(n);
        let mut lml = Vec::with_capacity(n);

        // (node, first postorder index of its subtree, children visited?)
        let mut stack = vec![(tree.root(), false)];
        let mut starts: Vec<usize> = Vec::new();
        while let Some((id, expanded)) = stack.pop() {
            let node = tree.node(id);
            if expanded {
                let start = starts.pop().unwrap_or(labels.len());
                labels.push((node.kind, node.value.as_deref()));
                lml.push(start);
            } else {
                starts.push(labels.len());
                stack.push((id, true));
                for &c in node.children.iter().rev() {
                    stack.push((c, false));
                }
            }
        }

        let mut keyroots = Vec::new();
        let mut seen = vec![false; labels.len()];
        for i in (0..labels.len()).rev() {
            if !std::mem::replace(&mut seen[lml[i]], true) {
                keyroots.push(i);
            }
        }
        keyroots.reverse();

        Self {
            labels,
            lml,
            keyroots,
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Exact weighted tree edit distance from `a` to `b`.
pub fn tree_edit_distance(a: &SyntaxTree, b: &SyntaxTree, cost: &CostModel) -> u64 {
    prepared_distance(&PreparedTree::new(a), &PreparedTree::new(b), cost)
}

pub fn prepared_distance(a: &PreparedTree<'_>, b: &PreparedTree<'_>, cost: &CostModel) -> u64 {
    let (n, m) = (a.len(), b.len());
    if n == 0 || m == 0 {
        return n as u64 * u64::from(cost.delete) + m as u64 * u64::from(cost.insert);
    }
    let del = u64::from(cost.delete);
    let ins = u64::from(cost.insert);
    let rel = |i: usize, j: usize| {
        if a.labels[i] == b.labels[j] {
            0
        } else {
            u64::from(cost.relabel)
        }
    };

    let mut td = vec![0u64; n * m];
    let mut fd = vec![0u64; (n + 1) * (m + 1)];
    let w = m + 1;

    for &i in &a.keyroots {
        for &j in &b.keyroots {
            let (li, lj) = (a.lml[i], b.lml[j]);
            let rows = i - li + 2;
            let cols = j - lj + 2;
            fd[0] = 0;
            for x in 1..rows {
                fd[x * w] = fd[(x - 1) * w] + del;
            }
            for y in 1..cols {
                fd[y] = fd[y - 1] + ins;
            }
            for x in 1..rows {
                let di = li + x - 1;
                for y in 1..cols {
                    let dj = lj + y - 1;
                    let remove = fd[(x - 1) * w + y] + del;
                    let add = fd[x * w + y - 1] + ins;
                    if a.lml[di] == li && b.lml[dj] == lj {
                        let change = fd[(x - 1) * w + y - 1] + rel(di, dj);
                        let best = remove.min(add).min(change);
                        fd[x * w + y] = best;
                        td[di * m + dj] = best;
                    } else {
                        let p = a.lml[di] - li;
                        let q = b.lml[dj] - lj;
                        let subtree = fd[p * w + q] + td[di * m + dj];
                        fd[x * w + y] = remove.min(add).min(subtree);
                    }
                }
            }
        }
    }
    td[(n - 1) * m + (m - 1)]
}
