//! Canonical form builder.
//!
//! `canonicalize` turns a parsed tree into the state key used by the solution
//! graph. Two snapshots that differ only in identifier spelling, comments or
//! layout canonicalize to the same [`CanonicalTree`]; so do the syntactic
//! alternates listed in the active [`RuleSet`].
//!
//! Pipeline:
//!
//! 0. validate against the node shape table;
//! 1. strip comments;
//! 2. anonymize identifiers to `v0, v1, ...` by first appearance (preorder);
//! 3. normalize bottom-up, applying rewrites at each node until none fires;
//! 4. repeat 2–3 until a round changes nothing.
//!
//! Every rewrite firing consumes one unit of [`CanonBudget::max_rewrites`].
//! When the budget runs out the builder stops rewriting, finishes the tree as
//! is, and reports [`CanonError::Timeout`] carrying that tree flagged
//! `approximate`.

use crate::digest::{render_digest, tree_fingerprint};
use crate::distance::ShapeSignature;
use crate::rules::{Rule, RuleSet, RuleSetId};
use crate::tree::{MalformedTreeError, NodeId, NodeKind, SyntaxTree, TreeBuilder, Visit};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanonBudget {
    pub max_rewrites: usize,
    pub max_rounds: usize,
}

impl Default for CanonBudget {
    fn default() -> Self {
        Self {
            max_rewrites: 10_000,
            max_rounds: 16,
        }
    }
}

#[derive(Debug, Error)]
pub enum CanonError {
    #[error(transparent)]
    Malformed(#[from] MalformedTreeError),

    #[error("canonicalization budget exhausted ({rewrites} rewrites, {rounds} rounds)")]
    Timeout {
        rewrites: usize,
        rounds: usize,
        partial: Box<CanonicalTree>,
    },
}

// ============================================================================
// Canonical trees
// ============================================================================

/// Anonymized, normal-form tree plus its fingerprint and shape signature.
///
/// Equality requires equal fingerprints *and* structurally equal trees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalTree {
    tree: SyntaxTree,
    fingerprint: u64,
    signature: ShapeSignature,
    approximate: bool,
}

impl CanonicalTree {
    fn seal(tree: &SyntaxTree, approximate: bool) -> Self {
        let tree = tree.compact();
        let fingerprint = tree_fingerprint(&tree);
        let signature = ShapeSignature::of(&tree);
        Self {
            tree,
            fingerprint,
            signature,
            approximate,
        }
    }

    pub fn tree(&self) -> &SyntaxTree {
        &self.tree
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// `"fnv1a64:<hex>"`.
    pub fn digest(&self) -> String {
        render_digest(self.fingerprint)
    }

    pub fn signature(&self) -> &ShapeSignature {
        &self.signature
    }

    pub fn is_approximate(&self) -> bool {
        self.approximate
    }

    pub fn size(&self) -> usize {
        self.signature.nodes as usize
    }

    pub fn to_sexpr(&self) -> String {
        self.tree.to_sexpr()
    }

    /// Cached fingerprint and signature agree with the tree (checked when a
    /// persisted graph is reopened).
    ///
    /// The arena is validated first; hashing assumes a well-formed tree.
    pub fn is_consistent(&self) -> bool {
        self.tree.validate().is_ok()
            && self.fingerprint == tree_fingerprint(&self.tree)
            && self.signature == ShapeSignature::of(&self.tree)
    }
}

impl PartialEq for CanonicalTree {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint && self.tree == other.tree
    }
}

impl Eq for CanonicalTree {}

impl Hash for CanonicalTree {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fingerprint.hash(state);
    }
}

impl std::fmt::Display for CanonicalTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_sexpr())
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Stateless canonicalizer bound to one rule set.
#[derive(Debug, Clone)]
pub struct Canonicalizer {
    rules: Arc<RuleSet>,
    budget: CanonBudget,
}

impl Canonicalizer {
    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self {
            rules,
            budget: CanonBudget::default(),
        }
    }

    pub fn with_budget(mut self, budget: CanonBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn rule_set(&self) -> &RuleSet {
        &self.rules
    }

    pub fn rule_set_id(&self) -> &RuleSetId {
        &self.rules.id
    }

    pub fn budget(&self) -> CanonBudget {
        self.budget
    }

    pub fn canonicalize(&self, tree: &SyntaxTree) -> Result<CanonicalTree, CanonError> {
        tree.validate()?;
        let mut current = strip_comments(tree);
        let mut spent = 0usize;
        let mut rounds = 0usize;

        loop {
            let anonymized = anonymize(&current, &self.rules);
            let mut pass = Normalizer {
                rules: &self.rules,
                remaining: self.budget.max_rewrites.saturating_sub(spent),
                fired: 0,
                exhausted: false,
            };
            let normalized = pass.run(&anonymized);
            spent += pass.fired;
            rounds += 1;

            if !pass.exhausted && normalized == anonymized {
                tracing::trace!(rounds, rewrites = spent, "canonical form reached");
                return Ok(CanonicalTree::seal(&anonymized, false));
            }
            if pass.exhausted || rounds >= self.budget.max_rounds {
                let partial = anonymize(&normalized, &self.rules);
                return Err(CanonError::Timeout {
                    rewrites: spent,
                    rounds,
                    partial: Box::new(CanonicalTree::seal(&partial, true)),
                });
            }
            current = normalized;
        }
    }

    /// Like [`Self::canonicalize`], but a timeout yields the partially
    /// normalized tree (flagged approximate) instead of an error.
    pub fn canonicalize_lenient(&self, tree: &SyntaxTree) -> Result<CanonicalTree, MalformedTreeError> {
        match self.canonicalize(tree) {
            Ok(c) => Ok(c),
            Err(CanonError::Malformed(e)) => Err(e),
            Err(CanonError::Timeout {
                rewrites,
                rounds,
                partial,
            }) => {
                tracing::warn!(
                    rule_set = %self.rules.id,
                    rewrites,
                    rounds,
                    fingerprint = %partial.digest(),
                    "canonicalization budget exhausted; keeping approximate state"
                );
                Ok(*partial)
            }
        }
    }
}

// ============================================================================
// Passes
// ============================================================================

fn strip_comments(tree: &SyntaxTree) -> SyntaxTree {
    let mut b = TreeBuilder::with_capacity(tree.arena_len());
    let mut remap = vec![NodeId::new(u32::MAX); tree.arena_len()];
    // Children before parents: walk the preorder backwards.
    for &id in tree.preorder().iter().rev() {
        let node = tree.node(id);
        if node.kind == NodeKind::Comment {
            continue;
        }
        let children = node
            .children
            .iter()
            .filter(|&&c| tree.kind(c) != NodeKind::Comment)
            .map(|&c| remap[c.index()])
            .collect();
        remap[id.index()] = b.push_owned(node.kind, node.value.clone(), children);
    }
    b.finish(remap[tree.root().index()]).compact()
}

fn is_identifier(kind: NodeKind) -> bool {
    matches!(kind, NodeKind::Name | NodeKind::FunctionDef)
}

fn anonymize(tree: &SyntaxTree, rules: &RuleSet) -> SyntaxTree {
    let mut names: AHashMap<&str, String> = AHashMap::new();
    let mut b = TreeBuilder::with_capacity(tree.arena_len());
    let order = tree.preorder();

    // First pass fixes placeholder numbering in preorder.
    for &id in &order {
        let node = tree.node(id);
        if let (true, Some(v)) = (is_identifier(node.kind), node.value.as_deref()) {
            if !rules.is_builtin(v) && !names.contains_key(v) {
                let placeholder = format!("v{}", names.len());
                names.insert(v, placeholder);
            }
        }
    }

    // Second pass copies the arena with renamed values (children before
    // parents, so walk the preorder backwards).
    let mut remap = vec![NodeId::new(u32::MAX); tree.arena_len()];
    for &id in order.iter().rev() {
        let node = tree.node(id);
        let value = match (&node.value, is_identifier(node.kind)) {
            (Some(v), true) => Some(names.get(v.as_str()).cloned().unwrap_or_else(|| v.clone())),
            (v, _) => v.clone(),
        };
        let children = node.children.iter().map(|c| remap[c.index()]).collect();
        let new = b.push_owned(node.kind, value, children);
        remap[id.index()] = new;
    }
    b.finish(remap[tree.root().index()]).compact()
}

/// Candidate node during bottom-up rebuilding; children are already final.
struct Pending {
    kind: NodeKind,
    value: Option<String>,
    children: Vec<NodeId>,
}

enum Step {
    /// The node is replaced by an existing normalized node.
    Replace(NodeId),
    /// The node is rewritten; rules are tried again on the result.
    Rewrite(Pending),
}

enum Frame {
    Enter(NodeId),
    Exit(NodeId),
}

struct Normalizer<'r> {
    rules: &'r RuleSet,
    remaining: usize,
    fired: usize,
    exhausted: bool,
}

impl Normalizer<'_> {
    fn run(&mut self, tree: &SyntaxTree) -> SyntaxTree {
        let mut b = TreeBuilder::with_capacity(tree.arena_len());
        let mut results: Vec<NodeId> = Vec::new();
        let mut stack = vec![Frame::Enter(tree.root())];

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(id) => {
                    stack.push(Frame::Exit(id));
                    for &c in tree.children(id).iter().rev() {
                        stack.push(Frame::Enter(c));
                    }
                }
                Frame::Exit(id) => {
                    let node = tree.node(id);
                    let children = results.split_off(results.len() - node.children.len());
                    let built = self.settle(
                        &mut b,
                        Pending {
                            kind: node.kind,
                            value: node.value.clone(),
                            children,
                        },
                    );
                    results.push(built);
                }
            }
        }

        let root = results.pop().unwrap_or_else(|| b.push(NodeKind::Module, None, Vec::new()));
        b.finish(root).compact()
    }

    /// Apply rules to `p` until none fires, then materialize it.
    fn settle(&mut self, b: &mut TreeBuilder, mut p: Pending) -> NodeId {
        let rules = self.rules;
        'rewrite: loop {
            if self.exhausted {
                break;
            }
            for &rule in &rules.rules {
                let Some(step) = self.try_rule(rule, b, &p) else {
                    continue;
                };
                if self.remaining == 0 {
                    self.exhausted = true;
                    break 'rewrite;
                }
                self.remaining -= 1;
                self.fired += 1;
                match step {
                    Step::Replace(id) => return id,
                    Step::Rewrite(next) => {
                        p = next;
                        continue 'rewrite;
                    }
                }
            }
            break;
        }
        b.push_owned(p.kind, p.value, p.children)
    }

    fn try_rule(&mut self, rule: Rule, b: &mut TreeBuilder, p: &Pending) -> Option<Step> {
        match rule {
            Rule::CollapseParens => collapse_parens(p),
            Rule::FlipComparison => flip_comparison(p),
            Rule::DoubleNegation => double_negation(b, p),
            Rule::ExpandAugAssign => self.expand_aug_assign(b, p),
            Rule::FoldConstants => fold_constants(b, p),
            Rule::NegatedIf => negated_if(b, p),
            Rule::DropEmptyElse => drop_empty_else(b, p),
            Rule::DropRedundantPass => drop_redundant_pass(b, p),
            Rule::SortCommutative => sort_commutative(b, p, self.rules),
        }
    }

    fn expand_aug_assign(&mut self, b: &mut TreeBuilder, p: &Pending) -> Option<Step> {
        if p.kind != NodeKind::AugAssign {
            return None;
        }
        let op = p.value.as_deref()?.trim_end_matches('=').to_string();
        let target = p.children[0];
        let operand = p.children[1];
        let target_copy = b.copy_subtree(target);
        let bin_op = self.settle(
            b,
            Pending {
                kind: NodeKind::BinOp,
                value: Some(op),
                children: vec![target_copy, operand],
            },
        );
        Some(Step::Rewrite(Pending {
            kind: NodeKind::Assign,
            value: None,
            children: vec![target, bin_op],
        }))
    }
}

// ============================================================================
// Rules
// ============================================================================

fn collapse_parens(p: &Pending) -> Option<Step> {
    (p.kind == NodeKind::Paren).then(|| Step::Replace(p.children[0]))
}

fn flip_comparison(p: &Pending) -> Option<Step> {
    if p.kind != NodeKind::Compare {
        return None;
    }
    let flipped = match p.value.as_deref()? {
        ">" => "<",
        ">=" => "<=",
        _ => return None,
    };
    Some(Step::Rewrite(Pending {
        kind: NodeKind::Compare,
        value: Some(flipped.to_string()),
        children: vec![p.children[1], p.children[0]],
    }))
}

fn is_not(b: &TreeBuilder, id: NodeId) -> bool {
    let node = b.node(id);
    node.kind == NodeKind::UnaryOp && node.value.as_deref() == Some("not")
}

fn double_negation(b: &TreeBuilder, p: &Pending) -> Option<Step> {
    if p.kind != NodeKind::UnaryOp || p.value.as_deref() != Some("not") {
        return None;
    }
    let inner = p.children[0];
    is_not(b, inner).then(|| Step::Replace(b.node(inner).children[0]))
}

/// Integer literal in canonical spelling (`0`, `42`, `-7`).
fn int_literal(b: &TreeBuilder, id: NodeId) -> Option<i64> {
    let node = b.node(id);
    if node.kind != NodeKind::Const {
        return None;
    }
    let v = node.value.as_deref()?;
    let digits = v.strip_prefix('-').unwrap_or(v);
    let plain = !digits.is_empty()
        && digits.bytes().all(|c| c.is_ascii_digit())
        && (digits == "0" || !digits.starts_with('0'));
    if plain {
        v.parse().ok()
    } else {
        None
    }
}

fn fold_constants(b: &mut TreeBuilder, p: &Pending) -> Option<Step> {
    let folded = match (p.kind, p.value.as_deref()) {
        (NodeKind::BinOp, Some(op @ ("+" | "-" | "*"))) => {
            let l = int_literal(b, p.children[0])?;
            let r = int_literal(b, p.children[1])?;
            match op {
                "+" => l.checked_add(r),
                "-" => l.checked_sub(r),
                _ => l.checked_mul(r),
            }?
        }
        (NodeKind::UnaryOp, Some("-")) => int_literal(b, p.children[0])?.checked_neg()?,
        _ => return None,
    };
    Some(Step::Replace(b.leaf(NodeKind::Const, &folded.to_string())))
}

fn negated_if(b: &TreeBuilder, p: &Pending) -> Option<Step> {
    if p.kind != NodeKind::If || p.children.len() != 3 || !is_not(b, p.children[0]) {
        return None;
    }
    let cond = b.node(p.children[0]).children[0];
    Some(Step::Rewrite(Pending {
        kind: NodeKind::If,
        value: None,
        children: vec![cond, p.children[2], p.children[1]],
    }))
}

fn drop_empty_else(b: &TreeBuilder, p: &Pending) -> Option<Step> {
    if p.kind != NodeKind::If || p.children.len() != 3 {
        return None;
    }
    let orelse = b.node(p.children[2]);
    let empty = orelse
        .children
        .iter()
        .all(|&c| b.node(c).kind == NodeKind::Pass);
    empty.then(|| {
        Step::Rewrite(Pending {
            kind: NodeKind::If,
            value: None,
            children: vec![p.children[0], p.children[1]],
        })
    })
}

fn drop_redundant_pass(b: &TreeBuilder, p: &Pending) -> Option<Step> {
    if !p.kind.is_statement_list() {
        return None;
    }
    let passes = p
        .children
        .iter()
        .filter(|&&c| b.node(c).kind == NodeKind::Pass)
        .count();
    if passes == 0 || (passes == 1 && p.children.len() == 1) {
        return None;
    }
    let mut children: Vec<NodeId> = p
        .children
        .iter()
        .copied()
        .filter(|&c| b.node(c).kind != NodeKind::Pass)
        .collect();
    if children.is_empty() {
        // Only passes: keep the first one.
        children.push(p.children[0]);
    }
    Some(Step::Rewrite(Pending {
        kind: p.kind,
        value: None,
        children,
    }))
}

/// Renders a built subtree; `mask` hides identifier values.
fn sort_key(b: &TreeBuilder, id: NodeId, mask: bool, out: &mut String) {
    let mut stack = vec![Visit::Enter(id)];
    while let Some(visit) = stack.pop() {
        let n = match visit {
            Visit::Enter(n) => n,
            Visit::Exit(_) => {
                out.push(')');
                continue;
            }
        };
        let node = b.node(n);
        if !out.is_empty() {
            out.push(' ');
        }
        out.push('(');
        out.push_str(node.kind.as_str());
        if let Some(v) = &node.value {
            out.push(' ');
            if mask && is_identifier(node.kind) {
                out.push('_');
            } else {
                crate::tree::write_value(v, out);
            }
        }
        stack.push(Visit::Exit(n));
        stack.extend(node.children.iter().rev().map(|&c| Visit::Enter(c)));
    }
}

fn sort_commutative(b: &TreeBuilder, p: &Pending, rules: &RuleSet) -> Option<Step> {
    let commutative = match (p.kind, p.value.as_deref()) {
        (NodeKind::BoolOp, _) => true,
        (NodeKind::BinOp | NodeKind::Compare, Some(op)) => rules.is_commutative(op),
        _ => false,
    };
    if !commutative {
        return None;
    }
    // `+` also concatenates; leave operands with text literals in place.
    if p.kind == NodeKind::BinOp && p.value.as_deref() == Some("+") {
        let text = p.children.iter().any(|&c| {
            let n = b.node(c);
            n.kind == NodeKind::Const && int_literal(b, c).is_none() && !is_float(n.value.as_deref())
        });
        if text {
            return None;
        }
    }

    let mut keyed: Vec<((String, String), NodeId)> = p
        .children
        .iter()
        .map(|&c| {
            let mut masked = String::new();
            let mut full = String::new();
            sort_key(b, c, true, &mut masked);
            sort_key(b, c, false, &mut full);
            ((masked, full), c)
        })
        .collect();
    if keyed.windows(2).all(|w| w[0].0 <= w[1].0) {
        return None;
    }
    keyed.sort_by(|x, y| x.0.cmp(&y.0));
    Some(Step::Rewrite(Pending {
        kind: p.kind,
        value: p.value.clone(),
        children: keyed.into_iter().map(|(_, c)| c).collect(),
    }))
}

fn is_float(v: Option<&str>) -> bool {
    v.is_some_and(|v| v.parse::<f64>().is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notation::parse_tree;

    fn canon(text: &str) -> CanonicalTree {
        Canonicalizer::new(Arc::new(RuleSet::python_v1()))
            .canonicalize(&parse_tree(text).unwrap())
            .unwrap()
    }

    #[test]
    fn identifiers_are_renamed_by_first_appearance() {
        let c = canon("(module (assign (name total) (const 0)) (expr (call (name print) (name total))))");
        assert_eq!(
            c.to_sexpr(),
            "(module (assign (name v0) (const 0)) (expr (call (name print) (name v0))))"
        );
        assert!(!c.is_approximate());
    }

    #[test]
    fn renaming_and_comments_do_not_matter() {
        let a = canon("(module (comment \"# start\") (assign (name x) (const 1)) (assign (name y) (name x)))");
        let b = canon("(module (assign (name first) (const 1)) (comment \"# copy\") (assign (name second) (name first)))");
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn comparisons_are_flipped_and_constants_folded() {
        let a = canon("(module (expr (compare > (const 6) (name five))))");
        let b = canon("(module (expr (compare < (name five) (const 6))))");
        assert_eq!(a, b);

        let c = canon("(module (assign (name x) (bin_op + (const 4) (const 1))))");
        let d = canon("(module (assign (name x) (const 5)))");
        assert_eq!(c, d);
    }

    #[test]
    fn commutative_operands_are_sorted() {
        let a = canon("(module (assign (name a) (bin_op + (name a) (const 1))))");
        let b = canon("(module (assign (name a) (bin_op + (const 1) (name a))))");
        assert_eq!(a, b);

        let s1 = canon("(module (expr (bin_op + (const \"hi \") (name who))))");
        let s2 = canon("(module (expr (bin_op + (name who) (const \"hi \"))))");
        assert_ne!(s1, s2);
    }

    #[test]
    fn aug_assign_parens_and_negations_normalize() {
        let a = canon("(module (aug_assign + (name n) (paren (const 2))))");
        let b = canon("(module (assign (name n) (bin_op + (name n) (const 2))))");
        assert_eq!(a, b);

        let c = canon(
            "(module (if (unary_op not (name c)) (block (expr (name a))) (block (expr (name b)))))",
        );
        let d = canon("(module (if (name c) (block (expr (name b))) (block (expr (name a)))))");
        assert_eq!(c.tree(), d.tree());

        let e = canon("(module (expr (unary_op not (unary_op not (name q)))))");
        assert_eq!(e.to_sexpr(), "(module (expr (name v0)))");
    }

    #[test]
    fn pass_and_empty_else_are_dropped() {
        let a = canon("(module (pass) (if (name c) (block (pass) (break)) (block (pass))))");
        assert_eq!(a.to_sexpr(), "(module (if (name v0) (block (break))))");
        let only = canon("(module (pass) (pass))");
        assert_eq!(only.to_sexpr(), "(module (pass))");
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let rules = Arc::new(RuleSet::python_v1());
        let builder = Canonicalizer::new(rules);
        let t = parse_tree(
            "(module (function_def f (params (name n)) (block (return (bin_op * (name n) (paren (const 2)))))) (expr (call (name print) (call (name f) (const 3)))))",
        )
        .unwrap();
        let once = builder.canonicalize(&t).unwrap();
        let twice = builder.canonicalize(once.tree()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn malformed_trees_are_rejected() {
        let t = parse_tree("(module (assign (name x)))").unwrap();
        let err = Canonicalizer::new(Arc::new(RuleSet::python_v1()))
            .canonicalize(&t)
            .unwrap_err();
        assert!(matches!(err, CanonError::Malformed(_)));
    }

    #[test]
    fn very_deep_trees_canonicalize() {
        // (module (expr (unary_op - (unary_op - ... (name x)))))
        let mut b = TreeBuilder::new();
        let mut inner = b.leaf(NodeKind::Name, "x");
        for _ in 0..100_000 {
            inner = b.push(NodeKind::UnaryOp, Some("-"), vec![inner]);
        }
        let c = b.push(NodeKind::Comment, Some("# deep"), Vec::new());
        let e = b.push(NodeKind::Expr, None, vec![inner]);
        let m = b.push(NodeKind::Module, None, vec![c, e]);
        let tree = b.finish(m);

        let canon = Canonicalizer::new(Arc::new(RuleSet::python_v1()))
            .canonicalize(&tree)
            .unwrap();
        assert_eq!(canon.size(), 100_003);
        assert_eq!(canon.signature().depth, 100_003);
        assert!(canon.is_consistent());
        assert!(canon.to_sexpr().ends_with("(name v0)))))"));
    }

    #[test]
    fn deep_commutative_chains_sort() {
        // (bin_op + (name x) (bin_op + (name x) ... (const 1))) sorts at every level.
        let mut b = TreeBuilder::new();
        let mut inner = b.leaf(NodeKind::Const, "1");
        for _ in 0..3_000 {
            let x = b.leaf(NodeKind::Name, "x");
            inner = b.push(NodeKind::BinOp, Some("+"), vec![x, inner]);
        }
        let e = b.push(NodeKind::Expr, None, vec![inner]);
        let m = b.push(NodeKind::Module, None, vec![e]);
        let canon = Canonicalizer::new(Arc::new(RuleSet::python_v1()))
            .canonicalize_lenient(&b.finish(m))
            .unwrap();
        assert_eq!(canon.size(), 2 + 2 * 3_000 + 1);
        assert!(canon.is_consistent());
    }

    #[test]
    fn forged_trees_are_inconsistent_not_fatal() {
        let good = canon("(module (expr (name x)))");
        let mut json = serde_json::to_value(&good).unwrap();
        // Point the module at a node that does not exist.
        json["tree"]["nodes"][0]["children"] = serde_json::json!([99]);
        let forged: CanonicalTree = serde_json::from_value(json.clone()).unwrap();
        assert!(!forged.is_consistent());

        // And at itself.
        json["tree"]["nodes"][0]["children"] = serde_json::json!([0]);
        let cyclic: CanonicalTree = serde_json::from_value(json).unwrap();
        assert!(!cyclic.is_consistent());
    }

    #[test]
    fn exhausted_budget_yields_approximate_state() {
        let builder = Canonicalizer::new(Arc::new(RuleSet::python_v1())).with_budget(CanonBudget {
            max_rewrites: 1,
            max_rounds: 16,
        });
        let t = parse_tree("(module (expr (paren (paren (name x)))))").unwrap();
        match builder.canonicalize(&t) {
            Err(CanonError::Timeout { partial, .. }) => {
                assert!(partial.is_approximate());
                assert_eq!(partial.to_sexpr(), "(module (expr (paren (name v0))))");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        let lenient = builder.canonicalize_lenient(&t).unwrap();
        assert!(lenient.is_approximate());
    }
}
