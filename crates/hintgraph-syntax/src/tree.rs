//! Syntax tree arena.
//!
//! Snapshots reach hintgraph already parsed. A tree is an arena of labeled,
//! ordered nodes addressed by [`NodeId`]; the root is stored alongside.
//!
//! Structural equality ([`PartialEq`] on [`SyntaxTree`]) compares
//! `(kind, value, children)` structurally and ignores arena layout, so two trees
//! built in a different order still compare equal.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;

// ============================================================================
// Node kinds
// ============================================================================

/// Arena index of a node (4 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct NodeId(u32);

impl NodeId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Construct kinds of the task languages hintgraph understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Module,
    Block,
    Assign,
    AugAssign,
    Expr,
    If,
    While,
    For,
    FunctionDef,
    Params,
    Return,
    Pass,
    Break,
    Continue,
    BinOp,
    UnaryOp,
    Compare,
    BoolOp,
    Call,
    Attribute,
    Subscript,
    List,
    Tuple,
    Name,
    Const,
    Paren,
    Comment,
}

/// How many children a construct takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Range(usize, usize),
}

impl Arity {
    pub fn accepts(self, n: usize) -> bool {
        match self {
            Arity::Exact(k) => n == k,
            Arity::AtLeast(k) => n >= k,
            Arity::Range(lo, hi) => (lo..=hi).contains(&n),
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(k) => write!(f, "exactly {k}"),
            Arity::AtLeast(k) => write!(f, "at least {k}"),
            Arity::Range(lo, hi) => write!(f, "{lo}..={hi}"),
        }
    }
}

/// Whether a construct carries a literal value (identifier, operator, literal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueRule {
    Required,
    Optional,
    Forbidden,
}

impl NodeKind {
    pub const COUNT: usize = 27;

    pub const ALL: [NodeKind; NodeKind::COUNT] = [
        NodeKind::Module,
        NodeKind::Block,
        NodeKind::Assign,
        NodeKind::AugAssign,
        NodeKind::Expr,
        NodeKind::If,
        NodeKind::While,
        NodeKind::For,
        NodeKind::FunctionDef,
        NodeKind::Params,
        NodeKind::Return,
        NodeKind::Pass,
        NodeKind::Break,
        NodeKind::Continue,
        NodeKind::BinOp,
        NodeKind::UnaryOp,
        NodeKind::Compare,
        NodeKind::BoolOp,
        NodeKind::Call,
        NodeKind::Attribute,
        NodeKind::Subscript,
        NodeKind::List,
        NodeKind::Tuple,
        NodeKind::Name,
        NodeKind::Const,
        NodeKind::Paren,
        NodeKind::Comment,
    ];

    pub const fn ordinal(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Module => "module",
            NodeKind::Block => "block",
            NodeKind::Assign => "assign",
            NodeKind::AugAssign => "aug_assign",
            NodeKind::Expr => "expr",
            NodeKind::If => "if",
            NodeKind::While => "while",
            NodeKind::For => "for",
            NodeKind::FunctionDef => "function_def",
            NodeKind::Params => "params",
            NodeKind::Return => "return",
            NodeKind::Pass => "pass",
            NodeKind::Break => "break",
            NodeKind::Continue => "continue",
            NodeKind::BinOp => "bin_op",
            NodeKind::UnaryOp => "unary_op",
            NodeKind::Compare => "compare",
            NodeKind::BoolOp => "bool_op",
            NodeKind::Call => "call",
            NodeKind::Attribute => "attribute",
            NodeKind::Subscript => "subscript",
            NodeKind::List => "list",
            NodeKind::Tuple => "tuple",
            NodeKind::Name => "name",
            NodeKind::Const => "const",
            NodeKind::Paren => "paren",
            NodeKind::Comment => "comment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        NodeKind::ALL.iter().copied().find(|k| k.as_str() == s)
    }

    pub fn arity(self) -> Arity {
        match self {
            NodeKind::Module | NodeKind::Block | NodeKind::Params => Arity::AtLeast(0),
            NodeKind::List | NodeKind::Tuple => Arity::AtLeast(0),
            NodeKind::Assign | NodeKind::AugAssign => Arity::Exact(2),
            NodeKind::Expr | NodeKind::Paren | NodeKind::UnaryOp | NodeKind::Attribute => {
                Arity::Exact(1)
            }
            NodeKind::If => Arity::Range(2, 3),
            NodeKind::While | NodeKind::FunctionDef | NodeKind::Subscript => Arity::Exact(2),
            NodeKind::For => Arity::Exact(3),
            NodeKind::Return => Arity::Range(0, 1),
            NodeKind::Pass | NodeKind::Break | NodeKind::Continue => Arity::Exact(0),
            NodeKind::BinOp | NodeKind::Compare => Arity::Exact(2),
            NodeKind::BoolOp => Arity::AtLeast(2),
            NodeKind::Call => Arity::AtLeast(1),
            NodeKind::Name | NodeKind::Const | NodeKind::Comment => Arity::Exact(0),
        }
    }

    pub fn value_rule(self) -> ValueRule {
        match self {
            NodeKind::AugAssign
            | NodeKind::FunctionDef
            | NodeKind::BinOp
            | NodeKind::UnaryOp
            | NodeKind::Compare
            | NodeKind::BoolOp
            | NodeKind::Attribute
            | NodeKind::Name
            | NodeKind::Const => ValueRule::Required,
            NodeKind::Comment => ValueRule::Optional,
            _ => ValueRule::Forbidden,
        }
    }

    /// Child kind forced at a given position, if any.
    pub fn expected_child(self, index: usize, arity: usize) -> Option<NodeKind> {
        match (self, index) {
            (NodeKind::If, 1 | 2) | (NodeKind::While, 1) | (NodeKind::For, 2) => {
                Some(NodeKind::Block)
            }
            (NodeKind::FunctionDef, 0) => Some(NodeKind::Params),
            (NodeKind::FunctionDef, 1) => Some(NodeKind::Block),
            (NodeKind::Params, _) if index < arity => Some(NodeKind::Name),
            _ => None,
        }
    }

    /// Statement containers (the only places comments may appear).
    pub fn is_statement_list(self) -> bool {
        matches!(self, NodeKind::Module | NodeKind::Block)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node label: construct kind plus optional literal value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    pub kind: NodeKind,
    #[serde(default)]
    pub value: Option<String>,
}

impl Label {
    pub fn new(kind: NodeKind, value: Option<&str>) -> Self {
        Self {
            kind,
            value: value.map(str::to_string),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "{}:{}", self.kind, v),
            None => write!(f, "{}", self.kind),
        }
    }
}

// ============================================================================
// Paths
// ============================================================================

/// Child-index path from the root (`/` is the root, `/1/0` the first child of
/// the root's second child).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TreePath(Vec<u32>);

impl TreePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn from_indices(indices: Vec<u32>) -> Self {
        Self(indices)
    }

    pub fn indices(&self) -> &[u32] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn child(&self, index: usize) -> Self {
        let mut next = self.0.clone();
        next.push(index as u32);
        Self(next)
    }

    /// Parent path and the index within the parent; `None` for the root.
    pub fn split_last(&self) -> Option<(TreePath, usize)> {
        let (last, parent) = self.0.split_last()?;
        Some((TreePath(parent.to_vec()), *last as usize))
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for i in &self.0 {
            write!(f, "/{i}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Errors
// ============================================================================

/// The input tree violates the shape table (arity, values, child kinds) or the
/// arena is not a tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed syntax tree at {path}: {reason}")]
pub struct MalformedTreeError {
    pub path: TreePath,
    pub reason: String,
}

impl MalformedTreeError {
    pub fn new(path: TreePath, reason: impl Into<String>) -> Self {
        Self {
            path,
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Arena
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub children: Vec<NodeId>,
}

impl Node {
    pub fn label(&self) -> Label {
        Label {
            kind: self.kind,
            value: self.value.clone(),
        }
    }

    pub fn same_label(&self, other: &Node) -> bool {
        self.kind == other.kind && self.value == other.value
    }
}

/// Append-only node arena used to assemble trees bottom-up.
#[derive(Debug, Clone, Default)]
pub struct TreeBuilder {
    nodes: Vec<Node>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, kind: NodeKind, value: Option<&str>, children: Vec<NodeId>) -> NodeId {
        self.push_owned(kind, value.map(str::to_string), children)
    }

    pub fn push_owned(
        &mut self,
        kind: NodeKind,
        value: Option<String>,
        children: Vec<NodeId>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            value,
            children,
        });
        id
    }

    pub fn leaf(&mut self, kind: NodeKind, value: &str) -> NodeId {
        self.push(kind, Some(value), Vec::new())
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Deep-copy the subtree rooted at `id` inside the same arena.
    pub fn copy_subtree(&mut self, id: NodeId) -> NodeId {
        let mut copies: Vec<NodeId> = Vec::new();
        let mut stack = vec![Visit::Enter(id)];
        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Enter(n) => {
                    stack.push(Visit::Exit(n));
                    stack.extend(self.nodes[n.index()].children.iter().rev().map(|&c| Visit::Enter(c)));
                }
                Visit::Exit(n) => {
                    let node = &self.nodes[n.index()];
                    let children = copies.split_off(copies.len() - node.children.len());
                    let (kind, value) = (node.kind, node.value.clone());
                    copies.push(self.push_owned(kind, value, children));
                }
            }
        }
        copies.pop().unwrap_or(id)
    }

    pub fn finish(self, root: NodeId) -> SyntaxTree {
        SyntaxTree {
            nodes: self.nodes,
            root,
        }
    }
}

/// Explicit traversal frame; tree passes keep their own stacks so program
/// depth never turns into call depth.
pub(crate) enum Visit<T> {
    Enter(T),
    Exit(T),
}

/// A parsed program: node arena plus root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntaxTree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl SyntaxTree {
    /// The empty program, `(module)`.
    pub fn empty_module() -> Self {
        let mut b = TreeBuilder::new();
        let root = b.push(NodeKind::Module, None, Vec::new());
        b.finish(root)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.node(id).kind
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    /// Arena length (includes unreachable nodes of non-compact trees).
    pub fn arena_len(&self) -> usize {
        self.nodes.len()
    }

    /// Number of nodes reachable from the root.
    pub fn node_count(&self) -> usize {
        self.preorder().len()
    }

    /// Reachable node ids in preorder.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            out.push(id);
            for &c in self.node(id).children.iter().rev() {
                stack.push(c);
            }
        }
        out
    }

    /// Resolve a child-index path.
    pub fn node_at(&self, path: &TreePath) -> Option<NodeId> {
        let mut cur = self.root;
        for &i in path.indices() {
            cur = *self.get(cur)?.children.get(i as usize)?;
        }
        Some(cur)
    }

    /// Check the arena is a tree and every node satisfies the shape table.
    ///
    /// Dangling ids, shared nodes and cycles are reported before anything
    /// walks the tree, so this is safe on arbitrary decoded arenas.
    pub fn validate(&self) -> Result<(), MalformedTreeError> {
        // (parent, child index) of every visited node; paths are rebuilt
        // from these only when reporting an error.
        let mut parents: Vec<Option<Option<(NodeId, u32)>>> = vec![None; self.nodes.len()];
        let path_of = |parents: &[Option<Option<(NodeId, u32)>>], slot: Option<(NodeId, u32)>| {
            let mut indices = Vec::new();
            let mut cur = slot;
            while let Some((parent, i)) = cur {
                indices.push(i);
                cur = parents[parent.index()].flatten();
            }
            indices.reverse();
            TreePath::from_indices(indices)
        };

        let mut stack: Vec<(NodeId, Option<(NodeId, u32)>)> = vec![(self.root, None)];
        while let Some((id, slot)) = stack.pop() {
            let Some(node) = self.get(id) else {
                return Err(MalformedTreeError::new(
                    path_of(&parents, slot),
                    format!("dangling node id {}", id.raw()),
                ));
            };
            if parents[id.index()].is_some() {
                return Err(MalformedTreeError::new(
                    path_of(&parents, slot),
                    "node is shared or cyclic",
                ));
            }
            parents[id.index()] = Some(slot);
            let parent_kind = slot.map(|(p, _)| self.node(p).kind);
            let here = || path_of(&parents, slot);

            let arity = node.kind.arity();
            if !arity.accepts(node.children.len()) {
                return Err(MalformedTreeError::new(
                    here(),
                    format!(
                        "`{}` takes {arity} children, found {}",
                        node.kind,
                        node.children.len()
                    ),
                ));
            }
            match (node.kind.value_rule(), &node.value) {
                (ValueRule::Required, None) => {
                    return Err(MalformedTreeError::new(
                        here(),
                        format!("`{}` requires a value", node.kind),
                    ));
                }
                (ValueRule::Required, Some(v)) if v.is_empty() => {
                    return Err(MalformedTreeError::new(
                        here(),
                        format!("`{}` requires a non-empty value", node.kind),
                    ));
                }
                (ValueRule::Forbidden, Some(v)) => {
                    return Err(MalformedTreeError::new(
                        here(),
                        format!("`{}` does not take a value (got `{v}`)", node.kind),
                    ));
                }
                _ => {}
            }
            if node.kind == NodeKind::Comment
                && !parent_kind.is_some_and(NodeKind::is_statement_list)
            {
                return Err(MalformedTreeError::new(
                    here(),
                    "comments may only appear in statement lists",
                ));
            }

            let n = node.children.len();
            for (i, &c) in node.children.iter().enumerate() {
                if let (Some(expected), Some(child)) =
                    (node.kind.expected_child(i, n), self.get(c))
                {
                    if child.kind != expected {
                        return Err(MalformedTreeError::new(
                            here().child(i),
                            format!(
                                "child {i} of `{}` must be `{expected}`, found `{}`",
                                node.kind, child.kind
                            ),
                        ));
                    }
                }
                stack.push((c, Some((id, i as u32))));
            }
        }
        Ok(())
    }

    /// Re-lay reachable nodes in preorder, dropping garbage.
    pub fn compact(&self) -> SyntaxTree {
        let order = self.preorder();
        let mut remap = vec![NodeId(u32::MAX); self.nodes.len()];
        for (new, old) in order.iter().enumerate() {
            remap[old.index()] = NodeId(new as u32);
        }
        let nodes = order
            .iter()
            .map(|&old| {
                let n = self.node(old);
                Node {
                    kind: n.kind,
                    value: n.value.clone(),
                    children: n.children.iter().map(|c| remap[c.index()]).collect(),
                }
            })
            .collect();
        SyntaxTree {
            nodes,
            root: NodeId(0),
        }
    }

    /// Reachable nodes in preorder, assuming the tree is compact.
    pub(crate) fn nodes_in_preorder(&self) -> &[Node] {
        &self.nodes
    }

    pub fn subtree_size(&self, id: NodeId) -> usize {
        let mut count = 0;
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            count += 1;
            stack.extend(self.node(n).children.iter().copied());
        }
        count
    }

    pub fn to_nested(&self) -> NestedNode {
        self.nested_at(self.root)
    }

    pub fn nested_at(&self, id: NodeId) -> NestedNode {
        let mut built: Vec<NestedNode> = Vec::new();
        let mut stack = vec![Visit::Enter(id)];
        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Enter(n) => {
                    stack.push(Visit::Exit(n));
                    stack.extend(self.children(n).iter().rev().map(|&c| Visit::Enter(c)));
                }
                Visit::Exit(n) => {
                    let node = self.node(n);
                    let children = built.split_off(built.len() - node.children.len());
                    built.push(NestedNode {
                        kind: node.kind,
                        value: node.value.clone(),
                        children,
                    });
                }
            }
        }
        built.pop().unwrap_or_else(|| NestedNode::new(NodeKind::Module, None, Vec::new()))
    }

    /// Arena copy of a nested tree, laid out in preorder.
    pub fn from_nested(root: &NestedNode) -> SyntaxTree {
        let mut b = TreeBuilder::new();
        let mut stack: Vec<(&NestedNode, Option<NodeId>)> = vec![(root, None)];
        while let Some((n, parent)) = stack.pop() {
            let id = b.push_owned(n.kind, n.value.clone(), Vec::with_capacity(n.children.len()));
            if let Some(p) = parent {
                b.nodes[p.index()].children.push(id);
            }
            stack.extend(n.children.iter().rev().map(|c| (c, Some(id))));
        }
        b.finish(NodeId(0))
    }

    /// Render as tree notation, e.g. `(module (assign (name x) (const 1)))`.
    pub fn to_sexpr(&self) -> String {
        self.subtree_sexpr(self.root)
    }

    pub fn subtree_sexpr(&self, id: NodeId) -> String {
        let mut out = String::new();
        let mut stack = vec![Visit::Enter(id)];
        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Enter(n) => {
                    let node = self.node(n);
                    open_sexpr(node.kind, node.value.as_deref(), &mut out);
                    stack.push(Visit::Exit(n));
                    stack.extend(node.children.iter().rev().map(|&c| Visit::Enter(c)));
                }
                Visit::Exit(_) => out.push(')'),
            }
        }
        out
    }
}

impl PartialEq for SyntaxTree {
    fn eq(&self, other: &Self) -> bool {
        let mut stack = vec![(self.root, other.root)];
        while let Some((a, b)) = stack.pop() {
            let (na, nb) = (self.node(a), other.node(b));
            if !na.same_label(nb) || na.children.len() != nb.children.len() {
                return false;
            }
            stack.extend(na.children.iter().copied().zip(nb.children.iter().copied()));
        }
        true
    }
}

impl Eq for SyntaxTree {}

impl fmt::Display for SyntaxTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sexpr())
    }
}

// ============================================================================
// Nested form
// ============================================================================

/// Recursive, serde-friendly tree form (JSON input/output, edit payloads).
///
/// Clone, equality, hashing and drop walk explicit stacks, so arbitrarily
/// deep values are safe to hold and compare.
#[derive(Debug, Serialize, Deserialize)]
pub struct NestedNode {
    pub kind: NodeKind,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub children: Vec<NestedNode>,
}

impl NestedNode {
    pub fn new(kind: NodeKind, value: Option<&str>, children: Vec<NestedNode>) -> Self {
        Self {
            kind,
            value: value.map(str::to_string),
            children,
        }
    }

    pub fn label(&self) -> Label {
        Label {
            kind: self.kind,
            value: self.value.clone(),
        }
    }

    pub fn size(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(n) = stack.pop() {
            count += 1;
            stack.extend(&n.children);
        }
        count
    }

    pub fn to_sexpr(&self) -> String {
        let mut out = String::new();
        let mut stack = vec![Visit::Enter(self)];
        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Enter(n) => {
                    open_sexpr(n.kind, n.value.as_deref(), &mut out);
                    stack.push(Visit::Exit(n));
                    stack.extend(n.children.iter().rev().map(Visit::Enter));
                }
                Visit::Exit(_) => out.push(')'),
            }
        }
        out
    }
}

impl Clone for NestedNode {
    fn clone(&self) -> Self {
        let mut built: Vec<NestedNode> = Vec::new();
        let mut stack = vec![Visit::Enter(self)];
        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Enter(n) => {
                    stack.push(Visit::Exit(n));
                    stack.extend(n.children.iter().rev().map(Visit::Enter));
                }
                Visit::Exit(n) => {
                    let children = built.split_off(built.len() - n.children.len());
                    built.push(NestedNode {
                        kind: n.kind,
                        value: n.value.clone(),
                        children,
                    });
                }
            }
        }
        built.pop().unwrap_or_else(|| NestedNode::new(self.kind, self.value.as_deref(), Vec::new()))
    }
}

impl PartialEq for NestedNode {
    fn eq(&self, other: &Self) -> bool {
        let mut stack = vec![(self, other)];
        while let Some((a, b)) = stack.pop() {
            if a.kind != b.kind || a.value != b.value || a.children.len() != b.children.len() {
                return false;
            }
            stack.extend(a.children.iter().zip(&b.children));
        }
        true
    }
}

impl Eq for NestedNode {}

impl Hash for NestedNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut stack = vec![self];
        while let Some(n) = stack.pop() {
            n.kind.hash(state);
            n.value.hash(state);
            n.children.len().hash(state);
            stack.extend(n.children.iter().rev());
        }
    }
}

impl Drop for NestedNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut n) = pending.pop() {
            pending.append(&mut n.children);
        }
    }
}

impl fmt::Display for NestedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sexpr())
    }
}

fn open_sexpr(kind: NodeKind, value: Option<&str>, out: &mut String) {
    if !out.is_empty() {
        out.push(' ');
    }
    out.push('(');
    out.push_str(kind.as_str());
    if let Some(v) = value {
        out.push(' ');
        write_value(v, out);
    }
}

/// Values are written bare when they are a single token, quoted otherwise.
pub(crate) fn write_value(v: &str, out: &mut String) {
    let bare = !v.is_empty()
        && v
            .chars()
            .all(|c| !c.is_whitespace() && c != '(' && c != ')' && c != '"' && c != '\\');
    if bare {
        out.push_str(v);
        return;
    }
    out.push('"');
    for c in v.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
}
