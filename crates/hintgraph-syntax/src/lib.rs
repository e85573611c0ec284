//! hintgraph syntax layer
//!
//! Everything that looks at a single program state:
//!
//! - `tree`: node arena, shape table, nested (serde) form, paths
//! - `notation`: s-expression reader for already-parsed trees
//! - `canon`: anonymization + normalization into [`CanonicalTree`]
//! - `rules`: versioned rewrite tables and the language registry
//! - `digest`: FNV-1a structural fingerprints
//! - `distance`: shape signatures and Zhang–Shasha tree edit distance
//! - `edit`: structural diffs between states, and applying them

pub mod canon;
pub mod digest;
pub mod distance;
pub mod edit;
pub mod notation;
pub mod rules;
pub mod tree;

// ============================================================================
// Re-exports
// ============================================================================

pub use canon::{CanonBudget, CanonError, CanonicalTree, Canonicalizer};
pub use digest::{render_digest, tree_fingerprint};
pub use distance::{prepared_distance, tree_edit_distance, CostModel, PreparedTree, ShapeSignature};
pub use edit::{diff, diff_nested, ApplyError, EditKind, EditOp, EditScript};
pub use notation::{
    parse_nested, parse_nested_with, parse_tree, parse_tree_with, NotationError, NotationLimits,
};
pub use rules::{Rule, RuleError, RuleRegistry, RuleSet, RuleSetId};
pub use tree::{
    Label, MalformedTreeError, NestedNode, Node, NodeId, NodeKind, SyntaxTree, TreeBuilder,
    TreePath,
};
