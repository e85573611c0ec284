//! Structural digests (versioned).
//!
//! Vertices are deduplicated by canonical tree. The fingerprint is a fast
//! pre-check: two states with different fingerprints are never the same state,
//! and states with equal fingerprints are still compared structurally.
//!
//! - algorithm: **FNV-1a 64-bit**
//! - input: the preorder label stream (kind ordinal, value bytes, child count)
//! - output: `"fnv1a64:<16 lowercase hex digits>"` when rendered
//!
//! The digest is not a security primitive.

use crate::tree::SyntaxTree;

/// Prefix used in rendered digests.
pub const DIGEST_V1_PREFIX: &str = "fnv1a64:";

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x00000100000001b3;

/// Incremental FNV-1a 64 hasher.
#[derive(Debug, Clone, Copy)]
pub struct Fnv1a64(u64);

impl Default for Fnv1a64 {
    fn default() -> Self {
        Self(FNV_OFFSET_BASIS)
    }
}

impl Fnv1a64 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.0 ^= (*b) as u64;
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write(&v.to_le_bytes());
    }

    pub fn finish(self) -> u64 {
        self.0
    }
}

/// FNV-1a 64 over arbitrary bytes.
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut h = Fnv1a64::new();
    h.write(bytes);
    h.finish()
}

/// Render a 64-bit digest as `"fnv1a64:<hex>"`.
pub fn render_digest(hash: u64) -> String {
    format!("{DIGEST_V1_PREFIX}{hash:016x}")
}

/// Fingerprint of a tree: FNV-1a over its preorder label stream.
///
/// Values are tagged (`0` absent, `1` present + length) so `(name ab)` and
/// `(name a)` followed by a sibling never produce the same stream.
pub fn tree_fingerprint(tree: &SyntaxTree) -> u64 {
    let mut h = Fnv1a64::new();
    for id in tree.preorder() {
        let node = tree.node(id);
        h.write_u32(node.kind.ordinal() as u32);
        match &node.value {
            None => h.write(&[0]),
            Some(v) => {
                h.write(&[1]);
                h.write_u32(v.len() as u32);
                h.write(v.as_bytes());
            }
        }
        h.write_u32(node.children.len() as u32);
    }
    h.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notation::parse_tree;

    #[test]
    fn known_vectors() {
        assert_eq!(fnv1a64(b""), 0xcbf29ce484222325);
        assert_eq!(render_digest(fnv1a64(b"a")), "fnv1a64:af63dc4c8601ec8c");
    }

    #[test]
    fn fingerprint_ignores_arena_layout() {
        let t = parse_tree("(module (assign (name x) (const 1)) (expr (name x)))").unwrap();
        let nested = SyntaxTree::from_nested(&t.to_nested());
        assert_eq!(tree_fingerprint(&t), tree_fingerprint(&nested));
    }

    #[test]
    fn fingerprint_separates_values() {
        let a = parse_tree("(module (expr (name ab)))").unwrap();
        let b = parse_tree("(module (expr (name a)))").unwrap();
        assert_ne!(tree_fingerprint(&a), tree_fingerprint(&b));
    }
}
