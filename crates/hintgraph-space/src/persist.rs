//! Binary graph image (`.hgr`).
//!
//! Layout:
//!
//! ```text
//! "HGRF" | version: u32 LE | payload length: u64 LE | SHA-256(payload): 32 bytes | payload
//! ```
//!
//! The payload is `bincode(GraphImage)`. Loading checks the header and the
//! checksum, decodes, and then rebuilds and validates the graph; a partially
//! populated graph is never handed back.

use crate::graph::{Edge, SolutionGraph, Vertex};
use crate::profile::TaskId;
use hintgraph_syntax::RuleSetId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MAGIC: [u8; 4] = *b"HGRF";
pub const FORMAT_VERSION: u32 = 1;
pub const HEADER_LEN: usize = 4 + 4 + 8 + 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorruptGraphError {
    #[error("not a solution graph image (bad magic)")]
    BadMagic,

    #[error("unsupported graph format version {0}")]
    UnsupportedVersion(u32),

    #[error("graph image truncated: need {expected} bytes, found {found}")]
    Truncated { expected: u64, found: u64 },

    #[error("graph image has {0} trailing bytes")]
    TrailingBytes(u64),

    #[error("payload checksum mismatch")]
    ChecksumMismatch,

    #[error("payload decode failed: {0}")]
    Decode(String),

    #[error("graph invariant violated: {0}")]
    Invariant(String),
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to encode graph: {0}")]
    Encode(String),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Corrupt(#[from] CorruptGraphError),
}

#[derive(Serialize)]
struct GraphImageRef<'a> {
    task: &'a TaskId,
    rule_set: &'a RuleSetId,
    vertices: &'a [Vertex],
    edges: &'a [Edge],
}

#[derive(Deserialize)]
struct GraphImage {
    task: TaskId,
    rule_set: RuleSetId,
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
}

pub fn serialize(graph: &SolutionGraph) -> Result<Vec<u8>, PersistError> {
    let image = GraphImageRef {
        task: graph.task(),
        rule_set: graph.rule_set(),
        vertices: graph.vertices(),
        edges: graph.edges(),
    };
    let payload = bincode::serialize(&image).map_err(|e| PersistError::Encode(e.to_string()))?;
    let checksum = Sha256::digest(&payload);

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(&checksum);
    out.extend_from_slice(&payload);
    Ok(out)
}

pub fn deserialize(bytes: &[u8]) -> Result<SolutionGraph, CorruptGraphError> {
    if bytes.len() < 4 || bytes[0..4] != MAGIC {
        return Err(CorruptGraphError::BadMagic);
    }
    if bytes.len() < HEADER_LEN {
        return Err(CorruptGraphError::Truncated {
            expected: HEADER_LEN as u64,
            found: bytes.len() as u64,
        });
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != FORMAT_VERSION {
        return Err(CorruptGraphError::UnsupportedVersion(version));
    }
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&bytes[8..16]);
    let payload_len = u64::from_le_bytes(len_bytes);
    let available = (bytes.len() - HEADER_LEN) as u64;
    if available < payload_len {
        return Err(CorruptGraphError::Truncated {
            expected: HEADER_LEN as u64 + payload_len,
            found: bytes.len() as u64,
        });
    }
    if available > payload_len {
        return Err(CorruptGraphError::TrailingBytes(available - payload_len));
    }

    let payload = &bytes[HEADER_LEN..];
    if Sha256::digest(payload).as_slice() != &bytes[16..HEADER_LEN] {
        return Err(CorruptGraphError::ChecksumMismatch);
    }

    let image: GraphImage =
        bincode::deserialize(payload).map_err(|e| CorruptGraphError::Decode(e.to_string()))?;
    SolutionGraph::from_parts(image.task, image.rule_set, image.vertices, image.edges)
        .map_err(CorruptGraphError::Invariant)
}

/// Write the image next to `path` and atomically move it into place.
pub fn save(graph: &SolutionGraph, path: &Path) -> Result<(), PersistError> {
    let bytes = serialize(graph)?;
    let io_err = |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(&bytes).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    tracing::info!(
        path = %path.display(),
        bytes = bytes.len(),
        vertices = graph.vertex_count(),
        edges = graph.edge_count(),
        "saved solution graph"
    );
    Ok(())
}

pub fn load(path: &Path) -> Result<SolutionGraph, PersistError> {
    let bytes = std::fs::read(path).map_err(|source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let graph = deserialize(&bytes).inspect_err(|err| {
        tracing::warn!(path = %path.display(), error = %err, "refusing corrupt graph image");
    })?;
    tracing::debug!(
        path = %path.display(),
        vertices = graph.vertex_count(),
        edges = graph.edge_count(),
        "loaded solution graph"
    );
    Ok(graph)
}
