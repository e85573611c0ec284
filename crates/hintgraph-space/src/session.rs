//! JSON session records as produced by the preprocessing pipeline.
//!
//! ```json
//! { "task": "sum", "language": "python", "profile": { "age": 15 },
//!   "snapshots": [ { "timestamp": "2024-03-01T10:00:00Z",
//!                    "verdict": "passed",
//!                    "tree_sexpr": "(module (pass))" } ] }
//! ```
//!
//! A snapshot carries either a nested `tree` or a `tree_sexpr` string.

use crate::error::{Result, SpaceError};
use crate::profile::{StudentProfile, TaskId, Verdict};
use crate::shared::Session;
use crate::trajectory::Snapshot;
use chrono::{DateTime, Utc};
use hintgraph_syntax::{parse_tree, NestedNode, SyntaxTree};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub verdict: Option<Verdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree: Option<NestedNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree_sexpr: Option<String>,
}

impl SnapshotRecord {
    pub fn to_snapshot(&self, index: usize) -> Result<Snapshot> {
        let tree = match (&self.tree, &self.tree_sexpr) {
            (Some(nested), _) => SyntaxTree::from_nested(nested),
            (None, Some(text)) => parse_tree(text)?,
            (None, None) => return Err(SpaceError::MissingTree(index)),
        };
        Ok(Snapshot::new(tree, self.timestamp, self.verdict))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub task: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default)]
    pub profile: StudentProfile,
    #[serde(default)]
    pub snapshots: Vec<SnapshotRecord>,
}

impl SessionRecord {
    pub fn to_session(&self) -> Result<Session> {
        let snapshots = self
            .snapshots
            .iter()
            .enumerate()
            .map(|(i, s)| s.to_snapshot(i))
            .collect::<Result<Vec<_>>>()?;
        Ok(Session::new(self.task.clone(), self.profile.clone(), snapshots))
    }
}

/// Accepts a single record, an array of records, or JSON lines.
pub fn parse_session_records(text: &str) -> serde_json::Result<Vec<SessionRecord>> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed);
    }
    match serde_json::from_str::<SessionRecord>(trimmed) {
        Ok(one) => Ok(vec![one]),
        Err(err) => {
            let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
            if lines.len() <= 1 {
                return Err(err);
            }
            lines.into_iter().map(serde_json::from_str).collect()
        }
    }
}
