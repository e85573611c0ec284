//! Shared, lock-guarded solution graph and batch construction.
//!
//! Canonicalization and diffing run in parallel outside the lock; writers
//! hold the write guard only for lookup-or-create and merge.

use crate::graph::{GraphError, InsertStats, PreparedTrajectory, SolutionGraph};
use crate::profile::{StudentProfile, TaskId};
use crate::trajectory::{Snapshot, TrajectoryAggregator, TrajectoryError};
use parking_lot::{RwLock, RwLockReadGuard};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One student's raw session for a task.
#[derive(Debug, Clone)]
pub struct Session {
    pub task: TaskId,
    pub profile: StudentProfile,
    pub snapshots: Vec<Snapshot>,
}

impl Session {
    pub fn new(task: TaskId, profile: StudentProfile, snapshots: Vec<Snapshot>) -> Self {
        Self {
            task,
            profile,
            snapshots,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedSession {
    pub index: usize,
    pub reason: String,
}

/// Outcome of a batch build. Bad sessions never abort the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub inserted: usize,
    pub skipped_empty: Vec<usize>,
    pub rejected: Vec<RejectedSession>,
    pub stats: InsertStats,
}

impl BuildReport {
    pub fn is_clean(&self) -> bool {
        self.skipped_empty.is_empty() && self.rejected.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct SharedSolutionGraph {
    inner: Arc<RwLock<SolutionGraph>>,
}

impl SharedSolutionGraph {
    pub fn new(graph: SolutionGraph) -> Self {
        Self {
            inner: Arc::new(RwLock::new(graph)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, SolutionGraph> {
        self.inner.read()
    }

    pub fn insert_prepared(&self, prepared: &PreparedTrajectory) -> Result<InsertStats, GraphError> {
        self.inner.write().insert_prepared(prepared)
    }

    /// Aggregate, diff and merge a batch of sessions.
    pub fn insert_batch(&self, aggregator: &TrajectoryAggregator, sessions: Vec<Session>) -> BuildReport {
        let prepared: Vec<(usize, Result<PreparedTrajectory, TrajectoryError>)> = sessions
            .into_par_iter()
            .enumerate()
            .map(|(index, session)| {
                let result = aggregator
                    .build_trajectory(session.task, session.profile, session.snapshots)
                    .map(PreparedTrajectory::new);
                (index, result)
            })
            .collect();

        let mut report = BuildReport::default();
        for (index, result) in prepared {
            match result {
                Ok(p) => match self.insert_prepared(&p) {
                    Ok(stats) => {
                        report.inserted += 1;
                        report.stats.absorb(stats);
                    }
                    Err(err) => {
                        tracing::warn!(session = index, error = %err, "session rejected");
                        report.rejected.push(RejectedSession {
                            index,
                            reason: err.to_string(),
                        });
                    }
                },
                Err(TrajectoryError::Empty) => {
                    tracing::warn!(session = index, "skipping session without snapshots");
                    report.skipped_empty.push(index);
                }
                Err(err) => {
                    tracing::warn!(session = index, error = %err, "session rejected");
                    report.rejected.push(RejectedSession {
                        index,
                        reason: err.to_string(),
                    });
                }
            }
        }

        let graph = self.read();
        tracing::info!(
            task = %graph.task(),
            inserted = report.inserted,
            skipped = report.skipped_empty.len(),
            rejected = report.rejected.len(),
            vertices = graph.vertex_count(),
            edges = graph.edge_count(),
            "batch merged"
        );
        report
    }

    /// Take the graph back out, cloning only if other handles are alive.
    pub fn into_inner(self) -> SolutionGraph {
        match Arc::try_unwrap(self.inner) {
            Ok(lock) => lock.into_inner(),
            Err(shared) => shared.read().clone(),
        }
    }
}

/// Build a fresh graph for `task` from a batch of sessions.
pub fn build_graph(
    aggregator: &TrajectoryAggregator,
    task: TaskId,
    sessions: Vec<Session>,
) -> (SolutionGraph, BuildReport) {
    let shared = SharedSolutionGraph::new(SolutionGraph::new(task, aggregator.rule_set_id().clone()));
    let report = shared.insert_batch(aggregator, sessions);
    (shared.into_inner(), report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Verdict;
    use chrono::{TimeZone, Utc};
    use hintgraph_syntax::{parse_tree, RuleSet};

    fn session(task: &str, steps: &[(&str, Option<Verdict>)]) -> Session {
        let snapshots = steps
            .iter()
            .enumerate()
            .map(|(i, (text, v))| {
                Snapshot::new(
                    parse_tree(text).unwrap(),
                    Utc.timestamp_opt(1_700_000_000 + i as i64, 0).unwrap(),
                    *v,
                )
            })
            .collect();
        Session::new(task.into(), StudentProfile::default(), snapshots)
    }

    #[test]
    fn batch_reports_bad_sessions_without_aborting() {
        let agg = TrajectoryAggregator::new(Arc::new(RuleSet::python_v1()));
        let sessions = vec![
            session(
                "sum",
                &[
                    ("(module (assign (name x) (const 1)))", None),
                    ("(module (assign (name x) (const 1)) (assign (name y) (const 2)))", Some(Verdict::Passed)),
                ],
            ),
            session("sum", &[]),
            session("sum", &[("(module (if (name a)))", None)]),
            session("other", &[("(module (pass))", None)]),
        ];
        let (graph, report) = build_graph(&agg, "sum".into(), sessions);
        assert_eq!(report.inserted, 1);
        assert_eq!(report.skipped_empty, vec![1]);
        assert_eq!(
            report.rejected.iter().map(|r| r.index).collect::<Vec<_>>(),
            vec![2, 3]
        );
        assert!(!report.is_clean());
        assert_eq!(graph.vertex_count(), 2);
        assert_eq!(report.stats.new_edges, 1);
    }
}
