//! Trajectory aggregation.
//!
//! A trajectory is one student's time-ordered walk through canonical states
//! for one task. Consecutive snapshots that land on the same canonical state
//! collapse into one step; optional passes cut loops and anchor every walk at
//! the empty program.

use crate::profile::{StudentProfile, TaskId, Verdict};
use chrono::{DateTime, Utc};
use hintgraph_syntax::{
    CanonBudget, CanonicalTree, Canonicalizer, MalformedTreeError, RuleError, RuleRegistry,
    RuleSet, RuleSetId, SyntaxTree,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrajectoryId(Uuid);

impl TrajectoryId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for TrajectoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One parsed snapshot as handed over by the preprocessing pipeline.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub tree: SyntaxTree,
    pub timestamp: DateTime<Utc>,
    pub verdict: Option<Verdict>,
}

impl Snapshot {
    pub fn new(tree: SyntaxTree, timestamp: DateTime<Utc>, verdict: Option<Verdict>) -> Self {
        Self {
            tree,
            timestamp,
            verdict,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub state: CanonicalTree,
    pub verdict: Option<Verdict>,
    /// Time since the previous step's first snapshot (zero for the first step).
    pub elapsed: Duration,
    /// Timestamp of the first snapshot collapsed into this step (of the
    /// latest revisit when a loop back to it was cut).
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub id: TrajectoryId,
    pub task: TaskId,
    pub profile: StudentProfile,
    pub rule_set: RuleSetId,
    pub steps: Vec<Step>,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn with_id(mut self, id: TrajectoryId) -> Self {
        self.id = id;
        self
    }

    /// Consecutive step pairs.
    pub fn transitions(&self) -> impl Iterator<Item = (&Step, &Step)> {
        self.steps.windows(2).map(|w| (&w[0], &w[1]))
    }

    pub fn reaches_terminal(&self) -> bool {
        self.steps
            .iter()
            .any(|s| s.verdict.is_some_and(Verdict::is_passed))
    }
}

#[derive(Debug, Error)]
pub enum TrajectoryError {
    #[error("trajectory has no snapshots")]
    Empty,

    #[error("snapshot {snapshot} is malformed: {source}")]
    Malformed {
        snapshot: usize,
        #[source]
        source: MalformedTreeError,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Cut `T1 → T2 → T3 → T1 → T4` down to `T1 → T4`.
    pub remove_loops: bool,
    /// Start every trajectory at the canonical empty program.
    pub prepend_empty_state: bool,
}

/// Turns snapshot sequences into trajectories under one rule set.
#[derive(Debug, Clone)]
pub struct TrajectoryAggregator {
    canon: Canonicalizer,
    config: AggregatorConfig,
}

impl TrajectoryAggregator {
    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self {
            canon: Canonicalizer::new(rules),
            config: AggregatorConfig::default(),
        }
    }

    /// Select the rule set registered for `language`.
    pub fn for_language(registry: &RuleRegistry, language: &str) -> Result<Self, RuleError> {
        Ok(Self::new(registry.resolve(language)?))
    }

    pub fn with_config(mut self, config: AggregatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_budget(mut self, budget: CanonBudget) -> Self {
        self.canon = self.canon.with_budget(budget);
        self
    }

    pub fn canonicalizer(&self) -> &Canonicalizer {
        &self.canon
    }

    pub fn config(&self) -> AggregatorConfig {
        self.config
    }

    pub fn rule_set_id(&self) -> &RuleSetId {
        self.canon.rule_set_id()
    }

    /// Canonicalize a single state (timeouts degrade to approximate states).
    pub fn canonicalize(&self, tree: &SyntaxTree) -> Result<CanonicalTree, MalformedTreeError> {
        self.canon.canonicalize_lenient(tree)
    }

    pub fn build_trajectory(
        &self,
        task: TaskId,
        profile: StudentProfile,
        snapshots: Vec<Snapshot>,
    ) -> Result<Trajectory, TrajectoryError> {
        if snapshots.is_empty() {
            return Err(TrajectoryError::Empty);
        }

        let mut ordered: Vec<(usize, Snapshot)> = snapshots.into_iter().enumerate().collect();
        ordered.sort_by_key(|(_, s)| s.timestamp);

        let mut steps: Vec<Step> = Vec::with_capacity(ordered.len());
        for (index, snapshot) in ordered {
            let state = self
                .canon
                .canonicalize_lenient(&snapshot.tree)
                .map_err(|source| TrajectoryError::Malformed {
                    snapshot: index,
                    source,
                })?;
            match steps.last_mut() {
                Some(last) if last.state == state => merge_verdict(last, snapshot.verdict),
                _ => steps.push(Step {
                    state,
                    verdict: snapshot.verdict,
                    elapsed: Duration::ZERO,
                    timestamp: snapshot.timestamp,
                }),
            }
        }

        if self.config.prepend_empty_state {
            let empty = self
                .canon
                .canonicalize_lenient(&SyntaxTree::empty_module())
                .map_err(|source| TrajectoryError::Malformed {
                    snapshot: 0,
                    source,
                })?;
            if steps[0].state != empty {
                let timestamp = steps[0].timestamp;
                steps.insert(
                    0,
                    Step {
                        state: empty,
                        verdict: None,
                        elapsed: Duration::ZERO,
                        timestamp,
                    },
                );
            }
        }

        if self.config.remove_loops {
            steps = remove_loops(steps);
        }

        let mut previous: Option<DateTime<Utc>> = None;
        for step in &mut steps {
            step.elapsed = previous
                .and_then(|p| (step.timestamp - p).to_std().ok())
                .unwrap_or_default();
            previous = Some(step.timestamp);
        }

        let trajectory = Trajectory {
            id: TrajectoryId::new_v4(),
            task,
            profile,
            rule_set: self.canon.rule_set_id().clone(),
            steps,
        };
        tracing::debug!(
            trajectory = %trajectory.id,
            task = %trajectory.task,
            steps = trajectory.steps.len(),
            "built trajectory"
        );
        Ok(trajectory)
    }
}

/// A passing snapshot makes the step passing; otherwise the last known
/// verdict wins.
fn merge_verdict(step: &mut Step, verdict: Option<Verdict>) {
    if step.verdict.is_some_and(Verdict::is_passed) {
        return;
    }
    if let Some(v) = verdict {
        step.verdict = Some(v);
    }
}

fn remove_loops(steps: Vec<Step>) -> Vec<Step> {
    let mut out: Vec<Step> = Vec::with_capacity(steps.len());
    for step in steps {
        match out.iter().position(|s| s.state == step.state) {
            Some(k) => {
                // The student is back at step k as of this revisit.
                out.truncate(k + 1);
                out[k].timestamp = step.timestamp;
                merge_verdict(&mut out[k], step.verdict);
            }
            None => out.push(step),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use hintgraph_syntax::parse_tree;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_600_000_000 + secs, 0).unwrap()
    }

    fn snap(text: &str, secs: i64, verdict: Option<Verdict>) -> Snapshot {
        Snapshot::new(parse_tree(text).unwrap(), at(secs), verdict)
    }

    fn aggregator() -> TrajectoryAggregator {
        TrajectoryAggregator::new(Arc::new(RuleSet::python_v1()))
    }

    const A: &str = "(module (assign (name x) (const 1)))";
    const B: &str = "(module (assign (name x) (const 1)) (assign (name y) (const 2)))";
    const C: &str = "(module (assign (name x) (const 3)))";

    #[test]
    fn no_op_edits_collapse() {
        let t = aggregator()
            .build_trajectory(
                "pies".into(),
                StudentProfile::default(),
                vec![
                    snap(A, 0, None),
                    snap("(module (assign (name renamed) (const 1)))", 5, Some(Verdict::NotCompiled)),
                    snap(B, 30, Some(Verdict::Passed)),
                ],
            )
            .unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.steps[0].verdict, Some(Verdict::NotCompiled));
        assert_eq!(t.steps[0].timestamp, at(0));
        assert_eq!(t.steps[1].elapsed, Duration::from_secs(30));
        assert!(t.reaches_terminal());
        assert_eq!(t.rule_set.to_string(), "python@1");
    }

    #[test]
    fn snapshots_are_sorted_by_time() {
        let t = aggregator()
            .build_trajectory(
                "pies".into(),
                StudentProfile::default(),
                vec![snap(B, 20, None), snap(A, 10, None)],
            )
            .unwrap();
        assert_eq!(t.steps[0].state.size(), 4);
        assert_eq!(t.steps[1].elapsed, Duration::from_secs(10));
    }

    #[test]
    fn passing_snapshot_wins_within_a_step() {
        let t = aggregator()
            .build_trajectory(
                "pies".into(),
                StudentProfile::default(),
                vec![
                    snap(A, 0, Some(Verdict::Passed)),
                    snap(A, 1, Some(Verdict::Failed { passed_tests: 0, total_tests: 2 })),
                ],
            )
            .unwrap();
        assert_eq!(t.len(), 1);
        assert_eq!(t.steps[0].verdict, Some(Verdict::Passed));
    }

    #[test]
    fn empty_and_malformed_inputs_are_rejected() {
        let agg = aggregator();
        assert!(matches!(
            agg.build_trajectory("pies".into(), StudentProfile::default(), vec![]),
            Err(TrajectoryError::Empty)
        ));
        let err = agg
            .build_trajectory(
                "pies".into(),
                StudentProfile::default(),
                vec![snap(A, 0, None), snap("(module (assign (name x)))", 1, None)],
            )
            .unwrap_err();
        assert!(matches!(err, TrajectoryError::Malformed { snapshot: 1, .. }));
    }

    #[test]
    fn loops_are_cut() {
        let agg = aggregator().with_config(AggregatorConfig {
            remove_loops: true,
            prepend_empty_state: false,
        });
        let t = agg
            .build_trajectory(
                "pies".into(),
                StudentProfile::default(),
                vec![
                    snap(A, 0, None),
                    snap(B, 10, None),
                    snap(C, 20, None),
                    snap(A, 30, None),
                    snap(B, 40, Some(Verdict::Passed)),
                ],
            )
            .unwrap();
        assert_eq!(t.len(), 2);
        // Measured from the return to A at 30s, not the first visit.
        assert_eq!(t.steps[0].timestamp, at(30));
        assert_eq!(t.steps[1].elapsed, Duration::from_secs(10));
        assert_eq!(t.steps[1].verdict, Some(Verdict::Passed));
    }

    #[test]
    fn empty_state_is_prepended_once() {
        let agg = aggregator().with_config(AggregatorConfig {
            remove_loops: false,
            prepend_empty_state: true,
        });
        let t = agg
            .build_trajectory(
                "pies".into(),
                StudentProfile::default(),
                vec![snap(A, 0, None)],
            )
            .unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.steps[0].state.to_sexpr(), "(module)");

        let t = agg
            .build_trajectory(
                "pies".into(),
                StudentProfile::default(),
                vec![snap("(module (comment hi))", 0, None), snap(A, 3, None)],
            )
            .unwrap();
        assert_eq!(t.len(), 2);
    }
}
