//! Offline evaluation of hints against held-out trajectories.
//!
//! For every step that has a successor, the true next step is withheld, a
//! hint is requested for the current state, and the hint is compared with
//! what the student actually did next.

use crate::graph::SolutionGraph;
use crate::path_finder::{HintOutcome, PathFinder, PathFinderConfig};
use crate::profile::{Experience, StudentProfile, TaskId};
use crate::trajectory::{Trajectory, TrajectoryId};
use hintgraph_syntax::{diff, tree_edit_distance, CanonicalTree};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HarnessError {
    #[error("graph holds task `{graph}`, evaluation requested for `{requested}`")]
    TaskMismatch { graph: TaskId, requested: TaskId },
}

/// Profile predicate; empty sets and missing bounds accept everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileFilter {
    pub min_age: Option<u8>,
    pub max_age: Option<u8>,
    pub experience: BTreeSet<Experience>,
    pub sources: BTreeSet<String>,
}

impl ProfileFilter {
    pub fn matches(&self, profile: &StudentProfile) -> bool {
        if self.min_age.is_some() || self.max_age.is_some() {
            let Some(age) = profile.age else {
                return false;
            };
            if self.min_age.is_some_and(|m| age < m) || self.max_age.is_some_and(|m| age > m) {
                return false;
            }
        }
        if !self.experience.is_empty()
            && !profile.experience.is_some_and(|e| self.experience.contains(&e))
        {
            return false;
        }
        if !self.sources.is_empty()
            && !profile.source.as_ref().is_some_and(|s| self.sources.contains(s))
        {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub filter: ProfileFilter,
    pub age_band_width: u8,
    pub path_finder: PathFinderConfig,
}

impl HarnessConfig {
    pub fn new(path_finder: PathFinderConfig) -> Self {
        Self {
            filter: ProfileFilter::default(),
            age_band_width: 5,
            path_finder,
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::new(PathFinderConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Hinted edit is what the student did.
    Exact,
    /// Hinted state is strictly closer to the student's next state than the
    /// current state is.
    NearMiss,
    Miss,
    NoHint,
    /// Current state was already a terminal.
    Solved,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub exact: usize,
    pub near_miss: usize,
    pub miss: usize,
    pub no_hint: usize,
    pub solved: usize,
}

impl OutcomeCounts {
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Exact => self.exact += 1,
            Outcome::NearMiss => self.near_miss += 1,
            Outcome::Miss => self.miss += 1,
            Outcome::NoHint => self.no_hint += 1,
            Outcome::Solved => self.solved += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.exact + self.near_miss + self.miss + self.no_hint + self.solved
    }

    /// Steps where a hint was asked of an unsolved state.
    pub fn answerable(&self) -> usize {
        self.total() - self.solved
    }

    pub fn exact_rate(&self) -> f64 {
        ratio(self.exact, self.answerable())
    }

    pub fn useful_rate(&self) -> f64 {
        ratio(self.exact + self.near_miss, self.answerable())
    }
}

fn ratio(n: usize, d: usize) -> f64 {
    if d == 0 {
        0.0
    } else {
        n as f64 / d as f64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub trajectory: TrajectoryId,
    pub step: usize,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarnessReport {
    pub evaluated_trajectories: usize,
    pub filtered_out: usize,
    pub skipped_other_task: usize,
    pub skipped_rule_set: usize,
    /// Keyed `overall`, `experience:<level>`, `age:<lo>-<hi>`, `source:<name>`.
    pub buckets: BTreeMap<String, OutcomeCounts>,
    pub steps: Vec<StepResult>,
}

impl HarnessReport {
    pub fn overall(&self) -> OutcomeCounts {
        self.buckets.get("overall").copied().unwrap_or_default()
    }
}

pub struct Harness<'g> {
    graph: &'g SolutionGraph,
    finder: PathFinder,
    config: HarnessConfig,
}

impl<'g> Harness<'g> {
    pub fn new(graph: &'g SolutionGraph, config: HarnessConfig) -> Self {
        Self {
            graph,
            finder: PathFinder::new(config.path_finder),
            config,
        }
    }

    pub fn evaluate(&self, task: &TaskId, trajectories: &[Trajectory]) -> Result<HarnessReport, HarnessError> {
        if task != self.graph.task() {
            return Err(HarnessError::TaskMismatch {
                graph: self.graph.task().clone(),
                requested: task.clone(),
            });
        }

        let mut report = HarnessReport::default();
        let mut selected = Vec::new();
        for t in trajectories {
            if &t.task != task {
                report.skipped_other_task += 1;
            } else if &t.rule_set != self.graph.rule_set() {
                tracing::warn!(trajectory = %t.id, rule_set = %t.rule_set, "skipping trajectory canonicalized under another rule set");
                report.skipped_rule_set += 1;
            } else if !self.config.filter.matches(&t.profile) {
                report.filtered_out += 1;
            } else {
                selected.push(t);
            }
        }
        report.evaluated_trajectories = selected.len();

        let per_trajectory: Vec<(&Trajectory, Vec<StepResult>)> = selected
            .par_iter()
            .map(|t| (*t, self.evaluate_trajectory(t)))
            .collect();

        report.buckets.insert("overall".to_string(), OutcomeCounts::default());
        for (t, steps) in per_trajectory {
            let keys = self.bucket_keys(&t.profile);
            for step in &steps {
                for key in &keys {
                    report.buckets.entry(key.clone()).or_default().record(step.outcome);
                }
            }
            report.steps.extend(steps);
        }

        let overall = report.overall();
        tracing::info!(
            task = %task,
            trajectories = report.evaluated_trajectories,
            steps = overall.total(),
            exact = overall.exact,
            near_miss = overall.near_miss,
            "evaluation finished"
        );
        Ok(report)
    }

    fn evaluate_trajectory(&self, t: &Trajectory) -> Vec<StepResult> {
        t.transitions()
            .enumerate()
            .map(|(step, (current, actual))| StepResult {
                trajectory: t.id,
                step,
                outcome: self.judge(
                    &current.state,
                    current.verdict.map(|v| v.rate()),
                    &t.profile,
                    &actual.state,
                ),
            })
            .collect()
    }

    fn judge(
        &self,
        current: &CanonicalTree,
        rate: Option<f64>,
        profile: &StudentProfile,
        actual: &CanonicalTree,
    ) -> Outcome {
        let hint = match self.finder.find_hint_for(self.graph, current, rate, Some(profile)) {
            HintOutcome::Solved { .. } => return Outcome::Solved,
            HintOutcome::NoHint(_) => return Outcome::NoHint,
            HintOutcome::Hint(h) => h,
        };
        if hint.edit == diff(current.tree(), actual.tree()) {
            return Outcome::Exact;
        }
        let Some(hinted) = hint.recommended_state(current, self.graph) else {
            return Outcome::Miss;
        };
        if hinted == *actual.tree() {
            return Outcome::Exact;
        }
        let cost = &self.config.path_finder.cost;
        if tree_edit_distance(&hinted, actual.tree(), cost)
            < tree_edit_distance(current.tree(), actual.tree(), cost)
        {
            Outcome::NearMiss
        } else {
            Outcome::Miss
        }
    }

    fn bucket_keys(&self, profile: &StudentProfile) -> Vec<String> {
        let mut keys = vec!["overall".to_string()];
        keys.push(match profile.experience {
            Some(e) => format!("experience:{e}"),
            None => "experience:unknown".to_string(),
        });
        let width = self.config.age_band_width.max(1);
        keys.push(match profile.age {
            Some(age) => {
                let lo = age / width * width;
                format!("age:{lo}-{}", lo.saturating_add(width - 1))
            }
            None => "age:unknown".to_string(),
        });
        keys.push(match &profile.source {
            Some(s) => format!("source:{s}"),
            None => "source:unknown".to_string(),
        });
        keys
    }
}

/// Deterministic train/test split: every `every`-th trajectory is held out.
pub fn split_holdout(trajectories: Vec<Trajectory>, every: usize) -> (Vec<Trajectory>, Vec<Trajectory>) {
    let every = every.max(2);
    let mut train = Vec::new();
    let mut test = Vec::new();
    for (i, t) in trajectories.into_iter().enumerate() {
        if i % every == every - 1 {
            test.push(t);
        } else {
            train.push(t);
        }
    }
    (train, test)
}
