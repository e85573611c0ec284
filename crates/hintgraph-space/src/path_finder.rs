//! Hint generation over a solution graph.
//!
//! 1. exact terminal hit → `Solved`;
//! 2. nearest vertex by tree edit distance (branch and bound over signature
//!    lower bounds, exact distances in parallel batches);
//! 3. cheapest route from that anchor to a terminal (edge weight
//!    `1 / frequency`);
//! 4. the first edit along the route is the hint.
//!
//! With [`ScoreWeights`] configured, candidates within `slack` edits of the
//! nearest vertex are re-ranked by a weighted score that also looks at
//! support, pass rates, how much of the edit is deletion, shape, and how
//! close the vertex's students are to the asking student.

use crate::graph::{EdgeId, SolutionGraph, Vertex, VertexId};
use crate::profile::StudentProfile;
use hintgraph_syntax::{
    diff, prepared_distance, CanonicalTree, Canonicalizer, CostModel, EditOp,
    EditScript, MalformedTreeError, PreparedTree, RuleSetId, SyntaxTree,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use thiserror::Error;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchBudget {
    /// Upper bound on exact tree edit distance computations per query.
    pub max_exact_distances: usize,
    pub batch_size: usize,
}

impl Default for SearchBudget {
    fn default() -> Self {
        Self {
            max_exact_distances: 512,
            batch_size: 32,
        }
    }
}

/// When to skip the graph and point straight at the goal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectRoutePolicy {
    pub nearly_done_fraction: f64,
    pub far_from_graph_ratio: f64,
    pub avoid_worse_rate: bool,
}

impl Default for DirectRoutePolicy {
    fn default() -> Self {
        Self {
            nearly_done_fraction: 0.2,
            far_from_graph_ratio: 2.0,
            avoid_worse_rate: true,
        }
    }
}

/// Weighted anchor score; the lowest score wins. Profile terms apply only
/// when both the query and the vertex know the attribute.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    /// Extra edits beyond the nearest distance a candidate may need and
    /// still be scored.
    pub slack: u64,
    /// Per unit of tree edit distance.
    pub distance: f64,
    /// Times vertex support over the largest support in the graph.
    pub support: f64,
    /// Times (query rate - vertex best rate), when the query rate is known.
    pub rate: f64,
    /// Times the share of deletions in the edit towards the vertex.
    pub rollback: f64,
    /// Per unit of node-kind count difference.
    pub shape: f64,
    /// Per year between the student and the vertex's median age.
    pub age: f64,
    /// Per experience bracket between the student and the vertex median.
    pub experience: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            slack: 2,
            distance: 0.5,
            support: -0.5,
            rate: 0.3,
            rollback: 4.0,
            shape: 0.25,
            age: 0.15,
            experience: 0.15,
        }
    }
}

impl ScoreWeights {
    fn score(
        &self,
        query: &CanonicalTree,
        candidate: &Vertex,
        distance: u64,
        max_support: usize,
        rate: Option<f64>,
        profile: Option<&StudentProfile>,
    ) -> f64 {
        let mut score = self.distance * distance as f64
            + self.support * candidate.support() as f64 / max_support.max(1) as f64
            + self.rollback * rollback_share(query.tree(), candidate.state.tree())
            + self.shape * query.signature().kind_l1(candidate.state.signature()) as f64;
        if let Some(r) = rate {
            score += self.rate * (r - candidate.best_rate.unwrap_or(0.0));
        }
        if let Some(profile) = profile {
            let medians = candidate.profile_medians();
            if let (Some(age), Some(median)) = (profile.age, medians.age) {
                score += self.age * (f64::from(age) - median).abs();
            }
            if let (Some(exp), Some(median)) = (profile.experience, medians.experience) {
                score += self.experience * exp.rank().abs_diff(median.rank()) as f64;
            }
        }
        score
    }
}

/// Deletions over all operations of the edit from `from` to `to`.
fn rollback_share(from: &SyntaxTree, to: &SyntaxTree) -> f64 {
    let script = diff(from, to);
    if script.is_empty() {
        return 0.0;
    }
    let deletes = script
        .ops()
        .iter()
        .filter(|op| matches!(op, EditOp::Delete { .. }))
        .count();
    deletes as f64 / script.len() as f64
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathFinderConfig {
    pub cost: CostModel,
    pub search: SearchBudget,
    pub direct_route: Option<DirectRoutePolicy>,
    /// Weighted anchor ranking; plain nearest-distance when unset.
    pub scoring: Option<ScoreWeights>,
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HintRoute {
    ThroughGraph,
    Direct,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hint {
    /// Recommended next edit.
    pub edit: EditScript,
    pub anchor: VertexId,
    /// Tree edit distance from the query to the anchor (0 = known state).
    pub anchor_distance: u64,
    /// Vertex the hint leads to; `None` for direct routes.
    pub next: Option<VertexId>,
    pub goal: VertexId,
    /// Projected route, anchor first, goal last.
    pub path: Vec<VertexId>,
    pub route: HintRoute,
    /// The search budget ran out before the nearest vertex was proven.
    pub degraded: bool,
}

impl Hint {
    /// State the student would reach by following the hint. Applies the edit
    /// to `current` when its paths fit; otherwise falls back to the state the
    /// hint leads to.
    pub fn recommended_state(&self, current: &CanonicalTree, graph: &SolutionGraph) -> Option<SyntaxTree> {
        if let Ok(tree) = self.edit.apply_tree(current.tree()) {
            if tree.validate().is_ok() {
                return Some(tree);
            }
        }
        let target = self.next.unwrap_or(self.goal);
        graph.vertex(target).map(|v| v.state.tree().clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoHintAvailable {
    EmptyGraph,
    NoTerminalReachable { anchor: VertexId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HintOutcome {
    Hint(Hint),
    Solved { vertex: VertexId },
    NoHint(NoHintAvailable),
}

impl HintOutcome {
    pub fn hint(&self) -> Option<&Hint> {
        match self {
            HintOutcome::Hint(h) => Some(h),
            _ => None,
        }
    }

    pub fn is_solved(&self) -> bool {
        matches!(self, HintOutcome::Solved { .. })
    }
}

#[derive(Debug, Error)]
pub enum HintError {
    #[error("query canonicalized under {query}, graph uses {graph}")]
    RuleSetMismatch { graph: RuleSetId, query: RuleSetId },

    #[error(transparent)]
    Malformed(#[from] MalformedTreeError),
}

/// Nearest known state to a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    pub vertex: VertexId,
    pub distance: u64,
    pub evaluated: usize,
    pub degraded: bool,
}

// ============================================================================
// Routes to terminals
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Route {
    cost: f64,
    goal: VertexId,
    goal_support: usize,
    via: Option<EdgeId>,
}

impl Route {
    fn rank(&self, other: &Route) -> Ordering {
        self.cost
            .total_cmp(&other.cost)
            .then(other.goal_support.cmp(&self.goal_support))
            .then(self.goal.cmp(&other.goal))
    }
}

#[derive(Debug, Clone, Copy)]
struct Queued {
    route: Route,
    vertex: VertexId,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // Reversed so the max-heap pops the best route first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .route
            .rank(&self.route)
            .then(other.vertex.cmp(&self.vertex))
    }
}

/// Best route from every vertex to its nearest terminal, computed once per
/// query by a multi-source Dijkstra over reversed edges.
struct RouteTable {
    routes: Vec<Option<Route>>,
}

impl RouteTable {
    fn build(graph: &SolutionGraph) -> Self {
        let mut routes: Vec<Option<Route>> = vec![None; graph.vertex_count()];
        let mut heap = BinaryHeap::new();
        for t in graph.terminals() {
            let vertex = VertexId::new(t);
            let Some(v) = graph.vertex(vertex) else {
                continue;
            };
            let route = Route {
                cost: 0.0,
                goal: vertex,
                goal_support: v.support(),
                via: None,
            };
            routes[vertex.index()] = Some(route);
            heap.push(Queued { route, vertex });
        }

        while let Some(Queued { route, vertex }) = heap.pop() {
            match routes[vertex.index()] {
                Some(best) if best.rank(&route) == Ordering::Equal => {}
                _ => continue,
            }
            for edge in graph.incoming(vertex) {
                let candidate = Route {
                    cost: route.cost + 1.0 / f64::from(edge.frequency.max(1)),
                    goal: route.goal,
                    goal_support: route.goal_support,
                    via: Some(edge.id),
                };
                let slot = &mut routes[edge.from.index()];
                let better = match slot {
                    Some(existing) => candidate.rank(existing) == Ordering::Less,
                    None => true,
                };
                if better {
                    *slot = Some(candidate);
                    heap.push(Queued {
                        route: candidate,
                        vertex: edge.from,
                    });
                }
            }
        }
        Self { routes }
    }

    fn cost(&self, v: VertexId) -> Option<f64> {
        self.routes.get(v.index()).copied().flatten().map(|r| r.cost)
    }

    fn path(&self, graph: &SolutionGraph, from: VertexId) -> Option<Vec<VertexId>> {
        let mut path = vec![from];
        let mut at = self.routes.get(from.index()).copied().flatten()?;
        while let Some(via) = at.via {
            let edge = graph.edge(via)?;
            path.push(edge.to);
            if path.len() > graph.vertex_count() {
                return None;
            }
            at = self.routes.get(edge.to.index()).copied().flatten()?;
        }
        Some(path)
    }
}

// ============================================================================
// PathFinder
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct PathFinder {
    config: PathFinderConfig,
}

impl PathFinder {
    pub fn new(config: PathFinderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PathFinderConfig {
        &self.config
    }

    /// Canonicalize `tree` with `canon` and ask for a hint. Refuses to mix
    /// rule sets.
    pub fn hint_for_tree(
        &self,
        graph: &SolutionGraph,
        canon: &Canonicalizer,
        tree: &SyntaxTree,
        rate: Option<f64>,
    ) -> Result<HintOutcome, HintError> {
        if canon.rule_set_id() != graph.rule_set() {
            return Err(HintError::RuleSetMismatch {
                graph: graph.rule_set().clone(),
                query: canon.rule_set_id().clone(),
            });
        }
        let state = canon.canonicalize_lenient(tree)?;
        Ok(self.find_hint_for(graph, &state, rate, None))
    }

    /// [`hint_for_tree`](Self::hint_for_tree) for a known student.
    pub fn hint_for_student(
        &self,
        graph: &SolutionGraph,
        canon: &Canonicalizer,
        tree: &SyntaxTree,
        rate: Option<f64>,
        profile: &StudentProfile,
    ) -> Result<HintOutcome, HintError> {
        if canon.rule_set_id() != graph.rule_set() {
            return Err(HintError::RuleSetMismatch {
                graph: graph.rule_set().clone(),
                query: canon.rule_set_id().clone(),
            });
        }
        let state = canon.canonicalize_lenient(tree)?;
        Ok(self.find_hint_for(graph, &state, rate, Some(profile)))
    }

    pub fn find_hint(&self, graph: &SolutionGraph, current: &CanonicalTree) -> HintOutcome {
        self.find_hint_for(graph, current, None, None)
    }

    /// `rate` is the query's own test pass rate, if known; it feeds the
    /// worse-rate check of the direct route policy.
    pub fn find_hint_rated(
        &self,
        graph: &SolutionGraph,
        current: &CanonicalTree,
        rate: Option<f64>,
    ) -> HintOutcome {
        self.find_hint_for(graph, current, rate, None)
    }

    /// Full query: pass rate and student profile feed the weighted anchor
    /// score when [`PathFinderConfig::scoring`] is set.
    pub fn find_hint_for(
        &self,
        graph: &SolutionGraph,
        current: &CanonicalTree,
        rate: Option<f64>,
        profile: Option<&StudentProfile>,
    ) -> HintOutcome {
        if graph.is_empty() {
            return HintOutcome::NoHint(NoHintAvailable::EmptyGraph);
        }
        if let Some(v) = graph.find_vertex(current) {
            if graph.is_terminal(v) {
                return HintOutcome::Solved { vertex: v };
            }
        }

        let routes = RouteTable::build(graph);
        let Some(anchor) = self.anchor(graph, current, &routes, rate, profile) else {
            return HintOutcome::NoHint(NoHintAvailable::EmptyGraph);
        };
        tracing::debug!(
            anchor = %anchor.vertex,
            distance = anchor.distance,
            evaluated = anchor.evaluated,
            degraded = anchor.degraded,
            "anchored query"
        );

        if graph.is_terminal(anchor.vertex) {
            return HintOutcome::Hint(self.direct(graph, current, anchor, anchor.vertex, vec![anchor.vertex]));
        }

        let Some(path) = routes.path(graph, anchor.vertex) else {
            return HintOutcome::NoHint(NoHintAvailable::NoTerminalReachable {
                anchor: anchor.vertex,
            });
        };
        let goal = path[path.len() - 1];

        if let Some(policy) = &self.config.direct_route {
            if self.should_go_direct(policy, graph, current, anchor, goal, rate) {
                return HintOutcome::Hint(self.direct(graph, current, anchor, goal, path));
            }
        }

        let first = routes
            .routes
            .get(anchor.vertex.index())
            .copied()
            .flatten()
            .and_then(|r| r.via)
            .and_then(|e| graph.edge(e));
        let Some(first) = first else {
            return HintOutcome::NoHint(NoHintAvailable::NoTerminalReachable {
                anchor: anchor.vertex,
            });
        };
        HintOutcome::Hint(Hint {
            edit: first.edit.clone(),
            anchor: anchor.vertex,
            anchor_distance: anchor.distance,
            next: Some(first.to),
            goal,
            path,
            route: HintRoute::ThroughGraph,
            degraded: anchor.degraded,
        })
    }

    /// Nearest vertex to `current`, with the same tie-breaking as hints.
    pub fn nearest_vertex(&self, graph: &SolutionGraph, current: &CanonicalTree) -> Option<Anchor> {
        self.anchor(graph, current, &RouteTable::build(graph), None, None)
    }

    /// Best anchor for a known student (weighted when scoring is configured).
    pub fn anchor_for(
        &self,
        graph: &SolutionGraph,
        current: &CanonicalTree,
        rate: Option<f64>,
        profile: Option<&StudentProfile>,
    ) -> Option<Anchor> {
        self.anchor(graph, current, &RouteTable::build(graph), rate, profile)
    }

    fn anchor(
        &self,
        graph: &SolutionGraph,
        current: &CanonicalTree,
        routes: &RouteTable,
        rate: Option<f64>,
        profile: Option<&StudentProfile>,
    ) -> Option<Anchor> {
        if let Some(vertex) = graph.find_vertex(current) {
            return Some(Anchor {
                vertex,
                distance: 0,
                evaluated: 0,
                degraded: false,
            });
        }

        let cost = &self.config.cost;
        let slack = self.config.scoring.map_or(0, |w| w.slack);
        let signature = current.signature();
        let mut candidates: Vec<(u64, VertexId)> = graph
            .vertices()
            .iter()
            .map(|v| (signature.lower_bound(v.state.signature(), cost), v.id))
            .collect();
        candidates.sort_unstable();

        let query = PreparedTree::new(current.tree());
        let budget = self.config.search.max_exact_distances.max(1);
        let batch = self.config.search.batch_size.max(1);
        let mut evaluated: Vec<(VertexId, u64)> = Vec::new();
        let mut best: Option<u64> = None;
        let mut degraded = false;
        let mut i = 0;

        while i < candidates.len() {
            if best.is_some_and(|b| candidates[i].0 > b.saturating_add(slack)) {
                break;
            }
            if evaluated.len() >= budget {
                degraded = true;
                break;
            }
            let end = (i + batch.min(budget - evaluated.len())).min(candidates.len());
            let bound = best.map_or(u64::MAX, |b| b.saturating_add(slack));
            let distances: Vec<(VertexId, u64)> = candidates[i..end]
                .par_iter()
                .filter(|(lb, _)| *lb <= bound)
                .filter_map(|&(_, id)| {
                    let v = graph.vertex(id)?;
                    let prepared = PreparedTree::new(v.state.tree());
                    Some((id, prepared_distance(&query, &prepared, cost)))
                })
                .collect();
            for &(_, d) in &distances {
                best = Some(best.map_or(d, |b| b.min(d)));
            }
            evaluated.extend(distances);
            i = end;
        }

        let examined = evaluated.len();
        if let (Some(weights), Some(nearest)) = (self.config.scoring, best) {
            // Only candidates inside the slack compete on score.
            evaluated.retain(|&(_, d)| d <= nearest.saturating_add(weights.slack));
        }
        let scores: Vec<f64> = match self.config.scoring {
            Some(weights) => {
                let max_support = graph.vertices().iter().map(Vertex::support).max().unwrap_or(1);
                evaluated
                    .iter()
                    .map(|&(id, d)| {
                        graph.vertex(id).map_or(f64::INFINITY, |v| {
                            weights.score(current, v, d, max_support, rate, profile)
                        })
                    })
                    .collect()
            }
            None => vec![0.0; evaluated.len()],
        };

        let support = |id: VertexId| graph.vertex(id).map_or(0, |v| v.support());
        let (_, (vertex, distance)) = scores
            .iter()
            .zip(evaluated.iter().copied())
            .min_by(|(sa, a), (sb, b)| {
                sa.total_cmp(sb)
                    .then(a.1.cmp(&b.1))
                    .then(support(b.0).cmp(&support(a.0)))
                    .then(
                        routes
                            .cost(a.0)
                            .unwrap_or(f64::INFINITY)
                            .total_cmp(&routes.cost(b.0).unwrap_or(f64::INFINITY)),
                    )
                    .then(a.0.cmp(&b.0))
            })?;
        Some(Anchor {
            vertex,
            distance,
            evaluated: examined,
            degraded,
        })
    }

    fn should_go_direct(
        &self,
        policy: &DirectRoutePolicy,
        graph: &SolutionGraph,
        current: &CanonicalTree,
        anchor: Anchor,
        goal: VertexId,
        rate: Option<f64>,
    ) -> bool {
        let Some(goal_vertex) = graph.vertex(goal) else {
            return false;
        };
        let cost = &self.config.cost;
        let goal_tree = PreparedTree::new(goal_vertex.state.tree());
        let to_goal = prepared_distance(&PreparedTree::new(current.tree()), &goal_tree, cost) as f64;
        let empty = SyntaxTree::empty_module();
        let whole = prepared_distance(&PreparedTree::new(&empty), &goal_tree, cost) as f64;

        if to_goal <= policy.nearly_done_fraction * whole {
            tracing::debug!(to_goal, whole, "query nearly done, going direct");
            return true;
        }
        if policy.avoid_worse_rate {
            let anchor_rate = graph
                .vertex(anchor.vertex)
                .and_then(|v| v.best_rate)
                .unwrap_or(0.0);
            if rate.is_some_and(|r| r > 0.0) && anchor_rate == 0.0 {
                tracing::debug!(anchor = %anchor.vertex, "anchor rates worse than query, going direct");
                return true;
            }
        }
        to_goal > 0.0 && anchor.distance as f64 / to_goal > policy.far_from_graph_ratio
    }

    fn direct(
        &self,
        graph: &SolutionGraph,
        current: &CanonicalTree,
        anchor: Anchor,
        goal: VertexId,
        path: Vec<VertexId>,
    ) -> Hint {
        let edit = graph
            .vertex(goal)
            .map(|v| diff(current.tree(), v.state.tree()))
            .unwrap_or_default();
        Hint {
            edit,
            anchor: anchor.vertex,
            anchor_distance: anchor.distance,
            next: None,
            goal,
            path,
            route: HintRoute::Direct,
            degraded: anchor.degraded,
        }
    }
}
