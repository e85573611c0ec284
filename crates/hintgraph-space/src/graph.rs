//! The Solution Graph: one vertex per distinct canonical state, one edge per
//! distinct (predecessor, successor, edit) transition observed across all
//! trajectories of a task.
//!
//! Vertices and edges live in dense `Vec`s addressed by `u32` ids. Lookup
//! indexes (fingerprint buckets, edge keys, adjacency, terminal bitmap) are
//! derived data and are rebuilt on load.

use crate::profile::{median, Experience, StudentProfile, TaskId, Verdict};
use crate::trajectory::{Trajectory, TrajectoryId};
use ahash::AHashMap;
use hintgraph_syntax::{diff, CanonicalTree, EditScript, RuleSetId};
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Ids
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct VertexId(u32);

impl VertexId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct EdgeId(u32);

impl EdgeId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

// ============================================================================
// Vertices and edges
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub id: VertexId,
    pub state: CanonicalTree,
    /// Which trajectories visited this state, and who produced them.
    pub provenance: BTreeMap<TrajectoryId, StudentProfile>,
    pub terminal: bool,
    /// Best test pass rate observed on this state.
    pub best_rate: Option<f64>,
}

/// Age / experience medians over the unique profiles behind a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProfileMedians {
    pub age: Option<f64>,
    pub experience: Option<Experience>,
}

impl Vertex {
    /// Number of distinct trajectories that produced this state.
    pub fn support(&self) -> usize {
        self.provenance.len()
    }

    pub fn unique_profiles(&self) -> BTreeSet<&StudentProfile> {
        self.provenance.values().collect()
    }

    pub fn profile_medians(&self) -> ProfileMedians {
        let profiles = self.unique_profiles();
        let mut ages: Vec<f64> = profiles
            .iter()
            .filter_map(|p| p.age.map(f64::from))
            .collect();
        let mut ranks: Vec<f64> = profiles
            .iter()
            .filter_map(|p| p.experience.map(|e| e.rank() as f64))
            .collect();
        ProfileMedians {
            age: median(&mut ages),
            experience: median(&mut ranks).and_then(|m| Experience::from_rank(m.floor() as usize)),
        }
    }

    pub fn is_approximate(&self) -> bool {
        self.state.is_approximate()
    }
}

/// One observed traversal of an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub trajectory: TrajectoryId,
    pub profile: StudentProfile,
    pub elapsed: Duration,
    /// Verdict recorded on the successor state.
    pub verdict: Option<Verdict>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub from: VertexId,
    pub to: VertexId,
    pub edit: EditScript,
    pub edit_digest: u64,
    pub frequency: u32,
    pub transitions: Vec<Transition>,
}

impl Edge {
    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            from: self.from,
            to: self.to,
            edit_digest: self.edit_digest,
        }
    }

    /// Distinct trajectories that took this edge.
    pub fn support(&self) -> usize {
        self.transitions
            .iter()
            .map(|t| t.trajectory)
            .collect::<BTreeSet<_>>()
            .len()
    }

    pub fn median_elapsed(&self) -> Option<Duration> {
        let mut secs: Vec<f64> = self
            .transitions
            .iter()
            .map(|t| t.elapsed.as_secs_f64())
            .collect();
        median(&mut secs).map(Duration::from_secs_f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeKey {
    pub from: VertexId,
    pub to: VertexId,
    pub edit_digest: u64,
}

// ============================================================================
// Errors / reports
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("trajectory for task `{found}` cannot join the graph of task `{expected}`")]
    TaskMismatch { expected: TaskId, found: TaskId },

    #[error("trajectory canonicalized under {found}, graph uses {expected}")]
    RuleSetMismatch {
        expected: RuleSetId,
        found: RuleSetId,
    },

    #[error("unknown vertex {0}")]
    UnknownVertex(VertexId),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertStats {
    pub new_vertices: usize,
    pub new_edges: usize,
    pub transitions: usize,
    pub new_terminals: usize,
}

impl InsertStats {
    pub fn absorb(&mut self, other: InsertStats) {
        self.new_vertices += other.new_vertices;
        self.new_edges += other.new_edges;
        self.transitions += other.transitions;
        self.new_terminals += other.new_terminals;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub vertices: usize,
    pub edges: usize,
    pub terminals: usize,
    pub transitions: usize,
    pub approximate_vertices: usize,
}

// ============================================================================
// Prepared trajectories
// ============================================================================

/// A trajectory with the diffs of its consecutive step pairs already computed,
/// so that graph mutation only does lookups and merges.
#[derive(Debug, Clone)]
pub struct PreparedTrajectory {
    trajectory: Trajectory,
    edits: Vec<Option<(EditScript, u64)>>,
}

impl PreparedTrajectory {
    pub fn new(trajectory: Trajectory) -> Self {
        let edits = trajectory
            .transitions()
            .map(|(a, b)| {
                if a.state == b.state {
                    None
                } else {
                    let script = diff(a.state.tree(), b.state.tree());
                    let digest = script.digest();
                    Some((script, digest))
                }
            })
            .collect();
        Self { trajectory, edits }
    }

    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    pub fn into_trajectory(self) -> Trajectory {
        self.trajectory
    }
}

// ============================================================================
// SolutionGraph
// ============================================================================

#[derive(Debug, Clone)]
pub struct SolutionGraph {
    task: TaskId,
    rule_set: RuleSetId,
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    by_fingerprint: AHashMap<u64, Vec<VertexId>>,
    by_key: AHashMap<EdgeKey, EdgeId>,
    outgoing: Vec<Vec<EdgeId>>,
    incoming: Vec<Vec<EdgeId>>,
    terminals: RoaringBitmap,
}

impl SolutionGraph {
    pub fn new(task: TaskId, rule_set: RuleSetId) -> Self {
        Self {
            task,
            rule_set,
            vertices: Vec::new(),
            edges: Vec::new(),
            by_fingerprint: AHashMap::new(),
            by_key: AHashMap::new(),
            outgoing: Vec::new(),
            incoming: Vec::new(),
            terminals: RoaringBitmap::new(),
        }
    }

    pub fn task(&self) -> &TaskId {
        &self.task
    }

    pub fn rule_set(&self) -> &RuleSetId {
        &self.rule_set
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn vertex(&self, id: VertexId) -> Option<&Vertex> {
        self.vertices.get(id.index())
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(id.index())
    }

    pub fn edge_between(&self, from: VertexId, to: VertexId) -> impl Iterator<Item = &Edge> {
        self.outgoing(from).filter(move |e| e.to == to)
    }

    pub fn outgoing(&self, id: VertexId) -> impl Iterator<Item = &Edge> {
        self.outgoing
            .get(id.index())
            .into_iter()
            .flatten()
            .map(|e| &self.edges[e.index()])
    }

    pub fn incoming(&self, id: VertexId) -> impl Iterator<Item = &Edge> {
        self.incoming
            .get(id.index())
            .into_iter()
            .flatten()
            .map(|e| &self.edges[e.index()])
    }

    pub fn terminals(&self) -> &RoaringBitmap {
        &self.terminals
    }

    pub fn is_terminal(&self, id: VertexId) -> bool {
        self.terminals.contains(id.raw())
    }

    /// Vertex holding exactly this canonical state.
    pub fn find_vertex(&self, state: &CanonicalTree) -> Option<VertexId> {
        self.by_fingerprint
            .get(&state.fingerprint())?
            .iter()
            .copied()
            .find(|id| self.vertices[id.index()].state == *state)
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            vertices: self.vertices.len(),
            edges: self.edges.len(),
            terminals: self.terminals.len() as usize,
            transitions: self.edges.iter().map(|e| e.transitions.len()).sum(),
            approximate_vertices: self.vertices.iter().filter(|v| v.is_approximate()).count(),
        }
    }

    /// Flip a vertex to terminal. Only a passing verdict flips; the flag is
    /// never cleared. Returns whether the vertex changed.
    pub fn mark_terminal(&mut self, id: VertexId, verdict: Verdict) -> Result<bool, GraphError> {
        let vertex = self
            .vertices
            .get_mut(id.index())
            .ok_or(GraphError::UnknownVertex(id))?;
        let rate = verdict.rate();
        vertex.best_rate = Some(vertex.best_rate.map_or(rate, |r| r.max(rate)));
        if !verdict.is_passed() || vertex.terminal {
            return Ok(false);
        }
        vertex.terminal = true;
        self.terminals.insert(id.raw());
        Ok(true)
    }

    /// Merge one trajectory into the graph.
    pub fn insert(&mut self, trajectory: &Trajectory) -> Result<InsertStats, GraphError> {
        self.insert_prepared(&PreparedTrajectory::new(trajectory.clone()))
    }

    pub fn insert_prepared(&mut self, prepared: &PreparedTrajectory) -> Result<InsertStats, GraphError> {
        let trajectory = &prepared.trajectory;
        self.check_compatible(trajectory)?;

        let mut stats = InsertStats::default();
        let mut ids = Vec::with_capacity(trajectory.steps.len());
        for step in &trajectory.steps {
            let (id, created) = self.lookup_or_create(&step.state);
            if created {
                stats.new_vertices += 1;
            }
            self.vertices[id.index()]
                .provenance
                .insert(trajectory.id, trajectory.profile.clone());
            if let Some(verdict) = step.verdict {
                if self.mark_terminal(id, verdict)? {
                    stats.new_terminals += 1;
                }
            }
            ids.push(id);
        }

        for (i, edit) in prepared.edits.iter().enumerate() {
            let Some((script, digest)) = edit else {
                continue;
            };
            let (from, to) = (ids[i], ids[i + 1]);
            if from == to {
                continue;
            }
            let key = EdgeKey {
                from,
                to,
                edit_digest: *digest,
            };
            let edge_id = match self.by_key.get(&key) {
                Some(id) => *id,
                None => {
                    stats.new_edges += 1;
                    self.push_edge(key, script.clone())
                }
            };
            let next = &trajectory.steps[i + 1];
            let edge = &mut self.edges[edge_id.index()];
            edge.frequency += 1;
            edge.transitions.push(Transition {
                trajectory: trajectory.id,
                profile: trajectory.profile.clone(),
                elapsed: next.elapsed,
                verdict: next.verdict,
            });
            stats.transitions += 1;
        }

        tracing::debug!(
            trajectory = %trajectory.id,
            new_vertices = stats.new_vertices,
            new_edges = stats.new_edges,
            "merged trajectory"
        );
        Ok(stats)
    }

    pub(crate) fn check_compatible(&self, trajectory: &Trajectory) -> Result<(), GraphError> {
        if trajectory.task != self.task {
            return Err(GraphError::TaskMismatch {
                expected: self.task.clone(),
                found: trajectory.task.clone(),
            });
        }
        if trajectory.rule_set != self.rule_set {
            return Err(GraphError::RuleSetMismatch {
                expected: self.rule_set.clone(),
                found: trajectory.rule_set.clone(),
            });
        }
        Ok(())
    }

    fn lookup_or_create(&mut self, state: &CanonicalTree) -> (VertexId, bool) {
        if let Some(id) = self.find_vertex(state) {
            return (id, false);
        }
        let id = VertexId(self.vertices.len() as u32);
        self.vertices.push(Vertex {
            id,
            state: state.clone(),
            provenance: BTreeMap::new(),
            terminal: false,
            best_rate: None,
        });
        self.by_fingerprint
            .entry(state.fingerprint())
            .or_default()
            .push(id);
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        (id, true)
    }

    fn push_edge(&mut self, key: EdgeKey, edit: EditScript) -> EdgeId {
        let id = EdgeId(self.edges.len() as u32);
        self.edges.push(Edge {
            id,
            from: key.from,
            to: key.to,
            edit,
            edit_digest: key.edit_digest,
            frequency: 0,
            transitions: Vec::new(),
        });
        self.by_key.insert(key, id);
        self.outgoing[key.from.index()].push(id);
        self.incoming[key.to.index()].push(id);
        id
    }

    // ------------------------------------------------------------------------
    // Rebuild from stored parts
    // ------------------------------------------------------------------------

    /// Rebuild indexes over stored vertices/edges and check every structural
    /// invariant. Nothing is returned unless all checks pass.
    pub(crate) fn from_parts(
        task: TaskId,
        rule_set: RuleSetId,
        vertices: Vec<Vertex>,
        edges: Vec<Edge>,
    ) -> Result<Self, String> {
        let mut graph = Self::new(task, rule_set);
        graph.outgoing = vec![Vec::new(); vertices.len()];
        graph.incoming = vec![Vec::new(); vertices.len()];

        // Trees first: fingerprinting or comparing a malformed arena is unsafe.
        for vertex in &vertices {
            if let Err(err) = vertex.state.tree().validate() {
                return Err(format!("vertex {} holds a malformed tree: {err}", vertex.id));
            }
        }

        for (i, vertex) in vertices.iter().enumerate() {
            if vertex.id.index() != i {
                return Err(format!("vertex at position {i} has id {}", vertex.id));
            }
            if !vertex.state.is_consistent() {
                return Err(format!("vertex {} fingerprint does not match its tree", vertex.id));
            }
            let bucket = graph
                .by_fingerprint
                .entry(vertex.state.fingerprint())
                .or_default();
            if bucket.iter().any(|other| vertices[other.index()].state == vertex.state) {
                return Err(format!("vertex {} duplicates an earlier state", vertex.id));
            }
            bucket.push(vertex.id);
            if vertex.terminal {
                graph.terminals.insert(vertex.id.raw());
            }
        }

        for (i, edge) in edges.iter().enumerate() {
            if edge.id.index() != i {
                return Err(format!("edge at position {i} has id {}", edge.id));
            }
            if edge.from.index() >= vertices.len() || edge.to.index() >= vertices.len() {
                return Err(format!("edge {} points outside the vertex table", edge.id));
            }
            if edge.edit_digest != edge.edit.digest() {
                return Err(format!("edge {} edit digest does not match its script", edge.id));
            }
            if edge.frequency as usize != edge.transitions.len() {
                return Err(format!(
                    "edge {} frequency {} disagrees with {} transitions",
                    edge.id,
                    edge.frequency,
                    edge.transitions.len()
                ));
            }
            if graph.by_key.insert(edge.key(), edge.id).is_some() {
                return Err(format!("edge {} duplicates an earlier transition key", edge.id));
            }
            graph.outgoing[edge.from.index()].push(edge.id);
            graph.incoming[edge.to.index()].push(edge.id);
        }

        graph.vertices = vertices;
        graph.edges = edges;
        Ok(graph)
    }
}

impl PartialEq for SolutionGraph {
    fn eq(&self, other: &Self) -> bool {
        self.task == other.task
            && self.rule_set == other.rule_set
            && self.vertices == other.vertices
            && self.edges == other.edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trajectory::{Snapshot, TrajectoryAggregator};
    use chrono::{TimeZone, Utc};
    use hintgraph_syntax::{parse_tree, RuleSet};
    use std::sync::Arc;

    fn build(steps: &[(&str, Option<Verdict>)], profile: StudentProfile) -> Trajectory {
        let agg = TrajectoryAggregator::new(Arc::new(RuleSet::python_v1()));
        let snapshots = steps
            .iter()
            .enumerate()
            .map(|(i, (text, verdict))| {
                Snapshot::new(
                    parse_tree(text).unwrap(),
                    Utc.timestamp_opt(1_700_000_000 + 60 * i as i64, 0).unwrap(),
                    *verdict,
                )
            })
            .collect();
        agg.build_trajectory("sum".into(), profile, snapshots).unwrap()
    }

    fn graph() -> SolutionGraph {
        SolutionGraph::new("sum".into(), RuleSetId::new("python", 1))
    }

    const V1: &str = "(module (assign (name x) (const 1)))";
    const V2: &str = "(module (assign (name x) (const 1)) (assign (name y) (const 2)))";

    #[test]
    fn double_insert_bumps_frequency_only() {
        let t = build(&[(V1, None), (V2, Some(Verdict::Passed))], StudentProfile::default());
        let mut g = graph();
        let first = g.insert(&t).unwrap();
        assert_eq!((first.new_vertices, first.new_edges, first.new_terminals), (2, 1, 1));
        let second = g.insert(&t).unwrap();
        assert_eq!((second.new_vertices, second.new_edges), (0, 0));
        assert_eq!(g.vertex_count(), 2);
        assert_eq!(g.edge_count(), 1);
        assert_eq!(g.edges()[0].frequency, 2);
        assert_eq!(g.edges()[0].support(), 1);
        assert!(g.is_terminal(VertexId::new(1)));
    }

    #[test]
    fn single_step_trajectory_annotates_one_vertex() {
        let t = build(&[(V1, Some(Verdict::NotCompiled))], StudentProfile::default());
        let mut g = graph();
        g.insert(&t).unwrap();
        assert_eq!(g.vertex_count(), 1);
        assert_eq!(g.edge_count(), 0);
        assert_eq!(g.vertices()[0].support(), 1);
        assert_eq!(g.vertices()[0].best_rate, Some(0.0));
        assert!(g.terminals().is_empty());
    }

    #[test]
    fn terminal_flag_is_one_way() {
        let mut g = graph();
        g.insert(&build(&[(V1, None)], StudentProfile::default())).unwrap();
        let id = VertexId::new(0);
        assert!(!g.mark_terminal(id, Verdict::NotCompiled).unwrap());
        assert!(g.mark_terminal(id, Verdict::Passed).unwrap());
        assert!(!g.mark_terminal(id, Verdict::Failed { passed_tests: 0, total_tests: 1 }).unwrap());
        assert!(g.vertices()[0].terminal);
        assert_eq!(
            g.mark_terminal(VertexId::new(9), Verdict::Passed),
            Err(GraphError::UnknownVertex(VertexId::new(9)))
        );
    }

    #[test]
    fn foreign_trajectories_are_refused() {
        let mut g = SolutionGraph::new("other".into(), RuleSetId::new("python", 1));
        let err = g.insert(&build(&[(V1, None)], StudentProfile::default())).unwrap_err();
        assert!(matches!(err, GraphError::TaskMismatch { .. }));
        assert!(g.is_empty());

        let mut g = SolutionGraph::new("sum".into(), RuleSetId::new("generic", 1));
        let err = g.insert(&build(&[(V1, None)], StudentProfile::default())).unwrap_err();
        assert!(matches!(err, GraphError::RuleSetMismatch { .. }));
    }

    #[test]
    fn profile_medians_use_unique_profiles() {
        let mut g = graph();
        let young = StudentProfile::new(Some(14), Some(Experience::LessThanHalfYear), None);
        let older = StudentProfile::new(Some(20), Some(Experience::FromOneToTwoYears), None);
        g.insert(&build(&[(V1, None)], young.clone())).unwrap();
        g.insert(&build(&[(V1, None)], young)).unwrap();
        g.insert(&build(&[(V1, None)], older)).unwrap();
        let v = &g.vertices()[0];
        assert_eq!(v.support(), 3);
        assert_eq!(v.unique_profiles().len(), 2);
        let m = v.profile_medians();
        assert_eq!(m.age, Some(17.0));
        assert_eq!(m.experience, Some(Experience::FromHalfToOneYear));
    }

    #[test]
    fn rebuild_rejects_broken_parts() {
        let mut g = graph();
        g.insert(&build(&[(V1, None), (V2, Some(Verdict::Passed))], StudentProfile::default()))
            .unwrap();
        let rebuilt = SolutionGraph::from_parts(
            g.task().clone(),
            g.rule_set().clone(),
            g.vertices().to_vec(),
            g.edges().to_vec(),
        )
        .unwrap();
        assert_eq!(rebuilt, g);
        assert_eq!(rebuilt.find_vertex(&g.vertices()[1].state), Some(VertexId::new(1)));

        let mut edges = g.edges().to_vec();
        edges[0].frequency = 5;
        assert!(SolutionGraph::from_parts(
            g.task().clone(),
            g.rule_set().clone(),
            g.vertices().to_vec(),
            edges
        )
        .is_err());

        let mut vertices = g.vertices().to_vec();
        vertices.push(Vertex {
            id: VertexId::new(2),
            ..vertices[0].clone()
        });
        assert!(SolutionGraph::from_parts(
            g.task().clone(),
            g.rule_set().clone(),
            vertices,
            g.edges().to_vec()
        )
        .unwrap_err()
        .contains("duplicates"));
    }

    #[test]
    fn rebuild_rejects_edges_whose_digest_disagrees_with_the_script() {
        let mut g = graph();
        g.insert(&build(&[(V1, None), (V2, Some(Verdict::Passed))], StudentProfile::default()))
            .unwrap();
        let rebuild = |edges: Vec<Edge>| {
            SolutionGraph::from_parts(
                g.task().clone(),
                g.rule_set().clone(),
                g.vertices().to_vec(),
                edges,
            )
        };

        let mut edges = g.edges().to_vec();
        edges[0].edit_digest ^= 1;
        assert!(rebuild(edges).unwrap_err().contains("digest"));

        // Same key, different script.
        let mut edges = g.edges().to_vec();
        edges[0].edit = EditScript::empty();
        assert!(rebuild(edges).unwrap_err().contains("digest"));
    }
}
