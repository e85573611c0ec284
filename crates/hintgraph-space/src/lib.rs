//! hintgraph solution space
//!
//! Builds and queries the Solution Graph of one programming task:
//!
//! - `profile`: student profiles, verdicts, task ids
//! - `trajectory`: snapshots → canonical trajectories
//! - `graph`: the deduplicated state/transition graph
//! - `shared`: lock-guarded graph and parallel batch construction
//! - `persist`: `.hgr` binary images
//! - `path_finder`: nearest state search and hint projection
//! - `harness`: offline hint accuracy over held-out trajectories
//! - `export`: DOT / JSON summaries
//! - `session`: JSON session records

pub mod error;
pub mod export;
pub mod graph;
pub mod harness;
pub mod path_finder;
pub mod persist;
pub mod profile;
pub mod session;
pub mod shared;
pub mod trajectory;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Result, SpaceError};
pub use graph::{
    Edge, EdgeId, EdgeKey, GraphError, GraphStats, InsertStats, PreparedTrajectory,
    ProfileMedians, SolutionGraph, Transition, Vertex, VertexId,
};
pub use harness::{
    split_holdout, Harness, HarnessConfig, HarnessError, HarnessReport, Outcome, OutcomeCounts,
    ProfileFilter, StepResult,
};
pub use path_finder::{
    Anchor, DirectRoutePolicy, Hint, HintError, HintOutcome, HintRoute, NoHintAvailable,
    PathFinder, PathFinderConfig, ScoreWeights, SearchBudget,
};
pub use persist::{CorruptGraphError, PersistError};
pub use profile::{Experience, StudentProfile, TaskId, Verdict};
pub use session::{parse_session_records, SessionRecord, SnapshotRecord};
pub use shared::{build_graph, BuildReport, RejectedSession, Session, SharedSolutionGraph};
pub use trajectory::{
    AggregatorConfig, Snapshot, Step, Trajectory, TrajectoryAggregator, TrajectoryError,
    TrajectoryId,
};
