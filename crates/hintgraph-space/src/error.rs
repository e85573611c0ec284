use crate::graph::GraphError;
use crate::harness::HarnessError;
use crate::path_finder::HintError;
use crate::persist::{CorruptGraphError, PersistError};
use crate::trajectory::TrajectoryError;
use hintgraph_syntax::{MalformedTreeError, NotationError, RuleError};
use thiserror::Error;

/// Any failure surfaced by this crate.
#[derive(Debug, Error)]
pub enum SpaceError {
    #[error(transparent)]
    Trajectory(#[from] TrajectoryError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error(transparent)]
    Corrupt(#[from] CorruptGraphError),

    #[error(transparent)]
    Hint(#[from] HintError),

    #[error(transparent)]
    Harness(#[from] HarnessError),

    #[error(transparent)]
    Rules(#[from] RuleError),

    #[error(transparent)]
    Malformed(#[from] MalformedTreeError),

    #[error(transparent)]
    Notation(#[from] NotationError),

    #[error("snapshot {0} carries neither `tree` nor `tree_sexpr`")]
    MissingTree(usize),
}

pub type Result<T, E = SpaceError> = std::result::Result<T, E>;
