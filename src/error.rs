//! Error taxonomy for planning, storage and the engine facade.

use thiserror::Error;

/// Malformed dimensions or coordinates.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("invalid geometry: {name} must be positive and finite, got {value}")]
    InvalidDimension { name: &'static str, value: f64 },

    #[error("invalid geometry: {name} coordinate must be non-negative and finite, got {value}")]
    InvalidCoordinate { name: &'static str, value: f64 },

    #[error("invalid geometry: end coordinates must not be smaller than start coordinates")]
    InvertedPosition,
}

/// Failures of the retrieval planner.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanningError {
    #[error("item {item_id} is unreachable: {reason}")]
    UnreachableItem { item_id: String, reason: String },

    #[error(transparent)]
    InvalidGeometry(#[from] GeometryError),
}

/// Failures at the repository boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("storage conflict: expected version {expected}, found {actual}")]
    StorageConflict { expected: u64, actual: u64 },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("commit rejected: {0}")]
    Rejected(String),
}

/// Rejected simulation requests.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationError {
    #[error("numOfDays must be positive or toTimestamp must lie in the future")]
    NoDays,

    #[error("cannot simulate {requested} days, at most {max} are allowed")]
    TooManyDays { requested: i64, max: u32 },

    #[error("simulated date out of range: {days} days after {start}")]
    DateOutOfRange { start: String, days: u32 },
}

/// Errors surfaced by the engine facade.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error(transparent)]
    InvalidGeometry(#[from] GeometryError),

    #[error("item {item_id} is unreachable: {reason}")]
    UnreachableItem { item_id: String, reason: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("placement rejected: {0}")]
    PlacementRejected(String),

    #[error("inconsistent container state: {0}")]
    InconsistentSnapshot(String),

    #[error("concurrent modification: gave up after {attempts} attempts")]
    ConcurrentModification { attempts: u32 },

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("import failed: {0}")]
    Import(String),
}

impl EngineError {
    /// Only repository integrity errors need operator intervention.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Integrity(_))
    }
}

impl From<PlanningError> for EngineError {
    fn from(err: PlanningError) -> Self {
        match err {
            PlanningError::UnreachableItem { item_id, reason } => {
                EngineError::UnreachableItem { item_id, reason }
            }
            PlanningError::InvalidGeometry(geometry) => EngineError::InvalidGeometry(geometry),
        }
    }
}

/// Repository errors that are not conflicts map one-to-one; conflicts are
/// handled by the retry loop and only reach callers as
/// [`EngineError::ConcurrentModification`].
impl From<RepositoryError> for EngineError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::StorageConflict { .. } => {
                EngineError::ConcurrentModification { attempts: 1 }
            }
            RepositoryError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            RepositoryError::Integrity(msg) => EngineError::Integrity(msg),
            RepositoryError::Rejected(msg) => EngineError::PlacementRejected(msg),
        }
    }
}

impl From<SimulationError> for EngineError {
    fn from(err: SimulationError) -> Self {
        EngineError::InvalidRequest(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
