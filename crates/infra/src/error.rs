//! Repository and analytics error model.

use thiserror::Error;

use crate::store::StoreError;

/// Result type used by the repository and analytics.
pub type InventoryResult<T> = Result<T, InventoryError>;

/// Failure of a repository or analytics operation.
///
/// Each variant corresponds to one outcome kind callers can branch on; see
/// [`Outcome`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    /// Caller-supplied data violated a schema constraint.
    #[error("bad parameters: {0}")]
    BadParams(String),

    /// An identity (or association pair) is already present.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A referenced or targeted row is absent.
    #[error("does not exist: {0}")]
    NotExists(String),

    /// Connectivity or unclassified store failure.
    #[error(transparent)]
    Store(StoreError),
}

impl InventoryError {
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::BadParams(_) => Outcome::BadParams,
            Self::AlreadyExists(_) => Outcome::AlreadyExists,
            Self::NotExists(_) => Outcome::NotExists,
            Self::Store(_) => Outcome::Error,
        }
    }
}

/// Default classification of store failures.
impl From<StoreError> for InventoryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation(msg) => Self::AlreadyExists(msg),
            StoreError::ForeignKeyViolation(msg) => Self::NotExists(msg),
            StoreError::CheckViolation(msg) | StoreError::NotNullViolation(msg) => {
                Self::BadParams(msg)
            }
            other @ (StoreError::Unavailable(_) | StoreError::Other(_)) => Self::Store(other),
        }
    }
}

/// Discrete result kind of a mutating operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Outcome {
    Ok,
    BadParams,
    AlreadyExists,
    NotExists,
    Error,
}

impl Outcome {
    pub fn of<T>(result: &InventoryResult<T>) -> Self {
        match result {
            Ok(_) => Self::Ok,
            Err(err) => err.outcome(),
        }
    }
}

impl core::fmt::Display for Outcome {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Ok => "OK",
            Self::BadParams => "BAD_PARAMS",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::NotExists => "NOT_EXISTS",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}
