use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("duplicate vote: instructor {voter_id} already voted on approval {approval_id}")]
    DuplicateVote { approval_id: i64, voter_id: i64 },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("illegal transition from {from} to {to}: {reason}")]
    IllegalTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("stale write on {entity} {id}")]
    StaleWrite { entity: &'static str, id: i64 },

    #[error("storage unavailable")]
    Unavailable(#[source] sqlx::Error),

    #[error("internal: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => CoreError::NotFound("row not found".to_string()),
            other => CoreError::Unavailable(other),
        }
    }
}

impl CoreError {
    /// True for faults worth one engine-level retry with fresh reads.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::StaleWrite { .. })
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
