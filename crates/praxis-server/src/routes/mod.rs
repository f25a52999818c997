pub mod approvals;
pub mod evaluations;
pub mod health;

use crate::error::AppError;

/// Identifiers are opaque positive integers; anything else is a validation
/// error, not a routing miss.
pub(crate) fn parse_id(raw: &str, what: &str) -> Result<i64, AppError> {
    raw.parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| AppError::validation(format!("{what} '{raw}' is not a positive integer")))
}

pub(crate) const DEFAULT_LIMIT: u32 = 20;
pub(crate) const MAX_LIMIT: u32 = 100;

pub(crate) fn parse_page(raw: Option<&str>) -> Result<u32, AppError> {
    match raw {
        None => Ok(1),
        Some(raw) => raw
            .parse::<u32>()
            .ok()
            .filter(|page| *page >= 1)
            .ok_or_else(|| AppError::validation(format!("page '{raw}' is not a positive integer"))),
    }
}

pub(crate) fn parse_limit(raw: Option<&str>) -> Result<u32, AppError> {
    match raw {
        None => Ok(DEFAULT_LIMIT),
        Some(raw) => raw
            .parse::<u32>()
            .ok()
            .filter(|limit| (1..=MAX_LIMIT).contains(limit))
            .ok_or_else(|| {
                AppError::validation(format!("limit '{raw}' must be between 1 and {MAX_LIMIT}"))
            }),
    }
}
