//! Typed error hierarchy for the canvassing tracker.
//!
//! One enum covers the whole store-facing surface. The variants preserve
//! the distinctions callers render differently: validation, not-found,
//! the two conflict classes (duplicate address, duplicate lead), and
//! transient contention versus a fatal database failure. The transition
//! policy itself never fails; every error here originates at the store
//! boundary or earlier, in input validation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Location {id} not found")]
    LocationNotFound { id: i64 },

    #[error("Address '{address}' already exists")]
    AddressExists { address: String },

    #[error("Door {stiege}/{stockwerk}/{tuere} at location {location_id} already has a lead")]
    DuplicateLead {
        location_id: i64,
        stiege: String,
        stockwerk: String,
        tuere: String,
    },

    #[error("Database busy, retry the request")]
    Contention,

    #[error("Database error: {0}")]
    Database(#[source] rusqlite::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Database task panicked")]
    TaskPanicked,
}

impl TrackerError {
    /// Transient errors are safe for the caller to retry verbatim.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Contention)
    }
}

/// SQLITE_CONSTRAINT_UNIQUE specifically, not the whole constraint
/// family, so a foreign-key failure is never mistaken for a duplicate.
/// Callers that can name the conflicting row map this to `AddressExists`
/// or `DuplicateLead` at the insert site.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

impl From<rusqlite::Error> for TrackerError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy)
            | Some(rusqlite::ErrorCode::DatabaseLocked) => TrackerError::Contention,
            _ => TrackerError::Database(err),
        }
    }
}
