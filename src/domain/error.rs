//! Error taxonomy for the harvesting pipeline.
//!
//! Every fallible seam returns one of three closed enums; retry decisions are
//! made from the `RetryClass` each error maps to, in one place, instead of
//! ad-hoc loops at call sites.

use thiserror::Error;

/// How the retry controller treats a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Transient; back off and try again.
    Retryable,
    /// Transient, but the database connection is suspect: recycle the pool
    /// connection before the next attempt.
    RetryableRecycle,
    /// Permanent; surface immediately without retrying.
    Fatal,
}

/// Errors raised while rendering a page in the browser session.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Navigation or readiness wait exceeded the configured deadline.
    #[error("page fetch timed out: {0}")]
    Timeout(String),

    /// The readiness selector never appeared in the rendered document.
    #[error("selector not found: {0}")]
    SelectorNotFound(String),

    /// The backing browser process is gone. Aborts the whole run.
    #[error("browser session closed")]
    SessionClosed,
}

impl FetchError {
    pub fn retry_class(&self) -> RetryClass {
        match self {
            FetchError::Timeout(_) | FetchError::SelectorNotFound(_) => RetryClass::Retryable,
            FetchError::SessionClosed => RetryClass::Fatal,
        }
    }
}

/// Errors raised by the part store.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Lock-wait timeout under contention; retryable.
    #[error("database lock-wait timeout")]
    LockTimeout,

    /// Connection dropped mid-operation; retryable after a pool recycle.
    #[error("database connection lost: {0}")]
    ConnectionLost(String),

    /// Unique or FK violation; the item is skipped, the run continues.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Any other backend failure. Outside the retry taxonomy, treated fatal.
    #[error("database error: {0}")]
    Backend(#[source] sqlx::Error),
}

impl PersistError {
    pub fn retry_class(&self) -> RetryClass {
        match self {
            PersistError::LockTimeout => RetryClass::Retryable,
            PersistError::ConnectionLost(_) => RetryClass::RetryableRecycle,
            PersistError::ConstraintViolation(_) | PersistError::Backend(_) => RetryClass::Fatal,
        }
    }

    /// Map a raw sqlx failure into the taxonomy.
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => {
                if db.is_unique_violation() || db.is_foreign_key_violation() {
                    return PersistError::ConstraintViolation(db.message().to_string());
                }
                // SQLITE_BUSY (5) / SQLITE_LOCKED (6) surface as lock waits.
                let code = db.code().map(|c| c.to_string()).unwrap_or_default();
                if code == "5" || code == "6" || db.message().contains("database is locked") {
                    return PersistError::LockTimeout;
                }
                PersistError::Backend(err)
            }
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                PersistError::ConnectionLost(err.to_string())
            }
            _ => PersistError::Backend(err),
        }
    }
}

/// Errors raised by an enrichment source lookup.
#[derive(Debug, Clone, Error)]
pub enum LookupError {
    /// The source has no data for this part. Not an error worth retrying.
    #[error("no enrichment data for part")]
    NotFound,

    /// The source could not be reached or answered abnormally.
    #[error("enrichment source unavailable: {0}")]
    SourceUnavailable(String),
}

impl LookupError {
    pub fn retry_class(&self) -> RetryClass {
        match self {
            LookupError::NotFound => RetryClass::Fatal,
            LookupError::SourceUnavailable(_) => RetryClass::Retryable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_closed_is_fatal() {
        assert_eq!(FetchError::SessionClosed.retry_class(), RetryClass::Fatal);
        assert_eq!(
            FetchError::Timeout("goto".into()).retry_class(),
            RetryClass::Retryable
        );
    }

    #[test]
    fn connection_lost_requests_pool_recycle() {
        let err = PersistError::ConnectionLost("reset by peer".into());
        assert_eq!(err.retry_class(), RetryClass::RetryableRecycle);
    }

    #[test]
    fn constraint_violation_is_fatal_for_the_item() {
        let err = PersistError::ConstraintViolation("parts.canonical_key".into());
        assert_eq!(err.retry_class(), RetryClass::Fatal);
    }

    #[test]
    fn pool_errors_map_to_connection_lost() {
        let mapped = PersistError::from_sqlx(sqlx::Error::PoolTimedOut);
        assert!(matches!(mapped, PersistError::ConnectionLost(_)));
    }
}
