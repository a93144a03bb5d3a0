//! Error types for the proxykit library.
//!
//! Two failure domains, one type each: [`InvariantError`] for a checker
//! finding a damaged heap or cache, [`HttpError`] for a client request the
//! proxy refuses to forward. Both are plain `std::error::Error` values;
//! nothing here panics or carries global state.

use std::fmt;

// ---------------------------------------------------------------------------
// InvariantError
// ---------------------------------------------------------------------------

/// Violation found while proving a structure's invariants.
///
/// The heap checker ([`Heap::check_heap`](crate::heap::Heap::check_heap))
/// and the cache checker
/// ([`CacheCore::check_invariants`](crate::cache::CacheCore::check_invariants))
/// walk their structures read-only and stop at the first broken invariant,
/// describing it here. An invariant violation is not recoverable; callers
/// log the detail, fail the test, or abandon the structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantError {
    detail: String,
}

impl InvariantError {
    /// Wraps a description of the broken invariant.
    #[inline]
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }

    /// Which invariant broke, and where.
    #[inline]
    pub fn detail(&self) -> &str {
        &self.detail
    }
}

impl fmt::Display for InvariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invariant violated: {}", self.detail)
    }
}

impl std::error::Error for InvariantError {}

// ---------------------------------------------------------------------------
// HttpError
// ---------------------------------------------------------------------------

/// Error returned when a client request cannot be forwarded upstream.
///
/// The proxy renders these as minimal HTML error pages; see
/// [`error_page`](crate::proxy::error_page).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    /// The request head or request-URI could not be parsed.
    BadRequest(String),
    /// The request used a method other than `GET`.
    NotImplemented(String),
}

impl HttpError {
    /// Returns the HTTP status code and reason phrase for this error.
    pub fn status(&self) -> (u16, &'static str) {
        match self {
            HttpError::BadRequest(_) => (400, "Bad Request"),
            HttpError::NotImplemented(_) => (501, "Not Implemented"),
        }
    }

    /// Returns the offending input: the malformed fragment or the method.
    pub fn cause(&self) -> &str {
        match self {
            HttpError::BadRequest(cause) => cause,
            HttpError::NotImplemented(method) => method,
        }
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (code, short) = self.status();
        write!(f, "{} {}: {}", code, short, self.cause())
    }
}

impl std::error::Error for HttpError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
