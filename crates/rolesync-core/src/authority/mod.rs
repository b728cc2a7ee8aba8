//! Authority sync client: the two remote side-effecting operations.
//!
//! The authority system is the source of truth for actually granting and
//! revoking access. It offers no multi-record transactions, so the engine
//! drives it one operation at a time and the ledger records what is believed
//! to have happened. Every failure is classified into exactly two buckets —
//! transient (worth retrying) or permanent (abort immediately) — so that the
//! retry wrapper and the engine can handle errors exhaustively.

mod http;
mod mock;
mod rate_limit;
mod retry;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use http::{AuthorityConfig, HttpAuthoritySyncClient};
pub use mock::{AuthorityCall, MockAuthority};
pub use rate_limit::{QuotaExceeded, RateLimitConfig, RateLimiter};
pub use retry::{RetryPolicy, with_retry};

/// Errors from authority operations, classified for retry handling.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthorityError {
    /// Network failure, 5xx, or rate limiting; worth retrying.
    #[error("transient authority error: {reason}")]
    Transient {
        /// Human-readable failure description.
        reason: String,
        /// Server-provided minimum wait before retrying, if any.
        retry_after: Option<Duration>,
    },

    /// Remote-side semantic rejection; retrying cannot succeed.
    #[error("permanent authority error: {reason}")]
    Permanent {
        /// Human-readable rejection description.
        reason: String,
        /// HTTP status code, if the rejection came over HTTP.
        status: Option<u16>,
    },
}

impl AuthorityError {
    /// Whether this error should be retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Server-provided retry hint, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transient { retry_after, .. } => *retry_after,
            Self::Permanent { .. } => None,
        }
    }

    pub(crate) fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub(crate) fn permanent(reason: impl Into<String>, status: Option<u16>) -> Self {
        Self::Permanent {
            reason: reason.into(),
            status,
        }
    }
}

/// The two remote side-effecting operations against the authority system.
///
/// Implementations perform exactly one attempt per call; retry and backoff
/// are applied uniformly by the engine through [`with_retry`].
#[async_trait]
pub trait AuthoritySyncClient: Send + Sync {
    /// Grants `role_name` to a contact, optionally scoped to a location.
    ///
    /// Returns the external reference id, the sole handle usable to revoke
    /// this grant later.
    ///
    /// # Errors
    ///
    /// Returns a classified [`AuthorityError`].
    async fn grant(
        &self,
        contact_id: &str,
        location_id: Option<&str>,
        role_name: &str,
    ) -> Result<String, AuthorityError>;

    /// Revokes a previously granted assignment by its external reference.
    ///
    /// # Errors
    ///
    /// Returns a classified [`AuthorityError`].
    async fn revoke(&self, contact_id: &str, external_ref: &str) -> Result<(), AuthorityError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_helpers() {
        let transient = AuthorityError::Transient {
            reason: "connection reset".to_string(),
            retry_after: Some(Duration::from_secs(2)),
        };
        assert!(transient.is_transient());
        assert_eq!(transient.retry_after(), Some(Duration::from_secs(2)));

        let permanent = AuthorityError::permanent("role not assignable", Some(422));
        assert!(!permanent.is_transient());
        assert_eq!(permanent.retry_after(), None);
    }
}
