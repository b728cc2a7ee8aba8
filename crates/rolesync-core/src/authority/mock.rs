//! Recording mock authority for tests and offline CLI runs.
//!
//! Records every grant/revoke in call order and hands out sequential
//! reference ids. Failures can be scripted per slot, so tests can exercise
//! retry exhaustion, permanent rejections, and failure isolation without a
//! network.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use super::{AuthorityError, AuthoritySyncClient};

/// One recorded authority call, in issue order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityCall {
    /// A grant attempt.
    Grant {
        /// Contact being granted.
        contact_id: String,
        /// Location scope, `None` for company-wide.
        location_id: Option<String>,
        /// Role name sent to the authority.
        role_name: String,
    },
    /// A revoke attempt.
    Revoke {
        /// Contact being revoked.
        contact_id: String,
        /// The reference being revoked.
        external_ref: String,
    },
}

#[derive(Default)]
struct ScriptedFailures {
    // Keyed by location id (or "" for company scope) for grants, and by
    // external ref for revokes. Each entry is consumed once per call.
    grants: HashMap<String, VecDeque<AuthorityError>>,
    revokes: HashMap<String, VecDeque<AuthorityError>>,
}

/// In-memory [`AuthoritySyncClient`] with a call log and scripted failures.
#[derive(Default)]
pub struct MockAuthority {
    calls: Mutex<Vec<AuthorityCall>>,
    failures: Mutex<ScriptedFailures>,
    next_ref: AtomicU64,
}

impl MockAuthority {
    /// Creates a mock with no scripted failures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the next `errors` for grants against `location_id`
    /// (`None` targets company-scope grants). Errors are consumed in order;
    /// once drained, grants succeed again.
    pub fn fail_grant(&self, location_id: Option<&str>, errors: Vec<AuthorityError>) {
        let mut failures = self.failures.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        failures
            .grants
            .entry(location_id.unwrap_or("").to_string())
            .or_default()
            .extend(errors);
    }

    /// Scripts the next `errors` for revokes of `external_ref`.
    pub fn fail_revoke(&self, external_ref: &str, errors: Vec<AuthorityError>) {
        let mut failures = self.failures.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        failures
            .revokes
            .entry(external_ref.to_string())
            .or_default()
            .extend(errors);
    }

    /// Snapshot of the call log, in issue order.
    #[must_use]
    pub fn calls(&self) -> Vec<AuthorityCall> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Number of grant calls recorded.
    #[must_use]
    pub fn grant_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, AuthorityCall::Grant { .. }))
            .count()
    }

    /// Number of revoke calls recorded.
    #[must_use]
    pub fn revoke_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, AuthorityCall::Revoke { .. }))
            .count()
    }

    /// Clears the call log (scripted failures are kept).
    pub fn clear_calls(&self) {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }

    fn record(&self, call: AuthorityCall) {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(call);
    }

    fn take_grant_failure(&self, location_id: Option<&str>) -> Option<AuthorityError> {
        let mut failures = self.failures.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        failures
            .grants
            .get_mut(location_id.unwrap_or(""))
            .and_then(VecDeque::pop_front)
    }

    fn take_revoke_failure(&self, external_ref: &str) -> Option<AuthorityError> {
        let mut failures = self.failures.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        failures
            .revokes
            .get_mut(external_ref)
            .and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl AuthoritySyncClient for MockAuthority {
    async fn grant(
        &self,
        contact_id: &str,
        location_id: Option<&str>,
        role_name: &str,
    ) -> Result<String, AuthorityError> {
        self.record(AuthorityCall::Grant {
            contact_id: contact_id.to_string(),
            location_id: location_id.map(ToString::to_string),
            role_name: role_name.to_string(),
        });

        if let Some(err) = self.take_grant_failure(location_id) {
            return Err(err);
        }

        let n = self.next_ref.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("ref-{n}"))
    }

    async fn revoke(&self, contact_id: &str, external_ref: &str) -> Result<(), AuthorityError> {
        self.record(AuthorityCall::Revoke {
            contact_id: contact_id.to_string(),
            external_ref: external_ref.to_string(),
        });

        if let Some(err) = self.take_revoke_failure(external_ref) {
            return Err(err);
        }
        Ok(())
    }
}
