//! Structured record of a reconciliation pass.
//!
//! Every pass produces one [`ReconcileSummary`]: the per-assignment actions
//! taken plus counters, serializable for operators and log pipelines.
//! Per-item skips and failures live here — they are observable, never
//! fatal to the pass.

use serde::{Deserialize, Serialize};

use crate::ledger::AssignmentKey;

/// Why a desired assignment was set aside without touching the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum SkipReason {
    /// The referenced role id did not resolve in the catalog.
    RoleNotFound {
        /// The unresolved role id.
        role_id: String,
    },
    /// The assignment is malformed (e.g. a non-admin role with no
    /// location, or a contact/company mismatch with the pass scope).
    InvalidAssignment {
        /// What was wrong with it.
        detail: String,
    },
    /// Another desired assignment already claimed this key; input is
    /// expected to be pre-deduplicated, so later occurrences are dropped.
    DuplicateKey,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RoleNotFound { role_id } => write!(f, "role not found: {role_id}"),
            Self::InvalidAssignment { detail } => write!(f, "invalid assignment: {detail}"),
            Self::DuplicateKey => write!(f, "duplicate key in desired set"),
        }
    }
}

/// One reconciliation action, recorded per assignment slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum AssignmentAction {
    /// A new assignment was granted (where applicable) and recorded.
    Created {
        /// The slot.
        key: AssignmentKey,
        /// The assigned role.
        role_id: String,
        /// Reference returned by the authority; `None` for ledger-only
        /// admin-scope assignments.
        external_ref: Option<String>,
    },
    /// An existing assignment changed role.
    Updated {
        /// The slot.
        key: AssignmentKey,
        /// Role before the pass.
        old_role_id: String,
        /// Role after the pass.
        new_role_id: String,
        /// Reference for the new grant, if one was made.
        external_ref: Option<String>,
    },
    /// An assignment was revoked (where applicable) and removed.
    Deleted {
        /// The slot.
        key: AssignmentKey,
        /// The role that was removed.
        role_id: String,
    },
    /// Desired and existing agree; no remote call, no ledger write.
    Unchanged {
        /// The slot.
        key: AssignmentKey,
        /// The role both sides hold.
        role_id: String,
    },
    /// The assignment was set aside before execution.
    Skipped {
        /// The slot, when one could be derived from the input.
        key: Option<AssignmentKey>,
        /// The role id named by the input, if any.
        role_id: Option<String>,
        /// Why it was skipped.
        reason: SkipReason,
    },
    /// A remote operation failed permanently or exhausted its retries;
    /// the slot is left for the next pass.
    Failed {
        /// The slot.
        key: AssignmentKey,
        /// Which operation failed ("grant", "revoke", "create").
        operation: String,
        /// The classified error, rendered.
        error: String,
    },
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    /// Contact the pass ran for.
    pub contact_id: String,
    /// Company scope of the pass.
    pub company_id: String,
    /// The contact's membership handle within the company, as the authority
    /// system knows it.
    pub company_contact_id: String,
    /// RFC 3339 pass start time.
    pub started_at: String,
    /// RFC 3339 pass end time.
    pub finished_at: String,
    /// Whether the pass stopped dispatching because cancellation was
    /// requested. Work already in flight was completed and recorded.
    pub cancelled: bool,
    /// Per-assignment actions, in completion order.
    pub actions: Vec<AssignmentAction>,
    /// Assignments created.
    pub created: usize,
    /// Assignments updated.
    pub updated: usize,
    /// Assignments deleted.
    pub deleted: usize,
    /// Assignments left untouched.
    pub unchanged: usize,
    /// Assignments skipped before execution.
    pub skipped: usize,
    /// Assignments whose remote operation failed.
    pub failed: usize,
}

impl ReconcileSummary {
    pub(crate) fn new(
        contact_id: &str,
        company_id: &str,
        company_contact_id: &str,
        started_at: String,
    ) -> Self {
        Self {
            contact_id: contact_id.to_string(),
            company_id: company_id.to_string(),
            company_contact_id: company_contact_id.to_string(),
            started_at,
            finished_at: String::new(),
            cancelled: false,
            actions: Vec::new(),
            created: 0,
            updated: 0,
            deleted: 0,
            unchanged: 0,
            skipped: 0,
            failed: 0,
        }
    }

    pub(crate) fn push(&mut self, action: AssignmentAction) {
        match &action {
            AssignmentAction::Created { .. } => self.created += 1,
            AssignmentAction::Updated { .. } => self.updated += 1,
            AssignmentAction::Deleted { .. } => self.deleted += 1,
            AssignmentAction::Unchanged { .. } => self.unchanged += 1,
            AssignmentAction::Skipped { .. } => self.skipped += 1,
            AssignmentAction::Failed { .. } => self.failed += 1,
        }
        self.actions.push(action);
    }

    /// Whether the pass completed every item it attempted.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.skipped == 0 && !self.cancelled
    }
}
