//! Pure diff between the desired and existing assignment sets.
//!
//! The diff is computed entirely from inputs already in memory — no I/O —
//! so it can be unit-tested exhaustively and reused by the engine's
//! side-effect-free `plan` entry point. Output sets are disjoint by
//! construction, keyed by [`AssignmentKey`].

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::catalog::Role;
use crate::ledger::{AssignmentKey, LedgerRecord};

use super::summary::SkipReason;

/// A desired assignment submitted by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredAssignment {
    /// Contact to hold the assignment.
    pub contact_id: String,
    /// Company the assignment belongs to.
    pub company_id: String,
    /// Location, or `None` for company-wide admin-scope roles.
    pub location_id: Option<String>,
    /// The role to assign.
    pub role_id: String,
}

impl DesiredAssignment {
    /// The slot this assignment targets.
    #[must_use]
    pub fn key(&self) -> AssignmentKey {
        AssignmentKey::new(&self.company_id, self.location_id.as_deref())
    }
}

/// A create the engine has decided on: the assignment plus its resolved role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedCreate {
    /// The desired assignment.
    pub assignment: DesiredAssignment,
    /// The resolved role record.
    pub role: Role,
}

impl PlannedCreate {
    /// The slot being created.
    #[must_use]
    pub fn key(&self) -> AssignmentKey {
        self.assignment.key()
    }
}

/// A role change at an occupied slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedUpdate {
    /// The existing record at the slot.
    pub record: LedgerRecord,
    /// The resolved replacement role.
    pub new_role: Role,
}

impl PlannedUpdate {
    /// The slot being updated.
    #[must_use]
    pub fn key(&self) -> AssignmentKey {
        self.record.key()
    }

    /// Whether the old grant must be revoked remotely. Only records holding
    /// an external reference have anything to revoke.
    #[must_use]
    pub fn revoke_needed(&self) -> bool {
        self.record.external_ref.is_some()
    }

    /// Whether the new role must be granted remotely. Admin-scope roles are
    /// ledger-only.
    #[must_use]
    pub fn grant_needed(&self) -> bool {
        !self.new_role.is_admin_scope
    }

    /// Whether this update touches the authority at all; a pure
    /// admin-to-admin change is ledger-only bookkeeping.
    #[must_use]
    pub fn needs_authority_update(&self) -> bool {
        self.revoke_needed() || self.grant_needed()
    }
}

/// A desired assignment set aside during planning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedAssignment {
    /// The input as submitted.
    pub assignment: DesiredAssignment,
    /// Why it was set aside.
    pub reason: SkipReason,
}

/// The disjoint work sets for one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilePlan {
    /// Existing records whose keys are absent from the desired set.
    pub to_delete: Vec<LedgerRecord>,
    /// Desired keys with no existing record.
    pub to_create: Vec<PlannedCreate>,
    /// Keys present on both sides with differing roles.
    pub to_update: Vec<PlannedUpdate>,
    /// Keys present on both sides with the same role; untouched.
    pub unchanged: Vec<LedgerRecord>,
    /// Desired assignments set aside (unresolved role, malformed input,
    /// duplicate key).
    pub skipped: Vec<SkippedAssignment>,
}

impl ReconcilePlan {
    /// Whether the pass has no remote or ledger work to do.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.to_delete.is_empty() && self.to_create.is_empty() && self.to_update.is_empty()
    }
}

/// Computes the work sets for a pass.
///
/// `roles` is the batched catalog resolution for every role id referenced by
/// either side; desired assignments whose role is absent are skipped.
/// Existing records never need their role resolved to be deleted — a revoke
/// uses only the stored external reference.
///
/// A key named by a skipped desired assignment is still treated as claimed:
/// an operator typo in a role id must not cascade into deleting the live
/// assignment at that key.
pub fn compute_plan(
    contact_id: &str,
    company_id: &str,
    existing: &[LedgerRecord],
    desired: &[DesiredAssignment],
    roles: &HashMap<String, Role>,
) -> ReconcilePlan {
    let existing_by_key: HashMap<AssignmentKey, &LedgerRecord> =
        existing.iter().map(|r| (r.key(), r)).collect();

    let mut to_create = Vec::new();
    let mut to_update = Vec::new();
    let mut unchanged = Vec::new();
    let mut skipped = Vec::new();
    let mut claimed: HashSet<AssignmentKey> = HashSet::new();

    for assignment in desired {
        if assignment.contact_id != contact_id || assignment.company_id != company_id {
            skipped.push(SkippedAssignment {
                assignment: assignment.clone(),
                reason: SkipReason::InvalidAssignment {
                    detail: "assignment is outside the pass's contact/company scope".to_string(),
                },
            });
            continue;
        }

        let key = assignment.key();
        if !claimed.insert(key.clone()) {
            skipped.push(SkippedAssignment {
                assignment: assignment.clone(),
                reason: SkipReason::DuplicateKey,
            });
            continue;
        }

        let Some(role) = roles.get(&assignment.role_id) else {
            skipped.push(SkippedAssignment {
                assignment: assignment.clone(),
                reason: SkipReason::RoleNotFound {
                    role_id: assignment.role_id.clone(),
                },
            });
            continue;
        };

        if !role.is_admin_scope && assignment.location_id.is_none() {
            skipped.push(SkippedAssignment {
                assignment: assignment.clone(),
                reason: SkipReason::InvalidAssignment {
                    detail: format!("role {} requires a location", role.id),
                },
            });
            continue;
        }
        if role.is_admin_scope && assignment.location_id.is_some() {
            skipped.push(SkippedAssignment {
                assignment: assignment.clone(),
                reason: SkipReason::InvalidAssignment {
                    detail: format!("admin-scope role {} must not carry a location", role.id),
                },
            });
            continue;
        }

        match existing_by_key.get(&key) {
            None => to_create.push(PlannedCreate {
                assignment: assignment.clone(),
                role: role.clone(),
            }),
            Some(record) if record.role_id == assignment.role_id => {
                unchanged.push((*record).clone());
            },
            Some(record) => to_update.push(PlannedUpdate {
                record: (*record).clone(),
                new_role: role.clone(),
            }),
        }
    }

    let to_delete = existing
        .iter()
        .filter(|r| !claimed.contains(&r.key()))
        .cloned()
        .collect();

    ReconcilePlan {
        to_delete,
        to_create,
        to_update,
        unchanged,
        skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(id: &str, admin: bool) -> Role {
        Role {
            id: id.to_string(),
            name: id.to_string(),
            is_admin_scope: admin,
        }
    }

    fn roles(items: &[(&str, bool)]) -> HashMap<String, Role> {
        items
            .iter()
            .map(|(id, admin)| ((*id).to_string(), role(id, *admin)))
            .collect()
    }

    fn record(id: i64, location: Option<&str>, role_id: &str, external_ref: Option<&str>) -> LedgerRecord {
        LedgerRecord {
            id,
            contact_id: "contact-1".to_string(),
            company_id: "co-1".to_string(),
            location_id: location.map(ToString::to_string),
            role_id: role_id.to_string(),
            external_ref: external_ref.map(ToString::to_string),
        }
    }

    fn desired(location: Option<&str>, role_id: &str) -> DesiredAssignment {
        DesiredAssignment {
            contact_id: "contact-1".to_string(),
            company_id: "co-1".to_string(),
            location_id: location.map(ToString::to_string),
            role_id: role_id.to_string(),
        }
    }

    #[test]
    fn disjoint_sets_by_key() {
        let existing = vec![
            record(1, Some("loc-keep"), "role-buyer", Some("ref-1")),
            record(2, Some("loc-change"), "role-buyer", Some("ref-2")),
            record(3, Some("loc-drop"), "role-buyer", Some("ref-3")),
        ];
        let wanted = vec![
            desired(Some("loc-keep"), "role-buyer"),
            desired(Some("loc-change"), "role-viewer"),
            desired(Some("loc-new"), "role-buyer"),
        ];
        let catalog = roles(&[("role-buyer", false), ("role-viewer", false)]);

        let plan = compute_plan("contact-1", "co-1", &existing, &wanted, &catalog);

        assert_eq!(plan.unchanged.len(), 1);
        assert_eq!(plan.unchanged[0].id, 1);
        assert_eq!(plan.to_update.len(), 1);
        assert_eq!(plan.to_update[0].record.id, 2);
        assert_eq!(plan.to_create.len(), 1);
        assert_eq!(plan.to_create[0].key(), AssignmentKey::new("co-1", Some("loc-new")));
        assert_eq!(plan.to_delete.len(), 1);
        assert_eq!(plan.to_delete[0].id, 3);
        assert!(plan.skipped.is_empty());
    }

    #[test]
    fn identical_sets_are_a_noop() {
        let existing = vec![record(1, Some("loc-1"), "role-buyer", Some("ref-1"))];
        let wanted = vec![desired(Some("loc-1"), "role-buyer")];
        let catalog = roles(&[("role-buyer", false)]);

        let plan = compute_plan("contact-1", "co-1", &existing, &wanted, &catalog);
        assert!(plan.is_noop());
        assert_eq!(plan.unchanged.len(), 1);
    }

    #[test]
    fn empty_desired_deletes_everything() {
        let existing = vec![
            record(1, Some("loc-1"), "role-buyer", Some("ref-1")),
            record(2, None, "role-admin", None),
        ];
        let plan = compute_plan("contact-1", "co-1", &existing, &[], &HashMap::new());

        assert_eq!(plan.to_delete.len(), 2);
        assert!(plan.to_create.is_empty());
        assert!(plan.to_update.is_empty());
    }

    #[test]
    fn unresolved_role_skips_but_does_not_delete() {
        // The existing assignment at loc-1 must survive a typo'd desired
        // role at the same key.
        let existing = vec![record(1, Some("loc-1"), "role-buyer", Some("ref-1"))];
        let wanted = vec![desired(Some("loc-1"), "role-typo")];
        let catalog = roles(&[("role-buyer", false)]);

        let plan = compute_plan("contact-1", "co-1", &existing, &wanted, &catalog);

        assert!(plan.to_delete.is_empty());
        assert_eq!(plan.skipped.len(), 1);
        assert!(matches!(
            plan.skipped[0].reason,
            SkipReason::RoleNotFound { .. }
        ));
    }

    #[test]
    fn non_admin_role_without_location_is_invalid() {
        let wanted = vec![desired(None, "role-buyer")];
        let catalog = roles(&[("role-buyer", false)]);

        let plan = compute_plan("contact-1", "co-1", &[], &wanted, &catalog);
        assert_eq!(plan.skipped.len(), 1);
        assert!(matches!(
            plan.skipped[0].reason,
            SkipReason::InvalidAssignment { .. }
        ));
    }

    #[test]
    fn admin_role_with_location_is_invalid() {
        let wanted = vec![desired(Some("loc-1"), "role-admin")];
        let catalog = roles(&[("role-admin", true)]);

        let plan = compute_plan("contact-1", "co-1", &[], &wanted, &catalog);
        assert_eq!(plan.skipped.len(), 1);
    }

    #[test]
    fn admin_role_without_location_is_valid() {
        let wanted = vec![desired(None, "role-admin")];
        let catalog = roles(&[("role-admin", true)]);

        let plan = compute_plan("contact-1", "co-1", &[], &wanted, &catalog);
        assert_eq!(plan.to_create.len(), 1);
        assert!(plan.to_create[0].key().is_company_scope());
    }

    #[test]
    fn duplicate_keys_first_wins() {
        let wanted = vec![
            desired(Some("loc-1"), "role-buyer"),
            desired(Some("loc-1"), "role-viewer"),
        ];
        let catalog = roles(&[("role-buyer", false), ("role-viewer", false)]);

        let plan = compute_plan("contact-1", "co-1", &[], &wanted, &catalog);
        assert_eq!(plan.to_create.len(), 1);
        assert_eq!(plan.to_create[0].role.id, "role-buyer");
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].reason, SkipReason::DuplicateKey);
    }

    #[test]
    fn out_of_scope_assignment_is_invalid() {
        let mut foreign = desired(Some("loc-1"), "role-buyer");
        foreign.company_id = "co-other".to_string();
        let catalog = roles(&[("role-buyer", false)]);

        let plan = compute_plan("contact-1", "co-1", &[], &[foreign], &catalog);
        assert_eq!(plan.skipped.len(), 1);
    }

    #[test]
    fn update_classification_covers_admin_boundary() {
        let catalog = roles(&[("role-admin", true), ("role-buyer", false)]);

        // Non-admin -> non-admin: revoke + grant.
        let up = PlannedUpdate {
            record: record(1, Some("loc-1"), "role-buyer", Some("ref-1")),
            new_role: catalog["role-buyer"].clone(),
        };
        assert!(up.revoke_needed() && up.grant_needed());

        // Non-admin -> admin: revoke only.
        let up = PlannedUpdate {
            record: record(2, None, "role-buyer", Some("ref-2")),
            new_role: catalog["role-admin"].clone(),
        };
        assert!(up.revoke_needed() && !up.grant_needed());

        // Admin (no ref) -> admin: ledger-only.
        let up = PlannedUpdate {
            record: record(3, None, "role-admin-old", None),
            new_role: catalog["role-admin"].clone(),
        };
        assert!(!up.needs_authority_update());
    }
}
