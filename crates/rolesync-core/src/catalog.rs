//! Role catalog: resolves role identifiers to role records.
//!
//! The catalog is a leaf collaborator with no side effects. The engine asks
//! it to resolve every role id referenced by a reconciliation pass up front,
//! in one batched call; an unresolved id is never fatal to a pass — the
//! affected assignment is skipped and logged by the engine.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of role ids accepted by a single batched lookup.
pub const MAX_ROLES_PER_LOOKUP: usize = 256;

/// Errors from catalog lookups.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum CatalogError {
    /// The role id does not resolve to a role record.
    #[error("role not found: {role_id}")]
    RoleNotFound {
        /// The id that failed to resolve.
        role_id: String,
    },

    /// Too many role ids in one batched lookup.
    #[error("too many roles in lookup: {count} exceeds limit {limit}")]
    TooManyRoles {
        /// Number of ids requested.
        count: usize,
        /// Maximum allowed.
        limit: usize,
    },
}

/// A role record resolved from the catalog.
///
/// Admin-scope roles apply to the whole company and carry no location;
/// non-admin roles are always bound to a specific location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Opaque role identifier.
    pub id: String,
    /// Role name as the authority system knows it.
    pub name: String,
    /// Whether this role is company-wide (no location).
    pub is_admin_scope: bool,
}

/// Read-only resolution of role identifiers.
pub trait RoleCatalog: Send + Sync {
    /// Resolves a single role id.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::RoleNotFound`] for an unresolved id.
    fn get_role(&self, role_id: &str) -> Result<Role, CatalogError>;

    /// Resolves a set of role ids in one call.
    ///
    /// Unresolved ids are simply absent from the returned map; callers decide
    /// how to treat the gap.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::TooManyRoles`] if the request exceeds
    /// [`MAX_ROLES_PER_LOOKUP`].
    fn get_roles(&self, role_ids: &BTreeSet<String>) -> Result<HashMap<String, Role>, CatalogError>;
}

/// In-memory catalog backed by a map of role records.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRoleCatalog {
    roles: HashMap<String, Role>,
}

impl InMemoryRoleCatalog {
    /// Creates a catalog from an iterator of role records.
    pub fn new(roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            roles: roles.into_iter().map(|r| (r.id.clone(), r)).collect(),
        }
    }

    /// Parses a catalog from a JSON array of role records.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error for malformed input.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let roles: Vec<Role> = serde_json::from_str(json)?;
        Ok(Self::new(roles))
    }

    /// Number of roles in the catalog.
    #[must_use]
    pub fn len(&self) -> usize {
        self.roles.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

impl RoleCatalog for InMemoryRoleCatalog {
    fn get_role(&self, role_id: &str) -> Result<Role, CatalogError> {
        self.roles
            .get(role_id)
            .cloned()
            .ok_or_else(|| CatalogError::RoleNotFound {
                role_id: role_id.to_string(),
            })
    }

    fn get_roles(&self, role_ids: &BTreeSet<String>) -> Result<HashMap<String, Role>, CatalogError> {
        if role_ids.len() > MAX_ROLES_PER_LOOKUP {
            return Err(CatalogError::TooManyRoles {
                count: role_ids.len(),
                limit: MAX_ROLES_PER_LOOKUP,
            });
        }
        Ok(role_ids
            .iter()
            .filter_map(|id| self.roles.get(id).map(|r| (id.clone(), r.clone())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_roles() -> Vec<Role> {
        vec![
            Role {
                id: "role-buyer".to_string(),
                name: "Buyer".to_string(),
                is_admin_scope: false,
            },
            Role {
                id: "role-admin".to_string(),
                name: "Administrator".to_string(),
                is_admin_scope: true,
            },
        ]
    }

    #[test]
    fn resolves_known_role() {
        let catalog = InMemoryRoleCatalog::new(sample_roles());
        let role = catalog.get_role("role-buyer").unwrap();
        assert_eq!(role.name, "Buyer");
        assert!(!role.is_admin_scope);
    }

    #[test]
    fn unknown_role_is_an_error() {
        let catalog = InMemoryRoleCatalog::new(sample_roles());
        let err = catalog.get_role("role-ghost").unwrap_err();
        assert_eq!(
            err,
            CatalogError::RoleNotFound {
                role_id: "role-ghost".to_string()
            }
        );
    }

    #[test]
    fn batched_lookup_omits_unresolved_ids() {
        let catalog = InMemoryRoleCatalog::new(sample_roles());
        let ids: BTreeSet<String> = ["role-buyer", "role-ghost", "role-admin"]
            .iter()
            .map(ToString::to_string)
            .collect();

        let resolved = catalog.get_roles(&ids).unwrap();
        assert_eq!(resolved.len(), 2);
        assert!(resolved.contains_key("role-buyer"));
        assert!(resolved.contains_key("role-admin"));
        assert!(!resolved.contains_key("role-ghost"));
    }

    #[test]
    fn batched_lookup_is_bounded() {
        let catalog = InMemoryRoleCatalog::new(sample_roles());
        let ids: BTreeSet<String> = (0..=MAX_ROLES_PER_LOOKUP).map(|i| format!("r{i}")).collect();

        let err = catalog.get_roles(&ids).unwrap_err();
        assert!(matches!(err, CatalogError::TooManyRoles { .. }));
    }

    #[test]
    fn parses_catalog_from_json() {
        let json = r#"[
            {"id": "role-buyer", "name": "Buyer", "is_admin_scope": false},
            {"id": "role-admin", "name": "Administrator", "is_admin_scope": true}
        ]"#;
        let catalog = InMemoryRoleCatalog::from_json(json).unwrap();
        assert_eq!(catalog.len(), 2);
        assert!(catalog.get_role("role-admin").unwrap().is_admin_scope);
    }
}
