//! Durable assignment ledger.
//!
//! The ledger is the local record of what the authority system is believed
//! to currently hold for a contact: one row per
//! `(contact, company, location-or-admin)` slot, each carrying the role and
//! the external reference id returned by the authority's grant call. The
//! external reference is the sole handle usable to revoke.
//!
//! # Invariants
//!
//! - At most one record per `(contact_id, company_id, key)` at any time; the
//!   SQLite implementation enforces this with a unique index and surfaces
//!   violations as [`LedgerError::DuplicateKey`].
//! - Records are only ever mutated by the reconciliation engine.
//! - Infrastructure errors are fatal to a reconciliation pass; a partially
//!   applied pass cannot be papered over locally.

mod sqlite;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use sqlite::SqliteAssignmentLedger;

/// Maximum byte length accepted for any identifier stored in the ledger.
pub const MAX_ID_LENGTH: usize = 256;

/// Maximum number of records returned for one `(contact, company)` scan.
pub const MAX_RECORDS_PER_CONTACT: usize = 4096;

/// Errors from ledger operations.
///
/// Everything except [`LedgerError::DuplicateKey`] is an infrastructure
/// failure and fatal to the reconciliation pass that hit it.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LedgerError {
    /// A record already exists for this `(contact, company, key)` slot.
    #[error("assignment already exists for contact {contact_id} at {key}")]
    DuplicateKey {
        /// The contact holding the slot.
        contact_id: String,
        /// The occupied slot.
        key: AssignmentKey,
    },

    /// No record with this id.
    #[error("ledger record not found: {record_id}")]
    NotFound {
        /// The missing record id.
        record_id: i64,
    },

    /// Invalid field on a record about to be written.
    #[error("invalid ledger field {field}: {reason}")]
    InvalidField {
        /// The offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// Scan result exceeded the bounded size.
    #[error("too many ledger records for contact: {count} exceeds limit {limit}")]
    TooManyRecords {
        /// Records found.
        count: usize,
        /// Maximum allowed.
        limit: usize,
    },

    /// Underlying database error.
    #[error("ledger database error: {0}")]
    Database(String),
}

/// The `(company, location-or-admin)` slot that can hold at most one role
/// per contact.
///
/// Admin-scope assignments carry no location; their slot is the company
/// itself, encoded as an empty location component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssignmentKey {
    /// Company identifier.
    pub company_id: String,
    /// Location identifier, or empty for the company-wide admin slot.
    pub location_id: String,
}

impl AssignmentKey {
    /// Builds a key from a company id and an optional location.
    #[must_use]
    pub fn new(company_id: &str, location_id: Option<&str>) -> Self {
        Self {
            company_id: company_id.to_string(),
            location_id: location_id.unwrap_or("").to_string(),
        }
    }

    /// Whether this is the company-wide (admin) slot.
    #[must_use]
    pub fn is_company_scope(&self) -> bool {
        self.location_id.is_empty()
    }
}

impl std::fmt::Display for AssignmentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_company_scope() {
            write!(f, "{}/<company>", self.company_id)
        } else {
            write!(f, "{}/{}", self.company_id, self.location_id)
        }
    }
}

/// A persisted assignment record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    /// Ledger-assigned record id.
    pub id: i64,
    /// Contact holding the assignment.
    pub contact_id: String,
    /// Company the assignment belongs to.
    pub company_id: String,
    /// Location, or `None` for company-wide admin assignments.
    pub location_id: Option<String>,
    /// The assigned role id.
    pub role_id: String,
    /// Reference id returned by the authority's grant; `None` for
    /// ledger-only (admin-scope) assignments and for grants that have not
    /// completed. The sole handle usable to revoke.
    pub external_ref: Option<String>,
}

impl LedgerRecord {
    /// The slot this record occupies.
    #[must_use]
    pub fn key(&self) -> AssignmentKey {
        AssignmentKey::new(&self.company_id, self.location_id.as_deref())
    }
}

/// A record about to be created, before the ledger assigns it an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLedgerRecord {
    /// Contact holding the assignment.
    pub contact_id: String,
    /// Company the assignment belongs to.
    pub company_id: String,
    /// Location, or `None` for company-wide admin assignments.
    pub location_id: Option<String>,
    /// The assigned role id.
    pub role_id: String,
    /// External reference from a completed grant, if any.
    pub external_ref: Option<String>,
}

impl NewLedgerRecord {
    /// The slot this record will occupy.
    #[must_use]
    pub fn key(&self) -> AssignmentKey {
        AssignmentKey::new(&self.company_id, self.location_id.as_deref())
    }

    /// Validates identifier fields against [`MAX_ID_LENGTH`].
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidField`] for empty or oversized ids.
    pub fn validate(&self) -> Result<(), LedgerError> {
        validate_id("contact_id", &self.contact_id)?;
        validate_id("company_id", &self.company_id)?;
        validate_id("role_id", &self.role_id)?;
        if let Some(location_id) = &self.location_id {
            validate_id("location_id", location_id)?;
        }
        if let Some(external_ref) = &self.external_ref {
            validate_id("external_ref", external_ref)?;
        }
        Ok(())
    }
}

fn validate_id(field: &'static str, value: &str) -> Result<(), LedgerError> {
    if value.is_empty() {
        return Err(LedgerError::InvalidField {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    if value.len() > MAX_ID_LENGTH {
        return Err(LedgerError::InvalidField {
            field,
            reason: format!("length {} exceeds limit {MAX_ID_LENGTH}", value.len()),
        });
    }
    Ok(())
}

/// Durable store of current assignments.
///
/// All operations are local and fast; they are not awaited for concurrency
/// limiting. Any error other than [`LedgerError::DuplicateKey`] is fatal to
/// the caller's reconciliation pass.
pub trait AssignmentLedger: Send + Sync {
    /// Returns every record for a contact within a company.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::TooManyRecords`] past the bounded scan size,
    /// or [`LedgerError::Database`] on infrastructure failure.
    fn find_all(&self, contact_id: &str, company_id: &str)
        -> Result<Vec<LedgerRecord>, LedgerError>;

    /// Inserts a new record and returns it with its assigned id.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::DuplicateKey`] if the slot is already held.
    fn create(&self, record: NewLedgerRecord) -> Result<LedgerRecord, LedgerError>;

    /// Updates the role (and external reference) of an existing record.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] for an unknown record id.
    fn update(
        &self,
        record_id: i64,
        role_id: &str,
        external_ref: Option<&str>,
    ) -> Result<(), LedgerError>;

    /// Deletes a record.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] for an unknown record id.
    fn delete(&self, record_id: i64) -> Result<(), LedgerError>;
}
