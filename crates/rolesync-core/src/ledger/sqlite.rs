//! SQLite-backed assignment ledger.
//!
//! One table, one unique index. The unique index on
//! `(contact_id, company_id, slot)` is what enforces the one-role-per-slot
//! invariant at the storage layer; `slot` is the location id, or the empty
//! string for company-wide admin assignments, so the constraint applies to
//! rows with no location as well.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, ErrorCode, OpenFlags, params};

use super::{
    AssignmentLedger, LedgerError, LedgerRecord, MAX_RECORDS_PER_CONTACT, NewLedgerRecord,
};

const SCHEMA_SQL: &str = r"
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS assignments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        contact_id TEXT NOT NULL,
        company_id TEXT NOT NULL,
        -- NULL for company-wide admin assignments
        location_id TEXT,
        -- location_id or '' ; carries the uniqueness constraint so that
        -- admin rows (NULL location) cannot duplicate either
        slot TEXT NOT NULL,
        role_id TEXT NOT NULL,
        external_ref TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        UNIQUE(contact_id, company_id, slot)
    );

    CREATE INDEX IF NOT EXISTS idx_assignments_contact
        ON assignments(contact_id, company_id);
";

/// SQLite implementation of [`AssignmentLedger`].
///
/// The connection is wrapped in a mutex; ledger calls are local and fast, so
/// a single connection is enough for the engine's access pattern (one pass
/// per `(contact, company)` at a time).
pub struct SqliteAssignmentLedger {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAssignmentLedger {
    /// Opens (or creates) a ledger database at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the database cannot be opened or
    /// the schema cannot be applied.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| LedgerError::Database(e.to_string()))?;

        Self::with_connection(conn)
    }

    /// Creates an in-memory ledger for testing.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the schema cannot be applied.
    pub fn in_memory() -> Result<Self, LedgerError> {
        let conn =
            Connection::open_in_memory().map_err(|e| LedgerError::Database(e.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| LedgerError::Database(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn now_unix() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0) as i64
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerRecord> {
    Ok(LedgerRecord {
        id: row.get(0)?,
        contact_id: row.get(1)?,
        company_id: row.get(2)?,
        location_id: row.get(3)?,
        role_id: row.get(4)?,
        external_ref: row.get(5)?,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

impl AssignmentLedger for SqliteAssignmentLedger {
    fn find_all(
        &self,
        contact_id: &str,
        company_id: &str,
    ) -> Result<Vec<LedgerRecord>, LedgerError> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let mut stmt = conn
            .prepare(
                "SELECT id, contact_id, company_id, location_id, role_id, external_ref
                 FROM assignments
                 WHERE contact_id = ?1 AND company_id = ?2
                 ORDER BY id",
            )
            .map_err(|e| LedgerError::Database(e.to_string()))?;

        let records: Vec<LedgerRecord> = stmt
            .query_map(params![contact_id, company_id], row_to_record)
            .map_err(|e| LedgerError::Database(e.to_string()))?
            .collect::<rusqlite::Result<_>>()
            .map_err(|e| LedgerError::Database(e.to_string()))?;

        if records.len() > MAX_RECORDS_PER_CONTACT {
            return Err(LedgerError::TooManyRecords {
                count: records.len(),
                limit: MAX_RECORDS_PER_CONTACT,
            });
        }

        Ok(records)
    }

    fn create(&self, record: NewLedgerRecord) -> Result<LedgerRecord, LedgerError> {
        record.validate()?;

        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = Self::now_unix();
        let slot = record.location_id.as_deref().unwrap_or("");

        let result = conn.execute(
            "INSERT INTO assignments
             (contact_id, company_id, location_id, slot, role_id, external_ref,
              created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                &record.contact_id,
                &record.company_id,
                &record.location_id,
                slot,
                &record.role_id,
                &record.external_ref,
                now,
            ],
        );

        match result {
            Ok(_) => Ok(LedgerRecord {
                id: conn.last_insert_rowid(),
                contact_id: record.contact_id,
                company_id: record.company_id,
                location_id: record.location_id,
                role_id: record.role_id,
                external_ref: record.external_ref,
            }),
            Err(e) if is_unique_violation(&e) => Err(LedgerError::DuplicateKey {
                key: record.key(),
                contact_id: record.contact_id,
            }),
            Err(e) => Err(LedgerError::Database(e.to_string())),
        }
    }

    fn update(
        &self,
        record_id: i64,
        role_id: &str,
        external_ref: Option<&str>,
    ) -> Result<(), LedgerError> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let changed = conn
            .execute(
                "UPDATE assignments
                 SET role_id = ?2, external_ref = ?3, updated_at = ?4
                 WHERE id = ?1",
                params![record_id, role_id, external_ref, Self::now_unix()],
            )
            .map_err(|e| LedgerError::Database(e.to_string()))?;

        if changed == 0 {
            return Err(LedgerError::NotFound { record_id });
        }
        Ok(())
    }

    fn delete(&self, record_id: i64) -> Result<(), LedgerError> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let changed = conn
            .execute("DELETE FROM assignments WHERE id = ?1", params![record_id])
            .map_err(|e| LedgerError::Database(e.to_string()))?;

        if changed == 0 {
            return Err(LedgerError::NotFound { record_id });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_record(location: Option<&str>, role: &str) -> NewLedgerRecord {
        NewLedgerRecord {
            contact_id: "contact-1".to_string(),
            company_id: "co-1".to_string(),
            location_id: location.map(ToString::to_string),
            role_id: role.to_string(),
            external_ref: None,
        }
    }

    #[test]
    fn create_and_find_roundtrip() {
        let ledger = SqliteAssignmentLedger::in_memory().unwrap();

        let created = ledger.create(new_record(Some("loc-1"), "role-buyer")).unwrap();
        assert!(created.id > 0);

        let records = ledger.find_all("contact-1", "co-1").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0], created);
    }

    #[test]
    fn duplicate_slot_is_rejected() {
        let ledger = SqliteAssignmentLedger::in_memory().unwrap();

        ledger.create(new_record(Some("loc-1"), "role-buyer")).unwrap();
        let err = ledger
            .create(new_record(Some("loc-1"), "role-viewer"))
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateKey { .. }));
    }

    #[test]
    fn admin_slot_is_unique_too() {
        let ledger = SqliteAssignmentLedger::in_memory().unwrap();

        ledger.create(new_record(None, "role-admin")).unwrap();
        let err = ledger.create(new_record(None, "role-admin")).unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateKey { key, .. } if key.is_company_scope()));
    }

    #[test]
    fn update_replaces_role_and_ref() {
        let ledger = SqliteAssignmentLedger::in_memory().unwrap();

        let created = ledger.create(new_record(Some("loc-1"), "role-buyer")).unwrap();
        ledger
            .update(created.id, "role-viewer", Some("ext-99"))
            .unwrap();

        let records = ledger.find_all("contact-1", "co-1").unwrap();
        assert_eq!(records[0].role_id, "role-viewer");
        assert_eq!(records[0].external_ref.as_deref(), Some("ext-99"));
    }

    #[test]
    fn update_unknown_record_is_not_found() {
        let ledger = SqliteAssignmentLedger::in_memory().unwrap();
        let err = ledger.update(42, "role-x", None).unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { record_id: 42 }));
    }

    #[test]
    fn delete_frees_the_slot() {
        let ledger = SqliteAssignmentLedger::in_memory().unwrap();

        let created = ledger.create(new_record(Some("loc-1"), "role-buyer")).unwrap();
        ledger.delete(created.id).unwrap();
        assert!(ledger.find_all("contact-1", "co-1").unwrap().is_empty());

        // Slot is reusable after deletion.
        ledger.create(new_record(Some("loc-1"), "role-viewer")).unwrap();
    }

    #[test]
    fn scans_are_scoped_to_contact_and_company() {
        let ledger = SqliteAssignmentLedger::in_memory().unwrap();

        ledger.create(new_record(Some("loc-1"), "role-buyer")).unwrap();
        let mut other = new_record(Some("loc-1"), "role-buyer");
        other.contact_id = "contact-2".to_string();
        ledger.create(other).unwrap();

        assert_eq!(ledger.find_all("contact-1", "co-1").unwrap().len(), 1);
        assert_eq!(ledger.find_all("contact-2", "co-1").unwrap().len(), 1);
        assert!(ledger.find_all("contact-1", "co-2").unwrap().is_empty());
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ledger.db");

        {
            let ledger = SqliteAssignmentLedger::open(&path).unwrap();
            ledger.create(new_record(Some("loc-1"), "role-buyer")).unwrap();
        }

        let ledger = SqliteAssignmentLedger::open(&path).unwrap();
        assert_eq!(ledger.find_all("contact-1", "co-1").unwrap().len(), 1);
    }
}
