use anyhow::Result;
use rusqlite::{Connection, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod contacts;
mod memory;
mod schema;
mod store;

pub use memory::MemoryStore;
pub use schema::SCHEMA_VERSION;
pub use store::{ContactStore, StoreError, StoreResult};

use crate::engine::{IdentifyError, IdentifyRequest, Reconciler};
use crate::models::{ConsolidatedContact, ContactGroup, ContactId};

/// Default time to wait on a locked database before giving up.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open database, creating if needed, running migrations
    pub fn open_at(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        // Create parent directories
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(busy_timeout)?;

        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open in-memory database for testing
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn default_path() -> Result<PathBuf> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join("identityrecon").join("contacts.db"))
    }

    /// Reconcile one identity fact inside a single write transaction.
    pub fn identify(
        &mut self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<ConsolidatedContact, IdentifyError> {
        // Reject before touching the database at all.
        let request = IdentifyRequest::new(email, phone_number)?;
        self.identify_request(&request)
    }

    /// Reconcile an already validated request.
    ///
    /// The transaction takes SQLite's write lock up front, so concurrent
    /// callers are serialized and each decides against committed state.
    /// Any failure rolls back every write made so far.
    pub fn identify_request(
        &mut self,
        request: &IdentifyRequest,
    ) -> Result<ConsolidatedContact, IdentifyError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let consolidated = Reconciler::new(&*tx).identify_request(request)?;
        tx.commit().map_err(StoreError::from)?;

        Ok(consolidated)
    }

    /// The live group containing `id`, whether `id` is the primary or not.
    pub fn contact_group(&self, id: ContactId) -> Result<ContactGroup, IdentifyError> {
        Ok(Reconciler::new(&self.conn).group_containing(id)?)
    }

    /// Soft-delete one contact. Returns false if no live row had that id.
    pub fn soft_delete_contact(&self, id: ContactId) -> Result<bool, StoreError> {
        contacts::soft_delete(&self.conn, id)
    }

    pub fn count_contacts(&self) -> Result<u32, StoreError> {
        contacts::count_live(&self.conn)
    }

    fn migrate(&self) -> Result<()> {
        let version = self.get_schema_version()?;

        if version == 0 {
            // Run migration in a transaction for atomicity
            self.conn
                .execute_batch(&format!("BEGIN TRANSACTION; {} COMMIT;", schema::SCHEMA_V1))?;
            self.set_schema_version(SCHEMA_VERSION)?;
        }

        Ok(())
    }

    fn get_schema_version(&self) -> Result<i32> {
        let result: Result<i32, _> =
            self.conn
                .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                    row.get(0)
                });

        match result {
            Ok(v) => Ok(v),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(rusqlite::Error::SqliteFailure(err, msg)) => {
                // "no such table" is error code 1 (SQLITE_ERROR)
                if err.code == rusqlite::ErrorCode::Unknown
                    && msg.as_ref().map_or(false, |m| m.contains("no such table"))
                {
                    Ok(0)
                } else {
                    Err(rusqlite::Error::SqliteFailure(err, msg).into())
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn set_schema_version(&self, version: i32) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?)",
            [version],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LinkPrecedence, NewContact};
    use chrono::{Duration as ChronoDuration, Utc};

    #[test]
    fn test_open_memory() {
        let db = Database::open_memory().unwrap();
        assert_eq!(db.get_schema_version().unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_exist() {
        let db = Database::open_memory().unwrap();

        let tables: Vec<String> = db
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(tables.contains(&"contact".to_string()));
        assert!(tables.contains(&"schema_version".to_string()));
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("contacts.db");

        {
            let mut db = Database::open_at(&path, DEFAULT_BUSY_TIMEOUT).unwrap();
            db.identify(Some("doc@hillvalley.edu"), None).unwrap();
        }

        let db = Database::open_at(&path, DEFAULT_BUSY_TIMEOUT).unwrap();
        assert_eq!(db.get_schema_version().unwrap(), SCHEMA_VERSION);
        assert_eq!(db.count_contacts().unwrap(), 1);
    }

    #[test]
    fn test_identify_rejects_empty_request_without_writing() {
        let mut db = Database::open_memory().unwrap();
        let err = db.identify(None, Some("")).unwrap_err();
        assert!(matches!(err, IdentifyError::Validation(_)));
        assert_eq!(db.count_contacts().unwrap(), 0);
    }

    #[test]
    fn test_identify_merges_groups_oldest_first() {
        let mut db = Database::open_memory().unwrap();
        let now = Utc::now();

        // Insert the newer primary first so id order and age order disagree.
        let newer = contacts::insert_contact_at(
            &db.conn,
            &NewContact::primary(Some("biffsucks@hillvalley.edu"), Some("717171")),
            now,
        )
        .unwrap();
        let older = contacts::insert_contact_at(
            &db.conn,
            &NewContact::primary(Some("george@hillvalley.edu"), Some("919191")),
            now - ChronoDuration::days(1),
        )
        .unwrap();
        let newer_child = contacts::insert_contact_at(
            &db.conn,
            &NewContact::secondary(newer.id, Some("biff@hillvalley.edu"), Some("717171")),
            now,
        )
        .unwrap();

        let consolidated = db
            .identify(Some("george@hillvalley.edu"), Some("717171"))
            .unwrap();

        assert_eq!(consolidated.primary_contact_id, older.id);
        assert_eq!(
            consolidated.emails,
            vec![
                "george@hillvalley.edu",
                "biffsucks@hillvalley.edu",
                "biff@hillvalley.edu"
            ]
        );
        assert_eq!(consolidated.phone_numbers, vec!["919191", "717171"]);
        assert_eq!(consolidated.secondary_contact_ids, vec![newer.id, newer_child.id]);

        let demoted = db.conn.get_by_id(newer.id).unwrap();
        assert_eq!(demoted.link_precedence, LinkPrecedence::Secondary);
        assert_eq!(demoted.linked_id, Some(older.id));
        assert_eq!(db.conn.get_by_id(newer_child.id).unwrap().linked_id, Some(older.id));
        assert_eq!(db.count_contacts().unwrap(), 3);
    }

    #[test]
    fn test_identify_reports_missing_primary() {
        let mut db = Database::open_memory().unwrap();

        // A live secondary whose primary has been soft-deleted.
        let primary = db.conn.insert(&NewContact::primary(None, Some("111"))).unwrap();
        db.conn
            .insert(&NewContact::secondary(primary.id, Some("a@x.com"), None))
            .unwrap();
        db.soft_delete_contact(primary.id).unwrap();

        let err = db.identify(Some("a@x.com"), Some("222")).unwrap_err();
        assert!(matches!(err, IdentifyError::NotFound(id) if id == primary.id));
        assert_eq!(db.count_contacts().unwrap(), 1);
    }

    #[test]
    fn test_identify_rolls_back_partial_merge() {
        let mut db = Database::open_memory().unwrap();
        let now = Utc::now();

        let older = contacts::insert_contact_at(
            &db.conn,
            &NewContact::primary(Some("a@x.com"), None),
            now - ChronoDuration::hours(1),
        )
        .unwrap();
        let newer = contacts::insert_contact_at(
            &db.conn,
            &NewContact::primary(None, Some("222")),
            now,
        )
        .unwrap();
        let child = contacts::insert_contact_at(
            &db.conn,
            &NewContact::secondary(newer.id, Some("c@x.com"), None),
            now,
        )
        .unwrap();

        // Relinking the children succeeds, demoting the primary then fails.
        db.conn
            .execute_batch(
                r#"CREATE TRIGGER refuse_demotion BEFORE UPDATE OF link_precedence ON contact
                   BEGIN SELECT RAISE(ABORT, 'demotion refused'); END;"#,
            )
            .unwrap();

        let err = db.identify(Some("a@x.com"), Some("222")).unwrap_err();
        assert!(matches!(err, IdentifyError::Storage(_)));

        assert_eq!(db.conn.get_by_id(child.id).unwrap().linked_id, Some(newer.id));
        assert!(db.conn.get_by_id(newer.id).unwrap().is_primary());
        assert!(db.conn.get_secondaries_of(older.id).unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_identify_is_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contacts.db");
        // Create the schema once so the workers only race on identify.
        Database::open_at(&path, DEFAULT_BUSY_TIMEOUT).unwrap();

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let path = &path;
                scope.spawn(move || {
                    let mut db = Database::open_at(path, DEFAULT_BUSY_TIMEOUT).unwrap();
                    for _ in 0..5 {
                        let result = db.identify(Some("same@x.com"), Some("111")).unwrap();
                        assert!(result.secondary_contact_ids.is_empty());
                    }
                });
            }
        });

        let db = Database::open_at(&path, DEFAULT_BUSY_TIMEOUT).unwrap();
        assert_eq!(db.count_contacts().unwrap(), 1);
    }

    #[test]
    fn test_busy_timeout_surfaces_as_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contacts.db");

        let holder = Database::open_at(&path, DEFAULT_BUSY_TIMEOUT).unwrap();
        holder.conn.execute_batch("BEGIN IMMEDIATE;").unwrap();

        let mut waiter = Database::open_at(&path, Duration::from_millis(50)).unwrap();
        let err = waiter.identify(Some("a@x.com"), None).unwrap_err();
        assert!(matches!(err, IdentifyError::Storage(_)));

        holder.conn.execute_batch("ROLLBACK;").unwrap();
        waiter.identify(Some("a@x.com"), None).unwrap();
        assert_eq!(waiter.count_contacts().unwrap(), 1);
    }

    #[test]
    fn test_contact_group_from_secondary() {
        let mut db = Database::open_memory().unwrap();
        let first = db.identify(Some("a@x.com"), Some("111")).unwrap();
        let second = db.identify(Some("a@x.com"), Some("222")).unwrap();

        let secondary_id = second.secondary_contact_ids[0];
        let group = db.contact_group(secondary_id).unwrap();
        assert_eq!(group.primary.id, first.primary_contact_id);
        assert_eq!(group.consolidate(), second);
    }
}
