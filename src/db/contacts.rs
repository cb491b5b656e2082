use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::store::{ContactStore, StoreError, StoreResult};
use crate::models::{Contact, ContactId, LinkPrecedence, NewContact};

const CONTACT_COLUMNS: &str =
    "id, phone_number, email, linked_id, link_precedence, created_at, updated_at, deleted_at";

/// Nanosecond precision keeps rows created in quick succession ordered.
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

fn parse_timestamp(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn row_to_contact(row: &Row) -> rusqlite::Result<Contact> {
    let precedence: String = row.get(4)?;
    let link_precedence = LinkPrecedence::parse(&precedence).ok_or_else(|| {
        conversion_error(
            4,
            StoreError::Corrupt(format!("unknown link precedence '{}'", precedence)),
        )
    })?;
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;
    let deleted_at: Option<String> = row.get(7)?;

    Ok(Contact {
        id: row.get(0)?,
        phone_number: row.get(1)?,
        email: row.get(2)?,
        linked_id: row.get(3)?,
        link_precedence,
        created_at: parse_timestamp(5, &created_at)?,
        updated_at: parse_timestamp(6, &updated_at)?,
        deleted_at: deleted_at.map(|s| parse_timestamp(7, &s)).transpose()?,
    })
}

/// Insert with an explicit creation time.
pub(crate) fn insert_contact_at(
    conn: &Connection,
    contact: &NewContact,
    now: DateTime<Utc>,
) -> StoreResult<Contact> {
    let stamp = format_timestamp(now);
    conn.execute(
        r#"INSERT INTO contact (
            phone_number, email, linked_id, link_precedence, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?)"#,
        params![
            contact.phone_number,
            contact.email,
            contact.linked_id,
            contact.link_precedence.as_str(),
            stamp,
            stamp,
        ],
    )?;

    Ok(Contact {
        id: conn.last_insert_rowid(),
        phone_number: contact.phone_number.clone(),
        email: contact.email.clone(),
        linked_id: contact.linked_id,
        link_precedence: contact.link_precedence,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    })
}

/// Mark a live contact deleted. Returns false if there was no live row.
pub(crate) fn soft_delete(conn: &Connection, id: ContactId) -> StoreResult<bool> {
    let stamp = format_timestamp(Utc::now());
    let changed = conn.execute(
        "UPDATE contact SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
        params![stamp, id],
    )?;
    Ok(changed > 0)
}

pub(crate) fn count_live(conn: &Connection) -> StoreResult<u32> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM contact WHERE deleted_at IS NULL",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

impl ContactStore for Connection {
    fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> StoreResult<Vec<Contact>> {
        let email = email.filter(|e| !e.is_empty());
        let phone_number = phone_number.filter(|p| !p.is_empty());
        if email.is_none() && phone_number.is_none() {
            return Ok(vec![]);
        }

        // A NULL parameter never compares equal, so an absent field drops
        // out of the OR on its own.
        let sql = format!(
            r#"SELECT {} FROM contact
               WHERE deleted_at IS NULL AND (email = ?1 OR phone_number = ?2)
               ORDER BY id ASC"#,
            CONTACT_COLUMNS
        );
        let mut stmt = self.prepare(&sql)?;
        let contacts = stmt
            .query_map(params![email, phone_number], row_to_contact)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(contacts)
    }

    fn get_by_id(&self, id: ContactId) -> StoreResult<Contact> {
        let sql = format!(
            "SELECT {} FROM contact WHERE id = ? AND deleted_at IS NULL",
            CONTACT_COLUMNS
        );
        self.query_row(&sql, [id], row_to_contact)
            .optional()?
            .ok_or(StoreError::NotFound(id))
    }

    fn get_secondaries_of(&self, primary_id: ContactId) -> StoreResult<Vec<Contact>> {
        let sql = format!(
            r#"SELECT {} FROM contact
               WHERE linked_id = ? AND deleted_at IS NULL
               ORDER BY id ASC"#,
            CONTACT_COLUMNS
        );
        let mut stmt = self.prepare(&sql)?;
        let contacts = stmt
            .query_map([primary_id], row_to_contact)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(contacts)
    }

    fn insert(&self, contact: &NewContact) -> StoreResult<Contact> {
        insert_contact_at(self, contact, Utc::now())
    }

    fn update_linkage(
        &self,
        id: ContactId,
        precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> StoreResult<()> {
        let changed = self.execute(
            r#"UPDATE contact
               SET link_precedence = ?1, linked_id = ?2, updated_at = ?3
               WHERE id = ?4 AND deleted_at IS NULL"#,
            params![
                precedence.as_str(),
                linked_id,
                format_timestamp(Utc::now()),
                id
            ],
        )?;

        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    fn relink_secondaries(
        &self,
        from_primary: ContactId,
        to_primary: ContactId,
    ) -> StoreResult<usize> {
        let changed = self.execute(
            r#"UPDATE contact
               SET linked_id = ?1, updated_at = ?2
               WHERE linked_id = ?3 AND deleted_at IS NULL"#,
            params![to_primary, format_timestamp(Utc::now()), from_primary],
        )?;
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::Duration;

    #[test]
    fn test_insert_and_get_contact() {
        let db = Database::open_memory().unwrap();
        let conn = db.conn();

        let inserted = conn
            .insert(&NewContact::primary(Some("lorraine@hillvalley.edu"), Some("123456")))
            .unwrap();
        let fetched = conn.get_by_id(inserted.id).unwrap();

        assert_eq!(fetched, inserted);
        assert!(fetched.is_primary());
        assert_eq!(fetched.linked_id, None);
    }

    #[test]
    fn test_ids_increase_in_creation_order() {
        let db = Database::open_memory().unwrap();
        let conn = db.conn();

        let a = conn.insert(&NewContact::primary(Some("a@x.com"), None)).unwrap();
        let b = conn.insert(&NewContact::primary(Some("b@x.com"), None)).unwrap();
        assert!(b.id > a.id);
    }

    #[test]
    fn test_get_missing_contact() {
        let db = Database::open_memory().unwrap();
        let err = db.conn().get_by_id(42).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(42)));
    }

    #[test]
    fn test_find_by_email_or_phone() {
        let db = Database::open_memory().unwrap();
        let conn = db.conn();

        let a = conn.insert(&NewContact::primary(Some("a@x.com"), Some("111"))).unwrap();
        let b = conn.insert(&NewContact::primary(Some("b@x.com"), Some("222"))).unwrap();
        conn.insert(&NewContact::primary(Some("c@x.com"), Some("333"))).unwrap();

        let both = conn.find_by_email_or_phone(Some("a@x.com"), Some("222")).unwrap();
        assert_eq!(both.iter().map(|c| c.id).collect::<Vec<_>>(), vec![a.id, b.id]);

        let by_email = conn.find_by_email_or_phone(Some("b@x.com"), None).unwrap();
        assert_eq!(by_email.len(), 1);
        assert_eq!(by_email[0].id, b.id);

        let by_phone = conn.find_by_email_or_phone(None, Some("111")).unwrap();
        assert_eq!(by_phone[0].id, a.id);

        assert!(conn.find_by_email_or_phone(None, None).unwrap().is_empty());
        assert!(conn.find_by_email_or_phone(Some(""), Some("")).unwrap().is_empty());
    }

    #[test]
    fn test_absent_field_does_not_match_null_columns() {
        let db = Database::open_memory().unwrap();
        let conn = db.conn();

        conn.insert(&NewContact::primary(None, Some("111"))).unwrap();

        let found = conn.find_by_email_or_phone(Some("a@x.com"), None).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_soft_deleted_rows_are_invisible() {
        let db = Database::open_memory().unwrap();
        let conn = db.conn();

        let primary = conn.insert(&NewContact::primary(Some("a@x.com"), None)).unwrap();
        let secondary = conn
            .insert(&NewContact::secondary(primary.id, Some("a@x.com"), Some("222")))
            .unwrap();

        assert!(soft_delete(conn, secondary.id).unwrap());
        assert!(!soft_delete(conn, secondary.id).unwrap());

        let found = conn.find_by_email_or_phone(Some("a@x.com"), Some("222")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, primary.id);
        assert!(conn.get_secondaries_of(primary.id).unwrap().is_empty());
        assert!(matches!(
            conn.get_by_id(secondary.id),
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(count_live(conn).unwrap(), 1);
    }

    #[test]
    fn test_update_linkage() {
        let db = Database::open_memory().unwrap();
        let conn = db.conn();

        let older = conn.insert(&NewContact::primary(Some("a@x.com"), None)).unwrap();
        let newer = conn.insert(&NewContact::primary(None, Some("222"))).unwrap();

        conn.update_linkage(newer.id, LinkPrecedence::Secondary, Some(older.id))
            .unwrap();

        let demoted = conn.get_by_id(newer.id).unwrap();
        assert_eq!(demoted.link_precedence, LinkPrecedence::Secondary);
        assert_eq!(demoted.linked_id, Some(older.id));
        assert!(demoted.updated_at >= newer.updated_at);
        assert_eq!(demoted.created_at, newer.created_at);

        assert!(matches!(
            conn.update_linkage(999, LinkPrecedence::Secondary, Some(older.id)),
            Err(StoreError::NotFound(999))
        ));
    }

    #[test]
    fn test_relink_secondaries() {
        let db = Database::open_memory().unwrap();
        let conn = db.conn();

        let p1 = conn.insert(&NewContact::primary(Some("a@x.com"), None)).unwrap();
        let p2 = conn.insert(&NewContact::primary(Some("b@x.com"), None)).unwrap();
        let s1 = conn.insert(&NewContact::secondary(p2.id, None, Some("1"))).unwrap();
        let s2 = conn.insert(&NewContact::secondary(p2.id, None, Some("2"))).unwrap();

        assert_eq!(conn.relink_secondaries(p2.id, p1.id).unwrap(), 2);

        let moved = conn.get_secondaries_of(p1.id).unwrap();
        assert_eq!(moved.iter().map(|c| c.id).collect::<Vec<_>>(), vec![s1.id, s2.id]);
        assert!(conn.get_secondaries_of(p2.id).unwrap().is_empty());
    }

    #[test]
    fn test_timestamps_round_trip() {
        let db = Database::open_memory().unwrap();
        let conn = db.conn();

        let at = Utc::now() - Duration::days(3);
        let inserted =
            insert_contact_at(conn, &NewContact::primary(Some("a@x.com"), None), at).unwrap();
        let fetched = conn.get_by_id(inserted.id).unwrap();
        assert_eq!(fetched.created_at, at);
    }
}
