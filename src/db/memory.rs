use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::store::{ContactStore, StoreError, StoreResult};
use crate::models::{Contact, ContactId, LinkPrecedence, NewContact};

/// In-memory contact store: an id-indexed map, nothing else.
///
/// Writes are applied immediately; there is no transaction support.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    contacts: BTreeMap<ContactId, Contact>,
    last_id: ContactId,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert with an explicit creation time.
    pub fn insert_at(&self, contact: &NewContact, at: DateTime<Utc>) -> Contact {
        let mut inner = self.lock();
        inner.last_id += 1;
        let stored = Contact {
            id: inner.last_id,
            phone_number: contact.phone_number.clone(),
            email: contact.email.clone(),
            linked_id: contact.linked_id,
            link_precedence: contact.link_precedence,
            created_at: at,
            updated_at: at,
            deleted_at: None,
        };
        inner.contacts.insert(stored.id, stored.clone());
        stored
    }

    pub fn soft_delete(&self, id: ContactId) -> bool {
        let mut inner = self.lock();
        match inner.contacts.get_mut(&id) {
            Some(contact) if !contact.is_deleted() => {
                let now = Utc::now();
                contact.deleted_at = Some(now);
                contact.updated_at = now;
                true
            }
            _ => false,
        }
    }

    /// Every stored row, deleted ones included.
    pub fn all(&self) -> Vec<Contact> {
        self.lock().contacts.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live_where(&self, pred: impl Fn(&Contact) -> bool) -> Vec<Contact> {
        self.lock()
            .contacts
            .values()
            .filter(|c| !c.is_deleted() && pred(c))
            .cloned()
            .collect()
    }
}

impl ContactStore for MemoryStore {
    fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> StoreResult<Vec<Contact>> {
        let email = email.filter(|e| !e.is_empty());
        let phone_number = phone_number.filter(|p| !p.is_empty());

        Ok(self.live_where(|c| {
            let email_hit = email.is_some() && c.email.as_deref() == email;
            let phone_hit = phone_number.is_some() && c.phone_number.as_deref() == phone_number;
            email_hit || phone_hit
        }))
    }

    fn get_by_id(&self, id: ContactId) -> StoreResult<Contact> {
        self.lock()
            .contacts
            .get(&id)
            .filter(|c| !c.is_deleted())
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    fn get_secondaries_of(&self, primary_id: ContactId) -> StoreResult<Vec<Contact>> {
        Ok(self.live_where(|c| c.linked_id == Some(primary_id)))
    }

    fn insert(&self, contact: &NewContact) -> StoreResult<Contact> {
        Ok(self.insert_at(contact, Utc::now()))
    }

    fn update_linkage(
        &self,
        id: ContactId,
        precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> StoreResult<()> {
        let mut inner = self.lock();
        let contact = inner
            .contacts
            .get_mut(&id)
            .filter(|c| !c.is_deleted())
            .ok_or(StoreError::NotFound(id))?;
        contact.link_precedence = precedence;
        contact.linked_id = linked_id;
        contact.updated_at = Utc::now();
        Ok(())
    }

    fn relink_secondaries(
        &self,
        from_primary: ContactId,
        to_primary: ContactId,
    ) -> StoreResult<usize> {
        let now = Utc::now();
        let mut moved = 0;
        let mut inner = self.lock();
        for contact in inner.contacts.values_mut() {
            if !contact.is_deleted() && contact.linked_id == Some(from_primary) {
                contact.linked_id = Some(to_primary);
                contact.updated_at = now;
                moved += 1;
            }
        }
        Ok(moved)
    }
}
