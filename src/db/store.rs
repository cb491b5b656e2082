use thiserror::Error;

use crate::models::{Contact, ContactId, LinkPrecedence, NewContact};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("contact {0} not found")]
    NotFound(ContactId),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt contact row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Repository contract the reconciliation engine runs against.
///
/// Every read excludes soft-deleted rows. List results come back in
/// ascending id order.
pub trait ContactStore {
    /// Live contacts whose email equals `email` OR whose phone number equals
    /// `phone_number`. Only supplied fields take part in the match; with
    /// neither supplied the result is empty.
    fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> StoreResult<Vec<Contact>>;

    fn get_by_id(&self, id: ContactId) -> StoreResult<Contact>;

    fn get_secondaries_of(&self, primary_id: ContactId) -> StoreResult<Vec<Contact>>;

    /// Persist a new contact, assigning its id and timestamps.
    fn insert(&self, contact: &NewContact) -> StoreResult<Contact>;

    fn update_linkage(
        &self,
        id: ContactId,
        precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> StoreResult<()>;

    /// Point every live secondary of `from_primary` at `to_primary`.
    /// Returns the number of rows moved.
    fn relink_secondaries(&self, from_primary: ContactId, to_primary: ContactId)
        -> StoreResult<usize>;
}
