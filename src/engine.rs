//! Contact reconciliation.
//!
//! Given an email and/or phone number, find every contact group the fact
//! touches, fold them into one group keyed by its oldest primary, record the
//! fact if it adds anything new, and report the consolidated group.
//!
//! Groups form a flat forest: a secondary always points straight at its
//! primary. Merging two groups therefore means relinking the losing
//! primary's secondaries in bulk and then demoting the losing primary itself.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::{ContactStore, StoreError};
use crate::models::{
    ConsolidatedContact, Contact, ContactGroup, ContactId, LinkPrecedence, NewContact,
};

#[derive(Debug, Error)]
pub enum IdentifyError {
    /// Bad or missing input. Caused by the client.
    #[error("{0}")]
    Validation(String),

    /// A linked contact is missing: the stored graph is inconsistent.
    #[error("contact {0} not found")]
    NotFound(ContactId),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<StoreError> for IdentifyError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            other => Self::Storage(other.to_string()),
        }
    }
}

pub type IdentifyResult<T> = std::result::Result<T, IdentifyError>;

/// A validated identity fact. Empty strings count as absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifyRequest {
    email: Option<String>,
    phone_number: Option<String>,
}

impl IdentifyRequest {
    pub fn new(email: Option<&str>, phone_number: Option<&str>) -> IdentifyResult<Self> {
        let email = email.filter(|e| !e.is_empty()).map(str::to_string);
        let phone_number = phone_number.filter(|p| !p.is_empty()).map(str::to_string);

        if email.is_none() && phone_number.is_none() {
            return Err(IdentifyError::Validation(
                "At least one of email or phoneNumber must be provided".to_string(),
            ));
        }

        Ok(Self {
            email,
            phone_number,
        })
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn phone_number(&self) -> Option<&str> {
        self.phone_number.as_deref()
    }

    /// True if the group lacks a supplied email or phone number.
    fn adds_to(&self, group: &ContactGroup) -> bool {
        let new_email = self.email().is_some_and(|e| !group.has_email(e));
        let new_phone = self.phone_number().is_some_and(|p| !group.has_phone_number(p));
        new_email || new_phone
    }
}

/// The reconciliation engine, bound to one store handle.
///
/// Holds no state of its own. Atomicity is the caller's business: run it
/// against a transaction (see [`crate::db::Database::identify`]) when the
/// store supports one.
pub struct Reconciler<'s, S: ContactStore + ?Sized> {
    store: &'s S,
}

impl<'s, S: ContactStore + ?Sized> Reconciler<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    pub fn identify(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> IdentifyResult<ConsolidatedContact> {
        let request = IdentifyRequest::new(email, phone_number)?;
        self.identify_request(&request)
    }

    pub fn identify_request(&self, request: &IdentifyRequest) -> IdentifyResult<ConsolidatedContact> {
        let matches = self
            .store
            .find_by_email_or_phone(request.email(), request.phone_number())?;

        if matches.is_empty() {
            let created = self.store.insert(&NewContact::primary(
                request.email(),
                request.phone_number(),
            ))?;
            info!(contact_id = created.id, "created primary contact");
            return Ok(ContactGroup::new(created, Vec::new()).consolidate());
        }

        let primary_id = self.resolve_primary(matches)?;

        let group = self.load_group(primary_id)?;
        if request.adds_to(&group) {
            let created = self.store.insert(&NewContact::secondary(
                primary_id,
                request.email(),
                request.phone_number(),
            ))?;
            info!(
                contact_id = created.id,
                primary_id, "created secondary contact"
            );
        } else {
            debug!(primary_id, "identity already known");
        }

        Ok(self.load_group(primary_id)?.consolidate())
    }

    /// Pick the surviving primary for a non-empty match set, merging groups
    /// when more than one primary matched.
    fn resolve_primary(&self, matches: Vec<Contact>) -> IdentifyResult<ContactId> {
        let (mut primaries, secondaries): (Vec<Contact>, Vec<Contact>) =
            matches.into_iter().partition(Contact::is_primary);

        if primaries.is_empty() {
            // Only secondaries matched: trust the first one's link. Matched
            // secondaries that disagree about their primary are not checked.
            let first = &secondaries[0];
            let linked_id = first.linked_id.ok_or_else(|| {
                IdentifyError::Storage(format!("secondary contact {} has no linked id", first.id))
            })?;
            if secondaries.iter().any(|c| c.linked_id != Some(linked_id)) {
                warn!(
                    primary_id = linked_id,
                    "matched secondaries link to different primaries"
                );
            }
            let primary = self.store.get_by_id(linked_id)?;
            return Ok(primary.id);
        }

        primaries.sort_by_key(Contact::age_key);
        let survivor = primaries.remove(0);

        for loser in &primaries {
            self.demote(loser, survivor.id)?;
        }

        Ok(survivor.id)
    }

    /// Fold `loser`'s group into the group of `survivor_id`.
    fn demote(&self, loser: &Contact, survivor_id: ContactId) -> IdentifyResult<()> {
        let moved = self.store.relink_secondaries(loser.id, survivor_id)?;
        self.store
            .update_linkage(loser.id, LinkPrecedence::Secondary, Some(survivor_id))?;
        info!(
            demoted_id = loser.id,
            primary_id = survivor_id,
            relinked = moved,
            "merged contact groups"
        );
        Ok(())
    }

    fn load_group(&self, primary_id: ContactId) -> IdentifyResult<ContactGroup> {
        let primary = self.store.get_by_id(primary_id)?;
        let secondaries = self.store.get_secondaries_of(primary_id)?;
        Ok(ContactGroup::new(primary, secondaries))
    }

    /// The live group that contains `id`, as primary or as secondary.
    pub fn group_containing(&self, id: ContactId) -> IdentifyResult<ContactGroup> {
        let contact = self.store.get_by_id(id)?;
        self.load_group(contact.group_id())
    }
}
