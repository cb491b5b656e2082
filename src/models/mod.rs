mod contact;
mod group;

pub use contact::{Contact, ContactId, LinkPrecedence, NewContact};
pub use group::{ConsolidatedContact, ContactGroup};
