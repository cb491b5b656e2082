use serde::{Deserialize, Serialize};

use super::{Contact, ContactId};

/// A primary contact and every live secondary linked to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactGroup {
    pub primary: Contact,
    pub secondaries: Vec<Contact>,
}

impl ContactGroup {
    pub fn new(primary: Contact, secondaries: Vec<Contact>) -> Self {
        Self {
            primary,
            secondaries,
        }
    }

    /// Primary first, then secondaries in store order.
    pub fn members(&self) -> impl Iterator<Item = &Contact> {
        std::iter::once(&self.primary).chain(self.secondaries.iter())
    }

    pub fn has_email(&self, email: &str) -> bool {
        self.members().any(|c| c.email.as_deref() == Some(email))
    }

    pub fn has_phone_number(&self, phone_number: &str) -> bool {
        self.members()
            .any(|c| c.phone_number.as_deref() == Some(phone_number))
    }

    /// Distinct non-empty emails, primary's first, in first-seen order.
    pub fn emails(&self) -> Vec<String> {
        collect_distinct(self.members().map(|c| c.email.as_deref()))
    }

    /// Distinct non-empty phone numbers, primary's first, in first-seen order.
    pub fn phone_numbers(&self) -> Vec<String> {
        collect_distinct(self.members().map(|c| c.phone_number.as_deref()))
    }

    pub fn secondary_ids(&self) -> Vec<ContactId> {
        self.secondaries.iter().map(|c| c.id).collect()
    }

    pub fn consolidate(&self) -> ConsolidatedContact {
        ConsolidatedContact {
            primary_contact_id: self.primary.id,
            emails: self.emails(),
            phone_numbers: self.phone_numbers(),
            secondary_contact_ids: self.secondary_ids(),
        }
    }
}

fn collect_distinct<'a>(values: impl Iterator<Item = Option<&'a str>>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in values.flatten() {
        if !value.is_empty() && !out.iter().any(|v| v == value) {
            out.push(value.to_string());
        }
    }
    out
}

/// The consolidated view of one identity group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidatedContact {
    // The misspelling is part of the public wire format.
    #[serde(rename = "primaryContatctId")]
    pub primary_contact_id: ContactId,
    pub emails: Vec<String>,
    #[serde(rename = "phoneNumbers")]
    pub phone_numbers: Vec<String>,
    #[serde(rename = "secondaryContactIds")]
    pub secondary_contact_ids: Vec<ContactId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LinkPrecedence;
    use chrono::Utc;

    fn contact(id: ContactId, email: Option<&str>, phone: Option<&str>, linked: Option<ContactId>) -> Contact {
        let now = Utc::now();
        Contact {
            id,
            email: email.map(str::to_string),
            phone_number: phone.map(str::to_string),
            linked_id: linked,
            link_precedence: if linked.is_some() {
                LinkPrecedence::Secondary
            } else {
                LinkPrecedence::Primary
            },
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn test_primary_data_comes_first() {
        let group = ContactGroup::new(
            contact(1, Some("a@x.com"), Some("111"), None),
            vec![
                contact(2, Some("b@x.com"), Some("111"), Some(1)),
                contact(3, Some("a@x.com"), Some("222"), Some(1)),
            ],
        );

        let consolidated = group.consolidate();
        assert_eq!(consolidated.primary_contact_id, 1);
        assert_eq!(consolidated.emails, vec!["a@x.com", "b@x.com"]);
        assert_eq!(consolidated.phone_numbers, vec!["111", "222"]);
        assert_eq!(consolidated.secondary_contact_ids, vec![2, 3]);
    }

    #[test]
    fn test_skips_missing_and_empty_values() {
        let group = ContactGroup::new(
            contact(1, None, Some("111"), None),
            vec![contact(2, Some(""), None, Some(1)), contact(3, Some("c@x.com"), None, Some(1))],
        );

        assert_eq!(group.emails(), vec!["c@x.com"]);
        assert_eq!(group.phone_numbers(), vec!["111"]);
    }

    #[test]
    fn test_membership_checks() {
        let group = ContactGroup::new(
            contact(1, Some("a@x.com"), None, None),
            vec![contact(2, None, Some("222"), Some(1))],
        );

        assert!(group.has_email("a@x.com"));
        assert!(group.has_phone_number("222"));
        assert!(!group.has_email("b@x.com"));
        assert!(!group.has_phone_number("111"));
    }

    #[test]
    fn test_wire_format() {
        let consolidated = ConsolidatedContact {
            primary_contact_id: 1,
            emails: vec!["a@x.com".to_string()],
            phone_numbers: vec![],
            secondary_contact_ids: vec![],
        };
        let json = serde_json::to_string(&consolidated).unwrap();
        assert_eq!(
            json,
            r#"{"primaryContatctId":1,"emails":["a@x.com"],"phoneNumbers":[],"secondaryContactIds":[]}"#
        );
    }
}
