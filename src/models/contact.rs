use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned contact id. Increases in creation order.
pub type ContactId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LinkPrecedence {
    #[default]
    Primary,
    Secondary,
}

impl LinkPrecedence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "primary" => Some(Self::Primary),
            "secondary" => Some(Self::Secondary),
            _ => None,
        }
    }
}

impl std::fmt::Display for LinkPrecedence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single identity record as persisted by a contact store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: ContactId,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    /// Id of the group's primary. Set iff `link_precedence` is secondary.
    pub linked_id: Option<ContactId>,
    pub link_precedence: LinkPrecedence,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Contact {
    pub fn is_primary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Primary
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Id of the primary this contact belongs to (itself for a primary).
    pub fn group_id(&self) -> ContactId {
        match self.link_precedence {
            LinkPrecedence::Primary => self.id,
            LinkPrecedence::Secondary => self.linked_id.unwrap_or(self.id),
        }
    }

    /// Ordering key for "oldest": creation time, then id.
    pub fn age_key(&self) -> (DateTime<Utc>, ContactId) {
        (self.created_at, self.id)
    }
}

/// A contact about to be inserted; the store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewContact {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub linked_id: Option<ContactId>,
    pub link_precedence: LinkPrecedence,
}

impl NewContact {
    pub fn primary(email: Option<&str>, phone_number: Option<&str>) -> Self {
        Self {
            email: email.map(str::to_string),
            phone_number: phone_number.map(str::to_string),
            linked_id: None,
            link_precedence: LinkPrecedence::Primary,
        }
    }

    pub fn secondary(primary_id: ContactId, email: Option<&str>, phone_number: Option<&str>) -> Self {
        Self {
            email: email.map(str::to_string),
            phone_number: phone_number.map(str::to_string),
            linked_id: Some(primary_id),
            link_precedence: LinkPrecedence::Secondary,
        }
    }
}
