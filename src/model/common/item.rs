use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use mongodb::bson::{to_bson, Bson};
use rocket::FromFormField;
use serde::{Deserialize, Serialize};

/// Identity of a voter, as supplied by the identity collaborator.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoterId(String);

impl VoterId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for VoterId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for VoterId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl Display for VoterId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of an option, unique within its voting item.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptionId(String);

impl OptionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for OptionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for OptionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl Display for OptionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kinds of things that can be voted on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Bill,
    Petition,
    Referendum,
    Poll,
}

/// States in the voting item lifecycle. Transitions only ever move forward.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Voting window has not started.
    Upcoming,
    /// Inside the voting window.
    Active,
    /// Window elapsed, or ended early by an administrator.
    Ended,
}

impl ItemStatus {
    /// The status implied purely by the clock for the window `[start, end)`.
    pub fn for_window(start: DateTime<Utc>, end: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        if now < start {
            Self::Upcoming
        } else if now < end {
            Self::Active
        } else {
            Self::Ended
        }
    }
}

impl From<ItemStatus> for Bson {
    fn from(status: ItemStatus) -> Self {
        to_bson(&status).expect("Serialisation is infallible")
    }
}

/// Governmental level an item or election date applies to.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, Serialize, Deserialize, FromFormField)]
#[serde(rename_all = "lowercase")]
pub enum Jurisdiction {
    Federal,
    Provincial,
    Municipal,
}

/// Who may vote on an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "voters", rename_all = "lowercase")]
pub enum Eligibility {
    /// Any authenticated voter.
    Everyone,
    /// Only the listed voters. An empty list admits nobody.
    Restricted(BTreeSet<VoterId>),
}

impl Eligibility {
    pub fn permits(&self, voter: &VoterId) -> bool {
        match self {
            Self::Everyone => true,
            Self::Restricted(voters) => voters.contains(voter),
        }
    }
}

impl Default for Eligibility {
    fn default() -> Self {
        Self::Everyone
    }
}

/// A single answer that can be chosen on a voting item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingOption {
    pub option_id: OptionId,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl VotingOption {
    pub fn new(option_id: impl Into<OptionId>, text: impl Into<String>) -> Self {
        Self {
            option_id: option_id.into(),
            text: text.into(),
            description: None,
        }
    }
}
