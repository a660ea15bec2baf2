use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{
    common::{Eligibility, ItemStatus, ItemType, Jurisdiction, OptionId, VoterId, VotingOption},
    mongodb::Id,
};

/// Core voting item data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVotingItem {
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    /// Options in declaration order.
    pub options: Vec<VotingOption>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub start_date: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub end_date: DateTime<Utc>,
    /// Persisted status; only `Ended` overrides the clock, see [`NewVotingItem::status_at`].
    pub status: ItemStatus,
    pub jurisdiction: Jurisdiction,
    pub eligible_voters: Eligibility,
    /// Minimum number of votes for the result to count; zero means no quorum.
    pub required_quorum: u32,
    /// Cached vote count, only ever changed in the same transaction as a vote insert.
    pub total_votes: u64,
    /// Voter who initiated this item, if it wasn't created by an administrator.
    #[serde(default)]
    pub created_by: Option<VoterId>,
    /// Source bill, for items created from legislation.
    #[serde(default)]
    pub bill_id: Option<String>,
}

impl NewVotingItem {
    /// The effective status at the given instant.
    pub fn status_at(&self, now: DateTime<Utc>) -> ItemStatus {
        match self.status {
            ItemStatus::Ended => ItemStatus::Ended,
            _ => ItemStatus::for_window(self.start_date, self.end_date, now),
        }
    }

    /// Can votes be cast at the given instant?
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.status_at(now) == ItemStatus::Active
    }

    /// Look up an option by ID.
    pub fn option(&self, option_id: &OptionId) -> Option<&VotingOption> {
        self.options.iter().find(|opt| &opt.option_id == option_id)
    }
}

/// A voting item from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingItem {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub item: NewVotingItem,
}

impl VotingItem {
    pub fn new(id: Id, item: NewVotingItem) -> Self {
        Self { id, item }
    }
}

impl Deref for VotingItem {
    type Target = NewVotingItem;

    fn deref(&self) -> &Self::Target {
        &self.item
    }
}

impl DerefMut for VotingItem {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.item
    }
}
