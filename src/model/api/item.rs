use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::model::{
    common::{Eligibility, ItemStatus, ItemType, Jurisdiction, OptionId, VoterId, VotingOption},
    db::{NewVotingItem, VotingItem},
};

use super::ApiId;

/// A voting item specification, as submitted by an administrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingItemSpec {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    /// Options in display order; at least two.
    pub options: Vec<VotingOption>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub jurisdiction: Jurisdiction,
    #[serde(default)]
    pub required_quorum: u32,
    #[serde(default)]
    pub eligible_voters: Eligibility,
    /// Set by internal callers only.
    #[serde(skip)]
    pub created_by: Option<VoterId>,
    /// Set by internal callers only.
    #[serde(skip)]
    pub bill_id: Option<String>,
}

impl VotingItemSpec {
    /// Check the structural invariants of the spec.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        if self.options.len() < 2 {
            return Err(ValidationError::TooFewOptions(self.options.len()));
        }
        if self.end_date <= self.start_date {
            return Err(ValidationError::InvalidWindow);
        }
        let mut seen = HashSet::new();
        for option in &self.options {
            if option.option_id.as_str().is_empty() {
                return Err(ValidationError::EmptyOptionId);
            }
            if !seen.insert(&option.option_id) {
                return Err(ValidationError::DuplicateOption(
                    option.option_id.to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Validate this spec and convert it into a storable item with its initial status.
    pub fn into_item(self, now: DateTime<Utc>) -> Result<NewVotingItem, ValidationError> {
        self.validate()?;
        Ok(NewVotingItem {
            status: ItemStatus::for_window(self.start_date, self.end_date, now),
            title: self.title,
            description: self.description,
            item_type: self.item_type,
            options: self.options,
            start_date: self.start_date,
            end_date: self.end_date,
            jurisdiction: self.jurisdiction,
            eligible_voters: self.eligible_voters,
            required_quorum: self.required_quorum,
            total_votes: 0,
            created_by: self.created_by,
            bill_id: self.bill_id,
        })
    }
}

/// Response to a successful item creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemCreated {
    pub item_id: ApiId,
}

/// A vote submission; the voter's identity comes from their auth token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub option_id: OptionId,
}

/// API-friendly view of a voting item for a particular caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemView {
    pub id: ApiId,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub options: Vec<VotingOption>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// Effective status at the time the view was built.
    pub status: ItemStatus,
    pub jurisdiction: Jurisdiction,
    pub eligible_voters: Eligibility,
    pub required_quorum: u32,
    pub total_votes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bill_id: Option<String>,
    /// Whether the calling voter has already voted; always false for anonymous callers.
    pub user_has_voted: bool,
}

impl ItemView {
    pub fn new(item: VotingItem, now: DateTime<Utc>, user_has_voted: bool) -> Self {
        let status = item.status_at(now);
        let VotingItem { id, item } = item;
        Self {
            id: id.into(),
            title: item.title,
            description: item.description,
            item_type: item.item_type,
            options: item.options,
            start_date: item.start_date,
            end_date: item.end_date,
            status,
            jurisdiction: item.jurisdiction,
            eligible_voters: item.eligible_voters,
            required_quorum: item.required_quorum,
            total_votes: item.total_votes,
            bill_id: item.bill_id,
            user_has_voted,
        }
    }
}
