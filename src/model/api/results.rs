use serde::{Deserialize, Serialize};

use crate::model::common::{ItemStatus, OptionId};

use super::ApiId;

/// Tally of a voting item at the moment it was read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingResults {
    pub item_id: ApiId,
    pub title: String,
    pub status: ItemStatus,
    /// Number of vote records in the snapshot the tally was computed from.
    pub total_votes: u64,
    pub quorum_required: u32,
    pub quorum_met: bool,
    /// Every declared option, most votes first; ties keep declaration order.
    pub per_option: Vec<OptionResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionResult {
    pub option_id: OptionId,
    pub option_text: String,
    pub votes: u64,
    /// Share of `total_votes`, in the range 0 to 100.
    pub percentage: f64,
}
