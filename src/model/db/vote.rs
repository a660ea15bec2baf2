use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{
    common::{OptionId, VoterId},
    mongodb::Id,
};

/// A single voter's immutable choice on a voting item.
///
/// At most one of these exists per `(voter_id, item_id)`; the store enforces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub voter_id: VoterId,
    pub item_id: Id,
    pub option_id: OptionId,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub timestamp: DateTime<Utc>,
    /// True once the record has been durably committed.
    pub verified: bool,
}

impl VoteRecord {
    /// A record for a vote being cast now. It becomes verified once the store commits it.
    pub fn new(voter_id: VoterId, item_id: Id, option_id: OptionId) -> Self {
        Self {
            voter_id,
            item_id,
            option_id,
            timestamp: Utc::now(),
            verified: false,
        }
    }
}
