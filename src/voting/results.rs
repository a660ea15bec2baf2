use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::model::{
    api::results::{OptionResult, VotingResults},
    common::OptionId,
    db::VotingItem,
    mongodb::Id,
};
use crate::store::VotingStore;

/// Computes tallies from vote records.
#[derive(Clone)]
pub struct ResultsAggregator {
    store: Arc<dyn VotingStore>,
}

impl ResultsAggregator {
    pub fn new(store: Arc<dyn VotingStore>) -> Self {
        Self { store }
    }

    /// Tally the given item from one consistent snapshot of its votes.
    pub async fn get_voting_results(&self, item_id: Id) -> Result<VotingResults> {
        let snapshot = self
            .store
            .tally_snapshot(item_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("voting item {item_id}")))?;
        Ok(tabulate(&snapshot.item, &snapshot.counts, Utc::now()))
    }
}

/// Turn raw per-option counts into results.
///
/// Every declared option appears, most votes first, ties in declaration
/// order. Counts for undeclared options are ignored, and the total is the
/// sum of the declared counts, so percentages sum to 100 unless nothing has
/// been cast.
pub fn tabulate(
    item: &VotingItem,
    counts: &HashMap<OptionId, u64>,
    now: DateTime<Utc>,
) -> VotingResults {
    let votes_for = |option_id: &OptionId| counts.get(option_id).copied().unwrap_or(0);
    let total_votes: u64 = item
        .options
        .iter()
        .map(|option| votes_for(&option.option_id))
        .sum();

    let mut per_option: Vec<_> = item
        .options
        .iter()
        .map(|option| {
            let votes = votes_for(&option.option_id);
            let percentage = if total_votes > 0 {
                votes as f64 / total_votes as f64 * 100.0
            } else {
                0.0
            };
            OptionResult {
                option_id: option.option_id.clone(),
                option_text: option.text.clone(),
                votes,
                percentage,
            }
        })
        .collect();
    // Stable, so ties keep declaration order.
    per_option.sort_by(|a, b| b.votes.cmp(&a.votes));

    VotingResults {
        item_id: item.id.into(),
        title: item.title.clone(),
        status: item.status_at(now),
        total_votes,
        quorum_required: item.required_quorum,
        quorum_met: total_votes >= u64::from(item.required_quorum),
        per_option,
    }
}
