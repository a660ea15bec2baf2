use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rocket::tokio::sync::Mutex;

use crate::error::Result;
use crate::model::{
    common::{ItemStatus, VoterId},
    db::{NewVotingItem, VoteRecord, VotingItem},
    mongodb::Id,
};

use super::{TallySnapshot, VoteInsertion, VotingStore};

/// A store held entirely in process memory.
///
/// One lock guards items and votes together, so every operation is a
/// serialisable transaction. Suitable for local runs and tests; nothing
/// survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    items: HashMap<Id, VotingItem>,
    /// Keyed by `(item, voter)`, which is what makes duplicates impossible.
    votes: HashMap<(Id, VoterId), VoteRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All vote records for an item, in no particular order.
    pub async fn votes_for(&self, item_id: Id) -> Vec<VoteRecord> {
        let state = self.state.lock().await;
        state
            .votes
            .values()
            .filter(|vote| vote.item_id == item_id)
            .cloned()
            .collect()
    }
}

#[rocket::async_trait]
impl VotingStore for MemoryStore {
    async fn insert_item(&self, item: NewVotingItem) -> Result<Id> {
        let id = Id::new();
        self.state
            .lock()
            .await
            .items
            .insert(id, VotingItem::new(id, item));
        Ok(id)
    }

    async fn item(&self, item_id: Id) -> Result<Option<VotingItem>> {
        Ok(self.state.lock().await.items.get(&item_id).cloned())
    }

    async fn open_items(&self, now: DateTime<Utc>) -> Result<Vec<VotingItem>> {
        let state = self.state.lock().await;
        let mut items: Vec<_> = state
            .items
            .values()
            .filter(|item| item.is_open_at(now))
            .cloned()
            .collect();
        items.sort_by_key(|item| (item.end_date, item.id));
        Ok(items)
    }

    async fn unended_items(&self) -> Result<Vec<VotingItem>> {
        let state = self.state.lock().await;
        Ok(state
            .items
            .values()
            .filter(|item| item.status != ItemStatus::Ended)
            .cloned()
            .collect())
    }

    async fn mark_ended(&self, item_id: Id) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.items.get_mut(&item_id) {
            Some(item) => {
                item.status = ItemStatus::Ended;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_vote(&self, mut vote: VoteRecord) -> Result<VoteInsertion> {
        let mut state = self.state.lock().await;
        let MemoryState { items, votes } = &mut *state;

        let item = match items.get_mut(&vote.item_id) {
            Some(item) => item,
            None => return Ok(VoteInsertion::ItemMissing),
        };
        if !item.is_open_at(vote.timestamp) {
            return Ok(VoteInsertion::ItemClosed);
        }
        let key = (vote.item_id, vote.voter_id.clone());
        if votes.contains_key(&key) {
            return Ok(VoteInsertion::Duplicate);
        }

        vote.verified = true;
        votes.insert(key, vote);
        item.total_votes += 1;
        Ok(VoteInsertion::Recorded)
    }

    async fn has_voted(&self, voter: &VoterId, item_id: Id) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state.votes.contains_key(&(item_id, voter.clone())))
    }

    async fn voted_items(&self, voter: &VoterId, item_ids: &[Id]) -> Result<HashSet<Id>> {
        let state = self.state.lock().await;
        Ok(item_ids
            .iter()
            .filter(|&&item_id| state.votes.contains_key(&(item_id, voter.clone())))
            .copied()
            .collect())
    }

    async fn tally_snapshot(&self, item_id: Id) -> Result<Option<TallySnapshot>> {
        let state = self.state.lock().await;
        let item = match state.items.get(&item_id) {
            Some(item) => item.clone(),
            None => return Ok(None),
        };
        let mut counts = HashMap::new();
        for vote in state.votes.values().filter(|vote| vote.item_id == item_id) {
            *counts.entry(vote.option_id.clone()).or_insert(0) += 1;
        }
        Ok(Some(TallySnapshot { item, counts }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use rocket::tokio;

    #[rocket::async_test]
    async fn second_vote_is_refused_and_total_tracks_records() {
        let store = MemoryStore::new();
        let item_id = store
            .insert_item(NewVotingItem::active_example())
            .await
            .unwrap();

        let vote = VoteRecord::new("U1".into(), item_id, "support".into());
        assert_eq!(
            store.record_vote(vote).await.unwrap(),
            VoteInsertion::Recorded
        );
        let again = VoteRecord::new("U1".into(), item_id, "oppose".into());
        assert_eq!(
            store.record_vote(again).await.unwrap(),
            VoteInsertion::Duplicate
        );

        let item = store.item(item_id).await.unwrap().unwrap();
        let records = store.votes_for(item_id).await;
        assert_eq!(records.len(), 1);
        assert!(records[0].verified);
        assert_eq!(item.total_votes, records.len() as u64);
    }

    #[rocket::async_test]
    async fn ended_and_missing_items_refuse_votes() {
        let store = MemoryStore::new();
        let item_id = store
            .insert_item(NewVotingItem::active_example())
            .await
            .unwrap();
        assert!(store.mark_ended(item_id).await.unwrap());
        assert!(store.mark_ended(item_id).await.unwrap());

        let vote = VoteRecord::new("U1".into(), item_id, "support".into());
        assert_eq!(
            store.record_vote(vote).await.unwrap(),
            VoteInsertion::ItemClosed
        );

        let missing = Id::new();
        assert!(!store.mark_ended(missing).await.unwrap());
        let vote = VoteRecord::new("U1".into(), missing, "support".into());
        assert_eq!(
            store.record_vote(vote).await.unwrap(),
            VoteInsertion::ItemMissing
        );
    }

    #[rocket::async_test]
    async fn concurrent_duplicates_record_exactly_once() {
        let store = Arc::new(MemoryStore::new());
        let item_id = store
            .insert_item(NewVotingItem::active_example())
            .await
            .unwrap();

        let attempts = (0..16).map(|i| {
            let store = store.clone();
            let option = if i % 2 == 0 { "support" } else { "oppose" };
            tokio::spawn(async move {
                let vote = VoteRecord::new("U1".into(), item_id, option.into());
                store.record_vote(vote).await.unwrap()
            })
        });
        let mut outcomes = Vec::new();
        for attempt in attempts.collect::<Vec<_>>() {
            outcomes.push(attempt.await.unwrap());
        }

        let recorded = outcomes
            .iter()
            .filter(|&&o| o == VoteInsertion::Recorded)
            .count();
        assert_eq!(recorded, 1);
        assert!(outcomes
            .iter()
            .all(|&o| o == VoteInsertion::Recorded || o == VoteInsertion::Duplicate));
        assert_eq!(store.votes_for(item_id).await.len(), 1);
    }

    #[rocket::async_test]
    async fn open_items_and_voted_items() {
        let store = MemoryStore::new();
        let open = store
            .insert_item(NewVotingItem::active_example())
            .await
            .unwrap();
        let past = store
            .insert_item(NewVotingItem::past_example())
            .await
            .unwrap();
        let future = store
            .insert_item(NewVotingItem::future_example())
            .await
            .unwrap();

        let listed: Vec<_> = store
            .open_items(Utc::now())
            .await
            .unwrap()
            .into_iter()
            .map(|item| item.id)
            .collect();
        assert_eq!(listed, vec![open]);

        let unended: HashSet<_> = store
            .unended_items()
            .await
            .unwrap()
            .into_iter()
            .map(|item| item.id)
            .collect();
        assert_eq!(unended, HashSet::from([open, future]));

        let voter = VoterId::from("U1");
        store
            .record_vote(VoteRecord::new(voter.clone(), open, "support".into()))
            .await
            .unwrap();
        assert!(store.has_voted(&voter, open).await.unwrap());
        assert!(!store.has_voted(&voter, past).await.unwrap());
        assert_eq!(
            store
                .voted_items(&voter, &[open, past, future])
                .await
                .unwrap(),
            HashSet::from([open])
        );
    }
}
