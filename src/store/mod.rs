//! Persistence of voting items and vote records.
//!
//! [`VotingStore`] is the contract the voting engine relies on. The two
//! correctness-critical operations are [`VotingStore::record_vote`], which
//! must insert a vote and bump the item's cached total atomically while
//! refusing a second vote for the same `(voter, item)`, and
//! [`VotingStore::tally_snapshot`], which must read the item and its vote
//! counts from one consistent snapshot.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{
    common::{OptionId, VoterId},
    db::{NewVotingItem, VoteRecord, VotingItem},
    mongodb::Id,
};

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::{MongoStore, DEFAULT_TRANSACTION_TIME_LIMIT};

/// Outcome of [`VotingStore::record_vote`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VoteInsertion {
    /// The vote was committed and the item's total incremented.
    Recorded,
    /// The voter already has a vote on this item; nothing was written.
    Duplicate,
    /// The item was ended, or the vote fell outside its window; nothing was written.
    ItemClosed,
    /// No such item; nothing was written.
    ItemMissing,
}

/// An item together with its per-option vote counts, read from one snapshot.
#[derive(Debug, Clone)]
pub struct TallySnapshot {
    pub item: VotingItem,
    /// Vote record counts by option. Options without votes may be absent.
    pub counts: HashMap<OptionId, u64>,
}

#[rocket::async_trait]
pub trait VotingStore: Send + Sync {
    /// Durably insert a new item, returning its assigned ID.
    async fn insert_item(&self, item: NewVotingItem) -> Result<Id>;

    /// Point read of an item.
    async fn item(&self, item_id: Id) -> Result<Option<VotingItem>>;

    /// Items that are not ended and whose window contains `now`, soonest closing first.
    async fn open_items(&self, now: DateTime<Utc>) -> Result<Vec<VotingItem>>;

    /// Items whose persisted status is not yet `Ended`.
    async fn unended_items(&self) -> Result<Vec<VotingItem>>;

    /// Persist the `Ended` status. Idempotent; returns false iff the item doesn't exist.
    async fn mark_ended(&self, item_id: Id) -> Result<bool>;

    /// Atomically insert the vote and increment the item's cached total.
    ///
    /// The insert is refused if a vote already exists for the same voter and
    /// item, if the item has been ended, or if the vote's timestamp falls
    /// outside the item's window. The check and the write are one atomic
    /// operation against concurrent callers.
    async fn record_vote(&self, vote: VoteRecord) -> Result<VoteInsertion>;

    async fn has_voted(&self, voter: &VoterId, item_id: Id) -> Result<bool>;

    /// The subset of `item_ids` the voter has voted on.
    async fn voted_items(&self, voter: &VoterId, item_ids: &[Id]) -> Result<HashSet<Id>>;

    /// Read an item and its vote counts from one consistent snapshot.
    async fn tally_snapshot(&self, item_id: Id) -> Result<Option<TallySnapshot>>;
}
