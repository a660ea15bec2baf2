use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use mongodb::{
    bson::{doc, DateTime as BsonDateTime},
    error::{Error as DbError, UNKNOWN_TRANSACTION_COMMIT_RESULT},
    options::{FindOptions, SessionOptions},
    Client, ClientSession, Database,
};
use rand::Rng;
use rocket::{
    futures::TryStreamExt,
    tokio::{self, time::Instant},
};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::model::{
    common::{ItemStatus, OptionId, VoterId},
    db::{NewVotingItem, VoteRecord, VotingItem},
    mongodb::{is_duplicate_key_error, is_transient_transaction_error, Coll},
};
use crate::model::mongodb::Id;

use super::{TallySnapshot, VoteInsertion, VotingStore};

/// How long to keep retrying a vote transaction, as the driver's own `with_transaction` does.
pub const DEFAULT_TRANSACTION_TIME_LIMIT: Duration = Duration::from_secs(120);

/// Smallest upper bound on the randomised wait between transaction attempts.
const BASE_BACKOFF: Duration = Duration::from_millis(5);

/// The upper bound stops doubling after this many attempts.
const MAX_BACKOFF_DOUBLINGS: u32 = 6;

/// A store backed by MongoDB.
///
/// Requires a replica set (or sharded cluster), since votes are recorded in
/// multi-document transactions.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    items: Coll<VotingItem>,
    new_items: Coll<NewVotingItem>,
    votes: Coll<VoteRecord>,
    transaction_time_limit: Duration,
}

/// One row of the per-option count aggregation.
#[derive(Debug, Deserialize)]
struct OptionCount {
    #[serde(rename = "_id")]
    option_id: OptionId,
    votes: u64,
}

impl MongoStore {
    /// Wrap the given database. Indexes must already exist, see
    /// [`crate::model::mongodb::ensure_indexes_exist`].
    ///
    /// Vote transactions that keep failing transiently are retried until
    /// `transaction_time_limit` has passed, then reported as errors.
    pub fn new(client: Client, db: &Database, transaction_time_limit: Duration) -> Self {
        Self {
            client,
            items: Coll::from_db(db),
            new_items: Coll::from_db(db),
            votes: Coll::from_db(db),
            transaction_time_limit,
        }
    }

    /// One attempt at the vote transaction.
    async fn try_record_vote(
        &self,
        vote: &VoteRecord,
        deadline: Instant,
    ) -> std::result::Result<VoteInsertion, DbError> {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;

        // Bumping the cached total doubles as the open-item check, and makes
        // this transaction conflict with any concurrent `mark_ended`.
        let at = BsonDateTime::from_chrono(vote.timestamp);
        let filter = doc! {
            "_id": vote.item_id,
            "status": { "$ne": ItemStatus::Ended },
            "start_date": { "$lte": at },
            "end_date": { "$gt": at },
        };
        let update = doc! {
            "$inc": { "total_votes": 1_i64 }
        };
        let result = self
            .items
            .update_one_with_session(filter, update, None, &mut session)
            .await?;
        if result.matched_count == 0 {
            session.abort_transaction().await?;
            let exists = self.items.find_one(vote.item_id.as_doc(), None).await?;
            return Ok(match exists {
                Some(_) => VoteInsertion::ItemClosed,
                None => VoteInsertion::ItemMissing,
            });
        }

        // The unique index on (item_id, voter_id) rejects a second vote; the
        // error aborts the transaction, rolling back the increment.
        self.votes
            .insert_one_with_session(vote, None, &mut session)
            .await?;

        commit_with_retry(&mut session, deadline).await?;
        Ok(VoteInsertion::Recorded)
    }
}

/// Commit, retrying until `deadline` while the server can't say whether the commit happened.
async fn commit_with_retry(session: &mut ClientSession, deadline: Instant) -> std::result::Result<(), DbError> {
    loop {
        match session.commit_transaction().await {
            Err(e) if e.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT) && Instant::now() < deadline => {
                warn!("Vote commit result unknown, retrying commit: {e}");
            }
            result => return result,
        }
    }
}

/// Random wait before retry number `attempt` (counting from zero), with an
/// upper bound that doubles each attempt up to a cap.
fn retry_backoff(attempt: u32) -> Duration {
    let ceiling = BASE_BACKOFF * 2_u32.pow(attempt.min(MAX_BACKOFF_DOUBLINGS));
    let millis = rand::thread_rng().gen_range(1..=ceiling.as_millis() as u64);
    Duration::from_millis(millis)
}

#[rocket::async_trait]
impl VotingStore for MongoStore {
    async fn insert_item(&self, item: NewVotingItem) -> Result<Id> {
        let inserted = self.new_items.insert_one(&item, None).await?;
        let id = inserted
            .inserted_id
            .as_object_id()
            .ok_or_else(|| Error::Internal("Inserted item has no ObjectId".to_string()))?;
        Ok(id.into())
    }

    async fn item(&self, item_id: Id) -> Result<Option<VotingItem>> {
        Ok(self.items.find_one(item_id.as_doc(), None).await?)
    }

    async fn open_items(&self, now: DateTime<Utc>) -> Result<Vec<VotingItem>> {
        let now = BsonDateTime::from_chrono(now);
        let filter = doc! {
            "status": { "$ne": ItemStatus::Ended },
            "start_date": { "$lte": now },
            "end_date": { "$gt": now },
        };
        let options = FindOptions::builder()
            .sort(doc! { "end_date": 1, "_id": 1 })
            .build();
        let items = self
            .items
            .find(filter, options)
            .await?
            .try_collect()
            .await?;
        Ok(items)
    }

    async fn unended_items(&self) -> Result<Vec<VotingItem>> {
        let filter = doc! {
            "status": { "$ne": ItemStatus::Ended },
        };
        let items = self.items.find(filter, None).await?.try_collect().await?;
        Ok(items)
    }

    async fn mark_ended(&self, item_id: Id) -> Result<bool> {
        let update = doc! {
            "$set": { "status": ItemStatus::Ended }
        };
        let result = self
            .items
            .update_one(item_id.as_doc(), update, None)
            .await?;
        Ok(result.matched_count == 1)
    }

    async fn record_vote(&self, mut vote: VoteRecord) -> Result<VoteInsertion> {
        // Only becomes visible once the transaction commits.
        vote.verified = true;

        // Concurrent votes on one item conflict on its total, so contention
        // shows up here as transient errors.
        let deadline = Instant::now() + self.transaction_time_limit;
        let mut attempt = 0;
        loop {
            match self.try_record_vote(&vote, deadline).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if is_duplicate_key_error(&e) => return Ok(VoteInsertion::Duplicate),
                Err(e) if is_transient_transaction_error(&e) => {
                    let backoff = retry_backoff(attempt);
                    if Instant::now() + backoff >= deadline {
                        warn!(
                            "Giving up on vote for item {} after {} attempts: {e}",
                            vote.item_id,
                            attempt + 1
                        );
                        return Err(e.into());
                    }
                    debug!(
                        "Vote transaction for item {} hit a transient error (attempt {}): {e}",
                        vote.item_id,
                        attempt + 1
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn has_voted(&self, voter: &VoterId, item_id: Id) -> Result<bool> {
        let filter = doc! {
            "item_id": item_id,
            "voter_id": voter.as_str(),
        };
        let count = self.votes.count_documents(filter, None).await?;
        Ok(count > 0)
    }

    async fn voted_items(&self, voter: &VoterId, item_ids: &[Id]) -> Result<HashSet<Id>> {
        let filter = doc! {
            "voter_id": voter.as_str(),
            "item_id": { "$in": item_ids.iter().copied().collect::<Vec<_>>() },
        };
        let voted = self
            .votes
            .find(filter, None)
            .await?
            .map_ok(|vote| vote.item_id)
            .try_collect()
            .await?;
        Ok(voted)
    }

    async fn tally_snapshot(&self, item_id: Id) -> Result<Option<TallySnapshot>> {
        // Ensure the item and its counts come from the same point in time.
        let session_options = SessionOptions::builder().snapshot(true).build();
        let mut session = self.client.start_session(Some(session_options)).await?;

        let item = match self
            .items
            .find_one_with_session(item_id.as_doc(), None, &mut session)
            .await?
        {
            Some(item) => item,
            None => return Ok(None),
        };

        let pipeline = vec![
            doc! { "$match": { "item_id": item_id } },
            doc! { "$group": { "_id": "$option_id", "votes": { "$sum": 1 } } },
        ];
        let mut cursor = self
            .votes
            .aggregate_with_session(pipeline, None, &mut session)
            .await?
            .with_type::<OptionCount>();
        let mut counts = HashMap::new();
        while let Some(row) = cursor.next(&mut session).await {
            let row = row?;
            counts.insert(row.option_id, row.votes);
        }

        Ok(Some(TallySnapshot { item, counts }))
    }
}

#[cfg(test)]
mod tests {
    //! Most of these need a MongoDB replica set, given by `MONGO_TEST_URI`.

    use super::*;

    use std::sync::Arc;

    use crate::model::mongodb::ensure_indexes_exist;

    /// Connect to a fresh, randomly named database.
    async fn test_store() -> (MongoStore, Database) {
        let uri = std::env::var("MONGO_TEST_URI").expect("MONGO_TEST_URI not set");
        let client = Client::with_uri_str(uri).await.unwrap();
        let random: u32 = rand::random();
        let db = client.database(&format!("test{random}"));
        ensure_indexes_exist(&db).await.unwrap();
        (MongoStore::new(client, &db, DEFAULT_TRANSACTION_TIME_LIMIT), db)
    }

    #[test]
    fn backoff_grows_to_a_cap() {
        for attempt in 0..20 {
            let backoff = retry_backoff(attempt);
            assert!(backoff >= Duration::from_millis(1));
            assert!(backoff <= BASE_BACKOFF * 2_u32.pow(attempt.min(MAX_BACKOFF_DOUBLINGS)));
        }
        assert!(retry_backoff(0) <= BASE_BACKOFF);
        assert!(retry_backoff(100) <= Duration::from_millis(320));
    }

    #[rocket::async_test]
    async fn unreachable_server_fails_within_the_time_limit() {
        // Nothing listens on the discard port, so every operation fails server selection.
        let client =
            Client::with_uri_str("mongodb://127.0.0.1:9/?serverSelectionTimeoutMS=100&connectTimeoutMS=100")
                .await
                .unwrap();
        let db = client.database("unreachable");
        let store = MongoStore::new(client, &db, Duration::from_secs(1));

        let vote = VoteRecord::new("U1".into(), Id::new(), "support".into());
        let result = tokio::time::timeout(Duration::from_secs(30), store.record_vote(vote))
            .await
            .expect("vote did not give up");
        assert!(matches!(result, Err(Error::Db(_))));
    }

    #[rocket::async_test]
    #[ignore = "requires a MongoDB replica set at MONGO_TEST_URI"]
    async fn vote_transaction_enforces_uniqueness_and_counts() {
        let (store, db) = test_store().await;
        let item_id = store
            .insert_item(NewVotingItem::active_example())
            .await
            .unwrap();

        let first = VoteRecord::new("U1".into(), item_id, "support".into());
        assert_eq!(store.record_vote(first).await.unwrap(), VoteInsertion::Recorded);
        let second = VoteRecord::new("U1".into(), item_id, "oppose".into());
        assert_eq!(store.record_vote(second).await.unwrap(), VoteInsertion::Duplicate);
        let other = VoteRecord::new("U2".into(), item_id, "support".into());
        assert_eq!(store.record_vote(other).await.unwrap(), VoteInsertion::Recorded);

        let snapshot = store.tally_snapshot(item_id).await.unwrap().unwrap();
        assert_eq!(snapshot.item.total_votes, 2);
        assert_eq!(snapshot.counts.get(&"support".into()), Some(&2));
        assert_eq!(snapshot.counts.get(&"oppose".into()), None);

        assert!(store.mark_ended(item_id).await.unwrap());
        let late = VoteRecord::new("U3".into(), item_id, "support".into());
        assert_eq!(store.record_vote(late).await.unwrap(), VoteInsertion::ItemClosed);

        db.drop(None).await.unwrap();
    }

    #[rocket::async_test]
    #[ignore = "requires a MongoDB replica set at MONGO_TEST_URI"]
    async fn concurrent_votes_keep_total_consistent() {
        let (store, db) = test_store().await;
        let store = Arc::new(store);
        let item_id = store
            .insert_item(NewVotingItem::active_example())
            .await
            .unwrap();

        // A hundred voters, each trying twice, all against the same item.
        let handles: Vec<_> = (0..200)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let vote = VoteRecord::new(format!("U{}", i % 100).into(), item_id, "support".into());
                    store.record_vote(vote).await
                })
            })
            .collect();
        let mut recorded = 0;
        let mut duplicates = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(VoteInsertion::Recorded) => recorded += 1,
                Ok(VoteInsertion::Duplicate) => duplicates += 1,
                other => panic!("contended vote ended as {other:?}"),
            }
        }
        assert_eq!(recorded, 100);
        assert_eq!(duplicates, 100);

        let snapshot = store.tally_snapshot(item_id).await.unwrap().unwrap();
        assert_eq!(snapshot.item.total_votes, 100);
        assert_eq!(snapshot.counts.values().sum::<u64>(), 100);

        db.drop(None).await.unwrap();
    }
}
