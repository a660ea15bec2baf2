use std::ops::Deref;

use log::debug;
use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};

use crate::model::db::{NewVotingItem, VoteRecord, VotingItem};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// Voting item collections
const VOTING_ITEMS: &str = "voting_items";
impl MongoCollection for VotingItem {
    const NAME: &'static str = VOTING_ITEMS;
}
impl MongoCollection for NewVotingItem {
    const NAME: &'static str = VOTING_ITEMS;
}

// Vote record collection
const VOTES: &str = "votes";
impl MongoCollection for VoteRecord {
    const NAME: &'static str = VOTES;
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // Vote collection: one vote per voter per item.
    let vote_index = IndexModel::builder()
        .keys(doc! {"item_id": 1, "voter_id": 1})
        .options(unique)
        .build();
    Coll::<VoteRecord>::from_db(db)
        .create_index(vote_index, None)
        .await?;

    // Voting item collection: open-item lookups.
    let item_index = IndexModel::builder()
        .keys(doc! {"status": 1, "end_date": 1})
        .build();
    Coll::<VotingItem>::from_db(db)
        .create_index(item_index, None)
        .await?;

    Ok(())
}
