use std::sync::Arc;

use chrono::Utc;
use log::{debug, info};

use crate::error::{
    AuthorizationError, ConflictReason, Error, Result, StateReason, ValidationError,
};
use crate::model::{
    api::{item::ItemView, item::VotingItemSpec, results::VotingResults},
    common::{ItemStatus, OptionId, VoterId},
    db::{VoteRecord, VotingItem},
    mongodb::Id,
};
use crate::store::{VoteInsertion, VotingStore};

use super::results::ResultsAggregator;

/// Entry point for all voting operations.
///
/// Holds no locks of its own; every invariant that must survive concurrent
/// callers is enforced by the [`VotingStore`].
#[derive(Clone)]
pub struct VotingEngine {
    store: Arc<dyn VotingStore>,
}

impl VotingEngine {
    pub fn new(store: Arc<dyn VotingStore>) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn VotingStore> {
        &self.store
    }

    /// A results aggregator over the same store.
    pub fn results(&self) -> ResultsAggregator {
        ResultsAggregator::new(self.store.clone())
    }

    /// Validate and persist a new voting item.
    pub async fn create_voting_item(&self, spec: VotingItemSpec) -> Result<Id> {
        let item = spec.into_item(Utc::now())?;
        let title = item.title.clone();
        let item_id = self.store.insert_item(item).await?;
        info!("Created voting item {item_id} ({title})");
        Ok(item_id)
    }

    /// Fetch an item, or fail with `NotFound`.
    pub async fn voting_item(&self, item_id: Id) -> Result<VotingItem> {
        self.store
            .item(item_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("voting item {item_id}")))
    }

    /// Record `voter`'s choice of `option_id` on the given item.
    pub async fn cast_vote(&self, voter: &VoterId, item_id: Id, option_id: &OptionId) -> Result<()> {
        let item = self.voting_item(item_id).await?;

        let now = Utc::now();
        match item.status_at(now) {
            ItemStatus::Active => {}
            ItemStatus::Upcoming => {
                return Err(Error::State {
                    item_id,
                    reason: StateReason::VotingNotOpen,
                })
            }
            ItemStatus::Ended => {
                return Err(Error::State {
                    item_id,
                    reason: StateReason::VotingClosed,
                })
            }
        }
        if !item.eligible_voters.permits(voter) {
            return Err(AuthorizationError::NotEligible(item_id).into());
        }
        if item.option(option_id).is_none() {
            return Err(ValidationError::InvalidOption(option_id.to_string()).into());
        }

        let vote = VoteRecord::new(voter.clone(), item_id, option_id.clone());
        match self.store.record_vote(vote).await? {
            VoteInsertion::Recorded => {
                debug!("Recorded vote by {voter} on item {item_id}");
                Ok(())
            }
            VoteInsertion::Duplicate => Err(Error::Conflict {
                item_id,
                reason: ConflictReason::DuplicateVote,
            }),
            // Ended (or the window elapsed) between our check and the insert.
            VoteInsertion::ItemClosed => Err(Error::State {
                item_id,
                reason: StateReason::VotingClosed,
            }),
            VoteInsertion::ItemMissing => {
                Err(Error::not_found(format!("voting item {item_id}")))
            }
        }
    }

    pub async fn has_user_voted(&self, voter: &VoterId, item_id: Id) -> Result<bool> {
        self.store.has_voted(voter, item_id).await
    }

    /// Fetch an item with its effective status. `userHasVoted` is only ever
    /// true when a voter is given.
    pub async fn get_voting_item(&self, item_id: Id, voter: Option<&VoterId>) -> Result<ItemView> {
        let item = self.voting_item(item_id).await?;
        let user_has_voted = match voter {
            Some(voter) => self.store.has_voted(voter, item_id).await?,
            None => false,
        };
        Ok(ItemView::new(item, Utc::now(), user_has_voted))
    }

    /// Items currently open for voting, soonest closing first, annotated for the given voter.
    pub async fn get_active_voting_items(&self, voter: &VoterId) -> Result<Vec<ItemView>> {
        let now = Utc::now();
        let items = self.store.open_items(now).await?;
        let ids: Vec<_> = items.iter().map(|item| item.id).collect();
        let voted = self.store.voted_items(voter, &ids).await?;
        Ok(items
            .into_iter()
            .map(|item| {
                let has_voted = voted.contains(&item.id);
                ItemView::new(item, now, has_voted)
            })
            .collect())
    }

    /// End voting on an item, returning its final results. Ending an already
    /// ended item just returns the results again.
    pub async fn end_voting(&self, item_id: Id) -> Result<VotingResults> {
        if !self.store.mark_ended(item_id).await? {
            return Err(Error::not_found(format!("voting item {item_id}")));
        }
        info!("Ended voting on item {item_id}");
        self.results().get_voting_results(item_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;

    use rocket::tokio;

    use crate::store::MemoryStore;

    fn engine() -> VotingEngine {
        VotingEngine::new(Arc::new(MemoryStore::new()))
    }

    fn assert_state(result: Result<()>, expected: StateReason) {
        match result {
            Err(Error::State { reason, .. }) => assert_eq!(reason, expected),
            other => panic!("expected state error {expected:?}, got {other:?}"),
        }
    }

    #[rocket::async_test]
    async fn votes_are_counted_once_per_voter() {
        let engine = engine();
        let item_id = engine
            .create_voting_item(VotingItemSpec::current_example())
            .await
            .unwrap();

        let (u1, u2) = (VoterId::from("U1"), VoterId::from("U2"));
        engine.cast_vote(&u1, item_id, &"support".into()).await.unwrap();
        engine.cast_vote(&u2, item_id, &"support".into()).await.unwrap();
        let again = engine.cast_vote(&u1, item_id, &"oppose".into()).await;
        assert!(matches!(
            again,
            Err(Error::Conflict {
                reason: ConflictReason::DuplicateVote,
                ..
            })
        ));

        let results = engine.results().get_voting_results(item_id).await.unwrap();
        let summary: Vec<_> = results
            .per_option
            .iter()
            .map(|opt| (opt.option_id.as_str(), opt.votes, opt.percentage))
            .collect();
        assert_eq!(
            summary,
            vec![("support", 2, 100.0), ("oppose", 0, 0.0), ("abstain", 0, 0.0)]
        );
        assert_eq!(results.total_votes, 2);
        assert!(results.quorum_met);

        let item = engine.voting_item(item_id).await.unwrap();
        assert_eq!(item.total_votes, 2);
    }

    #[rocket::async_test]
    async fn past_items_refuse_every_vote() {
        let engine = engine();
        let item_id = engine
            .create_voting_item(VotingItemSpec::past_example())
            .await
            .unwrap();

        for voter in ["U1", "U2", "U3"] {
            let result = engine
                .cast_vote(&voter.into(), item_id, &"support".into())
                .await;
            assert_state(result, StateReason::VotingClosed);
        }
        assert!(!engine.has_user_voted(&"U1".into(), item_id).await.unwrap());
    }

    #[rocket::async_test]
    async fn upcoming_items_are_not_open() {
        let engine = engine();
        let item_id = engine
            .create_voting_item(VotingItemSpec::future_example())
            .await
            .unwrap();
        let result = engine.cast_vote(&"U1".into(), item_id, &"support".into()).await;
        assert_state(result, StateReason::VotingNotOpen);
    }

    #[rocket::async_test]
    async fn restricted_items_refuse_other_voters() {
        let engine = engine();
        let item_id = engine
            .create_voting_item(VotingItemSpec::restricted_example(&["U1", "U2"]))
            .await
            .unwrap();

        let result = engine.cast_vote(&"U3".into(), item_id, &"support".into()).await;
        match result {
            Err(Error::Authorization(AuthorizationError::NotEligible(id))) => {
                assert_eq!(id, item_id)
            }
            other => panic!("expected NotEligible, got {other:?}"),
        }
        engine
            .cast_vote(&"U2".into(), item_id, &"oppose".into())
            .await
            .unwrap();
    }

    #[rocket::async_test]
    async fn checks_run_in_order() {
        let engine = engine();

        // Missing item beats everything.
        let missing = engine.cast_vote(&"U3".into(), Id::new(), &"nope".into()).await;
        assert!(matches!(missing, Err(Error::NotFound(_))));

        // Closed beats ineligible.
        let mut spec = VotingItemSpec::restricted_example(&["U1"]);
        spec.start_date = VotingItemSpec::past_example().start_date;
        spec.end_date = VotingItemSpec::past_example().end_date;
        let closed = engine.create_voting_item(spec).await.unwrap();
        let result = engine.cast_vote(&"U3".into(), closed, &"nope".into()).await;
        assert_state(result, StateReason::VotingClosed);

        // Ineligible beats an unknown option.
        let restricted = engine
            .create_voting_item(VotingItemSpec::restricted_example(&["U1"]))
            .await
            .unwrap();
        let result = engine.cast_vote(&"U3".into(), restricted, &"nope".into()).await;
        assert!(matches!(result, Err(Error::Authorization(_))));

        let result = engine.cast_vote(&"U1".into(), restricted, &"nope".into()).await;
        match result {
            Err(Error::Validation(ValidationError::InvalidOption(option))) => {
                assert_eq!(option, "nope")
            }
            other => panic!("expected InvalidOption, got {other:?}"),
        }
        assert!(!engine.has_user_voted(&"U1".into(), restricted).await.unwrap());
    }

    #[rocket::async_test]
    async fn invalid_specs_create_nothing() {
        let engine = engine();
        let mut spec = VotingItemSpec::current_example();
        spec.options.truncate(1);
        let result = engine.create_voting_item(spec).await;
        assert!(matches!(
            result,
            Err(Error::Validation(ValidationError::TooFewOptions(1)))
        ));
        assert!(engine
            .store()
            .unended_items()
            .await
            .unwrap()
            .is_empty());
    }

    #[rocket::async_test]
    async fn ending_voting_is_idempotent_and_final() {
        let engine = engine();
        let item_id = engine
            .create_voting_item(VotingItemSpec::current_example())
            .await
            .unwrap();
        engine
            .cast_vote(&"U1".into(), item_id, &"oppose".into())
            .await
            .unwrap();

        let first = engine.end_voting(item_id).await.unwrap();
        assert_eq!(first.status, ItemStatus::Ended);
        assert_eq!(first.total_votes, 1);
        assert!(!first.quorum_met);
        let second = engine.end_voting(item_id).await.unwrap();
        assert_eq!(first, second);

        let late = engine.cast_vote(&"U2".into(), item_id, &"support".into()).await;
        assert_state(late, StateReason::VotingClosed);

        assert!(matches!(
            engine.end_voting(Id::new()).await,
            Err(Error::NotFound(_))
        ));
    }

    #[rocket::async_test]
    async fn item_views_report_status_and_own_vote() {
        let engine = engine();
        let open = engine
            .create_voting_item(VotingItemSpec::current_example())
            .await
            .unwrap();
        let voted = engine
            .create_voting_item(VotingItemSpec::current_example())
            .await
            .unwrap();
        let upcoming = engine
            .create_voting_item(VotingItemSpec::future_example())
            .await
            .unwrap();
        let voter = VoterId::from("U1");
        engine
            .cast_vote(&voter, voted, &"support".into())
            .await
            .unwrap();

        let active = engine.get_active_voting_items(&voter).await.unwrap();
        let ids: HashSet<_> = active.iter().map(|view| *view.id).collect();
        assert_eq!(ids, HashSet::from([open, voted]));
        for view in &active {
            assert_eq!(view.status, ItemStatus::Active);
            assert_eq!(view.user_has_voted, *view.id == voted);
        }

        let view = engine.get_voting_item(voted, Some(&voter)).await.unwrap();
        assert!(view.user_has_voted);
        assert_eq!(view.total_votes, 1);
        let anonymous = engine.get_voting_item(voted, None).await.unwrap();
        assert!(!anonymous.user_has_voted);
        let view = engine.get_voting_item(upcoming, Some(&voter)).await.unwrap();
        assert_eq!(view.status, ItemStatus::Upcoming);
        assert!(matches!(
            engine.get_voting_item(Id::new(), None).await,
            Err(Error::NotFound(_))
        ));
    }

    #[rocket::async_test]
    async fn racing_voters_keep_total_equal_to_records() {
        let engine = engine();
        let item_id = engine
            .create_voting_item(VotingItemSpec::current_example())
            .await
            .unwrap();

        // Twenty voters, each submitting three times with different options.
        let mut handles = Vec::new();
        for attempt in 0..3 {
            for voter in 0..20 {
                let engine = engine.clone();
                let option = ["support", "oppose", "abstain"][(voter + attempt) % 3];
                handles.push(tokio::spawn(async move {
                    engine
                        .cast_vote(&format!("U{voter}").into(), item_id, &option.into())
                        .await
                }));
            }
        }
        let mut accepted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => accepted += 1,
                Err(Error::Conflict { .. }) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(accepted, 20);

        let results = engine.results().get_voting_results(item_id).await.unwrap();
        assert_eq!(results.total_votes, 20);
        let counted: u64 = results.per_option.iter().map(|opt| opt.votes).sum();
        assert_eq!(counted, 20);
        assert_eq!(engine.voting_item(item_id).await.unwrap().total_votes, 20);
    }
}
