use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use log::{debug, error, info, trace, warn};
use rocket::{
    fairing::{Fairing, Info, Kind},
    futures::future::{BoxFuture, FutureExt},
    tokio::sync::Mutex,
    Build, Rocket,
};

use crate::error::Result;
use crate::model::{db::VotingItem, mongodb::Id};
use crate::scheduled_task::ScheduledTask;
use crate::store::VotingStore;

use super::VotingEngine;

/// Delay before a failed close is attempted again.
const RETRY_INTERVAL_SECONDS: i64 = 300;

type TaskMap = HashMap<Id, ScheduledTask<Result<()>>>;

/// Item closers: scheduled tasks that persist the `Ended` status of each
/// voting item once its window elapses.
///
/// Votes are refused after `end_date` whether or not the closer has run; the
/// closer just makes the persisted status catch up with the clock.
#[derive(Clone)]
pub struct ItemClosers {
    store: Arc<dyn VotingStore>,
    tasks: Arc<Mutex<TaskMap>>,
}

impl ItemClosers {
    pub fn new(store: Arc<dyn VotingStore>) -> Self {
        Self {
            store,
            tasks: Default::default(),
        }
    }

    /// Does the given item have a closer pending?
    pub async fn has_closer(&self, item_id: Id) -> bool {
        self.tasks.lock().await.contains_key(&item_id)
    }

    /// Schedule a closer for every item not yet marked as ended.
    pub async fn schedule_items(&self) -> Result<usize> {
        let items = self.store.unended_items().await?;
        let count = items.len();
        for item in items {
            self.schedule_item(&item).await;
        }
        Ok(count)
    }

    /// Schedule a closer for the given item, replacing any existing one.
    pub async fn schedule_item(&self, item: &VotingItem) {
        let closer = Self::closer(item.id, self.store.clone(), self.tasks.clone());
        let mut tasks = self.tasks.lock().await;
        if let Some(previous) = tasks.remove(&item.id) {
            if previous.cancel().await {
                // Completed closers remove themselves, so this one raced us.
                debug!("Closer for item {} finished while being replaced", item.id);
            }
        }
        tasks.insert(item.id, ScheduledTask::new(closer, item.end_date));
        trace!("Closer for item {} scheduled for {}", item.id, item.end_date);
    }

    /// Drop the pending closer for an item, e.g. because it was ended early.
    pub async fn cancel_item(&self, item_id: Id) {
        let task = self.tasks.lock().await.remove(&item_id);
        if let Some(task) = task {
            task.cancel().await;
            trace!("Cancelled closer for item {item_id}");
        }
    }

    /// Close the item, rescheduling on failure. This is a recursive async
    /// function, so it has to be boxed.
    fn closer(
        item_id: Id,
        store: Arc<dyn VotingStore>,
        tasks: Arc<Mutex<TaskMap>>,
    ) -> BoxFuture<'static, Result<()>> {
        async move {
            debug!("Running closer for item {item_id}");
            let result = store.mark_ended(item_id).await;
            match result {
                Ok(true) => {
                    tasks.lock().await.remove(&item_id);
                    info!("Voting window for item {item_id} elapsed, marked as ended");
                    Ok(())
                }
                Ok(false) => {
                    tasks.lock().await.remove(&item_id);
                    warn!("Closer for item {item_id} found no such item");
                    Ok(())
                }
                Err(e) => {
                    error!("Closer for item {item_id} failed: {e}");
                    let retry = Self::closer(item_id, store, tasks.clone());
                    let retry_at = Utc::now() + Duration::seconds(RETRY_INTERVAL_SECONDS);
                    tasks
                        .lock()
                        .await
                        .insert(item_id, ScheduledTask::new(retry, retry_at));
                    warn!("Failed closer will be retried in {RETRY_INTERVAL_SECONDS} seconds");
                    Err(e)
                }
            }
        }
        .boxed()
    }
}

/// A fairing that schedules closers for all unended items during ignition and
/// places an [`ItemClosers`] into managed state. Must be attached after the
/// fairing that manages the [`VotingEngine`].
pub struct ItemCloserFairing;

#[rocket::async_trait]
impl Fairing for ItemCloserFairing {
    fn info(&self) -> Info {
        Info {
            name: "Item Closers",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let engine = match rocket.state::<VotingEngine>() {
            Some(engine) => engine,
            None => {
                error!("Voting engine was not available when scheduling item closers");
                return Err(rocket);
            }
        };
        let closers = ItemClosers::new(engine.store().clone());
        match closers.schedule_items().await {
            Ok(count) => info!("Scheduled closers for {count} voting items"),
            Err(e) => {
                error!("Failed to schedule item closers: {e}");
                return Err(rocket);
            }
        }
        Ok(rocket.manage(closers))
    }
}
