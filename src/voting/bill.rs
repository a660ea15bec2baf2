use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use log::{debug, error, info, warn};
use reqwest::{StatusCode, Url};
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    api::item::VotingItemSpec,
    common::{Eligibility, ItemType, Jurisdiction, VoterId, VotingOption},
    mongodb::Id,
};

use super::VotingEngine;

/// Legislative bill metadata, as supplied by the bill collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bill {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
}

/// A source of bill metadata.
#[rocket::async_trait]
pub trait BillSource: Send + Sync {
    /// Look up a bill by ID. `Ok(None)` means the source has no such bill.
    async fn bill(&self, bill_id: &str) -> Result<Option<Bill>>;
}

/// Fetches bills from an HTTP API at `{base_url}/bills/{id}`.
pub struct HttpBillSource {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpBillSource {
    /// Fails if `base_url` isn't an absolute URL that can have a path appended.
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Internal(format!("Invalid bill API URL '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Internal(format!("Bill API URL '{base_url}' cannot take a path")));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
        })
    }

    /// The URL for one bill, with the ID as a single escaped path segment.
    /// `None` for IDs that can't name a bill.
    fn bill_url(&self, bill_id: &str) -> Option<Url> {
        // Dot segments would be dropped from the path rather than escaped.
        if bill_id.is_empty() || bill_id == "." || bill_id == ".." {
            return None;
        }
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .ok()?
            .pop_if_empty()
            .push("bills")
            .push(bill_id);
        Some(url)
    }
}

#[rocket::async_trait]
impl BillSource for HttpBillSource {
    async fn bill(&self, bill_id: &str) -> Result<Option<Bill>> {
        let url = match self.bill_url(bill_id) {
            Some(url) => url,
            None => return Ok(None),
        };
        debug!("Fetching bill metadata from {url}");
        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let bill = response.error_for_status()?.json::<Bill>().await?;
        Ok(Some(bill))
    }
}

/// A fixed, in-memory set of bills.
#[derive(Debug, Default)]
pub struct StaticBillSource {
    bills: HashMap<String, Bill>,
}

impl StaticBillSource {
    pub fn new(bills: impl IntoIterator<Item = Bill>) -> Self {
        Self {
            bills: bills
                .into_iter()
                .map(|bill| (bill.id.clone(), bill))
                .collect(),
        }
    }
}

#[rocket::async_trait]
impl BillSource for StaticBillSource {
    async fn bill(&self, bill_id: &str) -> Result<Option<Bill>> {
        Ok(self.bills.get(bill_id).cloned())
    }
}

/// Turns bills into public votes.
#[derive(Clone)]
pub struct BillVoteAdapter {
    bills: Arc<dyn BillSource>,
    engine: VotingEngine,
    window: Duration,
    quorum: u32,
}

impl BillVoteAdapter {
    pub fn new(bills: Arc<dyn BillSource>, engine: VotingEngine, window: Duration, quorum: u32) -> Self {
        Self {
            bills,
            engine,
            window,
            quorum,
        }
    }

    /// Open a federal support/oppose/abstain vote on the given bill, starting now.
    pub async fn create_bill_vote(&self, bill_id: &str, initiator: &VoterId) -> Result<Id> {
        let bill = self
            .bills
            .bill(bill_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("bill {bill_id}")))?;

        let now = Utc::now();
        let spec = VotingItemSpec {
            title: bill.title,
            description: bill.summary,
            item_type: ItemType::Bill,
            options: vec![
                VotingOption::new("support", "Support"),
                VotingOption::new("oppose", "Oppose"),
                VotingOption::new("abstain", "Abstain"),
            ],
            start_date: now,
            end_date: now + self.window,
            jurisdiction: Jurisdiction::Federal,
            required_quorum: self.quorum,
            eligible_voters: Eligibility::Everyone,
            created_by: Some(initiator.clone()),
            bill_id: Some(bill.id),
        };
        let item_id = self.engine.create_voting_item(spec).await?;
        info!("Voter {initiator} opened a vote on bill {bill_id} as item {item_id}");
        Ok(item_id)
    }
}

/// A fairing that places a [`BillVoteAdapter`] into managed state, backed by
/// the HTTP bill API if `bill_api_url` is configured and an empty static
/// source otherwise. Must be attached after the config and storage fairings.
pub struct BillSourceFairing;

#[rocket::async_trait]
impl Fairing for BillSourceFairing {
    fn info(&self) -> Info {
        Info {
            name: "Bill Source",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let (config, engine) = match (rocket.state::<Config>(), rocket.state::<VotingEngine>()) {
            (Some(config), Some(engine)) => (config, engine.clone()),
            _ => {
                error!("Config and voting engine must be managed before the bill source");
                return Err(rocket);
            }
        };
        let bills: Arc<dyn BillSource> = match config.bill_api_url() {
            Some(url) => match HttpBillSource::new(url) {
                Ok(source) => {
                    info!("Using bill API at {url}");
                    Arc::new(source)
                }
                Err(e) => {
                    error!("{e}");
                    return Err(rocket);
                }
            },
            None => {
                warn!("No bill_api_url configured, bill votes cannot be created");
                Arc::new(StaticBillSource::default())
            }
        };
        let adapter = BillVoteAdapter::new(
            bills,
            engine,
            config.bill_vote_window(),
            config.bill_vote_quorum(),
        );
        Ok(rocket.manage(adapter))
    }
}

#[cfg(test)]
pub(crate) mod examples {
    use super::*;

    impl Bill {
        pub fn example() -> Self {
            Self {
                id: "C-21".to_string(),
                title: "An Act to amend certain Acts".to_string(),
                summary: "Amends the Criminal Code and the Firearms Act.".to_string(),
            }
        }
    }

    impl StaticBillSource {
        pub fn example() -> Self {
            Self::new([Bill::example()])
        }
    }
}
