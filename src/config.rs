use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use log::{error, info, warn};
use mongodb::Client as MongoClient;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::model::mongodb::ensure_indexes_exist;
use crate::store::{MemoryStore, MongoStore, VotingStore, DEFAULT_TRANSACTION_TIME_LIMIT};
use crate::voting::VotingEngine;

fn default_bill_vote_days() -> u32 {
    30
}

fn default_bill_vote_quorum() -> u32 {
    100
}

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // non-secrets
    #[serde(default)]
    bill_api_url: Option<String>,
    #[serde(default = "default_bill_vote_days")]
    bill_vote_days: u32,
    #[serde(default = "default_bill_vote_quorum")]
    bill_vote_quorum: u32,
    // secrets
    jwt_secret: String,
}

impl Config {
    /// Secret key shared with the identity service, used to verify JWTs.
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }

    /// Base URL of the bill metadata API, if there is one.
    pub fn bill_api_url(&self) -> Option<&str> {
        self.bill_api_url.as_deref()
    }

    /// How long votes created from bills stay open.
    pub fn bill_vote_window(&self) -> Duration {
        Duration::days(self.bill_vote_days.into())
    }

    /// Quorum for votes created from bills.
    pub fn bill_vote_quorum(&self) -> u32 {
        self.bill_vote_quorum
    }
}

/// A fairing that loads the application config and puts it in managed state.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Configuration for the persistence layer.
#[derive(Deserialize)]
struct StorageConfig {
    // secrets
    #[serde(default)]
    db_uri: Option<String>,
    #[serde(default = "default_db_name")]
    db_name: String,
    // non-secrets
    /// Seconds to keep retrying a contended vote before giving up.
    #[serde(default = "default_db_transaction_secs")]
    db_transaction_secs: u64,
}

fn default_db_name() -> String {
    "civic_vote".to_string()
}

fn default_db_transaction_secs() -> u64 {
    DEFAULT_TRANSACTION_TIME_LIMIT.as_secs()
}

/// A fairing that sets up the vote store and places a [`VotingEngine`] over
/// it into managed state.
///
/// With a `db_uri`, connects to MongoDB (which must be a replica set) and
/// ensures indexes exist. Without one, falls back to an in-memory store.
pub struct StorageFairing;

#[rocket::async_trait]
impl Fairing for StorageFairing {
    fn info(&self) -> Info {
        Info {
            name: "Vote Store",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<StorageConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load storage config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        let store: Arc<dyn VotingStore> = match config.db_uri {
            Some(db_uri) => {
                info!("Loaded database config, connecting...");
                let client = match MongoClient::with_uri_str(db_uri).await {
                    Ok(client) => client,
                    Err(e) => {
                        error!("Failed to connect to database: {e}");
                        return Err(rocket);
                    }
                };
                let db = client.database(&config.db_name);
                if let Err(e) = ensure_indexes_exist(&db).await {
                    error!("Failed to connect to database: {e}");
                    return Err(rocket);
                }
                info!("...database connection online!");
                let time_limit = StdDuration::from_secs(config.db_transaction_secs);
                Arc::new(MongoStore::new(client, &db, time_limit))
            }
            None => {
                warn!("No db_uri configured, votes will be held in memory only");
                Arc::new(MemoryStore::new())
            }
        };

        rocket = rocket.manage(VotingEngine::new(store));
        Ok(rocket)
    }
}

#[cfg(test)]
pub(crate) const EXAMPLE_JWT_SECRET: &str = "an example secret that is long enough";

#[cfg(test)]
impl Config {
    pub fn example() -> Self {
        Self {
            bill_api_url: None,
            bill_vote_days: default_bill_vote_days(),
            bill_vote_quorum: default_bill_vote_quorum(),
            jwt_secret: EXAMPLE_JWT_SECRET.to_string(),
        }
    }

    pub fn set_jwt_secret(&mut self, secret: &str) {
        self.jwt_secret = secret.to_string();
    }
}
