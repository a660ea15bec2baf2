#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

use crate::config::{ConfigFairing, StorageFairing};
use crate::logging::LoggerFairing;
use crate::voting::{BillSourceFairing, ItemCloserFairing};

pub mod api;
pub mod config;
pub mod election_dates;
pub mod error;
pub mod logging;
pub mod model;
pub mod scheduled_task;
pub mod store;
pub mod voting;

/// Build the server. Ignite fairings run in attachment order, and later ones
/// rely on state managed by earlier ones.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .register("/", error::catchers())
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(StorageFairing)
        .attach(BillSourceFairing)
        .attach(ItemCloserFairing)
}

/// A server over a fresh in-memory store, with a fixed JWT secret and the
/// example bill catalogue. Used by `#[backend_test]`.
#[cfg(test)]
pub(crate) fn test_rocket() -> Rocket<Build> {
    use std::sync::Arc;

    use chrono::Duration;
    use rocket::fairing::AdHoc;

    use crate::voting::{BillVoteAdapter, StaticBillSource, VotingEngine};

    let figment = rocket::Config::figment().merge(("jwt_secret", config::EXAMPLE_JWT_SECRET));
    rocket::custom(figment)
        .mount("/", api::routes())
        .register("/", error::catchers())
        .attach(ConfigFairing)
        .attach(AdHoc::on_ignite("In-memory Store", |rocket| async move {
            let store = Arc::new(store::MemoryStore::new());
            rocket.manage(VotingEngine::new(store))
        }))
        .attach(AdHoc::try_on_ignite("Example Bills", |rocket| async move {
            let engine = match rocket.state::<VotingEngine>() {
                Some(engine) => engine.clone(),
                None => return Err(rocket),
            };
            let adapter = BillVoteAdapter::new(
                Arc::new(StaticBillSource::example()),
                engine,
                Duration::days(30),
                100,
            );
            Ok(rocket.manage(adapter))
        }))
        .attach(ItemCloserFairing)
}
