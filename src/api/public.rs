use chrono::{NaiveDate, Utc};
use rocket::{serde::json::Json, Route, State};

use crate::election_dates::{next_election_date, ElectionDate};
use crate::error::{Result, ValidationError};
use crate::model::{
    api::{
        auth::{AuthToken, Voter},
        item::ItemView,
        results::VotingResults,
    },
    common::Jurisdiction,
    mongodb::Id,
};
use crate::voting::VotingEngine;

pub fn routes() -> Vec<Route> {
    routes![item, item_results, election_date]
}

/// Anyone may view an item; a signed-in voter also learns whether they've voted on it.
#[get("/items/<item_id>")]
async fn item(
    token: Option<AuthToken<Voter>>,
    item_id: Id,
    engine: &State<VotingEngine>,
) -> Result<Json<ItemView>> {
    let voter = token.as_ref().map(|token| token.id());
    let view = engine.get_voting_item(item_id, voter).await?;
    Ok(Json(view))
}

#[get("/items/<item_id>/results")]
async fn item_results(item_id: Id, engine: &State<VotingEngine>) -> Result<Json<VotingResults>> {
    let results = engine.results().get_voting_results(item_id).await?;
    Ok(Json(results))
}

#[get("/election-dates?<jurisdiction>&<name>&<reference_date>")]
async fn election_date(
    jurisdiction: Jurisdiction,
    name: Option<&str>,
    reference_date: Option<&str>,
) -> Result<Json<ElectionDate>> {
    let reference = match reference_date {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|_| ValidationError::InvalidDate(raw.to_string()))?,
        None => Utc::now().date_naive(),
    };
    Ok(Json(next_election_date(jurisdiction, name, reference)))
}
