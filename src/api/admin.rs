use rocket::{serde::json::Json, Route, State};

use crate::error::Result;
use crate::model::{
    api::{
        auth::{Admin, AuthToken},
        item::{ItemCreated, VotingItemSpec},
        results::VotingResults,
    },
    mongodb::Id,
};
use crate::voting::{ItemClosers, VotingEngine};

pub fn routes() -> Vec<Route> {
    routes![create_item, end_item]
}

#[post("/items", data = "<spec>", format = "json")]
async fn create_item(
    token: Result<AuthToken<Admin>>,
    spec: Json<VotingItemSpec>,
    engine: &State<VotingEngine>,
    closers: &State<ItemClosers>,
) -> Result<Json<ItemCreated>> {
    let _admin = token?;
    let item_id = engine.create_voting_item(spec.0).await?;
    let item = engine.voting_item(item_id).await?;
    closers.schedule_item(&item).await;
    Ok(Json(ItemCreated {
        item_id: item_id.into(),
    }))
}

#[post("/items/<item_id>/end")]
async fn end_item(
    token: Result<AuthToken<Admin>>,
    item_id: Id,
    engine: &State<VotingEngine>,
    closers: &State<ItemClosers>,
) -> Result<Json<VotingResults>> {
    let _admin = token?;
    let results = engine.end_voting(item_id).await?;
    closers.cancel_item(item_id).await;
    Ok(Json(results))
}
