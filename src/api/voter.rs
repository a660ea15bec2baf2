use rocket::{http::Status, serde::json::Json, Route, State};

use crate::error::Result;
use crate::model::{
    api::{
        auth::{AuthToken, Voter},
        item::{ItemCreated, ItemView, VoteRequest},
    },
    mongodb::Id,
};
use crate::voting::{BillVoteAdapter, ItemClosers, VotingEngine};

pub fn routes() -> Vec<Route> {
    routes![cast_vote, active_items, create_bill_vote]
}

#[post("/items/<item_id>/votes", data = "<vote>", format = "json")]
async fn cast_vote(
    token: Result<AuthToken<Voter>>,
    item_id: Id,
    vote: Json<VoteRequest>,
    engine: &State<VotingEngine>,
) -> Result<Status> {
    let token = token?;
    engine
        .cast_vote(token.id(), item_id, &vote.option_id)
        .await?;
    Ok(Status::NoContent)
}

#[get("/voter/items/active")]
async fn active_items(
    token: Result<AuthToken<Voter>>,
    engine: &State<VotingEngine>,
) -> Result<Json<Vec<ItemView>>> {
    let token = token?;
    let items = engine.get_active_voting_items(token.id()).await?;
    Ok(Json(items))
}

#[post("/bills/<bill_id>/vote")]
async fn create_bill_vote(
    token: Result<AuthToken<Voter>>,
    bill_id: &str,
    bills: &State<BillVoteAdapter>,
    engine: &State<VotingEngine>,
    closers: &State<ItemClosers>,
) -> Result<Json<ItemCreated>> {
    let token = token?;
    let item_id = bills.create_bill_vote(bill_id, token.id()).await?;
    let item = engine.voting_item(item_id).await?;
    closers.schedule_item(&item).await;
    Ok(Json(ItemCreated {
        item_id: item_id.into(),
    }))
}

#[cfg(test)]
mod tests {
    use rocket::{
        http::ContentType,
        local::asynchronous::Client,
        serde::json::{json, serde_json},
    };

    use crate::api::testing::login;
    use crate::model::api::{auth::Admin, item::VotingItemSpec};

    use super::*;

    async fn vote(client: &Client, voter: &str, item_id: Id, option: &str) -> (Status, serde_json::Value) {
        let response = client
            .post(uri!(cast_vote(item_id)))
            .cookie(login::<Voter>(client, voter))
            .header(ContentType::JSON)
            .body(json!({ "optionId": option }).to_string())
            .dispatch()
            .await;
        let status = response.status();
        let body = match response.into_string().await {
            Some(raw) if !raw.is_empty() => serde_json::from_str(&raw).unwrap(),
            _ => serde_json::Value::Null,
        };
        (status, body)
    }

    #[backend_test]
    async fn second_vote_is_a_conflict(client: Client, engine: VotingEngine) {
        let item_id = engine
            .create_voting_item(VotingItemSpec::current_example())
            .await
            .unwrap();

        let (status, _) = vote(&client, "U1", item_id, "support").await;
        assert_eq!(Status::NoContent, status);
        let (status, _) = vote(&client, "U2", item_id, "support").await;
        assert_eq!(Status::NoContent, status);

        let (status, body) = vote(&client, "U1", item_id, "oppose").await;
        assert_eq!(Status::Conflict, status);
        assert_eq!(body["kind"], "ConflictError");
        assert_eq!(body["code"], "DuplicateVote");
        assert_eq!(body["itemId"], item_id.to_string());
    }

    #[backend_test]
    async fn closed_and_ineligible_votes_are_refused(client: Client, engine: VotingEngine) {
        let past = engine
            .create_voting_item(VotingItemSpec::past_example())
            .await
            .unwrap();
        let (status, body) = vote(&client, "U1", past, "support").await;
        assert_eq!(Status::Conflict, status);
        assert_eq!(body["kind"], "StateError");
        assert_eq!(body["code"], "VotingClosed");

        let restricted = engine
            .create_voting_item(VotingItemSpec::restricted_example(&["U1", "U2"]))
            .await
            .unwrap();
        let (status, body) = vote(&client, "U3", restricted, "support").await;
        assert_eq!(Status::Forbidden, status);
        assert_eq!(body["code"], "NotEligible");

        let (status, body) = vote(&client, "U1", restricted, "maybe").await;
        assert_eq!(Status::BadRequest, status);
        assert_eq!(body["code"], "InvalidOption");

        let (status, body) = vote(&client, "U1", Id::new(), "support").await;
        assert_eq!(Status::NotFound, status);
        assert_eq!(body["kind"], "NotFoundError");
    }

    #[backend_test]
    async fn voting_requires_a_token(client: Client, engine: VotingEngine) {
        let item_id = engine
            .create_voting_item(VotingItemSpec::current_example())
            .await
            .unwrap();
        let response = client
            .post(uri!(cast_vote(item_id)))
            .header(ContentType::JSON)
            .body(json!({ "optionId": "support" }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());
        assert!(!engine.has_user_voted(&"U1".into(), item_id).await.unwrap());

        // Administrators don't vote.
        let response = client
            .post(uri!(cast_vote(item_id)))
            .cookie(login::<Admin>(&client, "A1"))
            .header(ContentType::JSON)
            .body(json!({ "optionId": "support" }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Forbidden, response.status());
        let body: serde_json::Value =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(body["code"], "NotPrivileged");
        assert!(!engine.has_user_voted(&"A1".into(), item_id).await.unwrap());
    }

    #[backend_test]
    async fn active_items_show_own_votes(client: Client, engine: VotingEngine) {
        let voted = engine
            .create_voting_item(VotingItemSpec::current_example())
            .await
            .unwrap();
        let open = engine
            .create_voting_item(VotingItemSpec::current_example())
            .await
            .unwrap();
        engine
            .create_voting_item(VotingItemSpec::future_example())
            .await
            .unwrap();
        let (status, _) = vote(&client, "U1", voted, "oppose").await;
        assert_eq!(Status::NoContent, status);

        let response = client
            .get(uri!(active_items))
            .cookie(login::<Voter>(&client, "U1"))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let raw = response.into_string().await.unwrap();
        let items: Vec<ItemView> = serde_json::from_str(&raw).unwrap();
        assert_eq!(items.len(), 2);
        for item in items {
            assert!(*item.id == voted || *item.id == open);
            assert_eq!(item.user_has_voted, *item.id == voted);
        }
    }

    #[backend_test]
    async fn voter_opens_bill_vote(client: Client, engine: VotingEngine) {
        let response = client
            .post(uri!(create_bill_vote("C-21")))
            .cookie(login::<Voter>(&client, "U1"))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let raw = response.into_string().await.unwrap();
        let created: ItemCreated = serde_json::from_str(&raw).unwrap();
        let item = engine.voting_item(*created.item_id).await.unwrap();
        assert_eq!(item.bill_id.as_deref(), Some("C-21"));
        assert_eq!(item.created_by, Some("U1".into()));

        let response = client
            .post(uri!(create_bill_vote("C-999")))
            .cookie(login::<Voter>(&client, "U1"))
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());
    }
}
