// Integration tests for Cat Arena

use actix_web::{http::StatusCode, test, web, App};
use cat_arena::core::ArenaError;
use cat_arena::models::{Cat, MatchResponse, RankingResponse, TotalVotesResponse, VoteResponse};
use cat_arena::routes::{configure_routes, AppState, Backends, VISITOR_COOKIE};
use cat_arena::services::{CapabilityIssuer, InMemoryStore, JwtCapabilityIssuer, RatingStore, VoteCounter};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const SECRET: &str = "integration-test-secret-long-enough-for-hs256";

fn create_test_cat(id: &str, rating: i32, match_count: u32) -> Cat {
    Cat::new(id, format!("Cat {}", id), format!("https://cats.example.com/{}.jpg", id))
        .with_stats(rating, match_count)
}

fn create_test_state(cats: Vec<Cat>) -> (Arc<InMemoryStore>, AppState) {
    let store = Arc::new(InMemoryStore::with_cats(cats));
    let issuer: Arc<dyn CapabilityIssuer> = Arc::new(JwtCapabilityIssuer::new(SECRET, 0).unwrap());
    let state = AppState::new(
        Backends::in_memory(store.clone()),
        issuer,
        Duration::from_secs(300),
        32.0,
        1000,
    );
    (store, state)
}

fn default_cats() -> Vec<Cat> {
    vec![
        create_test_cat("a", 1000, 0),
        create_test_cat("b", 1000, 0),
        create_test_cat("c", 1000, 0),
        create_test_cat("d", 1000, 0),
    ]
}

#[tokio::test]
async fn test_integration_end_to_end_voting() {
    let (store, state) = create_test_state(default_cats());

    let offer = state.session.get_or_create("visitor-1").await.unwrap();
    let [winner, loser] = offer.cats.clone();

    let accepted = state
        .admission
        .admit_vote(&offer.token, &winner.id, &loser.id)
        .await
        .unwrap();

    assert_eq!(accepted.voter_id, "visitor-1");
    assert_eq!(accepted.outcome.winner.after, 1016);
    assert_eq!(accepted.outcome.loser.after, 984);
    assert_eq!(store.read().await.unwrap(), 1);

    // A fresh pair is offered once the vote clears the pending match
    let next = state.session.get_or_create("visitor-1").await.unwrap();
    assert!(!next.resumed);
    let next_ids = [next.cats[0].id.as_str(), next.cats[1].id.as_str()];
    assert!(!(next_ids.contains(&winner.id.as_str()) && next_ids.contains(&loser.id.as_str())));
}

#[tokio::test]
async fn test_voter_exhausts_every_pair_exactly_once() {
    let (store, state) = create_test_state(default_cats());

    // Four cats give six unordered pairs
    for _ in 0..6 {
        let offer = state.session.get_or_create("visitor-1").await.unwrap();
        state
            .admission
            .admit_vote(&offer.token, &offer.cats[0].id, &offer.cats[1].id)
            .await
            .unwrap();
    }

    let result = state.session.get_or_create("visitor-1").await;
    assert!(matches!(result, Err(ArenaError::PairsExhausted)));

    assert_eq!(store.vote_count(), 6);
    assert_eq!(store.read().await.unwrap(), 6);

    // Every vote touches two cats
    let cats = store.list_all().await.unwrap();
    let total_matches: u32 = cats.iter().map(|c| c.match_count).sum();
    assert_eq!(total_matches, 12);

    // Other voters are unaffected
    assert!(state.session.get_or_create("visitor-2").await.is_ok());
}

#[tokio::test]
async fn test_ratings_stay_conserved_within_rounding() {
    let (store, state) = create_test_state(default_cats());

    let mut votes = 0;
    for voter in ["v1", "v2", "v3"] {
        for _ in 0..6 {
            let offer = state.session.get_or_create(voter).await.unwrap();
            // Always favour the cat listed second to build a spread of ratings
            state
                .admission
                .admit_vote(&offer.token, &offer.cats[1].id, &offer.cats[0].id)
                .await
                .unwrap();
            votes += 1;
        }
    }

    let cats = store.list_all().await.unwrap();
    let total: i32 = cats.iter().map(|c| c.rating).sum();
    assert!((total - 4000).abs() <= votes, "rating pool drifted to {}", total);
}

#[tokio::test]
async fn test_parallel_votes_from_one_token_admit_once() {
    let (store, state) = create_test_state(default_cats());
    let offer = state.session.get_or_create("visitor-1").await.unwrap();
    let (a, b) = (offer.cats[0].id.clone(), offer.cats[1].id.clone());

    let mut handles = Vec::new();
    for i in 0..8 {
        let admission = state.admission.clone();
        let token = offer.token.clone();
        let (winner, loser) = if i % 2 == 0 { (a.clone(), b.clone()) } else { (b.clone(), a.clone()) };
        handles.push(tokio::spawn(async move {
            admission.admit_vote(&token, &winner, &loser).await
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(ArenaError::DuplicateVote) => {}
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    assert_eq!(accepted, 1);
    assert_eq!(store.read().await.unwrap(), 1);
    let cats = store.list_all().await.unwrap();
    assert_eq!(cats.iter().map(|c| c.match_count).sum::<u32>(), 2);
}

#[actix_web::test]
async fn test_http_match_and_vote_flow() {
    let (_, state) = create_test_state(default_cats());
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::get().uri("/api/v1/cats/match").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let cookie = resp
        .response()
        .cookies()
        .find(|c| c.name() == VISITOR_COOKIE)
        .map(|c| c.into_owned())
        .expect("visitor cookie should be set");
    assert!(cookie.http_only().unwrap_or(false));

    let offer: MatchResponse = test::read_body_json(resp).await;
    assert_eq!(offer.cats.len(), 2);
    assert!(!offer.resumed);

    // Same visitor gets the same pair back
    let req = test::TestRequest::get()
        .uri("/api/v1/cats/match")
        .cookie(cookie.clone())
        .to_request();
    let resumed: MatchResponse = test::call_and_read_body_json(&app, req).await;
    assert!(resumed.resumed);
    assert_eq!(resumed.cats[0].id, offer.cats[0].id);
    assert_eq!(resumed.cats[1].id, offer.cats[1].id);

    let vote_body = json!({
        "actionToken": offer.token,
        "winnerId": offer.cats[0].id,
        "loserId": offer.cats[1].id,
    });

    let req = test::TestRequest::post()
        .uri("/api/v1/cats/match/vote")
        .set_json(&vote_body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let vote: VoteResponse = test::read_body_json(resp).await;
    assert!(vote.success);
    assert_eq!(vote.outcome.winner.after, 1016);
    assert_eq!(vote.outcome.loser.after, 984);

    // Replaying the same vote is rejected
    let req = test::TestRequest::post()
        .uri("/api/v1/cats/match/vote")
        .set_json(&vote_body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let req = test::TestRequest::get().uri("/api/v1/stats/total-votes").to_request();
    let totals: TotalVotesResponse = test::call_and_read_body_json(&app, req).await;
    assert_eq!(totals.total_votes, 1);

    let req = test::TestRequest::get().uri("/api/v1/cats").to_request();
    let ranking: RankingResponse = test::call_and_read_body_json(&app, req).await;
    assert_eq!(ranking.total, 4);
    assert_eq!(ranking.cats[0].id, offer.cats[0].id);
    assert_eq!(ranking.cats[0].rating, 1016);
    assert_eq!(ranking.cats[3].rating, 984);
}

#[actix_web::test]
async fn test_http_vote_rejections() {
    let (_, state) = create_test_state(default_cats());
    let offer = state.session.get_or_create("visitor-1").await.unwrap();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(configure_routes),
    )
    .await;

    let forged = test::TestRequest::post()
        .uri("/api/v1/cats/match/vote")
        .set_json(json!({ "actionToken": "not-a-token", "winnerId": "a", "loserId": "b" }))
        .to_request();
    let resp = test::call_service(&app, forged).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "invalid_or_expired_token");
    assert_eq!(body["statusCode"], 401);

    let outsider = ["a", "b", "c", "d"]
        .into_iter()
        .find(|id| *id != offer.cats[0].id && *id != offer.cats[1].id)
        .unwrap();
    let wrong_pair = test::TestRequest::post()
        .uri("/api/v1/cats/match/vote")
        .set_json(json!({
            "actionToken": offer.token,
            "winnerId": outsider,
            "loserId": offer.cats[1].id,
        }))
        .to_request();
    let resp = test::call_service(&app, wrong_pair).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let empty = test::TestRequest::post()
        .uri("/api/v1/cats/match/vote")
        .set_json(json!({ "actionToken": "", "winnerId": "a", "loserId": "b" }))
        .to_request();
    let resp = test::call_service(&app, empty).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_http_create_cat() {
    let (store, state) = create_test_state(vec![]);
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(configure_routes),
    )
    .await;

    let body = json!({ "id": "tom", "name": "Tom", "url": "https://cats.example.com/tom.jpg" });

    let req = test::TestRequest::post().uri("/api/v1/cats").set_json(&body).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let cat: Cat = test::read_body_json(resp).await;
    assert_eq!((cat.rating, cat.match_count), (1000, 0));

    // Re-adding an existing id leaves it untouched
    store.apply_delta("tom", 40).await.unwrap();
    let req = test::TestRequest::post().uri("/api/v1/cats").set_json(&body).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let cat: Cat = test::read_body_json(resp).await;
    assert_eq!((cat.rating, cat.match_count), (1040, 1));

    let req = test::TestRequest::post()
        .uri("/api/v1/cats")
        .set_json(json!({ "name": "Nameless", "url": "not a url" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_http_insufficient_cats() {
    let (_, state) = create_test_state(vec![create_test_cat("solo", 1000, 0)]);
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::get().uri("/api/v1/cats/match").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let req = test::TestRequest::get().uri("/api/v1/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
}
