use actix_web::cookie::{time, Cookie, SameSite};
use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse, Responder, ResponseError};
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;

use crate::core::{sort_ranking, ArenaError, MatchSession, RatingEngine, VoteAdmission};
use crate::models::{
    Cat, CreateCatRequest, ErrorResponse, HealthResponse, MatchResponse, NewCat, RankingResponse,
    TotalVotesResponse, VoteRequest, VoteResponse,
};
use crate::services::{
    CacheKey, CacheManager, CapabilityIssuer, InMemoryStore, PendingMatchStore, PostgresClient,
    RatingStore, VoteCounter, VoteLedger,
};

/// Cookie carrying the anonymous voter identity
pub const VISITOR_COOKIE: &str = "visitor_id";

/// Storage collaborators the engine runs against
#[derive(Clone)]
pub struct Backends {
    pub ratings: Arc<dyn RatingStore>,
    pub ledger: Arc<dyn VoteLedger>,
    pub pending: Arc<dyn PendingMatchStore>,
    pub counter: Arc<dyn VoteCounter>,
}

impl Backends {
    /// Every collaborator backed by one in-process store
    pub fn in_memory(store: Arc<InMemoryStore>) -> Self {
        Self {
            ratings: store.clone(),
            ledger: store.clone(),
            pending: store.clone(),
            counter: store,
        }
    }
}

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub ratings: Arc<dyn RatingStore>,
    pub counter: Arc<dyn VoteCounter>,
    pub session: MatchSession,
    pub admission: VoteAdmission,
    pub cache: Option<Arc<CacheManager>>,
    pub postgres: Option<Arc<PostgresClient>>,
    pub initial_rating: i32,
}

impl AppState {
    pub fn new(
        backends: Backends,
        issuer: Arc<dyn CapabilityIssuer>,
        token_ttl: Duration,
        k_factor: f64,
        initial_rating: i32,
    ) -> Self {
        let session = MatchSession::new(
            backends.ratings.clone(),
            backends.ledger.clone(),
            backends.pending.clone(),
            issuer.clone(),
            token_ttl,
        );
        let engine = RatingEngine::new(backends.ratings.clone(), k_factor);
        let admission = VoteAdmission::new(
            issuer,
            backends.ledger.clone(),
            backends.counter.clone(),
            engine,
            session.clone(),
        );

        Self {
            ratings: backends.ratings,
            counter: backends.counter,
            session,
            admission,
            cache: None,
            postgres: None,
            initial_rating,
        }
    }

    pub fn with_cache(mut self, cache: Arc<CacheManager>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_postgres(mut self, postgres: Arc<PostgresClient>) -> Self {
        self.postgres = Some(postgres);
        self
    }

    async fn invalidate_ranking(&self) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.bump_ranking_generation().await {
                tracing::warn!("Failed to invalidate ranking cache: {}", e);
            }
        }
    }
}

impl ResponseError for ArenaError {
    fn status_code(&self) -> StatusCode {
        match self {
            ArenaError::InsufficientItems { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ArenaError::InvalidOrExpiredToken => StatusCode::UNAUTHORIZED,
            ArenaError::InvalidVote(_) => StatusCode::BAD_REQUEST,
            ArenaError::DuplicateVote => StatusCode::CONFLICT,
            ArenaError::PairsExhausted => StatusCode::NOT_FOUND,
            ArenaError::ItemNotFound(_) | ArenaError::TokenIssue(_) | ArenaError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }

        HttpResponse::build(status).json(ErrorResponse {
            error: self.code().to_string(),
            message: self.to_string(),
            status_code: status.as_u16(),
        })
    }
}

/// Configure all arena routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        .route("/health", web::get().to(health_check))
        .route("/cats", web::get().to(list_cats))
        .route("/cats", web::post().to(create_cat))
        .route("/cats/match", web::get().to(get_match))
        .route("/cats/match/vote", web::post().to(vote))
        .route("/stats/total-votes", web::get().to(total_votes));
}

fn validation_error(errors: validator::ValidationErrors) -> HttpResponse {
    HttpResponse::BadRequest().json(ErrorResponse {
        error: "validation_failed".to_string(),
        message: errors.to_string(),
        status_code: 400,
    })
}

/// Resolve the voter from the visitor cookie, minting a new identity if absent
fn visitor_id(req: &HttpRequest) -> (String, bool) {
    match req.cookie(VISITOR_COOKIE) {
        Some(cookie) if !cookie.value().is_empty() => (cookie.value().to_string(), false),
        _ => (uuid::Uuid::new_v4().to_string(), true),
    }
}

/// Health check endpoint
async fn health_check(state: web::Data<AppState>) -> impl Responder {
    let pg_healthy = match &state.postgres {
        Some(pg) => pg.health_check().await.unwrap_or(false),
        None => true,
    };
    let cache_healthy = match &state.cache {
        Some(cache) => cache.health_check().await,
        None => true,
    };

    let status = if pg_healthy && cache_healthy { "healthy" } else { "degraded" };

    HttpResponse::Ok().json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
    })
}

/// Ranking endpoint
///
/// GET /api/v1/cats
async fn list_cats(state: web::Data<AppState>) -> Result<HttpResponse, ArenaError> {
    // Read the generation before the store so a listing never outlives a later vote
    let cache_key = match &state.cache {
        Some(cache) => match cache.ranking_generation().await {
            Ok(generation) => Some(CacheKey::ranking(generation)),
            Err(e) => {
                tracing::warn!("Ranking cache unavailable: {}", e);
                None
            }
        },
        None => None,
    };

    if let (Some(cache), Some(key)) = (&state.cache, &cache_key) {
        if let Ok(cats) = cache.get::<Vec<Cat>>(key).await {
            return Ok(HttpResponse::Ok().json(RankingResponse { total: cats.len(), cats }));
        }
    }

    let mut cats = state.ratings.list_all().await?;
    sort_ranking(&mut cats);

    if let (Some(cache), Some(key)) = (&state.cache, &cache_key) {
        if let Err(e) = cache.set(key, &cats).await {
            tracing::warn!("Failed to cache ranking: {}", e);
        }
    }

    Ok(HttpResponse::Ok().json(RankingResponse { total: cats.len(), cats }))
}

/// Add a cat
///
/// POST /api/v1/cats
///
/// Request body:
/// ```json
/// {
///   "id": "optional-string",
///   "name": "string",
///   "url": "https://..."
/// }
/// ```
async fn create_cat(
    state: web::Data<AppState>,
    req: web::Json<CreateCatRequest>,
) -> Result<HttpResponse, ArenaError> {
    if let Err(errors) = req.validate() {
        return Ok(validation_error(errors));
    }

    let cat = NewCat::from(req.into_inner()).into_cat(state.initial_rating);
    let inserted = state.ratings.insert_if_absent(cat.clone()).await?;

    if inserted {
        tracing::info!("Added cat {} ({})", cat.id, cat.name);
        state.invalidate_ranking().await;
        return Ok(HttpResponse::Created().json(cat));
    }

    let existing = state
        .ratings
        .get(&cat.id)
        .await?
        .ok_or_else(|| ArenaError::ItemNotFound(cat.id.clone()))?;
    Ok(HttpResponse::Ok().json(existing))
}

/// Current match for the calling voter
///
/// GET /api/v1/cats/match
async fn get_match(
    state: web::Data<AppState>,
    req: HttpRequest,
) -> Result<HttpResponse, ArenaError> {
    let (voter_id, fresh) = visitor_id(&req);

    let offer = state.session.get_or_create(&voter_id).await?;
    let [cat1, cat2] = offer.cats;

    let mut response = HttpResponse::Ok();
    if fresh {
        tracing::debug!("Issued new visitor id {}", voter_id);
        response.cookie(
            Cookie::build(VISITOR_COOKIE, voter_id)
                .path("/")
                .http_only(true)
                .same_site(SameSite::Lax)
                .max_age(time::Duration::days(365))
                .finish(),
        );
    }

    Ok(response.json(MatchResponse {
        cats: vec![cat1, cat2],
        token: offer.token,
        resumed: offer.resumed,
    }))
}

/// Vote on the current match
///
/// POST /api/v1/cats/match/vote
///
/// Request body:
/// ```json
/// {
///   "actionToken": "string",
///   "winnerId": "string",
///   "loserId": "string"
/// }
/// ```
async fn vote(
    state: web::Data<AppState>,
    req: web::Json<VoteRequest>,
) -> Result<HttpResponse, ArenaError> {
    if let Err(errors) = req.validate() {
        return Ok(validation_error(errors));
    }

    let accepted = state
        .admission
        .admit_vote(&req.action_token, &req.winner_id, &req.loser_id)
        .await?;

    state.invalidate_ranking().await;

    Ok(HttpResponse::Ok().json(VoteResponse {
        success: true,
        outcome: accepted.outcome,
    }))
}

/// Running total of accepted votes
///
/// GET /api/v1/stats/total-votes
async fn total_votes(state: web::Data<AppState>) -> Result<HttpResponse, ArenaError> {
    let total_votes = state.counter.read().await?;
    Ok(HttpResponse::Ok().json(TotalVotesResponse { total_votes }))
}
