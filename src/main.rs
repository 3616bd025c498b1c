use actix_cors::Cors;
use actix_web::{error, http::StatusCode, middleware, web, App, HttpResponse, HttpServer};
use cat_arena::config::{Settings, StorageBackend};
use cat_arena::routes::{self, AppState, Backends};
use cat_arena::services::{
    import_cats, seed, CacheManager, CapabilityIssuer, InMemoryStore, JwtCapabilityIssuer,
    PendingMatchStore, PostgresClient,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// JSON error response for JSON payload errors
#[derive(Debug, serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub message: String,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
}

impl std::fmt::Display for JsonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error, self.message)
    }
}

impl std::error::Error for JsonError {}

impl error::ResponseError for JsonError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::BAD_REQUEST))
            .json(self)
    }
}

/// Handle JSON payload errors
pub fn handle_json_payload_error(err: error::JsonPayloadError, req: &actix_web::HttpRequest) -> actix_web::Error {
    tracing::info!("JSON payload error on {}: {}", req.path(), err);
    JsonError {
        error: "invalid_json".to_string(),
        message: format!("Invalid JSON: {}", err),
        status_code: 400,
    }
    .into()
}

/// Handle query payload errors
pub fn handle_query_payload_error(err: error::QueryPayloadError, _req: &actix_web::HttpRequest) -> actix_web::Error {
    JsonError {
        error: "invalid_query".to_string(),
        message: format!("Invalid query: {}", err),
        status_code: 400,
    }
    .into()
}

fn startup_error(context: &str, err: impl std::fmt::Display) -> std::io::Error {
    error!("{}: {}", context, err);
    std::io::Error::new(std::io::ErrorKind::Other, format!("{}: {}", context, err))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenv::dotenv().ok();

    let settings = Settings::load().map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, format!("Configuration error: {}", e))
    })?;

    // Initialize logging; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| settings.logging.format.clone());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true);

    if log_format == "pretty" {
        subscriber.pretty().init();
    } else {
        subscriber.init();
    }

    info!("Starting Cat Arena voting service...");

    let issuer: Arc<dyn CapabilityIssuer> = Arc::new(
        JwtCapabilityIssuer::new(&settings.token.secret, settings.token.leeway_secs)
            .map_err(|e| startup_error("Invalid action token secret", e))?,
    );

    // Initialize cache manager (optional - pending matches fall back to the primary store)
    let cache = match &settings.cache.redis_url {
        Some(redis_url) => {
            let cache_ttl = settings.cache.ttl_secs.unwrap_or(300);
            let l1_cache_size = settings.cache.l1_cache_size.unwrap_or(1000);
            let cache = CacheManager::new(redis_url, l1_cache_size, cache_ttl)
                .await
                .map_err(|e| startup_error("Failed to connect to Redis", e))?;
            info!("Cache manager initialized (L1: {} entries, TTL: {}s)", l1_cache_size, cache_ttl);
            Some(Arc::new(cache))
        }
        None => {
            warn!("No Redis configured; pending matches are kept in the primary store");
            None
        }
    };

    let mut postgres = None;
    let mut backends = match settings.storage.backend {
        StorageBackend::Memory => {
            info!("Using in-memory storage");
            Backends::in_memory(Arc::new(InMemoryStore::new()))
        }
        StorageBackend::Postgres => {
            let db_max_conn = settings.database.max_connections.unwrap_or(10);
            let client = Arc::new(
                PostgresClient::from_settings(
                    &settings.database.url,
                    Some(db_max_conn),
                    settings.database.min_connections,
                    settings.database.acquire_timeout_secs,
                    settings.database.idle_timeout_secs,
                )
                .await
                .map_err(|e| startup_error("Failed to connect to PostgreSQL", e))?,
            );
            info!("PostgreSQL client initialized (max: {} connections)", db_max_conn);
            postgres = Some(client.clone());

            Backends {
                ratings: client.clone(),
                ledger: client.clone(),
                pending: client.clone(),
                counter: client,
            }
        }
    };

    if let Some(cache) = &cache {
        let pending: Arc<dyn PendingMatchStore> = cache.clone();
        backends.pending = pending;
    }

    if let Some(path) = &settings.storage.seed_file {
        let cats = seed::load_seed_file(path)
            .await
            .map_err(|e| startup_error("Failed to read seed catalogue", e))?;
        let inserted = import_cats(backends.ratings.as_ref(), cats, settings.rating.initial_rating)
            .await
            .map_err(|e| startup_error("Failed to import seed catalogue", e))?;
        info!("Seed catalogue imported from {} ({} new cats)", path, inserted);
    }

    let mut app_state = AppState::new(
        backends,
        issuer,
        Duration::from_secs(settings.token.ttl_secs),
        settings.rating.k_factor,
        settings.rating.initial_rating,
    );
    if let Some(cache) = cache {
        app_state = app_state.with_cache(cache);
    }
    if let Some(postgres) = postgres {
        app_state = app_state.with_postgres(postgres);
    }

    info!(
        "Rating engine initialized (K: {}, initial rating: {})",
        settings.rating.k_factor, settings.rating.initial_rating
    );

    // Configure HTTP server
    let host = settings.server.host.clone();
    let port = settings.server.port;
    let workers = settings.server.workers.unwrap_or(4);

    info!("Starting HTTP server on {}:{}", host, port);

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::JsonConfig::default().error_handler(handle_json_payload_error))
            .app_data(web::QueryConfig::default().error_handler(handle_query_payload_error))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .configure(routes::configure_routes)
    })
    .workers(workers)
    .bind((host, port))?
    .run()
    .await
}
