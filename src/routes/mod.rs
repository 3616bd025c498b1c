// Route exports
pub mod arena;

use actix_web::web;

pub use arena::{AppState, Backends, VISITOR_COOKIE};

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .configure(arena::configure),
    );
}
