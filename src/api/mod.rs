mod handlers;

pub use handlers::WebhookPayload;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::ci::Ci;

pub fn create_router(ci: Ci) -> Router {
    Router::new()
        // Project root: redirect, or webhook on POST
        .route(
            "/{project}",
            get(handlers::project_root).post(handlers::webhook),
        )
        .route("/{project}/", get(handlers::project_root))
        // Builds
        .route("/{project}/{reference}", get(handlers::build_status))
        .route("/{project}/{reference}/files", get(handlers::list_files))
        .route(
            "/{project}/{reference}/files/{*path}",
            get(handlers::serve_file),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ci)
}
