//! Router configuration for the web API.

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::handlers::{
    create_folder, delete_file, delete_folder, download_archive, get_breadcrumb, get_content,
    get_file_info, get_named_content, get_static, issue_signed_url, list_children, list_folders,
    update_file, update_folder, upload_files, AppState,
};
use super::middleware::{create_cors_layer, jwt_auth, JwtState};

/// Create the main API router.
pub fn create_router(
    app_state: Arc<AppState>,
    jwt_state: Arc<JwtState>,
    cors_origins: &[String],
) -> Router {
    // Uploads are size-checked per file while streaming. Cosmetic filenames
    // stay under `content/`, apart from the fixed `info` and `signed-url` segments.
    let file_routes = Router::new()
        .route("/", post(upload_files).layer(DefaultBodyLimit::disable()))
        .route(
            "/:id",
            get(get_content).patch(update_file).delete(delete_file),
        )
        .route("/:id/info", get(get_file_info))
        .route("/:id/signed-url", post(issue_signed_url))
        .route("/:id/content/:filename", get(get_named_content));

    let folder_routes = Router::new()
        .route("/", get(list_folders).post(create_folder))
        .route("/:id", patch(update_folder).delete(delete_folder))
        .route("/:id/children", get(list_children))
        .route("/:id/breadcrumb", get(get_breadcrumb))
        .route("/:id/archive", get(download_archive));

    let static_routes = Router::new().route("/*path", get(get_static));

    let api_routes = Router::new()
        .nest("/files", file_routes)
        .nest("/folders", folder_routes)
        .nest("/static", static_routes);

    // Clone jwt_state for the middleware closure
    let jwt_state_for_middleware = jwt_state.clone();

    Router::new()
        .nest("/api", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(create_cors_layer(cors_origins))
                .layer(middleware::from_fn(move |req, next| {
                    let state = jwt_state_for_middleware.clone();
                    jwt_auth(state, req, next)
                })),
        )
        .with_state(app_state)
}

/// Create a health check router.
pub fn create_health_router() -> Router {
    Router::new().route("/health", get(health_check))
}

/// Health check handler.
async fn health_check() -> &'static str {
    "OK"
}
