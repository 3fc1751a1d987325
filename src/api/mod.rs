mod caller;
mod error;
mod rest;
mod types;

pub use caller::{CallerId, USER_ID_HEADER};
pub use error::{ApiError, ApiResult};
pub use rest::RestApi;
pub use types::*;

use crate::config::StorageConfig;
use crate::upload::UploadService;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the complete HTTP API
pub fn create_api_server(service: UploadService, storage: &StorageConfig) -> Router {
    let rest_api = RestApi::new(service, storage);

    // The LMS frontend is served from a different origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(rest_api.router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
