pub mod analytics;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod pricing;
pub mod usage;
pub mod web;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::analytics::AnalyticsCache;
use crate::config::Config;
use crate::gateway::{Gateway, ModelCatalog};
use crate::pricing::CostCalculator;
use crate::usage::UsageRecorder;

/// Shared application state accessible from all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub recorder: Arc<UsageRecorder>,
    pub gateway: Arc<dyn Gateway>,
    pub catalog: Arc<ModelCatalog>,
    pub cost_calculator: Arc<CostCalculator>,
    pub analytics_cache: Arc<AnalyticsCache>,
}

impl AppState {
    /// Assemble state around an existing recorder. `cache` must be the cache
    /// the recorder invalidates.
    pub fn new(
        config: Config,
        recorder: UsageRecorder,
        gateway: Arc<dyn Gateway>,
        cache: Arc<AnalyticsCache>,
    ) -> Self {
        Self {
            catalog: Arc::new(ModelCatalog::from_config(&config.gateway)),
            cost_calculator: Arc::new(CostCalculator::from_config(&config.pricing)),
            config: Arc::new(config),
            recorder: Arc::new(recorder),
            gateway,
            analytics_cache: cache,
        }
    }
}

/// Build the combined application router with all middleware layers.
pub fn build_app(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config);

    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let trace = TraceLayer::new_for_http();

    Router::new()
        .merge(web::build_web_router())
        .merge(api::build_api_router())
        // Global middleware stack (applied to all routes)
        .layer(propagate_id)
        .layer(request_id)
        .layer(trace)
        .layer(cors)
        .with_state(state)
}

/// Build the CORS layer from config.
fn build_cors_layer(config: &Config) -> CorsLayer {
    if config.server.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .server
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_cors_layer_empty_origins() {
        let config = Config::default();
        let _cors = build_cors_layer(&config);
    }

    #[test]
    fn test_build_cors_layer_with_origins() {
        let mut config = Config::default();
        config.server.cors_origins = vec!["http://localhost:3000".to_string()];
        let _cors = build_cors_layer(&config);
    }
}
