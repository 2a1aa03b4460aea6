use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::AppState;
use crate::gateway::ModelInfo;

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub object: &'static str,
    pub data: Vec<ModelInfo>,
}

/// GET /api/models
///
/// Models available through the gateway, with the provider each routes to.
pub async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let data = state.catalog.available(state.gateway.as_ref()).await;
    Json(ModelsResponse {
        object: "list",
        data,
    })
}
