use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use crate::error::AppError;
use crate::gateway::GatewayRequest;
use crate::usage::{UsageDraft, UsageStatus};

/// Reply text used when the model answered without any content.
pub const NO_CONTENT_FALLBACK: &str = "⚠️ The AI did not return any content.";

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Defaults to the first configured model.
    #[serde(default)]
    pub model: Option<String>,
    pub prompt: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatReply {
    /// Id of the usage record, absent if recording failed.
    pub id: Option<Uuid>,
    pub model: String,
    pub provider: String,
    pub status: UsageStatus,
    pub response: String,
    pub latency_ms: u64,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cost: f64,
}

/// POST /api/chat
///
/// Forwards one prompt to the gateway and records the outcome. A failed
/// gateway call is still recorded and answered with a 502 carrying the same
/// reply shape, `status: "error"` and the error text as `response`.
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, AppError> {
    let prompt = request.prompt.trim().to_string();
    if prompt.is_empty() {
        return Err(AppError::BadRequest("prompt must not be empty".to_string()));
    }

    let model = match request.model.map(|m| m.trim().to_string()) {
        Some(m) if !m.is_empty() => m,
        _ => state
            .catalog
            .configured()
            .into_iter()
            .next()
            .map(|m| m.id)
            .ok_or_else(|| AppError::BadRequest("model is required".to_string()))?,
    };
    let provider = state.catalog.provider_for(&model).to_string();
    let user = request
        .user
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty());

    let gateway_request = GatewayRequest {
        model: model.clone(),
        provider: provider.clone(),
        system_prompt: state.config.gateway.system_prompt.clone(),
        prompt: prompt.clone(),
        max_tokens: request
            .max_tokens
            .unwrap_or(state.config.gateway.max_tokens),
        user: user.clone(),
    };

    tracing::info!(model = %model, provider = %provider, "Chat request");

    let start = Instant::now();
    let result = state.gateway.chat(&gateway_request).await;
    let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    let latency = i64::try_from(latency_ms).unwrap_or(i64::MAX);
    let log_content = state.config.logging.log_content;

    match result {
        Ok(response) => {
            let text = response
                .text
                .unwrap_or_else(|| NO_CONTENT_FALLBACK.to_string());
            let cost = response.cost.unwrap_or_else(|| {
                state.cost_calculator.calculate_cost(
                    &model,
                    response.prompt_tokens,
                    response.completion_tokens,
                )
            });

            let draft = UsageDraft::success(
                model.clone(),
                provider.clone(),
                i64::from(response.prompt_tokens),
                i64::from(response.completion_tokens),
                cost,
                latency,
            )
            .with_user(user)
            .with_content(
                log_content.then(|| prompt.clone()),
                log_content.then(|| text.clone()),
            );
            let id = record_usage(&state, draft).await;

            tracing::info!(
                model = %model,
                upstream_model = %response.model,
                latency_ms,
                prompt_tokens = response.prompt_tokens,
                completion_tokens = response.completion_tokens,
                "Chat completed"
            );

            let reply = ChatReply {
                id,
                model,
                provider,
                status: UsageStatus::Success,
                response: text,
                latency_ms,
                prompt_tokens: response.prompt_tokens,
                completion_tokens: response.completion_tokens,
                cost,
            };
            Ok(Json(reply).into_response())
        }
        Err(e) => {
            let message = e.to_string();
            tracing::warn!(model = %model, provider = %provider, error = %message, "Gateway call failed");

            let draft = UsageDraft::failure(model.clone(), provider.clone(), message.clone())
                .with_user(user)
                .with_latency_ms(latency)
                .with_content(log_content.then(|| prompt.clone()), None);
            let id = record_usage(&state, draft).await;

            let reply = ChatReply {
                id,
                model,
                provider,
                status: UsageStatus::Error,
                response: format!("Error: {message}"),
                latency_ms,
                prompt_tokens: 0,
                completion_tokens: 0,
                cost: 0.0,
            };
            Ok((StatusCode::BAD_GATEWAY, Json(reply)).into_response())
        }
    }
}

/// Hand the draft to the recorder. Failures are logged and never fail the
/// chat reply.
async fn record_usage(state: &AppState, draft: UsageDraft) -> Option<Uuid> {
    match state.recorder.enqueue(draft).await {
        Ok(record) => Some(record.id),
        Err(e) => {
            tracing::error!(error = %e, "Failed to record chat usage");
            None
        }
    }
}
