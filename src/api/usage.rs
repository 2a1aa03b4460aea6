use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use crate::api::FilterParams;
use crate::error::AppError;
use crate::usage::store::format_timestamp;
use crate::usage::{UsageDraft, UsageRecord};

#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_page() -> u32 {
    1
}
fn default_per_page() -> u32 {
    50
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UsageResponse {
    pub data: Vec<UsageRecord>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
}

/// GET /api/usage
///
/// Raw records matching the filter, newest first.
pub async fn list_usage(
    State(state): State<AppState>,
    Query(filter): Query<FilterParams>,
    Query(paging): Query<PageParams>,
) -> Result<Json<UsageResponse>, AppError> {
    let filter = filter.into_filter()?;
    let page = paging.page.max(1);
    let per_page = paging
        .per_page
        .clamp(1, state.config.analytics.max_page_size);

    let store = state.recorder.store().clone();
    let (data, total) =
        tokio::task::spawn_blocking(move || store.page(&filter, page, per_page)).await??;

    Ok(Json(UsageResponse {
        data,
        page,
        per_page,
        total,
    }))
}

/// GET /api/usage/{id}
pub async fn get_usage(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UsageRecord>, AppError> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| AppError::BadRequest(format!("Invalid record id: {id}")))?;

    state
        .recorder
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Usage record '{id}'")))
}

/// POST /api/usage
///
/// Record usage for a call made outside this service. Returns the stored
/// record once it is durable.
pub async fn ingest_usage(
    State(state): State<AppState>,
    Json(mut draft): Json<UsageDraft>,
) -> Result<(StatusCode, Json<UsageRecord>), AppError> {
    if !state.config.logging.log_content {
        draft.prompt = None;
        draft.response = None;
    }

    let record = state.recorder.record(draft).await?;
    tracing::info!(id = %record.id, model = %record.model, status = %record.status, "Usage ingested");
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /api/usage/export.csv
///
/// All records matching the filter, oldest first.
pub async fn export_csv(
    State(state): State<AppState>,
    Query(filter): Query<FilterParams>,
) -> Result<Response, AppError> {
    let filter = filter.into_filter()?;
    let store = state.recorder.store().clone();
    let records = tokio::task::spawn_blocking(move || store.query(&filter)).await??;

    tracing::debug!(count = records.len(), "Exporting usage records");

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"usage.csv\"",
            ),
        ],
        render_csv(&records),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// CSV rendering
// ---------------------------------------------------------------------------

const CSV_HEADER: [&str; 12] = [
    "timestamp",
    "user",
    "model",
    "provider",
    "status",
    "prompt_tokens",
    "completion_tokens",
    "cost",
    "latency_ms",
    "prompt",
    "response",
    "error_message",
];

fn render_csv(records: &[UsageRecord]) -> String {
    let mut out = String::new();
    push_row(&mut out, CSV_HEADER.iter().map(|h| h.to_string()));

    for r in records {
        push_row(
            &mut out,
            [
                format_timestamp(&r.timestamp),
                r.user.clone().unwrap_or_default(),
                r.model.clone(),
                r.provider.clone(),
                r.status.to_string(),
                r.prompt_tokens.to_string(),
                r.completion_tokens.to_string(),
                r.cost.to_string(),
                r.latency_ms.map(|ms| ms.to_string()).unwrap_or_default(),
                r.prompt.clone().unwrap_or_default(),
                r.response.clone().unwrap_or_default(),
                r.error_message.clone().unwrap_or_default(),
            ],
        );
    }
    out
}

fn push_row(out: &mut String, fields: impl IntoIterator<Item = String>) {
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&csv_field(&field));
    }
    out.push_str("\r\n");
}

/// Quote a field per RFC 4180 when it contains a delimiter, quote or newline.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
