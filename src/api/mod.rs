pub mod analytics;
pub mod chat;
pub mod health;
pub mod models;
pub mod usage;

use axum::Router;
use axum::routing::{get, post};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use crate::AppState;
use crate::error::AppError;
use crate::usage::{UsageFilter, UsageStatus};

/// Build the API router.
///
/// Route layout:
/// ```text
/// /health                        GET
/// /api/chat                      POST
/// /api/models                    GET
/// /api/usage                     GET  (paginated, newest first)
/// /api/usage                     POST (ingest a usage draft)
/// /api/usage/export.csv          GET
/// /api/usage/{id}                GET
/// /api/analytics/summary         GET
/// /api/analytics/buckets         GET
/// /api/analytics/users           GET
/// ```
pub fn build_api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/chat", post(chat::chat))
        .route("/api/models", get(models::list_models))
        .route(
            "/api/usage",
            get(usage::list_usage).post(usage::ingest_usage),
        )
        .route("/api/usage/export.csv", get(usage::export_csv))
        .route("/api/usage/{id}", get(usage::get_usage))
        .route("/api/analytics/summary", get(analytics::summary))
        .route("/api/analytics/buckets", get(analytics::buckets))
        .route("/api/analytics/users", get(analytics::users))
}

// ---------------------------------------------------------------------------
// Shared query parameters
// ---------------------------------------------------------------------------

/// Record filter as it arrives in a query string. Everything is optional and
/// parsed by [`FilterParams::into_filter`] so malformed values become a JSON
/// 400 instead of an extractor rejection.
#[derive(Debug, Default, Deserialize)]
pub struct FilterParams {
    pub model: Option<String>,
    pub provider: Option<String>,
    pub user: Option<String>,
    pub status: Option<String>,
    /// Inclusive lower bound: RFC 3339 timestamp or `YYYY-MM-DD`.
    pub from: Option<String>,
    /// Exclusive upper bound: RFC 3339 timestamp or `YYYY-MM-DD`.
    pub to: Option<String>,
}

impl FilterParams {
    pub fn into_filter(self) -> Result<UsageFilter, AppError> {
        let status = non_empty(self.status)
            .map(|s| s.parse::<UsageStatus>().map_err(AppError::BadRequest))
            .transpose()?;
        let from = parse_bound("from", self.from)?;
        let to = parse_bound("to", self.to)?;
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(AppError::BadRequest(
                    "`from` must not be later than `to`".to_string(),
                ));
            }
        }

        Ok(UsageFilter {
            model: non_empty(self.model),
            provider: non_empty(self.provider),
            user: non_empty(self.user),
            status,
            from,
            to,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Parse a time bound. Bare dates mean midnight UTC.
fn parse_bound(name: &str, value: Option<String>) -> Result<Option<DateTime<Utc>>, AppError> {
    let Some(raw) = non_empty(value) else {
        return Ok(None);
    };

    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Some(dt.and_utc()))
        .ok_or_else(|| {
            AppError::BadRequest(format!(
                "`{name}` must be an RFC 3339 timestamp or YYYY-MM-DD date, got `{raw}`"
            ))
        })
}
