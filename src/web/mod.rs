//! Embedded web UI: an analytics dashboard and a chat form, rendered from
//! embedded HTML templates via minijinja.

pub mod templates;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::AppState;
use crate::analytics::{
    AggregateBucket, Granularity, GroupBy, UsageSummary, UserUsage, aggregate, summarize,
    top_users,
};
use crate::api::FilterParams;
use crate::api::analytics::cached_view;
use crate::error::AppError;
use crate::usage::UsageFilter;

/// Number of most recent hourly windows shown on the dashboard.
const HOURLY_WINDOWS: usize = 48;
const DASHBOARD_TOP_USERS: usize = 10;

// ---------------------------------------------------------------------------
// Template engine
// ---------------------------------------------------------------------------

/// Build a minijinja environment with all embedded templates registered.
fn template_env() -> Result<Environment<'static>, minijinja::Error> {
    let mut env = Environment::new();
    env.set_auto_escape_callback(|_| minijinja::AutoEscape::Html);
    env.add_template("layout", templates::LAYOUT)?;
    env.add_template("dashboard", templates::DASHBOARD)?;
    env.add_template("chat", templates::CHAT)?;
    Ok(env)
}

/// Render a template by name with the given minijinja context.
fn render(template_name: &str, ctx: minijinja::Value) -> Response {
    let result = template_env()
        .and_then(|env| env.get_template(template_name).and_then(|t| t.render(ctx)));

    match result {
        Ok(html) => Html(html).into_response(),
        Err(err) => {
            tracing::error!(template = template_name, error = %err, "Template render error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(format!(
                    "<h1>Template Error</h1><pre>{}</pre>",
                    html_escape(&err.to_string())
                )),
            )
                .into_response()
        }
    }
}

/// Minimal HTML entity escaping for error messages.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_web_router() -> Router<AppState> {
    Router::new()
        .route("/", get(index_redirect))
        .route("/ui/dashboard", get(dashboard_page))
        .route("/ui/chat", get(chat_page))
}

async fn index_redirect() -> Redirect {
    Redirect::temporary("/ui/dashboard")
}

// ---------------------------------------------------------------------------
// Page handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct BreakdownRow {
    label: String,
    requests: u64,
    cost: String,
    p95: String,
}

#[derive(Debug, Serialize)]
struct HourlyRow {
    label: String,
    requests: u64,
    tokens: u64,
    cost: String,
    avg_latency: String,
    bar_pct: u64,
}

#[derive(Debug, Serialize)]
struct UserRow {
    user: String,
    requests: u64,
    cost: String,
}

/// Dashboard page. Accepts the same filter parameters as `/api/analytics/*`
/// and shares their cache entries.
async fn dashboard_page(
    State(state): State<AppState>,
    Query(filter): Query<FilterParams>,
) -> Result<Response, AppError> {
    let filter = filter.into_filter()?;
    let window = describe_window(&filter);

    let summary: std::sync::Arc<UsageSummary> =
        cached_view(&state, format!("summary:{filter:?}"), filter.clone(), summarize).await?;
    let by_model = bucket_view(&state, &filter, GroupBy::Model, Granularity::All).await?;
    let by_provider = bucket_view(&state, &filter, GroupBy::Provider, Granularity::All).await?;
    let hourly = bucket_view(&state, &filter, GroupBy::None, Granularity::Hour).await?;
    let users: std::sync::Arc<Vec<UserUsage>> = cached_view(
        &state,
        format!("users:{DASHBOARD_TOP_USERS}:{filter:?}"),
        filter,
        |records| top_users(records, DASHBOARD_TOP_USERS),
    )
    .await?;

    let models = breakdown_rows(&by_model, |b| b.model.clone());
    let providers = breakdown_rows(&by_provider, |b| b.provider.clone());
    let hourly = hourly_rows(&hourly);
    let users: Vec<UserRow> = users
        .iter()
        .map(|u| UserRow {
            user: u.user.clone(),
            requests: u.requests,
            cost: format_cost(u.cost),
        })
        .collect();

    Ok(render(
        "dashboard",
        context! {
            page => "dashboard",
            window => window,
            summary => summary.as_ref(),
            total_cost => format_cost(summary.total_cost),
            avg_latency => format_latency(summary.avg_latency_ms),
            models => models,
            providers => providers,
            hourly => hourly,
            users => users,
        },
    ))
}

/// Chat form page.
async fn chat_page(State(state): State<AppState>) -> Response {
    let models = state.catalog.available(state.gateway.as_ref()).await;
    render("chat", context! { page => "chat", models => models })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn bucket_view(
    state: &AppState,
    filter: &UsageFilter,
    group_by: GroupBy,
    granularity: Granularity,
) -> Result<std::sync::Arc<Vec<AggregateBucket>>, AppError> {
    let key = format!("buckets:{group_by}:{granularity}:{filter:?}");
    cached_view(state, key, filter.clone(), move |records| {
        aggregate(records, group_by, granularity)
    })
    .await
}

/// Per-model or per-provider rows, busiest first.
fn breakdown_rows(
    buckets: &[AggregateBucket],
    label: impl Fn(&AggregateBucket) -> Option<String>,
) -> Vec<BreakdownRow> {
    let mut sorted: Vec<&AggregateBucket> = buckets.iter().collect();
    sorted.sort_by(|a, b| b.request_count.cmp(&a.request_count));

    sorted
        .into_iter()
        .map(|b| BreakdownRow {
            label: label(b).unwrap_or_else(|| "-".to_string()),
            requests: b.request_count,
            cost: format_cost(b.total_cost),
            p95: b
                .latency
                .p95_ms
                .map(|ms| format!("{ms} ms"))
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect()
}

/// The most recent hourly windows, newest first, with a bar width relative
/// to the busiest hour shown.
fn hourly_rows(buckets: &[AggregateBucket]) -> Vec<HourlyRow> {
    let recent: Vec<&AggregateBucket> = buckets.iter().rev().take(HOURLY_WINDOWS).collect();
    let peak = recent.iter().map(|b| b.request_count).max().unwrap_or(0);

    recent
        .into_iter()
        .map(|b| HourlyRow {
            label: b
                .window_start
                .map(|ts| ts.format("%Y-%m-%d %H:00").to_string())
                .unwrap_or_else(|| "-".to_string()),
            requests: b.request_count,
            tokens: b.total_tokens,
            cost: format_cost(b.total_cost),
            avg_latency: format_latency(b.latency.avg_ms),
            bar_pct: if peak == 0 {
                0
            } else {
                b.request_count * 100 / peak
            },
        })
        .collect()
}

fn describe_window(filter: &UsageFilter) -> String {
    match (filter.from, filter.to) {
        (None, None) => "All recorded requests".to_string(),
        (Some(from), None) => format!("Since {}", from.format("%Y-%m-%d %H:%M UTC")),
        (None, Some(to)) => format!("Before {}", to.format("%Y-%m-%d %H:%M UTC")),
        (Some(from), Some(to)) => format!(
            "{} to {}",
            from.format("%Y-%m-%d %H:%M UTC"),
            to.format("%Y-%m-%d %H:%M UTC")
        ),
    }
}

fn format_cost(cost: f64) -> String {
    format!("${cost:.4}")
}

fn format_latency(ms: Option<f64>) -> String {
    match ms {
        Some(ms) => format!("{ms:.0} ms"),
        None => "-".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
