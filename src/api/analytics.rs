use std::any::Any;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::analytics::{
    AggregateBucket, Granularity, GroupBy, UsageSummary, UserUsage, aggregate, summarize,
    top_users,
};
use crate::api::FilterParams;
use crate::error::AppError;
use crate::usage::{UsageFilter, UsageRecord};

const DEFAULT_TOP_USERS: usize = 10;
const MAX_TOP_USERS: usize = 1000;

#[derive(Debug, Default, Deserialize)]
pub struct BucketParams {
    pub group_by: Option<String>,
    pub granularity: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BucketsResponse {
    pub group_by: GroupBy,
    pub granularity: Granularity,
    pub buckets: Vec<AggregateBucket>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UsersParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct UsersResponse {
    pub users: Vec<UserUsage>,
}

/// GET /api/analytics/summary
pub async fn summary(
    State(state): State<AppState>,
    Query(filter): Query<FilterParams>,
) -> Result<Json<UsageSummary>, AppError> {
    let filter = filter.into_filter()?;
    let key = format!("summary:{filter:?}");
    let value = cached_view(&state, key, filter, summarize).await?;
    Ok(Json(value.as_ref().clone()))
}

/// GET /api/analytics/buckets
pub async fn buckets(
    State(state): State<AppState>,
    Query(filter): Query<FilterParams>,
    Query(params): Query<BucketParams>,
) -> Result<Json<BucketsResponse>, AppError> {
    let filter = filter.into_filter()?;
    let group_by = parse_or_default::<GroupBy>(params.group_by)?;
    let granularity = parse_or_default::<Granularity>(params.granularity)?;

    let key = format!("buckets:{group_by}:{granularity}:{filter:?}");
    let value = cached_view(&state, key, filter, move |records| {
        aggregate(records, group_by, granularity)
    })
    .await?;

    Ok(Json(BucketsResponse {
        group_by,
        granularity,
        buckets: value.as_ref().clone(),
    }))
}

/// GET /api/analytics/users
pub async fn users(
    State(state): State<AppState>,
    Query(filter): Query<FilterParams>,
    Query(params): Query<UsersParams>,
) -> Result<Json<UsersResponse>, AppError> {
    let filter = filter.into_filter()?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_TOP_USERS)
        .clamp(1, MAX_TOP_USERS);

    let key = format!("users:{limit}:{filter:?}");
    let value = cached_view(&state, key, filter, move |records| top_users(records, limit)).await?;

    Ok(Json(UsersResponse {
        users: value.as_ref().clone(),
    }))
}

fn parse_or_default<T>(raw: Option<String>) -> Result<T, AppError>
where
    T: std::str::FromStr<Err = String> + Default,
{
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(T::default()),
        Some(s) => s.parse().map_err(AppError::BadRequest),
    }
}

/// Serve a derived view from the analytics cache, computing it from the
/// matching records on a miss.
///
/// The write generation is captured before the records are read, so a
/// result that raced with a write is returned but not cached.
pub(crate) async fn cached_view<T, F>(
    state: &AppState,
    key: String,
    filter: UsageFilter,
    compute: F,
) -> Result<Arc<T>, AppError>
where
    T: Any + Send + Sync,
    F: FnOnce(&[UsageRecord]) -> T + Send + 'static,
{
    let cache = state.analytics_cache.clone();
    if let Some(hit) = cache.get::<T>(&key) {
        tracing::trace!(key = %key, "Analytics cache hit");
        return Ok(hit);
    }

    let generation = cache.generation();
    let store = state.recorder.store().clone();
    let value = tokio::task::spawn_blocking(move || {
        store.query(&filter).map(|records| compute(&records))
    })
    .await??;

    let value = Arc::new(value);
    cache.insert(key, generation, value.clone());
    Ok(value)
}
