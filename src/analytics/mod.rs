//! Usage analytics: rollups of [`UsageRecord`](crate::usage::UsageRecord)s
//! by model, provider and time window.
//!
//! Buckets are derived data. They are recomputed from records on demand and
//! only ever cached through [`AnalyticsCache`], which is invalidated by every
//! write.

pub mod aggregate;
pub mod cache;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

pub use self::aggregate::{aggregate, percentile_nearest_rank, summarize, top_users};
pub use self::cache::AnalyticsCache;

// ---------------------------------------------------------------------------
// Grouping keys
// ---------------------------------------------------------------------------

/// Which record attributes form the bucket key (besides the time window).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    /// One bucket per window.
    None,
    Model,
    Provider,
    #[default]
    ModelProvider,
}

impl GroupBy {
    pub fn includes_model(&self) -> bool {
        matches!(self, Self::Model | Self::ModelProvider)
    }

    pub fn includes_provider(&self) -> bool {
        matches!(self, Self::Provider | Self::ModelProvider)
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Model => write!(f, "model"),
            Self::Provider => write!(f, "provider"),
            Self::ModelProvider => write!(f, "model_provider"),
        }
    }
}

impl FromStr for GroupBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "model" => Ok(Self::Model),
            "provider" => Ok(Self::Provider),
            "model_provider" | "model-provider" | "both" => Ok(Self::ModelProvider),
            _ => Err(format!("Unknown group-by key: {s}")),
        }
    }
}

/// Width of the time windows buckets are split into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Hour,
    #[default]
    Day,
    /// A single window spanning the whole queried range.
    All,
}

impl Granularity {
    /// Start of the UTC window containing `ts`, or `None` for [`Granularity::All`].
    pub fn window_start(&self, ts: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let width = match self {
            Self::Hour => TimeDelta::hours(1),
            Self::Day => TimeDelta::days(1),
            Self::All => return None,
        };
        // Truncation of a UTC timestamp to a whole hour or day cannot fail
        // for in-range chrono values; fall back to the raw timestamp anyway.
        Some(ts.duration_trunc(width).unwrap_or(ts))
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hour => write!(f, "hour"),
            Self::Day => write!(f, "day"),
            Self::All => write!(f, "all"),
        }
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hour" | "hourly" => Ok(Self::Hour),
            "day" | "daily" => Ok(Self::Day),
            "all" | "total" => Ok(Self::All),
            _ => Err(format!("Unknown granularity: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// Latency statistics over the successful, non-zero-latency records of a
/// bucket. Percentiles use the nearest-rank method
/// (see [`percentile_nearest_rank`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    /// Number of records that contributed a latency sample.
    pub samples: u64,
    pub avg_ms: Option<f64>,
    pub min_ms: Option<u64>,
    pub max_ms: Option<u64>,
    pub p50_ms: Option<u64>,
    pub p90_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
}

/// Rollup of the records sharing one `(window, model, provider)` key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateBucket {
    /// Window start; `None` when aggregating with [`Granularity::All`].
    pub window_start: Option<DateTime<Utc>>,
    /// Present when the grouping includes the model.
    pub model: Option<String>,
    /// Present when the grouping includes the provider.
    pub provider: Option<String>,
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub latency: LatencyStats,
}

impl AggregateBucket {
    pub fn error_rate(&self) -> f64 {
        if self.request_count == 0 {
            0.0
        } else {
            self.error_count as f64 / self.request_count as f64
        }
    }
}

/// Overview counters for a set of records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageSummary {
    pub total_requests: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub total_tokens: u64,
    /// Mean tokens per request (all requests), rounded to 2 decimals.
    pub avg_tokens: f64,
    pub total_cost: f64,
    /// Mean latency over latency samples, rounded to 2 decimals.
    pub avg_latency_ms: Option<f64>,
    pub unique_users: u64,
}

/// Per-user request and cost totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserUsage {
    pub user: String,
    pub requests: u64,
    pub cost: f64,
}
