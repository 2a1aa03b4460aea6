//! Usage records: one row per gateway request.
//!
//! A [`UsageDraft`] is the loosely-typed metadata handed over by the chat
//! handler (or an external caller). [`UsageDraft::validate`] turns it into an
//! immutable [`UsageRecord`] or rejects it with a [`ValidationError`].

pub mod recorder;
pub mod store;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use self::recorder::{RecordError, UsageRecorder};
pub use self::store::{SqliteUsageStore, StoreError, UsageFilter, UsageStore};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Outcome of a single gateway request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageStatus {
    Success,
    Error,
}

impl UsageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for UsageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UsageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown usage status: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// UsageRecord
// ---------------------------------------------------------------------------

/// A persisted record of one LLM request. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub provider: String,
    pub user: Option<String>,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    /// Cost in USD.
    pub cost: f64,
    /// Wall-clock latency of the gateway call. `None` when unknown.
    pub latency_ms: Option<u64>,
    pub status: UsageStatus,
    pub error_message: Option<String>,
    pub prompt: Option<String>,
    pub response: Option<String>,
}

impl UsageRecord {
    pub fn total_tokens(&self) -> u64 {
        u64::from(self.prompt_tokens) + u64::from(self.completion_tokens)
    }

    pub fn is_error(&self) -> bool {
        self.status == UsageStatus::Error
    }

    /// Latency value usable for averages and percentiles.
    ///
    /// Failed requests and missing or zero durations yield `None`.
    pub fn latency_sample(&self) -> Option<u64> {
        match (self.status, self.latency_ms) {
            (UsageStatus::Success, Some(ms)) if ms > 0 => Some(ms),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Malformed usage metadata, rejected before anything is written.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` must be non-negative, got {value}")]
    Negative { field: &'static str, value: f64 },

    #[error("field `{0}` must be a finite number")]
    NotFinite(&'static str),

    #[error("field `{field}` exceeds maximum of {max}")]
    OutOfRange { field: &'static str, max: u64 },
}

/// Unvalidated metadata for one completed (or failed) gateway call.
///
/// A draft with `error` set describes a failed call; token counts and cost
/// are then optional. Otherwise token counts, cost and latency are required.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageDraft {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub prompt_tokens: Option<i64>,
    #[serde(default)]
    pub completion_tokens: Option<i64>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub latency_ms: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
}

impl UsageDraft {
    /// Draft for a successful call.
    pub fn success(
        model: impl Into<String>,
        provider: impl Into<String>,
        prompt_tokens: i64,
        completion_tokens: i64,
        cost: f64,
        latency_ms: i64,
    ) -> Self {
        Self {
            model: Some(model.into()),
            provider: Some(provider.into()),
            prompt_tokens: Some(prompt_tokens),
            completion_tokens: Some(completion_tokens),
            cost: Some(cost),
            latency_ms: Some(latency_ms),
            ..Default::default()
        }
    }

    /// Draft for a failed call.
    pub fn failure(
        model: impl Into<String>,
        provider: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            model: Some(model.into()),
            provider: Some(provider.into()),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: i64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    pub fn with_content(mut self, prompt: Option<String>, response: Option<String>) -> Self {
        self.prompt = prompt;
        self.response = response;
        self
    }

    /// Check the draft and build an immutable record with a fresh id.
    ///
    /// Timestamps are truncated to microseconds, the precision of the store.
    pub fn validate(self) -> Result<UsageRecord, ValidationError> {
        let model = required_text("model", self.model)?;
        let provider = required_text("provider", self.provider)?;

        let error_message = self
            .error
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty());
        let status = if error_message.is_some() {
            UsageStatus::Error
        } else {
            UsageStatus::Success
        };

        let (prompt_tokens, completion_tokens, cost, latency_ms) = match status {
            UsageStatus::Success => (
                tokens("prompt_tokens", require("prompt_tokens", self.prompt_tokens)?)?,
                tokens(
                    "completion_tokens",
                    require("completion_tokens", self.completion_tokens)?,
                )?,
                cost(require("cost", self.cost)?)?,
                Some(latency(require("latency_ms", self.latency_ms)?)?),
            ),
            UsageStatus::Error => (
                tokens("prompt_tokens", self.prompt_tokens.unwrap_or(0))?,
                tokens("completion_tokens", self.completion_tokens.unwrap_or(0))?,
                cost(self.cost.unwrap_or(0.0))?,
                self.latency_ms.map(latency).transpose()?,
            ),
        };

        let user = self
            .user
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());

        Ok(UsageRecord {
            id: Uuid::new_v4(),
            timestamp: self.timestamp.unwrap_or_else(Utc::now).trunc_subsecs(6),
            model,
            provider,
            user,
            prompt_tokens,
            completion_tokens,
            cost,
            latency_ms,
            status,
            error_message,
            prompt: self.prompt,
            response: self.response,
        })
    }
}

fn require<T>(field: &'static str, value: Option<T>) -> Result<T, ValidationError> {
    value.ok_or(ValidationError::MissingField(field))
}

fn required_text(field: &'static str, value: Option<String>) -> Result<String, ValidationError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ValidationError::MissingField(field))
}

fn tokens(field: &'static str, value: i64) -> Result<u32, ValidationError> {
    if value < 0 {
        return Err(ValidationError::Negative {
            field,
            value: value as f64,
        });
    }
    u32::try_from(value).map_err(|_| ValidationError::OutOfRange {
        field,
        max: u64::from(u32::MAX),
    })
}

fn cost(value: f64) -> Result<f64, ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NotFinite("cost"));
    }
    if value < 0.0 {
        return Err(ValidationError::Negative {
            field: "cost",
            value,
        });
    }
    // Normalise -0.0 so stored sums stay bit-identical.
    Ok(if value == 0.0 { 0.0 } else { value })
}

fn latency(value: i64) -> Result<u64, ValidationError> {
    u64::try_from(value).map_err(|_| ValidationError::Negative {
        field: "latency_ms",
        value: value as f64,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
