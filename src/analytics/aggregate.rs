//! Pure aggregation over usage records.
//!
//! All functions here are deterministic: input records are processed in a
//! canonical `(timestamp, id)` order and buckets come out of a `BTreeMap`, so
//! the same record set always yields bit-identical output regardless of the
//! order it was loaded in.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use super::{AggregateBucket, Granularity, GroupBy, LatencyStats, UsageSummary, UserUsage};
use crate::usage::UsageRecord;

type BucketKey = (Option<DateTime<Utc>>, Option<String>, Option<String>);

#[derive(Default)]
struct Accumulator {
    request_count: u64,
    success_count: u64,
    error_count: u64,
    prompt_tokens: u64,
    completion_tokens: u64,
    total_cost: f64,
    latencies: Vec<u64>,
}

impl Accumulator {
    fn add(&mut self, record: &UsageRecord) {
        self.request_count += 1;
        if record.is_error() {
            self.error_count += 1;
        } else {
            self.success_count += 1;
        }
        self.prompt_tokens += u64::from(record.prompt_tokens);
        self.completion_tokens += u64::from(record.completion_tokens);
        self.total_cost += record.cost;
        if let Some(ms) = record.latency_sample() {
            self.latencies.push(ms);
        }
    }

    fn finish(self, key: BucketKey) -> AggregateBucket {
        let (window_start, model, provider) = key;
        AggregateBucket {
            window_start,
            model,
            provider,
            request_count: self.request_count,
            success_count: self.success_count,
            error_count: self.error_count,
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens: self.prompt_tokens + self.completion_tokens,
            total_cost: self.total_cost,
            latency: latency_stats(self.latencies),
        }
    }
}

/// Records sorted into canonical processing order.
fn canonical_order(records: &[UsageRecord]) -> Vec<&UsageRecord> {
    let mut sorted: Vec<&UsageRecord> = records.iter().collect();
    sorted.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    sorted
}

/// Roll records up into buckets keyed by window and the `group_by` fields.
///
/// Buckets are ordered by window start, then model, then provider. Every
/// record lands in exactly one bucket, so request counts sum to
/// `records.len()`.
pub fn aggregate(
    records: &[UsageRecord],
    group_by: GroupBy,
    granularity: Granularity,
) -> Vec<AggregateBucket> {
    let mut buckets: BTreeMap<BucketKey, Accumulator> = BTreeMap::new();

    for record in canonical_order(records) {
        let key = (
            granularity.window_start(record.timestamp),
            group_by.includes_model().then(|| record.model.clone()),
            group_by.includes_provider().then(|| record.provider.clone()),
        );
        buckets.entry(key).or_default().add(record);
    }

    buckets
        .into_iter()
        .map(|(key, acc)| acc.finish(key))
        .collect()
}

/// Nearest-rank percentile of an ascending-sorted slice.
///
/// Returns the sample at 1-based rank `ceil(p / 100 * n)`, clamped to
/// `[1, n]`. No interpolation: the result is always an observed value, and
/// equal samples resolve to that shared value.
pub fn percentile_nearest_rank(sorted: &[u64], p: f64) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let n = sorted.len();
    let rank = (p.clamp(0.0, 100.0) / 100.0 * n as f64).ceil() as usize;
    Some(sorted[rank.clamp(1, n) - 1])
}

fn latency_stats(mut samples: Vec<u64>) -> LatencyStats {
    if samples.is_empty() {
        return LatencyStats::default();
    }
    samples.sort_unstable();

    let sum: u64 = samples.iter().sum();
    let count = samples.len() as u64;

    LatencyStats {
        samples: count,
        avg_ms: Some(sum as f64 / count as f64),
        min_ms: samples.first().copied(),
        max_ms: samples.last().copied(),
        p50_ms: percentile_nearest_rank(&samples, 50.0),
        p90_ms: percentile_nearest_rank(&samples, 90.0),
        p95_ms: percentile_nearest_rank(&samples, 95.0),
        p99_ms: percentile_nearest_rank(&samples, 99.0),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Overview counters for the dashboard header.
pub fn summarize(records: &[UsageRecord]) -> UsageSummary {
    let mut summary = UsageSummary::default();
    let mut users: BTreeSet<&str> = BTreeSet::new();
    let mut latency_sum: u64 = 0;
    let mut latency_samples: u64 = 0;

    for record in canonical_order(records) {
        summary.total_requests += 1;
        if record.is_error() {
            summary.error_count += 1;
        } else {
            summary.success_count += 1;
        }
        summary.total_tokens += record.total_tokens();
        summary.total_cost += record.cost;
        if let Some(ms) = record.latency_sample() {
            latency_sum += ms;
            latency_samples += 1;
        }
        if let Some(ref user) = record.user {
            users.insert(user.as_str());
        }
    }

    if summary.total_requests > 0 {
        summary.avg_tokens = round2(summary.total_tokens as f64 / summary.total_requests as f64);
    }
    if latency_samples > 0 {
        summary.avg_latency_ms = Some(round2(latency_sum as f64 / latency_samples as f64));
    }
    summary.unique_users = users.len() as u64;
    summary
}

/// Label used for records without a user.
pub const ANONYMOUS_USER: &str = "anonymous";

/// Requests and cost per user, most active first (ties broken by name),
/// truncated to `limit` entries.
pub fn top_users(records: &[UsageRecord], limit: usize) -> Vec<UserUsage> {
    let mut per_user: HashMap<&str, (u64, f64)> = HashMap::new();
    for record in canonical_order(records) {
        let user = record.user.as_deref().unwrap_or(ANONYMOUS_USER);
        let entry = per_user.entry(user).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += record.cost;
    }

    let mut users: Vec<UserUsage> = per_user
        .into_iter()
        .map(|(user, (requests, cost))| UserUsage {
            user: user.to_string(),
            requests,
            cost,
        })
        .collect();
    users.sort_by(|a, b| b.requests.cmp(&a.requests).then_with(|| a.user.cmp(&b.user)));
    users.truncate(limit);
    users
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------


#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::usage::UsageDraft;
    use chrono::{TimeDelta, TimeZone};
    use proptest::prelude::*;

    fn record_strategy() -> impl Strategy<Value = UsageRecord> {
        (
            prop::sample::select(vec!["gpt-4", "gpt-3.5-turbo", "claude-3-opus-20240229"]),
            prop::sample::select(vec!["openai", "anthropic", "google"]),
            0i64..10_000,
            0i64..10_000,
            0.0f64..1.0,
            0i64..5_000,
            0i64..(7 * 24 * 60),
            any::<bool>(),
        )
            .prop_map(|(model, provider, prompt, completion, cost, latency, minutes, failed)| {
                let ts = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
                    + TimeDelta::minutes(minutes);
                let draft = if failed {
                    UsageDraft::failure(model, provider, "error")
                } else {
                    UsageDraft::success(model, provider, prompt, completion, cost, latency)
                };
                draft.with_timestamp(ts).validate().unwrap()
            })
    }

    fn group_by_strategy() -> impl Strategy<Value = GroupBy> {
        prop::sample::select(vec![
            GroupBy::None,
            GroupBy::Model,
            GroupBy::Provider,
            GroupBy::ModelProvider,
        ])
    }

    fn granularity_strategy() -> impl Strategy<Value = Granularity> {
        prop::sample::select(vec![Granularity::Hour, Granularity::Day, Granularity::All])
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Bucket request counts always sum to the number of input records.
        #[test]
        fn prop_bucket_counts_sum_to_record_count(
            records in prop::collection::vec(record_strategy(), 0..60),
            group_by in group_by_strategy(),
            granularity in granularity_strategy(),
        ) {
            let buckets = aggregate(&records, group_by, granularity);
            let total: u64 = buckets.iter().map(|b| b.request_count).sum();
            prop_assert_eq!(total, records.len() as u64);

            for b in &buckets {
                prop_assert_eq!(b.request_count, b.success_count + b.error_count);
                prop_assert!(b.latency.samples <= b.success_count);
            }
        }

        /// Re-running over the same set, in any order, is bit-identical.
        #[test]
        fn prop_aggregation_is_deterministic(
            records in prop::collection::vec(record_strategy(), 0..60),
            group_by in group_by_strategy(),
            granularity in granularity_strategy(),
        ) {
            let first = aggregate(&records, group_by, granularity);
            let second = aggregate(&records, group_by, granularity);
            prop_assert_eq!(&first, &second);

            let mut reversed = records.clone();
            reversed.reverse();
            let third = aggregate(&reversed, group_by, granularity);
            prop_assert_eq!(first.len(), third.len());
            for (a, b) in first.iter().zip(third.iter()) {
                prop_assert_eq!(a.total_cost.to_bits(), b.total_cost.to_bits());
                prop_assert_eq!(a, b);
            }

            prop_assert_eq!(summarize(&records), summarize(&reversed));
        }

        /// Nearest-rank percentiles are observed samples and monotonic in p.
        #[test]
        fn prop_percentile_is_observed_and_monotonic(
            mut samples in prop::collection::vec(1u64..100_000, 1..200),
            p in 0.0f64..100.0,
        ) {
            samples.sort_unstable();
            let value = percentile_nearest_rank(&samples, p).unwrap();
            prop_assert!(samples.contains(&value));
            let higher = percentile_nearest_rank(&samples, (p + 10.0).min(100.0)).unwrap();
            prop_assert!(higher >= value);
        }
    }
}
