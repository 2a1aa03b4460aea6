//! Usage record persistence.
//!
//! [`UsageStore`] is the repository seam; [`SqliteUsageStore`] is the only
//! production implementation and writes to the `usage_records` table.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Row, ToSql, params};
use uuid::Uuid;

use crate::db::Database;
use crate::usage::{UsageRecord, UsageStatus};

/// Failure to read or write the usage store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Filter for record queries. `from` is inclusive, `to` exclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageFilter {
    pub model: Option<String>,
    pub provider: Option<String>,
    pub user: Option<String>,
    pub status: Option<UsageStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl UsageFilter {
    /// Whether a record falls inside this filter (mirrors the SQL predicate).
    pub fn matches(&self, record: &UsageRecord) -> bool {
        self.model.as_ref().is_none_or(|m| *m == record.model)
            && self.provider.as_ref().is_none_or(|p| *p == record.provider)
            && self
                .user
                .as_ref()
                .is_none_or(|u| record.user.as_ref() == Some(u))
            && self.status.is_none_or(|s| s == record.status)
            && self.from.is_none_or(|from| record.timestamp >= from)
            && self.to.is_none_or(|to| record.timestamp < to)
    }

    /// Build the `WHERE` clause and its bind values.
    fn to_sql(&self) -> (String, Vec<String>) {
        let mut where_clauses: Vec<String> = Vec::new();
        let mut bind_values: Vec<String> = Vec::new();

        if let Some(ref model) = self.model {
            bind_values.push(model.clone());
            where_clauses.push(format!("model = ?{}", bind_values.len()));
        }
        if let Some(ref provider) = self.provider {
            bind_values.push(provider.clone());
            where_clauses.push(format!("provider = ?{}", bind_values.len()));
        }
        if let Some(ref user) = self.user {
            bind_values.push(user.clone());
            where_clauses.push(format!("user_name = ?{}", bind_values.len()));
        }
        if let Some(status) = self.status {
            bind_values.push(status.as_str().to_string());
            where_clauses.push(format!("status = ?{}", bind_values.len()));
        }
        if let Some(from) = self.from {
            bind_values.push(format_timestamp(&from));
            where_clauses.push(format!("created_at >= ?{}", bind_values.len()));
        }
        if let Some(to) = self.to {
            bind_values.push(format_timestamp(&to));
            where_clauses.push(format!("created_at < ?{}", bind_values.len()));
        }

        let where_sql = if where_clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_clauses.join(" AND "))
        };
        (where_sql, bind_values)
    }
}

/// Repository interface for usage records.
pub trait UsageStore: Send + Sync {
    /// Insert a single record in one statement.
    fn insert(&self, record: &UsageRecord) -> Result<(), StoreError>;

    /// Insert many records in one transaction: all or none.
    fn insert_batch(&self, records: &[UsageRecord]) -> Result<(), StoreError>;

    fn get(&self, id: Uuid) -> Result<Option<UsageRecord>, StoreError>;

    /// All matching records, oldest first (ties broken by id).
    fn query(&self, filter: &UsageFilter) -> Result<Vec<UsageRecord>, StoreError>;

    /// One page of matching records, newest first, plus the total match count.
    fn page(
        &self,
        filter: &UsageFilter,
        page: u32,
        per_page: u32,
    ) -> Result<(Vec<UsageRecord>, u64), StoreError>;
}

const INSERT_SQL: &str = "INSERT INTO usage_records (id, created_at, model, provider, user_name, \
     prompt_tokens, completion_tokens, cost, latency_ms, status, error_message, prompt, response) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)";

const SELECT_COLUMNS: &str = "id, created_at, model, provider, user_name, prompt_tokens, \
     completion_tokens, cost, latency_ms, status, error_message, prompt, response";

/// SQLite-backed usage store.
#[derive(Clone)]
pub struct SqliteUsageStore {
    db: Database,
}

impl SqliteUsageStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl UsageStore for SqliteUsageStore {
    fn insert(&self, record: &UsageRecord) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(INSERT_SQL)?;
            execute_insert(&mut stmt, record)
        })?;
        Ok(())
    }

    fn insert_batch(&self, records: &[UsageRecord]) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare_cached(INSERT_SQL)?;
                for record in records {
                    execute_insert(&mut stmt, record)?;
                }
            }
            tx.commit()
        })?;
        Ok(())
    }

    fn get(&self, id: Uuid) -> Result<Option<UsageRecord>, StoreError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM usage_records WHERE id = ?1");
        let result = self.db.with_conn(|conn| {
            match conn.query_row(&sql, params![id.to_string()], record_from_row) {
                Ok(r) => Ok(Some(r)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })?;
        Ok(result)
    }

    fn query(&self, filter: &UsageFilter) -> Result<Vec<UsageRecord>, StoreError> {
        let (where_sql, bind_values) = filter.to_sql();
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM usage_records {where_sql} ORDER BY created_at ASC, id ASC"
        );

        let records = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let p: Vec<&dyn ToSql> = bind_values.iter().map(|v| v as &dyn ToSql).collect();
            let rows = stmt.query_map(p.as_slice(), record_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()
        })?;
        Ok(records)
    }

    fn page(
        &self,
        filter: &UsageFilter,
        page: u32,
        per_page: u32,
    ) -> Result<(Vec<UsageRecord>, u64), StoreError> {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let offset = i64::from(page - 1) * i64::from(per_page);

        let (where_sql, bind_values) = filter.to_sql();
        let count_sql = format!("SELECT COUNT(*) FROM usage_records {where_sql}");
        let data_sql = format!(
            "SELECT {SELECT_COLUMNS} FROM usage_records {where_sql} \
             ORDER BY created_at DESC, id DESC LIMIT ?{} OFFSET ?{}",
            bind_values.len() + 1,
            bind_values.len() + 2,
        );

        let result = self.db.with_conn(|conn| {
            let total: i64 = {
                let mut stmt = conn.prepare(&count_sql)?;
                let p: Vec<&dyn ToSql> = bind_values.iter().map(|v| v as &dyn ToSql).collect();
                stmt.query_row(p.as_slice(), |row| row.get(0))?
            };

            let mut data_params: Vec<Box<dyn ToSql>> = bind_values
                .iter()
                .map(|v| Box::new(v.clone()) as Box<dyn ToSql>)
                .collect();
            data_params.push(Box::new(i64::from(per_page)));
            data_params.push(Box::new(offset));

            let mut stmt = conn.prepare(&data_sql)?;
            let p: Vec<&dyn ToSql> = data_params.iter().map(|v| v.as_ref()).collect();
            let rows = stmt.query_map(p.as_slice(), record_from_row)?;
            let data = rows.collect::<Result<Vec<_>, _>>()?;
            Ok((data, total))
        })?;

        let (data, total) = result;
        Ok((data, u64::try_from(total).unwrap_or(0)))
    }
}

fn execute_insert(
    stmt: &mut rusqlite::CachedStatement<'_>,
    record: &UsageRecord,
) -> Result<(), rusqlite::Error> {
    let latency = record.latency_ms.map(|ms| i64::try_from(ms).unwrap_or(i64::MAX));
    stmt.execute(params![
        record.id.to_string(),
        format_timestamp(&record.timestamp),
        record.model,
        record.provider,
        record.user,
        record.prompt_tokens,
        record.completion_tokens,
        record.cost,
        latency,
        record.status.as_str(),
        record.error_message,
        record.prompt,
        record.response,
    ])?;
    Ok(())
}

fn record_from_row(row: &Row<'_>) -> Result<UsageRecord, rusqlite::Error> {
    let id: String = row.get(0)?;
    let created_at: String = row.get(1)?;
    let latency: Option<i64> = row.get(8)?;
    let status: String = row.get(9)?;

    Ok(UsageRecord {
        id: Uuid::parse_str(&id).map_err(|e| conversion_error(0, e))?,
        timestamp: parse_timestamp(&created_at).map_err(|e| conversion_error(1, e))?,
        model: row.get(2)?,
        provider: row.get(3)?,
        user: row.get(4)?,
        prompt_tokens: row.get(5)?,
        completion_tokens: row.get(6)?,
        cost: row.get(7)?,
        latency_ms: latency.map(|ms| u64::try_from(ms).unwrap_or(0)),
        status: status
            .parse::<UsageStatus>()
            .map_err(|e| conversion_error(9, StatusParseError(e)))?,
        error_message: row.get(10)?,
        prompt: row.get(11)?,
        response: row.get(12)?,
    })
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct StatusParseError(String);

fn conversion_error<E>(column: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}

/// Fixed-width RFC 3339 with microseconds and `Z`, so text order is time order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::UsageDraft;
    use chrono::TimeZone;

    fn store() -> SqliteUsageStore {
        SqliteUsageStore::new(Database::open_in_memory().unwrap())
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, hour, minute, 0).unwrap()
    }

    fn success(model: &str, provider: &str, ts: DateTime<Utc>) -> UsageRecord {
        UsageDraft::success(model, provider, 100, 50, 0.01, 250)
            .with_timestamp(ts)
            .validate()
            .unwrap()
    }

    fn count_rows(store: &SqliteUsageStore) -> i64 {
        store
            .db
            .with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM usage_records", [], |row| row.get(0)))
            .unwrap()
    }

    #[test]
    fn test_insert_and_get_roundtrip() {
        let store = store();
        let record = UsageDraft::success("gpt-4", "openai", 12, 34, 0.000_123, 987)
            .with_user(Some("alice".into()))
            .with_content(Some("hi".into()), Some("hello".into()))
            .validate()
            .unwrap();

        store.insert(&record).unwrap();
        let loaded = store.get(record.id).unwrap().unwrap();
        assert_eq!(loaded, record);
        assert_eq!(count_rows(&store), 1);
    }

    #[test]
    fn test_failed_record_roundtrip() {
        let store = store();
        let record = UsageDraft::failure("claude-3-opus-20240229", "anthropic", "502 from upstream")
            .validate()
            .unwrap();

        store.insert(&record).unwrap();
        assert_eq!(store.get(record.id).unwrap().unwrap(), record);
    }

    #[test]
    fn test_get_missing_returns_none() {
        let store = store();
        assert!(store.get(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let store = store();
        let record = success("gpt-4", "openai", at(1, 0));
        store.insert(&record).unwrap();
        assert!(store.insert(&record).is_err());
        assert_eq!(count_rows(&store), 1);
    }

    #[test]
    fn test_insert_batch_is_all_or_nothing() {
        let store = store();
        let first = success("gpt-4", "openai", at(1, 0));
        let second = success("gpt-4", "openai", at(1, 5));
        // Duplicate id in the same batch fails the whole transaction.
        let batch = vec![first.clone(), second, first];

        assert!(store.insert_batch(&batch).is_err());
        assert_eq!(count_rows(&store), 0);
    }

    #[test]
    fn test_insert_batch() {
        let store = store();
        let batch: Vec<UsageRecord> = (0..10).map(|m| success("gpt-4", "openai", at(2, m))).collect();
        store.insert_batch(&batch).unwrap();
        assert_eq!(count_rows(&store), 10);
    }

    #[test]
    fn test_query_orders_oldest_first_and_filters() {
        let store = store();
        let late = success("gpt-4", "openai", at(5, 0));
        let early = success("gpt-4", "openai", at(3, 0));
        let other = success("claude-3-opus-20240229", "anthropic", at(4, 0));
        store.insert_batch(&[late.clone(), early.clone(), other.clone()]).unwrap();

        let all = store.query(&UsageFilter::default()).unwrap();
        let ids: Vec<Uuid> = all.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![early.id, other.id, late.id]);

        let openai = store
            .query(&UsageFilter {
                provider: Some("openai".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(openai.len(), 2);
        assert!(openai.iter().all(|r| r.provider == "openai"));
    }

    #[test]
    fn test_query_time_window_is_half_open() {
        let store = store();
        let records: Vec<UsageRecord> = [1, 2, 3].iter().map(|h| success("m", "p", at(*h, 0))).collect();
        store.insert_batch(&records).unwrap();

        let filter = UsageFilter {
            from: Some(at(2, 0)),
            to: Some(at(3, 0)),
            ..Default::default()
        };
        let found = store.query(&filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].timestamp, at(2, 0));
        assert!(filter.matches(&found[0]));
        assert!(!filter.matches(&records[2]));
    }

    #[test]
    fn test_query_by_status_and_user() {
        let store = store();
        let ok = UsageDraft::success("m", "p", 1, 1, 0.0, 1)
            .with_user(Some("bob".into()))
            .validate()
            .unwrap();
        let failed = UsageDraft::failure("m", "p", "nope").validate().unwrap();
        store.insert_batch(&[ok.clone(), failed.clone()]).unwrap();

        let errors = store
            .query(&UsageFilter {
                status: Some(UsageStatus::Error),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(errors, vec![failed]);

        let bobs = store
            .query(&UsageFilter {
                user: Some("bob".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(bobs, vec![ok]);
    }

    #[test]
    fn test_page_newest_first_with_total() {
        let store = store();
        let records: Vec<UsageRecord> = (0..5).map(|m| success("m", "p", at(6, m))).collect();
        store.insert_batch(&records).unwrap();

        let (first, total) = store.page(&UsageFilter::default(), 1, 2).unwrap();
        assert_eq!(total, 5);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].timestamp, at(6, 4));
        assert_eq!(first[1].timestamp, at(6, 3));

        let (last, _) = store.page(&UsageFilter::default(), 3, 2).unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].timestamp, at(6, 0));

        let (beyond, total) = store.page(&UsageFilter::default(), 9, 2).unwrap();
        assert!(beyond.is_empty());
        assert_eq!(total, 5);
    }

    #[test]
    fn test_timestamp_format_is_fixed_width() {
        let a = format_timestamp(&at(1, 0));
        let b = format_timestamp(&Utc.with_ymd_and_hms(2025, 6, 1, 1, 0, 0).unwrap());
        assert_eq!(a, "2025-06-01T01:00:00.000000Z");
        assert_eq!(a.len(), b.len());
        assert_eq!(parse_timestamp(&a).unwrap(), at(1, 0));
    }
}
