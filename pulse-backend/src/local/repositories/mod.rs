mod account_repository;
mod notification_repository;
mod object_repository;
mod post_repository;
mod profile_repository;
mod report_repository;
mod search_query_repository;

pub use account_repository::AccountRepository;
pub use notification_repository::NotificationRepository;
pub use object_repository::ObjectRepository;
pub use post_repository::PostRepository;
pub use profile_repository::ProfileRepository;
pub use report_repository::ReportRepository;
pub use search_query_repository::SearchQueryRepository;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use uuid::Uuid;

const DAY_FORMAT: &str = "%Y-%m-%d";

/// Fixed-width UTC timestamps, so text ordering matches time ordering
pub(crate) fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn day(date: NaiveDate) -> String {
    date.format(DAY_FORMAT).to_string()
}

/// `%term%` with LIKE wildcards in the term escaped (use with `ESCAPE '\'`)
pub(crate) fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn uuid_at(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_uuid_at(row: &Row, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| Uuid::parse_str(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

pub(crate) fn timestamp_at(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    raw.parse::<DateTime<Utc>>()
        .map_err(|e| conversion_error(idx, e))
}

pub(crate) fn day_at(row: &Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, DAY_FORMAT).map_err(|e| conversion_error(idx, e))
}
