//! History query options and the range predicate they translate into.

use crate::record::{millis_to_datetime, StoredDocument};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::de::{self, Unexpected, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sort direction over the timestamp.
///
/// Serialized as `"asc"`/`"desc"`; deserialized from those strings, from
/// `"1"`/`"-1"`, or from the integers `1`/`-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SortOrder {
    /// Oldest first (default)
    #[default]
    #[serde(rename = "asc")]
    Ascending,
    /// Newest first
    #[serde(rename = "desc")]
    Descending,
}

impl<'de> Deserialize<'de> for SortOrder {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(SortOrderVisitor)
    }
}

struct SortOrderVisitor;

impl<'de> Visitor<'de> for SortOrderVisitor {
    type Value = SortOrder;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"asc\", \"desc\", 1 or -1")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<SortOrder, E> {
        v.parse().map_err(|_| E::invalid_value(Unexpected::Str(v), &self))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<SortOrder, E> {
        match v {
            1 => Ok(SortOrder::Ascending),
            -1 => Ok(SortOrder::Descending),
            _ => Err(E::invalid_value(Unexpected::Signed(v), &self)),
        }
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<SortOrder, E> {
        match v {
            1 => Ok(SortOrder::Ascending),
            _ => Err(E::invalid_value(Unexpected::Unsigned(v), &self)),
        }
    }
}

impl FromStr for SortOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" | "1" => Ok(SortOrder::Ascending),
            "desc" | "descending" | "-1" => Ok(SortOrder::Descending),
            other => Err(Error::InvalidOptions(format!("unknown sort order: {}", other))),
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Ascending => write!(f, "asc"),
            SortOrder::Descending => write!(f, "desc"),
        }
    }
}

/// Options for a history range query.
///
/// Both bounds are inclusive epoch milliseconds. Absent fields mean
/// "unbounded", ascending order, and no limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryOptions {
    /// Lower bound (ts >= start)
    pub start: Option<i64>,
    /// Upper bound (ts <= end)
    pub end: Option<i64>,
    /// Sort direction
    pub sort: SortOrder,
    /// Maximum number of entries returned
    pub limit: Option<usize>,
}

impl HistoryOptions {
    /// Unbounded, ascending, no limit
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to `start..=end`
    pub fn between(mut self, start: i64, end: i64) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    /// Only entries at or after `start`
    pub fn since(mut self, start: i64) -> Self {
        self.start = Some(start);
        self
    }

    /// Only entries at or before `end`
    pub fn until(mut self, end: i64) -> Self {
        self.end = Some(end);
        self
    }

    /// Set the sort direction
    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    /// Newest first
    pub fn descending(self) -> Self {
        self.with_sort(SortOrder::Descending)
    }

    /// Cap the number of returned entries
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check the options for consistency
    pub fn validate(&self) -> Result<()> {
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(Error::InvalidOptions(format!(
                    "start {} is after end {}",
                    start, end
                )));
            }
        }
        if self.limit == Some(0) {
            return Err(Error::InvalidOptions("limit must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Translate into a backend range predicate and find options for `id`.
    pub fn to_query(&self, id: &str) -> Result<(RangeFilter, FindOptions)> {
        self.validate()?;

        let filter = RangeFilter {
            id: id.to_string(),
            from: self.start.map(bound_to_datetime).transpose()?,
            to: self.end.map(bound_to_datetime).transpose()?,
        };
        let options = FindOptions {
            sort: self.sort,
            limit: self.limit,
        };

        Ok((filter, options))
    }
}

fn bound_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    millis_to_datetime(ms)
        .ok_or_else(|| Error::InvalidOptions(format!("timestamp {} is out of range", ms)))
}

/// Range predicate: `id == id && from <= ts <= to`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeFilter {
    /// Exact identifier match
    pub id: String,
    /// Inclusive lower bound
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound
    pub to: Option<DateTime<Utc>>,
}

impl RangeFilter {
    /// Match every document of `id`
    pub fn for_id<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            from: None,
            to: None,
        }
    }

    /// Whether a document satisfies the predicate
    pub fn matches(&self, doc: &StoredDocument) -> bool {
        doc.id == self.id
            && self.from.map_or(true, |from| doc.ts >= from)
            && self.to.map_or(true, |to| doc.ts <= to)
    }
}

/// Sort and limit applied by the backend after filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FindOptions {
    /// Order by timestamp
    pub sort: SortOrder,
    /// Maximum number of documents
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Record, State};

    fn doc(id: &str, ts: i64) -> StoredDocument {
        StoredDocument::try_from(Record::new(id, State::new(0, ts)).unwrap()).unwrap()
    }

    #[test]
    fn test_sort_order_parsing() {
        assert_eq!("asc".parse::<SortOrder>().unwrap(), SortOrder::Ascending);
        assert_eq!("DESC".parse::<SortOrder>().unwrap(), SortOrder::Descending);
        assert_eq!("-1".parse::<SortOrder>().unwrap(), SortOrder::Descending);
        assert_eq!("1".parse::<SortOrder>().unwrap(), SortOrder::Ascending);
        assert!("sideways".parse::<SortOrder>().is_err());
    }

    #[test]
    fn test_options_from_json() {
        let options: HistoryOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, HistoryOptions::default());

        let options: HistoryOptions =
            serde_json::from_str(r#"{"start": 100, "end": 200, "sort": "desc", "limit": 5}"#)
                .unwrap();
        assert_eq!(
            options,
            HistoryOptions::new().between(100, 200).descending().with_limit(5)
        );
    }

    #[test]
    fn test_sort_from_json_numbers() {
        let options: HistoryOptions = serde_json::from_str(r#"{"sort": -1}"#).unwrap();
        assert_eq!(options.sort, SortOrder::Descending);
        let options: HistoryOptions = serde_json::from_str(r#"{"sort": 1}"#).unwrap();
        assert_eq!(options.sort, SortOrder::Ascending);
        let options: HistoryOptions = serde_json::from_str(r#"{"sort": "-1"}"#).unwrap();
        assert_eq!(options.sort, SortOrder::Descending);

        assert!(serde_json::from_str::<HistoryOptions>(r#"{"sort": 0}"#).is_err());
        assert!(serde_json::from_str::<HistoryOptions>(r#"{"sort": 2}"#).is_err());
        assert!(serde_json::from_str::<HistoryOptions>(r#"{"sort": "up"}"#).is_err());
        assert_eq!(serde_json::to_string(&SortOrder::Descending).unwrap(), r#""desc""#);
    }

    #[test]
    fn test_validation() {
        assert!(HistoryOptions::new().between(200, 100).validate().is_err());
        assert!(HistoryOptions::new().with_limit(0).validate().is_err());
        assert!(HistoryOptions::new().between(100, 100).validate().is_ok());
    }

    #[test]
    fn test_zero_start_is_a_bound() {
        let (filter, _) = HistoryOptions::new().since(0).to_query("x").unwrap();
        assert!(filter.from.is_some());
        assert!(!filter.matches(&doc("x", -1)));
        assert!(filter.matches(&doc("x", 0)));
    }

    #[test]
    fn test_inclusive_bounds() {
        let (filter, options) = HistoryOptions::new().between(150, 250).to_query("x").unwrap();
        assert_eq!(options.sort, SortOrder::Ascending);
        assert!(!filter.matches(&doc("x", 100)));
        assert!(filter.matches(&doc("x", 150)));
        assert!(filter.matches(&doc("x", 200)));
        assert!(filter.matches(&doc("x", 250)));
        assert!(!filter.matches(&doc("x", 300)));
        assert!(!filter.matches(&doc("y", 200)));
    }

    #[test]
    fn test_out_of_range_bound_rejected() {
        let result = HistoryOptions::new().until(i64::MAX).to_query("x");
        assert!(matches!(result, Err(Error::InvalidOptions(_))));
    }
}
