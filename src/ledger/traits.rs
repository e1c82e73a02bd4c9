//! Usage ledger traits and types for per-server daily playtime.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Minutes played on one server for one calendar day.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageRecord {
    pub minutes_played: u32,
    /// Day (in the reference time zone) on which `minutes_played` was last zeroed.
    pub last_reset_date: NaiveDate,
}

impl UsageRecord {
    /// A zeroed record for `today`.
    pub fn fresh(today: NaiveDate) -> Self {
        Self {
            minutes_played: 0,
            last_reset_date: today,
        }
    }

    /// Whether the counter belongs to a previous day and must be treated as zero.
    pub fn is_stale(&self, today: NaiveDate) -> bool {
        self.last_reset_date != today
    }

    /// Minutes that count toward today's cap.
    pub fn minutes_for(&self, today: NaiveDate) -> u32 {
        if self.is_stale(today) {
            0
        } else {
            self.minutes_played
        }
    }
}

/// Persistent per-server usage counters.
///
/// A missing record is not an error: callers bootstrap it with
/// [`UsageRecord::fresh`].
#[async_trait]
pub trait UsageLedger: Send + Sync {
    /// Load the record for `key`, if one was ever written.
    async fn get(&self, key: &str) -> Result<Option<UsageRecord>>;

    /// Overwrite the whole record for `key`.
    async fn set(&self, key: &str, record: &UsageRecord) -> Result<()>;

    /// Add `delta` to `minutes_played` without reading it first.
    ///
    /// Implementations must apply the change atomically on the storage side
    /// so a concurrent `set` or `increment` is never lost.
    async fn increment(&self, key: &str, delta: u32) -> Result<()>;

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn fresh_record_is_zero_for_today() {
        let record = UsageRecord::fresh(day(2));
        assert_eq!(record.minutes_played, 0);
        assert!(!record.is_stale(day(2)));
    }

    #[test]
    fn stale_record_counts_as_zero() {
        let record = UsageRecord {
            minutes_played: 120,
            last_reset_date: day(1),
        };
        assert!(record.is_stale(day(2)));
        assert_eq!(record.minutes_for(day(2)), 0);
        assert_eq!(record.minutes_for(day(1)), 120);
    }

    #[test]
    fn usage_record_serialization() {
        let record = UsageRecord {
            minutes_played: 42,
            last_reset_date: day(5),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("2024-01-05"));
        let back: UsageRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
