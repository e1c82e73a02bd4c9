//! In-memory usage ledger implementation.

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use super::traits::{UsageLedger, UsageRecord};

/// Usage ledger backed by a `parking_lot::Mutex<HashMap<..>>`. Lost on restart.
pub struct InMemoryUsageLedger {
    records: Mutex<HashMap<String, UsageRecord>>,
}

impl InMemoryUsageLedger {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Seed a record, for tests and console experiments.
    pub fn with_record(self, key: &str, record: UsageRecord) -> Self {
        self.records.lock().insert(key.to_string(), record);
        self
    }
}

impl Default for InMemoryUsageLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UsageLedger for InMemoryUsageLedger {
    async fn get(&self, key: &str) -> Result<Option<UsageRecord>> {
        Ok(self.records.lock().get(key).copied())
    }

    async fn set(&self, key: &str, record: &UsageRecord) -> Result<()> {
        self.records.lock().insert(key.to_string(), *record);
        Ok(())
    }

    async fn increment(&self, key: &str, delta: u32) -> Result<()> {
        let mut records = self.records.lock();
        match records.get_mut(key) {
            Some(record) => {
                record.minutes_played = record.minutes_played.saturating_add(delta);
                Ok(())
            }
            None => bail!("usage record not found: {key}"),
        }
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
    }

    #[tokio::test]
    async fn missing_record_is_none() {
        let ledger = InMemoryUsageLedger::new();
        assert!(ledger.get("factorio").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_then_get() {
        let ledger = InMemoryUsageLedger::new();
        let record = UsageRecord {
            minutes_played: 7,
            last_reset_date: today(),
        };
        ledger.set("factorio", &record).await.unwrap();
        assert_eq!(ledger.get("factorio").await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn increment_is_relative() {
        let ledger =
            InMemoryUsageLedger::new().with_record("factorio", UsageRecord::fresh(today()));
        ledger.increment("factorio", 1).await.unwrap();
        ledger.increment("factorio", 2).await.unwrap();
        let record = ledger.get("factorio").await.unwrap().unwrap();
        assert_eq!(record.minutes_played, 3);
        assert_eq!(record.last_reset_date, today());
    }

    #[tokio::test]
    async fn increment_missing_record_errors() {
        let ledger = InMemoryUsageLedger::new();
        assert!(ledger.increment("nope", 1).await.is_err());
    }

    #[test]
    fn ledger_name() {
        assert_eq!(InMemoryUsageLedger::new().name(), "memory");
    }
}
