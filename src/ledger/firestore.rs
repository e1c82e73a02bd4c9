//! Firestore usage ledger speaking the `v1` documents REST API.
//!
//! Each server key maps to the document `<collection>/<key>` with two fields:
//! `time_played` (integer minutes) and `date_tracked` (timestamp). The day a
//! timestamp belongs to is computed in the configured reference time zone.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};

use super::traits::{UsageLedger, UsageRecord};

pub const DEFAULT_FIRESTORE_URL: &str = "https://firestore.googleapis.com/v1";

const MINUTES_FIELD: &str = "time_played";
const DATE_FIELD: &str = "date_tracked";

pub struct FirestoreUsageLedger {
    base_url: String,
    /// `projects/<p>/databases/<db>/documents`
    documents_root: String,
    collection: String,
    timezone: Tz,
    access_token: Option<String>,
    client: Client,
}

impl FirestoreUsageLedger {
    pub fn new(
        base_url: &str,
        project: &str,
        database: &str,
        collection: &str,
        timezone: Tz,
        access_token: Option<&str>,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            documents_root: format!("projects/{project}/databases/{database}/documents"),
            collection: collection.to_string(),
            timezone,
            access_token: access_token.map(ToString::to_string),
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    fn document_name(&self, key: &str) -> String {
        format!("{}/{}/{key}", self.documents_root, self.collection)
    }

    fn document_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, self.document_name(key))
    }

    fn commit_url(&self) -> String {
        format!("{}/{}:commit", self.base_url, self.documents_root)
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match self.access_token.as_deref() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    fn encode_fields(&self, record: &UsageRecord) -> Value {
        let midnight = record
            .last_reset_date
            .and_hms_opt(0, 0, 0)
            .and_then(|naive| self.timezone.from_local_datetime(&naive).earliest())
            .map_or_else(Utc::now, |local| local.with_timezone(&Utc));
        json!({
            "fields": {
                MINUTES_FIELD: { "integerValue": record.minutes_played.to_string() },
                DATE_FIELD: { "timestampValue": midnight.to_rfc3339() },
            }
        })
    }

    /// `commit` request applying a server-side `increment` transform, so
    /// concurrent writers never lose an update. Fails if the document is missing.
    fn increment_body(&self, key: &str, delta: u32) -> Value {
        json!({
            "writes": [{
                "transform": {
                    "document": self.document_name(key),
                    "fieldTransforms": [{
                        "fieldPath": MINUTES_FIELD,
                        "increment": { "integerValue": delta.to_string() },
                    }],
                },
                "currentDocument": { "exists": true },
            }]
        })
    }

    fn decode_fields(&self, document: &Value) -> Result<UsageRecord> {
        let fields = document
            .get("fields")
            .context("Firestore document has no fields")?;
        let minutes = fields
            .get(MINUTES_FIELD)
            .and_then(decode_integer)
            .with_context(|| format!("Firestore document is missing {MINUTES_FIELD}"))?;
        let date = fields
            .get(DATE_FIELD)
            .and_then(|v| decode_date(v, self.timezone))
            .with_context(|| format!("Firestore document is missing {DATE_FIELD}"))?;
        Ok(UsageRecord {
            minutes_played: u32::try_from(minutes.max(0)).unwrap_or(u32::MAX),
            last_reset_date: date,
        })
    }
}

#[async_trait]
impl UsageLedger for FirestoreUsageLedger {
    async fn get(&self, key: &str) -> Result<Option<UsageRecord>> {
        let response = self
            .authorized(self.client.get(self.document_url(key)))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        let document: Value = response.json().await?;
        self.decode_fields(&document).map(Some)
    }

    async fn set(&self, key: &str, record: &UsageRecord) -> Result<()> {
        let response = self
            .authorized(
                self.client
                    .patch(self.document_url(key))
                    .json(&self.encode_fields(record)),
            )
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        tracing::debug!(key, minutes = record.minutes_played, "usage record written");
        Ok(())
    }

    async fn increment(&self, key: &str, delta: u32) -> Result<()> {
        let body = self.increment_body(key, delta);
        let response = self
            .authorized(self.client.post(self.commit_url()).json(&body))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            bail!("usage record not found: {key}");
        }
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "firestore"
    }
}

fn decode_integer(value: &Value) -> Option<i64> {
    if let Some(raw) = value.get("integerValue") {
        return match raw {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_i64(),
            _ => None,
        };
    }
    value
        .get("doubleValue")
        .and_then(Value::as_f64)
        .map(|f| f as i64)
}

fn decode_date(value: &Value, timezone: Tz) -> Option<NaiveDate> {
    if let Some(ts) = value.get("timestampValue").and_then(Value::as_str) {
        return DateTime::parse_from_rfc3339(ts)
            .ok()
            .map(|dt| dt.with_timezone(&timezone).date_naive());
    }
    value
        .get("stringValue")
        .and_then(Value::as_str)
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
}

async fn api_error(response: reqwest::Response) -> anyhow::Error {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read Firestore error body>".to_string());
    let sanitized = crate::util::sanitize_api_error(&body);
    anyhow::anyhow!("Firestore API error ({status}): {sanitized}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> FirestoreUsageLedger {
        FirestoreUsageLedger::new(
            DEFAULT_FIRESTORE_URL,
            "striking-effort-335611",
            "(default)",
            "servers",
            chrono_tz::Asia::Kolkata,
            None,
        )
    }

    #[test]
    fn document_paths() {
        let l = ledger();
        assert_eq!(
            l.document_url("factorio"),
            "https://firestore.googleapis.com/v1/projects/striking-effort-335611/databases/(default)/documents/servers/factorio"
        );
        assert_eq!(
            l.commit_url(),
            "https://firestore.googleapis.com/v1/projects/striking-effort-335611/databases/(default)/documents:commit"
        );
    }

    #[test]
    fn encode_then_decode_keeps_local_day() {
        let l = ledger();
        let record = UsageRecord {
            minutes_played: 42,
            last_reset_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        };
        let doc = l.encode_fields(&record);
        assert_eq!(doc["fields"]["time_played"]["integerValue"], "42");
        // Kolkata midnight is the previous evening in UTC.
        assert!(doc["fields"]["date_tracked"]["timestampValue"]
            .as_str()
            .unwrap()
            .starts_with("2024-01-01T18:30:00"));
        assert_eq!(l.decode_fields(&doc).unwrap(), record);
    }

    #[test]
    fn decodes_timestamp_in_reference_zone() {
        let l = ledger();
        // 20:00 UTC on Jan 1 is already Jan 2 in Kolkata.
        let doc = json!({
            "name": "x",
            "fields": {
                "time_played": {"integerValue": "15"},
                "date_tracked": {"timestampValue": "2024-01-01T20:00:00.123456Z"}
            }
        });
        let record = l.decode_fields(&doc).unwrap();
        assert_eq!(record.minutes_played, 15);
        assert_eq!(
            record.last_reset_date,
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
        );
    }

    #[test]
    fn missing_field_is_an_error() {
        let l = ledger();
        let doc = json!({"fields": {"time_played": {"integerValue": "1"}}});
        assert!(l.decode_fields(&doc).is_err());
    }

    #[test]
    fn decode_integer_accepts_number_and_double() {
        assert_eq!(decode_integer(&json!({"integerValue": 7})), Some(7));
        assert_eq!(decode_integer(&json!({"doubleValue": 9.0})), Some(9));
        assert_eq!(decode_integer(&json!({"stringValue": "9"})), None);
    }

    const DOC_PATH: &str = "/projects/summon/databases/(default)/documents/servers/factorio";
    const COMMIT_PATH: &str = "/projects/summon/databases/(default)/documents:commit";

    fn ledger_at(url: &str) -> FirestoreUsageLedger {
        FirestoreUsageLedger::new(
            url,
            "summon",
            "(default)",
            "servers",
            chrono_tz::Asia::Kolkata,
            Some("ya29.test-token"),
        )
    }

    #[test]
    fn increment_body_is_a_guarded_field_transform() {
        let body = ledger().increment_body("factorio", 1);
        assert_eq!(
            body,
            json!({
                "writes": [{
                    "transform": {
                        "document": "projects/striking-effort-335611/databases/(default)/documents/servers/factorio",
                        "fieldTransforms": [{
                            "fieldPath": "time_played",
                            "increment": {"integerValue": "1"},
                        }],
                    },
                    "currentDocument": {"exists": true},
                }]
            })
        );
    }

    #[tokio::test]
    async fn get_missing_document_is_none() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", DOC_PATH)
            .match_header("authorization", "Bearer ya29.test-token")
            .with_status(404)
            .with_body(r#"{"error":{"code":404,"status":"NOT_FOUND"}}"#)
            .create_async()
            .await;

        assert!(ledger_at(&server.url()).get("factorio").await.unwrap().is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn get_decodes_stored_document() {
        let mut server = mockito::Server::new_async().await;
        let _doc = server
            .mock("GET", DOC_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"name":"x","fields":{
                    "time_played":{"integerValue":"37"},
                    "date_tracked":{"timestampValue":"2024-01-01T18:30:00Z"}}}"#,
            )
            .create_async()
            .await;

        let record = ledger_at(&server.url())
            .get("factorio")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.minutes_played, 37);
        assert_eq!(
            record.last_reset_date,
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
        );
    }

    #[tokio::test]
    async fn increment_posts_commit_transform() {
        let mut server = mockito::Server::new_async().await;
        let l = ledger_at(&server.url());
        let mock = server
            .mock("POST", COMMIT_PATH)
            .match_body(mockito::Matcher::Json(l.increment_body("factorio", 1)))
            .with_status(200)
            .with_body(r#"{"writeResults":[{}],"commitTime":"2024-01-02T06:00:00Z"}"#)
            .create_async()
            .await;

        l.increment("factorio", 1).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn increment_on_missing_document_errors() {
        let mut server = mockito::Server::new_async().await;
        let _missing = server
            .mock("POST", COMMIT_PATH)
            .with_status(404)
            .with_body(r#"{"error":{"code":404,"message":"no entity to update"}}"#)
            .create_async()
            .await;

        let err = ledger_at(&server.url())
            .increment("factorio", 1)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("usage record not found: factorio"));
    }

    #[tokio::test]
    async fn permission_error_is_reported_with_status() {
        let mut server = mockito::Server::new_async().await;
        let _denied = server
            .mock("PATCH", DOC_PATH)
            .with_status(403)
            .with_body(r#"{"error":{"code":403,"message":"Missing or insufficient permissions."}}"#)
            .create_async()
            .await;

        let record = UsageRecord::fresh(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        let err = ledger_at(&server.url())
            .set("factorio", &record)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("403"));
        assert!(err.to_string().contains("insufficient permissions"));
    }
}
