// History API repository - Authenticated time-window queries against the records endpoint
use crate::application::history_repository::{HistoryFetchError, HistoryRepository};
use crate::domain::history::{HistoryQuery, HistoryWindow, QueryDescriptor};
use crate::domain::sample::HistoryRecord;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;

const API_KEY_HEADER: &str = "X-Api-Key";
const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

#[derive(Clone)]
pub struct ApiHistoryRepository {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    descriptor: Arc<dyn QueryDescriptor>,
}

#[derive(Debug, Deserialize)]
struct RecordsResponse {
    records: Vec<Map<String, Value>>,
}

impl ApiHistoryRepository {
    pub fn new(base_url: String, api_key: String, descriptor: Arc<dyn QueryDescriptor>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            descriptor,
        }
    }

    fn build_query_url(&self, query: &HistoryQuery) -> String {
        let params = self
            .descriptor
            .build_query(query)
            .into_iter()
            .map(|(key, value)| {
                format!("{}={}", urlencoding::encode(&key), urlencoding::encode(&value))
            })
            .collect::<Vec<_>>()
            .join("&");
        let separator = if self.base_url.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.base_url, separator, params)
    }

    /// Issue one request for an explicit window. No retries.
    pub async fn fetch_query(
        &self,
        query: &HistoryQuery,
    ) -> Result<Vec<HistoryRecord>, HistoryFetchError> {
        let url = self.build_query_url(query);
        tracing::debug!("Fetching history: {}", url);

        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(HistoryFetchError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        parse_records(&body, &query.parameter_name)
    }
}

/// Parse the whole body or nothing: one bad record fails the fetch.
fn parse_records(body: &str, parameter: &str) -> Result<Vec<HistoryRecord>, HistoryFetchError> {
    let data: RecordsResponse = serde_json::from_str(body)
        .map_err(|e| HistoryFetchError::Parse(format!("invalid records body: {}", e)))?;

    data.records
        .iter()
        .enumerate()
        .map(|(index, record)| parse_record(index, record, parameter))
        .collect()
}

fn parse_record(
    index: usize,
    record: &Map<String, Value>,
    parameter: &str,
) -> Result<HistoryRecord, HistoryFetchError> {
    let raw_time = record
        .get("timestamp")
        .and_then(Value::as_str)
        .ok_or_else(|| HistoryFetchError::Parse(format!("record {} has no timestamp", index)))?;
    let timestamp = parse_timestamp(raw_time).ok_or_else(|| {
        HistoryFetchError::Parse(format!("record {} has bad timestamp {:?}", index, raw_time))
    })?;

    // Numbers may arrive as JSON numbers or numeric strings
    let value = match record.get(parameter) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| {
        HistoryFetchError::Parse(format!(
            "record {} has no numeric {:?} field",
            index, parameter
        ))
    })?;
    if !value.is_finite() {
        return Err(HistoryFetchError::Parse(format!(
            "record {} has non-finite {:?} value {}",
            index, parameter, value
        )));
    }

    Ok(HistoryRecord::new(timestamp, value))
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
}

#[async_trait]
impl HistoryRepository for ApiHistoryRepository {
    async fn fetch(&self, window: HistoryWindow) -> Result<Vec<HistoryRecord>, HistoryFetchError> {
        let now = chrono::Local::now().naive_local();
        let query = window.query_ending_at(self.descriptor.parameter_name(), now);
        self.fetch_query(&query).await
    }

    fn parameter_name(&self) -> &str {
        self.descriptor.parameter_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::history::SensorKind;
    use chrono::NaiveDate;
    use std::num::NonZeroU32;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn repository(server: &MockServer) -> ApiHistoryRepository {
        ApiHistoryRepository::new(
            format!("{}/api.php", server.uri()),
            "test-key".to_string(),
            Arc::new(SensorKind::Ldr),
        )
    }

    fn window() -> HistoryWindow {
        HistoryWindow::last_hours(NonZeroU32::new(48).unwrap())
    }

    #[test]
    fn test_build_query_url_encodes_timestamps() {
        let repo = ApiHistoryRepository::new(
            "https://example.test/api.php".to_string(),
            "key".to_string(),
            Arc::new(SensorKind::Ldr),
        );
        let query = window().query_ending_at("ldr", at(3, 12));

        assert_eq!(
            repo.build_query_url(&query),
            "https://example.test/api.php?params=ldr&begin=2024-01-01%2012%3A00&end=2024-01-03%2012%3A00"
        );
    }

    #[test]
    fn test_parse_accepts_numeric_strings_and_seconds() {
        let body = r#"{"records":[{"timestamp":"2024-01-01 00:00:30","ldr":"12.5"}]}"#;
        let records = parse_records(body, "ldr").unwrap();
        assert_eq!(
            records,
            vec![HistoryRecord::new(at(1, 0) + chrono::Duration::seconds(30), 12.5)]
        );
    }

    #[test]
    fn test_parse_rejects_missing_parameter_field() {
        let body = r#"{"records":[
            {"timestamp":"2024-01-01 00:00","ldr":10},
            {"timestamp":"2024-01-01 01:00","temp":20}
        ]}"#;
        assert!(matches!(
            parse_records(body, "ldr"),
            Err(HistoryFetchError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_rejects_bad_timestamp_and_body() {
        let body = r#"{"records":[{"timestamp":"yesterday","ldr":10}]}"#;
        assert!(matches!(
            parse_records(body, "ldr"),
            Err(HistoryFetchError::Parse(_))
        ));
        assert!(matches!(
            parse_records("<html>", "ldr"),
            Err(HistoryFetchError::Parse(_))
        ));
        assert!(matches!(
            parse_records("{}", "ldr"),
            Err(HistoryFetchError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_rejects_non_finite_values() {
        for raw in [r#""NaN""#, r#""inf""#, r#""-Infinity""#] {
            let body = format!(
                r#"{{"records":[{{"timestamp":"2024-01-01 00:00","ldr":10}},{{"timestamp":"2024-01-01 01:00","ldr":{}}}]}}"#,
                raw
            );
            assert!(
                matches!(parse_records(&body, "ldr"), Err(HistoryFetchError::Parse(_))),
                "accepted {}",
                raw
            );
        }
    }

    #[tokio::test]
    async fn test_fetch_with_non_finite_record_fails_whole_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"records":[{"timestamp":"2024-01-01 00:00","ldr":"NaN"},{"timestamp":"2024-01-01 01:00","ldr":"inf"}]}"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let result = repository(&server).fetch(window()).await;
        assert!(matches!(result, Err(HistoryFetchError::Parse(_))));
    }

    #[tokio::test]
    async fn test_fetch_parses_records_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api.php"))
            .and(query_param("params", "ldr"))
            .and(header("X-Api-Key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"records":[{"timestamp":"2024-01-01 00:00","ldr":10},{"timestamp":"2024-01-01 01:00","ldr":20}]}"#,
                "application/json",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let records = repository(&server).fetch(window()).await.unwrap();

        assert_eq!(
            records,
            vec![
                HistoryRecord::new(at(1, 0), 10.0),
                HistoryRecord::new(at(1, 1), 20.0),
            ]
        );
    }

    #[tokio::test]
    async fn test_fetch_sends_window_of_hours_back() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(r#"{"records":[]}"#, "application/json"),
            )
            .mount(&server)
            .await;

        let records = repository(&server).fetch(window()).await.unwrap();
        assert!(records.is_empty());

        let requests = server.received_requests().await.unwrap();
        let pairs: std::collections::HashMap<String, String> =
            requests[0].url.query_pairs().into_owned().collect();
        let begin = NaiveDateTime::parse_from_str(&pairs["begin"], "%Y-%m-%d %H:%M").unwrap();
        let end = NaiveDateTime::parse_from_str(&pairs["end"], "%Y-%m-%d %H:%M").unwrap();
        assert_eq!(end - begin, chrono::Duration::hours(48));
    }

    #[tokio::test]
    async fn test_fetch_non_success_status_fails_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let result = repository(&server).fetch(window()).await;

        assert!(matches!(
            result,
            Err(HistoryFetchError::Status { status: 500 })
        ));
    }

    #[tokio::test]
    async fn test_fetch_unauthorized_is_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = repository(&server).fetch(window()).await;
        assert!(matches!(
            result,
            Err(HistoryFetchError::Status { status: 401 })
        ));
    }
}
