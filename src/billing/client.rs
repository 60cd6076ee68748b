//! Blocking HTTP client for the billing cost endpoint.

#![allow(missing_docs)]

use std::io::Read;
use std::time::Duration;

use chrono::NaiveDate;

use super::{CostFetcher, CostReport};
use crate::core::config::CostConfig;
use crate::core::errors::{PervigilError, Result};

/// API version header value sent with every request.
pub const API_VERSION: &str = "2023-06-01";

/// Response bodies are never read past this many bytes.
pub const MAX_BODY_BYTES: u64 = 1 << 20;

/// Longest body excerpt carried in an HTTP status error.
pub const ERROR_EXCERPT_BYTES: usize = 512;

const SOURCE: &str = "billing api";

/// Client for `GET {base}/v1/cost`.
pub struct BillingClient {
    api_key: String,
    base_url: String,
    http: reqwest::blocking::Client,
}

impl std::fmt::Debug for BillingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BillingClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl BillingClient {
    pub fn from_config(config: &CostConfig) -> Result<Self> {
        Self::new(&config.api_key, &config.base_url)
    }

    pub fn new(api_key: &str, base_url: &str) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .build()
            .map_err(|err| PervigilError::Runtime {
                details: format!("build billing client: {err}"),
            })?;
        Ok(Self {
            api_key: api_key.trim().to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn fetch_failed(details: String) -> PervigilError {
        PervigilError::FetchFailed {
            source_name: SOURCE,
            details,
        }
    }
}

impl CostFetcher for BillingClient {
    fn get_cost(&self, start: NaiveDate, end: NaiveDate, timeout: Duration) -> Result<CostReport> {
        let start = start.format("%Y-%m-%d").to_string();
        let end = end.format("%Y-%m-%d").to_string();

        let response = self
            .http
            .get(format!("{}/v1/cost", self.base_url))
            .query(&[("start_date", start.as_str()), ("end_date", end.as_str())])
            .header("x-api-key", self.api_key.as_str())
            .header("anthropic-version", API_VERSION)
            .timeout(timeout)
            .send()
            .map_err(|err| Self::fetch_failed(format!("send request: {}", err.without_url())))?;

        let status = response.status().as_u16();
        let mut body = Vec::new();
        response
            .take(MAX_BODY_BYTES)
            .read_to_end(&mut body)
            .map_err(|err| Self::fetch_failed(format!("read response: {err}")))?;

        decode_cost_response(status, &body)
    }
}

/// Turn a status code and (already capped) body into a report or an error.
pub fn decode_cost_response(status: u16, body: &[u8]) -> Result<CostReport> {
    if !(200..300).contains(&status) {
        let excerpt = if body.len() > ERROR_EXCERPT_BYTES {
            format!(
                "{}...(truncated)",
                String::from_utf8_lossy(&body[..ERROR_EXCERPT_BYTES])
            )
        } else {
            String::from_utf8_lossy(body).into_owned()
        };
        return Err(BillingClient::fetch_failed(format!(
            "API error: status {status}: {excerpt}"
        )));
    }

    serde_json::from_slice(body)
        .map_err(|err| BillingClient::fetch_failed(format!("decode response: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serve one canned response and hand back the request head.
    fn serve_once(status: &'static str, body: String) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut head = String::new();
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" || line.is_empty() {
                    break;
                }
                head.push_str(&line);
            }
            // The client may hang up once it has read as much as it wants.
            let _ = write!(
                stream,
                "{status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            head
        });
        (format!("http://{addr}"), handle)
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn decodes_buckets() {
        let report =
            decode_cost_response(200, br#"{"data":[{"date":"2026-10-17","cost_usd":4.5}]}"#).unwrap();
        assert_eq!(report.data.len(), 1);
        assert!((report.total_usd() - 4.5).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_data_is_empty_report() {
        assert_eq!(decode_cost_response(200, b"{}").unwrap(), CostReport::default());
    }

    #[test]
    fn malformed_json_is_fetch_failure() {
        let err = decode_cost_response(200, b"<html>").unwrap_err();
        assert!(matches!(err, PervigilError::FetchFailed { .. }));
        assert!(err.to_string().contains("decode response"));
    }

    #[test]
    fn error_status_carries_short_body() {
        let err = decode_cost_response(401, br#"{"error":"invalid x-api-key"}"#).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("status 401"), "{msg}");
        assert!(msg.contains("invalid x-api-key"), "{msg}");
        assert!(!msg.contains("truncated"), "{msg}");
    }

    #[test]
    fn error_status_truncates_long_body() {
        let body = "x".repeat(2000);
        let msg = decode_cost_response(500, body.as_bytes()).unwrap_err().to_string();
        assert!(msg.ends_with("...(truncated)"), "{msg}");
        assert!(msg.contains(&"x".repeat(512)));
        assert!(!msg.contains(&"x".repeat(513)));
    }

    #[test]
    fn get_cost_sends_range_and_headers() {
        let (base, handle) = serve_once(
            "HTTP/1.1 200 OK",
            r#"{"data":[{"date":"2026-10-17","cost_usd":1.5},{"date":"2026-10-17","cost_usd":2.0}]}"#
                .to_string(),
        );
        let client = BillingClient::new("sk-test", &format!("{base}/")).unwrap();
        let report = client
            .get_cost(day("2026-10-17"), day("2026-10-18"), Duration::from_secs(5))
            .unwrap();
        assert!((report.total_usd() - 3.5).abs() < 1e-9);

        let head = handle.join().unwrap().to_ascii_lowercase();
        assert!(
            head.starts_with("get /v1/cost?start_date=2026-10-17&end_date=2026-10-18 "),
            "{head}"
        );
        assert!(head.contains("x-api-key: sk-test"), "{head}");
        assert!(head.contains("anthropic-version: 2023-06-01"), "{head}");
    }

    #[test]
    fn get_cost_surfaces_http_errors() {
        let (base, handle) = serve_once("HTTP/1.1 503 Service Unavailable", "busy".to_string());
        let client = BillingClient::new("k", &base).unwrap();
        let err = client
            .get_cost(day("2026-10-17"), day("2026-10-18"), Duration::from_secs(5))
            .unwrap_err();
        handle.join().unwrap();
        assert!(err.to_string().contains("status 503: busy"));
    }

    #[test]
    fn get_cost_stops_reading_at_body_cap() {
        let mut body = String::from(r#"{"data":[]}"#);
        let cap = usize::try_from(MAX_BODY_BYTES).unwrap();
        body.push_str(&" ".repeat(cap - body.len()));
        body.push_str("garbage past the cap");
        let (base, handle) = serve_once("HTTP/1.1 200 OK", body);

        let client = BillingClient::new("k", &base).unwrap();
        let report = client
            .get_cost(day("2026-10-17"), day("2026-10-18"), Duration::from_secs(10))
            .expect("bytes past the cap are never decoded");
        handle.join().unwrap();
        assert!(report.data.is_empty());
    }
}
