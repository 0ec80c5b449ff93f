//! Prometheus instant-query client.
//!
//! Issues `GET {base}/api/v1/query?query=<expr>` over a fresh HTTP/1.1
//! connection per query and extracts `data.result[0].value[1]`. The whole
//! exchange (connect, request, body) is bounded by one timeout.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::QueryError;
use crate::source::{MetricSource, SampleFuture};

/// Fixed query path appended to the configured base URL.
const QUERY_PATH: &str = "api/v1/query";

/// Longest body excerpt kept in a `QueryError::Status`.
const MAX_ERROR_BODY: usize = 512;

/// Client for a Prometheus-compatible HTTP API.
#[derive(Debug, Clone)]
pub struct PrometheusClient {
    base: Url,
    timeout: Duration,
}

impl PrometheusClient {
    /// Create a client. Only plain `http` base URLs are supported.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, QueryError> {
        let base = Url::parse(base_url).map_err(|e| QueryError::InvalidUrl(e.to_string()))?;
        if base.scheme() != "http" {
            return Err(QueryError::InvalidUrl(format!(
                "unsupported scheme {:?}",
                base.scheme()
            )));
        }
        if base.host_str().is_none() {
            return Err(QueryError::InvalidUrl(format!("{base_url} has no host")));
        }
        Ok(Self { base, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Full query URL for an expression.
    pub fn query_url(&self, query: &str) -> Url {
        let mut url = self.base.clone();
        let path = format!("{}/{QUERY_PATH}", self.base.path().trim_end_matches('/'));
        url.set_path(&path);
        url.set_fragment(None);
        url.query_pairs_mut().clear().append_pair("query", query);
        url
    }

    /// Run one instant query.
    pub async fn query(&self, query: &str) -> Result<f64, QueryError> {
        let url = self.query_url(query);
        match tokio::time::timeout(self.timeout, fetch(&url)).await {
            Ok(Ok((status, body))) => {
                if !(200..300).contains(&status) {
                    debug!(status, %url, "metrics query non-2xx");
                    return Err(QueryError::Status {
                        status,
                        body: excerpt(&body),
                    });
                }
                let value = parse_query_response(&body)?;
                debug!(query, value, "metrics query ok");
                Ok(value)
            }
            Ok(Err(e)) => {
                debug!(error = %e, %url, "metrics query failed");
                Err(e)
            }
            Err(_) => {
                debug!(%url, "metrics query timed out");
                Err(QueryError::Timeout(self.timeout))
            }
        }
    }
}

impl MetricSource for PrometheusClient {
    fn sample<'a>(&'a self, query: &'a str) -> SampleFuture<'a> {
        Box::pin(self.query(query))
    }
}

/// Perform the GET and return status plus the full body.
async fn fetch(url: &Url) -> Result<(u16, Bytes), QueryError> {
    let host = url
        .host_str()
        .ok_or_else(|| QueryError::InvalidUrl(url.to_string()))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| QueryError::InvalidUrl(url.to_string()))?;
    let connect_host = host.trim_start_matches('[').trim_end_matches(']');

    let stream = tokio::net::TcpStream::connect((connect_host, port))
        .await
        .map_err(|e| QueryError::Connect(format!("{host}:{port}: {e}")))?;

    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| QueryError::Http(e.to_string()))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let target = &url[url::Position::BeforePath..];
    let req = http::Request::builder()
        .method(http::Method::GET)
        .uri(target)
        .header(http::header::HOST, authority)
        .header(http::header::ACCEPT, "application/json")
        .header(http::header::USER_AGENT, "headroom/0.1")
        .body(Empty::<Bytes>::new())
        .map_err(|e| QueryError::Http(e.to_string()))?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| QueryError::Http(e.to_string()))?;
    let status = resp.status().as_u16();
    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| QueryError::Http(e.to_string()))?
        .to_bytes();
    Ok((status, body))
}

#[derive(Debug, Deserialize)]
struct QueryEnvelope {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: serde_json::Value,
}

/// Extract the first value from an instant-query response body.
///
/// Vector results yield `result[0].value[1]`, scalar results `result[1]`;
/// an empty vector yields `0.0`.
pub fn parse_query_response(body: &[u8]) -> Result<f64, QueryError> {
    let envelope: QueryEnvelope =
        serde_json::from_slice(body).map_err(|e| QueryError::Malformed(e.to_string()))?;

    if envelope.status != "success" {
        return Err(QueryError::Backend {
            error_type: envelope.error_type.unwrap_or_else(|| envelope.status.clone()),
            error: envelope.error.unwrap_or_default(),
        });
    }

    let data = envelope
        .data
        .ok_or_else(|| QueryError::Malformed("missing data".to_string()))?;

    let sample_value = match &data.result {
        serde_json::Value::Null => return Ok(0.0),
        serde_json::Value::Array(items) if items.is_empty() => return Ok(0.0),
        // Scalar / string result: [timestamp, "value"].
        serde_json::Value::Array(items) if items[0].is_number() => &data.result,
        // Vector result: [{metric: {...}, value: [timestamp, "value"]}, ...].
        serde_json::Value::Array(items) => items[0]
            .get("value")
            .ok_or_else(|| QueryError::Malformed("result[0] has no value".to_string()))?,
        other => {
            return Err(QueryError::Malformed(format!(
                "unexpected result shape: {other}"
            )));
        }
    };

    let raw = sample_value
        .get(1)
        .and_then(|v| v.as_str())
        .ok_or_else(|| QueryError::Malformed(format!("bad sample value {sample_value}")))?;
    raw.trim()
        .parse::<f64>()
        .map_err(|e| QueryError::Malformed(format!("value {raw:?}: {e}")))
}

fn excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    match text.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_vector_result() {
        let body = br#"{"status":"success","data":{"resultType":"vector","result":[
            {"metric":{},"value":[1700000000.123,"95.5"]},
            {"metric":{"instance":"b"},"value":[1700000000.123,"12"]}
        ]}}"#;
        assert_eq!(parse_query_response(body).unwrap(), 95.5);
    }

    #[test]
    fn empty_result_is_zero() {
        let body = br#"{"status":"success","data":{"resultType":"vector","result":[]}}"#;
        assert_eq!(parse_query_response(body).unwrap(), 0.0);
    }

    #[test]
    fn parses_scalar_result() {
        let body = br#"{"status":"success","data":{"resultType":"scalar","result":[1700000000,"42"]}}"#;
        assert_eq!(parse_query_response(body).unwrap(), 42.0);
    }

    #[test]
    fn non_success_status_is_backend_error() {
        let body = br#"{"status":"error","errorType":"bad_data","error":"parse error at char 5"}"#;
        match parse_query_response(body).unwrap_err() {
            QueryError::Backend { error_type, error } => {
                assert_eq!(error_type, "bad_data");
                assert!(error.contains("parse error"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            parse_query_response(b"<html>").unwrap_err(),
            QueryError::Malformed(_)
        ));
        assert!(matches!(
            parse_query_response(br#"{"status":"success"}"#).unwrap_err(),
            QueryError::Malformed(_)
        ));
        let bad_value = br#"{"status":"success","data":{"result":[{"value":[1,"abc"]}]}}"#;
        assert!(matches!(
            parse_query_response(bad_value).unwrap_err(),
            QueryError::Malformed(_)
        ));
    }

    #[test]
    fn query_url_keeps_base_path_and_encodes() {
        let client =
            PrometheusClient::new("http://prom.local:9090/prometheus/", Duration::from_secs(5))
                .unwrap();
        let url = client.query_url("sum(rate(x{mode!=\"idle\"}[1m]))");
        assert_eq!(url.path(), "/prometheus/api/v1/query");
        let pairs: Vec<_> = url.query_pairs().collect();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].1, "sum(rate(x{mode!=\"idle\"}[1m]))");
    }

    #[test]
    fn rejects_non_http_base() {
        assert!(PrometheusClient::new("https://prom:9090", Duration::from_secs(5)).is_err());
        assert!(PrometheusClient::new("not a url", Duration::from_secs(5)).is_err());
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_query_error() {
        // Port 9 (discard) on localhost is almost never listening.
        let client =
            PrometheusClient::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = client.query("up").await.unwrap_err();
        assert!(matches!(
            err,
            QueryError::Connect(_) | QueryError::Timeout(_)
        ));
    }
}
