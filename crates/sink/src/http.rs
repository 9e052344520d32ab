//! HTTP sink: one `PATCH {endpoint}/facilities/{id}` per patch.
//!
//! Blocking reqwest client (no Tokio runtime required).

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Serialize;
use solarfill_linkage::model::{Attributes, Patch};

use crate::error::SinkError;
use crate::PatchSink;

pub const USER_AGENT: &str = concat!("solarfill/", env!("CARGO_PKG_VERSION"));

/// Longest server message kept in an error.
const MAX_MESSAGE: usize = 200;

#[derive(Serialize)]
struct PatchBody<'a> {
    fields: &'a Attributes,
    source: SourceRef<'a>,
}

#[derive(Serialize)]
struct SourceRef<'a> {
    dataset: &'a str,
    id: &'a str,
}

pub struct HttpPatchSink {
    http: reqwest::blocking::Client,
    endpoint: Url,
    token: Option<String>,
}

impl HttpPatchSink {
    pub fn new(endpoint: &str, token: Option<String>) -> Result<Self, SinkError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SinkError::Setup(e.to_string()))?;

        let endpoint = Url::parse(endpoint)
            .map_err(|e| SinkError::Setup(format!("invalid endpoint {endpoint}: {e}")))?;
        if endpoint.cannot_be_a_base() {
            return Err(SinkError::Setup(format!("endpoint {endpoint} cannot take a path")));
        }

        Ok(Self {
            http,
            endpoint,
            token,
        })
    }

    /// Target ids are opaque, so the id is percent-encoded as a single path
    /// segment (`a/b#1` becomes `a%2Fb%231`).
    fn url(&self, target_id: &str) -> Result<Url, SinkError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| SinkError::Setup(format!("endpoint {} cannot take a path", self.endpoint)))?
            .pop_if_empty()
            .push("facilities")
            .push(target_id);
        Ok(url)
    }
}

/// `Retry-After` in either form: delta-seconds, or an HTTP-date counted
/// from `now` (dates in the past mean retry at once).
fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<u64> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(secs);
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    Some((at.with_timezone(&Utc) - now).num_seconds().max(0) as u64)
}

impl PatchSink for HttpPatchSink {
    fn name(&self) -> &str {
        "http"
    }

    fn send(&self, patch: &Patch) -> Result<(), SinkError> {
        let body = PatchBody {
            fields: &patch.fields,
            source: SourceRef {
                dataset: &patch.dataset,
                id: &patch.source_id,
            },
        };

        let mut req = self.http.patch(self.url(&patch.target_id)?).json(&body);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().map_err(|e| SinkError::Network(e.to_string()))?;
        if resp.status().is_success() {
            return Ok(());
        }

        let status = resp.status().as_u16();
        let retry_after_secs = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, Utc::now()));
        let text = resp.text().unwrap_or_default();
        Err(SinkError::Http {
            status,
            message: text.chars().take(MAX_MESSAGE).collect(),
            retry_after_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::{with_retry, RetryPolicy};
    use httpmock::prelude::*;
    use serde_json::json;

    fn patch() -> Patch {
        Patch {
            target_id: "fac-1".into(),
            source_id: "eia-55".into(),
            dataset: "eia".into(),
            fields: [("owner".to_string(), json!("Acme Holdings"))].into(),
        }
    }

    fn instant(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    #[test]
    fn sends_patch_with_bearer_token() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(PATCH)
                .path("/facilities/fac-1")
                .header("authorization", "Bearer secret")
                .json_body(json!({
                    "fields": { "owner": "Acme Holdings" },
                    "source": { "dataset": "eia", "id": "eia-55" }
                }));
            then.status(204);
        });

        let sink = HttpPatchSink::new(&format!("{}/", server.base_url()), Some("secret".into())).unwrap();
        sink.send(&patch()).unwrap();
        mock.assert();
    }

    #[test]
    fn server_errors_are_retried_until_exhausted() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(PATCH).path("/facilities/fac-1");
            then.status(503).body("maintenance");
        });

        let sink = HttpPatchSink::new(&server.base_url(), None).unwrap();
        let p = patch();
        let out = with_retry(&instant(3), "fac-1", || sink.send(&p));
        assert_eq!(out.attempts, 4);
        match out.result {
            Err(SinkError::Http { status, message, .. }) => {
                assert_eq!(status, 503);
                assert_eq!(message, "maintenance");
            }
            other => panic!("expected HTTP 503, got {other:?}"),
        }
        mock.assert_calls(4);
    }

    #[test]
    fn rate_limit_honours_retry_after() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(PATCH).path("/facilities/fac-1");
            then.status(429).header("retry-after", "0");
        });

        let sink = HttpPatchSink::new(&server.base_url(), None).unwrap();
        let p = patch();
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
        };
        // Retry-After: 0 overrides the minute-long backoff.
        let out = with_retry(&policy, "fac-1", || sink.send(&p));
        assert_eq!(out.attempts, 3);
        assert!(matches!(
            out.result,
            Err(SinkError::Http { status: 429, retry_after_secs: Some(0), .. })
        ));
        mock.assert_calls(3);
    }

    #[test]
    fn client_errors_fail_at_once() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(PATCH).path("/facilities/fac-1");
            then.status(422).json_body(json!({ "error": "owner is read-only" }));
        });

        let sink = HttpPatchSink::new(&server.base_url(), None).unwrap();
        let p = patch();
        let out = with_retry(&instant(3), "fac-1", || sink.send(&p));
        assert_eq!(out.attempts, 1);
        assert!(out.result.unwrap_err().to_string().contains("owner is read-only"));
        mock.assert_calls(1);
    }

    #[test]
    fn unreachable_store_is_a_network_error() {
        // Nothing listens on port 9 locally.
        let sink = HttpPatchSink::new("http://127.0.0.1:9", None).unwrap();
        let err = sink.send(&patch()).unwrap_err();
        assert!(matches!(err, SinkError::Network(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn reserved_characters_stay_inside_the_id_segment() {
        let sink = HttpPatchSink::new("http://store.local/api/", None).unwrap();
        assert_eq!(
            sink.url("abc#1").unwrap().as_str(),
            "http://store.local/api/facilities/abc%231"
        );
        assert_eq!(
            sink.url("a/b?c").unwrap().as_str(),
            "http://store.local/api/facilities/a%2Fb%3Fc"
        );
    }

    #[test]
    fn fragment_in_id_does_not_reach_another_facility() {
        let server = MockServer::start();
        let other = server.mock(|when, then| {
            when.method(PATCH).path("/facilities/abc");
            then.status(204);
        });

        let sink = HttpPatchSink::new(&server.base_url(), None).unwrap();
        let mut p = patch();
        p.target_id = "abc#1".into();
        let err = sink.send(&p).unwrap_err();
        assert!(matches!(err, SinkError::Http { status: 404, .. }), "got {err:?}");
        other.assert_calls(0);
    }

    #[test]
    fn retry_after_accepts_seconds_and_http_dates() {
        let now = DateTime::parse_from_rfc2822("Wed, 21 Oct 2015 07:28:00 GMT")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(parse_retry_after(" 120 ", now), Some(120));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:30 GMT", now), Some(30));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:00:00 GMT", now), Some(0));
        assert_eq!(parse_retry_after("soon", now), None);
    }

    #[test]
    fn past_http_date_retries_at_once() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(PATCH).path("/facilities/fac-1");
            then.status(503).header("retry-after", "Wed, 21 Oct 2015 07:28:00 GMT");
        });

        let sink = HttpPatchSink::new(&server.base_url(), None).unwrap();
        let err = sink.send(&patch()).unwrap_err();
        assert_eq!(err.retry_after_secs(), Some(0));
        mock.assert_calls(1);
    }
}
