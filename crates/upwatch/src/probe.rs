//! HTTP probe execution.

use crate::types::{CheckDefinition, CheckOutcome, ProbeError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, USER_AGENT};
use reqwest::{Method, Url, redirect};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const PROBE_USER_AGENT: &str = concat!("upwatch/", env!("CARGO_PKG_VERSION"));

/// A check that can be run against one target.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Perform the check. Cancellation aborts the in-flight call and yields
    /// a [`ProbeError::Cancelled`] outcome.
    async fn check(&self, cancel: &CancellationToken) -> CheckOutcome;

    /// Name of the probed target
    fn name(&self) -> &str;
}

/// Probe that validates an HTTP response against a [`CheckDefinition`].
pub struct HttpProbe {
    definition: Arc<CheckDefinition>,
    timeout_duration: Duration,
    client: reqwest::Client,
}

impl HttpProbe {
    /// Create a new HTTP probe for `definition`.
    ///
    /// Fails only when the HTTP client cannot be built.
    pub fn new(definition: Arc<CheckDefinition>) -> common::Result<Self> {
        let timeout_duration = definition.effective_timeout();
        let redirect_policy = if definition.follow_redirects {
            redirect::Policy::default()
        } else {
            redirect::Policy::none()
        };

        let client = reqwest::Client::builder()
            .timeout(timeout_duration)
            .redirect(redirect_policy)
            .build()
            .map_err(common::Error::client)?;

        Ok(Self {
            definition,
            timeout_duration,
            client,
        })
    }

    async fn execute(&self) -> Result<u16, (Option<u16>, ProbeError)> {
        let method = parse_method(&self.definition.method).map_err(|e| (None, e))?;
        let url = build_url(&self.definition.url, &self.definition.extra_query_args)
            .map_err(|e| (None, e))?;

        let response = self
            .client
            .request(method, url)
            .header(USER_AGENT, PROBE_USER_AGENT)
            .send()
            .await
            .map_err(|e| (None, ProbeError::Request(e.to_string())))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| (Some(status), ProbeError::ReadBody(e.to_string())))?;
        let body = String::from_utf8_lossy(&body);

        validate_response(&self.definition, status, &headers, &body).map_err(|e| (Some(status), e))?;
        Ok(status)
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn check(&self, cancel: &CancellationToken) -> CheckOutcome {
        let start = Instant::now();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(target = %self.definition.name, "Probe cancelled");
                return CheckOutcome::failure(start.elapsed(), ProbeError::Cancelled);
            }
            result = timeout(self.timeout_duration, self.execute()) => result,
        };

        let duration = start.elapsed();
        match result {
            Ok(Ok(status)) => {
                debug!(
                    target = %self.definition.name,
                    status,
                    duration_ms = duration.as_millis(),
                    "Probe passed"
                );
                CheckOutcome::success(duration).with_response_code(status)
            }
            Ok(Err((status, error))) => {
                warn!(
                    target = %self.definition.name,
                    class = error.class(),
                    error = %error,
                    "Probe failed"
                );
                let outcome = CheckOutcome::failure(duration, error);
                match status {
                    Some(code) => outcome.with_response_code(code),
                    None => outcome,
                }
            }
            Err(_) => {
                warn!(target = %self.definition.name, "Probe timed out");
                CheckOutcome::failure(
                    duration,
                    ProbeError::Request(format!("timed out after {:?}", self.timeout_duration)),
                )
            }
        }
    }

    fn name(&self) -> &str {
        &self.definition.name
    }
}

/// Parse the configured method; an empty method means GET.
pub fn parse_method(raw: &str) -> Result<Method, ProbeError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Method::GET);
    }
    Method::from_bytes(trimmed.to_ascii_uppercase().as_bytes())
        .map_err(|_| ProbeError::InvalidMethod(raw.to_string()))
}

/// Parse `raw` and overwrite its query keys with `args`.
///
/// Query keys come out sorted.
pub fn build_url(raw: &str, args: &BTreeMap<String, String>) -> Result<Url, ProbeError> {
    let mut url = Url::parse(raw).map_err(|e| ProbeError::InvalidUrl(e.to_string()))?;
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ProbeError::MissingHost(raw.to_string()));
    }

    if !args.is_empty() {
        let mut merged: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (key, value) in url.query_pairs() {
            merged
                .entry(key.into_owned())
                .or_default()
                .push(value.into_owned());
        }
        for (key, value) in args {
            merged.insert(key.clone(), vec![value.clone()]);
        }

        url.query_pairs_mut().clear().extend_pairs(
            merged
                .iter()
                .flat_map(|(key, values)| values.iter().map(move |value| (key, value))),
        );
    }

    Ok(url)
}

/// Validate a received response. Status, headers, exact body and body
/// substring are checked in that order and the first mismatch is returned.
pub fn validate_response(
    definition: &CheckDefinition,
    status: u16,
    headers: &HeaderMap,
    body: &str,
) -> Result<(), ProbeError> {
    if let Some(want) = definition.expect_status_code.filter(|code| *code > 0) {
        if status != want {
            return Err(ProbeError::StatusMismatch { got: status, want });
        }
    }

    for (name, want) in &definition.expect_headers {
        let got = headers
            .get(name.as_str())
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        if got != want {
            return Err(ProbeError::HeaderMismatch {
                name: name.clone(),
                got: got.to_string(),
                want: want.clone(),
            });
        }
    }

    if let Some(exact) = definition.expect_body_exact.as_deref().filter(|s| !s.is_empty()) {
        if body != exact {
            return Err(ProbeError::BodyMismatch);
        }
    }

    if let Some(needle) = definition.expect_body_contains.as_deref().filter(|s| !s.is_empty()) {
        if !body.contains(needle) {
            return Err(ProbeError::BodyMissingSubstring(needle.to_string()));
        }
    }

    Ok(())
}
