//! Sequential fetch with fallback across candidate URLs.
//!
//! # Design
//! `CrmClient` resolves a logical path such as `/dashboard/stats` into every
//! candidate URL (see `resolve`) and tries them strictly one after another.
//! The first 2xx response with a parseable body wins and nothing after it is
//! sent. Each failure before that is recorded as an `Attempt`; if none
//! succeeds, the caller gets all of them back in order.
//!
//! The client holds no per-call state. Candidates and the attempt log are
//! rebuilt from scratch on every call.
//!
//! Each attempt is bounded by `FetchPolicy::attempt_timeout`. The call as a
//! whole can be stopped through a `CancellationToken` or an overall
//! deadline; both are checked before every attempt.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{ConfigSource, EnvConfig, FetchPolicy};
use crate::error::{ApiError, Attempt, AttemptFailure};
use crate::http::{HttpMethod, HttpRequest, Transport, UreqTransport};
use crate::resolve::url_candidates;

/// A request against a logical CRM path, before candidate URLs are known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrmRequest {
    pub method: HttpMethod,
    /// Path relative to the API prefix, e.g. `/consultation-requests`, or an
    /// absolute URL that bypasses resolution.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl CrmRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// A request carrying a JSON body.
    pub fn json(method: HttpMethod, path: impl Into<String>, body: String) -> Self {
        Self {
            method,
            path: path.into(),
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Some(body),
        }
    }

    fn to_http(&self, url: &str) -> HttpRequest {
        HttpRequest {
            method: self.method,
            url: url.to_string(),
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }
}

/// The winning candidate and its parsed body.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub url: String,
    pub status: u16,
    /// `Value::Null` when the body was empty.
    pub data: Value,
}

/// Shared flag that stops a call before its next attempt.
///
/// Clones observe the same flag. An attempt already in flight runs until it
/// completes or hits its own timeout.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// CRM client that resolves candidates from `C` and sends through `T`.
#[derive(Debug, Clone)]
pub struct CrmClient<T = UreqTransport, C = EnvConfig> {
    transport: T,
    config: C,
    policy: FetchPolicy,
    cancellation: CancellationToken,
}

impl CrmClient {
    /// Client over `ureq`, configured from `CRM_*` environment variables.
    pub fn from_env() -> Self {
        Self::new(UreqTransport::new(), EnvConfig::from_env())
            .with_policy(FetchPolicy::from_env())
    }
}

impl<T: Transport, C: ConfigSource> CrmClient<T, C> {
    pub fn new(transport: T, config: C) -> Self {
        Self {
            transport,
            config,
            policy: FetchPolicy::default(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_policy(mut self, policy: FetchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Token checked by every call made through this client.
    ///
    /// The token is sticky: once cancelled, every later call on this client
    /// and its clones fails with `ApiError::Cancelled`. Use `fetch_with` to
    /// cancel a single call.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Candidate URLs `request` would be tried against, in order.
    pub fn candidates(&self, path: &str) -> Vec<String> {
        url_candidates(path, &self.config)
    }

    /// Try every candidate for `request` until one succeeds.
    pub fn fetch(&self, request: &CrmRequest) -> Result<FetchOutcome, ApiError> {
        self.fetch_with(request, &self.cancellation)
    }

    /// Like `fetch`, but stopped by `cancellation` instead of the client's
    /// own token.
    pub fn fetch_with(
        &self,
        request: &CrmRequest,
        cancellation: &CancellationToken,
    ) -> Result<FetchOutcome, ApiError> {
        let candidates = self.candidates(&request.path);
        self.fetch_candidates(request, &candidates, cancellation)
    }

    pub(crate) fn fetch_candidates(
        &self,
        request: &CrmRequest,
        candidates: &[String],
        cancellation: &CancellationToken,
    ) -> Result<FetchOutcome, ApiError> {
        if candidates.is_empty() {
            warn!(path = %request.path, "no CRM endpoints configured");
            return Err(ApiError::NoEndpoints);
        }

        let started = Instant::now();
        let mut attempts: Vec<Attempt> = Vec::with_capacity(candidates.len());

        for url in candidates {
            if cancellation.is_cancelled() {
                warn!(
                    path = %request.path,
                    attempts = attempts.len(),
                    "CRM request cancelled"
                );
                return Err(ApiError::Cancelled { attempts });
            }
            let Some(timeout) = self.attempt_budget(started) else {
                warn!(
                    path = %request.path,
                    attempts = attempts.len(),
                    "CRM request deadline exceeded"
                );
                return Err(ApiError::DeadlineExceeded { attempts });
            };

            debug!(method = request.method.as_str(), %url, "trying CRM endpoint");
            let failure = match self.transport.execute(&request.to_http(url), timeout) {
                Err(err) => AttemptFailure::Transport(err),
                Ok(response) if !response.is_success() => AttemptFailure::Http {
                    status: response.status,
                    body: response.body,
                },
                Ok(response) => match parse_body(&response.body) {
                    Ok(data) => {
                        info!(%url, status = response.status, "CRM endpoint responded");
                        return Ok(FetchOutcome {
                            url: url.clone(),
                            status: response.status,
                            data,
                        });
                    }
                    Err(msg) => AttemptFailure::Parse(msg),
                },
            };

            let status = match &failure {
                AttemptFailure::Http { status, .. } => Some(*status),
                _ => None,
            };
            warn!(%url, ?status, error = %failure, "CRM endpoint failed");
            attempts.push(Attempt {
                url: url.clone(),
                status,
                failure,
            });
        }

        // `candidates` was non-empty, so at least one attempt was recorded.
        let last = match attempts.last() {
            Some(attempt) => attempt.failure.clone(),
            None => return Err(ApiError::NoEndpoints),
        };
        Err(ApiError::AllCandidatesFailed { attempts, last })
    }

    /// Timeout for the next attempt, or `None` once the overall deadline has
    /// passed. `Some(None)` means unbounded.
    fn attempt_budget(&self, started: Instant) -> Option<Option<Duration>> {
        let Some(deadline) = self.policy.overall_deadline else {
            return Some(self.policy.attempt_timeout);
        };
        let remaining = deadline.checked_sub(started.elapsed())?;
        if remaining.is_zero() {
            return None;
        }
        Some(Some(match self.policy.attempt_timeout {
            Some(per_attempt) => per_attempt.min(remaining),
            None => remaining,
        }))
    }
}

/// Empty bodies parse to `Null`; anything else must be valid JSON.
fn parse_body(body: &str) -> Result<Value, String> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|e| e.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use super::*;
    use crate::config::StaticConfig;
    use crate::http::{HttpResponse, TransportError};

    /// Transport that replays canned results and records every request.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        replies: RefCell<VecDeque<Result<HttpResponse, TransportError>>>,
        pub(crate) seen: RefCell<Vec<(HttpRequest, Option<Duration>)>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn reply(self, status: u16, body: &str) -> Self {
            self.replies.borrow_mut().push_back(Ok(HttpResponse {
                status,
                body: body.to_string(),
            }));
            self
        }

        pub(crate) fn fail(self, err: TransportError) -> Self {
            self.replies.borrow_mut().push_back(Err(err));
            self
        }

        pub(crate) fn urls(&self) -> Vec<String> {
            self.seen.borrow().iter().map(|(r, _)| r.url.clone()).collect()
        }
    }

    impl Transport for ScriptedTransport {
        fn execute(
            &self,
            request: &HttpRequest,
            timeout: Option<Duration>,
        ) -> Result<HttpResponse, TransportError> {
            self.seen.borrow_mut().push((request.clone(), timeout));
            self.replies
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Io("no scripted reply".to_string())))
        }
    }

    fn two_bases() -> StaticConfig {
        StaticConfig::new().with_env("https://api.example.com/api, http://localhost:5001/api")
    }

    #[test]
    fn falls_back_to_second_candidate() {
        let transport = ScriptedTransport::new()
            .reply(500, "boom")
            .reply(200, r#"{"success": true, "stats": {"pending_requests": 3}}"#);
        let client = CrmClient::new(&transport, two_bases());

        let outcome = client.fetch(&CrmRequest::get("/dashboard/stats")).unwrap();

        assert_eq!(outcome.url, "http://localhost:5001/api/dashboard/stats");
        assert_eq!(outcome.status, 200);
        assert_eq!(
            outcome.data,
            serde_json::json!({"success": true, "stats": {"pending_requests": 3}})
        );
        assert_eq!(
            transport.urls(),
            vec![
                "https://api.example.com/api/dashboard/stats",
                "http://localhost:5001/api/dashboard/stats"
            ]
        );
    }

    #[test]
    fn stops_after_first_success() {
        let transport = ScriptedTransport::new()
            .reply(200, r#"{"ok":1}"#)
            .reply(200, r#"{"ok":2}"#);
        let client = CrmClient::new(&transport, two_bases());

        let outcome = client.fetch(&CrmRequest::get("/patients")).unwrap();

        assert_eq!(outcome.data["ok"], 1);
        assert_eq!(transport.seen.borrow().len(), 1);
    }

    #[test]
    fn empty_body_yields_null() {
        let transport = ScriptedTransport::new().reply(204, "");
        let client = CrmClient::new(&transport, two_bases());

        let outcome = client.fetch(&CrmRequest::get("/patients")).unwrap();

        assert_eq!(outcome.status, 204);
        assert_eq!(outcome.data, Value::Null);
    }

    #[test]
    fn malformed_json_counts_as_failure_and_continues() {
        let transport = ScriptedTransport::new()
            .reply(200, "<html>proxy page</html>")
            .reply(200, r#"{"success":true}"#);
        let client = CrmClient::new(&transport, two_bases());

        let outcome = client.fetch(&CrmRequest::get("/patients")).unwrap();

        assert_eq!(outcome.url, "http://localhost:5001/api/patients");
        assert_eq!(transport.seen.borrow().len(), 2);
    }

    #[test]
    fn all_failures_are_reported_in_order() {
        let transport = ScriptedTransport::new()
            .fail(TransportError::Io("connection refused".to_string()))
            .reply(404, "not here")
            .reply(200, "{not json")
            .reply(503, "down");
        let client = CrmClient::new(&transport, StaticConfig::new());

        let err = client
            .fetch(&CrmRequest::get("/consultation-requests?status=pending"))
            .unwrap_err();

        let ApiError::AllCandidatesFailed { attempts, last } = err else {
            panic!("expected AllCandidatesFailed, got {err:?}");
        };
        let urls: Vec<&str> = attempts.iter().map(|a| a.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "http://localhost:5001/api/consultation-requests?status=pending",
                "http://localhost:5001/api/patients/consultation-requests?status=pending",
                "/api/consultation-requests?status=pending",
                "/api/patients/consultation-requests?status=pending",
            ]
        );
        assert!(matches!(attempts[0].failure, AttemptFailure::Transport(_)));
        assert_eq!(attempts[0].status, None);
        assert_eq!(attempts[1].status, Some(404));
        assert!(matches!(attempts[2].failure, AttemptFailure::Parse(_)));
        assert_eq!(
            last,
            AttemptFailure::Http {
                status: 503,
                body: "down".to_string()
            }
        );
        assert_eq!(transport.seen.borrow().len(), 4);
    }

    #[test]
    fn no_candidates_sends_nothing() {
        let transport = ScriptedTransport::new();
        let client = CrmClient::new(&transport, StaticConfig::new());

        let err = client
            .fetch_candidates(
                &CrmRequest::get("/patients"),
                &[],
                &CancellationToken::new(),
            )
            .unwrap_err();

        assert!(matches!(err, ApiError::NoEndpoints));
        assert!(transport.seen.borrow().is_empty());
    }

    #[test]
    fn request_method_headers_and_body_are_forwarded() {
        let transport = ScriptedTransport::new().reply(201, r#"{"success":true}"#);
        let client = CrmClient::new(&transport, two_bases());

        client
            .fetch(&CrmRequest::json(
                HttpMethod::Post,
                "/patients",
                r#"{"email":"a@example.com"}"#.to_string(),
            ))
            .unwrap();

        let seen = transport.seen.borrow();
        let (request, timeout) = &seen[0];
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(
            request.headers,
            vec![("content-type".to_string(), "application/json".to_string())]
        );
        assert_eq!(request.body.as_deref(), Some(r#"{"email":"a@example.com"}"#));
        assert_eq!(*timeout, Some(crate::config::DEFAULT_ATTEMPT_TIMEOUT));
    }

    #[test]
    fn cancelled_token_stops_before_first_attempt() {
        let transport = ScriptedTransport::new().reply(200, "{}");
        let token = CancellationToken::new();
        token.cancel();
        let client = CrmClient::new(&transport, two_bases()).with_cancellation(token);

        let err = client.fetch(&CrmRequest::get("/patients")).unwrap_err();

        assert!(matches!(err, ApiError::Cancelled { ref attempts } if attempts.is_empty()));
        assert!(transport.seen.borrow().is_empty());
    }

    #[test]
    fn client_token_stays_cancelled_for_later_calls() {
        let transport = ScriptedTransport::new().reply(200, "{}");
        let token = CancellationToken::new();
        let client = CrmClient::new(&transport, two_bases()).with_cancellation(token.clone());
        token.cancel();

        for _ in 0..2 {
            let err = client.fetch(&CrmRequest::get("/patients")).unwrap_err();
            assert!(matches!(err, ApiError::Cancelled { .. }));
        }
        assert!(transport.seen.borrow().is_empty());
    }

    #[test]
    fn per_call_token_leaves_later_calls_alone() {
        let transport = ScriptedTransport::new().reply(200, r#"{"ok":true}"#);
        let client = CrmClient::new(&transport, two_bases());
        let call = CancellationToken::new();
        call.cancel();

        let err = client
            .fetch_with(&CrmRequest::get("/patients"), &call)
            .unwrap_err();
        assert!(matches!(err, ApiError::Cancelled { .. }));

        let outcome = client.fetch(&CrmRequest::get("/patients")).unwrap();
        assert_eq!(outcome.data["ok"], true);
        assert_eq!(transport.seen.borrow().len(), 1);
    }

    #[test]
    fn cancellation_between_attempts_keeps_earlier_attempts() {
        struct CancelAfterFirst<'a> {
            inner: ScriptedTransport,
            token: &'a CancellationToken,
        }
        impl Transport for CancelAfterFirst<'_> {
            fn execute(
                &self,
                request: &HttpRequest,
                timeout: Option<Duration>,
            ) -> Result<HttpResponse, TransportError> {
                self.token.cancel();
                self.inner.execute(request, timeout)
            }
        }

        let token = CancellationToken::new();
        let transport = CancelAfterFirst {
            inner: ScriptedTransport::new().reply(502, "bad gateway"),
            token: &token,
        };
        let client = CrmClient::new(transport, two_bases()).with_cancellation(token.clone());

        let err = client.fetch(&CrmRequest::get("/patients")).unwrap_err();

        assert_eq!(err.attempts().len(), 1);
        assert!(matches!(err, ApiError::Cancelled { .. }));
    }

    #[test]
    fn attempt_timeout_is_clamped_to_overall_deadline() {
        let transport = ScriptedTransport::new().reply(200, "{}");
        let client = CrmClient::new(&transport, two_bases()).with_policy(FetchPolicy {
            attempt_timeout: Some(Duration::from_secs(60)),
            overall_deadline: Some(Duration::from_secs(5)),
        });

        client.fetch(&CrmRequest::get("/patients")).unwrap();

        let seen = transport.seen.borrow();
        let timeout = seen[0].1.unwrap();
        assert!(timeout <= Duration::from_secs(5));
        assert!(timeout > Duration::from_secs(4));
    }

    #[test]
    fn elapsed_deadline_stops_the_loop() {
        let transport = ScriptedTransport::new().reply(200, "{}");
        let client = CrmClient::new(&transport, two_bases()).with_policy(FetchPolicy {
            attempt_timeout: None,
            overall_deadline: Some(Duration::ZERO),
        });

        let err = client.fetch(&CrmRequest::get("/patients")).unwrap_err();

        assert!(matches!(err, ApiError::DeadlineExceeded { .. }));
        assert!(transport.seen.borrow().is_empty());
    }

    #[test]
    fn timeouts_are_recorded_as_transport_failures() {
        let transport = ScriptedTransport::new()
            .fail(TransportError::Timeout)
            .reply(200, "{}");
        let client = CrmClient::new(&transport, two_bases());

        let outcome = client.fetch(&CrmRequest::get("/patients")).unwrap();
        assert_eq!(outcome.url, "http://localhost:5001/api/patients");
    }
}
