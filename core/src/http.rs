//! HTTP transport types and the transport seam.
//!
//! # Design
//! Requests and responses are plain data. The fetch loop in `client` never
//! touches sockets itself; it hands each `HttpRequest` to a `Transport` and
//! inspects the `HttpResponse` it gets back. Tests substitute a scripted
//! transport, production code uses `UreqTransport`.
//!
//! Non-2xx statuses are data, not errors: a `Transport` only fails when no
//! response was obtained at all (DNS, refused connection, timeout).

use std::time::Duration;

use thiserror::Error;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
        }
    }
}

/// An HTTP request against one concrete candidate URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// An HTTP response described as plain data.
///
/// Bodies that are not UTF-8 are decoded lossily, so the status is never
/// lost to an undecodable body.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failure to obtain any response from a candidate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("{0}")]
    Io(String),
}

/// Executes one HTTP round-trip.
///
/// `timeout` bounds the whole attempt; `None` means no limit.
pub trait Transport {
    fn execute(
        &self,
        request: &HttpRequest,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn execute(
        &self,
        request: &HttpRequest,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, TransportError> {
        (**self).execute(request, timeout)
    }
}

/// Blocking transport backed by a shared `ureq::Agent`.
///
/// The agent is configured so 4xx/5xx responses come back as data rather
/// than `Err`, leaving status interpretation to the fetch loop.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new() -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self { agent }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for UreqTransport {
    fn execute(
        &self,
        request: &HttpRequest,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, TransportError> {
        let url = request.url.as_str();
        let body = request.body.as_deref().unwrap_or_default();

        let result = match request.method {
            HttpMethod::Get => prepare(self.agent.get(url), request, timeout).call(),
            HttpMethod::Post => {
                prepare(self.agent.post(url), request, timeout).send(body.as_bytes())
            }
            HttpMethod::Put => prepare(self.agent.put(url), request, timeout).send(body.as_bytes()),
        };

        let mut response = result.map_err(map_ureq_error)?;
        let status = response.status().as_u16();
        let bytes = response.body_mut().read_to_vec().map_err(map_ureq_error)?;

        Ok(HttpResponse {
            status,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}

fn prepare<B>(
    mut builder: ureq::RequestBuilder<B>,
    request: &HttpRequest,
    timeout: Option<Duration>,
) -> ureq::RequestBuilder<B> {
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder.config().timeout_global(timeout).build()
}

fn map_ureq_error(err: ureq::Error) -> TransportError {
    match err {
        ureq::Error::Timeout(_) => TransportError::Timeout,
        other => TransportError::Io(other.to_string()),
    }
}
