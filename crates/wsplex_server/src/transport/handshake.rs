//! Opening handshake policy: origin checks and connection limits.

use regex::Regex;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request};
use tokio_tungstenite::tungstenite::http::{header, HeaderValue, Response, StatusCode};
use tracing::warn;
use wsplex_core::{Engine, MaxConnectionsStrategy, RequestHeader};

/// What to do with a connection before its handshake completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Accept,
    /// Complete the handshake, then close with a policy violation.
    AcceptThenClose,
    /// Refuse the handshake with `status`, optionally redirecting.
    Refuse {
        status: StatusCode,
        location: Option<String>,
    },
}

/// Decides admission from the engine's connection count and strategy.
///
/// The `wait` strategy is resolved by the caller before asking, so here it
/// behaves like `reject`.
pub fn admission(engine: &Engine) -> Admission {
    if !engine.is_at_capacity() {
        return Admission::Accept;
    }
    match engine.on_max_connections_strategy() {
        MaxConnectionsStrategy::Close => Admission::AcceptThenClose,
        MaxConnectionsStrategy::Redirect => match &engine.config().redirect_url {
            Some(url) => Admission::Refuse {
                status: StatusCode::TEMPORARY_REDIRECT,
                location: Some(url.clone()),
            },
            None => {
                warn!(engine_id = %engine.id(), "Redirect strategy without redirect_url, rejecting");
                Admission::Refuse {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    location: None,
                }
            }
        },
        MaxConnectionsStrategy::Reject | MaxConnectionsStrategy::Wait => Admission::Refuse {
            status: StatusCode::SERVICE_UNAVAILABLE,
            location: None,
        },
    }
}

/// Compiled list of allowed origins.
///
/// Each domain is a glob where `*` matches any run of characters. A request
/// without an `Origin` header is allowed only by a bare `*`.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    any: bool,
    patterns: Vec<Regex>,
}

impl OriginPolicy {
    pub fn new(domains: &[String]) -> Self {
        let any = domains.iter().any(|domain| domain.trim() == "*");
        let patterns = domains
            .iter()
            .filter_map(|domain| {
                let escaped = regex::escape(domain.trim()).replace(r"\*", ".*");
                match Regex::new(&format!("(?i)^{escaped}$")) {
                    Ok(regex) => Some(regex),
                    Err(e) => {
                        warn!("Ignoring invalid domain pattern '{}': {}", domain, e);
                        None
                    }
                }
            })
            .collect();
        Self { any, patterns }
    }

    pub fn allows(&self, origin: Option<&str>) -> bool {
        if self.any {
            return true;
        }
        origin.is_some_and(|origin| self.patterns.iter().any(|pattern| pattern.is_match(origin)))
    }
}

/// Builds a plain-text handshake rejection.
pub fn refusal(status: StatusCode, location: Option<&str>, message: &str) -> ErrorResponse {
    let mut response = Response::new(Some(message.to_string()));
    *response.status_mut() = status;
    if let Some(location) = location.and_then(|l| HeaderValue::from_str(l).ok()) {
        response.headers_mut().insert(header::LOCATION, location);
    }
    response
}

/// Captures path, query arguments and headers of the handshake request.
pub fn request_header(request: &Request) -> RequestHeader {
    let mut header = RequestHeader::from_request(request.uri().path(), request.uri().query());
    for (name, value) in request.headers() {
        if let Ok(value) = value.to_str() {
            header.set_field(name.as_str(), value);
        }
    }
    header
}
