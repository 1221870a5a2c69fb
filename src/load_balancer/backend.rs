//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single backend server
//! - Hold the pre-parsed pieces needed to rewrite a request towards it
//! - Track liveness with a lock-free flag

use std::sync::atomic::{AtomicBool, Ordering};

use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::Uri;
use thiserror::Error;
use url::{Host, Url};

/// Errors raised while building backends.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BalancerError {
    /// No backend endpoints were supplied.
    #[error("at least one backend is required")]
    NoBackends,

    /// An endpoint string was empty.
    #[error("backend address must not be empty")]
    EmptyAddress,

    /// The same endpoint appears twice.
    #[error("duplicate backend address: {0}")]
    Duplicate(String),

    /// The endpoint could not be parsed as an http URL.
    #[error("invalid backend address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },
}

/// A single backend server.
#[derive(Debug)]
pub struct Backend {
    /// Identity: the configured endpoint without a trailing slash.
    address: String,
    /// Authority (host:port) requests are sent to.
    authority: Authority,
    /// Base path prepended to every forwarded path ("" for root).
    base_path: String,
    /// Eligibility for selection.
    alive: AtomicBool,
}

impl Backend {
    /// Parse an endpoint such as `http://127.0.0.1:9001` into a live backend.
    pub fn parse(endpoint: &str) -> Result<Self, BalancerError> {
        let address = endpoint.trim().trim_end_matches('/');
        if address.is_empty() {
            return Err(BalancerError::EmptyAddress);
        }

        let invalid = |reason: String| BalancerError::InvalidAddress {
            address: address.to_string(),
            reason,
        };

        let url = Url::parse(address).map_err(|e| invalid(e.to_string()))?;
        if url.scheme() != "http" {
            return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
        }

        let host = match url.host() {
            Some(Host::Ipv6(ip)) => format!("[{}]", ip),
            Some(host) => host.to_string(),
            None => return Err(invalid("missing host".to_string())),
        };
        let authority = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host,
        };
        let authority = authority
            .parse::<Authority>()
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            address: address.to_string(),
            authority,
            base_path: url.path().trim_end_matches('/').to_string(),
            alive: AtomicBool::new(true),
        })
    }

    /// The backend's identity.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The `host[:port]` used for the `Host` header and the request URI.
    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Whether the backend may currently be selected.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Set liveness, returning the previous value.
    pub fn set_alive(&self, alive: bool) -> bool {
        self.alive.swap(alive, Ordering::AcqRel)
    }

    /// Build the URI for `path_and_query` on this backend.
    pub fn uri_for(&self, path_and_query: Option<&PathAndQuery>) -> Result<Uri, axum::http::Error> {
        let tail = path_and_query.map(PathAndQuery::as_str).unwrap_or("/");
        let full = if self.base_path.is_empty() {
            tail.to_string()
        } else {
            format!("{}{}", self.base_path, tail)
        };

        Uri::builder()
            .scheme(Scheme::HTTP)
            .authority(self.authority.clone())
            .path_and_query(full)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint() {
        let b = Backend::parse("http://127.0.0.1:9001/").unwrap();
        assert_eq!(b.address(), "http://127.0.0.1:9001");
        assert_eq!(b.authority().as_str(), "127.0.0.1:9001");
        assert!(b.is_alive());
    }

    #[test]
    fn test_parse_rejects_bad_endpoints() {
        assert_eq!(Backend::parse("  ").unwrap_err(), BalancerError::EmptyAddress);
        assert!(matches!(
            Backend::parse("https://example.com"),
            Err(BalancerError::InvalidAddress { .. })
        ));
        assert!(matches!(
            Backend::parse("127.0.0.1:9001"),
            Err(BalancerError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_uri_rewrite_keeps_path_and_query() {
        let b = Backend::parse("http://backend.local:8080").unwrap();
        let pq: PathAndQuery = "/api/items?page=2".parse().unwrap();
        let uri = b.uri_for(Some(&pq)).unwrap();
        assert_eq!(uri.to_string(), "http://backend.local:8080/api/items?page=2");
    }

    #[test]
    fn test_uri_rewrite_joins_base_path() {
        let b = Backend::parse("http://[::1]:8080/v1/").unwrap();
        let pq: PathAndQuery = "/users?id=7".parse().unwrap();
        let uri = b.uri_for(Some(&pq)).unwrap();
        assert_eq!(uri.to_string(), "http://[::1]:8080/v1/users?id=7");
        assert_eq!(b.uri_for(None).unwrap().path(), "/v1/");
    }

    #[test]
    fn test_set_alive_returns_previous() {
        let b = Backend::parse("http://127.0.0.1:1").unwrap();
        assert!(b.set_alive(false));
        assert!(!b.is_alive());
        assert!(!b.set_alive(true));
        assert!(b.is_alive());
    }
}
