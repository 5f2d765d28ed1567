//! HTTP response snapshots

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::request::Request;

/// An immutable record of one request/response exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    /// HTTP status code (0 for transport failures)
    pub status: u16,

    /// Response headers, keys lowercased
    pub headers: HashMap<String, String>,

    /// Raw response body text
    pub body: String,

    /// Wall-clock time from dispatch to full body receipt
    pub elapsed_ms: u64,

    /// URL after redirects
    pub final_url: String,

    /// The request that produced this response
    pub request: Request,

    /// Set when the request never produced a response
    pub failure: Option<String>,
}

impl ResponseSnapshot {
    /// Create a snapshot from a completed exchange
    pub fn new(request: Request, status: u16, body: impl Into<String>, elapsed: Duration) -> Self {
        let final_url = request.full_url();
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
            elapsed_ms: elapsed.as_millis() as u64,
            final_url,
            request,
            failure: None,
        }
    }

    /// Sentinel snapshot for a request that failed in transport
    pub fn transport_failure(request: Request, reason: impl Into<String>, elapsed: Duration) -> Self {
        let mut snapshot = Self::new(request, 0, String::new(), elapsed);
        snapshot.failure = Some(reason.into());
        snapshot
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_final_url(mut self, url: &str) -> Self {
        self.final_url = url.to_string();
        self
    }

    pub fn is_transport_failure(&self) -> bool {
        self.failure.is_some()
    }

    /// Check if response is successful (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Check if response is an error (4xx or 5xx)
    pub fn is_error_status(&self) -> bool {
        (400..600).contains(&self.status)
    }

    /// Get a specific header (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        let name_lower = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_ascii_lowercase() == name_lower)
            .map(|(_, v)| v.as_str())
    }

    /// Check if content is HTML. A missing content type is sniffed from the body.
    pub fn is_html(&self) -> bool {
        match self.header("content-type") {
            Some(ct) => ct.contains("html"),
            None => self.body.trim_start().starts_with('<'),
        }
    }

    /// Whether the exchange ended on a different URL than it was sent to
    pub fn was_redirected(&self) -> bool {
        strip_fragment(&self.final_url) != strip_fragment(&self.request.full_url())
    }
}

fn strip_fragment(url: &str) -> &str {
    url.split('#').next().unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_failure_sentinel() {
        let snap = ResponseSnapshot::transport_failure(
            Request::get("http://target.test/"),
            "connection refused",
            Duration::from_millis(12),
        );
        assert!(snap.is_transport_failure());
        assert_eq!(snap.status, 0);
        assert_eq!(snap.elapsed_ms, 12);
        assert!(!snap.is_success());
    }

    #[test]
    fn test_html_detection() {
        let req = Request::get("http://target.test/");
        let html = ResponseSnapshot::new(req.clone(), 200, "{}", Duration::ZERO)
            .with_header("Content-Type", "text/html; charset=utf-8");
        assert!(html.is_html());

        let json = ResponseSnapshot::new(req.clone(), 200, "<b>", Duration::ZERO)
            .with_header("content-type", "application/json");
        assert!(!json.is_html());

        let sniffed = ResponseSnapshot::new(req, 200, "  <html></html>", Duration::ZERO);
        assert!(sniffed.is_html());
    }

    #[test]
    fn test_redirect_detection() {
        let req = Request::get("http://target.test/index.php");
        let same = ResponseSnapshot::new(req.clone(), 200, "", Duration::ZERO);
        assert!(!same.was_redirected());

        let moved = same.with_final_url("http://target.test/login.php");
        assert!(moved.was_redirected());
    }
}
