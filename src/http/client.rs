//! HTTP client implementation

use anyhow::{Context, Result};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::request::{HttpMethod, Request, UPLOAD_FILE_NAME};
use super::response::ResponseSnapshot;
use crate::app::HttpConfig;
use crate::error::TransportError;

/// HTTP client wrapper with a shared cookie jar
#[derive(Clone)]
pub struct HttpClient {
    /// Inner reqwest client
    client: reqwest::Client,

    /// Cookie jar shared with the inner client
    jar: Arc<Jar>,

    /// Default timeout
    timeout: Duration,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let timeout = Duration::from_secs(config.request_timeout);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .user_agent(&config.user_agent)
            .cookie_provider(jar.clone())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            jar,
            timeout,
        })
    }

    /// Execute a request once. Retries are the caller's concern.
    pub async fn send(
        &self,
        request: &Request,
        extra_headers: &[(String, String)],
    ) -> std::result::Result<ResponseSnapshot, TransportError> {
        let start = Instant::now();

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(request.full_url()),
            HttpMethod::Post if request.is_multipart() => {
                self.client.post(&request.url).multipart(multipart(request))
            }
            HttpMethod::Post => self.client.post(&request.url).form(&request.fields),
        };

        let mut headers = HeaderMap::new();
        for (key, value) in extra_headers {
            if let (Ok(name), Ok(val)) = (HeaderName::from_str(key), HeaderValue::from_str(value)) {
                headers.insert(name, val);
            }
        }
        builder = builder.headers(headers);

        let response = builder.send().await.map_err(|e| self.classify(e))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();

        let mut response_headers = HashMap::new();
        for (key, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                response_headers.insert(key.as_str().to_string(), v.to_string());
            }
        }

        let body = response.text().await.map_err(|e| self.classify(e))?;
        let elapsed = start.elapsed();

        tracing::debug!(
            method = %request.method,
            url = %request.url,
            status,
            elapsed_ms = elapsed.as_millis() as u64,
            "Request completed"
        );

        let mut snapshot = ResponseSnapshot::new(request.clone(), status, body, elapsed)
            .with_final_url(&final_url);
        snapshot.headers = response_headers;
        Ok(snapshot)
    }

    /// Names of the cookies the jar would send to `url`
    pub fn cookie_names(&self, url: &url::Url) -> Vec<String> {
        let header = match self.jar.cookies(url) {
            Some(h) => h,
            None => return Vec::new(),
        };

        let mut names: Vec<String> = header
            .to_str()
            .unwrap_or("")
            .split(';')
            .filter_map(|pair| pair.split('=').next())
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    fn classify(&self, error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            return TransportError::Timeout(self.timeout.as_millis() as u64);
        }
        if error.is_connect() {
            return TransportError::Connect(error.to_string());
        }

        let mut chain = error.to_string();
        let mut source = std::error::Error::source(&error);
        while let Some(inner) = source {
            chain.push_str(": ");
            chain.push_str(&inner.to_string());
            source = inner.source();
        }

        if chain.to_ascii_lowercase().contains("reset") {
            TransportError::Reset(chain)
        } else {
            TransportError::Request(chain)
        }
    }
}

/// Text fields first, then every file as an `input.html` upload
fn multipart(request: &Request) -> reqwest::multipart::Form {
    let mut form = reqwest::multipart::Form::new();
    for (name, value) in &request.fields {
        form = form.text(name.clone(), value.clone());
    }
    for (name, content) in &request.files {
        let part = reqwest::multipart::Part::text(content.clone()).file_name(UPLOAD_FILE_NAME);
        form = form.part(name.clone(), part);
    }
    form
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let config = HttpConfig::default();
        let client = HttpClient::new(&config);
        assert!(client.is_ok());
    }

    #[test]
    fn test_empty_jar_has_no_cookies() {
        let client = HttpClient::new(&HttpConfig::default()).unwrap();
        let url = url::Url::parse("http://target.test/").unwrap();
        assert!(client.cookie_names(&url).is_empty());
    }

    #[test]
    fn test_jar_cookie_names() {
        let client = HttpClient::new(&HttpConfig::default()).unwrap();
        let url = url::Url::parse("http://target.test/").unwrap();
        client.jar.add_cookie_str("PHPSESSID=abc; Path=/", &url);
        client.jar.add_cookie_str("security=low; Path=/", &url);
        assert_eq!(client.cookie_names(&url), vec!["PHPSESSID", "security"]);
    }
}
