//! HTTP request types

use serde::{Deserialize, Serialize};
use std::fmt;

/// HTTP methods a discovered input can be submitted with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }

    /// Parse a form `method` attribute. Browsers treat anything unknown as GET.
    pub fn from_form_attr(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_uppercase()) {
            Some(v) if v == "POST" => HttpMethod::Post,
            _ => HttpMethod::Get,
        }
    }

    /// Submissions that may change server-side state
    pub fn is_mutating(&self) -> bool {
        matches!(self, HttpMethod::Post)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File name reported for uploaded payloads
pub const UPLOAD_FILE_NAME: &str = "input.html";

/// A request as the core sees it: method, URL and the submitted field values.
///
/// For GET the fields are appended to the URL query, for POST they form an
/// `application/x-www-form-urlencoded` body. A POST carrying files goes out
/// as `multipart/form-data` instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// HTTP method
    pub method: HttpMethod,

    /// Request URL (may already carry a query string)
    pub url: String,

    /// Ordered field values, including any injected value
    pub fields: Vec<(String, String)>,

    /// File controls as (name, file content)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<(String, String)>,
}

impl Request {
    /// Create a new request
    pub fn new(method: HttpMethod, url: &str) -> Self {
        Self {
            method,
            url: url.to_string(),
            fields: Vec::new(),
            files: Vec::new(),
        }
    }

    /// Create a bare GET request
    pub fn get(url: &str) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    /// Add a field
    pub fn with_field(mut self, name: &str, value: &str) -> Self {
        self.fields.push((name.to_string(), value.to_string()));
        self
    }

    /// Replace all fields
    pub fn with_fields(mut self, fields: Vec<(String, String)>) -> Self {
        self.fields = fields;
        self
    }

    /// Attach a file upload
    pub fn with_file(mut self, name: &str, content: &str) -> Self {
        self.files.push((name.to_string(), content.to_string()));
        self
    }

    /// Content of an uploaded file
    pub fn file(&self, name: &str) -> Option<&str> {
        self.files
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_multipart(&self) -> bool {
        self.method == HttpMethod::Post && !self.files.is_empty()
    }

    /// Get the value of a field, falling back to the URL query
    pub fn field(&self, name: &str) -> Option<String> {
        if let Some((_, v)) = self.fields.iter().find(|(k, _)| k == name) {
            return Some(v.clone());
        }
        url::Url::parse(&self.url).ok().and_then(|u| {
            u.query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
        })
    }

    /// The URL actually put on the wire
    pub fn full_url(&self) -> String {
        if self.method != HttpMethod::Get || self.fields.is_empty() {
            return self.url.clone();
        }

        match url::Url::parse(&self.url) {
            Ok(mut parsed) => {
                {
                    let mut pairs = parsed.query_pairs_mut();
                    for (k, v) in &self.fields {
                        pairs.append_pair(k, v);
                    }
                }
                parsed.to_string()
            }
            Err(_) => {
                let params: Vec<String> = self
                    .fields
                    .iter()
                    .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
                    .collect();
                let sep = if self.url.contains('?') { '&' } else { '?' };
                format!("{}{}{}", self.url, sep, params.join("&"))
            }
        }
    }

    /// Form-encoded body for POST requests
    pub fn body(&self) -> Option<String> {
        if self.method != HttpMethod::Post {
            return None;
        }
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in &self.fields {
            serializer.append_pair(k, v);
        }
        Some(serializer.finish())
    }

    /// One-line reproduction of the request, e.g. `POST http://t/x a=1&b=2`.
    /// Uploads are listed after the body as `[name@input.html: content]`.
    pub fn reproduction(&self) -> String {
        let mut line = match self.body() {
            Some(body) => format!("{} {} {}", self.method, self.url, body),
            None => format!("{} {}", self.method, self.full_url()),
        };
        if self.is_multipart() {
            for (name, content) in &self.files {
                line.push_str(&format!(" [{}@{}: {}]", name, UPLOAD_FILE_NAME, content));
            }
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_fields_become_query() {
        let req = Request::get("http://target.test/vulnerabilities/sqli/")
            .with_field("id", "1")
            .with_field("Submit", "Submit");

        assert_eq!(
            req.full_url(),
            "http://target.test/vulnerabilities/sqli/?id=1&Submit=Submit"
        );
        assert!(req.body().is_none());
    }

    #[test]
    fn test_get_fields_append_to_existing_query() {
        let req = Request::get("http://target.test/page?lang=en").with_field("q", "<x>");
        let full = req.full_url();
        assert!(full.starts_with("http://target.test/page?lang=en&q="));
        assert!(full.contains("%3Cx%3E"));
    }

    #[test]
    fn test_post_body_is_form_encoded() {
        let req = Request::new(HttpMethod::Post, "http://target.test/guestbook")
            .with_field("txtName", "a b")
            .with_field("mtxMessage", "<script>");

        assert_eq!(req.full_url(), "http://target.test/guestbook");
        assert_eq!(req.body().unwrap(), "txtName=a+b&mtxMessage=%3Cscript%3E");
        assert!(req.reproduction().starts_with("POST http://target.test/guestbook "));
    }

    #[test]
    fn test_upload_makes_post_multipart() {
        let req = Request::new(HttpMethod::Post, "http://target.test/upload/")
            .with_field("Upload", "Upload")
            .with_file("uploaded", "<?php phpinfo(); ?>");

        assert!(req.is_multipart());
        assert_eq!(req.file("uploaded"), Some("<?php phpinfo(); ?>"));
        assert_eq!(req.file("Upload"), None);
        assert!(req
            .reproduction()
            .ends_with("Upload=Upload [uploaded@input.html: <?php phpinfo(); ?>]"));

        let get = Request::get("http://target.test/upload/").with_file("uploaded", "x");
        assert!(!get.is_multipart());
    }

    #[test]
    fn test_field_lookup_falls_back_to_query() {
        let req = Request::get("http://target.test/p?id=7");
        assert_eq!(req.field("id").as_deref(), Some("7"));
        assert_eq!(req.field("missing"), None);
    }

    #[test]
    fn test_form_method_attr() {
        assert_eq!(HttpMethod::from_form_attr(Some("post")), HttpMethod::Post);
        assert_eq!(HttpMethod::from_form_attr(Some(" PoSt ")), HttpMethod::Post);
        assert_eq!(HttpMethod::from_form_attr(Some("dialog")), HttpMethod::Get);
        assert_eq!(HttpMethod::from_form_attr(None), HttpMethod::Get);
        assert!(HttpMethod::Post.is_mutating());
        assert!(!HttpMethod::Get.is_mutating());
    }
}
