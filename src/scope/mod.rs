//! Scope Management Module
//!
//! A run targets a single origin. Links that leave it are recorded but never
//! followed, and URLs matching an exclude pattern (logout links, IDS toggles,
//! static assets) are skipped silently.

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// How a URL relates to the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeDecision {
    /// Same origin, not excluded
    InScope,
    /// Different scheme, host or port
    OutOfScope,
    /// Same origin but matches an exclude pattern
    Excluded,
}

/// Scope of one run
#[derive(Debug, Clone)]
pub struct Scope {
    /// Origin every followed URL must share
    origin: url::Origin,
    /// Display form of the origin, e.g. `http://target.test:8080`
    base: String,
    /// Compiled exclude patterns
    exclude: Vec<Regex>,
}

impl Scope {
    /// Build a scope around the seed URL
    pub fn from_url(seed: &Url, exclude_patterns: &[String]) -> Result<Self, ScopeError> {
        if seed.host_str().is_none() {
            return Err(ScopeError::InvalidUrl(format!("{} has no host", seed)));
        }

        let exclude = exclude_patterns
            .iter()
            .map(|p| Regex::new(p).map_err(|e| ScopeError::InvalidRegex(format!("{}: {}", p, e))))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            origin: seed.origin(),
            base: seed.origin().ascii_serialization(),
            exclude,
        })
    }

    /// Classify a resolved URL
    pub fn classify(&self, url: &Url) -> ScopeDecision {
        if url.origin() != self.origin {
            return ScopeDecision::OutOfScope;
        }

        let as_str = url.as_str();
        if self.exclude.iter().any(|re| re.is_match(as_str)) {
            return ScopeDecision::Excluded;
        }

        ScopeDecision::InScope
    }

    pub fn is_in_scope(&self, url: &Url) -> bool {
        self.classify(url) == ScopeDecision::InScope
    }

    /// Serialized origin
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Get summary string
    pub fn summary(&self) -> String {
        format!("{} ({} exclude patterns)", self.base, self.exclude.len())
    }
}

/// Scope management errors
#[derive(Debug, Clone, Error)]
pub enum ScopeError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid regex: {0}")]
    InvalidRegex(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn scope(patterns: &[&str]) -> Scope {
        let patterns: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
        Scope::from_url(&url("http://target.test/index.php"), &patterns).unwrap()
    }

    #[test]
    fn test_same_origin_is_in_scope() {
        let scope = scope(&[]);
        assert!(scope.is_in_scope(&url("http://target.test/vulnerabilities/sqli/")));
        assert!(scope.is_in_scope(&url("http://TARGET.test:80/about.php?lang=en")));
    }

    #[test]
    fn test_other_origins_are_out_of_scope() {
        let scope = scope(&[]);
        assert_eq!(
            scope.classify(&url("http://www.dvwa.co.uk/")),
            ScopeDecision::OutOfScope
        );
        assert_eq!(
            scope.classify(&url("https://target.test/")),
            ScopeDecision::OutOfScope
        );
        assert_eq!(
            scope.classify(&url("http://target.test:8080/")),
            ScopeDecision::OutOfScope
        );
    }

    #[test]
    fn test_exclude_patterns() {
        let scope = scope(&["(?i)logout", r"phpids=on", r"\.(css|js|png)$"]);
        assert_eq!(
            scope.classify(&url("http://target.test/logout.php")),
            ScopeDecision::Excluded
        );
        assert_eq!(
            scope.classify(&url("http://target.test/index.php?phpids=on")),
            ScopeDecision::Excluded
        );
        assert_eq!(
            scope.classify(&url("http://target.test/dvwa/css/main.css")),
            ScopeDecision::Excluded
        );
        assert_eq!(
            scope.classify(&url("http://target.test/index.php?phpids=off")),
            ScopeDecision::InScope
        );
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let result = Scope::from_url(&url("http://target.test/"), &["(".to_string()]);
        assert!(matches!(result, Err(ScopeError::InvalidRegex(_))));
    }

    #[test]
    fn test_base() {
        let scope = scope(&[]);
        assert_eq!(scope.base(), "http://target.test");
    }
}
