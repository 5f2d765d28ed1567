//! Anomaly findings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::discovery::{InputPoint, PageId};
use crate::fuzzer::Vector;

/// Severity level for findings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Informational,
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Informational => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Severity::Informational => "Informational",
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "high" => Severity::High,
            "medium" => Severity::Medium,
            "low" => Severity::Low,
            _ => Severity::Informational,
        }
    }
}

/// What a detection rule observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Payload echoed back with a sanitized character left raw
    ReflectedUnsanitized,
    /// A sensitive entry appeared in the body
    SensitiveLeakage,
    /// Response slower than the configured threshold
    TimingAnomaly,
    /// 4xx or 5xx status in answer to an injected value
    ErrorStatus,
}

impl AnomalyKind {
    pub const ALL: [AnomalyKind; 4] = [
        AnomalyKind::ReflectedUnsanitized,
        AnomalyKind::SensitiveLeakage,
        AnomalyKind::TimingAnomaly,
        AnomalyKind::ErrorStatus,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AnomalyKind::ReflectedUnsanitized => "Unsanitized Reflection",
            AnomalyKind::SensitiveLeakage => "Sensitive Data Leakage",
            AnomalyKind::TimingAnomaly => "Slow Response",
            AnomalyKind::ErrorStatus => "Error Status",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            AnomalyKind::SensitiveLeakage => Severity::High,
            AnomalyKind::ReflectedUnsanitized | AnomalyKind::TimingAnomaly => Severity::Medium,
            AnomalyKind::ErrorStatus => Severity::Low,
        }
    }

    pub fn cwe(&self) -> Option<u32> {
        match self {
            AnomalyKind::ReflectedUnsanitized => Some(79),
            AnomalyKind::SensitiveLeakage => Some(200),
            AnomalyKind::TimingAnomaly => None,
            AnomalyKind::ErrorStatus => Some(209),
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a finding was observed
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum FindingTarget {
    /// An injected input point
    Input { point: InputPoint },
    /// A page without inputs, fetched once by the sweep
    Page { page: PageId },
}

impl FindingTarget {
    pub fn page(&self) -> &PageId {
        match self {
            FindingTarget::Input { point } => &point.page,
            FindingTarget::Page { page } => page,
        }
    }

    pub fn label(&self) -> String {
        match self {
            FindingTarget::Input { point } => point.label(),
            FindingTarget::Page { page } => page.to_string(),
        }
    }
}

/// A detected anomaly
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Unique ID
    pub id: String,

    pub kind: AnomalyKind,

    pub severity: Severity,

    pub target: FindingTarget,

    /// Vector that triggered it; `None` for page sweeps
    pub vector: Option<Vector>,

    /// Body excerpt or measurement backing the finding
    pub evidence: String,

    pub description: String,

    /// Request that reproduces the finding
    pub request: String,

    /// URL the request went to
    pub url: String,

    pub status: u16,

    pub elapsed_ms: u64,

    /// CWE ID (if applicable)
    pub cwe_id: Option<u32>,

    pub timestamp: DateTime<Utc>,
}

impl Finding {
    /// Create a new finding with the kind's default severity
    pub fn new(kind: AnomalyKind, target: FindingTarget) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            severity: kind.severity(),
            target,
            vector: None,
            evidence: String::new(),
            description: String::new(),
            request: String::new(),
            url: String::new(),
            status: 0,
            elapsed_ms: 0,
            cwe_id: kind.cwe(),
            timestamp: Utc::now(),
        }
    }

    /// Builder pattern methods
    pub fn with_vector(mut self, vector: &Vector) -> Self {
        self.vector = Some(vector.clone());
        self
    }

    pub fn with_evidence(mut self, evidence: &str) -> Self {
        self.evidence = evidence.to_string();
        self
    }

    pub fn with_description(mut self, desc: &str) -> Self {
        self.description = desc.to_string();
        self
    }

    pub fn with_request(mut self, request: &str) -> Self {
        self.request = request.to_string();
        self
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    pub fn with_response(mut self, status: u16, elapsed_ms: u64) -> Self {
        self.status = status;
        self.elapsed_ms = elapsed_ms;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Vector category, or `page` for sweep findings
    pub fn category(&self) -> &str {
        self.vector
            .as_ref()
            .map(|v| v.category.as_str())
            .unwrap_or("page")
    }

    /// Stable identity: equal for the same observation across runs
    pub fn fingerprint(&self) -> String {
        format!(
            "{:?}|{}|{}|{}",
            self.kind,
            self.target.label(),
            self.vector.as_ref().map(|v| v.payload.as_str()).unwrap_or(""),
            self.evidence
        )
    }

    /// Ordering used in reports: target, then vector, then kind
    pub fn sort_key(&self) -> (String, String, AnomalyKind) {
        (
            self.target.label(),
            self.vector
                .as_ref()
                .map(|v| v.payload.clone())
                .unwrap_or_default(),
            self.kind,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::InputTarget;

    fn point() -> InputPoint {
        InputPoint {
            page: PageId {
                path: "/vulnerabilities/sqli/".into(),
                query_keys: Default::default(),
            },
            target: InputTarget::FormField {
                form: 0,
                field: "id".into(),
            },
        }
    }

    #[test]
    fn test_kind_defaults() {
        let finding = Finding::new(AnomalyKind::SensitiveLeakage, FindingTarget::Input { point: point() });
        assert_eq!(finding.severity, Severity::High);
        assert_eq!(finding.cwe_id, Some(200));
        assert_eq!(finding.category(), "page");
        assert_eq!(AnomalyKind::ErrorStatus.severity(), Severity::Low);
    }

    #[test]
    fn test_fingerprint_ignores_id_and_time() {
        let vector = Vector::new("<b>", "XSS");
        let make = || {
            Finding::new(AnomalyKind::ReflectedUnsanitized, FindingTarget::Input { point: point() })
                .with_vector(&vector)
                .with_evidence("ID: <b>")
        };
        let (a, b) = (make(), make());
        assert_ne!(a.id, b.id);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.category(), "XSS");
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!(Severity::parse("HIGH"), Severity::High);
        assert_eq!(Severity::parse("bogus"), Severity::Informational);
        assert!(Severity::High > Severity::Low);
    }
}
