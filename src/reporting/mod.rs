//! Report Generation Module
//!
//! Discovery and test reports, rendered as:
//! - Text (for the terminal)
//! - JSON (machine-readable)

pub mod formats;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::discovery::{InputPoint, Page};
use crate::error::ErrorCounts;
use crate::scanner::{AnomalyKind, Finding, Severity};

/// Report metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Report title
    pub title: String,
    /// Seed URL
    pub target: String,
    /// Run start time
    pub start_time: DateTime<Utc>,
    /// Run end time
    pub end_time: DateTime<Utc>,
    /// Tool version
    pub scanner_version: String,
    /// Session provider used for the run
    pub session_provider: String,
}

impl ReportMetadata {
    pub fn new(title: &str, target: &str, provider: &str, start_time: DateTime<Utc>) -> Self {
        Self {
            title: title.to_string(),
            target: target.to_string(),
            start_time,
            end_time: Utc::now(),
            scanner_version: env!("CARGO_PKG_VERSION").to_string(),
            session_provider: provider.to_string(),
        }
    }

    pub fn duration_secs(&self) -> u64 {
        self.end_time
            .signed_duration_since(self.start_time)
            .num_seconds()
            .max(0) as u64
    }
}

impl Default for ReportMetadata {
    fn default() -> Self {
        Self::new("Report", "", "anonymous", Utc::now())
    }
}

/// Result of a discovery run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryReport {
    pub metadata: ReportMetadata,
    /// Pages ordered by identity
    pub pages: Vec<Page>,
    /// Testable points in injection order
    pub input_points: Vec<InputPoint>,
    /// Links and redirects that left the target origin
    pub out_of_scope: Vec<String>,
    /// Names of the cookies the session holds
    pub cookies: Vec<String>,
    pub counts: ErrorCounts,
    /// The run stopped early; everything above is partial
    pub cancelled: bool,
}

impl DiscoveryReport {
    pub fn crawled(&self) -> usize {
        self.pages
            .iter()
            .filter(|p| p.discovery == crate::discovery::DiscoveryMethod::Crawled)
            .count()
    }

    pub fn guessed(&self) -> usize {
        self.pages.len() - self.crawled()
    }

    pub fn render(&self, format: ReportFormat) -> Result<String> {
        match format {
            ReportFormat::Text => formats::text::discovery(self),
            ReportFormat::Json => formats::json::generate(self),
        }
    }

    /// Save report to file with auto-detected format
    pub fn save(&self, path: &Path) -> Result<()> {
        save(path, self.render(ReportFormat::from_path(path))?)
    }
}

/// Summary statistics for a test report
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Total number of findings
    pub total_findings: usize,
    /// Findings by severity
    pub by_severity: BTreeMap<String, usize>,
    /// Findings by anomaly kind
    pub by_kind: BTreeMap<String, usize>,
    /// Findings by vector category (`page` for the sweep)
    pub by_category: BTreeMap<String, usize>,
    /// Number of distinct pages with findings
    pub affected_pages: usize,
    /// Run duration in seconds
    pub duration_secs: u64,
    /// Risk score (0-100)
    pub risk_score: u8,
}

impl ReportSummary {
    /// Calculate summary from findings
    pub fn from_findings(findings: &[Finding], metadata: &ReportMetadata) -> Self {
        let mut by_severity: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_kind: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_category: BTreeMap<String, usize> = BTreeMap::new();
        let mut pages = BTreeSet::new();

        for finding in findings {
            *by_severity.entry(finding.severity.name().to_string()).or_insert(0) += 1;
            *by_kind.entry(finding.kind.name().to_string()).or_insert(0) += 1;
            *by_category.entry(finding.category().to_string()).or_insert(0) += 1;
            pages.insert(finding.target.page().clone());
        }

        Self {
            total_findings: findings.len(),
            by_severity,
            by_kind,
            by_category,
            affected_pages: pages.len(),
            duration_secs: metadata.duration_secs(),
            risk_score: Self::calculate_risk_score(findings),
        }
    }

    /// Calculate overall risk score (0-100)
    fn calculate_risk_score(findings: &[Finding]) -> u8 {
        if findings.is_empty() {
            return 0;
        }

        let mut score: f64 = 0.0;

        for finding in findings {
            score += match finding.severity {
                Severity::High => 15.0,
                Severity::Medium => 8.0,
                Severity::Low => 3.0,
                Severity::Informational => 1.0,
            };
        }

        // Cap at 100
        (score.min(100.0)) as u8
    }

    pub fn count_of(&self, kind: AnomalyKind) -> usize {
        self.by_kind.get(kind.name()).copied().unwrap_or(0)
    }
}

/// Result of a test run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub metadata: ReportMetadata,
    pub summary: ReportSummary,
    /// Findings in deterministic order
    pub findings: Vec<Finding>,
    /// Pages in the input model
    pub pages: usize,
    /// Input points injected
    pub input_points: usize,
    /// Vectors in the set
    pub vectors: usize,
    /// Exchanges received by the detector
    pub exchanges: usize,
    /// Pages without inputs fetched by the sweep
    pub swept_pages: usize,
    pub counts: ErrorCounts,
    pub cancelled: bool,
}

impl TestReport {
    pub fn render(&self, format: ReportFormat) -> Result<String> {
        match format {
            ReportFormat::Text => formats::text::test(self),
            ReportFormat::Json => formats::json::generate(self),
        }
    }

    /// Save report to file with auto-detected format
    pub fn save(&self, path: &Path) -> Result<()> {
        save(path, self.render(ReportFormat::from_path(path))?)
    }
}

fn save(path: &Path, content: String) -> Result<()> {
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}

/// Report format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Text => "txt",
            ReportFormat::Json => "json",
        }
    }

    /// JSON for `.json` paths, text otherwise
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => ReportFormat::Json,
            _ => ReportFormat::Text,
        }
    }
}
