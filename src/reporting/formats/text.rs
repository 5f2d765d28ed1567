//! Plain-text Report Generator
//!
//! Generates terminal-friendly reports.

use anyhow::Result;

use crate::discovery::DiscoveryMethod;
use crate::error::ErrorCounts;
use crate::reporting::{DiscoveryReport, ReportMetadata, TestReport};
use crate::scanner::Severity;

const RULE: &str = "================================================================";

/// Generate a discovery report
pub fn discovery(report: &DiscoveryReport) -> Result<String> {
    let mut out = header(&report.metadata, report.cancelled);

    out.push_str(&format!(
        "PAGES ({}: {} crawled, {} guessed)\n",
        report.pages.len(),
        report.crawled(),
        report.guessed()
    ));
    for page in &report.pages {
        let method = match page.discovery {
            DiscoveryMethod::Crawled => "crawled",
            DiscoveryMethod::Guessed => "guessed",
        };
        let methods: Vec<&str> = page.methods.iter().map(|m| m.as_str()).collect();
        out.push_str(&format!("  [{}] {} ({})", method, page.id, methods.join(", ")));
        if let Some(title) = &page.title {
            out.push_str(&format!(" \"{}\"", title));
        }
        out.push('\n');

        for (key, value) in &page.query_inputs {
            out.push_str(&format!("      query {}={}\n", key, value));
        }
        for (idx, form) in page.forms.iter().enumerate() {
            out.push_str(&format!("      form#{} {} {}\n", idx, form.method, form.action));
            for field in &form.fields {
                let mut line = format!("        - {} ({})", field.name, field.kind.as_str());
                if !field.default.is_empty() {
                    line.push_str(&format!(" = {:?}", field.default));
                }
                if !field.injectable {
                    line.push_str(" [not injected]");
                }
                out.push_str(&line);
                out.push('\n');
            }
        }
    }
    out.push('\n');

    out.push_str(&format!("INPUT POINTS ({})\n", report.input_points.len()));
    for point in &report.input_points {
        out.push_str(&format!("  {}\n", point));
    }
    out.push('\n');

    if !report.cookies.is_empty() {
        out.push_str(&format!("COOKIES ({})\n", report.cookies.len()));
        for name in &report.cookies {
            out.push_str(&format!("  {}\n", name));
        }
        out.push('\n');
    }

    if !report.out_of_scope.is_empty() {
        out.push_str(&format!("OUT OF SCOPE ({})\n", report.out_of_scope.len()));
        for url in &report.out_of_scope {
            out.push_str(&format!("  {}\n", url));
        }
        out.push('\n');
    }

    out.push_str(&counts(&report.counts));
    Ok(out)
}

/// Generate a test report
pub fn test(report: &TestReport) -> Result<String> {
    let mut out = header(&report.metadata, report.cancelled);
    let summary = &report.summary;

    out.push_str(&format!(
        "Tested {} input points on {} pages with {} vectors ({} exchanges), swept {} pages\n",
        report.input_points, report.pages, report.vectors, report.exchanges, report.swept_pages
    ));
    out.push_str(&format!(
        "Findings: {} (risk score {}/100)\n",
        summary.total_findings, summary.risk_score
    ));

    let severities = [
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Informational,
    ];
    for sev in severities {
        if let Some(count) = summary.by_severity.get(sev.name()) {
            out.push_str(&format!("  {:<14}{}\n", sev.name(), count));
        }
    }
    if !summary.by_kind.is_empty() {
        out.push_str("By kind:\n");
        for (kind, count) in &summary.by_kind {
            out.push_str(&format!("  {:<24}{}\n", kind, count));
        }
    }
    if !summary.by_category.is_empty() {
        out.push_str("By category:\n");
        for (category, count) in &summary.by_category {
            out.push_str(&format!("  {:<24}{}\n", category, count));
        }
    }
    out.push('\n');

    for (idx, finding) in report.findings.iter().enumerate() {
        out.push_str(&format!(
            "{}. [{}] {} at {}\n",
            idx + 1,
            finding.severity.as_str().to_uppercase(),
            finding.kind.name(),
            finding.target.label()
        ));
        if let Some(vector) = &finding.vector {
            out.push_str(&format!("   Vector:   {} ({})\n", vector.payload, vector.category));
        }
        out.push_str(&format!("   Evidence: {}\n", finding.evidence));
        if !finding.description.is_empty() {
            out.push_str(&format!("   Detail:   {}\n", finding.description));
        }
        out.push_str(&format!(
            "   Response: HTTP {} in {} ms\n",
            finding.status, finding.elapsed_ms
        ));
        out.push_str(&format!("   Request:  {}\n", finding.request));
        if let Some(cwe) = finding.cwe_id {
            out.push_str(&format!("   CWE-{}\n", cwe));
        }
        out.push('\n');
    }

    out.push_str(&counts(&report.counts));
    Ok(out)
}

fn header(metadata: &ReportMetadata, cancelled: bool) -> String {
    let mut out = String::new();
    out.push_str(RULE);
    out.push('\n');
    out.push_str(&format!("{} for {}\n", metadata.title, metadata.target));
    out.push_str(&format!(
        "{} to {} ({}s), session: {}\n",
        metadata.start_time.format("%Y-%m-%d %H:%M:%S UTC"),
        metadata.end_time.format("%Y-%m-%d %H:%M:%S UTC"),
        metadata.duration_secs(),
        metadata.session_provider
    ));
    if cancelled {
        out.push_str("Run was cancelled: results are partial\n");
    }
    out.push_str(RULE);
    out.push_str("\n\n");
    out
}

fn counts(counts: &ErrorCounts) -> String {
    format!(
        "Errors: {} transport failures, {} malformed responses, {} scope violations, {} session refreshes\n",
        counts.transport_failures,
        counts.malformed_responses,
        counts.scope_violations,
        counts.session_refreshes
    )
}
