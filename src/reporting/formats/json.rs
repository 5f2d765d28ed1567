//! JSON Report Generator
//!
//! Generates machine-readable JSON reports.

use anyhow::Result;
use serde::Serialize;

/// Generate JSON report
pub fn generate<T: Serialize>(report: &T) -> Result<String> {
    let json = serde_json::to_string_pretty(report)?;
    Ok(json)
}

/// Generate minified JSON report
pub fn generate_minified<T: Serialize>(report: &T) -> Result<String> {
    let json = serde_json::to_string(report)?;
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporting::tests::sample_findings;
    use crate::reporting::{ReportMetadata, ReportSummary, TestReport};

    fn report() -> TestReport {
        let findings = sample_findings();
        let metadata = ReportMetadata::default();
        TestReport {
            summary: ReportSummary::from_findings(&findings, &metadata),
            metadata,
            findings,
            pages: 3,
            input_points: 2,
            vectors: 2,
            exchanges: 4,
            swept_pages: 1,
            counts: Default::default(),
            cancelled: false,
        }
    }

    #[test]
    fn test_generate_json_report() {
        let json = generate(&report()).unwrap();
        assert!(json.contains("\"sensitive_leakage\""));
        assert!(json.contains("\"high\""));

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["summary"]["total_findings"], 3);
        assert_eq!(value["findings"][0]["target"]["scope"], "page");
    }

    #[test]
    fn test_generate_minified_json() {
        let json = generate_minified(&report()).unwrap();
        assert!(!json.contains('\n'));
    }
}
