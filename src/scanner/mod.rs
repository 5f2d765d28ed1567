//! Anomaly scanner
//!
//! Turns injected exchanges and swept pages into findings.

pub mod detector;
mod findings;

pub use detector::{AnomalyDetector, AnomalyRule, DetectionRules, Observation};
pub use findings::{AnomalyKind, Finding, FindingTarget, Severity};
