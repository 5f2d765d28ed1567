//! Anomaly detection
//!
//! Every rule looks at one response on its own. A rule that fires yields
//! exactly one finding, so an exchange produces at most one finding per
//! [`AnomalyKind`].

use regex::Regex;

use super::findings::{AnomalyKind, Finding, FindingTarget};
use crate::app::DetectionConfig;
use crate::discovery::PageId;
use crate::fuzzer::Exchange;
use crate::http::ResponseSnapshot;

/// Inputs to the detection rules
#[derive(Debug, Clone)]
pub struct DetectionRules {
    /// Characters the target is expected to encode
    pub sanitized_chars: Vec<String>,

    /// Strings that must never appear in a response
    pub sensitive_data: Vec<String>,

    /// Latency in milliseconds above which a response is flagged
    pub slow_threshold_ms: u64,

    /// Flag 4xx/5xx answers to injected values
    pub flag_error_status: bool,

    /// Context kept on each side of an evidence match
    pub evidence_radius: usize,
}

impl DetectionRules {
    pub fn from_config(config: &DetectionConfig, sensitive_data: Vec<String>) -> Self {
        Self {
            sanitized_chars: config.sanitized_chars.clone(),
            sensitive_data,
            slow_threshold_ms: config.slow_threshold_ms,
            flag_error_status: config.flag_error_status,
            evidence_radius: config.evidence_radius,
        }
    }
}

impl Default for DetectionRules {
    fn default() -> Self {
        Self::from_config(&DetectionConfig::default(), Vec::new())
    }
}

/// What a rule saw when it fired
#[derive(Debug, Clone)]
pub struct Observation {
    pub evidence: String,
    pub description: String,
}

/// Trait for detection rules
pub trait AnomalyRule: Send + Sync {
    fn kind(&self) -> AnomalyKind;

    /// Whether the rule also runs on the payload-free page sweep
    fn applies_to_pages(&self) -> bool {
        false
    }

    /// Evaluate one response. `payload` is `None` on the page sweep.
    fn evaluate(&self, snapshot: &ResponseSnapshot, payload: Option<&str>) -> Option<Observation>;
}

/// Payload echoed with at least one sanitized character left raw
pub struct ReflectionRule {
    sanitized: Vec<String>,
    radius: usize,
}

impl ReflectionRule {
    pub fn new(sanitized: &[String], radius: usize) -> Self {
        Self {
            sanitized: sanitized.iter().filter(|c| !c.is_empty()).cloned().collect(),
            radius,
        }
    }

    /// Locate the reflection and the sanitized entries that stayed raw in it.
    ///
    /// A verbatim echo leaves every sanitized entry of the payload raw.
    /// Otherwise each single-character entry may show up raw or encoded at
    /// its position, and the raw ones are reported.
    fn raw_reflection(&self, payload: &str, body: &str) -> Option<(Vec<String>, usize, usize)> {
        let present: Vec<&String> = self
            .sanitized
            .iter()
            .filter(|c| payload.contains(c.as_str()))
            .collect();
        if present.is_empty() {
            return None;
        }

        if let Some(start) = body.find(payload) {
            let raw = present.into_iter().cloned().collect();
            return Some((raw, start, start + payload.len()));
        }

        let mut pattern = String::new();
        let mut groups: Vec<char> = Vec::new();
        for c in payload.chars() {
            if present.iter().any(|s| s.chars().eq(std::iter::once(c))) {
                pattern.push_str(&format!(
                    "({}|(?i:{}))",
                    regex::escape(&c.to_string()),
                    encoded_forms(c)
                ));
                groups.push(c);
            } else {
                pattern.push_str(&regex::escape(&c.to_string()));
            }
        }
        if groups.is_empty() {
            return None;
        }

        let re = match Regex::new(&pattern) {
            Ok(re) => re,
            Err(e) => {
                tracing::debug!(error = %e, "Payload pattern too large, verbatim check only");
                return None;
            }
        };

        for caps in re.captures_iter(body) {
            let mut raw: Vec<String> = Vec::new();
            for (idx, c) in groups.iter().enumerate() {
                let left_raw = caps
                    .get(idx + 1)
                    .map(|m| m.as_str().chars().eq(std::iter::once(*c)))
                    .unwrap_or(false);
                let c = c.to_string();
                if left_raw && !raw.contains(&c) {
                    raw.push(c);
                }
            }
            if !raw.is_empty() {
                let whole = caps.get(0)?;
                // Keep the configured order of sanitized entries
                raw.sort_by_key(|c| self.sanitized.iter().position(|s| s == c));
                return Some((raw, whole.start(), whole.end()));
            }
        }

        None
    }
}

/// Regex alternation of the usual HTML, URL and JS encodings of `c`
fn encoded_forms(c: char) -> String {
    let code = c as u32;
    let mut forms = vec![
        format!("&#0*{};", code),
        format!("&#x0*{:x};", code),
        format!(r"\\u{:04x}", code),
    ];
    if code < 0x80 {
        forms.push(format!("%{:02x}", code));
    }
    let named = match c {
        '<' => Some("&lt;"),
        '>' => Some("&gt;"),
        '&' => Some("&amp;"),
        '"' => Some("&quot;"),
        '\'' => Some("&apos;"),
        _ => None,
    };
    if let Some(named) = named {
        forms.push(named.to_string());
    }
    forms.join("|")
}

impl AnomalyRule for ReflectionRule {
    fn kind(&self) -> AnomalyKind {
        AnomalyKind::ReflectedUnsanitized
    }

    fn evaluate(&self, snapshot: &ResponseSnapshot, payload: Option<&str>) -> Option<Observation> {
        let payload = payload?;
        let (raw, start, end) = self.raw_reflection(payload, &snapshot.body)?;

        Some(Observation {
            evidence: excerpt(&snapshot.body, start, end, self.radius),
            description: format!(
                "The vector was reflected with {} left unencoded.",
                raw.iter()
                    .map(|c| format!("'{}'", c))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        })
    }
}

/// Any sensitive entry present in the body
pub struct LeakageRule {
    sensitive: Vec<String>,
    radius: usize,
}

impl LeakageRule {
    pub fn new(sensitive: &[String], radius: usize) -> Self {
        Self {
            sensitive: sensitive.iter().filter(|s| !s.is_empty()).cloned().collect(),
            radius,
        }
    }
}

impl AnomalyRule for LeakageRule {
    fn kind(&self) -> AnomalyKind {
        AnomalyKind::SensitiveLeakage
    }

    fn applies_to_pages(&self) -> bool {
        true
    }

    fn evaluate(&self, snapshot: &ResponseSnapshot, _payload: Option<&str>) -> Option<Observation> {
        let mut first: Option<(usize, usize)> = None;
        let mut leaked: Vec<&str> = Vec::new();

        for entry in &self.sensitive {
            if let Some(start) = snapshot.body.find(entry.as_str()) {
                first.get_or_insert((start, start + entry.len()));
                leaked.push(entry);
            }
        }

        let (start, end) = first?;
        Some(Observation {
            evidence: excerpt(&snapshot.body, start, end, self.radius),
            description: format!(
                "The response contains {} sensitive entr{}: {}",
                leaked.len(),
                if leaked.len() == 1 { "y" } else { "ies" },
                leaked.join(", ")
            ),
        })
    }
}

/// Latency above an absolute threshold
pub struct TimingRule {
    threshold_ms: u64,
}

impl TimingRule {
    pub fn new(threshold_ms: u64) -> Self {
        Self { threshold_ms }
    }
}

impl AnomalyRule for TimingRule {
    fn kind(&self) -> AnomalyKind {
        AnomalyKind::TimingAnomaly
    }

    fn applies_to_pages(&self) -> bool {
        true
    }

    fn evaluate(&self, snapshot: &ResponseSnapshot, _payload: Option<&str>) -> Option<Observation> {
        if snapshot.elapsed_ms <= self.threshold_ms {
            return None;
        }
        Some(Observation {
            evidence: format!("{} ms > {} ms", snapshot.elapsed_ms, self.threshold_ms),
            description: "The response took longer than the slow threshold.".to_string(),
        })
    }
}

/// 4xx/5xx status in answer to an injected value
pub struct ErrorStatusRule;

impl AnomalyRule for ErrorStatusRule {
    fn kind(&self) -> AnomalyKind {
        AnomalyKind::ErrorStatus
    }

    fn evaluate(&self, snapshot: &ResponseSnapshot, payload: Option<&str>) -> Option<Observation> {
        payload?;
        if !snapshot.is_error_status() {
            return None;
        }
        Some(Observation {
            evidence: format!("HTTP {}", snapshot.status),
            description: "The injected value made the target answer with an error status.".to_string(),
        })
    }
}

/// Runs every enabled rule over exchanges and swept pages
pub struct AnomalyDetector {
    rules: Vec<Box<dyn AnomalyRule>>,
}

impl AnomalyDetector {
    pub fn new(rules: &DetectionRules) -> Self {
        let mut enabled: Vec<Box<dyn AnomalyRule>> = vec![
            Box::new(ReflectionRule::new(&rules.sanitized_chars, rules.evidence_radius)),
            Box::new(LeakageRule::new(&rules.sensitive_data, rules.evidence_radius)),
            Box::new(TimingRule::new(rules.slow_threshold_ms)),
        ];
        if rules.flag_error_status {
            enabled.push(Box::new(ErrorStatusRule));
        }
        Self { rules: enabled }
    }

    /// Rule kinds in evaluation order
    pub fn kinds(&self) -> Vec<AnomalyKind> {
        self.rules.iter().map(|r| r.kind()).collect()
    }

    /// Findings for one exchange. Transport failures yield none.
    pub fn detect(&self, exchange: &Exchange) -> Vec<Finding> {
        let snapshot = &exchange.snapshot;
        if snapshot.is_transport_failure() {
            return Vec::new();
        }

        let target = FindingTarget::Input {
            point: exchange.point.clone(),
        };
        self.rules
            .iter()
            .filter_map(|rule| {
                let seen = rule.evaluate(snapshot, Some(&exchange.vector.payload))?;
                Some(finding(rule.kind(), target.clone(), snapshot, seen).with_vector(&exchange.vector))
            })
            .collect()
    }

    /// Findings for a page fetched once without injection
    pub fn sweep(&self, page: &PageId, snapshot: &ResponseSnapshot) -> Vec<Finding> {
        if snapshot.is_transport_failure() {
            return Vec::new();
        }

        let target = FindingTarget::Page { page: page.clone() };
        self.rules
            .iter()
            .filter(|rule| rule.applies_to_pages())
            .filter_map(|rule| {
                let seen = rule.evaluate(snapshot, None)?;
                Some(finding(rule.kind(), target.clone(), snapshot, seen))
            })
            .collect()
    }
}

/// Evaluate `rules` against one exchange
pub fn detect(exchange: &Exchange, rules: &DetectionRules) -> Vec<Finding> {
    AnomalyDetector::new(rules).detect(exchange)
}

fn finding(
    kind: AnomalyKind,
    target: FindingTarget,
    snapshot: &ResponseSnapshot,
    seen: Observation,
) -> Finding {
    Finding::new(kind, target)
        .with_evidence(&seen.evidence)
        .with_description(&seen.description)
        .with_request(&snapshot.request.reproduction())
        .with_url(&snapshot.request.full_url())
        .with_response(snapshot.status, snapshot.elapsed_ms)
}

/// `body[start..end]` with up to `radius` characters either side, on one line
fn excerpt(body: &str, start: usize, end: usize, radius: usize) -> String {
    let from = body[..start]
        .char_indices()
        .rev()
        .take(radius)
        .last()
        .map(|(i, _)| i)
        .unwrap_or(start);
    let to = body[end..]
        .char_indices()
        .nth(radius)
        .map(|(i, _)| end + i)
        .unwrap_or(body.len());

    let mut out = String::new();
    if from > 0 {
        out.push_str("...");
    }
    out.push_str(&body[from..to].replace(['\r', '\n', '\t'], " "));
    if to < body.len() {
        out.push_str("...");
    }
    out
}
