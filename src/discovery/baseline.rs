//! Soft-404 baseline

use url::Url;

use super::guesser::probe_base;
use super::similarity::SimilarityStrategy;
use crate::error::SessionError;
use crate::http::{Request, ResponseSnapshot};
use crate::session::Session;

/// Outcome of comparing a probe against the baseline
#[derive(Debug, Clone, PartialEq)]
pub enum Existence {
    Absent,
    Present { reason: String },
}

impl Existence {
    pub fn is_present(&self) -> bool {
        matches!(self, Existence::Present { .. })
    }
}

/// Response to a path that certainly does not exist
#[derive(Debug, Clone)]
pub struct Baseline {
    pub snapshot: ResponseSnapshot,
    /// The random path segment that was requested
    pub probe_token: String,
}

impl Baseline {
    /// Request a random path in the directory candidates are guessed under
    pub async fn fetch(base: &Url, session: &Session) -> Result<Self, SessionError> {
        let probe_token = format!("{}.html", uuid::Uuid::new_v4().simple());
        let dir = probe_base(base);
        let url = dir.join(&probe_token).unwrap_or(dir);

        let snapshot = session.send(&Request::get(url.as_str())).await?;
        tracing::info!(
            url = %url,
            status = snapshot.status,
            bytes = snapshot.body.len(),
            "Baseline fetched"
        );

        Ok(Self::from_snapshot(snapshot, &probe_token))
    }

    pub fn from_snapshot(snapshot: ResponseSnapshot, probe_token: &str) -> Self {
        Self {
            snapshot,
            probe_token: probe_token.to_string(),
        }
    }

    /// A baseline that never answered cannot tell present from absent
    pub fn is_usable(&self) -> bool {
        !self.snapshot.is_transport_failure()
    }

    pub fn status(&self) -> u16 {
        self.snapshot.status
    }

    /// Decide whether `candidate`, fetched for path segment `candidate_token`,
    /// is a real resource.
    ///
    /// A status that differs from the baseline is enough. With the same status
    /// the bodies are compared after removing the requested path segment, so a
    /// not-found page that echoes the path is still recognized.
    pub fn classify(
        &self,
        candidate: &ResponseSnapshot,
        candidate_token: &str,
        strategy: &dyn SimilarityStrategy,
        threshold: f64,
    ) -> Existence {
        if candidate.is_transport_failure() || matches!(candidate.status, 404 | 410) {
            return Existence::Absent;
        }

        if candidate.status != self.snapshot.status {
            return Existence::Present {
                reason: format!(
                    "status {} differs from baseline {}",
                    candidate.status, self.snapshot.status
                ),
            };
        }

        let baseline_body = strip_token(&self.snapshot.body, &self.probe_token);
        let candidate_body = strip_token(&candidate.body, candidate_token);
        let dissimilarity = 1.0 - strategy.similarity(&baseline_body, &candidate_body);

        if dissimilarity > threshold {
            Existence::Present {
                reason: format!(
                    "{} dissimilarity {:.2} above {:.2}",
                    strategy.name(),
                    dissimilarity,
                    threshold
                ),
            }
        } else {
            Existence::Absent
        }
    }
}

fn strip_token(body: &str, token: &str) -> String {
    let token = token.trim_start_matches('/');
    if token.is_empty() {
        return body.to_string();
    }
    body.replace(token, "")
}
