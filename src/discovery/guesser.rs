//! Word-list path guesser

use std::collections::HashSet;
use std::sync::Arc;
use url::Url;

use super::baseline::Baseline;
use super::crawler::CrawlContext;
use super::page::{DiscoveryMethod, Page, PageId};
use super::similarity::SimilarityStrategy;
use super::{absorb, fetch_all};
use crate::app::GuesserConfig;
use crate::error::SessionError;
use crate::pipeline::Cancellation;
use crate::scope::Scope;
use crate::session::Session;

/// Candidate paths: every word with the empty extension first, then each
/// supplied extension. Duplicates are dropped, order is kept.
pub fn candidates(words: &[String], extensions: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    let extensions: Vec<&str> = std::iter::once("")
        .chain(extensions.iter().map(|e| e.trim()))
        .collect();

    for word in words {
        let word = word.trim().trim_start_matches('/');
        if word.is_empty() {
            continue;
        }
        for ext in &extensions {
            let candidate = format!("{}{}", word, ext);
            if seen.insert(candidate.clone()) {
                out.push(candidate);
            }
        }
    }

    out
}

/// Directory that candidates are resolved against.
///
/// `http://t/dvwa/` and `http://t/dvwa` both give `http://t/dvwa/`, while a
/// file-like last segment such as `index.php` gives its parent directory.
pub fn probe_base(base: &Url) -> Url {
    let mut dir = base.clone();
    dir.set_query(None);
    dir.set_fragment(None);

    let path = dir.path().to_string();
    if path.ends_with('/') {
        return dir;
    }

    let last = path.rsplit('/').next().unwrap_or("");
    if last.contains('.') {
        dir.join("./").unwrap_or(dir)
    } else {
        dir.set_path(&format!("{}/", path));
        dir
    }
}

/// Probes for unlinked resources and compares them against the baseline
pub struct Guesser {
    session: Arc<Session>,
    scope: Arc<Scope>,
    strategy: Arc<dyn SimilarityStrategy>,
    threshold: f64,
    max_concurrent: usize,
}

impl Guesser {
    pub fn new(session: Arc<Session>, scope: Arc<Scope>, config: &GuesserConfig) -> Self {
        Self {
            session,
            scope,
            strategy: config.similarity.build(),
            threshold: config.dissimilarity_threshold,
            max_concurrent: config.max_concurrent.max(1),
        }
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn SimilarityStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Guess pages under `base`.
    ///
    /// Pages that exist are parsed like crawled ones. Their links and form
    /// actions are followed for exactly one more hop.
    pub async fn guess(
        &self,
        base: &Url,
        words: &[String],
        extensions: &[String],
        baseline: &Baseline,
        ctx: &mut CrawlContext,
        cancel: &Cancellation,
    ) -> Result<Vec<Page>, SessionError> {
        if !baseline.is_usable() {
            tracing::warn!("Baseline request failed, skipping page guessing");
            return Ok(Vec::new());
        }

        let dir = probe_base(base);
        let mut probes: Vec<(String, Url)> = Vec::new();
        for candidate in candidates(words, extensions) {
            let Ok(url) = dir.join(&candidate) else {
                continue;
            };
            if !self.scope.is_in_scope(&url) {
                continue;
            }
            probes.push((candidate, url));
        }

        tracing::info!(
            base = %dir,
            candidates = probes.len(),
            strategy = self.strategy.name(),
            baseline_status = baseline.status(),
            "Guessing started"
        );

        let urls: Vec<Url> = probes.iter().map(|(_, u)| u.clone()).collect();
        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                ctx.cancelled = true;
                return Ok(Vec::new());
            }
            results = fetch_all(&self.session, &urls, self.max_concurrent) => results,
        };

        let mut pages = Vec::new();
        let mut hop: Vec<Url> = Vec::new();

        for ((candidate, url), result) in probes.into_iter().zip(results) {
            let snapshot = result?;
            let existence =
                baseline.classify(&snapshot, &candidate, self.strategy.as_ref(), self.threshold);

            if snapshot.is_transport_failure() {
                ctx.counts.transport_failures += 1;
                continue;
            }
            if !existence.is_present() {
                continue;
            }
            if !ctx.visit(&PageId::from_url(&url)) {
                continue;
            }

            let Some((page, links)) = absorb(&snapshot, DiscoveryMethod::Guessed, &self.scope, ctx) else {
                continue;
            };
            tracing::info!(page = %page.id, status = snapshot.status, ?existence, "Guessed page exists");

            hop.extend(links);
            for form in &page.forms {
                if let Ok(action) = Url::parse(&form.action) {
                    if self.scope.is_in_scope(&action) {
                        hop.push(action);
                    }
                }
            }
            pages.push(page);
        }

        pages.extend(self.follow_once(hop, ctx, cancel).await?);

        tracing::info!(pages = pages.len(), "Guessing finished");
        Ok(pages)
    }

    /// Fetch the one-hop targets of guessed pages without following further
    async fn follow_once(
        &self,
        hop: Vec<Url>,
        ctx: &mut CrawlContext,
        cancel: &Cancellation,
    ) -> Result<Vec<Page>, SessionError> {
        let mut targets = Vec::new();
        for url in hop {
            if ctx.visit(&PageId::from_url(&url)) {
                targets.push(url);
            }
        }
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                ctx.cancelled = true;
                return Ok(Vec::new());
            }
            results = fetch_all(&self.session, &targets, self.max_concurrent) => results,
        };

        let mut pages = Vec::new();
        for result in results {
            let snapshot = result?;
            if let Some((page, _)) = absorb(&snapshot, DiscoveryMethod::Guessed, &self.scope, ctx) {
                pages.push(page);
            }
        }
        Ok(pages)
    }
}
