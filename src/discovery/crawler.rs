//! Breadth-first crawler

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::page::{DiscoveryMethod, Page, PageId};
use super::{absorb, fetch_all};
use crate::app::DiscoveryConfig;
use crate::error::{ErrorCounts, SessionError};
use crate::pipeline::Cancellation;
use crate::scope::Scope;
use crate::session::Session;

/// Crawl bounds. Hitting one ends the crawl normally.
#[derive(Debug, Clone, Copy)]
pub struct CrawlLimits {
    /// Maximum link depth from the seed
    pub max_depth: usize,

    /// Maximum pages fetched
    pub max_pages: usize,

    /// Requests in flight at once
    pub max_concurrent: usize,

    /// Pause between batches in milliseconds
    pub delay_ms: u64,
}

impl Default for CrawlLimits {
    fn default() -> Self {
        Self::from(&DiscoveryConfig::default())
    }
}

impl From<&DiscoveryConfig> for CrawlLimits {
    fn from(config: &DiscoveryConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            max_pages: config.max_pages,
            max_concurrent: config.max_concurrent.max(1),
            delay_ms: config.delay_ms,
        }
    }
}

/// Per-traversal state, passed explicitly so runs stay isolated
#[derive(Debug, Default)]
pub struct CrawlContext {
    visited: HashSet<PageId>,

    /// Out-of-scope URLs seen in links or redirects
    pub out_of_scope: BTreeSet<String>,

    pub counts: ErrorCounts,

    /// Set when the traversal stopped early on cancellation
    pub cancelled: bool,
}

impl CrawlContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an identity visited. Returns `false` if it already was.
    pub fn visit(&mut self, id: &PageId) -> bool {
        self.visited.insert(id.clone())
    }

    pub fn is_visited(&self, id: &PageId) -> bool {
        self.visited.contains(id)
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    pub fn record_out_of_scope(&mut self, url: &Url) {
        if self.out_of_scope.insert(url.to_string()) {
            tracing::debug!(url = %url, "Out of scope");
            self.counts.scope_violations += 1;
        }
    }

    /// Fold another context's findings into this one
    pub fn absorb(&mut self, other: CrawlContext) {
        self.visited.extend(other.visited);
        self.out_of_scope.extend(other.out_of_scope);
        self.counts.merge(&other.counts);
        self.cancelled |= other.cancelled;
    }
}

/// Link and form graph walker
pub struct Crawler {
    session: Arc<Session>,
    scope: Arc<Scope>,
    limits: CrawlLimits,
}

impl Crawler {
    pub fn new(session: Arc<Session>, scope: Arc<Scope>, limits: CrawlLimits) -> Self {
        Self {
            session,
            scope,
            limits,
        }
    }

    /// Crawl from `seed`, returning pages in the order they were fetched.
    ///
    /// Forms are recorded, never submitted. Identities already in `ctx` are
    /// skipped without a request.
    pub async fn crawl(
        &self,
        seed: &Url,
        ctx: &mut CrawlContext,
        cancel: &Cancellation,
    ) -> Result<Vec<Page>, SessionError> {
        let mut queue: VecDeque<(Url, usize)> = VecDeque::from([(seed.clone(), 0)]);
        let mut pages = Vec::new();
        let mut fetched = 0usize;

        tracing::info!(seed = %seed, scope = %self.scope.summary(), "Crawl started");

        while !queue.is_empty() {
            if cancel.is_cancelled() {
                ctx.cancelled = true;
                break;
            }

            let mut batch: Vec<(Url, usize)> = Vec::new();
            let mut capped = false;
            while batch.len() < self.limits.max_concurrent {
                if fetched + batch.len() >= self.limits.max_pages {
                    capped = true;
                    break;
                }
                let Some((url, depth)) = queue.pop_front() else {
                    break;
                };
                if depth > self.limits.max_depth {
                    continue;
                }
                if !ctx.visit(&PageId::from_url(&url)) {
                    continue;
                }
                batch.push((url, depth));
            }

            if batch.is_empty() {
                if capped {
                    tracing::info!(max_pages = self.limits.max_pages, "Page cap reached");
                    break;
                }
                continue;
            }
            fetched += batch.len();

            let urls: Vec<Url> = batch.iter().map(|(u, _)| u.clone()).collect();
            let results = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    ctx.cancelled = true;
                    break;
                }
                results = fetch_all(&self.session, &urls, self.limits.max_concurrent) => results,
            };

            for ((_, depth), result) in batch.into_iter().zip(results) {
                let snapshot = result?;
                let Some((page, links)) = absorb(&snapshot, DiscoveryMethod::Crawled, &self.scope, ctx)
                else {
                    continue;
                };

                tracing::debug!(page = %page.id, forms = page.forms.len(), links = links.len(), "Crawled");

                for link in links {
                    if depth < self.limits.max_depth && !ctx.is_visited(&PageId::from_url(&link)) {
                        queue.push_back((link, depth + 1));
                    }
                }
                pages.push(page);
            }

            if self.limits.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.limits.delay_ms)).await;
            }
        }

        tracing::info!(
            pages = pages.len(),
            visited = ctx.visited_count(),
            out_of_scope = ctx.out_of_scope.len(),
            cancelled = ctx.cancelled,
            "Crawl finished"
        );

        Ok(pages)
    }
}
