//! Run pipeline
//!
//! Session -> crawler and guesser side by side -> input model -> injector
//! -> detector. Discovery mode stops after the input model.

mod cancel;

pub use cancel::Cancellation;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::app::Config;
use crate::discovery::{
    fetch_all, Baseline, CrawlContext, CrawlLimits, Crawler, Guesser, InputGraph, Page,
};
use crate::error::{ErrorCounts, SessionError, SurfacerError};
use crate::fuzzer::{Injector, VectorSet};
use crate::reporting::{DiscoveryReport, ReportMetadata, ReportSummary, TestReport};
use crate::scanner::{AnomalyDetector, DetectionRules, Finding};
use crate::scope::Scope;
use crate::session::{RetryPolicy, Session, SessionProvider};

/// Test-mode inputs on top of the discovery inputs
#[derive(Debug, Clone, Default)]
pub struct TestInputs {
    /// Raw vector file lines, `CATEGORY:` headers included
    pub vectors: Vec<String>,

    /// Strings that must never show up in a response
    pub sensitive: Vec<String>,

    /// Overrides `detection.sanitized_chars`
    pub sanitized_chars: Option<Vec<String>>,

    /// Overrides `detection.slow_threshold_ms`
    pub slow_ms: Option<u64>,
}

/// One authenticated run against one target origin
pub struct Pipeline {
    config: Config,
    seed: Url,
    scope: Arc<Scope>,
    session: Arc<Session>,
    cancel: Cancellation,
}

impl Pipeline {
    /// Authenticate and prepare a run. A failed login aborts here.
    pub async fn new(
        config: Config,
        provider: Arc<dyn SessionProvider>,
        seed: Url,
        cancel: Cancellation,
    ) -> Result<Self, SurfacerError> {
        if !matches!(seed.scheme(), "http" | "https") {
            return Err(SurfacerError::InvalidTarget(seed.to_string()));
        }
        let scope = Scope::from_url(&seed, &config.discovery.exclude_patterns)
            .map_err(|e| SurfacerError::InvalidTarget(format!("{}: {}", seed, e)))?;

        let retry = RetryPolicy {
            max_retries: config.http.max_retries,
            backoff: Duration::from_millis(config.http.retry_backoff_ms),
        };
        let session = Session::establish(provider, retry).await?;

        Ok(Self {
            config,
            seed,
            scope: Arc::new(scope),
            session: Arc::new(session),
            cancel,
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Crawl and guess in parallel, then build the input model
    pub async fn discover(
        &self,
        words: &[String],
        extensions: &[String],
    ) -> Result<(DiscoveryReport, InputGraph), SurfacerError> {
        let started = Utc::now();
        let extensions = if extensions.is_empty() {
            self.config.guesser.default_extensions.clone()
        } else {
            extensions.to_vec()
        };

        let baseline = Baseline::fetch(&self.seed, &self.session).await?;

        let crawler = Crawler::new(
            self.session.clone(),
            self.scope.clone(),
            CrawlLimits::from(&self.config.discovery),
        );
        let guesser = Guesser::new(self.session.clone(), self.scope.clone(), &self.config.guesser);

        let mut crawl_ctx = CrawlContext::new();
        let mut guess_ctx = CrawlContext::new();
        let (crawled, guessed) = tokio::join!(
            crawler.crawl(&self.seed, &mut crawl_ctx, &self.cancel),
            guesser.guess(
                &self.seed,
                words,
                &extensions,
                &baseline,
                &mut guess_ctx,
                &self.cancel
            ),
        );
        let (crawled, guessed) = (crawled?, guessed?);

        crawl_ctx.absorb(guess_ctx);
        let graph =
            InputGraph::build_with(crawled, guessed, &self.config.discovery.force_injectable);

        let mut counts = crawl_ctx.counts;
        counts.session_refreshes = self.session.refreshes();

        let report = DiscoveryReport {
            metadata: self.metadata("Discovery report", started),
            pages: graph.pages().to_vec(),
            input_points: graph.points().to_vec(),
            out_of_scope: crawl_ctx.out_of_scope.into_iter().collect(),
            cookies: self.session.capability().await.cookies,
            counts,
            cancelled: crawl_ctx.cancelled || self.cancel.is_cancelled(),
        };

        tracing::info!(
            pages = report.pages.len(),
            input_points = report.input_points.len(),
            out_of_scope = report.out_of_scope.len(),
            cancelled = report.cancelled,
            "Discovery finished"
        );

        Ok((report, graph))
    }

    /// Discover, inject every vector into every input point, and detect
    pub async fn test(
        &self,
        words: &[String],
        extensions: &[String],
        inputs: TestInputs,
    ) -> Result<TestReport, SurfacerError> {
        let started = Utc::now();
        let (discovery, graph) = self.discover(words, extensions).await?;

        let sanitized = inputs
            .sanitized_chars
            .unwrap_or_else(|| self.config.detection.sanitized_chars.clone());
        let vectors = VectorSet::from_lines(&inputs.vectors, &sanitized);

        let mut rules = DetectionRules::from_config(&self.config.detection, inputs.sensitive);
        rules.sanitized_chars = sanitized;
        if let Some(ms) = inputs.slow_ms {
            rules.slow_threshold_ms = ms;
        }
        let detector = AnomalyDetector::new(&rules);
        tracing::info!(rules = ?detector.kinds(), "Detection rules ready");

        let graph = Arc::new(graph);
        let vector_count = vectors.len();
        let injector = Arc::new(Injector::new(
            graph.clone(),
            Arc::new(vectors),
            self.session.clone(),
            self.config.injection.clone(),
        ));

        let mut counts = discovery.counts;
        let mut findings: Vec<Finding> = Vec::new();
        let mut exchanges = 0usize;

        let (mut rx, handle) = injector.inject(self.cancel.clone());
        while let Some(exchange) = rx.recv().await {
            exchanges += 1;
            if exchange.snapshot.is_transport_failure() {
                counts.transport_failures += 1;
                continue;
            }
            findings.extend(detector.detect(&exchange));
        }
        match handle.await {
            Ok(result) => result?,
            Err(e) => tracing::warn!(error = %e, "Injection task failed"),
        }

        let sweep = graph.pages_without_inputs();
        let swept_pages = sweep.len();
        findings.extend(self.sweep(&sweep, &detector, &mut counts).await?);

        findings.sort_by_key(Finding::sort_key);
        counts.session_refreshes = self.session.refreshes();

        let metadata = self.metadata("Test report", started);
        let report = TestReport {
            summary: ReportSummary::from_findings(&findings, &metadata),
            metadata,
            findings,
            pages: graph.pages().len(),
            input_points: graph.points().len(),
            vectors: vector_count,
            exchanges,
            swept_pages,
            counts,
            cancelled: discovery.cancelled || self.cancel.is_cancelled(),
        };

        tracing::info!(
            findings = report.summary.total_findings,
            exchanges = report.exchanges,
            cancelled = report.cancelled,
            "Test finished"
        );

        Ok(report)
    }

    /// Fetch each page without inputs once and run the page rules on it
    async fn sweep(
        &self,
        pages: &[&Page],
        detector: &AnomalyDetector,
        counts: &mut ErrorCounts,
    ) -> Result<Vec<Finding>, SessionError> {
        if pages.is_empty() || self.cancel.is_cancelled() {
            return Ok(Vec::new());
        }

        let mut targets = Vec::new();
        for page in pages {
            match Url::parse(&page.url) {
                Ok(url) => targets.push((page.id.clone(), url)),
                Err(e) => tracing::warn!(page = %page.id, error = %e, "Unparseable page URL"),
            }
        }
        let urls: Vec<Url> = targets.iter().map(|(_, u)| u.clone()).collect();

        tracing::info!(pages = urls.len(), "Sweeping pages without inputs");
        let results = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(Vec::new()),
            results = fetch_all(&self.session, &urls, self.config.injection.max_concurrent) => results,
        };

        let mut findings = Vec::new();
        for ((id, _), result) in targets.iter().zip(results) {
            let snapshot = result?;
            if snapshot.is_transport_failure() {
                counts.transport_failures += 1;
                continue;
            }
            findings.extend(detector.sweep(id, &snapshot));
        }
        Ok(findings)
    }

    fn metadata(&self, title: &str, started: chrono::DateTime<Utc>) -> ReportMetadata {
        ReportMetadata::new(title, self.seed.as_str(), self.session.provider_name(), started)
    }
}
