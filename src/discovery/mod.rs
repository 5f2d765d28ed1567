//! Discovery engine
//!
//! The crawler and the guesser run side by side, each with its own
//! [`CrawlContext`]. The input model builder then folds their pages into one
//! [`InputGraph`].

pub mod baseline;
pub mod crawler;
pub mod guesser;
pub mod model;
pub mod page;
pub mod parse;
pub mod similarity;

pub use baseline::{Baseline, Existence};
pub use crawler::{CrawlContext, CrawlLimits, Crawler};
pub use guesser::Guesser;
pub use model::{InputGraph, InputPoint, InputTarget};
pub use page::{DiscoveryMethod, Field, FieldKind, Form, FormKey, Page, PageId};
pub use parse::ParsedDocument;
pub use similarity::{SimilarityKind, SimilarityStrategy};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use url::Url;

use crate::error::SessionError;
use crate::http::{Request, ResponseSnapshot};
use crate::scope::{Scope, ScopeDecision};
use crate::session::Session;

/// Issue GET requests with at most `max_concurrent` in flight.
///
/// Results come back in input order. A task that dies without answering is
/// reported as a transport failure.
pub(crate) async fn fetch_all(
    session: &Arc<Session>,
    urls: &[Url],
    max_concurrent: usize,
) -> Vec<Result<ResponseSnapshot, SessionError>> {
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut tasks = JoinSet::new();

    for (idx, url) in urls.iter().enumerate() {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => break,
        };
        let session = session.clone();
        let request = Request::get(url.as_str());

        tasks.spawn(async move {
            let _permit = permit;
            (idx, session.send(&request).await)
        });
    }

    let mut results: Vec<Option<Result<ResponseSnapshot, SessionError>>> =
        (0..urls.len()).map(|_| None).collect();

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((idx, result)) => results[idx] = Some(result),
            Err(e) => tracing::warn!(error = %e, "Discovery task failed"),
        }
    }

    results
        .into_iter()
        .zip(urls)
        .map(|(result, url)| {
            result.unwrap_or_else(|| {
                Ok(ResponseSnapshot::transport_failure(
                    Request::get(url.as_str()),
                    "task aborted",
                    Duration::ZERO,
                ))
            })
        })
        .collect()
}

/// Turn a fetched response into a page plus the in-scope links it offers.
///
/// The requested URL must already be marked visited. Redirects are tracked by
/// their final URL, which is marked visited here.
pub(crate) fn absorb(
    snapshot: &ResponseSnapshot,
    discovery: DiscoveryMethod,
    scope: &Scope,
    ctx: &mut CrawlContext,
) -> Option<(Page, Vec<Url>)> {
    if snapshot.is_transport_failure() {
        ctx.counts.transport_failures += 1;
        return None;
    }
    if matches!(snapshot.status, 404 | 410) {
        tracing::debug!(url = %snapshot.request.url, "Not found");
        return None;
    }

    let requested = Url::parse(&snapshot.request.url).ok()?;
    let landed = Url::parse(&snapshot.final_url).unwrap_or_else(|_| requested.clone());

    if PageId::from_url(&landed) != PageId::from_url(&requested) {
        match scope.classify(&landed) {
            ScopeDecision::InScope => {}
            ScopeDecision::OutOfScope => {
                ctx.record_out_of_scope(&landed);
                return None;
            }
            ScopeDecision::Excluded => return None,
        }
        if !ctx.visit(&PageId::from_url(&landed)) {
            return None;
        }
    }

    let document = if snapshot.is_html() {
        ParsedDocument::parse(&snapshot.body, &landed)
    } else {
        tracing::debug!(url = %landed, "Response is not HTML, recording without links");
        ctx.counts.malformed_responses += 1;
        ParsedDocument::empty()
    };

    let mut page = Page::from_url(&landed, discovery);
    page.title = document.title;
    for form in document.forms {
        page.merge_form(form);
    }

    let mut links = Vec::new();
    for link in document.links {
        match scope.classify(&link) {
            ScopeDecision::InScope => links.push(link),
            ScopeDecision::OutOfScope => ctx.record_out_of_scope(&link),
            ScopeDecision::Excluded => tracing::trace!(url = %link, "Excluded link"),
        }
    }

    Some((page, links))
}
