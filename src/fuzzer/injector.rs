//! Vector injection
//!
//! Read-only input points run fully in parallel under a shared semaphore.
//! Points of a state-changing form are replayed one at a time, in a lane per
//! form, so injections cannot interleave on the server side.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use super::vectors::{Vector, VectorSet};
use crate::app::InjectionConfig;
use crate::discovery::{FormKey, InputGraph, InputPoint};
use crate::error::SessionError;
use crate::http::ResponseSnapshot;
use crate::pipeline::Cancellation;
use crate::session::Session;

/// One injected request and what came back
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub point: InputPoint,
    pub vector: Vector,
    pub snapshot: ResponseSnapshot,
}

/// Drives every (input point, vector) pair through the session
pub struct Injector {
    graph: Arc<InputGraph>,
    vectors: Arc<VectorSet>,
    session: Arc<Session>,
    config: InjectionConfig,
}

impl Injector {
    pub fn new(
        graph: Arc<InputGraph>,
        vectors: Arc<VectorSet>,
        session: Arc<Session>,
        config: InjectionConfig,
    ) -> Self {
        Self {
            graph,
            vectors,
            session,
            config,
        }
    }

    /// Number of exchanges a full run produces
    pub fn planned(&self) -> usize {
        self.graph.points().len() * self.vectors.len()
    }

    /// Inject every vector into one point, in vector order. Nothing is
    /// cached, so calling this again replays the point.
    pub async fn inject_point(&self, point: &InputPoint) -> Result<Vec<Exchange>, SessionError> {
        let mut exchanges = Vec::with_capacity(self.vectors.len());
        for vector in self.vectors.iter() {
            if let Some(exchange) = self.exchange(point, vector).await? {
                exchanges.push(exchange);
            }
        }
        Ok(exchanges)
    }

    /// Start injecting in the background.
    ///
    /// Exchanges arrive on the receiver as they complete, so detection can
    /// start right away. The handle resolves when injection is done, was
    /// cancelled, or a re-authentication failed.
    pub fn inject(
        self: Arc<Self>,
        cancel: Cancellation,
    ) -> (mpsc::Receiver<Exchange>, JoinHandle<Result<(), SessionError>>) {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));

        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::warn!("Injection cancelled");
                    Ok(())
                }
                result = self.run(tx) => result,
            }
        });

        (rx, handle)
    }

    async fn run(self: &Arc<Self>, tx: mpsc::Sender<Exchange>) -> Result<(), SessionError> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let fatal: Arc<Mutex<Option<SessionError>>> = Arc::new(Mutex::new(None));
        let mut tasks = JoinSet::new();

        tracing::info!(
            points = self.graph.points().len(),
            vectors = self.vectors.len(),
            planned = self.planned(),
            "Injection started"
        );

        // State-changing forms: one sequential lane each
        let mut lane_order: Vec<FormKey> = Vec::new();
        let mut lanes: HashMap<FormKey, Vec<InputPoint>> = HashMap::new();
        let mut read_only: Vec<InputPoint> = Vec::new();

        for point in self.graph.points() {
            match self.graph.form_key(point) {
                Some(key) if self.graph.is_mutating(point) => {
                    if !lanes.contains_key(&key) {
                        lane_order.push(key.clone());
                    }
                    lanes.entry(key).or_default().push(point.clone());
                }
                _ => read_only.push(point.clone()),
            }
        }

        for key in lane_order {
            let points = lanes.remove(&key).unwrap_or_default();
            tracing::debug!(action = %key.action, points = points.len(), "Serialized lane");

            let this = self.clone();
            let semaphore = semaphore.clone();
            let fatal = fatal.clone();
            let tx = tx.clone();

            tasks.spawn(async move {
                for point in &points {
                    for vector in this.vectors.iter() {
                        if fatal.lock().is_some() {
                            return;
                        }
                        let Ok(_permit) = semaphore.acquire().await else {
                            return;
                        };
                        match this.exchange(point, vector).await {
                            Ok(Some(exchange)) => {
                                if tx.send(exchange).await.is_err() {
                                    return;
                                }
                            }
                            Ok(None) => {}
                            Err(e) => {
                                fatal.lock().get_or_insert(e);
                                return;
                            }
                        }
                    }
                }
            });
        }

        'spawn: for point in read_only {
            for vector in self.vectors.iter() {
                if fatal.lock().is_some() {
                    break 'spawn;
                }
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => break 'spawn,
                };

                let this = self.clone();
                let fatal = fatal.clone();
                let tx = tx.clone();
                let point = point.clone();
                let vector = vector.clone();

                tasks.spawn(async move {
                    let _permit = permit;
                    match this.exchange(&point, &vector).await {
                        Ok(Some(exchange)) => {
                            let _ = tx.send(exchange).await;
                        }
                        Ok(None) => {}
                        Err(e) => {
                            fatal.lock().get_or_insert(e);
                        }
                    }
                });
            }
        }
        drop(tx);

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "Injection task failed");
            }
        }

        let failure = fatal.lock().take();
        match failure {
            Some(e) => {
                tracing::error!(error = %e, "Injection aborted");
                Err(e)
            }
            None => {
                tracing::info!("Injection finished");
                Ok(())
            }
        }
    }

    async fn exchange(
        &self,
        point: &InputPoint,
        vector: &Vector,
    ) -> Result<Option<Exchange>, SessionError> {
        let Some(request) = self.graph.request_for(point, &vector.payload) else {
            tracing::warn!(point = %point, "Input point has no request shape");
            return Ok(None);
        };

        if self.config.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.delay_ms)).await;
        }

        let snapshot = self.session.send(&request).await?;
        tracing::debug!(
            point = %point,
            category = %vector.category,
            status = snapshot.status,
            elapsed_ms = snapshot.elapsed_ms,
            "Injected"
        );

        Ok(Some(Exchange {
            point: point.clone(),
            vector: vector.clone(),
            snapshot,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{CrawlContext, CrawlLimits, Crawler};
    use crate::http::{HttpMethod, Request};
    use crate::scope::Scope;
    use crate::testing::{dvwa_site, html, page, session_for, ScriptedProvider};
    use url::Url;

    fn vectors() -> VectorSet {
        VectorSet::from_lines(
            &["<script>x</script>", "' OR 1=1 --", "1 AND sleep(1)"],
            &["<".to_string(), ">".to_string()],
        )
    }

    async fn setup(provider: Arc<ScriptedProvider>, max_concurrent: usize) -> Arc<Injector> {
        let session = session_for(provider).await;
        let seed = Url::parse("http://target.test/").unwrap();
        let scope = Arc::new(Scope::from_url(&seed, &["logout".to_string()]).unwrap());
        let crawler = Crawler::new(session.clone(), scope, CrawlLimits::default());
        let pages = crawler
            .crawl(&seed, &mut CrawlContext::new(), &Cancellation::new())
            .await
            .unwrap();

        let graph = Arc::new(InputGraph::build(pages, Vec::new()));
        let config = InjectionConfig {
            max_concurrent,
            ..InjectionConfig::default()
        };
        Arc::new(Injector::new(graph, Arc::new(vectors()), session, config))
    }

    async fn collect(injector: Arc<Injector>, cancel: Cancellation) -> (Vec<Exchange>, Result<(), SessionError>) {
        let (mut rx, handle) = injector.inject(cancel);
        let mut exchanges = Vec::new();
        while let Some(exchange) = rx.recv().await {
            exchanges.push(exchange);
        }
        (exchanges, handle.await.unwrap())
    }

    #[tokio::test]
    async fn test_every_pair_is_injected_once() {
        let injector = setup(Arc::new(dvwa_site()), 8).await;
        let planned = injector.planned();
        assert!(planned > 0);

        let (exchanges, result) = collect(injector, Cancellation::new()).await;
        assert!(result.is_ok());
        assert_eq!(exchanges.len(), planned);

        let mut pairs: Vec<(String, String)> = exchanges
            .iter()
            .map(|e| (e.point.label(), e.vector.payload.clone()))
            .collect();
        pairs.sort();
        pairs.dedup();
        assert_eq!(pairs.len(), planned);
    }

    #[tokio::test]
    async fn test_other_fields_keep_defaults() {
        let injector = setup(Arc::new(dvwa_site()), 8).await;
        let (exchanges, _) = collect(injector, Cancellation::new()).await;

        for exchange in exchanges.iter().filter(|e| e.point.field_name() == "id") {
            let request = &exchange.snapshot.request;
            assert_eq!(request.field("id").as_deref(), Some(exchange.vector.payload.as_str()));
            assert_eq!(request.field("Submit").as_deref(), Some("Submit"));
            assert_eq!(request.field("user_token").as_deref(), Some("d41d8cd98f"));
        }
    }

    #[tokio::test]
    async fn test_file_controls_upload_the_vector() {
        let upload_form = r#"<form enctype="multipart/form-data" action="/upload/" method="POST">
            <input type="hidden" name="MAX_FILE_SIZE" value="100000">
            <input name="uploaded" type="file">
            <input type="submit" name="Upload" value="Upload"></form>"#;
        let provider = Arc::new(
            ScriptedProvider::new()
                .route("/", page(r#"<a href="/upload/">Upload</a>"#))
                .route(
                    "/upload/",
                    Arc::new(move |req: &Request| match req.file("uploaded") {
                        Some(content) => html(req, 200, &format!("{} successfully uploaded!", content), 5),
                        None => html(req, 200, upload_form, 5),
                    }),
                ),
        );
        let injector = setup(provider.clone(), 4).await;
        let (exchanges, result) = collect(injector, Cancellation::new()).await;
        assert!(result.is_ok());

        let uploads: Vec<&Exchange> = exchanges
            .iter()
            .filter(|e| e.point.field_name() == "uploaded")
            .collect();
        assert_eq!(uploads.len(), 3);
        for exchange in uploads {
            let request = &exchange.snapshot.request;
            assert_eq!(request.method, HttpMethod::Post);
            assert!(request.is_multipart());
            assert_eq!(request.file("uploaded"), Some(exchange.vector.payload.as_str()));
            assert_eq!(request.field("MAX_FILE_SIZE").as_deref(), Some("100000"));
            assert!(exchange.snapshot.body.contains(&exchange.vector.payload));
        }
    }

    #[tokio::test]
    async fn test_mutating_forms_are_serialized() {
        let provider = Arc::new(dvwa_site());
        let injector = setup(provider.clone(), 8).await;
        let (exchanges, _) = collect(injector, Cancellation::new()).await;

        assert!(exchanges.iter().any(|e| e.point.field_name() == "mtxMessage"));
        assert_eq!(provider.max_in_flight("/vulnerabilities/xss_s/"), 1);
        assert!(provider.max_in_flight("/vulnerabilities/sqli/") > 1);
    }

    #[tokio::test]
    async fn test_inject_point_is_restartable() {
        let injector = setup(Arc::new(dvwa_site()), 4).await;
        let point = injector.graph.points()[0].clone();

        let first = injector.inject_point(&point).await.unwrap();
        let second = injector.inject_point(&point).await.unwrap();

        let payloads = |xs: &[Exchange]| xs.iter().map(|e| e.vector.payload.clone()).collect::<Vec<_>>();
        assert_eq!(first.len(), 3);
        assert_eq!(payloads(&first), payloads(&second));
    }

    #[tokio::test]
    async fn test_transport_failures_become_sentinels() {
        let provider = Arc::new(dvwa_site());
        let injector = setup(provider.clone(), 4).await;
        provider.fail_next(
            "/about.php",
            100,
            crate::error::TransportError::Request("refused".into()),
        );

        let (exchanges, result) = collect(injector, Cancellation::new()).await;
        assert!(result.is_ok());
        let failed: Vec<&Exchange> = exchanges
            .iter()
            .filter(|e| e.snapshot.is_transport_failure())
            .collect();
        assert_eq!(failed.len(), 3);
        assert!(failed.iter().all(|e| e.point.field_name() == "lang"));
    }

    #[tokio::test]
    async fn test_failed_reauthentication_aborts() {
        let provider = Arc::new(dvwa_site());
        let injector = setup(provider.clone(), 4).await;
        provider.expire_session();
        provider.reject_logins();

        let (_, result) = collect(injector, Cancellation::new()).await;
        assert!(matches!(result, Err(SessionError::AuthenticationFailed(_))));
    }

    #[tokio::test]
    async fn test_cancellation_stops_injection() {
        let injector = setup(Arc::new(dvwa_site()), 4).await;
        let planned = injector.planned();
        let cancel = Cancellation::new();
        cancel.cancel();

        let (exchanges, result) = collect(injector, cancel).await;
        assert!(result.is_ok());
        assert!(exchanges.len() < planned);
    }
}
