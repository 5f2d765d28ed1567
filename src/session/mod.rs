//! Session module
//!
//! The core never touches sockets or cookie storage. It talks to a
//! [`SessionProvider`] through a shared [`Session`], which adds the bounded
//! transport retry and the single-refresh re-authentication gate.

mod providers;

pub use providers::{provider_for, DvwaSessionProvider, HttpSessionProvider};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::{SessionError, TransportError};
use crate::http::{Request, ResponseSnapshot};

/// Authenticated request capability handed out by a provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionCapability {
    /// Headers attached to every request
    pub headers: Vec<(String, String)>,

    /// Names of the cookies the provider holds for the target
    pub cookies: Vec<String>,
}

/// Pluggable authentication and transport
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Short provider name for logs
    fn name(&self) -> &str;

    /// Establish (or re-establish) a session
    async fn authenticate(&self) -> Result<SessionCapability, SessionError>;

    /// Issue one raw request under the given capability
    async fn request(
        &self,
        capability: &SessionCapability,
        request: &Request,
    ) -> Result<ResponseSnapshot, TransportError>;

    /// Whether a response means the session is no longer valid.
    ///
    /// Defaults to HTTP 401 or a redirect that lands on a login page the
    /// request did not ask for.
    fn is_expired(&self, snapshot: &ResponseSnapshot) -> bool {
        if snapshot.status == 401 {
            return true;
        }
        snapshot.was_redirected()
            && snapshot.final_url.to_ascii_lowercase().contains("login")
            && !snapshot.request.url.to_ascii_lowercase().contains("login")
    }
}

/// Retry policy for transient transport failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_millis(250),
        }
    }
}

/// Shared, read-only session used by every worker
pub struct Session {
    provider: Arc<dyn SessionProvider>,

    /// Workers hold the read half while a request is in flight. A refresh
    /// takes the write half, so it waits for in-flight requests and blocks
    /// new ones until the new capability is in place.
    capability: RwLock<SessionCapability>,

    /// Bumped on every successful refresh
    generation: AtomicU64,

    refreshes: AtomicUsize,

    retry: RetryPolicy,
}

impl Session {
    /// Authenticate once and wrap the provider
    pub async fn establish(
        provider: Arc<dyn SessionProvider>,
        retry: RetryPolicy,
    ) -> Result<Self, SessionError> {
        tracing::info!(provider = provider.name(), "Authenticating");
        let capability = provider.authenticate().await?;

        Ok(Self {
            provider,
            capability: RwLock::new(capability),
            generation: AtomicU64::new(0),
            refreshes: AtomicUsize::new(0),
            retry,
        })
    }

    /// Send a request.
    ///
    /// Transport failures come back as sentinel snapshots. The only error is
    /// a failed re-authentication, which is fatal for the run.
    pub async fn send(&self, request: &Request) -> Result<ResponseSnapshot, SessionError> {
        let mut refreshed = false;

        loop {
            let (snapshot, generation) = {
                let capability = self.capability.read().await;
                let generation = self.generation.load(Ordering::SeqCst);
                (self.send_with_retry(&capability, request).await, generation)
            };

            if !refreshed && !snapshot.is_transport_failure() && self.provider.is_expired(&snapshot) {
                let expired = SessionError::Expired {
                    status: snapshot.status,
                };
                tracing::debug!(url = %request.url, reason = %expired, "Refreshing session");
                self.refresh(generation).await?;
                refreshed = true;
                continue;
            }

            return Ok(snapshot);
        }
    }

    /// Current capability (cookies/headers)
    pub async fn capability(&self) -> SessionCapability {
        self.capability.read().await.clone()
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Number of refreshes performed so far
    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Re-authenticate unless another worker already did since `seen`
    async fn refresh(&self, seen: u64) -> Result<(), SessionError> {
        let mut capability = self.capability.write().await;

        if self.generation.load(Ordering::SeqCst) != seen {
            return Ok(());
        }

        tracing::warn!(provider = self.provider.name(), "Session expired, re-authenticating");
        *capability = self.provider.authenticate().await?;
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.refreshes.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }

    async fn send_with_retry(
        &self,
        capability: &SessionCapability,
        request: &Request,
    ) -> ResponseSnapshot {
        let start = Instant::now();
        let mut attempt = 0u32;

        loop {
            match self.provider.request(capability, request).await {
                Ok(snapshot) => return snapshot,
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    tracing::debug!(url = %request.url, attempt, error = %e, "Retrying request");
                    tokio::time::sleep(self.retry.backoff * attempt).await;
                }
                Err(e) => {
                    tracing::warn!(url = %request.url, error = %e, "Request failed");
                    return ResponseSnapshot::transport_failure(
                        request.clone(),
                        e.to_string(),
                        start.elapsed(),
                    );
                }
            }
        }
    }
}
