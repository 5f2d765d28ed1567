//! In-memory session provider and a small scripted target for unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{SessionError, TransportError};
use crate::http::{HttpMethod, Request, ResponseSnapshot};
use crate::session::{RetryPolicy, Session, SessionCapability, SessionProvider};

pub(crate) type Handler = Arc<dyn Fn(&Request) -> ResponseSnapshot + Send + Sync>;

pub(crate) const ORIGIN: &str = "http://target.test";
pub(crate) const CARD: &str = "4111-1111-1111-1111";

/// HTML response with the given status and latency
pub(crate) fn html(request: &Request, status: u16, body: &str, elapsed_ms: u64) -> ResponseSnapshot {
    ResponseSnapshot::new(request.clone(), status, body, Duration::from_millis(elapsed_ms))
        .with_header("Content-Type", "text/html; charset=utf-8")
}

/// Handler that always serves `body`
pub(crate) fn page(body: &str) -> Handler {
    let body = body.to_string();
    Arc::new(move |req: &Request| html(req, 200, &body, 5))
}

pub(crate) fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn path_of(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string())
}

/// Scripted provider: routes by path, everything else is a soft 404 that
/// echoes the requested path with status 200
pub(crate) struct ScriptedProvider {
    routes: HashMap<String, Handler>,
    fallback: Option<Handler>,
    log: Mutex<Vec<Request>>,
    failures: Mutex<HashMap<String, (usize, TransportError)>>,
    /// Per path: (currently in flight, highest seen)
    in_flight: Mutex<HashMap<String, (usize, usize)>>,
    auth_calls: AtomicUsize,
    valid: Arc<AtomicBool>,
    reject_logins: AtomicBool,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            fallback: None,
            log: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            auth_calls: AtomicUsize::new(0),
            valid: Arc::new(AtomicBool::new(false)),
            reject_logins: AtomicBool::new(false),
        }
    }

    pub fn route(mut self, path: &str, handler: Handler) -> Self {
        self.routes.insert(path.to_string(), handler);
        self
    }

    /// Serve unrouted paths with `handler` instead of the soft 404
    pub fn fallback(mut self, handler: Handler) -> Self {
        self.fallback = Some(handler);
        self
    }

    /// Fail the next `times` requests to `path` with `error`
    pub fn fail_next(&self, path: &str, times: usize, error: TransportError) {
        self.failures.lock().insert(path.to_string(), (times, error));
    }

    /// Invalidate the current session; requests bounce to the login page
    pub fn expire_session(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }

    pub fn reject_logins(&self) {
        self.reject_logins.store(true, Ordering::SeqCst);
    }

    pub fn auth_calls(&self) -> usize {
        self.auth_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Request> {
        self.log.lock().clone()
    }

    pub fn requests_to(&self, path: &str) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|r| path_of(&r.url) == path)
            .count()
    }

    /// Highest number of concurrent requests seen for `path`
    pub fn max_in_flight(&self, path: &str) -> usize {
        self.in_flight.lock().get(path).map(|(_, max)| *max).unwrap_or(0)
    }

    fn soft_404(request: &Request) -> ResponseSnapshot {
        let body = format!(
            "<html><head><title>Oops</title></head><body><p>The page {} was not found on this server.</p></body></html>",
            escape(&path_of(&request.url))
        );
        html(request, 200, &body, 3)
    }
}

#[async_trait]
impl SessionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn authenticate(&self) -> Result<SessionCapability, SessionError> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_logins.load(Ordering::SeqCst) {
            return Err(SessionError::AuthenticationFailed("bad credentials".into()));
        }
        // Widen the window in which concurrent workers could race a refresh
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.valid.store(true, Ordering::SeqCst);

        Ok(SessionCapability {
            headers: Vec::new(),
            cookies: vec!["PHPSESSID".to_string(), "security".to_string()],
        })
    }

    async fn request(
        &self,
        _capability: &SessionCapability,
        request: &Request,
    ) -> Result<ResponseSnapshot, TransportError> {
        self.log.lock().push(request.clone());
        let path = path_of(&request.url);

        {
            let mut failures = self.failures.lock();
            if let Some((remaining, error)) = failures.get_mut(&path) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(error.clone());
                }
            }
        }

        {
            let mut in_flight = self.in_flight.lock();
            let entry = in_flight.entry(path.clone()).or_insert((0, 0));
            entry.0 += 1;
            entry.1 = entry.1.max(entry.0);
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
        if let Some(entry) = self.in_flight.lock().get_mut(&path) {
            entry.0 -= 1;
        }

        if !self.valid.load(Ordering::SeqCst) {
            return Ok(html(request, 200, "<form action=\"login.php\"></form>", 1)
                .with_final_url(&format!("{}/login.php", ORIGIN)));
        }

        Ok(match self.routes.get(&path).or(self.fallback.as_ref()) {
            Some(handler) => handler(request),
            None => Self::soft_404(request),
        })
    }
}

/// Session over `provider` with fast retries
pub(crate) async fn session_for(provider: Arc<ScriptedProvider>) -> Arc<Session> {
    let retry = RetryPolicy {
        max_retries: 2,
        backoff: Duration::from_millis(1),
    };
    Arc::new(
        Session::establish(provider, retry)
            .await
            .expect("scripted login"),
    )
}

/// A small DVWA-like target
///
/// - `/` links to the vulnerable pages, an external site and logout
/// - `/vulnerabilities/sqli/` GET form echoing `id` raw; a quote gives a 500
///   and a `sleep(` payload takes 900 ms
/// - `/vulnerabilities/xss_s/` POST guestbook that encodes `<` but not `>`
/// - `/about.php?lang=` escapes its input fully
/// - `/instructions.php` has no inputs and leaks a card number
/// - `/admin.php` is only reachable by guessing
pub(crate) fn dvwa_site() -> ScriptedProvider {
    let valid = Arc::new(AtomicBool::new(false));

    let mut provider = ScriptedProvider::new()
        .route(
            "/",
            page(
                r#"<html><head><title>Welcome</title></head><body>
                <a href="/vulnerabilities/sqli/">SQL Injection</a>
                <a href="vulnerabilities/xss_s/">XSS (Stored)</a>
                <a href="/about.php?lang=en">About</a>
                <a href="/about.php?lang=fr">A propos</a>
                <a href="/instructions.php">Instructions</a>
                <a href="/api/status.json">Status</a>
                <a href="http://www.dvwa.co.uk/">DVWA</a>
                <a href="/logout.php">Logout</a>
                <a href="/index.php?phpids=on">Enable IDS</a>
                </body></html>"#,
            ),
        )
        .route(
            "/vulnerabilities/sqli/",
            Arc::new(|req: &Request| {
                let form = r##"<form action="#" method="GET">
                    <input type="text" name="id"><input type="submit" name="Submit" value="Submit">
                    <input type="hidden" name="user_token" value="d41d8cd98f">
                    </form><a href="/vulnerabilities/sqli/">again</a><a href="/">home</a>"##;
                match req.field("id") {
                    None => html(req, 200, &format!("<title>SQLi</title>{}", form), 5),
                    Some(id) if id.contains('\'') => html(
                        req,
                        500,
                        "You have an error in your SQL syntax",
                        5,
                    ),
                    Some(id) => {
                        let elapsed = if id.contains("sleep(") { 900 } else { 5 };
                        html(req, 200, &format!("{}<pre>ID: {}</pre>", form, id), elapsed)
                    }
                }
            }),
        )
        .route(
            "/vulnerabilities/xss_s/",
            Arc::new(|req: &Request| {
                let form = r#"<form method="post" name="guestform">
                    <input name="txtName" type="text"><textarea name="mtxMessage"></textarea>
                    <input name="btnSign" type="submit" value="Sign Guestbook"></form>"#;
                if req.method != HttpMethod::Post {
                    return html(req, 200, form, 5);
                }
                let name = escape(&req.field("txtName").unwrap_or_default());
                let message = req
                    .field("mtxMessage")
                    .unwrap_or_default()
                    .replace('<', "&lt;");
                html(
                    req,
                    200,
                    &format!("{}<div>Name: {}<br>Message: {}</div>", form, name, message),
                    5,
                )
            }),
        )
        .route(
            "/about.php",
            Arc::new(|req: &Request| {
                let lang = escape(&req.field("lang").unwrap_or_default());
                html(req, 200, &format!("<p>Language: {}</p><a href=\"/\">home</a>", lang), 5)
            }),
        )
        .route(
            "/instructions.php",
            page(&format!("<h1>Instructions</h1><p>Test card: {}</p>", CARD)),
        )
        .route(
            "/api/status.json",
            Arc::new(|req: &Request| {
                ResponseSnapshot::new(req.clone(), 200, "{\"status\":\"ok\"}", Duration::from_millis(2))
                    .with_header("Content-Type", "application/json")
            }),
        )
        .route(
            "/admin.php",
            page(
                r##"<title>Admin</title><form action="#" method="POST">
                <input name="user"><input type="submit" value="Go" name="go"></form>
                <a href="/admin/users.php">Users</a>"##,
            ),
        )
        .route(
            "/admin/users.php",
            page(r#"<a href="/admin/users_detail.php">Details</a>"#),
        )
        .route("/admin/users_detail.php", page("<p>details</p>"));

    // Hitting logout kills the session
    let logout_valid = valid.clone();
    provider = provider.route(
        "/logout.php",
        Arc::new(move |req: &Request| {
            logout_valid.store(false, Ordering::SeqCst);
            html(req, 200, "bye", 1)
        }),
    );
    provider.valid = valid;
    provider
}
