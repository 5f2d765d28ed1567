//! Bundled session providers

use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

use super::{SessionCapability, SessionProvider};
use crate::app::HttpConfig;
use crate::discovery::guesser::probe_base;
use crate::discovery::{Form, ParsedDocument};
use crate::error::{SessionError, SurfacerError, TransportError};
use crate::http::{HttpClient, Request, ResponseSnapshot};

/// Anonymous provider backed by reqwest and its cookie jar
pub struct HttpSessionProvider {
    client: HttpClient,
    base: Url,
}

impl HttpSessionProvider {
    pub fn new(base: Url, config: &HttpConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: HttpClient::new(config)?,
            base,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    async fn fetch(&self, request: &Request) -> Result<ResponseSnapshot, SessionError> {
        self.client
            .send(request, &[])
            .await
            .map_err(|e| SessionError::AuthenticationFailed(format!("{}: {}", request.url, e)))
    }

    fn capability(&self) -> SessionCapability {
        SessionCapability {
            headers: Vec::new(),
            cookies: self.client.cookie_names(&self.base),
        }
    }
}

#[async_trait]
impl SessionProvider for HttpSessionProvider {
    fn name(&self) -> &str {
        "anonymous"
    }

    async fn authenticate(&self) -> Result<SessionCapability, SessionError> {
        // Touch the target once so any session cookie lands in the jar
        let snapshot = self.fetch(&Request::get(self.base.as_str())).await?;
        tracing::debug!(status = snapshot.status, "Target reachable");
        Ok(self.capability())
    }

    async fn request(
        &self,
        capability: &SessionCapability,
        request: &Request,
    ) -> Result<ResponseSnapshot, TransportError> {
        self.client.send(request, &capability.headers).await
    }
}

/// Logs into a Damn Vulnerable Web Application instance.
///
/// Resets the database through `setup.php`, logs in with the login form's
/// anti-CSRF token and drops the security level to `low`.
pub struct DvwaSessionProvider {
    http: HttpSessionProvider,
    username: String,
    password: String,
}

impl DvwaSessionProvider {
    pub fn new(base: Url, config: &HttpConfig) -> anyhow::Result<Self> {
        Ok(Self {
            http: HttpSessionProvider::new(base, config)?,
            username: "admin".to_string(),
            password: "password".to_string(),
        })
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = username.to_string();
        self.password = password.to_string();
        self
    }

    /// `http://t/dvwa` and `http://t/dvwa/` both resolve under `/dvwa/`
    fn page_url(&self, path: &str) -> Result<Url, SessionError> {
        probe_base(self.http.base())
            .join(path)
            .map_err(|e| SessionError::AuthenticationFailed(format!("bad URL for {}: {}", path, e)))
    }

    /// Fetch a page and return its first form, if any
    async fn first_form(&self, url: &Url) -> Result<Option<(Form, ResponseSnapshot)>, SessionError> {
        let snapshot = self.http.fetch(&Request::get(url.as_str())).await?;
        if !snapshot.is_success() {
            return Ok(None);
        }
        let document = ParsedDocument::parse(&snapshot.body, url);
        Ok(document.forms.into_iter().next().map(|form| (form, snapshot)))
    }

    /// Submit a form with its defaults, overriding the given fields
    async fn submit(&self, form: &Form, overrides: &[(&str, &str)]) -> Result<ResponseSnapshot, SessionError> {
        let mut fields = form.defaults();
        for (name, value) in overrides {
            match fields.iter_mut().find(|(k, _)| k == name) {
                Some(slot) => slot.1 = value.to_string(),
                None => fields.push((name.to_string(), value.to_string())),
            }
        }
        self.http.fetch(&form.submission(fields)).await
    }

    async fn reset_database(&self) -> Result<(), SessionError> {
        let url = self.page_url("setup.php")?;
        match self.first_form(&url).await? {
            Some((form, _)) => {
                self.submit(&form, &[]).await?;
                tracing::info!("DVWA database reset");
            }
            None => tracing::warn!("DVWA setup page has no form, skipping database reset"),
        }
        Ok(())
    }

    async fn login(&self) -> Result<(), SessionError> {
        let url = self.page_url("login.php")?;
        let (form, _) = self
            .first_form(&url)
            .await?
            .ok_or_else(|| SessionError::AuthenticationFailed("login form not found".into()))?;

        let response = self
            .submit(
                &form,
                &[
                    ("username", self.username.as_str()),
                    ("password", self.password.as_str()),
                    ("Login", "Login"),
                ],
            )
            .await?;

        if response.final_url.contains("login.php") {
            return Err(SessionError::AuthenticationFailed(format!(
                "login rejected for user {}",
                self.username
            )));
        }
        Ok(())
    }

    async fn lower_security(&self) -> Result<(), SessionError> {
        let url = self.page_url("security.php")?;
        let (form, _) = self
            .first_form(&url)
            .await?
            .ok_or_else(|| SessionError::AuthenticationFailed("security form not found".into()))?;
        self.submit(&form, &[("security", "low"), ("seclev_submit", "Submit")])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionProvider for DvwaSessionProvider {
    fn name(&self) -> &str {
        "dvwa"
    }

    async fn authenticate(&self) -> Result<SessionCapability, SessionError> {
        self.reset_database().await?;
        self.login().await?;
        self.lower_security().await?;

        let capability = self.http.capability();
        tracing::info!(cookies = ?capability.cookies, "DVWA session established");
        Ok(capability)
    }

    async fn request(
        &self,
        capability: &SessionCapability,
        request: &Request,
    ) -> Result<ResponseSnapshot, TransportError> {
        self.http.request(capability, request).await
    }
}

/// Resolve a `--custom-auth` name to a provider
pub fn provider_for(
    name: Option<&str>,
    base: &Url,
    config: &HttpConfig,
) -> Result<Arc<dyn SessionProvider>, SurfacerError> {
    let build_error = |e: anyhow::Error| SurfacerError::InvalidTarget(format!("{:#}", e));

    match name.map(|n| n.to_ascii_lowercase()) {
        None => Ok(Arc::new(
            HttpSessionProvider::new(base.clone(), config).map_err(build_error)?,
        )),
        Some(n) if n == "dvwa" => Ok(Arc::new(
            DvwaSessionProvider::new(base.clone(), config).map_err(build_error)?,
        )),
        Some(other) => Err(SessionError::UnknownProvider(other).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("http://127.0.0.1:9/").unwrap()
    }

    #[test]
    fn test_provider_lookup() {
        let config = HttpConfig::default();

        let anon = provider_for(None, &base(), &config).unwrap();
        assert_eq!(anon.name(), "anonymous");

        let dvwa = provider_for(Some("DVWA"), &base(), &config).unwrap();
        assert_eq!(dvwa.name(), "dvwa");

        let unknown = provider_for(Some("wordpress"), &base(), &config);
        assert!(matches!(
            unknown,
            Err(SurfacerError::Session(SessionError::UnknownProvider(_)))
        ));
    }

    #[test]
    fn test_dvwa_page_urls_resolve_against_base() {
        for base in [
            "http://target.test/dvwa/",
            "http://target.test/dvwa",
            "http://target.test/dvwa/index.php",
        ] {
            let provider =
                DvwaSessionProvider::new(Url::parse(base).unwrap(), &HttpConfig::default()).unwrap();
            assert_eq!(
                provider.page_url("login.php").unwrap().as_str(),
                "http://target.test/dvwa/login.php",
                "base {}",
                base
            );
            assert_eq!(
                provider.page_url("setup.php").unwrap().as_str(),
                "http://target.test/dvwa/setup.php"
            );
        }
    }
}
