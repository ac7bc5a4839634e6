//! Authenticated portal sessions.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use crate::config::PortalConfig;
use crate::portal::html;
use crate::portal::PortalError;
use crate::sanitize;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A fetched portal page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Final URL after redirects.
    pub url: String,
    pub body: String,
}

/// Opens sessions against the portal. One session per job.
#[async_trait]
pub trait PortalConnector: Send + Sync {
    /// Logs in and returns a session holding the login state.
    async fn authenticate(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<Box<dyn PortalSession>, PortalError>;
}

/// One logged-in connection. Not reentrant: every call takes `&mut self`.
#[async_trait]
pub trait PortalSession: Send {
    /// Fetches a page relative to the portal base URL.
    async fn fetch_page(&mut self, path: &str, query: &[(&str, &str)])
        -> Result<Page, PortalError>;

    /// Ends the session. Failures are logged, never returned.
    async fn close(&mut self);
}

/// Drives the portal's HTML login form over a cookie-carrying HTTP client.
pub struct HttpPortal {
    base_url: Url,
    login_path: String,
    logout_path: Option<String>,
    user_agent: String,
    request_timeout: Duration,
}

impl HttpPortal {
    pub fn new(config: &PortalConfig) -> Result<Self, PortalError> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            PortalError::Navigation(format!("invalid portal URL '{}': {}", config.base_url, e))
        })?;

        Ok(Self {
            base_url,
            login_path: config.login_path.clone(),
            logout_path: config.logout_path.clone(),
            user_agent: config.user_agent.clone(),
            request_timeout: config.request_timeout(),
        })
    }

    /// Each session gets its own client so cookies never leak between jobs.
    fn build_client(&self) -> Result<Client, PortalError> {
        Client::builder()
            .cookie_store(true)
            .user_agent(self.user_agent.clone())
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| PortalError::Navigation(format!("failed to build HTTP client: {}", e)))
    }
}

#[async_trait]
impl PortalConnector for HttpPortal {
    async fn authenticate(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<Box<dyn PortalSession>, PortalError> {
        let client = self.build_client()?;
        let login_url = join(&self.base_url, &self.login_path)?;

        let response = client.get(login_url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(PortalError::Navigation(format!(
                "login page returned HTTP {}",
                response.status()
            )));
        }
        let login_page = response.text().await?;

        let form = html::parse_login_form(&login_page, &login_url)?;
        let mut fields = form.fields.clone();
        fields.push((form.username_field.clone(), username.trim().to_string()));
        fields.push((
            form.password_field.clone(),
            password.expose_secret().to_string(),
        ));

        let response = client.post(form.action.clone()).form(&fields).send().await?;
        let landed = response.url().to_string();
        if !response.status().is_success() {
            return Err(PortalError::Navigation(format!(
                "login submission returned HTTP {}",
                response.status()
            )));
        }

        if html::is_login_url(&landed) {
            return Err(PortalError::Authentication(
                "portal rejected the credentials".to_string(),
            ));
        }

        debug!(
            user = %sanitize::redact_username(username),
            landed = %sanitize::redact_url(&landed),
            "Portal login succeeded"
        );

        Ok(Box::new(HttpSession {
            client,
            base_url: self.base_url.clone(),
            logout_path: self.logout_path.clone(),
        }))
    }
}

struct HttpSession {
    client: Client,
    base_url: Url,
    logout_path: Option<String>,
}

#[async_trait]
impl PortalSession for HttpSession {
    async fn fetch_page(
        &mut self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Page, PortalError> {
        let url = join(&self.base_url, path)?;
        let response = self.client.get(url).query(query).send().await?;

        let status = response.status();
        let landed = response.url().to_string();
        if !status.is_success() {
            return Err(PortalError::Navigation(format!(
                "{} returned HTTP {}",
                path, status
            )));
        }
        if html::is_login_url(&landed) {
            return Err(PortalError::Navigation(format!(
                "session expired while opening {}",
                path
            )));
        }

        let body = response.text().await?;
        Ok(Page { url: landed, body })
    }

    async fn close(&mut self) {
        let Some(path) = self.logout_path.as_deref() else {
            return;
        };
        let url = match join(&self.base_url, path) {
            Ok(url) => url,
            Err(e) => {
                warn!("Skipping logout: {}", e);
                return;
            }
        };
        if let Err(e) = self.client.get(url).send().await {
            warn!("Logout request failed: {}", e.without_url());
        }
    }
}

fn join(base: &Url, path: &str) -> Result<Url, PortalError> {
    base.join(path)
        .map_err(|e| PortalError::Navigation(format!("invalid portal path '{}': {}", path, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_portal_rejects_bad_base_url() {
        let config = PortalConfig {
            base_url: "::not-a-url".to_string(),
            ..PortalConfig::default()
        };
        assert!(matches!(
            HttpPortal::new(&config),
            Err(PortalError::Navigation(_))
        ));
    }

    #[test]
    fn test_join_relative_paths() {
        let base = Url::parse("http://103.203.175.90:94").unwrap();
        assert_eq!(
            join(&base, "/attendance/attendanceLogin.php").unwrap().as_str(),
            "http://103.203.175.90:94/attendance/attendanceLogin.php"
        );
    }

    #[test]
    fn test_build_client() {
        let portal = HttpPortal::new(&PortalConfig::default()).unwrap();
        assert!(portal.build_client().is_ok());
    }
}
