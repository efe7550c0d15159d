//! Login exchange and credential state.
//!
//! [`AuthenticationService`] performs the two-step sign-in once and then
//! serves the resulting cookies and CSRF token to the transport.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use parking_lot::RwLock;
use regex::Regex;
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::{Response, StatusCode, redirect};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::transport::endpoint::normalize_base_url;

use super::SessionCredentials;
use super::cookies::CookieJar;

// ============================================================================
// Constants
// ============================================================================

/// Hidden form field carrying the antiforgery request token.
const VERIFICATION_TOKEN_FIELD: &str = "__RequestVerificationToken";

/// Fragment identifying the antiforgery cookie.
const ANTIFORGERY_COOKIE_FRAGMENT: &str = "Antiforgery";

/// Prefix of a data-protected antiforgery token.
const CSRF_TOKEN_PREFIX: &str = "CfDJ8";

/// Timeout for each HTTP leg of the login.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

static INPUT_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<input\b[^>]*>").unwrap_or_else(|e| panic!("input pattern: {e}"))
});

static NAME_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bname\s*=\s*["']__RequestVerificationToken["']"#)
        .unwrap_or_else(|e| panic!("name pattern: {e}"))
});

static VALUE_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bvalue\s*=\s*["']([^"']*)["']"#)
        .unwrap_or_else(|e| panic!("value pattern: {e}"))
});

// ============================================================================
// Types
// ============================================================================

/// Password holder whose `Debug` output is redacted.
#[derive(Clone)]
struct Password(String);

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Mutable credential state.
#[derive(Debug, Default)]
struct CredentialState {
    cookies: CookieJar,
    csrf_token: Option<String>,
    authenticated: bool,
}

// ============================================================================
// AuthenticationService
// ============================================================================

/// Performs the web login and holds the session credentials.
///
/// # Example
///
/// ```no_run
/// # use webform_client::auth::AuthenticationService;
/// # async fn example() -> webform_client::Result<()> {
/// let auth = AuthenticationService::new("https://erp.example.com/BC/", "default", "admin", "secret")?;
/// auth.authenticate_web().await?;
/// assert!(auth.is_authenticated());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct AuthenticationService {
    /// HTTP client with redirects disabled.
    http: reqwest::Client,
    /// Base URL without trailing slash.
    base_url: String,
    /// Tenant id.
    tenant: String,
    /// Login name.
    username: String,
    /// Login password.
    password: Password,
    /// Cookies, token and flag.
    state: RwLock<CredentialState>,
}

impl AuthenticationService {
    /// Creates a service. No request is made until
    /// [`AuthenticationService::authenticate_web`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be built.
    pub fn new(
        base_url: impl AsRef<str>,
        tenant: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(HTTP_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: normalize_base_url(base_url.as_ref()),
            tenant: tenant.into(),
            username: username.into(),
            password: Password(password.into()),
            state: RwLock::new(CredentialState::default()),
        })
    }

    /// Returns the normalized base URL.
    #[inline]
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the tenant id.
    #[inline]
    #[must_use]
    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Returns `true` once a login succeeded.
    #[inline]
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state.read().authenticated
    }

    /// Returns session cookies as `name=value` strings.
    #[must_use]
    pub fn session_cookies(&self) -> Vec<String> {
        self.state.read().cookies.entries()
    }

    /// Returns the CSRF token, if the server issued one.
    #[must_use]
    pub fn csrf_token(&self) -> Option<String> {
        self.state.read().csrf_token.clone()
    }

    /// Returns the `Cookie` header value.
    #[must_use]
    pub fn cookie_header(&self) -> Option<String> {
        self.state.read().cookies.header()
    }

    /// Runs the sign-in exchange.
    ///
    /// Credentials are replaced only once the login succeeds. On failure the
    /// previous state stays in place, apart from cookies set by the sign-in
    /// page, which are merged into the existing jar.
    ///
    /// # Errors
    ///
    /// - [`Error::Authentication`] if the verification token is missing or
    ///   the login is not answered with a 302
    /// - [`Error::Http`] on transport failure
    pub async fn authenticate_web(&self) -> Result<()> {
        let mut cookies = self.state.read().cookies.clone();

        let csrf_token = match self.sign_in(&mut cookies).await {
            Ok(csrf_token) => csrf_token,
            Err(e) => {
                self.state.write().cookies = cookies;
                return Err(e);
            }
        };

        let count = cookies.len();
        let has_csrf = csrf_token.is_some();
        *self.state.write() = CredentialState {
            cookies,
            csrf_token,
            authenticated: true,
        };

        info!(tenant = %self.tenant, cookies = count, csrf = has_csrf, "Login succeeded");
        Ok(())
    }

    /// GET then POST the sign-in form, collecting cookies into `cookies`.
    ///
    /// Returns the CSRF token found among the cookies.
    async fn sign_in(&self, cookies: &mut CookieJar) -> Result<Option<String>> {
        let url = self.sign_in_url();
        debug!(url = %url, "Fetching sign-in page");

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        merge_cookies(cookies, &response);
        let body = response.text().await?;

        let token = extract_verification_token(&body).ok_or_else(|| {
            Error::authentication(format!(
                "sign-in page (status {}) has no {VERIFICATION_TOKEN_FIELD}",
                status.as_u16()
            ))
        })?;

        let mut request = self.http.post(&url).form(&[
            ("username", self.username.as_str()),
            ("password", self.password.0.as_str()),
            ("tenant", self.tenant.as_str()),
            (VERIFICATION_TOKEN_FIELD, token.as_str()),
        ]);
        if let Some(header) = cookies.header() {
            request = request.header(COOKIE, header);
        }

        debug!(url = %url, user = %self.username, "Submitting credentials");
        let response = request.send().await?;
        let status = response.status();

        if status != StatusCode::FOUND {
            warn!(status = status.as_u16(), "Login rejected");
            return Err(Error::authentication(format!(
                "login returned status {}, expected 302",
                status.as_u16()
            )));
        }

        merge_cookies(cookies, &response);
        Ok(cookies
            .find_containing(ANTIFORGERY_COOKIE_FRAGMENT)
            .map(|(_, value)| value)
            .filter(|value| value.starts_with(CSRF_TOKEN_PREFIX))
            .map(str::to_string))
    }

    fn sign_in_url(&self) -> String {
        format!(
            "{}/SignIn?tenant={}",
            self.base_url,
            urlencoding::encode(&self.tenant)
        )
    }
}

fn merge_cookies(cookies: &mut CookieJar, response: &Response) {
    for header in response.headers().get_all(SET_COOKIE) {
        match header.to_str() {
            Ok(value) => {
                if !cookies.merge_set_cookie(value) {
                    debug!("Skipping malformed Set-Cookie header");
                }
            }
            Err(_) => debug!("Skipping non-ASCII Set-Cookie header"),
        }
    }
}

impl SessionCredentials for AuthenticationService {
    fn is_authenticated(&self) -> bool {
        AuthenticationService::is_authenticated(self)
    }

    fn cookie_header(&self) -> Option<String> {
        AuthenticationService::cookie_header(self)
    }

    fn csrf_token(&self) -> Option<String> {
        AuthenticationService::csrf_token(self)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Finds a non-empty `__RequestVerificationToken` hidden input value.
fn extract_verification_token(html: &str) -> Option<String> {
    INPUT_TAG
        .find_iter(html)
        .map(|tag| tag.as_str())
        .filter(|tag| NAME_ATTR.is_match(tag))
        .find_map(|tag| VALUE_ATTR.captures(tag))
        .and_then(|captures| captures.get(1))
        .map(|value| value.as_str().to_string())
        .filter(|value| !value.is_empty())
}

// ============================================================================
// Tests
// ============================================================================
