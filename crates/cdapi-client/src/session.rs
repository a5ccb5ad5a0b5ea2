//! Access token lifecycle
//!
//! The credential exchange answers with a redirect whose `Location` carries
//! the token fields in its fragment. That value is not a well-formed query
//! string, so the fields are pulled out by pattern match. Everything outside
//! this module only sees the token and its expiry.

use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use regex::Regex;
use reqwest::{header, redirect, Client};
use tracing::{debug, info, instrument};
use url::Url;

use crate::config::{AuthConfig, ClientConfig, Credentials};
use crate::error::{CdApiError, Result};
use crate::USER_AGENT;

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"access_token=(\w+).*?token_type=(\w+).*?expires_in=(\d+)").expect("valid regex")
});

/// Token fields extracted from a redirect location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: Duration,
}

/// Extract `access_token`, `token_type` and `expires_in` from a `Location` value
pub fn parse_token_location(location: &str) -> Result<TokenGrant> {
    let caps = TOKEN_RE.captures(location).ok_or_else(|| {
        CdApiError::AuthResponseMalformed(
            "redirect location lacks access_token/token_type/expires_in".into(),
        )
    })?;

    let expires_in: u64 = caps[3]
        .parse()
        .map_err(|_| CdApiError::AuthResponseMalformed(format!("bad expires_in {:?}", &caps[3])))?;

    Ok(TokenGrant {
        access_token: caps[1].to_string(),
        token_type: caps[2].to_string(),
        expires_in: Duration::from_secs(expires_in),
    })
}

/// A bearer token and the window it is good for
#[derive(Debug, Clone)]
pub struct Session {
    access_token: Option<String>,
    token_type: Option<String>,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl Session {
    /// Build a session from a grant received at `now`.
    ///
    /// Fails if the granted lifetime does not fit the calendar.
    pub fn from_grant(grant: TokenGrant, now: DateTime<Utc>) -> Result<Self> {
        let expires_at = chrono::Duration::from_std(grant.expires_in)
            .ok()
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| {
                CdApiError::AuthResponseMalformed(format!(
                    "expires_in of {}s is out of range",
                    grant.expires_in.as_secs()
                ))
            })?;
        let access_token = Some(grant.access_token).filter(|t| !t.is_empty());

        Ok(Self {
            access_token,
            token_type: Some(grant.token_type),
            issued_at: now,
            expires_at,
        })
    }

    /// Valid iff a non-empty token is present and `now < expires_at`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.access_token.is_some() && now < self.expires_at
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub fn token_type(&self) -> Option<&str> {
        self.token_type.as_deref()
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

/// Owns the current session and renews it through the credential exchange
#[derive(Debug)]
pub struct SessionManager {
    client: Client,
    auth_url: Url,
    auth: AuthConfig,
    credentials: Credentials,
    session: Option<Session>,
    renewals: u64,
}

impl SessionManager {
    /// Create a manager without a session; the first `ensure_valid` renews
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(USER_AGENT)
            .redirect(redirect::Policy::none())
            .build()?;

        let auth_url = Url::parse(&config.auth.url)?;

        Ok(Self {
            client,
            auth_url,
            auth: config.auth.clone(),
            credentials: config.credentials.clone(),
            session: None,
            renewals: 0,
        })
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Number of credential exchanges performed so far
    pub fn renewals(&self) -> u64 {
        self.renewals
    }

    /// Return a usable token, renewing first if the session is not valid
    pub async fn ensure_valid(&mut self) -> Result<String> {
        self.ensure_valid_at(Utc::now()).await
    }

    /// [`ensure_valid`](Self::ensure_valid) with an explicit clock reading
    pub async fn ensure_valid_at(&mut self, now: DateTime<Utc>) -> Result<String> {
        if let Some(token) = self.valid_token(now) {
            debug!(expires_at = %local_time(self.expiry()), "current credentials still valid");
            return Ok(token);
        }

        self.renew_at(now).await?;
        info!(expires_at = %local_time(self.expiry()), "new credentials obtained");

        self.valid_token(now)
            .ok_or_else(|| CdApiError::auth_failed(None, "no usable access token in response"))
    }

    /// Perform the credential exchange now
    pub async fn renew(&mut self) -> Result<()> {
        self.renew_at(Utc::now()).await
    }

    /// Perform the credential exchange, stamping the session with `now`
    #[instrument(skip(self, now))]
    pub async fn renew_at(&mut self, now: DateTime<Utc>) -> Result<()> {
        let form = [
            ("username", self.credentials.username.as_str()),
            ("password", self.credentials.password.as_str()),
            ("client_id", self.auth.client_id.as_str()),
            ("redirect_uri", self.auth.redirect_uri.as_str()),
            ("response_type", "token"),
            ("scope", self.auth.scope.as_str()),
            ("state", self.auth.state.as_str()),
            ("locale", self.auth.locale.as_str()),
        ];

        self.renewals += 1;
        let response = self
            .client
            .post(self.auth_url.clone())
            .form(&form[..])
            .send()
            .await
            .map_err(|e| {
                CdApiError::auth_failed(e.status().map(|s| s.as_u16()), e.to_string())
            })?;

        let status = response.status();
        info!("credentials response code from {}: {}", self.auth_url, status.as_u16());

        if !status.is_redirection() {
            return Err(CdApiError::auth_failed(
                Some(status.as_u16()),
                "expected a redirect from the authentication endpoint",
            ));
        }

        let location = response
            .headers()
            .get(header::LOCATION)
            .ok_or_else(|| CdApiError::auth_failed(Some(status.as_u16()), "missing Location header"))?
            .to_str()
            .map_err(|_| {
                CdApiError::auth_failed(Some(status.as_u16()), "undecodable Location header")
            })?;

        let grant = parse_token_location(location)?;
        self.session = Some(Session::from_grant(grant, now)?);
        Ok(())
    }

    fn valid_token(&self, now: DateTime<Utc>) -> Option<String> {
        self.session
            .as_ref()
            .filter(|s| s.is_valid_at(now))
            .and_then(|s| s.access_token().map(String::from))
    }

    fn expiry(&self) -> Option<DateTime<Utc>> {
        self.session.as_ref().map(Session::expires_at)
    }
}

fn local_time(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}
