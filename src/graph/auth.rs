use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Method, Url};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::graph::pipeline::{GraphRequest, Transport};
use crate::graph::{GraphError, GraphResult, GRAPH_SCOPE};

const FORM_MEDIA_TYPE: &str = "application/x-www-form-urlencoded";
const ACCESS_TOKEN_KEY: &str = "access_token";
const PERMISSION_ROLE_PREFIXES: &[&str] = &["Sites", "Files"];

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: StdMutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: StdMutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub struct Credentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
}

impl Credentials {
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: GRAPH_SCOPE.to_string(),
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn default_token_url(&self) -> String {
        format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            self.tenant_id
        )
    }

    fn form_body(&self) -> String {
        format!(
            "grant_type=client_credentials&client_id={}&client_secret={}&scope={}",
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.client_secret),
            urlencoding::encode(&self.scope)
        )
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("scope", &self.scope)
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    secret: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, issued_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            secret: secret.into(),
            issued_at,
            expires_at,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Single-entry token cache. The lock is held from the validity check until
/// the refreshed token is stored, so concurrent callers share one refresh.
pub struct TokenCache {
    clock: Arc<dyn Clock>,
    slot: Mutex<Option<AccessToken>>,
}

impl TokenCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            slot: Mutex::new(None),
        }
    }

    pub async fn get_or_refresh<F, Fut>(&self, refresh: F) -> GraphResult<AccessToken>
    where
        F: FnOnce(DateTime<Utc>) -> Fut,
        Fut: Future<Output = GraphResult<AccessToken>>,
    {
        let mut slot = self.slot.lock().await;
        let now = self.clock.now();
        if let Some(token) = slot.as_ref().filter(|token| token.is_valid_at(now)) {
            return Ok(token.clone());
        }

        let token = refresh(now).await?;
        *slot = Some(token.clone());
        Ok(token)
    }

    pub async fn clear(&self) {
        *self.slot.lock().await = None;
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenClaims {
    nbf: Option<i64>,
    iat: Option<i64>,
    exp: Option<i64>,
    #[serde(default)]
    roles: Vec<String>,
}

impl TokenClaims {
    /// Validity window length, `exp - nbf` (or `exp - iat`).
    fn lifetime(&self) -> Option<Duration> {
        let valid_to = self.exp?;
        let valid_from = self.nbf.or(self.iat)?;
        let seconds = valid_to.checked_sub(valid_from)?;
        (seconds > 0).then(|| Duration::seconds(seconds))
    }

    fn has_site_permissions(&self) -> bool {
        self.roles.iter().any(|role| {
            PERMISSION_ROLE_PREFIXES
                .iter()
                .any(|prefix| role.starts_with(prefix))
        })
    }
}

/// Reads the claims segment of a JWT. The signature is not verified; the
/// token is trusted because it came straight from the identity provider.
fn decode_claims(token: &str) -> GraphResult<TokenClaims> {
    let payload = token
        .split('.')
        .nth(1)
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| GraphError::Authentication("cannot read JWT token".to_string()))?;
    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|err| GraphError::Authentication(format!("cannot decode JWT payload: {err}")))?;
    serde_json::from_slice(&decoded)
        .map_err(|err| GraphError::Authentication(format!("cannot parse JWT claims: {err}")))
}

/// Client-credentials authenticator for the identity provider.
pub struct Authenticator {
    transport: Arc<dyn Transport>,
    credentials: Credentials,
    token_url: Url,
    cache: TokenCache,
}

impl Authenticator {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Credentials,
        clock: Arc<dyn Clock>,
    ) -> GraphResult<Self> {
        let token_url = credentials.default_token_url();
        Self::with_token_url(transport, credentials, clock, &token_url)
    }

    pub fn with_token_url(
        transport: Arc<dyn Transport>,
        credentials: Credentials,
        clock: Arc<dyn Clock>,
        token_url: &str,
    ) -> GraphResult<Self> {
        let token_url = Url::parse(token_url)
            .map_err(|err| GraphError::Config(format!("invalid token url {token_url}: {err}")))?;
        Ok(Self {
            transport,
            credentials,
            token_url,
            cache: TokenCache::new(clock),
        })
    }

    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    /// Cached token while it is valid, otherwise a freshly requested one.
    pub async fn access_token(&self) -> GraphResult<AccessToken> {
        self.cache
            .get_or_refresh(|now| self.request_token(now))
            .await
    }

    /// Drops the cached token so the next call requests a new one.
    pub async fn invalidate(&self) {
        self.cache.clear().await;
    }

    async fn request_token(&self, now: DateTime<Utc>) -> GraphResult<AccessToken> {
        let request = GraphRequest::new(Method::POST, self.token_url.clone())
            .with_body(FORM_MEDIA_TYPE, self.credentials.form_body());

        let response = self.transport.send(request).await.map_err(|err| {
            error!(token_url = %self.token_url, error = %err, "access token request could not be sent");
            GraphError::Authentication(format!("token endpoint unreachable: {err}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            error!(
                status = status.as_u16(),
                "access token request returned an unsuccessful status code"
            );
            return Err(GraphError::Authentication(format!(
                "token endpoint returned status {}",
                status.as_u16()
            )));
        }

        let body = response.text().await.map_err(|err| {
            GraphError::Authentication(format!("read token response: {err}"))
        })?;
        let secret = serde_json::from_str::<TokenResponse>(&body)
            .ok()
            .and_then(|payload| payload.access_token)
            .ok_or_else(|| {
                error!(key = ACCESS_TOKEN_KEY, "key was not found in the token response");
                GraphError::Authentication(format!(
                    "key '{ACCESS_TOKEN_KEY}' was not found in the token response"
                ))
            })?;

        let claims = decode_claims(&secret).inspect_err(|err| {
            error!(error = %err, "access token payload is unreadable");
        })?;

        if !claims.has_site_permissions() {
            error!("access token carries no site or file permissions; grant Sites.ReadWrite.All or higher");
            return Err(GraphError::Authentication(
                "token has no site/file permissions (expected a Sites.* or Files.* role)"
                    .to_string(),
            ));
        }

        let lifetime = claims.lifetime().ok_or_else(|| {
            error!("access token has no usable validity window");
            GraphError::Authentication("token has no usable validity window".to_string())
        })?;

        info!(minutes = lifetime.num_minutes(), "access token obtained and cached");
        Ok(AccessToken::new(secret, now, now + lifetime))
    }
}
