//! Header token authentication strategy
//!
//! This module decides, per request, whether a lookup key and token pair in
//! the headers identify a principal. Nothing is cached between requests and
//! no session state is written.

use std::sync::Arc;

use async_trait::async_trait;
use http::HeaderMap;

use crate::database::Database;
use crate::error::AuthError;
use crate::models::Principal;

use super::issuer::TokenIssuer;

/// Names of the headers carrying the credential pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderNames {
    /// Header with the principal lookup key
    pub lookup_key: String,

    /// Header with the raw token
    pub token: String,
}

impl Default for HeaderNames {
    fn default() -> Self {
        Self {
            lookup_key: "X-API-KEY".to_string(),
            token: "X-API-TOKEN".to_string(),
        }
    }
}

/// Lookup key and raw token presented by a client
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Principal lookup key
    pub lookup_key: String,

    /// Raw token secret
    pub token: String,
}

impl Credentials {
    /// Create credentials from explicit values
    pub fn new(lookup_key: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            lookup_key: lookup_key.into(),
            token: token.into(),
        }
    }

    /// Extract credentials from request headers
    ///
    /// Returns `None` unless both headers are present and non-empty.
    pub fn from_headers(headers: &HeaderMap, names: &HeaderNames) -> Option<Self> {
        let lookup_key = header_value(headers, &names.lookup_key)?;
        let token = header_value(headers, &names.token)?;

        Some(Self::new(lookup_key, token))
    }
}

// Keep the secret out of debug output
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("lookup_key", &self.lookup_key)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// An authentication strategy that can run in a chain
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Whether the request carries credentials this strategy understands
    fn is_applicable(&self, headers: &HeaderMap) -> bool;

    /// Authenticate the request
    ///
    /// Returns `AuthError::NotApplicable` when the strategy declines.
    async fn authenticate(&self, headers: &HeaderMap) -> Result<Principal, AuthError>;

    /// Whether a success should be persisted as session state
    fn store(&self) -> bool;

    /// Whether sign-in tracking side effects should be skipped
    fn skip_trackable(&self) -> bool;
}

/// Authenticates a principal from lookup key and token headers
pub struct TokenAuthenticatable<D: Database + ?Sized> {
    db: Arc<D>,
    issuer: Arc<TokenIssuer<D>>,
    headers: HeaderNames,
}

impl<D: Database + ?Sized> TokenAuthenticatable<D> {
    /// Create a new strategy
    pub fn new(db: Arc<D>, issuer: Arc<TokenIssuer<D>>, headers: HeaderNames) -> Self {
        Self {
            db,
            issuer,
            headers,
        }
    }

    /// Header names this strategy reads
    pub fn header_names(&self) -> &HeaderNames {
        &self.headers
    }

    /// Authenticate an already extracted credential pair
    ///
    /// Unknown principals, unknown tokens and expired tokens all fail with
    /// `AuthError::InvalidToken`.
    pub async fn authenticate_credentials(
        &self,
        credentials: &Credentials,
    ) -> Result<Principal, AuthError> {
        let Some(principal) = self
            .db
            .find_principal_by_lookup_key(&credentials.lookup_key)
            .await?
        else {
            tracing::debug!("Authentication failed: unknown principal");
            return Err(AuthError::InvalidToken);
        };

        let token = match self.issuer.find_token(&principal, &credentials.token).await? {
            Some(token) if self.issuer.is_unexpired(&token) => token,
            Some(_) => {
                tracing::debug!(principal_id = %principal.id, "Authentication failed: token expired");
                return Err(AuthError::InvalidToken);
            }
            None => {
                tracing::debug!(principal_id = %principal.id, "Authentication failed: token not found");
                return Err(AuthError::InvalidToken);
            }
        };

        // Best effort; a failed write does not undo a valid authentication
        if let Err(e) = self.issuer.touch_token(&principal, &token).await {
            tracing::warn!(
                principal_id = %principal.id,
                token_id = %token.id,
                error = %e,
                "Failed to update token last used"
            );
        }

        tracing::debug!(principal_id = %principal.id, token_id = %token.id, "Authenticated");
        Ok(principal)
    }
}

#[async_trait]
impl<D: Database + ?Sized + 'static> Strategy for TokenAuthenticatable<D> {
    fn name(&self) -> &'static str {
        "token_authenticatable"
    }

    fn is_applicable(&self, headers: &HeaderMap) -> bool {
        Credentials::from_headers(headers, &self.headers).is_some()
    }

    async fn authenticate(&self, headers: &HeaderMap) -> Result<Principal, AuthError> {
        let credentials =
            Credentials::from_headers(headers, &self.headers).ok_or(AuthError::NotApplicable)?;
        self.authenticate_credentials(&credentials).await
    }

    fn store(&self) -> bool {
        false
    }

    fn skip_trackable(&self) -> bool {
        true
    }
}

/// Ordered list of strategies tried until one participates
#[derive(Default, Clone)]
pub struct StrategyChain {
    strategies: Vec<Arc<dyn Strategy>>,
}

impl StrategyChain {
    /// Create an empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a strategy
    pub fn with(mut self, strategy: Arc<dyn Strategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Run the strategies in order
    ///
    /// A strategy that declines passes the request on; the first one that
    /// succeeds or fails decides the outcome.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Principal, AuthError> {
        for strategy in &self.strategies {
            if !strategy.is_applicable(headers) {
                continue;
            }

            match strategy.authenticate(headers).await {
                Err(AuthError::NotApplicable) => continue,
                result => {
                    if let Err(ref e) = result {
                        tracing::debug!(strategy = strategy.name(), error = %e, "Strategy failed");
                    }
                    return result;
                }
            }
        }

        Err(AuthError::NotApplicable)
    }
}
