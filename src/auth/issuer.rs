//! Token issuer
//!
//! Owns the lifecycle of a principal's tokens: issuing, finding, touching,
//! expiring and purging. The issuer only talks to storage through the
//! per-principal [`TokenStore`](crate::database::TokenStore) view.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use http::HeaderMap;

use crate::database::{tokens_for, Database, TokenAssociation};
use crate::error::{DbError, IssuerError};
use crate::models::{NewToken, Principal, RequestContext, Token};

use super::strategy::HeaderNames;
use super::token::{digest_secret, generate_secret};

/// Default number of tokens kept per principal
pub const MAXIMUM_TOKENS_PER_USER: usize = 20;

/// Default minimum age of `last_used_at` before a use rewrites it
pub const DEFAULT_TOUCH_INTERVAL: Duration = Duration::from_secs(3600);

/// Configuration for the token issuer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerConfig {
    /// Tokens retained per principal by [`TokenIssuer::purge_old_tokens`]
    pub maximum_tokens_per_user: usize,

    /// Throttle window for `last_used_at` writes
    pub touch_interval: Duration,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            maximum_tokens_per_user: MAXIMUM_TOKENS_PER_USER,
            touch_interval: DEFAULT_TOUCH_INTERVAL,
        }
    }
}

/// Token issuer
///
/// Stateless apart from its configuration; safe to share across tasks.
pub struct TokenIssuer<D: Database + ?Sized> {
    db: Arc<D>,
    config: IssuerConfig,
    association: TokenAssociation,
}

impl<D: Database + ?Sized> TokenIssuer<D> {
    /// Create a new token issuer
    ///
    /// Fails when the backend cannot say where principal tokens live.
    pub fn new(db: Arc<D>, config: IssuerConfig) -> Result<Self, IssuerError> {
        let association = db.token_association().ok_or_else(|| {
            IssuerError::AmbiguousTokenOwner(
                "backend exposes no token association for principals".to_string(),
            )
        })?;

        tracing::debug!(
            association = %association,
            maximum_tokens_per_user = config.maximum_tokens_per_user,
            "Token issuer initialized"
        );

        Ok(Self {
            db,
            config,
            association,
        })
    }

    /// Issuer configuration
    pub fn config(&self) -> &IssuerConfig {
        &self.config
    }

    /// Where the backend keeps principal tokens
    pub fn association(&self) -> &TokenAssociation {
        &self.association
    }

    /// Issue a token for `principal` and return its raw secret
    ///
    /// The raw secret exists only in the return value; the store keeps its
    /// digest. Callers must hand it to the client immediately.
    pub async fn create_and_return_token(
        &self,
        principal: &Principal,
        context: &RequestContext,
        expires_in: Option<Duration>,
    ) -> Result<String, DbError> {
        let store = tokens_for(self.db.as_ref(), principal);

        loop {
            let (raw, digest) = self.unique_secret().await?;
            let attributes = NewToken::new(digest, context).with_expires_in(expires_in);

            match store.create(&attributes).await {
                Ok(token) => {
                    tracing::info!(
                        principal_id = %principal.id,
                        token_id = %token.id,
                        expires = token.expires(),
                        "Token issued"
                    );
                    return Ok(raw);
                }
                // A concurrent issuance may have taken the digest since the probe
                Err(DbError::ConstraintViolation(msg)) => {
                    if !self.db.digest_exists(&attributes.digest).await? {
                        return Err(DbError::ConstraintViolation(msg));
                    }
                    tracing::warn!(
                        principal_id = %principal.id,
                        "Token digest collision on insert, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Generate a secret whose digest no stored token has
    async fn unique_secret(&self) -> Result<(String, String), DbError> {
        loop {
            let raw = generate_secret();
            let digest = digest_secret(&raw);

            if !self.db.digest_exists(&digest).await? {
                return Ok((raw, digest));
            }
            tracing::warn!("Token digest collision, regenerating");
        }
    }

    /// Find the principal's token matching a presented secret
    ///
    /// An empty secret never matches and is not digested.
    pub async fn find_token(
        &self,
        principal: &Principal,
        secret: &str,
    ) -> Result<Option<Token>, DbError> {
        if secret.is_empty() {
            return Ok(None);
        }

        let digest = digest_secret(secret);
        tokens_for(self.db.as_ref(), principal)
            .find_by_digest(&digest)
            .await
    }

    /// Check if the token is usable now
    pub fn is_unexpired(&self, token: &Token) -> bool {
        token.is_unexpired_at(Utc::now())
    }

    /// Record a use of the token, at most once per touch interval
    ///
    /// Returns `true` when `last_used_at` was written.
    pub async fn touch_token(&self, principal: &Principal, token: &Token) -> Result<bool, DbError> {
        let now = Utc::now();
        if !token.needs_touch_at(now, self.config.touch_interval) {
            return Ok(false);
        }

        tokens_for(self.db.as_ref(), principal)
            .touch(token, now)
            .await?;
        Ok(true)
    }

    /// Revoke the principal's token matching a presented secret
    ///
    /// Returns `true` when a token was deleted; an unknown secret is a no-op.
    pub async fn expire_token(&self, principal: &Principal, secret: &str) -> Result<bool, DbError> {
        let Some(token) = self.find_token(principal, secret).await? else {
            return Ok(false);
        };

        tokens_for(self.db.as_ref(), principal)
            .delete(&token)
            .await?;
        tracing::info!(principal_id = %principal.id, token_id = %token.id, "Token revoked");
        Ok(true)
    }

    /// Revoke the token carried in the request's token header
    pub async fn expire_token_from_headers(
        &self,
        principal: &Principal,
        headers: &HeaderMap,
        names: &HeaderNames,
    ) -> Result<bool, DbError> {
        let secret = headers
            .get(names.token.as_str())
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        self.expire_token(principal, secret).await
    }

    /// Delete the principal's least recently used tokens beyond the cap
    ///
    /// Returns the number of tokens deleted.
    pub async fn purge_old_tokens(&self, principal: &Principal) -> Result<usize, DbError> {
        let store = tokens_for(self.db.as_ref(), principal);
        let tokens = store.list_ordered_by_last_used_descending().await?;

        let mut purged = 0;
        for token in tokens.iter().skip(self.config.maximum_tokens_per_user) {
            store.delete(token).await?;
            purged += 1;
        }

        if purged > 0 {
            tracing::info!(principal_id = %principal.id, purged, "Purged old tokens");
        }
        Ok(purged)
    }

    /// List the principal's tokens, most recently used first
    pub async fn list_tokens(&self, principal: &Principal) -> Result<Vec<Token>, DbError> {
        tokens_for(self.db.as_ref(), principal)
            .list_ordered_by_last_used_descending()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MockDatabase;
    use chrono::TimeDelta;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn principal() -> Principal {
        Principal::new("p1", "alice@example.com")
    }

    fn relational() -> Option<TokenAssociation> {
        Some(TokenAssociation::Relational {
            table: "authentication_tokens".to_string(),
        })
    }

    fn create_test_issuer(mut db: MockDatabase) -> TokenIssuer<MockDatabase> {
        db.expect_token_association().returning(relational);
        TokenIssuer::new(Arc::new(db), IssuerConfig::default()).unwrap()
    }

    fn stored_token(secret: &str, last_used_ago: TimeDelta, expires_in: Option<Duration>) -> Token {
        let mut new = NewToken::new(digest_secret(secret), &RequestContext::default())
            .with_expires_in(expires_in);
        new.last_used_at = Utc::now() - last_used_ago;
        Token::from_new("t1", "p1", &new)
    }

    // Test 1: construction fails without a token association
    #[test]
    fn test_new_without_association_fails() {
        let mut db = MockDatabase::new();
        db.expect_token_association().returning(|| None);

        let result = TokenIssuer::new(Arc::new(db), IssuerConfig::default());
        assert!(matches!(result, Err(IssuerError::AmbiguousTokenOwner(_))));
    }

    // Test 2: issued secret is returned raw and only its digest is stored
    #[tokio::test]
    async fn test_create_and_return_token_stores_digest() {
        let mut db = MockDatabase::new();
        db.expect_digest_exists().returning(|_| Ok(false));
        db.expect_create_token()
            .withf(|owner, new| owner == "p1" && new.digest.len() == 64)
            .times(1)
            .returning(|owner, new| Ok(Token::from_new("t1", owner, new)));

        let issuer = create_test_issuer(db);
        let raw = issuer
            .create_and_return_token(&principal(), &RequestContext::default(), None)
            .await
            .unwrap();

        assert_eq!(raw.len(), 64);
    }

    // Test 3: stored attributes never contain the raw secret
    #[tokio::test]
    async fn test_create_and_return_token_never_persists_raw() {
        let captured = Arc::new(std::sync::Mutex::new(None::<NewToken>));
        let sink = Arc::clone(&captured);

        let mut db = MockDatabase::new();
        db.expect_digest_exists().returning(|_| Ok(false));
        db.expect_create_token().returning(move |owner, new| {
            *sink.lock().unwrap() = Some(new.clone());
            Ok(Token::from_new("t1", owner, new))
        });

        let issuer = create_test_issuer(db);
        let raw = issuer
            .create_and_return_token(
                &principal(),
                &RequestContext::default(),
                Some(Duration::from_secs(3600)),
            )
            .await
            .unwrap();

        let stored = captured.lock().unwrap().clone().unwrap();
        assert_eq!(stored.digest, digest_secret(&raw));
        assert_ne!(stored.digest, raw);
        assert_eq!(stored.expires_in, Some(Duration::from_secs(3600)));
    }

    // Test 4: a digest collision forces a regeneration
    #[tokio::test]
    async fn test_create_and_return_token_retries_on_collision() {
        let probes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&probes);

        let mut db = MockDatabase::new();
        db.expect_digest_exists()
            .returning(move |_| Ok(counter.fetch_add(1, Ordering::SeqCst) == 0));
        db.expect_create_token()
            .times(1)
            .returning(|owner, new| Ok(Token::from_new("t1", owner, new)));

        let issuer = create_test_issuer(db);
        let result = issuer
            .create_and_return_token(&principal(), &RequestContext::default(), None)
            .await;

        assert!(result.is_ok());
        assert_eq!(probes.load(Ordering::SeqCst), 2);
    }

    // Test 5: losing an insert race retries with a fresh secret
    #[tokio::test]
    async fn test_create_and_return_token_retries_on_insert_race() {
        let inserts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&inserts);

        let mut db = MockDatabase::new();
        // Pre-insert probes say free, the post-failure probe says taken
        let probes = Arc::new(AtomicUsize::new(0));
        let probe_counter = Arc::clone(&probes);
        db.expect_digest_exists()
            .returning(move |_| Ok(probe_counter.fetch_add(1, Ordering::SeqCst) == 1));
        db.expect_create_token().returning(move |owner, new| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(DbError::ConstraintViolation("UNIQUE digest".to_string()))
            } else {
                Ok(Token::from_new("t1", owner, new))
            }
        });

        let issuer = create_test_issuer(db);
        let result = issuer
            .create_and_return_token(&principal(), &RequestContext::default(), None)
            .await;

        assert!(result.is_ok());
        assert_eq!(inserts.load(Ordering::SeqCst), 2);
    }

    // Test 6: store failures during issuance propagate
    #[tokio::test]
    async fn test_create_and_return_token_store_failure() {
        let mut db = MockDatabase::new();
        db.expect_digest_exists()
            .returning(|_| Err(DbError::Connection("closed".to_string())));

        let issuer = create_test_issuer(db);
        let result = issuer
            .create_and_return_token(&principal(), &RequestContext::default(), None)
            .await;

        assert!(matches!(result, Err(DbError::Connection(_))));
    }

    // Test 7: empty secrets are not looked up
    #[tokio::test]
    async fn test_find_token_empty_secret() {
        let db = MockDatabase::new();
        let issuer = create_test_issuer(db);

        let result = issuer.find_token(&principal(), "").await.unwrap();
        assert!(result.is_none());
    }

    // Test 8: find_token queries by digest under the principal
    #[tokio::test]
    async fn test_find_token_by_digest() {
        let expected = digest_secret("raw-secret");

        let mut db = MockDatabase::new();
        db.expect_find_token_by_digest()
            .withf(move |owner, digest| owner == "p1" && digest == expected)
            .returning(|_, _| Ok(Some(stored_token("raw-secret", TimeDelta::zero(), None))));

        let issuer = create_test_issuer(db);
        let token = issuer.find_token(&principal(), "raw-secret").await.unwrap();
        assert!(token.is_some());
    }

    // Test 9: touch is skipped inside the throttle window
    #[tokio::test]
    async fn test_touch_token_throttled() {
        let mut db = MockDatabase::new();
        db.expect_update_token_last_used().never();

        let issuer = create_test_issuer(db);
        let token = stored_token("s", TimeDelta::minutes(30), None);

        assert!(!issuer.touch_token(&principal(), &token).await.unwrap());
    }

    // Test 10: touch writes once the window has passed
    #[tokio::test]
    async fn test_touch_token_after_window() {
        let mut db = MockDatabase::new();
        db.expect_update_token_last_used()
            .withf(|id, _| id == "t1")
            .times(1)
            .returning(|_, _| Ok(()));

        let issuer = create_test_issuer(db);
        let token = stored_token("s", TimeDelta::minutes(61), None);

        assert!(issuer.touch_token(&principal(), &token).await.unwrap());
    }

    // Test 11: expiry decision follows the token's sliding window
    #[test]
    fn test_is_unexpired() {
        let issuer = create_test_issuer(MockDatabase::new());
        let hour = Some(Duration::from_secs(3600));

        assert!(issuer.is_unexpired(&stored_token("s", TimeDelta::seconds(3599), hour)));
        assert!(!issuer.is_unexpired(&stored_token("s", TimeDelta::seconds(3601), hour)));
        assert!(issuer.is_unexpired(&stored_token("s", TimeDelta::days(365), None)));
        assert!(issuer.is_unexpired(&stored_token(
            "s",
            TimeDelta::days(365),
            Some(Duration::ZERO)
        )));
    }

    // Test 12: expire_token deletes the match
    #[tokio::test]
    async fn test_expire_token_deletes() {
        let mut db = MockDatabase::new();
        db.expect_find_token_by_digest()
            .returning(|_, _| Ok(Some(stored_token("raw", TimeDelta::zero(), None))));
        db.expect_delete_token()
            .withf(|id| id == "t1")
            .times(1)
            .returning(|_| Ok(()));

        let issuer = create_test_issuer(db);
        assert!(issuer.expire_token(&principal(), "raw").await.unwrap());
    }

    // Test 13: expire_token on an unknown secret is a no-op
    #[tokio::test]
    async fn test_expire_token_unknown_is_noop() {
        let mut db = MockDatabase::new();
        db.expect_find_token_by_digest().returning(|_, _| Ok(None));
        db.expect_delete_token().never();

        let issuer = create_test_issuer(db);
        assert!(!issuer.expire_token(&principal(), "unknown").await.unwrap());
    }

    // Test 14: expire_token_from_headers reads the token header
    #[tokio::test]
    async fn test_expire_token_from_headers() {
        let expected = digest_secret("from-header");

        let mut db = MockDatabase::new();
        db.expect_find_token_by_digest()
            .withf(move |_, digest| digest == expected)
            .returning(|_, _| Ok(Some(stored_token("from-header", TimeDelta::zero(), None))));
        db.expect_delete_token().times(1).returning(|_| Ok(()));

        let issuer = create_test_issuer(db);
        let mut headers = HeaderMap::new();
        headers.insert("x-api-token", "from-header".parse().unwrap());

        let deleted = issuer
            .expire_token_from_headers(&principal(), &headers, &HeaderNames::default())
            .await
            .unwrap();
        assert!(deleted);
    }

    // Test 15: purge deletes everything past the cap, oldest last
    #[tokio::test]
    async fn test_purge_old_tokens() {
        let mut db = MockDatabase::new();
        db.expect_token_association().returning(relational);
        db.expect_list_tokens_by_last_used().returning(|_| {
            Ok((0..5)
                .map(|i| {
                    let mut token = stored_token("s", TimeDelta::hours(i), None);
                    token.id = format!("t{}", i);
                    token
                })
                .collect())
        });
        db.expect_delete_token()
            .withf(|id| id == "t3" || id == "t4")
            .times(2)
            .returning(|_| Ok(()));

        let config = IssuerConfig {
            maximum_tokens_per_user: 3,
            ..IssuerConfig::default()
        };
        let issuer = TokenIssuer::new(Arc::new(db), config).unwrap();

        assert_eq!(issuer.purge_old_tokens(&principal()).await.unwrap(), 2);
    }

    // Test 16: purge under the cap deletes nothing
    #[tokio::test]
    async fn test_purge_under_cap() {
        let mut db = MockDatabase::new();
        db.expect_list_tokens_by_last_used()
            .returning(|_| Ok(vec![stored_token("s", TimeDelta::zero(), None)]));
        db.expect_delete_token().never();

        let issuer = create_test_issuer(db);
        assert_eq!(issuer.purge_old_tokens(&principal()).await.unwrap(), 0);
    }

    // Test 17: default configuration
    #[test]
    fn test_issuer_config_defaults() {
        let config = IssuerConfig::default();
        assert_eq!(config.maximum_tokens_per_user, 20);
        assert_eq!(config.touch_interval, Duration::from_secs(3600));
    }
}
