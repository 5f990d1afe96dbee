//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use http::{HeaderMap, HeaderValue};

use device_tokens::auth::{HeaderNames, IssuerConfig, TokenAuthenticatable, TokenIssuer};
use device_tokens::database::{Database, DocumentDatabase, SqliteDatabase};
use device_tokens::models::{Principal, Token};

/// Create an in-memory SQLite database for testing
pub async fn create_test_sqlite() -> Arc<SqliteDatabase> {
    Arc::new(
        SqliteDatabase::new(":memory:")
            .await
            .expect("Failed to create test database"),
    )
}

/// Create an in-memory document store for testing
pub fn create_test_document() -> Arc<DocumentDatabase> {
    Arc::new(DocumentDatabase::in_memory())
}

/// Register a principal under `lookup_key`
pub async fn create_test_principal<D: Database + ?Sized>(db: &D, lookup_key: &str) -> Principal {
    let principal = Principal::new(format!("principal-{}", lookup_key), lookup_key);
    db.insert_principal(&principal)
        .await
        .expect("Failed to insert principal");
    principal
}

/// Create an issuer with default settings
pub fn create_test_issuer<D: Database + ?Sized>(db: Arc<D>) -> Arc<TokenIssuer<D>> {
    create_test_issuer_with_config(db, IssuerConfig::default())
}

/// Create an issuer with custom settings
pub fn create_test_issuer_with_config<D: Database + ?Sized>(
    db: Arc<D>,
    config: IssuerConfig,
) -> Arc<TokenIssuer<D>> {
    Arc::new(TokenIssuer::new(db, config).expect("Failed to create issuer"))
}

/// Create the header strategy over `db`
pub fn create_test_strategy<D: Database + ?Sized>(
    db: Arc<D>,
    issuer: Arc<TokenIssuer<D>>,
) -> TokenAuthenticatable<D> {
    TokenAuthenticatable::new(db, issuer, HeaderNames::default())
}

/// Build request headers carrying a credential pair
pub fn auth_headers(lookup_key: &str, token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "x-api-key",
        HeaderValue::from_str(lookup_key).expect("Invalid lookup key header"),
    );
    headers.insert(
        "x-api-token",
        HeaderValue::from_str(token).expect("Invalid token header"),
    );
    headers
}

/// Fetch the stored token for a raw secret
pub async fn stored_token<D: Database + ?Sized>(
    issuer: &TokenIssuer<D>,
    principal: &Principal,
    secret: &str,
) -> Token {
    issuer
        .find_token(principal, secret)
        .await
        .expect("Failed to find token")
        .expect("Token not stored")
}

/// Move a token's `last_used_at` into the past
pub async fn set_last_used_ago<D: Database + ?Sized>(
    db: &D,
    issuer: &TokenIssuer<D>,
    principal: &Principal,
    secret: &str,
    ago: TimeDelta,
) -> Token {
    let token = stored_token(issuer, principal, secret).await;
    db.update_token_last_used(&token.id, Utc::now() - ago)
        .await
        .expect("Failed to update last_used_at");
    stored_token(issuer, principal, secret).await
}
