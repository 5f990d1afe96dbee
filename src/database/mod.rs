//! Storage layer for device-tokens
//!
//! This module defines the storage trait shared by every backend, the
//! per-principal token view used by the issuer, and two implementations:
//! relational (SQLite) and document-oriented (principal documents with
//! embedded tokens).

pub mod document;
pub mod migrations;
pub mod sqlite;

pub use document::DocumentDatabase;
pub use sqlite::SqliteDatabase;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DbError;
use crate::models::{NewToken, Principal, Token};

/// How a backend attaches tokens to principals
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenAssociation {
    /// Tokens live in their own table keyed by owner
    Relational {
        /// Table holding the tokens
        table: String,
    },
    /// Tokens are embedded in the principal document
    Embedded {
        /// Array field holding the tokens
        field: String,
    },
}

impl std::fmt::Display for TokenAssociation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenAssociation::Relational { table } => write!(f, "table {}", table),
            TokenAssociation::Embedded { field } => write!(f, "embedded field {}", field),
        }
    }
}

/// Database trait for principals and their tokens
///
/// Lookups by digest use a filter that yields `Ok(None)` for absent rows on
/// every backend; an absent record is never an error.
/// It uses `async_trait` for async methods and `mockall::automock` for testing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Database: Send + Sync {
    /// Describe where this backend keeps a principal's tokens
    ///
    /// `None` means tokens cannot be attached to principals at all.
    fn token_association(&self) -> Option<TokenAssociation>;

    // =========================================================================
    // Principal operations
    // =========================================================================

    /// Store a new principal
    async fn insert_principal(&self, principal: &Principal) -> Result<(), DbError>;

    /// Resolve a principal by its lookup key
    async fn find_principal_by_lookup_key(&self, key: &str)
        -> Result<Option<Principal>, DbError>;

    // =========================================================================
    // Token operations
    // =========================================================================

    /// Check whether any principal holds a token with this digest
    async fn digest_exists(&self, digest: &str) -> Result<bool, DbError>;

    /// Persist a token for an owner
    async fn create_token(&self, owner_id: &str, token: &NewToken) -> Result<Token, DbError>;

    /// Find an owner's token by digest
    async fn find_token_by_digest(
        &self,
        owner_id: &str,
        digest: &str,
    ) -> Result<Option<Token>, DbError>;

    /// List an owner's tokens, most recently used first
    async fn list_tokens_by_last_used(&self, owner_id: &str) -> Result<Vec<Token>, DbError>;

    /// Overwrite a token's last used timestamp
    async fn update_token_last_used(&self, id: &str, at: DateTime<Utc>) -> Result<(), DbError>;

    /// Delete a token; deleting an absent token is a no-op
    async fn delete_token(&self, id: &str) -> Result<(), DbError>;
}

/// Token collection belonging to one principal
pub struct TokenStore<'a, D: Database + ?Sized> {
    db: &'a D,
    owner_id: &'a str,
}

/// Scope a backend to the tokens of one principal
pub fn tokens_for<'a, D: Database + ?Sized>(
    db: &'a D,
    principal: &'a Principal,
) -> TokenStore<'a, D> {
    TokenStore {
        db,
        owner_id: &principal.id,
    }
}

impl<'a, D: Database + ?Sized> TokenStore<'a, D> {
    /// Persist a token for this principal
    pub async fn create(&self, attributes: &NewToken) -> Result<Token, DbError> {
        self.db.create_token(self.owner_id, attributes).await
    }

    /// Find this principal's token with the given digest
    pub async fn find_by_digest(&self, digest: &str) -> Result<Option<Token>, DbError> {
        self.db.find_token_by_digest(self.owner_id, digest).await
    }

    /// This principal's tokens, most recently used first
    pub async fn list_ordered_by_last_used_descending(&self) -> Result<Vec<Token>, DbError> {
        self.db.list_tokens_by_last_used(self.owner_id).await
    }

    /// Record a use of the token
    pub async fn touch(&self, token: &Token, at: DateTime<Utc>) -> Result<(), DbError> {
        self.db.update_token_last_used(&token.id, at).await
    }

    /// Delete the token
    pub async fn delete(&self, token: &Token) -> Result<(), DbError> {
        self.db.delete_token(&token.id).await
    }
}
