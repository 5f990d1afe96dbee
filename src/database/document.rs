//! Document-oriented implementation of the Database trait
//!
//! Each principal is a document that embeds its tokens in an
//! `authentication_tokens` array. Documents are held in memory and, when a
//! snapshot path is configured, written back as JSON after every mutation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{Database, TokenAssociation};
use crate::auth::token::generate_token_id;
use crate::error::DbError;
use crate::models::{NewToken, Principal, Token};

/// Field of the principal document that embeds tokens
pub const TOKENS_FIELD: &str = "authentication_tokens";

/// A principal with its embedded tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PrincipalDocument {
    #[serde(flatten)]
    principal: Principal,

    #[serde(default)]
    authentication_tokens: Vec<Token>,
}

/// Document store backed by memory and an optional JSON snapshot
pub struct DocumentDatabase {
    documents: RwLock<HashMap<String, PrincipalDocument>>,
    snapshot: Option<PathBuf>,
}

impl DocumentDatabase {
    /// Create an empty store that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            snapshot: None,
        }
    }

    /// Open a store persisted at `path`, loading it if the file exists
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let path = path.as_ref().to_path_buf();

        let documents = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let docs: Vec<PrincipalDocument> = serde_json::from_slice(&bytes)
                    .map_err(|e| DbError::Document(format!("invalid snapshot: {}", e)))?;
                docs.into_iter()
                    .map(|doc| (doc.principal.id.clone(), doc))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(DbError::Document(format!("failed to read snapshot: {}", e))),
        };

        tracing::debug!(path = %path.display(), principals = documents.len(), "Document store loaded");

        Ok(Self {
            documents: RwLock::new(documents),
            snapshot: Some(path),
        })
    }

    /// Write the documents to the snapshot file, if any
    async fn persist(&self, documents: &HashMap<String, PrincipalDocument>) -> Result<(), DbError> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };

        let mut docs: Vec<&PrincipalDocument> = documents.values().collect();
        docs.sort_by(|a, b| a.principal.id.cmp(&b.principal.id));

        let bytes = serde_json::to_vec_pretty(&docs)
            .map_err(|e| DbError::Document(format!("failed to encode snapshot: {}", e)))?;
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| DbError::Document(format!("failed to write snapshot: {}", e)))
    }

    /// Apply a mutation and keep it only if the snapshot write succeeds
    ///
    /// With a snapshot the mutation runs on a copy that replaces the live map
    /// after it is persisted, so a failed write leaves memory unchanged.
    async fn commit<T>(
        &self,
        mutate: impl FnOnce(&mut HashMap<String, PrincipalDocument>) -> Result<T, DbError>,
    ) -> Result<T, DbError> {
        let mut documents = self.documents.write().await;

        if self.snapshot.is_none() {
            return mutate(&mut *documents);
        }

        let mut staged = (*documents).clone();
        let value = mutate(&mut staged)?;
        self.persist(&staged).await?;
        *documents = staged;
        Ok(value)
    }
}

impl Default for DocumentDatabase {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[async_trait]
impl Database for DocumentDatabase {
    fn token_association(&self) -> Option<TokenAssociation> {
        Some(TokenAssociation::Embedded {
            field: TOKENS_FIELD.to_string(),
        })
    }

    async fn insert_principal(&self, principal: &Principal) -> Result<(), DbError> {
        self.commit(|documents| {
            if documents.contains_key(&principal.id)
                || documents
                    .values()
                    .any(|doc| doc.principal.lookup_key == principal.lookup_key)
            {
                return Err(DbError::ConstraintViolation(format!(
                    "principal {} already exists",
                    principal.lookup_key
                )));
            }

            documents.insert(
                principal.id.clone(),
                PrincipalDocument {
                    principal: principal.clone(),
                    authentication_tokens: Vec::new(),
                },
            );
            Ok(())
        })
        .await
    }

    async fn find_principal_by_lookup_key(
        &self,
        key: &str,
    ) -> Result<Option<Principal>, DbError> {
        let documents = self.documents.read().await;

        Ok(documents
            .values()
            .find(|doc| doc.principal.lookup_key == key)
            .map(|doc| doc.principal.clone()))
    }

    async fn digest_exists(&self, digest: &str) -> Result<bool, DbError> {
        let documents = self.documents.read().await;

        Ok(documents
            .values()
            .flat_map(|doc| doc.authentication_tokens.iter())
            .any(|token| token.digest == digest))
    }

    async fn create_token(&self, owner_id: &str, token: &NewToken) -> Result<Token, DbError> {
        self.commit(|documents| {
            if documents
                .values()
                .flat_map(|doc| doc.authentication_tokens.iter())
                .any(|t| t.digest == token.digest)
            {
                return Err(DbError::ConstraintViolation(
                    "token digest already exists".to_string(),
                ));
            }

            let document = documents.get_mut(owner_id).ok_or_else(|| {
                DbError::ConstraintViolation(format!("unknown principal {}", owner_id))
            })?;

            let stored = Token::from_new(generate_token_id(), owner_id, token);
            document.authentication_tokens.push(stored.clone());
            Ok(stored)
        })
        .await
    }

    async fn find_token_by_digest(
        &self,
        owner_id: &str,
        digest: &str,
    ) -> Result<Option<Token>, DbError> {
        let documents = self.documents.read().await;

        Ok(documents.get(owner_id).and_then(|doc| {
            doc.authentication_tokens
                .iter()
                .find(|t| t.digest == digest)
                .cloned()
        }))
    }

    async fn list_tokens_by_last_used(&self, owner_id: &str) -> Result<Vec<Token>, DbError> {
        let documents = self.documents.read().await;

        let mut tokens: Vec<Token> = documents
            .get(owner_id)
            .map(|doc| doc.authentication_tokens.iter().rev().cloned().collect())
            .unwrap_or_default();
        // Stable sort keeps later insertions first among equal timestamps
        tokens.sort_by(|a, b| b.last_used_at.cmp(&a.last_used_at));

        Ok(tokens)
    }

    async fn update_token_last_used(&self, id: &str, at: DateTime<Utc>) -> Result<(), DbError> {
        self.commit(|documents| {
            let token = documents
                .values_mut()
                .flat_map(|doc| doc.authentication_tokens.iter_mut())
                .find(|t| t.id == id)
                .ok_or(DbError::NotFound)?;
            token.last_used_at = at;
            Ok(())
        })
        .await
    }

    async fn delete_token(&self, id: &str) -> Result<(), DbError> {
        let exists = self
            .documents
            .read()
            .await
            .values()
            .flat_map(|doc| doc.authentication_tokens.iter())
            .any(|t| t.id == id);
        if !exists {
            return Ok(());
        }

        self.commit(|documents| {
            for doc in documents.values_mut() {
                doc.authentication_tokens.retain(|t| t.id != id);
            }
            Ok(())
        })
        .await
    }
}
