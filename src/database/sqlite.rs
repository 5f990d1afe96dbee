//! SQLite implementation of the Database trait
//!
//! This module provides a relational implementation of the Database trait
//! using rusqlite and tokio-rusqlite for async operations. Tokens live in their
//! own table and reference their principal by ID.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::OptionalExtension;
use std::time::Duration;
use tokio_rusqlite::Connection;

use super::migrations::{migration_version, CREATE_SCHEMA, TOKENS_TABLE};
use super::{Database, TokenAssociation};
use crate::auth::token::generate_token_id;
use crate::error::DbError;
use crate::models::{NewToken, Principal, Token};

const TOKEN_COLUMNS: &str =
    "id, principal_id, digest, last_used_at, expires_in_ms, ip_address, user_agent, created_at";

/// SQLite database implementation
pub struct SqliteDatabase {
    conn: Connection,
}

impl SqliteDatabase {
    /// Create a new SQLite database connection
    ///
    /// Use `:memory:` for in-memory database or a file path for persistent storage.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let conn = Connection::open(path).await?;
        let version = migration_version();

        // Run migrations
        conn.call(move |conn| {
            conn.execute_batch(CREATE_SCHEMA)?;
            conn.pragma_update(None, "user_version", version)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Create a new in-memory database (useful for testing)
    pub async fn in_memory() -> Result<Self, DbError> {
        Self::new(":memory:").await
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    fn token_association(&self) -> Option<TokenAssociation> {
        Some(TokenAssociation::Relational {
            table: TOKENS_TABLE.to_string(),
        })
    }

    // =========================================================================
    // Principal operations
    // =========================================================================

    async fn insert_principal(&self, principal: &Principal) -> Result<(), DbError> {
        let id = principal.id.clone();
        let lookup_key = principal.lookup_key.clone();
        let created_at = format_datetime(principal.created_at);

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO principals (id, lookup_key, created_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![id, lookup_key, created_at],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| constraint_violation(e.into()))
    }

    async fn find_principal_by_lookup_key(
        &self,
        key: &str,
    ) -> Result<Option<Principal>, DbError> {
        let key = key.to_string();

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, lookup_key, created_at FROM principals WHERE lookup_key = ?1",
                )?;

                let result = stmt
                    .query_row([&key], |row| {
                        Ok(Principal {
                            id: row.get(0)?,
                            lookup_key: row.get(1)?,
                            created_at: parse_datetime(2, row.get(2)?)?,
                        })
                    })
                    .optional()?;

                Ok(result)
            })
            .await
            .map_err(Into::into)
    }

    // =========================================================================
    // Token operations
    // =========================================================================

    async fn digest_exists(&self, digest: &str) -> Result<bool, DbError> {
        let digest = digest.to_string();

        self.conn
            .call(move |conn| {
                let found = conn
                    .query_row(
                        &format!("SELECT 1 FROM {} WHERE digest = ?1 LIMIT 1", TOKENS_TABLE),
                        [&digest],
                        |_| Ok(()),
                    )
                    .optional()?;
                Ok(found.is_some())
            })
            .await
            .map_err(Into::into)
    }

    async fn create_token(&self, owner_id: &str, token: &NewToken) -> Result<Token, DbError> {
        let stored = Token::from_new(generate_token_id(), owner_id, token);
        let row = stored.clone();

        self.conn
            .call(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO {} ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                        TOKENS_TABLE, TOKEN_COLUMNS
                    ),
                    rusqlite::params![
                        row.id,
                        row.principal_id,
                        row.digest,
                        format_datetime(row.last_used_at),
                        row.expires_in.map(duration_to_millis),
                        row.ip_address,
                        row.user_agent,
                        format_datetime(row.created_at)
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| constraint_violation(e.into()))?;

        Ok(stored)
    }

    async fn find_token_by_digest(
        &self,
        owner_id: &str,
        digest: &str,
    ) -> Result<Option<Token>, DbError> {
        let owner_id = owner_id.to_string();
        let digest = digest.to_string();

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM {} WHERE principal_id = ?1 AND digest = ?2",
                    TOKEN_COLUMNS, TOKENS_TABLE
                ))?;

                let mut tokens = stmt
                    .query_map([&owner_id, &digest], row_to_token)?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(tokens.pop())
            })
            .await
            .map_err(Into::into)
    }

    async fn list_tokens_by_last_used(&self, owner_id: &str) -> Result<Vec<Token>, DbError> {
        let owner_id = owner_id.to_string();

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    r#"
                    SELECT {} FROM {}
                    WHERE principal_id = ?1
                    ORDER BY last_used_at DESC, rowid DESC
                    "#,
                    TOKEN_COLUMNS, TOKENS_TABLE
                ))?;

                let tokens = stmt
                    .query_map([&owner_id], row_to_token)?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(tokens)
            })
            .await
            .map_err(Into::into)
    }

    async fn update_token_last_used(&self, id: &str, at: DateTime<Utc>) -> Result<(), DbError> {
        let id = id.to_string();
        let at = format_datetime(at);

        let rows = self
            .conn
            .call(move |conn| {
                let rows = conn.execute(
                    &format!("UPDATE {} SET last_used_at = ?1 WHERE id = ?2", TOKENS_TABLE),
                    rusqlite::params![at, id],
                )?;
                Ok(rows)
            })
            .await?;

        if rows == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn delete_token(&self, id: &str) -> Result<(), DbError> {
        let id = id.to_string();

        self.conn
            .call(move |conn| {
                conn.execute(&format!("DELETE FROM {} WHERE id = ?1", TOKENS_TABLE), [&id])?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }
}

/// Map a SQLite row to a Token
fn row_to_token(row: &rusqlite::Row<'_>) -> rusqlite::Result<Token> {
    Ok(Token {
        id: row.get(0)?,
        principal_id: row.get(1)?,
        digest: row.get(2)?,
        last_used_at: parse_datetime(3, row.get(3)?)?,
        expires_in: row
            .get::<_, Option<i64>>(4)?
            .map(|ms| Duration::from_millis(ms.max(0) as u64)),
        ip_address: row.get(5)?,
        user_agent: row.get(6)?,
        created_at: parse_datetime(7, row.get(7)?)?,
    })
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored datetime column
fn parse_datetime(idx: usize, s: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Whole milliseconds, rounded up so a non-zero window never stores as zero
fn duration_to_millis(d: Duration) -> i64 {
    let millis = d.as_millis() + u128::from(d.subsec_nanos() % 1_000_000 != 0);
    i64::try_from(millis).unwrap_or(i64::MAX)
}

/// Surface UNIQUE violations as a distinct error kind
fn constraint_violation(err: DbError) -> DbError {
    match err {
        DbError::Sqlite(rusqlite::Error::SqliteFailure(e, msg))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            DbError::ConstraintViolation(msg.unwrap_or_else(|| e.to_string()))
        }
        other => other,
    }
}
