//! Database migrations for device-tokens
//!
//! This module contains SQL migrations for the SQLite database schema.

/// Table holding principal tokens
pub const TOKENS_TABLE: &str = "authentication_tokens";

/// SQL statement to create the initial database schema
pub const CREATE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Principals table
CREATE TABLE IF NOT EXISTS principals (
    id TEXT PRIMARY KEY,
    lookup_key TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

-- Authentication tokens table
CREATE TABLE IF NOT EXISTS authentication_tokens (
    id TEXT PRIMARY KEY,
    principal_id TEXT NOT NULL REFERENCES principals(id) ON DELETE CASCADE,
    digest TEXT NOT NULL UNIQUE,
    last_used_at TEXT NOT NULL,
    expires_in_ms INTEGER,
    ip_address TEXT,
    user_agent TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tokens_owner_last_used
    ON authentication_tokens(principal_id, last_used_at DESC);
"#;

/// Get the migration version
pub fn migration_version() -> i32 {
    1
}
