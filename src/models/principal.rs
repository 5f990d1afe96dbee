//! Principal model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An entity that owns authentication tokens
///
/// Principals are resolved by `lookup_key`, which is distinct from any token
/// they hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Stable identifier used as the token owner reference
    pub id: String,

    /// Key presented by clients to name the principal
    pub lookup_key: String,

    /// When the principal was created
    pub created_at: DateTime<Utc>,
}

impl Principal {
    /// Create a new principal
    pub fn new(id: impl Into<String>, lookup_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            lookup_key: lookup_key.into(),
            created_at: Utc::now(),
        }
    }
}
