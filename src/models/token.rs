//! Token-related domain models
//!
//! This module defines the stored token, the attributes persisted at issuance,
//! and the request provenance captured alongside them.

use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use http::{header, HeaderMap};
use serde::{Deserialize, Serialize};

/// Authentication token stored for a principal
///
/// Only the digest of the secret is kept; the raw value is handed to the
/// client once at issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Unique token ID
    pub id: String,

    /// Owning principal ID
    pub principal_id: String,

    /// HMAC-SHA256 hex digest of the raw secret
    pub digest: String,

    /// Last verified use (set at creation)
    pub last_used_at: DateTime<Utc>,

    /// Sliding expiry window (None or zero = never expires)
    pub expires_in: Option<Duration>,

    /// Remote address at issuance
    pub ip_address: Option<String>,

    /// User agent at issuance
    pub user_agent: Option<String>,

    /// When the token was created
    pub created_at: DateTime<Utc>,
}

impl Token {
    /// Build a stored token from its issuance attributes
    pub fn from_new(
        id: impl Into<String>,
        principal_id: impl Into<String>,
        new: &NewToken,
    ) -> Self {
        Self {
            id: id.into(),
            principal_id: principal_id.into(),
            digest: new.digest.clone(),
            last_used_at: new.last_used_at,
            expires_in: new.expires_in,
            ip_address: new.ip_address.clone(),
            user_agent: new.user_agent.clone(),
            created_at: new.last_used_at,
        }
    }

    /// Whether the token carries an expiry window at all
    pub fn expires(&self) -> bool {
        matches!(self.expires_in, Some(d) if !d.is_zero())
    }

    /// Check if the token is usable at `now`
    ///
    /// Expiry slides: the window is measured from `last_used_at`, so every
    /// recorded use extends it.
    pub fn is_unexpired_at(&self, now: DateTime<Utc>) -> bool {
        let expires_in = match self.expires_in {
            Some(d) if !d.is_zero() => d,
            _ => return true,
        };

        match TimeDelta::from_std(expires_in)
            .ok()
            .and_then(|delta| self.last_used_at.checked_add_signed(delta))
        {
            Some(deadline) => now <= deadline,
            // Window too large to represent
            None => true,
        }
    }

    /// Check if the token is usable now
    pub fn is_unexpired(&self) -> bool {
        self.is_unexpired_at(Utc::now())
    }

    /// Whether a verified use at `now` should rewrite `last_used_at`
    pub fn needs_touch_at(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        match TimeDelta::from_std(interval) {
            Ok(interval) => now.signed_duration_since(self.last_used_at) > interval,
            Err(_) => false,
        }
    }
}

/// Attributes persisted when a token is issued
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewToken {
    /// HMAC-SHA256 hex digest of the raw secret
    pub digest: String,

    /// Issuance time
    pub last_used_at: DateTime<Utc>,

    /// Optional sliding expiry
    pub expires_in: Option<Duration>,

    /// Remote address of the issuing request
    pub ip_address: Option<String>,

    /// User agent of the issuing request
    pub user_agent: Option<String>,
}

impl NewToken {
    /// Create issuance attributes for a digest
    pub fn new(digest: impl Into<String>, context: &RequestContext) -> Self {
        Self {
            digest: digest.into(),
            last_used_at: Utc::now(),
            expires_in: None,
            ip_address: context.remote_ip.map(|ip| ip.to_string()),
            user_agent: context.user_agent.clone(),
        }
    }

    /// Set the sliding expiry window
    pub fn with_expires_in(mut self, expires_in: Option<Duration>) -> Self {
        self.expires_in = expires_in;
        self
    }
}

/// Provenance of the request that asked for a token
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Peer address
    pub remote_ip: Option<IpAddr>,

    /// `User-Agent` header value
    pub user_agent: Option<String>,
}

impl RequestContext {
    /// Create a context from explicit values
    pub fn new(remote_ip: Option<IpAddr>, user_agent: Option<String>) -> Self {
        Self {
            remote_ip,
            user_agent,
        }
    }

    /// Capture provenance from request headers and the peer address
    pub fn from_headers(headers: &HeaderMap, remote_ip: Option<IpAddr>) -> Self {
        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        Self {
            remote_ip,
            user_agent,
        }
    }
}
