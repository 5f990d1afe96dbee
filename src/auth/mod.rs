//! Token authentication for device-tokens
//!
//! This module provides the token lifecycle and request authentication:
//! - Secret generation and digesting
//! - Issuing, verifying, touching and revoking tokens per principal
//! - A header strategy that plugs into a strategy chain

pub mod issuer;
pub mod strategy;
pub mod token;

pub use issuer::{IssuerConfig, TokenIssuer, DEFAULT_TOUCH_INTERVAL, MAXIMUM_TOKENS_PER_USER};
pub use strategy::{Credentials, HeaderNames, Strategy, StrategyChain, TokenAuthenticatable};
pub use token::{digest_secret, generate_secret, DIGEST_KEY, SECRET_LENGTH};
