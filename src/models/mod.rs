//! Domain models for device-tokens
//!
//! This module contains the principal and token models shared by the issuer,
//! the authentication strategy and the storage backends.

pub mod principal;
pub mod token;

pub use principal::Principal;
pub use token::{NewToken, RequestContext, Token};
