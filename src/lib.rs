//! device-tokens - Multi-device bearer tokens for principals
//!
//! This crate issues opaque bearer tokens per device, stores only their
//! digests, verifies them with a sliding expiry and authenticates requests
//! carrying a lookup key and token pair in headers.

pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod models;
