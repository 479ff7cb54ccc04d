//! Common utilities and types shared across the signaling relay crates.

#![warn(clippy::pedantic)]

/// Module for room, user and connection identifiers
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for user token validation (claims, size limits, iat checks)
pub mod jwt;
