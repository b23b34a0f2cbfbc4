//! feel-flow - Authentication and access-control core for a mood journal API
//!
//! This crate provides password credentials, scoped opaque tokens,
//! version-guarded identity updates and per-client rate limiting, together
//! with the account flows and the HTTP layer built on top of them.

pub mod auth;
pub mod clock;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod server;
pub mod telemetry;
pub mod validator;
