//! Core library for the Sistema A notes client.
//!
//! - `config`: TOML configuration and paths
//! - `logging`: tracing subscriber setup
//! - `auth`: session provider boundary and the OIDC implementation
//! - `api`: REST client for the notes API
//! - `notes`: the notes view-model

pub mod api;
pub mod auth;
pub mod config;
pub mod logging;
pub mod notes;
