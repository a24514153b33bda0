//! Infrastructure Layer
//!
//! Adapters for external systems: OAuth token endpoint, TTL cache store,
//! batch metrics REST API, and the streaming venue protocol.

pub mod auth;
pub mod cache;
pub mod rest;
pub mod stream;
pub mod telemetry;
