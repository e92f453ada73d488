//! # Hearth REST
//!
//! HTTP surface of the Hearth caching layer using Axum.
//! Provides response caching and rate limiting middleware, health checks,
//! and optional cache administration routes.

pub mod controllers;
pub mod middleware;
pub mod responses;
pub mod router;
pub mod state;

pub use router::*;
pub use state::*;
