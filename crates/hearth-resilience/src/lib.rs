//! # Hearth Resilience
//!
//! Bounded waits on store commands and an in-process rate limiter used when
//! the shared store cannot be reached.

pub mod local_limiter;
pub mod timeout;

pub use local_limiter::*;
pub use timeout::*;
