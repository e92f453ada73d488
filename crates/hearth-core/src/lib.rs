//! # Hearth Core
//!
//! Core types shared by every Hearth crate: the unified error enum,
//! the result alias, and logging initialisation.

pub mod error;
pub mod result;
pub mod telemetry;

pub use error::*;
pub use result::*;
pub use telemetry::*;
