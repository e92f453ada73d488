//! REST API controllers.

pub mod cache_admin_controller;
pub mod health_controller;

pub use health_controller::*;
