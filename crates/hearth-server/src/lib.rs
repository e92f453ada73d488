//! # Hearth Server Library
//!
//! Wiring and startup utilities for the Hearth server binary.

pub mod app;
pub mod startup;
