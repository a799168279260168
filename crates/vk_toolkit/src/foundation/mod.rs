//! Foundation module - Core utilities and types
//!
//! - Math types and transforms
//! - Logging bootstrap

pub mod logging;
pub mod math;
