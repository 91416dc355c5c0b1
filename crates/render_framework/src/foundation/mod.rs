//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used throughout the framework:
//! - Math types and transform helpers
//! - Generational handle types
//! - Logging utilities

pub mod math;
pub mod collections;
pub mod logging;
