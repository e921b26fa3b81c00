//! Common types shared across the debate signaling components.

#![warn(clippy::pedantic)]

/// Module for common identifier types
pub mod types;
