//! Shared type definitions
//!
//! Configuration, chat message, and model types used across the crate.

pub mod config;
pub mod message;
pub mod model;
