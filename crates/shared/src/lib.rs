//! Shared types, errors, and configuration for Procura.
//!
//! This crate provides common types used across all other crates:
//! - Typed IDs for type-safe entity references
//! - Pagination types for store queries
//! - Application-wide error types and the error taxonomy
//! - Configuration management
//! - Tracing bootstrap

pub mod config;
pub mod error;
pub mod telemetry;
pub mod types;

pub use config::{AppConfig, ApprovalConfig, LoggingConfig};
pub use error::{AppError, AppResult, ErrorKind};
pub use telemetry::init_tracing;
