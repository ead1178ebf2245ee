//! Core business logic for Procura.
//!
//! This crate contains pure business logic with ZERO web or database dependencies.
//! Persistence sits behind the traits in `store`; an in-memory implementation is
//! provided for tests and embedding.
//!
//! # Modules
//!
//! - `workflow` - Document approval cases, band rules, and OTP verification
//! - `budget` - Budget accounts, items, postings, and increases
//! - `store` - Storage traits, in-memory store, and per-entity locks
//! - `audit` - Append-only audit events

pub mod audit;
pub mod budget;
pub mod store;
pub mod workflow;
