//! Amulet - a backend for license activation, credit accounting, and pooled
//! upstream API key checkout.
//!
//! A license carries a credit balance and binds to a single device on first
//! use. Clients validate with `check`, lease an upstream credential with
//! `next_api_key`, pay for work with `debit` (or reclaim it with `refund`),
//! and hand the credential back with `release_api_key`. An admin surface
//! manages licenses, the key pool, per-model prices, and a global config row.
//!
//! # Features
//!
//! - `server` - Server components (handlers, store). Enabled by default.
//! - `sqlite` - SQLite storage backend. Enabled by default.
//! - `postgres` - PostgreSQL storage backend.
//! - `admin-api` - Admin CRUD surface. Enabled by default.

// Core modules (always available)
pub mod config;
pub mod errors;
pub mod key_generation;

// Server-related modules (requires "server" feature)
#[cfg(feature = "server")]
#[path = "server/mod.rs"]
pub mod server;
