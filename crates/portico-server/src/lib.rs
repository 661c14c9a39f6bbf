//! Portico server assembly: bootstrap configuration, application state,
//! the administrative API, and health endpoints.
//!
//! The binary in `main.rs` wires the PostgreSQL control plane into these
//! pieces; integration tests wire in in-memory stores instead.

pub mod admin;
pub mod app;
pub mod bootstrap;
pub mod health;
