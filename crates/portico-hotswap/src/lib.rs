//! Atomic hot-swap of running modules and safe package import/export
//!
//! The coordinator replaces a module's descriptor and router at runtime
//! without stopping the host process: pre-validate the candidate in
//! isolation, then swap all-or-nothing with rollback on failure. Package
//! import is the system's security boundary against malicious bundles;
//! every file path and content is sanitized before anything touches the
//! filesystem.

pub mod coordinator;
pub mod fsutil;
pub mod sanitize;

pub use coordinator::{HotswapCoordinator, SwapPhase, SwapReport};
