//! Shared utilities for billflow integration tests.
//!
//! - `TestHarness` wires a pipeline to a manual clock, a capturing notifier
//!   and either an in-memory or a temp-file SQLite store
//! - builders for configs, stub strategies and text-layer PDFs

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::{StoreKind, TestHarness};
