//! ui
//!
//! Terminal output for the operator.
//!
//! # Modules
//!
//! - [`output`] - Verbosity-aware printing and the final run summary
//!
//! # Design
//!
//! Diagnostics go through `tracing`; this module only prints what the
//! operator is meant to read: command results and the run summary.

pub mod output;
