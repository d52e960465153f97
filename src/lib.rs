//! igrelease - Release pipeline for FHIR Implementation Guides
//!
//! igrelease drives an Implementation Guide from source to published site:
//! it synchronizes the source, webroot, history-template and registry
//! repositories, runs the external IG build tool, segregates oversized
//! artifacts, publishes the output into a long-lived branch of the webroot,
//! and opens pull requests against the webroot and the registry.
//!
//! # Architecture
//!
//! The codebase follows a strict layered architecture:
//!
//! - [`cli`] - Command-line interface layer (parses args, delegates to engine)
//! - [`engine`] - Pipeline stages and the controller state machine
//! - [`core`] - Domain types, configuration, workspace layout
//! - [`git`] - Single interface for all Git operations
//! - [`process`] - External process execution with timeouts
//! - [`forge`] - Abstraction for the pull request host (GitHub)
//! - [`auth`] - Bearer credential resolution
//! - [`ui`] - Terminal output
//!
//! # Correctness Invariants
//!
//! 1. Configuration is fully resolved and validated before any stage runs
//! 2. Publishing only ever touches its own subpath of the destination
//! 3. A failed stage is reported with its cause; nothing is rolled back
//!    silently
//! 4. Pull request failures never unwind a successful publish

pub mod auth;
pub mod cli;
pub mod core;
pub mod engine;
pub mod forge;
pub mod git;
pub mod process;
pub mod ui;
