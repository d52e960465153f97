//! core
//!
//! Core domain types, schemas, and workspace plumbing for igrelease.
//!
//! # Modules
//!
//! - [`types`] - Strong types: BranchName, Oid, RepoUrl, Subpath
//! - [`config`] - Configuration layers, loading and resolution
//! - [`sparse`] - Sparse checkout selection
//! - [`pubreq`] - Publication request file
//! - [`paths`] - Centralized path routing for the workspace
//! - [`lock`] - Exclusive working tree lock
//!
//! # Design Principles
//!
//! - Strong typing prevents invalid states at compile time
//! - Configuration merge is pure; I/O stays at the edges
//! - All path computation goes through one place

pub mod config;
pub mod lock;
pub mod paths;
pub mod pubreq;
pub mod sparse;
pub mod types;
