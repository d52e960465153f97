//! forge
//!
//! Abstraction for remote forges.
//!
//! # Architecture
//!
//! The `Forge` trait defines the interface for interacting with remote
//! hosting services. The pipeline holds a [`ForgeFactory`] and asks it for
//! a forge per target repository rather than importing a specific
//! implementation.
//!
//! - Forge operations are invoked only after a publish was pushed
//! - Forge failures never unwind a publish
//!
//! # Modules
//!
//! - `traits`: Core `Forge` trait and request/response types
//! - [`github`]: GitHub implementation using the REST API
//! - [`mock`]: Mock implementation for deterministic testing

pub mod github;
pub mod mock;
mod traits;

pub use traits::*;
