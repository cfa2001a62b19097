//! # sable-common
//!
//! Shared foundations for SableDB: the unified error type, typed
//! identifiers for pages, records and index positions, and the engine
//! configuration records.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

pub use error::{SableError, SableResult};
