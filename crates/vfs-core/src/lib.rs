//! Core types, errors, and configuration for the vfs-monitor workspace.
//!
//! This crate provides the foundational types used across the workspace:
//!
//! - [`VfsPath`]: a cheap, reference-counted UTF-8 path with parent lookup,
//!   root test and child construction
//! - [`MonitorConfig`]: tunables for the notification service
//! - [`ConfigError`]: configuration loading and validation errors

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod path;

pub use config::{BackendKind, MonitorConfig};
pub use error::ConfigError;
pub use path::VfsPath;
