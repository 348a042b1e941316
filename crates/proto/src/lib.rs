//! Shared types for the playwright-mcp proxy.
//!
//! This crate defines the data structures used across the proxy core and its
//! binary: instance/pool identifiers and lifecycle states, status reports,
//! the JSON-RPC wire types spoken to `playwright-mcp` children, the
//! hierarchical configuration tree with its environment loader, and the
//! error kinds observable to tool callers.

pub mod config;
pub mod rpc;
pub mod types;

pub use config::{ConfigError, ConfigTree};
pub use types::{ChildState, ErrorKind, InstanceId, LeaseInfo};
