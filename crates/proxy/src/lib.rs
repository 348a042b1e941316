//! Core of the playwright-mcp proxy.
//!
//! The proxy sits between an MCP client and a fleet of long-lived
//! `playwright-mcp` child processes organized into named pools. Each inbound
//! tool call leases exactly one child, multiplexes a JSON-RPC request onto
//! its stdio, intercepts oversize binary payloads in the result, and caches
//! paginated accessibility snapshots for later page-wise retrieval.
//!
//! Module map:
//!
//! - [`blob`] — content-addressed, TTL-bounded on-disk cache for large
//!   binary payloads.
//! - [`snapshot`] — in-memory cache of paginated, post-processed snapshots.
//! - [`child`] — one child process: spawn, stdio framing, request/response
//!   correlation, health probes, termination.
//! - [`intercept`] — replaces oversize base64/binary fields in tool results
//!   with blob references.
//! - [`pool`] — a named group of children with a blocking FIFO lease queue
//!   and a background health loop.
//! - [`registry`] — owns all pools, validates the frozen configuration, and
//!   routes `(pool, instance)` selections.
//! - [`dispatch`] — the front door for each inbound tool call.

pub mod blob;
pub mod child;
pub mod dispatch;
pub mod intercept;
pub mod pool;
pub mod registry;
pub mod snapshot;

#[cfg(test)]
pub(crate) mod testutil;
