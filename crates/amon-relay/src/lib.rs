//! Amon relay: the per-node middle tier.
//!
//! Pulls probe manifests from the master for every target on this node
//! (tenant sandboxes plus the global zone), serves them to agents over
//! per-target unix sockets, and forwards agent events upstream.

pub mod config;
pub mod forward;
pub mod manifest;
pub mod poll;
pub mod server;
