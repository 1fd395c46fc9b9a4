//! Amon master: the authoritative monitoring API.
//!
//! Persists contacts, monitors and probes in the cloud's directory
//! service, authorizes writes, serves probe manifests to relays, and
//! dispatches inbound events to notification plugins.

pub mod accounts;
pub mod authz;
pub mod cache;
pub mod config;
pub mod directory;
pub mod dispatch;
pub mod mapi;
pub mod notify;
pub mod store;
pub mod web;
