//! Spagate - an edge gateway for single-page applications
//!
//! This library provides a small reverse proxy that:
//! - Forwards `/api/*` requests to a single configured upstream origin,
//!   rewriting the Host header to the upstream (origin-change semantics)
//! - Tunnels `/ws/*` WebSocket upgrades to the same upstream and relays
//!   frames bidirectionally for the tunnel's lifetime
//! - Serves a static asset bundle for every other path, falling back to
//!   the SPA entry document so a client-side router owns unmatched paths
//! - Resolves its configuration from the environment once at startup
//! - Uses connection pooling for efficient upstream communication

pub mod assets;
pub mod config;
pub mod error;
pub mod pool;
pub mod proxy;

/// Package name, for the startup banner
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
/// Package version, for the startup banner
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
