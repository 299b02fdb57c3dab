//! Rendezvous Node -- signaling relay for peer-to-peer applications.
//!
//! Clients connect over WebSocket to an app path, register addresses, open
//! links to each other and relay messages through the server until they can
//! talk directly. Modules are public so integration tests and main.rs can
//! drive pools and sessions without a network.

pub mod config;
pub mod peer_pool;
pub mod relay;
pub mod server;
pub mod session;
pub mod transport;
pub mod ws_transport;

use std::path::PathBuf;

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME").map(PathBuf::from) {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
