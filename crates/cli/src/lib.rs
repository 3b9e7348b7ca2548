//! `serve` command for iOS Safari remote debugging.
//!
//! Serves a built WebKit Web Inspector frontend and relays its protocol
//! connections to `ios_webkit_debug_proxy`, all on one listening address.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod server;
