//! Relay runtime for `ios_webkit_debug_proxy`.
//!
//! - **Discovery**: device and page listings from the proxy, turned into
//!   [`DeviceTarget`](srd_protocol::DeviceTarget)s with upstream socket urls
//! - **Sessions**: the live set, one entry per bridged inspector connection
//! - **Relay**: opening a page socket for a target and pumping messages
//!   between it and the inspector client
//!
//! ```text
//! inspector ──ws──▶ Relay ──ws──▶ ios_webkit_debug_proxy ──▶ device page
//!                    │
//!                    └──http──▶ /json (devices) ──▶ <device port>/json (pages)
//! ```

pub mod discovery;
pub mod endpoint;
pub mod error;
pub mod relay;
pub mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use discovery::{Discovered, Discovery};
pub use endpoint::UpstreamEndpoint;
pub use error::{Error, Result};
pub use relay::{CloseFrame, Message, PendingSession, Relay, RelayOptions, SessionEnd, Side, UpstreamSocket};
pub use session::{Activity, SessionGuard, SessionId, SessionRegistry};
