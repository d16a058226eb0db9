//! Application Services
//!
//! The relay core and the pieces it is built from.
//!
//! - `relay`: Single owner of registry, client channels and upstream link
//! - `actor`: Task that feeds relay events to the core one at a time
//! - `link`: Upstream Link Manager state machine
//! - `router`: Fan-out of upstream ticks to interested clients
//! - `reconnect`: Exponential backoff policy
//! - `status`: Snapshot published for health reporting

pub mod actor;
pub mod link;
pub mod reconnect;
pub mod relay;
pub mod router;
pub mod status;

pub use actor::{RelayHandle, RelaySettings, spawn_relay};
pub use link::{CloseOutcome, LinkState, UpstreamLink};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use relay::{RelayEvent, RelayState, ReconnectTimer};
pub use router::FanOutRouter;
pub use status::{RelayStatus, StatusSnapshot};
