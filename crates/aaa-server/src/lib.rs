//! RADIUS AAA server for VPN access control.
//!
//! Listens on the standard authentication and accounting ports,
//! admits users against per-account concurrency and traffic limits,
//! and tracks live sessions in memory. The wire protocol lives in
//! [`aaa_proto`]; this crate is everything above it: NAS and account
//! registries, the session store, the request engines and the UDP
//! dispatch loop.

pub mod cache;
pub mod config;
pub mod engine;
pub mod events;
pub mod reaper;
pub mod registry;
pub mod server;
pub mod store;

pub use cache::ResponseCache;
pub use config::{Config, ConfigError};
pub use events::{AaaEvent, EventBus};
pub use reaper::Reaper;
pub use registry::{
    Account, AccountRegistry, NasClient, NasRegistry, StaticAccountRegistry, StaticNasRegistry,
};
pub use server::{AaaServer, ServerError};
pub use store::{Session, SessionStore};
