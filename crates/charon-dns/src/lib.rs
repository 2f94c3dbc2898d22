//! Charon: a caching DNS resolver for StyxOS. Answers UDP queries from
//! authoritative local zones, a TTL-bounded cache of forwarded answers,
//! or an upstream resolver pair, and is administered at runtime over a
//! Unix control socket.

pub mod config;
pub mod control;
pub mod packet;
pub mod records;
pub mod resolver;
pub mod server;
pub mod store;
pub mod upstream;

pub use config::Config;
pub use store::Store;
