use std::net::{Ipv4Addr, SocketAddr};

use serde::{Deserialize, Serialize};

/// Upstream resolvers answer on the standard DNS port.
const UPSTREAM_PORT: u16 = 53;

/// Named upstream pairs recognized by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamPreset {
    #[default]
    Quad9,
    Cloudflare,
}

impl UpstreamPreset {
    /// The (primary, secondary) addresses of this preset.
    pub fn servers(self) -> (SocketAddr, SocketAddr) {
        let (primary, secondary) = match self {
            Self::Quad9 => (Ipv4Addr::new(9, 9, 9, 9), Ipv4Addr::new(149, 112, 112, 112)),
            Self::Cloudflare => (Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(1, 0, 0, 1)),
        };
        (
            SocketAddr::new(primary.into(), UPSTREAM_PORT),
            SocketAddr::new(secondary.into(), UPSTREAM_PORT),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub upstream: UpstreamPreset,
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_ms: u64,
    /// Zone file loaded into the local relation at startup; empty = none.
    #[serde(default)]
    pub zone_file: String,
    /// Default TTL for cached records lacking one.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: u32,
    /// Advisory cache bound; sizes the cache map up front.
    #[serde(default = "default_max_cache_entries")]
    pub max_cache_entries: usize,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default = "default_control_socket")]
    pub control_socket: String,
}

fn default_listen_port() -> u16 {
    53
}
fn default_listen_addr() -> String {
    "0.0.0.0".to_string()
}
fn default_upstream_timeout() -> u64 {
    3000
}
fn default_cache_ttl() -> u32 {
    300
}
fn default_max_cache_entries() -> usize {
    1000
}
fn default_control_socket() -> String {
    "/run/charon.sock".to_string()
}

impl Default for Config {
    fn default() -> Self {
        serde_json::from_str("{}").unwrap()
    }
}
