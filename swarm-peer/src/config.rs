//! Load config from file and environment.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use swarm_core::PeerId;
use tracing::warn;

use crate::udp::UdpSettings;

/// Peer configuration. File: ~/.config/swarmchat/config.toml or /etc/swarmchat/config.toml.
/// Env overrides: SWARMCHAT_BIND, SWARMCHAT_PEER_ID, SWARMCHAT_TOKEN, SWARMCHAT_WAIT_MS.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// UDP bind address (default 0.0.0.0:45800).
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Fixed local peer id; drawn at random when unset.
    #[serde(default)]
    pub peer_id: Option<u32>,
    /// Swarm token; datagrams carrying another token are ignored.
    #[serde(default = "default_token")]
    pub token: String,
    /// Upper bound on one loop wait, in milliseconds (default 100).
    #[serde(default = "default_wait_ms")]
    pub wait_ms: u64,
    /// Known peer addresses, keyed by peer id: `"3" = "10.0.0.5:45800"`.
    #[serde(default)]
    pub peers: BTreeMap<String, String>,
    /// Static alias table: `lobby = 3`.
    #[serde(default)]
    pub aliases: BTreeMap<String, u32>,
}

fn default_bind() -> String {
    "0.0.0.0:45800".to_string()
}
fn default_token() -> String {
    "swarmchat".to_string()
}
fn default_wait_ms() -> u64 {
    100
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            peer_id: None,
            token: default_token(),
            wait_ms: default_wait_ms(),
            peers: BTreeMap::new(),
            aliases: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Transport settings. Unparseable directory entries are skipped with a warning.
    pub fn udp_settings(&self) -> UdpSettings {
        let mut directory = Vec::new();
        for (id, addr) in &self.peers {
            match (id.parse::<PeerId>(), addr.parse::<SocketAddr>()) {
                (Ok(peer), Ok(addr)) if peer.is_valid() => directory.push((peer, addr)),
                _ => warn!(peer = %id, addr = %addr, "ignoring bad peer directory entry"),
            }
        }
        let aliases = self
            .aliases
            .iter()
            .filter(|(_, &id)| id != 0)
            .map(|(name, &id)| (name.to_lowercase(), PeerId(id)))
            .collect();
        UdpSettings {
            peer_id: self.peer_id.map(PeerId).filter(PeerId::is_valid),
            directory,
            aliases,
        }
    }
}

/// Load config: explicit file if given (must parse), otherwise the first standard
/// location that exists, then env vars on top.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let mut c = match explicit {
        Some(path) => load_path(path)?,
        None => load_file().unwrap_or_default(),
    };
    apply_env(&mut c, |key| std::env::var(key).ok());
    Ok(c)
}

/// Apply `SWARMCHAT_*` overrides read through `var`. Values that do not parse are ignored.
pub fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("SWARMCHAT_BIND") {
        c.bind = s;
    }
    if let Some(s) = var("SWARMCHAT_PEER_ID") {
        if let Ok(id) = s.parse::<u32>() {
            c.peer_id = Some(id);
        }
    }
    if let Some(s) = var("SWARMCHAT_TOKEN") {
        c.token = s;
    }
    if let Some(s) = var("SWARMCHAT_WAIT_MS") {
        if let Ok(ms) = s.parse::<u64>() {
            c.wait_ms = ms;
        }
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/swarmchat/config.toml"));
    }
    out.push(PathBuf::from("/etc/swarmchat/config.toml"));
    out
}

fn load_path(path: &Path) -> anyhow::Result<Config> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str::<Config>(&s).with_context(|| format!("parsing config {}", path.display()))
}

fn load_file() -> Option<Config> {
    let path = config_paths().into_iter().find(|p| p.exists())?;
    match load_path(&path) {
        Ok(c) => Some(c),
        Err(e) => {
            warn!(error = %format!("{:#}", e), "using default config");
            None
        }
    }
}
