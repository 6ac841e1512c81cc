// src/models/server.rs
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Latency value for hosts that could not be reached or were never measured.
pub const LATENCY_UNKNOWN: u32 = 9999;

/// Country label used when no geolocation result is available.
pub const COUNTRY_UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub name: String,
    pub score: Option<i64>,
    pub ping: u32,
}

impl Player {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            score: None,
            ping: LATENCY_UNKNOWN,
        }
    }
}

/// One game server as reported by a master server.
///
/// Fields with a fixed meaning across protocols are named; anything
/// protocol-specific lands in `rules`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub host: String,
    pub name: String,
    pub game_id: String,
    pub game_type: Option<String>,
    pub game_name: Option<String>,
    pub game_mod: Option<String>,
    pub terrain: String,
    pub player_count: u32,
    pub player_limit: u32,
    pub password: bool,
    pub secure: bool,
    pub ping: u32,
    pub players: Vec<Player>,
    pub rules: BTreeMap<String, String>,
    pub master: Option<String>,
    pub country: String,
}

impl ServerInfo {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            name: String::new(),
            game_id: String::new(),
            game_type: None,
            game_name: None,
            game_mod: None,
            terrain: String::new(),
            player_count: 0,
            player_limit: 0,
            password: false,
            secure: false,
            ping: LATENCY_UNKNOWN,
            players: Vec::new(),
            rules: BTreeMap::new(),
            master: None,
            country: COUNTRY_UNKNOWN.to_string(),
        }
    }

    /// Host with any trailing `:port` removed.
    pub fn address(&self) -> &str {
        crate::utils::strip_port(&self.host)
    }
}
