use crate::fnv;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameId {
    FalloutNv,
}

impl Default for GameId {
    fn default() -> Self {
        GameId::FalloutNv
    }
}

impl GameId {
    pub fn display_name(self) -> &'static str {
        match self {
            GameId::FalloutNv => fnv::GAME_NAME,
        }
    }

    /// Host-side game id used by the mod manager.
    pub fn as_str(self) -> &'static str {
        match self {
            GameId::FalloutNv => fnv::SHORTNAME,
        }
    }

    pub fn nexus_domain(self) -> &'static str {
        match self {
            GameId::FalloutNv => "newvegas",
        }
    }

    pub fn matches(self, host_id: Option<&str>) -> bool {
        host_id == Some(self.as_str())
    }
}

/// Storefront the game was discovered through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStore {
    #[default]
    Steam,
    Gog,
    Epic,
}

impl GameStore {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "steam" => Some(GameStore::Steam),
            "gog" => Some(GameStore::Gog),
            "epic" => Some(GameStore::Epic),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GameStore::Steam => "steam",
            GameStore::Gog => "gog",
            GameStore::Epic => "epic",
        }
    }
}

pub fn detect_game_root(game: GameId, game_root_override: Option<&Path>) -> Result<fnv::GamePaths> {
    match game {
        GameId::FalloutNv => fnv::detect_paths(game_root_override),
    }
}
