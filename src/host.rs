//! Interfaces to the mod-manager host.
//!
//! Probes never read global state: every invocation receives a
//! [`HostSnapshot`] and reaches the host only through the traits below.

use crate::{
    error::SanityError,
    fnv::{self, GamePaths},
    game::{GameId, GameStore},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, path::PathBuf};

#[derive(Debug, Clone, Default)]
pub struct HostSnapshot {
    pub active_game: Option<String>,
    pub discovery: Option<Discovery>,
    pub staging_path: Option<PathBuf>,
    pub documents_dir: Option<PathBuf>,
    pub profile: Option<ProfileState>,
    pub mods: Vec<ModRecord>,
}

#[derive(Debug, Clone)]
pub struct Discovery {
    pub path: PathBuf,
    pub store: GameStore,
}

#[derive(Debug, Clone)]
pub struct ProfileState {
    pub id: String,
    pub game_id: String,
    pub enabled_mods: HashSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModRecord {
    pub id: String,
    pub nexus_mod_id: Option<u64>,
    pub file_id: Option<u64>,
    pub installed: bool,
    pub installation_path: Option<PathBuf>,
}

impl HostSnapshot {
    pub fn is_active(&self, game: GameId) -> bool {
        game.matches(self.active_game.as_deref())
    }

    pub fn game_paths(&self) -> Option<GamePaths> {
        self.discovery
            .as_ref()
            .map(|discovery| GamePaths::from_root(&discovery.path))
    }

    pub fn mod_by_nexus_id(&self, nexus_mod_id: u64) -> Option<&ModRecord> {
        self.mods
            .iter()
            .find(|record| record.nexus_mod_id == Some(nexus_mod_id))
    }

    pub fn is_mod_enabled(&self, mod_id: &str) -> bool {
        self.profile
            .as_ref()
            .map(|profile| profile.enabled_mods.contains(mod_id))
            .unwrap_or(false)
    }

    /// Override markers only take effect with JIP LN NVSE loaded.
    pub fn jip_ln_nvse_enabled(&self) -> bool {
        match self.mod_by_nexus_id(fnv::JIP_LN_NVSE_MOD_ID) {
            Some(record) => self.is_mod_enabled(&record.id),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub id: Option<String>,
    pub kind: NotificationKind,
    pub message: String,
    pub allow_suppress: bool,
    pub display_ms: Option<u64>,
}

impl Notification {
    pub fn transient(kind: NotificationKind, message: impl Into<String>, display_ms: u64) -> Self {
        Self {
            id: None,
            kind,
            message: message.into(),
            allow_suppress: false,
            display_ms: Some(display_ms),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dialog {
    pub title: String,
    /// BBCode markup.
    pub body: String,
    pub buttons: Vec<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_notification(&self, notification: Notification);

    /// Returns the label of the pressed button, `None` if dismissed.
    async fn show_dialog(&self, dialog: Dialog) -> Option<String>;

    async fn suppress_notification(&self, id: &str);

    fn is_suppressed(&self, _id: &str) -> bool {
        false
    }

    async fn show_error(&self, title: &str, err: &anyhow::Error) {
        self.send_notification(Notification {
            id: None,
            kind: NotificationKind::Error,
            message: format!("{title}: {err:#}"),
            allow_suppress: false,
            display_ms: None,
        })
        .await;
    }
}

/// Host features that older hosts may lack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineCapabilities {
    pub login: bool,
    pub download_lookup: bool,
    pub mod_lookup: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub file_id: u64,
    pub category_id: u32,
    pub version: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct DownloadInfo {
    pub game: String,
    pub name: String,
    pub mod_id: u64,
    pub file_id: u64,
}

/// Download, install and deployment services of the host.
#[async_trait]
pub trait ModPipeline: Send + Sync {
    fn capabilities(&self) -> PipelineCapabilities;

    async fn ensure_logged_in(&self) -> Result<(), SanityError>;

    async fn mod_files(&self, game: &str, nexus_mod_id: u64) -> Result<Vec<RemoteFile>, SanityError>;

    async fn find_download(&self, game: &str, nexus_mod_id: u64, file_id: u64) -> Option<String>;

    /// Starts a download from an `nxm://` locator and resolves to its id.
    async fn start_download(&self, url: &str, info: &DownloadInfo) -> Result<String, SanityError>;

    async fn find_installed_mod(&self, game: &str, nexus_mod_id: u64) -> Option<ModRecord>;

    /// Installs a finished download and resolves to the new mod id.
    async fn start_install(&self, download_id: &str) -> Result<String, SanityError>;

    async fn last_active_profile(&self, game: &str) -> Option<String>;

    async fn enable_mods(&self, profile_id: &str, mod_ids: &[String]) -> Result<(), SanityError>;

    async fn deploy_single_mod(&self, game: &str, mod_id: &str) -> Result<(), SanityError>;

    async fn deploy_all(&self) -> Result<(), SanityError>;

    async fn set_deployment_necessary(&self, game: &str, necessary: bool);

    async fn mod_install_path(&self, game: &str, mod_id: &str) -> Option<PathBuf>;

    async fn download_script_extender(&self, game: &str) -> Result<(), SanityError>;

    async fn open_url(&self, url: &str) -> Result<(), SanityError>;
}
