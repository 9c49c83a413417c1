use crate::{fnv, game::GameStore};
use anyhow::{Context, Result};
use directories::{BaseDirs, UserDirs};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub game_root: Option<PathBuf>,
    #[serde(default)]
    pub staging_path: Option<PathBuf>,
    #[serde(default)]
    pub documents_dir: Option<PathBuf>,
    #[serde(default)]
    pub game_store: GameStore,
    #[serde(default)]
    pub nexus_api_key: Option<String>,
    #[serde(default)]
    pub suppressed: Vec<String>,
    #[serde(default)]
    pub installer_timeout_secs: Option<u64>,
    #[serde(default)]
    pub debug_findings: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(skip)]
    path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            game_root: None,
            staging_path: None,
            documents_dir: None,
            game_store: GameStore::default(),
            nexus_api_key: None,
            suppressed: Vec::new(),
            installer_timeout_secs: None,
            debug_findings: false,
            log_level: default_log_level(),
            path: PathBuf::new(),
        }
    }
}

impl AppConfig {
    pub fn load_or_create() -> Result<Self> {
        let base_dir = base_data_dir()?;
        Self::load_or_create_in(&base_dir)
    }

    pub fn load_or_create_in(base_dir: &Path) -> Result<Self> {
        fs::create_dir_all(base_dir).context("create app data dir")?;
        let path = base_dir.join("config.json");
        if path.exists() {
            let raw = fs::read_to_string(&path).context("read app config")?;
            let mut config: AppConfig = serde_json::from_str(&raw).context("parse app config")?;
            config.path = path;
            return Ok(config);
        }

        let config = AppConfig {
            path,
            ..AppConfig::default()
        };
        config.save()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("create app data dir")?;
        }
        let raw = serde_json::to_string_pretty(self).context("serialize app config")?;
        fs::write(&self.path, raw).context("write app config")?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn data_dir(&self) -> PathBuf {
        self.path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    pub fn installer_timeout(&self) -> Option<Duration> {
        self.installer_timeout_secs.map(Duration::from_secs)
    }

    /// Configured documents folder, else the Proton prefix, else the user's.
    pub fn resolve_documents_dir(&self) -> Option<PathBuf> {
        if let Some(dir) = &self.documents_dir {
            return Some(dir.clone());
        }
        if let Some(dir) = fnv::proton_documents_dir() {
            return Some(dir);
        }
        UserDirs::new().and_then(|dirs| dirs.document_dir().map(Path::to_path_buf))
    }

    pub fn resolve_staging_path(&self) -> PathBuf {
        self.staging_path
            .clone()
            .unwrap_or_else(|| self.data_dir().join("mods"))
    }

    /// Returns false when the id was already suppressed.
    pub fn suppress(&mut self, id: &str) -> bool {
        if self.suppressed.iter().any(|existing| existing == id) {
            return false;
        }
        self.suppressed.push(id.to_string());
        true
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn base_data_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join("fnvsanity"))
}
