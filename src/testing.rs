//! Recording host used by unit tests.

use crate::{
    error::SanityError,
    host::{
        Dialog, DownloadInfo, ModPipeline, ModRecord, Notification, Notifier,
        PipelineCapabilities, RemoteFile,
    },
};
use async_trait::async_trait;
use std::{
    collections::HashSet,
    path::PathBuf,
    sync::Mutex,
};

#[derive(Default)]
pub struct RecordingHost {
    pub capabilities: PipelineCapabilities,
    pub files: Vec<RemoteFile>,
    pub fail_files: bool,
    pub install_path: Option<PathBuf>,
    pub dialog_answer: Option<String>,
    pub calls: Mutex<Vec<String>>,
    pub notifications: Mutex<Vec<Notification>>,
    pub dialogs: Mutex<Vec<Dialog>>,
    pub suppressed: Mutex<HashSet<String>>,
}

impl RecordingHost {
    pub fn capable() -> Self {
        Self {
            capabilities: PipelineCapabilities {
                login: true,
                download_lookup: true,
                mod_lookup: true,
            },
            ..Self::default()
        }
    }

    fn record(&self, call: impl Into<String>) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call.into());
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.notifications
            .lock()
            .map(|items| items.iter().map(|item| item.message.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingHost {
    async fn send_notification(&self, notification: Notification) {
        if let Ok(mut items) = self.notifications.lock() {
            items.push(notification);
        }
    }

    async fn show_dialog(&self, dialog: Dialog) -> Option<String> {
        if let Ok(mut items) = self.dialogs.lock() {
            items.push(dialog);
        }
        self.dialog_answer.clone()
    }

    async fn suppress_notification(&self, id: &str) {
        if let Ok(mut suppressed) = self.suppressed.lock() {
            suppressed.insert(id.to_string());
        }
    }

    fn is_suppressed(&self, id: &str) -> bool {
        self.suppressed
            .lock()
            .map(|suppressed| suppressed.contains(id))
            .unwrap_or(false)
    }
}

#[async_trait]
impl ModPipeline for RecordingHost {
    fn capabilities(&self) -> PipelineCapabilities {
        self.capabilities
    }

    async fn ensure_logged_in(&self) -> Result<(), SanityError> {
        self.record("login");
        Ok(())
    }

    async fn mod_files(&self, _game: &str, nexus_mod_id: u64) -> Result<Vec<RemoteFile>, SanityError> {
        self.record(format!("files {nexus_mod_id}"));
        if self.fail_files {
            return Err(SanityError::pipeline("files unavailable"));
        }
        Ok(self.files.clone())
    }

    async fn find_download(&self, _game: &str, _nexus_mod_id: u64, _file_id: u64) -> Option<String> {
        None
    }

    async fn start_download(&self, url: &str, _info: &DownloadInfo) -> Result<String, SanityError> {
        self.record(format!("download {url}"));
        Ok("dl-1".to_string())
    }

    async fn find_installed_mod(&self, _game: &str, _nexus_mod_id: u64) -> Option<ModRecord> {
        None
    }

    async fn start_install(&self, download_id: &str) -> Result<String, SanityError> {
        self.record(format!("install {download_id}"));
        Ok("4gb-patch".to_string())
    }

    async fn last_active_profile(&self, _game: &str) -> Option<String> {
        Some("profile-1".to_string())
    }

    async fn enable_mods(&self, profile_id: &str, mod_ids: &[String]) -> Result<(), SanityError> {
        self.record(format!("enable {profile_id} {}", mod_ids.join(",")));
        Ok(())
    }

    async fn deploy_single_mod(&self, _game: &str, mod_id: &str) -> Result<(), SanityError> {
        self.record(format!("deploy {mod_id}"));
        Ok(())
    }

    async fn deploy_all(&self) -> Result<(), SanityError> {
        self.record("deploy all");
        Ok(())
    }

    async fn set_deployment_necessary(&self, game: &str, necessary: bool) {
        self.record(format!("deployment necessary {game} {necessary}"));
    }

    async fn mod_install_path(&self, _game: &str, _mod_id: &str) -> Option<PathBuf> {
        self.install_path.clone()
    }

    async fn download_script_extender(&self, game: &str) -> Result<(), SanityError> {
        self.record(format!("script extender {game}"));
        Ok(())
    }

    async fn open_url(&self, url: &str) -> Result<(), SanityError> {
        self.record(format!("open {url}"));
        Ok(())
    }
}
