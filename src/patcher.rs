//! Download, install and run the 4GB patcher through the host pipeline.
//!
//! The chain is login, file query, download, install, enable, deploy and
//! finally the installer itself. Nothing is rolled back: any failure before
//! the installer runs falls back to opening the manual download page.

use crate::{
    error::SanityError,
    fnv::{self, PATCH_4GB_EXECUTABLES, PATCH_4GB_MOD_ID, PATCH_4GB_MOD_ID_EPIC},
    game::{GameId, GameStore},
    host::{
        Discovery, DownloadInfo, HostSnapshot, ModPipeline, Notification, NotificationKind,
        Notifier, RemoteFile,
    },
    installer,
};
use std::{sync::Arc, time::Duration};
use tracing::{error, info};

const MAIN_FILE_CATEGORY: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Installed,
    InstallerFailed,
    InstallerMissing,
    ManualFallback,
    NoGamePath,
}

pub fn patch_mod_id(store: GameStore) -> u64 {
    match store {
        GameStore::Epic => PATCH_4GB_MOD_ID_EPIC,
        GameStore::Steam | GameStore::Gog => PATCH_4GB_MOD_ID,
    }
}

pub fn manual_download_url(mod_id: u64) -> String {
    format!(
        "https://www.nexusmods.com/{}/mods/{mod_id}?tab=files",
        GameId::FalloutNv.nexus_domain()
    )
}

pub fn nxm_url(mod_id: u64, file_id: u64) -> String {
    format!("nxm://{}/mods/{mod_id}/files/{file_id}", fnv::SHORTNAME)
}

/// Loose semantic version: missing or non-numeric parts count as zero.
pub fn coerce_version(raw: &str) -> (u64, u64, u64) {
    let start = raw.find(|ch: char| ch.is_ascii_digit());
    let Some(start) = start else {
        return (0, 0, 0);
    };
    let mut parts = raw[start..]
        .split(|ch: char| !ch.is_ascii_digit())
        .take(3)
        .map(|part| part.parse::<u64>().unwrap_or(0));
    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    let patch = parts.next().unwrap_or(0);
    (major, minor, patch)
}

/// Newest file of the "main files" category.
pub fn select_main_file(files: &[RemoteFile]) -> Option<&RemoteFile> {
    let mut main: Vec<&RemoteFile> = files
        .iter()
        .filter(|file| file.category_id == MAIN_FILE_CATEGORY)
        .collect();
    main.sort_by(|lhs, rhs| coerce_version(&rhs.version).cmp(&coerce_version(&lhs.version)));
    main.into_iter().next()
}

pub struct PatchRemediation {
    pipeline: Arc<dyn ModPipeline>,
    notifier: Arc<dyn Notifier>,
    installer_timeout: Option<Duration>,
}

impl PatchRemediation {
    pub fn new(
        pipeline: Arc<dyn ModPipeline>,
        notifier: Arc<dyn Notifier>,
        installer_timeout: Option<Duration>,
    ) -> Self {
        Self {
            pipeline,
            notifier,
            installer_timeout,
        }
    }

    pub async fn run(&self, snapshot: &HostSnapshot) -> PatchOutcome {
        let Some(discovery) = snapshot.discovery.as_ref() else {
            error!("Could not find game path for 4GB patch download");
            return PatchOutcome::NoGamePath;
        };
        let patch_mod = patch_mod_id(discovery.store);
        let page = manual_download_url(patch_mod);

        let capabilities = self.pipeline.capabilities();
        if !(capabilities.download_lookup && capabilities.mod_lookup) {
            error!("Host does not support automatic 4GB patch download");
            self.open_page(&page).await;
            return PatchOutcome::ManualFallback;
        }

        let mod_id = match self.download_and_install(patch_mod).await {
            Ok(mod_id) => mod_id,
            Err(err) => {
                error!("Failed to download patch: {err}");
                self.open_page(&page).await;
                return PatchOutcome::ManualFallback;
            }
        };

        self.run_installer(discovery, &mod_id).await
    }

    async fn open_page(&self, url: &str) {
        if let Err(err) = self.pipeline.open_url(url).await {
            error!("Failed to open {url}: {err}");
        }
    }

    async fn download_and_install(&self, patch_mod: u64) -> Result<String, SanityError> {
        let game = fnv::SHORTNAME;
        if self.pipeline.capabilities().login {
            self.pipeline.ensure_logged_in().await?;
        }

        let files = self.pipeline.mod_files(game, patch_mod).await?;
        let file = select_main_file(&files)
            .ok_or_else(|| SanityError::pipeline("No 4GB patch main file found"))?
            .clone();
        info!("Selected 4GB patch file {} ({})", file.file_id, file.version);

        let download_id = match self
            .pipeline
            .find_download(game, patch_mod, file.file_id)
            .await
        {
            Some(id) => id,
            None => {
                let info = DownloadInfo {
                    game: game.to_string(),
                    name: "4GB Patch".to_string(),
                    mod_id: patch_mod,
                    file_id: file.file_id,
                };
                self.pipeline
                    .start_download(&nxm_url(patch_mod, file.file_id), &info)
                    .await?
            }
        };

        let existing = self.pipeline.find_installed_mod(game, patch_mod).await;
        let mod_id = match existing {
            Some(record) if record.installed && record.file_id == Some(file.file_id) => record.id,
            _ => self.pipeline.start_install(&download_id).await?,
        };

        let profile = self
            .pipeline
            .last_active_profile(game)
            .await
            .ok_or_else(|| SanityError::pipeline("No active profile for Fallout: New Vegas"))?;
        self.pipeline
            .enable_mods(&profile, std::slice::from_ref(&mod_id))
            .await?;
        self.pipeline.deploy_single_mod(game, &mod_id).await?;
        Ok(mod_id)
    }

    async fn run_installer(&self, discovery: &Discovery, mod_id: &str) -> PatchOutcome {
        let Some(install_path) = self.pipeline.mod_install_path(fnv::SHORTNAME, mod_id).await
        else {
            error!("Could not find installation path for 4GB patch mod {mod_id}");
            return PatchOutcome::InstallerMissing;
        };
        let Some(executable) = installer::find_installer(&install_path, &PATCH_4GB_EXECUTABLES)
        else {
            error!(
                "Could not find 4GB patch executable in {}",
                install_path.display()
            );
            return PatchOutcome::InstallerMissing;
        };

        match installer::run_installer(&executable, &discovery.path, self.installer_timeout).await
        {
            Ok(()) => {
                self.notifier
                    .send_notification(Notification::transient(
                        NotificationKind::Success,
                        "4GB patch installed successfully",
                        3000,
                    ))
                    .await;
                PatchOutcome::Installed
            }
            Err(err) => {
                error!("Failed to run 4GB patch installer: {err}");
                self.notifier
                    .send_notification(Notification::transient(
                        NotificationKind::Error,
                        "Failed to install 4GB patch",
                        5000,
                    ))
                    .await;
                PatchOutcome::InstallerFailed
            }
        }
    }
}
