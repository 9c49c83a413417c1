//! Standalone host used by the command line: the staging folder stands in
//! for the mod manager and Nexus Mods is reached through its public API.

use crate::{
    archive,
    config::AppConfig,
    error::SanityError,
    fnv,
    game::{GameId, GameStore},
    host::{
        Dialog, Discovery, DownloadInfo, HostSnapshot, ModPipeline, ModRecord, Notification,
        NotificationKind, Notifier, PipelineCapabilities, ProfileState, RemoteFile,
    },
    nexus::{self, NexusClient},
};
use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, OnceLock},
};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const PROFILE_ID: &str = "Default";
pub const MANIFEST_FILE: &str = "fnvsanity-mod.json";
const XNVSE_URL: &str = "https://www.nexusmods.com/newvegas/mods/67883?tab=files";

/// Written next to mods installed by [`LocalPipeline`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModManifest {
    pub nexus_mod_id: u64,
    pub file_id: u64,
}

#[derive(Debug, Clone)]
pub struct LocalSettings {
    pub game_root: Option<PathBuf>,
    pub store: GameStore,
    pub staging_path: PathBuf,
    pub documents_dir: Option<PathBuf>,
    pub downloads_dir: PathBuf,
    pub nexus_api_key: Option<String>,
}

impl LocalSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let detected = crate::game::detect_game_root(GameId::FalloutNv, config.game_root.as_deref());
        let game_root = match detected {
            Ok(paths) => Some(paths.game_root),
            Err(err) => {
                warn!(
                    "{} path detection failed: {err:#}",
                    GameId::FalloutNv.display_name()
                );
                None
            }
        };
        Self {
            game_root,
            store: config.game_store,
            staging_path: config.resolve_staging_path(),
            documents_dir: config.resolve_documents_dir(),
            downloads_dir: config.data_dir().join("downloads"),
            nexus_api_key: config
                .nexus_api_key
                .clone()
                .filter(|key| !key.trim().is_empty()),
        }
    }
}

/// Every staging sub-directory is a mod, enabled in the single profile.
pub fn build_snapshot(settings: &LocalSettings) -> HostSnapshot {
    let mods = scan_staging(&settings.staging_path);
    let enabled_mods: HashSet<String> = mods.iter().map(|record| record.id.clone()).collect();
    HostSnapshot {
        active_game: Some(GameId::FalloutNv.as_str().to_string()),
        discovery: settings.game_root.as_ref().map(|path| Discovery {
            path: path.clone(),
            store: settings.store,
        }),
        staging_path: Some(settings.staging_path.clone()),
        documents_dir: settings.documents_dir.clone(),
        profile: Some(ProfileState {
            id: PROFILE_ID.to_string(),
            game_id: GameId::FalloutNv.as_str().to_string(),
            enabled_mods,
        }),
        mods,
    }
}

pub fn scan_staging(staging: &Path) -> Vec<ModRecord> {
    let Ok(entries) = fs::read_dir(staging) else {
        debug!("Staging folder {} not readable", staging.display());
        return Vec::new();
    };
    let mut mods: Vec<ModRecord> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false))
        .map(|entry| mod_record(&entry.path()))
        .collect();
    mods.sort_by(|lhs, rhs| lhs.id.cmp(&rhs.id));
    mods
}

fn mod_record(dir: &Path) -> ModRecord {
    let id = dir
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let manifest = read_manifest(dir);
    let nexus_mod_id = match &manifest {
        Some(manifest) => Some(manifest.nexus_mod_id),
        None if ships_jip_ln_nvse(dir) => Some(fnv::JIP_LN_NVSE_MOD_ID),
        None => None,
    };
    ModRecord {
        id,
        nexus_mod_id,
        file_id: manifest.map(|manifest| manifest.file_id),
        installed: true,
        installation_path: Some(dir.to_path_buf()),
    }
}

fn read_manifest(dir: &Path) -> Option<ModManifest> {
    let raw = fs::read_to_string(dir.join(MANIFEST_FILE)).ok()?;
    match serde_json::from_str(&raw) {
        Ok(manifest) => Some(manifest),
        Err(err) => {
            warn!("Ignoring malformed {MANIFEST_FILE} in {}: {err}", dir.display());
            None
        }
    }
}

/// `nvse/plugins/jip_nvse.dll`, in any letter case.
fn ships_jip_ln_nvse(dir: &Path) -> bool {
    WalkDir::new(dir)
        .min_depth(3)
        .max_depth(3)
        .into_iter()
        .filter_map(Result::ok)
        .any(|entry| {
            let path = entry.path();
            let named = |path: Option<&Path>, name: &str| {
                path.and_then(Path::file_name)
                    .map(|value| value.to_string_lossy().eq_ignore_ascii_case(name))
                    .unwrap_or(false)
            };
            named(Some(path), fnv::JIP_LN_NVSE_DLL)
                && named(path.parent(), "plugins")
                && named(path.parent().and_then(Path::parent), "nvse")
        })
}

pub struct LocalNotifier {
    config: Mutex<AppConfig>,
    echo: bool,
    assume_yes: bool,
}

impl LocalNotifier {
    pub fn new(config: AppConfig, echo: bool, assume_yes: bool) -> Self {
        Self {
            config: Mutex::new(config),
            echo,
            assume_yes,
        }
    }
}

#[async_trait]
impl Notifier for LocalNotifier {
    async fn send_notification(&self, notification: Notification) {
        let display_ms = notification.display_ms;
        match notification.kind {
            NotificationKind::Error => warn!(?display_ms, "{}", notification.message),
            _ => info!(?display_ms, "{}", notification.message),
        }
        if self.echo {
            println!("{}", render_notification(&notification));
        }
    }

    async fn show_dialog(&self, dialog: Dialog) -> Option<String> {
        if self.echo {
            println!("{}", dialog.title);
            println!("{}", strip_bbcode(&dialog.body));
            println!("Options: {}", dialog.buttons.join(" / "));
        }
        if self.assume_yes {
            let choice = dialog.buttons.first().cloned();
            if self.echo {
                if let Some(choice) = &choice {
                    println!("Selected: {choice}");
                }
            }
            return choice;
        }
        None
    }

    async fn suppress_notification(&self, id: &str) {
        let Ok(mut config) = self.config.lock() else {
            return;
        };
        if config.suppress(id) {
            if let Err(err) = config.save() {
                warn!("Failed to persist suppression of {id}: {err:#}");
            }
        }
    }

    fn is_suppressed(&self, id: &str) -> bool {
        self.config
            .lock()
            .map(|config| config.suppressed.iter().any(|existing| existing == id))
            .unwrap_or(false)
    }
}

/// Suppressible notifications name the command that silences them.
fn render_notification(notification: &Notification) -> String {
    let line = format!("[{}] {}", kind_label(notification.kind), notification.message);
    match notification.id.as_deref() {
        Some(id) if notification.allow_suppress => {
            format!("{line} (silence with `fnvsanity suppress {id}`)")
        }
        _ => line,
    }
}

fn kind_label(kind: NotificationKind) -> &'static str {
    match kind {
        NotificationKind::Info => "info",
        NotificationKind::Success => "success",
        NotificationKind::Warning => "warning",
        NotificationKind::Error => "error",
    }
}

fn bbcode_tag() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"\[/?[a-z*]+(=[^\]]*)?\]").expect("valid bbcode pattern"))
}

/// Plain-text rendering of host markup.
pub fn strip_bbcode(text: &str) -> String {
    let text = text
        .replace("[br][/br]", "\n")
        .replace("<br/>", "\n")
        .replace("[*]", "\n - ");
    bbcode_tag().replace_all(&text, "").trim().to_string()
}

pub struct LocalPipeline {
    settings: LocalSettings,
    client: Option<NexusClient>,
}

impl LocalPipeline {
    pub fn new(settings: LocalSettings) -> Self {
        let client = settings.nexus_api_key.clone().map(NexusClient::new);
        Self { settings, client }
    }

    fn client(&self) -> Result<NexusClient, SanityError> {
        self.client
            .clone()
            .ok_or(SanityError::MissingCapability("Nexus Mods downloads without an API key"))
    }

    fn download_prefix(mod_id: u64, file_id: u64) -> String {
        format!("{mod_id}-{file_id}-")
    }

    fn write_manifest(dir: &Path, manifest: &ModManifest) -> anyhow::Result<()> {
        let raw = serde_json::to_string_pretty(manifest).context("serialize mod manifest")?;
        fs::write(dir.join(MANIFEST_FILE), raw).context("write mod manifest")?;
        Ok(())
    }
}

fn pipeline_error(err: anyhow::Error) -> SanityError {
    SanityError::pipeline(format!("{err:#}"))
}

fn join_error(err: tokio::task::JoinError) -> SanityError {
    SanityError::pipeline(format!("background task failed: {err}"))
}

fn nexus_domain(game: &str) -> &'static str {
    if GameId::FalloutNv.matches(Some(game)) {
        GameId::FalloutNv.nexus_domain()
    } else {
        "newvegas"
    }
}

#[async_trait]
impl ModPipeline for LocalPipeline {
    fn capabilities(&self) -> PipelineCapabilities {
        let online = self.client.is_some();
        PipelineCapabilities {
            login: online,
            download_lookup: online,
            mod_lookup: online,
        }
    }

    /// Direct downloads need a premium account.
    async fn ensure_logged_in(&self) -> Result<(), SanityError> {
        let client = self.client()?;
        let user = tokio::task::spawn_blocking(move || client.validate())
            .await
            .map_err(join_error)?
            .map_err(pipeline_error)?;
        info!("Logged in to Nexus Mods as {}", user.name);
        if !user.is_premium {
            return Err(SanityError::pipeline(
                "Nexus Mods premium membership is required for direct downloads",
            ));
        }
        Ok(())
    }

    async fn mod_files(&self, game: &str, nexus_mod_id: u64) -> Result<Vec<RemoteFile>, SanityError> {
        let client = self.client()?;
        let domain = nexus_domain(game);
        let files = tokio::task::spawn_blocking(move || client.mod_files(domain, nexus_mod_id))
            .await
            .map_err(join_error)?
            .map_err(pipeline_error)?;
        Ok(files
            .into_iter()
            .map(|file| RemoteFile {
                file_id: file.file_id,
                category_id: file.category_id,
                version: file.version.unwrap_or_default(),
                name: if file.file_name.is_empty() {
                    file.name
                } else {
                    file.file_name
                },
            })
            .collect())
    }

    async fn find_download(&self, _game: &str, nexus_mod_id: u64, file_id: u64) -> Option<String> {
        let prefix = Self::download_prefix(nexus_mod_id, file_id);
        let entries = fs::read_dir(&self.settings.downloads_dir).ok()?;
        entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .find(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .map(|name| name.to_string_lossy().starts_with(&prefix))
                        .unwrap_or(false)
            })
            .map(|path| path.to_string_lossy().to_string())
    }

    async fn start_download(&self, url: &str, info: &DownloadInfo) -> Result<String, SanityError> {
        let client = self.client()?;
        let (game, mod_id, file_id) = nexus::parse_nxm(url).unwrap_or_else(|| {
            debug!("{url} is not an nxm link, downloading {} directly", info.name);
            (info.game.clone(), info.mod_id, info.file_id)
        });
        let domain = nexus_domain(&game);
        let downloads = self.settings.downloads_dir.clone();
        let name = info.name.clone();
        let path = tokio::task::spawn_blocking(move || -> anyhow::Result<PathBuf> {
            let link = client.download_link(domain, mod_id, file_id)?;
            let file_name = link
                .split('?')
                .next()
                .and_then(|path| path.rsplit('/').next())
                .filter(|name| !name.is_empty())
                .unwrap_or("download.zip")
                .to_string();
            fs::create_dir_all(&downloads).context("create downloads dir")?;
            let path = downloads.join(format!(
                "{}{file_name}",
                LocalPipeline::download_prefix(mod_id, file_id)
            ));
            info!("Downloading {name} to {}", path.display());
            client.download(&link, &path)?;
            Ok(path)
        })
        .await
        .map_err(join_error)?
        .map_err(pipeline_error)?;
        Ok(path.to_string_lossy().to_string())
    }

    async fn find_installed_mod(&self, _game: &str, nexus_mod_id: u64) -> Option<ModRecord> {
        scan_staging(&self.settings.staging_path)
            .into_iter()
            .find(|record| record.nexus_mod_id == Some(nexus_mod_id))
    }

    async fn start_install(&self, download_id: &str) -> Result<String, SanityError> {
        let archive_path = PathBuf::from(download_id);
        let stem = archive_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .ok_or_else(|| SanityError::pipeline(format!("invalid download {download_id}")))?;
        let (nexus_mod_id, file_id) = parse_download_stem(&stem)
            .ok_or_else(|| SanityError::pipeline(format!("unrecognised download {stem}")))?;
        let dest = self.settings.staging_path.join(&stem);
        let manifest = ModManifest {
            nexus_mod_id,
            file_id,
        };
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            archive::extract_archive(&archive_path, &dest)?;
            LocalPipeline::write_manifest(&dest, &manifest)
        })
        .await
        .map_err(join_error)?
        .map_err(pipeline_error)?;
        info!("Installed {stem} into staging");
        Ok(stem)
    }

    async fn last_active_profile(&self, _game: &str) -> Option<String> {
        Some(PROFILE_ID.to_string())
    }

    async fn enable_mods(&self, profile_id: &str, mod_ids: &[String]) -> Result<(), SanityError> {
        debug!("Mods {} are always enabled in {profile_id}", mod_ids.join(", "));
        Ok(())
    }

    async fn deploy_single_mod(&self, _game: &str, mod_id: &str) -> Result<(), SanityError> {
        debug!("Mod {mod_id} runs from the staging folder");
        Ok(())
    }

    async fn deploy_all(&self) -> Result<(), SanityError> {
        info!("Deploy the mods in {} with your mod manager", self.settings.staging_path.display());
        Ok(())
    }

    async fn set_deployment_necessary(&self, game: &str, necessary: bool) {
        if necessary {
            warn!("Deployment required for {game}");
        }
    }

    async fn mod_install_path(&self, _game: &str, mod_id: &str) -> Option<PathBuf> {
        scan_staging(&self.settings.staging_path)
            .into_iter()
            .find(|record| record.id == mod_id)
            .and_then(|record| record.installation_path)
    }

    async fn download_script_extender(&self, _game: &str) -> Result<(), SanityError> {
        self.open_url(XNVSE_URL).await
    }

    async fn open_url(&self, url: &str) -> Result<(), SanityError> {
        info!("Opening {url}");
        open::that(url).map_err(|err| SanityError::pipeline(format!("open {url}: {err}")))
    }
}

/// `<mod>-<file>-<name>` as written by [`LocalPipeline::start_download`].
fn parse_download_stem(stem: &str) -> Option<(u64, u64)> {
    let mut parts = stem.splitn(3, '-');
    let mod_id = parts.next()?.parse().ok()?;
    let file_id = parts.next()?.parse().ok()?;
    Some((mod_id, file_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(root: &Path) -> LocalSettings {
        LocalSettings {
            game_root: Some(root.join("game")),
            store: GameStore::Gog,
            staging_path: root.join("staging"),
            documents_dir: Some(root.join("docs")),
            downloads_dir: root.join("downloads"),
            nexus_api_key: None,
        }
    }

    #[test]
    fn snapshot_treats_staging_dirs_as_enabled_mods() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = settings(temp.path());
        let jip = settings.staging_path.join("JIP LN NVSE");
        fs::create_dir_all(jip.join("NVSE").join("Plugins")).expect("mkdir");
        fs::write(jip.join("NVSE").join("Plugins").join("jip_nvse.dll"), b"MZ").expect("write");
        fs::create_dir_all(settings.staging_path.join("Textures")).expect("mkdir");
        fs::write(settings.staging_path.join("loose.txt"), b"").expect("write");

        let snapshot = build_snapshot(&settings);
        assert!(snapshot.is_active(GameId::FalloutNv));
        let ids: Vec<&str> = snapshot.mods.iter().map(|record| record.id.as_str()).collect();
        assert_eq!(ids, vec!["JIP LN NVSE", "Textures"]);
        assert!(snapshot.jip_ln_nvse_enabled());
        assert_eq!(
            snapshot.discovery.as_ref().map(|discovery| discovery.store),
            Some(GameStore::Gog)
        );
    }

    #[test]
    fn manifest_identifies_installed_patch() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("62552-7-FNVpatch");
        fs::create_dir_all(&dir).expect("mkdir");
        LocalPipeline::write_manifest(
            &dir,
            &ModManifest {
                nexus_mod_id: 62552,
                file_id: 7,
            },
        )
        .expect("manifest");

        let mods = scan_staging(temp.path());
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].nexus_mod_id, Some(62552));
        assert_eq!(mods[0].file_id, Some(7));
        assert_eq!(parse_download_stem("62552-7-FNVpatch"), Some((62552, 7)));
        assert_eq!(parse_download_stem("FNVpatch"), None);
    }

    #[test]
    fn offline_pipeline_lacks_capabilities() {
        let temp = tempfile::tempdir().expect("tempdir");
        let pipeline = LocalPipeline::new(settings(temp.path()));
        assert_eq!(pipeline.capabilities(), PipelineCapabilities::default());
    }

    #[tokio::test]
    async fn existing_download_is_found_by_prefix() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = settings(temp.path());
        fs::create_dir_all(&settings.downloads_dir).expect("mkdir");
        fs::write(settings.downloads_dir.join("62552-7-FNVpatch.7z"), b"7z").expect("write");
        let pipeline = LocalPipeline::new(settings);
        assert!(pipeline.find_download("falloutnv", 62552, 7).await.is_some());
        assert!(pipeline.find_download("falloutnv", 62552, 8).await.is_none());
    }

    #[test]
    fn bbcode_is_flattened() {
        assert_eq!(
            strip_bbcode("[b]Deploy[/b][br][/br]see [url=https://example.com]here[/url]"),
            "Deploy\nsee here"
        );
    }

    #[tokio::test]
    async fn suppression_is_persisted() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = AppConfig::load_or_create_in(temp.path()).expect("config");
        let notifier = LocalNotifier::new(config, false, true);
        notifier.suppress_notification("sanitycheck-fnvoverridedeploy").await;
        assert!(notifier.is_suppressed("sanitycheck-fnvoverridedeploy"));

        let reloaded = AppConfig::load_or_create_in(temp.path()).expect("reload");
        assert_eq!(reloaded.suppressed, vec!["sanitycheck-fnvoverridedeploy"]);

        let choice = notifier
            .show_dialog(Dialog {
                title: "t".to_string(),
                body: String::new(),
                buttons: vec!["Deploy".to_string(), "Close".to_string()],
            })
            .await;
        assert_eq!(choice.as_deref(), Some("Deploy"));
    }

    #[tokio::test]
    async fn install_path_comes_from_staged_record() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = settings(temp.path());
        let staged = settings.staging_path.join("62552-7-FNVpatch");
        fs::create_dir_all(&staged).expect("mkdir");
        let pipeline = LocalPipeline::new(settings);
        assert_eq!(
            pipeline.mod_install_path("falloutnv", "62552-7-FNVpatch").await,
            Some(staged)
        );
        assert_eq!(pipeline.mod_install_path("falloutnv", "missing").await, None);
    }

    #[test]
    fn suppressible_notifications_name_the_command() {
        let warning = Notification {
            id: Some("sanitycheck-fnvoverridedeploy".to_string()),
            kind: NotificationKind::Warning,
            message: "Redeployment required".to_string(),
            allow_suppress: true,
            display_ms: None,
        };
        assert_eq!(
            render_notification(&warning),
            "[warning] Redeployment required (silence with `fnvsanity suppress sanitycheck-fnvoverridedeploy`)"
        );

        let transient = Notification::transient(NotificationKind::Success, "Patched", 3000);
        assert_eq!(render_notification(&transient), "[success] Patched");
    }
}
