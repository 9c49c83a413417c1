use async_trait::async_trait;
use fnvsanity::{
    checks::{self, CheckContext, CheckRegistry, TriggerEvent},
    error::SanityError,
    game::GameStore,
    host::{
        Dialog, Discovery, DownloadInfo, HostSnapshot, ModPipeline, ModRecord, Notification,
        Notifier, PipelineCapabilities, RemoteFile,
    },
    mitigation,
    registry::{MemoryRegistry, RegValue},
};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

/// Host without download support; remembers the pages it was asked to open.
#[derive(Default)]
struct OfflineHost {
    opened: Mutex<Vec<String>>,
    notifications: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for OfflineHost {
    async fn send_notification(&self, notification: Notification) {
        self.notifications
            .lock()
            .expect("lock")
            .push(notification.message);
    }

    async fn show_dialog(&self, _dialog: Dialog) -> Option<String> {
        None
    }

    async fn suppress_notification(&self, _id: &str) {}
}

#[async_trait]
impl ModPipeline for OfflineHost {
    fn capabilities(&self) -> PipelineCapabilities {
        PipelineCapabilities::default()
    }

    async fn ensure_logged_in(&self) -> Result<(), SanityError> {
        Err(SanityError::MissingCapability("login"))
    }

    async fn mod_files(&self, _game: &str, _id: u64) -> Result<Vec<RemoteFile>, SanityError> {
        Err(SanityError::MissingCapability("mod lookup"))
    }

    async fn find_download(&self, _game: &str, _id: u64, _file: u64) -> Option<String> {
        None
    }

    async fn start_download(&self, _url: &str, _info: &DownloadInfo) -> Result<String, SanityError> {
        Err(SanityError::MissingCapability("downloads"))
    }

    async fn find_installed_mod(&self, _game: &str, _id: u64) -> Option<ModRecord> {
        None
    }

    async fn start_install(&self, _download_id: &str) -> Result<String, SanityError> {
        Err(SanityError::MissingCapability("installs"))
    }

    async fn last_active_profile(&self, _game: &str) -> Option<String> {
        None
    }

    async fn enable_mods(&self, _profile: &str, _mods: &[String]) -> Result<(), SanityError> {
        Ok(())
    }

    async fn deploy_single_mod(&self, _game: &str, _mod_id: &str) -> Result<(), SanityError> {
        Ok(())
    }

    async fn deploy_all(&self) -> Result<(), SanityError> {
        Ok(())
    }

    async fn set_deployment_necessary(&self, _game: &str, _necessary: bool) {}

    async fn mod_install_path(&self, _game: &str, _mod_id: &str) -> Option<PathBuf> {
        None
    }

    async fn download_script_extender(&self, _game: &str) -> Result<(), SanityError> {
        self.open_url("xnvse").await
    }

    async fn open_url(&self, url: &str) -> Result<(), SanityError> {
        self.opened.lock().expect("lock").push(url.to_string());
        Ok(())
    }
}

fn game_dir(root: &Path) -> PathBuf {
    let game = root.join("Fallout New Vegas");
    fs::create_dir_all(game.join("Data")).expect("mkdir");
    fs::write(game.join("FalloutNV.exe"), b"not the patched executable").expect("exe");
    fs::write(game.join("Data").join("FalloutNV_lang.esp"), b"TES4").expect("plugin");
    game
}

fn snapshot(game: &Path, active: &str) -> HostSnapshot {
    HostSnapshot {
        active_game: Some(active.to_string()),
        discovery: Some(Discovery {
            path: game.to_path_buf(),
            store: GameStore::Steam,
        }),
        ..HostSnapshot::default()
    }
}

fn registry_with_forced_aslr() -> Arc<MemoryRegistry> {
    Arc::new(MemoryRegistry::new().with(
        mitigation::KERNEL,
        mitigation::MITIGATION_OPTIONS,
        RegValue::Binary(vec![0x11, 0x01, 0x20, 0x00, 0x00, 0x00, 0x00, 0x00]),
    ))
}

fn fnv_checks(registry: Arc<MemoryRegistry>, host: Arc<OfflineHost>) -> CheckRegistry {
    let mut checks = CheckRegistry::new();
    checks::register_fnv_checks(
        &mut checks,
        CheckContext {
            registry,
            pipeline: host.clone(),
            notifier: host,
            installer_timeout: None,
            debug_findings: false,
        },
    );
    checks
}

#[tokio::test]
async fn activation_reports_broken_install() {
    let temp = tempfile::tempdir().expect("tempdir");
    let game = game_dir(temp.path());
    let host = Arc::new(OfflineHost::default());
    let checks = fnv_checks(registry_with_forced_aslr(), host);

    let outcomes = checks
        .run_event(TriggerEvent::GameModeActivated, &snapshot(&game, "falloutnv"))
        .await;
    let flagged: Vec<&str> = outcomes
        .iter()
        .filter(|outcome| outcome.finding.is_some())
        .map(|outcome| outcome.id.as_str())
        .collect();
    assert_eq!(
        flagged,
        vec![
            checks::CHECK_ASLR,
            checks::CHECK_EXECUTABLE,
            checks::CHECK_TRANSLATION_PLUGIN,
        ]
    );
}

#[tokio::test]
async fn other_games_produce_no_findings() {
    let temp = tempfile::tempdir().expect("tempdir");
    let game = game_dir(temp.path());
    let checks = fnv_checks(registry_with_forced_aslr(), Arc::new(OfflineHost::default()));

    let outcomes = checks
        .run_event(TriggerEvent::GameModeActivated, &snapshot(&game, "skyrimse"))
        .await;
    assert_eq!(outcomes.len(), 5);
    assert!(outcomes.iter().all(|outcome| outcome.finding.is_none()));
}

#[tokio::test]
async fn fixes_resolve_their_findings() {
    let temp = tempfile::tempdir().expect("tempdir");
    let game = game_dir(temp.path());
    let registry = registry_with_forced_aslr();
    let checks = fnv_checks(registry.clone(), Arc::new(OfflineHost::default()));
    let snapshot = snapshot(&game, "falloutnv");

    let plugin = checks
        .run(checks::CHECK_TRANSLATION_PLUGIN, &snapshot)
        .await
        .expect("plugin finding");
    plugin.apply_fix().await.expect("delete plugin");
    assert_eq!(plugin.recheck().await, Some(true));
    assert!(!game.join("Data").join("FalloutNV_lang.esp").exists());
    assert!(checks
        .run(checks::CHECK_TRANSLATION_PLUGIN, &snapshot)
        .await
        .is_none());

    let aslr = checks
        .run(checks::CHECK_ASLR, &snapshot)
        .await
        .expect("aslr finding");
    assert_eq!(aslr.recheck().await, Some(false));
    aslr.apply_fix().await.expect("disable aslr");
    assert_eq!(aslr.recheck().await, Some(true));
    assert_eq!(
        registry.get(mitigation::KERNEL, mitigation::MITIGATION_OPTIONS),
        Some(RegValue::Binary(vec![
            0x11, 0x00, 0x20, 0x00, 0x00, 0x00, 0x00, 0x00
        ]))
    );
    assert_eq!(
        registry.get(mitigation::MEMORY_MANAGEMENT, mitigation::MOVE_IMAGES),
        Some(RegValue::Dword(0))
    );
}

#[tokio::test]
async fn patch_fix_without_downloads_opens_the_patch_page() {
    let temp = tempfile::tempdir().expect("tempdir");
    let game = game_dir(temp.path());
    let host = Arc::new(OfflineHost::default());
    let checks = fnv_checks(registry_with_forced_aslr(), host.clone());

    let finding = checks
        .run(checks::CHECK_EXECUTABLE, &snapshot(&game, "falloutnv"))
        .await
        .expect("unpatched finding");
    assert!(finding.has_fix());
    finding.apply_fix().await.expect("fix resolves");
    assert_eq!(finding.recheck().await, Some(false));
    assert_eq!(
        host.opened.lock().expect("lock").clone(),
        vec!["https://www.nexusmods.com/newvegas/mods/62552?tab=files"]
    );
}
