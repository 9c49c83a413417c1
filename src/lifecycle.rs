//! Work done on host lifecycle events besides the health checks.

use crate::{
    fnv,
    game::GameId,
    geck::{self, GeckOutcome},
    host::{Dialog, HostSnapshot, ModPipeline, Notification, NotificationKind, Notifier},
    overrides::{self, OverrideScan},
};
use std::sync::Arc;
use tracing::{debug, error, info};

pub const REDEPLOY_NOTIFICATION: &str = "sanitycheck-fnvoverridedeploy";

const DEPLOY: &str = "Deploy";
const CLOSE: &str = "Close";
const IGNORE: &str = "Ignore";

#[derive(Debug, Default)]
pub struct ActivationReport {
    pub overrides: Option<OverrideScan>,
    pub geck: Option<GeckOutcome>,
}

pub struct Lifecycle {
    pipeline: Arc<dyn ModPipeline>,
    notifier: Arc<dyn Notifier>,
}

impl Lifecycle {
    pub fn new(pipeline: Arc<dyn ModPipeline>, notifier: Arc<dyn Notifier>) -> Self {
        Self { pipeline, notifier }
    }

    pub async fn on_game_activated(&self, game_id: &str, snapshot: &HostSnapshot) -> ActivationReport {
        if !GameId::FalloutNv.matches(Some(game_id)) {
            return ActivationReport::default();
        }
        ActivationReport {
            overrides: self.refresh_overrides(snapshot).await,
            geck: self.bootstrap_geck(snapshot).await,
        }
    }

    /// Marks the archives of a freshly enabled mod.
    pub async fn on_mod_enabled(
        &self,
        profile_id: &str,
        mod_id: &str,
        snapshot: &HostSnapshot,
    ) -> Option<OverrideScan> {
        let profile = snapshot
            .profile
            .as_ref()
            .filter(|profile| profile.id == profile_id)?;
        if !GameId::FalloutNv.matches(Some(&profile.game_id)) {
            return None;
        }
        if !snapshot.jip_ln_nvse_enabled() {
            debug!("JIP LN NVSE not enabled, skipping overrides for {mod_id}");
            return None;
        }
        let mod_dir = snapshot.staging_path.as_ref()?.join(mod_id);
        match tokio::task::spawn_blocking(move || overrides::create_for_mod(&mod_dir)).await {
            Ok(scan) => Some(scan),
            Err(err) => {
                error!("Override scan for {mod_id} failed: {err}");
                None
            }
        }
    }

    async fn refresh_overrides(&self, snapshot: &HostSnapshot) -> Option<OverrideScan> {
        if !snapshot.jip_ln_nvse_enabled() {
            debug!("JIP LN NVSE not enabled, skipping override markers");
            return None;
        }
        let staging = snapshot.staging_path.clone()?;
        let scan = match tokio::task::spawn_blocking(move || overrides::create_for_staging(&staging))
            .await
        {
            Ok(scan) => scan,
            Err(err) => {
                error!("Override scan failed: {err}");
                return None;
            }
        };

        if scan.created_any() {
            info!("Created {} override marker(s)", scan.created.len());
            self.pipeline
                .set_deployment_necessary(fnv::SHORTNAME, true)
                .await;
            self.prompt_redeploy().await;
        }
        Some(scan)
    }

    async fn prompt_redeploy(&self) {
        if self.notifier.is_suppressed(REDEPLOY_NOTIFICATION) {
            return;
        }
        self.notifier
            .send_notification(Notification {
                id: Some(REDEPLOY_NOTIFICATION.to_string()),
                kind: NotificationKind::Warning,
                message: "Redeployment required".to_string(),
                allow_suppress: true,
                display_ms: None,
            })
            .await;

        let answer = self.notifier.show_dialog(redeploy_dialog()).await;
        match answer.as_deref() {
            Some(DEPLOY) => {
                if let Err(err) = self.pipeline.deploy_all().await {
                    error!("Deployment failed: {err}");
                }
            }
            Some(IGNORE) => {
                self.notifier
                    .suppress_notification(REDEPLOY_NOTIFICATION)
                    .await
            }
            _ => {}
        }
    }

    async fn bootstrap_geck(&self, snapshot: &HostSnapshot) -> Option<GeckOutcome> {
        let Some(documents) = snapshot.documents_dir.clone() else {
            debug!("No documents folder, skipping GECK config");
            return None;
        };
        match tokio::task::spawn_blocking(move || geck::ensure_default_config(&documents)).await {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(err)) => {
                error!("Failed to write GECK config file: {err:#}");
                self.notifier
                    .show_error("Failed to write GECK config file", &err)
                    .await;
                None
            }
            Err(err) => {
                error!("GECK config task failed: {err}");
                None
            }
        }
    }
}

fn redeploy_dialog() -> Dialog {
    Dialog {
        title: "Redeployment required".to_string(),
        body: format!(
            "Override files were added for all bsa files in the staging folder.[br][/br]\
             Redeployment of mods is necessary to ensure the override files are added.\
             [br][/br][br][/br]\
             BSA files can be made to override previous BSA files like newer Bethesda \
             titles by creating an empty text file with the same name as the BSA file \
             and adding the extension .override to the filename. More information \
             [url=https://geckwiki.com/index.php?title=BSA_Files]here[/url][br][/br][br][/br]\
             This behavior requires the \
             [url=https://www.nexusmods.com/newvegas/mods/{}]JIP LN NVSE[/url] plugin \
             to work as expected.",
            fnv::JIP_LN_NVSE_MOD_ID
        ),
        buttons: vec![DEPLOY.to_string(), CLOSE.to_string(), IGNORE.to_string()],
    }
}
