//! Health-check registry and the Fallout: New Vegas checks.

use crate::{
    finding::Finding,
    game::GameId,
    host::{HostSnapshot, ModPipeline, Notifier},
    identity::{self, LEGACY_NVSE_LOADERS, PATCHED_EXECUTABLES},
    mitigation,
    patcher::PatchRemediation,
    presence,
    registry::RegistryStore,
};
use futures::{
    future::{join_all, BoxFuture},
    FutureExt,
};
use serde::Serialize;
use std::{collections::HashSet, future::Future, panic::AssertUnwindSafe, sync::Arc, time::Duration};
use tracing::{debug, error};

pub const CHECK_AMD_DRIVER: &str = "fnvsanitycheck-test-amd-driver";
pub const CHECK_ASLR: &str = "fnvsanitycheck-test-disable-aslr";
pub const CHECK_EXECUTABLE: &str = "fnvsanitycheck-test-executable";
pub const CHECK_TRANSLATION_PLUGIN: &str = "fnvsanitycheck-test-translation-plugin";
pub const CHECK_LEGACY_NVSE: &str = "fnvsanitycheck-test-legacy-nvse";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerEvent {
    #[serde(rename = "gamemode-activated")]
    GameModeActivated,
    ModEnabled,
}

impl TriggerEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerEvent::GameModeActivated => "gamemode-activated",
            TriggerEvent::ModEnabled => "mod-enabled",
        }
    }
}

type Probe = Arc<dyn Fn(HostSnapshot) -> BoxFuture<'static, Option<Finding>> + Send + Sync>;

pub struct RegisteredCheck {
    pub id: String,
    pub event: TriggerEvent,
    probe: Probe,
}

#[derive(Debug)]
pub struct CheckOutcome {
    pub id: String,
    pub finding: Option<Finding>,
}

#[derive(Default)]
pub struct CheckRegistry {
    checks: Vec<RegisteredCheck>,
    suppressed: HashSet<String>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering an id twice replaces the earlier probe.
    pub fn register<F, Fut>(&mut self, id: impl Into<String>, event: TriggerEvent, probe: F)
    where
        F: Fn(HostSnapshot) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<Finding>> + Send + 'static,
    {
        let id = id.into();
        let probe: Probe = Arc::new(move |snapshot| Box::pin(probe(snapshot)));
        self.checks.retain(|check| check.id != id);
        self.checks.push(RegisteredCheck { id, event, probe });
    }

    pub fn suppress(&mut self, ids: impl IntoIterator<Item = String>) {
        self.suppressed.extend(ids);
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.checks.iter().map(|check| check.id.as_str())
    }

    pub fn get(&self, id: &str) -> Option<&RegisteredCheck> {
        self.checks.iter().find(|check| check.id == id)
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Runs one check. A panicking probe is logged and yields no finding.
    pub async fn run(&self, id: &str, snapshot: &HostSnapshot) -> Option<Finding> {
        let check = self.get(id)?;
        if self.suppressed.contains(id) {
            debug!("Check {id} is suppressed");
            return None;
        }
        run_probe(check, snapshot.clone()).await
    }

    /// Runs every check bound to `event` concurrently, in registration order.
    pub async fn run_event(&self, event: TriggerEvent, snapshot: &HostSnapshot) -> Vec<CheckOutcome> {
        let pending = self
            .checks
            .iter()
            .filter(|check| check.event == event && !self.suppressed.contains(&check.id))
            .map(|check| {
                let snapshot = snapshot.clone();
                async move {
                    CheckOutcome {
                        id: check.id.clone(),
                        finding: run_probe(check, snapshot).await,
                    }
                }
            });
        join_all(pending).await
    }
}

async fn run_probe(check: &RegisteredCheck, snapshot: HostSnapshot) -> Option<Finding> {
    match AssertUnwindSafe((check.probe)(snapshot)).catch_unwind().await {
        Ok(finding) => finding,
        Err(_) => {
            error!("Check {} panicked", check.id);
            None
        }
    }
}

/// Host services shared by the Fallout: New Vegas checks.
#[derive(Clone)]
pub struct CheckContext {
    pub registry: Arc<dyn RegistryStore>,
    pub pipeline: Arc<dyn ModPipeline>,
    pub notifier: Arc<dyn Notifier>,
    pub installer_timeout: Option<Duration>,
    /// Report every check as failing, for testing host integration.
    pub debug_findings: bool,
}

pub fn register_fnv_checks(checks: &mut CheckRegistry, ctx: CheckContext) {
    let event = TriggerEvent::GameModeActivated;
    let force = ctx.debug_findings;

    let store = ctx.registry.clone();
    checks.register(CHECK_AMD_DRIVER, event, move |snapshot| {
        let store = store.clone();
        async move {
            if !snapshot.is_active(GameId::FalloutNv) {
                return None;
            }
            mitigation::outdated_amd_driver(store, force).await
        }
    });

    let store = ctx.registry.clone();
    checks.register(CHECK_ASLR, event, move |snapshot| {
        let store = store.clone();
        async move {
            if !snapshot.is_active(GameId::FalloutNv) {
                return None;
            }
            mitigation::aslr_enabled(store, force).await
        }
    });

    let patcher = Arc::new(PatchRemediation::new(
        ctx.pipeline.clone(),
        ctx.notifier.clone(),
        ctx.installer_timeout,
    ));
    checks.register(CHECK_EXECUTABLE, event, move |snapshot| {
        let patcher = patcher.clone();
        async move {
            if !snapshot.is_active(GameId::FalloutNv) {
                return None;
            }
            let paths = snapshot.game_paths()?;
            let finding = identity::unpatched_executable(&paths, PATCHED_EXECUTABLES, force).await?;
            Some(finding.with_fix(move || {
                let patcher = patcher.clone();
                let snapshot = snapshot.clone();
                async move {
                    patcher.run(&snapshot).await;
                    Ok(())
                }
            }))
        }
    });

    checks.register(CHECK_TRANSLATION_PLUGIN, event, move |snapshot| async move {
        if !snapshot.is_active(GameId::FalloutNv) {
            return None;
        }
        let paths = snapshot.game_paths()?;
        presence::translation_plugin(&paths.translation_plugin, force).await
    });

    let pipeline = ctx.pipeline.clone();
    checks.register(CHECK_LEGACY_NVSE, event, move |snapshot| {
        let pipeline = pipeline.clone();
        async move {
            if !snapshot.is_active(GameId::FalloutNv) {
                return None;
            }
            let paths = snapshot.game_paths()?;
            let finding = identity::legacy_nvse(&paths, LEGACY_NVSE_LOADERS, force).await?;
            Some(finding.with_fix(move || {
                let pipeline = pipeline.clone();
                async move {
                    pipeline
                        .download_script_extender(GameId::FalloutNv.as_str())
                        .await?;
                    Ok(())
                }
            }))
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn active() -> HostSnapshot {
        HostSnapshot {
            active_game: Some("falloutnv".to_string()),
            ..HostSnapshot::default()
        }
    }

    #[tokio::test]
    async fn registry_runs_checks_for_their_event() {
        let mut checks = CheckRegistry::new();
        checks.register("always", TriggerEvent::GameModeActivated, |_| async {
            Some(Finding::warning("always", ""))
        });
        checks.register("never", TriggerEvent::GameModeActivated, |_| async { None });
        checks.register("other", TriggerEvent::ModEnabled, |_| async {
            Some(Finding::warning("other", ""))
        });

        let outcomes = checks
            .run_event(TriggerEvent::GameModeActivated, &active())
            .await;
        let ids: Vec<&str> = outcomes.iter().map(|outcome| outcome.id.as_str()).collect();
        assert_eq!(ids, vec!["always", "never"]);
        assert!(outcomes[0].finding.is_some());
        assert!(outcomes[1].finding.is_none());
    }

    #[test]
    fn trigger_events_serialize_as_host_names() {
        for event in [TriggerEvent::GameModeActivated, TriggerEvent::ModEnabled] {
            assert_eq!(
                serde_json::to_value(event).expect("serialize"),
                serde_json::Value::String(event.as_str().to_string())
            );
        }
    }

    #[test]
    fn check_ids_share_the_test_prefix() {
        for id in [
            CHECK_AMD_DRIVER,
            CHECK_ASLR,
            CHECK_EXECUTABLE,
            CHECK_TRANSLATION_PLUGIN,
            CHECK_LEGACY_NVSE,
        ] {
            assert!(id.starts_with("fnvsanitycheck-test-"), "{id}");
        }
    }

    #[tokio::test]
    async fn reregistering_replaces_probe() {
        let mut checks = CheckRegistry::new();
        checks.register("dup", TriggerEvent::GameModeActivated, |_| async { None });
        checks.register("dup", TriggerEvent::GameModeActivated, |_| async {
            Some(Finding::warning("second", ""))
        });
        assert_eq!(checks.len(), 1);
        let finding = checks.run("dup", &active()).await.expect("finding");
        assert_eq!(finding.description.short, "second");
    }

    #[tokio::test]
    async fn suppressed_checks_are_skipped() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let mut checks = CheckRegistry::new();
        checks.register("quiet", TriggerEvent::GameModeActivated, move |_| {
            let flag = flag.clone();
            async move {
                flag.store(true, Ordering::SeqCst);
                Some(Finding::warning("quiet", ""))
            }
        });
        checks.suppress(["quiet".to_string()]);

        assert!(checks.run("quiet", &active()).await.is_none());
        assert!(checks
            .run_event(TriggerEvent::GameModeActivated, &active())
            .await
            .is_empty());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn panicking_probe_yields_nothing() {
        let mut checks = CheckRegistry::new();
        checks.register("boom", TriggerEvent::GameModeActivated, |_| async {
            let finding: Option<Finding> = None;
            if finding.is_none() {
                panic!("probe failure");
            }
            finding
        });
        assert!(checks.run("boom", &active()).await.is_none());
        assert!(checks.run("missing", &active()).await.is_none());
    }

    #[test]
    fn trigger_names_match_host_events() {
        assert_eq!(TriggerEvent::GameModeActivated.as_str(), "gamemode-activated");
        assert_eq!(TriggerEvent::ModEnabled.as_str(), "mod-enabled");
    }
}
