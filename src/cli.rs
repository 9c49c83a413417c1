use crate::{
    checks::{self, CheckContext, CheckRegistry, TriggerEvent},
    config::AppConfig,
    finding::FindingReport,
    game::GameStore,
    geck::{self, GeckOutcome},
    host::HostSnapshot,
    lifecycle::Lifecycle,
    local::{self, LocalNotifier, LocalPipeline, LocalSettings},
    logging, overrides, registry,
};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::{path::PathBuf, sync::Arc};

#[derive(Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

#[derive(Default)]
struct GlobalOptions {
    format: Option<OutputFormat>,
    assume_yes: bool,
    game_root: Option<PathBuf>,
    staging: Option<PathBuf>,
    store: Option<GameStore>,
}

impl GlobalOptions {
    fn format(&self) -> OutputFormat {
        self.format.unwrap_or(OutputFormat::Text)
    }
}

enum CliCommand {
    Check { fix: bool },
    Activate,
    ModEnabled(String),
    Overrides(Option<String>),
    Geck,
    List,
    Paths,
    Suppress(String),
    Help,
    Version,
}

pub async fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (global, command) = parse_args(&args)?;
    match command {
        CliCommand::Help => {
            print_help();
            Ok(())
        }
        CliCommand::Version => {
            println!("fnvsanity v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        command => {
            let config = AppConfig::load_or_create()?;
            let log_path = logging::init(&config.data_dir(), &config.log_level)?;
            tracing::debug!("Logging to {}", log_path.display());
            let session = Session::new(config, &global);
            run_command(session, command, global.format()).await
        }
    }
}

fn parse_args(args: &[String]) -> Result<(GlobalOptions, CliCommand)> {
    if matches!(args.first().map(|s| s.as_str()), Some("--help" | "-h" | "help") | None) {
        return Ok((GlobalOptions::default(), CliCommand::Help));
    }
    if matches!(args.first().map(|s| s.as_str()), Some("--version" | "-V" | "version")) {
        return Ok((GlobalOptions::default(), CliCommand::Version));
    }

    let (global, tokens) = parse_global_options(args)?;
    let command = parse_subcommand(&tokens)?;
    Ok((global, command))
}

fn parse_global_options(args: &[String]) -> Result<(GlobalOptions, Vec<String>)> {
    let mut global = GlobalOptions::default();
    let mut tokens = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix("--format=") {
            global.format = Some(parse_format(value)?);
            continue;
        }
        match arg.as_str() {
            "--format" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--format requires a value"))?;
                global.format = Some(parse_format(value)?);
            }
            "--yes" | "-y" => global.assume_yes = true,
            "--game-root" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--game-root requires a path"))?;
                global.game_root = Some(PathBuf::from(value));
            }
            "--staging" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--staging requires a path"))?;
                global.staging = Some(PathBuf::from(value));
            }
            "--store" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--store requires a value"))?;
                global.store = Some(
                    GameStore::parse(value)
                        .ok_or_else(|| anyhow::anyhow!("Unknown store: {value}"))?,
                );
            }
            _ => tokens.push(arg.to_string()),
        }
    }
    Ok((global, tokens))
}

fn parse_format(value: &str) -> Result<OutputFormat> {
    OutputFormat::parse(value).ok_or_else(|| anyhow::anyhow!("Unknown format: {value}"))
}

fn parse_subcommand(tokens: &[String]) -> Result<CliCommand> {
    let Some(head) = tokens.first() else {
        return Ok(CliCommand::Help);
    };
    let rest = tokens.get(1..).unwrap_or(&[]);
    let command = match head.as_str() {
        "check" => {
            let mut fix = false;
            for arg in rest {
                match arg.as_str() {
                    "--fix" => fix = true,
                    other => bail!("Unknown check option: {other}"),
                }
            }
            CliCommand::Check { fix }
        }
        "activate" => CliCommand::Activate,
        "mod-enabled" => {
            let mod_id = rest
                .first()
                .ok_or_else(|| anyhow::anyhow!("mod-enabled requires a mod folder name"))?;
            CliCommand::ModEnabled(mod_id.to_string())
        }
        "overrides" => CliCommand::Overrides(rest.first().cloned()),
        "geck" => CliCommand::Geck,
        "list" => CliCommand::List,
        "paths" => CliCommand::Paths,
        "suppress" => {
            let id = rest
                .first()
                .ok_or_else(|| anyhow::anyhow!("suppress requires a check or notification id"))?;
            CliCommand::Suppress(id.to_string())
        }
        "help" => CliCommand::Help,
        "version" => CliCommand::Version,
        other => bail!("Unknown command: {other} (see 'fnvsanity help')"),
    };
    Ok(command)
}

struct Session {
    config: AppConfig,
    settings: LocalSettings,
    snapshot: HostSnapshot,
    pipeline: Arc<LocalPipeline>,
    notifier: Arc<LocalNotifier>,
}

impl Session {
    fn new(config: AppConfig, global: &GlobalOptions) -> Self {
        // Flag overrides apply to this run only and are never saved.
        let mut effective = config.clone();
        if let Some(root) = &global.game_root {
            effective.game_root = Some(root.clone());
        }
        if let Some(staging) = &global.staging {
            effective.staging_path = Some(staging.clone());
        }
        if let Some(store) = global.store {
            effective.game_store = store;
        }

        let settings = LocalSettings::from_config(&effective);
        let snapshot = local::build_snapshot(&settings);
        let pipeline = Arc::new(LocalPipeline::new(settings.clone()));
        let echo = global.format() == OutputFormat::Text;
        let notifier = Arc::new(LocalNotifier::new(config.clone(), echo, global.assume_yes));
        Self {
            config,
            settings,
            snapshot,
            pipeline,
            notifier,
        }
    }

    fn checks(&self) -> CheckRegistry {
        let mut checks = CheckRegistry::new();
        checks::register_fnv_checks(
            &mut checks,
            CheckContext {
                registry: registry::platform_store(),
                pipeline: self.pipeline.clone(),
                notifier: self.notifier.clone(),
                installer_timeout: self.config.installer_timeout(),
                debug_findings: self.config.debug_findings,
            },
        );
        checks.suppress(self.config.suppressed.iter().cloned());
        checks
    }

    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::new(self.pipeline.clone(), self.notifier.clone())
    }
}

async fn run_command(mut session: Session, command: CliCommand, format: OutputFormat) -> Result<()> {
    match command {
        CliCommand::Check { fix } => {
            let report = run_checks(&session, fix).await;
            print_check_run(&report, format)
        }
        CliCommand::Activate => {
            let report = run_checks(&session, false).await;
            let activation = session
                .lifecycle()
                .on_game_activated(crate::fnv::SHORTNAME, &session.snapshot)
                .await;
            let summary = ActivationSummary {
                overrides_created: activation
                    .overrides
                    .as_ref()
                    .map(|scan| scan.created.clone()),
                geck_config: activation.geck.map(geck_label),
            };
            if format == OutputFormat::Json {
                let combined = serde_json::json!({ "checks": report, "activation": summary });
                println!("{}", serde_json::to_string_pretty(&combined)?);
                return Ok(());
            }
            print_check_run(&report, format)?;
            print_activation(&summary)
        }
        CliCommand::ModEnabled(mod_id) => {
            let scan = session
                .lifecycle()
                .on_mod_enabled(local::PROFILE_ID, &mod_id, &session.snapshot)
                .await;
            match scan {
                Some(scan) => print_markers(&scan.created, format),
                None => {
                    println!("No override markers created (JIP LN NVSE not enabled or mod missing)");
                    Ok(())
                }
            }
        }
        CliCommand::Overrides(mod_id) => {
            let staging = session.settings.staging_path.clone();
            let scan = tokio::task::spawn_blocking(move || match mod_id {
                Some(mod_id) => overrides::create_for_mod(&staging.join(mod_id)),
                None => overrides::create_for_staging(&staging),
            })
            .await
            .context("override scan")?;
            print_markers(&scan.created, format)
        }
        CliCommand::Geck => {
            let documents = session
                .settings
                .documents_dir
                .clone()
                .context("no documents folder found; set documents_dir in config")?;
            let outcome = tokio::task::spawn_blocking(move || geck::ensure_default_config(&documents))
                .await
                .context("GECK config task")??;
            println!("{}", geck_label(outcome));
            Ok(())
        }
        CliCommand::List => list_checks(&session, format),
        CliCommand::Paths => list_paths(&session, format),
        CliCommand::Suppress(id) => {
            if session.config.suppress(&id) {
                session.config.save()?;
                println!("Suppressed {id}");
            } else {
                println!("{id} is already suppressed");
            }
            Ok(())
        }
        CliCommand::Help | CliCommand::Version => Ok(()),
    }
}

#[derive(Serialize)]
struct FixResult {
    check_id: String,
    /// `None` when the finding cannot be re-checked.
    resolved: Option<bool>,
    error: Option<String>,
}

#[derive(Serialize)]
struct CheckRun {
    findings: Vec<FindingReport>,
    fixes: Vec<FixResult>,
}

async fn run_checks(session: &Session, fix: bool) -> CheckRun {
    let checks = session.checks();
    let outcomes = checks
        .run_event(TriggerEvent::GameModeActivated, &session.snapshot)
        .await;

    let mut run = CheckRun {
        findings: Vec::new(),
        fixes: Vec::new(),
    };
    for outcome in outcomes {
        let Some(finding) = outcome.finding else {
            continue;
        };
        run.findings.push(finding.report(&outcome.id));
        if !fix || !finding.has_fix() {
            continue;
        }
        let error = finding
            .apply_fix()
            .await
            .err()
            .map(|err| format!("{err:#}"));
        let resolved = finding.recheck().await;
        run.fixes.push(FixResult {
            check_id: outcome.id,
            resolved,
            error,
        });
    }
    run
}

fn print_check_run(run: &CheckRun, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(run)?);
        return Ok(());
    }

    if run.findings.is_empty() {
        println!("No problems found");
    }
    for report in &run.findings {
        let fix = if report.automatic_fix {
            " (automatic fix available)"
        } else {
            ""
        };
        println!(
            "[{}] {}: {}{fix}",
            report.severity.label(),
            report.check_id,
            report.description.short
        );
        for line in local::strip_bbcode(&report.description.long).lines() {
            println!("    {line}");
        }
    }
    for result in &run.fixes {
        let status = match (&result.error, result.resolved) {
            (Some(err), _) => format!("fix failed: {err}"),
            (None, Some(true)) => "resolved".to_string(),
            (None, Some(false)) => "still present".to_string(),
            (None, None) => "fix applied".to_string(),
        };
        println!("{}: {status}", result.check_id);
    }
    Ok(())
}

#[derive(Serialize)]
struct ActivationSummary {
    overrides_created: Option<Vec<PathBuf>>,
    geck_config: Option<&'static str>,
}

fn geck_label(outcome: GeckOutcome) -> &'static str {
    match outcome {
        GeckOutcome::Created => "GECK config written",
        GeckOutcome::Existing => "GECK config already present",
    }
}

fn print_activation(summary: &ActivationSummary) -> Result<()> {
    match &summary.overrides_created {
        Some(created) => println!("Override markers created: {}", created.len()),
        None => println!("Override markers skipped (JIP LN NVSE not enabled)"),
    }
    if let Some(label) = summary.geck_config {
        println!("{label}");
    }
    Ok(())
}

fn print_markers(created: &[PathBuf], format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(created)?);
        return Ok(());
    }
    if created.is_empty() {
        println!("All archives already have override markers");
    }
    for path in created {
        println!("Created {}", path.display());
    }
    Ok(())
}

#[derive(Serialize)]
struct CheckListItem {
    id: String,
    event: TriggerEvent,
    suppressed: bool,
}

fn list_checks(session: &Session, format: OutputFormat) -> Result<()> {
    let checks = session.checks();
    let items: Vec<CheckListItem> = checks
        .ids()
        .filter_map(|id| checks.get(id))
        .map(|check| CheckListItem {
            id: check.id.clone(),
            event: check.event,
            suppressed: session.config.suppressed.contains(&check.id),
        })
        .collect();

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }
    for item in items {
        let suppressed = if item.suppressed { " (suppressed)" } else { "" };
        println!("{:<40} {}{suppressed}", item.id, item.event.as_str());
    }
    Ok(())
}

#[derive(Serialize)]
struct PathsReport {
    game_root: Option<PathBuf>,
    store: &'static str,
    staging: PathBuf,
    documents: Option<PathBuf>,
    downloads: PathBuf,
    config: PathBuf,
    log: PathBuf,
}

fn list_paths(session: &Session, format: OutputFormat) -> Result<()> {
    let report = PathsReport {
        game_root: session.settings.game_root.clone(),
        store: session.settings.store.as_str(),
        staging: session.settings.staging_path.clone(),
        documents: session.settings.documents_dir.clone(),
        downloads: session.settings.downloads_dir.clone(),
        config: session.config.path().to_path_buf(),
        log: session.config.data_dir().join(logging::LOG_FILE),
    };

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let show = |path: &Option<PathBuf>| {
        path.as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "<not found>".to_string())
    };
    println!("Game root: {}", show(&report.game_root));
    println!("Store: {}", report.store);
    println!("Staging: {}", report.staging.display());
    println!("Documents: {}", show(&report.documents));
    println!("Downloads: {}", report.downloads.display());
    println!("Config: {}", report.config.display());
    println!("Log: {}", report.log.display());
    Ok(())
}

fn print_help() {
    println!("fnvsanity v{}", env!("CARGO_PKG_VERSION"));
    println!("Usage:");
    println!("  fnvsanity check [--fix]          Run the Fallout: New Vegas health checks");
    println!("  fnvsanity activate               Checks plus override markers and GECK config");
    println!("  fnvsanity mod-enabled <mod>      Create override markers for one staged mod");
    println!("  fnvsanity overrides [<mod>]      Create override markers without JIP gating");
    println!("  fnvsanity geck                   Write the default GECKCustom.ini if missing");
    println!("  fnvsanity list                   List registered checks");
    println!("  fnvsanity paths                  Show detected paths");
    println!("  fnvsanity suppress <id>          Suppress a check or notification");
    println!();
    println!("Global options:");
    println!("  --format <json|text>             Output format");
    println!("  --game-root <path>               Game folder (overrides detection)");
    println!("  --staging <path>                 Mod staging folder");
    println!("  --store <steam|gog|epic>         Store the game was bought from");
    println!("  -y, --yes                        Accept the first option of every dialog");
    println!("  -h, --help                       Show help");
    println!("  -V, --version                    Show version");
}
