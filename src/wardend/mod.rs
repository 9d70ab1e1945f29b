use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use audit_logger::{AuditLogger, Config as AuditConfig, OutputFormat};
use enforcer::{Enforcer, SignalControl};
use nix::unistd::Uid;
use policy_engine::{PolicyEngine, RuleSet};
use probe_common::{
    control::{MemoryControl, ProbeControl, UnixProbeControl},
    source::{DEFAULT_QUEUE_SIZE, RecordSource, record_queue},
};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::watch,
};
use warden_core::{Statistics, veto_entries};

use crate::cli::WardendOpts;

mod config;
mod engine;

pub use config::{ConfigError, SectionConfig, WardenConfig};
pub use engine::{DEFAULT_POLL_TIMEOUT, Engine};

/// General configuration section for settings shared by all components.
const GENERAL_CONFIG: &str = "wardend";

const DEFAULT_SOCKET_PATH: &str = "/run/warden/events.sock";
const DEFAULT_AUDIT_FILE: &str = "/var/log/warden/audit.log";

pub async fn wardend_run(options: &WardendOpts) -> Result<()> {
    log::trace!("Warden Daemon Options: {:?}", options);

    // Signals only reach processes of the same user without root; that is
    // fine for supervising the user's own agents, so warn, don't refuse.
    if !Uid::effective().is_root() {
        log::warn!("running unprivileged: enforcement reaches same-user processes only");
    }

    let config = if let Some(custom_file) = &options.config_file {
        WardenConfig::with_custom_file(custom_file)?
    } else {
        WardenConfig::new()?
    };

    let general = config.get_section(GENERAL_CONFIG);
    let queue_size = general.with_default("queue_size", DEFAULT_QUEUE_SIZE)?;
    let poll_timeout =
        Duration::from_millis(general.with_default("poll_timeout_ms", 100u64)?);
    let socket_path =
        general.with_default("socket_path", PathBuf::from(DEFAULT_SOCKET_PATH))?;
    let control_socket: Option<PathBuf> = general.optional("control_socket")?;

    let enforcer_section = config.get_section("enforcer");
    let enforcement =
        enforcer_section.with_default("enforcement", true)? && !options.monitor_only;
    if !enforcement {
        log::warn!("enforcement disabled: verdicts are audited but no signal is sent");
    }

    // The audit sink is the one outbound channel that must work before
    // anything is supervised: no trail, no engine.
    let audit_section = config.get_section("audit-logger");
    let mut audit_config = AuditConfig::new(
        audit_section.with_default("file", PathBuf::from(DEFAULT_AUDIT_FILE))?,
    );
    audit_config.console = audit_section.with_default("console", true)?;
    audit_config.verbose = audit_section.with_default("verbose", false)?;
    audit_config.output_format =
        audit_section.with_default("output_format", OutputFormat::default())?;
    let audit = AuditLogger::open(audit_config).context("Error opening audit sink")?;

    let policy_section = config.get_section("policy-engine");
    let rules_path: Option<PathBuf> = match &options.rules_dir {
        Some(dir) => Some(dir.clone()),
        None => policy_section.optional("rules_path")?,
    };
    let rules = load_rules(rules_path.as_deref())?;
    log::info!(
        "loaded {} severity rules, {} dangerous / {} banned command rules",
        rules.severity.rules().len(),
        rules.commands.dangerous().len(),
        rules.commands.banned().len(),
    );

    // Push the synchronous veto table into the probe. At startup this is
    // load-bearing (the pre-exec path would run unprotected), so failure
    // is fatal; later pushes are best effort.
    let mut probe_control: Box<dyn ProbeControl> = match &control_socket {
        Some(path) => Box::new(
            UnixProbeControl::connect(path)
                .with_context(|| format!("Error connecting probe control {}", path.display()))?,
        ),
        None => {
            log::info!("no probe control socket configured, pre-exec veto not armed");
            Box::new(MemoryControl::default())
        }
    };
    probe_control
        .push_veto_table(&veto_entries(rules.severity.rules()))
        .context("Error pushing veto table into the probe")?;
    probe_control
        .set_enforcement(enforcement)
        .context("Error configuring probe enforcement flag")?;
    probe_control
        .set_verbose(audit_section.with_default("verbose", false)?)
        .context("Error configuring probe verbose flag")?;

    let (tx_records, rx_records) = record_queue(queue_size);
    let source = RecordSource::bind(&socket_path, tx_records)
        .context("Error binding record source")?;
    let source_handle = source.spawn();

    // Rule hot reload: watch the policy section, rebuild the tables off
    // the ingestion thread, hand the engine a whole new generation.
    let (tx_rules, rx_rules) = watch::channel(rules.clone());
    let mut rx_policy_cfg = config.watch_section("policy-engine");
    let reload_handle = tokio::spawn(async move {
        while rx_policy_cfg.changed().await.is_ok() {
            let rules_path: Option<PathBuf> = match rx_policy_cfg
                .borrow_and_update()
                .optional("rules_path")
            {
                Ok(path) => path,
                Err(err) => {
                    log::error!("invalid policy-engine configuration: {err}");
                    continue;
                }
            };
            match load_rules(rules_path.as_deref()) {
                Ok(rules) => {
                    if let Err(err) =
                        probe_control.push_veto_table(&veto_entries(rules.severity.rules()))
                    {
                        // Only the synchronous veto misses the update; the
                        // asynchronous judge path below still gets it.
                        log::warn!("veto table re-push failed, will retry on next reload: {err}");
                    }
                    let _ = tx_rules.send(rules);
                }
                Err(err) => log::error!("rule reload failed: {err:#}"),
            }
        }
    });

    let stats = Arc::new(Statistics::new());
    let (tx_shutdown, rx_shutdown) = watch::channel(false);
    let engine = Engine::new(
        rx_records,
        PolicyEngine::new(rules),
        Enforcer::new(SignalControl, enforcement),
        audit,
        stats.clone(),
        poll_timeout,
        rx_shutdown,
        Some(rx_rules),
    );
    let mut engine_task = tokio::spawn(engine.run());

    let mut sig_int = signal(SignalKind::interrupt())?;
    let mut sig_term = signal(SignalKind::terminate())?;
    let mut sig_hup = signal(SignalKind::hangup())?;

    tokio::select! {
        _ = sig_int.recv() => log::trace!("SIGINT received"),
        _ = sig_term.recv() => log::trace!("SIGTERM received"),
        _ = sig_hup.recv() => log::trace!("SIGHUP received"),
        result = &mut engine_task => {
            source_handle.abort();
            reload_handle.abort();
            // The engine only returns on its own for fatal conditions.
            return match result {
                Ok(Ok(snapshot)) => {
                    log::info!("engine exited: {snapshot}");
                    Ok(())
                }
                Ok(Err(err)) => Err(err),
                Err(join_err) => Err(anyhow::anyhow!("engine task panicked: {join_err}")),
            };
        }
    }

    log::info!("Terminating Warden Daemon...");
    let _ = tx_shutdown.send(true);
    let snapshot = engine_task
        .await
        .context("engine task panicked during shutdown")??;
    log::info!("final statistics: {snapshot}");

    source_handle.abort();
    reload_handle.abort();
    let _ = std::fs::remove_file(&socket_path);

    Ok(())
}

fn load_rules(rules_path: Option<&Path>) -> Result<RuleSet> {
    match rules_path {
        Some(dir) => RuleSet::load_from_dir(dir)
            .with_context(|| format!("Error loading rules from {}", dir.display())),
        None => Ok(RuleSet::builtin()),
    }
}
