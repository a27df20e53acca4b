//! shieldd - The shield service and command line
//!
//! Wires together:
//! - Configuration loading
//! - Store initialization
//! - Shield engine and passcode gate
//! - Decision file enforcer
//! - Remote mirror (optional)
//!
//! `shieldd run` keeps the decision set fresh on a timer. Every other
//! subcommand performs one engine operation against the same store and exits.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use shield_api::{ApplicationProfile, CategoryRestriction, MirrorDelta};
use shield_config::{DEFAULT_MIRROR_TIMEOUT_SECS, Policy, load_config};
use shield_core::{GateState, GrantOutcome, PasscodeGate, ShieldEngine, ValidationOutcome};
use shield_host::{DECISION_FILENAME, FileEnforcer, HttpMirror};
use shield_host_api::RemoteMirror;
use shield_store::{AuditEvent, AuditEventType, SqliteStore, Store};
use shield_util::{
    AppToken, CategoryToken, Clock, DeviceId, STORE_FILENAME, SystemClock,
    default_config_path, format_datetime_full, format_remaining,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// shieldd - App restriction policy for child devices
#[derive(Parser, Debug)]
#[command(name = "shieldd")]
#[command(about = "App restriction policy for child devices", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/shield/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override (or set SHIELD_DATA_DIR env var)
    #[arg(short, long, env = "SHIELD_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Guardian passcode, required by guardian commands once one is set
    #[arg(long, global = true, env = "SHIELD_PASSCODE", hide_env_values = true)]
    passcode: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the service: reconcile expired grants and sync the mirror on a timer
    Run,

    /// Add an application to the restricted set
    Restrict {
        /// Application token (hex)
        token: AppToken,
        /// Display name
        name: String,
    },

    /// Remove an application from the restricted set
    Unrestrict { token: AppToken },

    /// Add an application category to the restricted set
    RestrictCategory {
        /// Category token (hex)
        token: CategoryToken,
        label: String,
    },

    /// Remove an application category from the restricted set
    UnrestrictCategory { token: CategoryToken },

    /// Grant temporary access (the shield-action callback)
    Grant {
        token: AppToken,
        /// Grant length; defaults to the configured default
        #[arg(short, long)]
        minutes: Option<u32>,
    },

    /// End a grant before it expires
    Reshield { token: AppToken },

    /// Purge expired grants and re-issue the decision set
    Reconcile,

    /// Pull the restricted set from the remote mirror
    Sync,

    /// Show restrictions, grants and the current decision
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show recent audit events
    History {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },

    /// Manage the guardian passcode
    Passcode {
        #[command(subcommand)]
        action: PasscodeCommand,
    },
}

#[derive(Subcommand, Debug)]
enum PasscodeCommand {
    /// Set or change the passcode (the current one goes in --passcode)
    Set { code: String },
    /// Check a passcode
    Validate { code: String },
    /// Remove the passcode
    Reset,
    /// Show the gate state
    Status,
}

/// Everything a command needs
struct Shield {
    policy: Policy,
    store: Arc<dyn Store>,
    engine: Arc<ShieldEngine>,
    gate: PasscodeGate,
    mirror: Option<Arc<dyn RemoteMirror>>,
    clock: Arc<dyn Clock>,
}

impl Shield {
    fn open(args: &Args) -> Result<Self> {
        let policy = if args.config.exists() {
            let policy = load_config(&args.config)
                .with_context(|| format!("Failed to load config from {:?}", args.config))?;
            info!(config_path = %args.config.display(), "Configuration loaded");
            policy
        } else {
            info!(config_path = %args.config.display(), "No configuration file, using defaults");
            Policy::default()
        };

        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| policy.service.data_dir.clone());
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = data_dir.join(STORE_FILENAME);
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );
        debug!(db_path = %db_path.display(), "Store initialized");

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let enforcer = Arc::new(FileEnforcer::new(
            data_dir.join(DECISION_FILENAME),
            clock.clone(),
        ));

        let engine = Arc::new(ShieldEngine::new(
            store.clone(),
            enforcer,
            clock.clone(),
            policy.shield.clone(),
        ));
        let gate = PasscodeGate::new(store.clone(), clock.clone(), policy.passcode.clone());

        let mirror = match &policy.mirror {
            Some(config) => {
                let mirror: Arc<dyn RemoteMirror> =
                    Arc::new(HttpMirror::new(config).context("Failed to create mirror client")?);
                Some(mirror)
            }
            None => None,
        };

        Ok(Self {
            policy,
            store,
            engine,
            gate,
            mirror,
            clock,
        })
    }

    fn device(&self) -> Option<&DeviceId> {
        self.policy.service.device_id.as_ref()
    }

    fn mirror_timeout(&self) -> Duration {
        self.policy
            .mirror
            .as_ref()
            .map(|m| m.timeout)
            .unwrap_or(Duration::from_secs(DEFAULT_MIRROR_TIMEOUT_SECS))
    }

    /// Refuse guardian commands unless the gate is open or `passcode` opens it
    fn require_guardian(&self, passcode: Option<&str>) -> Result<()> {
        if self.gate.state()? == GateState::Disabled {
            return Ok(());
        }

        let Some(code) = passcode else {
            bail!("A passcode is set; pass it with --passcode");
        };

        match self.gate.validate(code)? {
            ValidationOutcome::Accepted | ValidationOutcome::NotConfigured => Ok(()),
            ValidationOutcome::Rejected { remaining_attempts } => {
                bail!("Incorrect passcode ({remaining_attempts} attempts remaining)")
            }
            ValidationOutcome::LockedOut {
                remaining_seconds, ..
            } => bail!(
                "Too many incorrect attempts; try again in {}",
                format_remaining(Duration::from_secs(remaining_seconds))
            ),
        }
    }

    /// Push changes to the mirror; failures are logged and left for the next sync
    async fn push(&self, deltas: Vec<MirrorDelta>) {
        let (Some(mirror), Some(_)) = (&self.mirror, self.device()) else {
            return;
        };

        let timeout = self.mirror_timeout();
        for delta in deltas {
            match tokio::time::timeout(timeout, mirror.push(&delta)).await {
                Ok(Ok(())) => debug!(?delta, "Mirror delta pushed"),
                Ok(Err(e)) => warn!(error = %e, "Failed to push mirror delta"),
                Err(_) => warn!("Timed out pushing mirror delta"),
            }
        }
    }

    async fn sync(&self) -> Result<()> {
        let (Some(mirror), Some(device)) = (&self.mirror, self.device()) else {
            bail!("Remote mirror is not configured");
        };

        let report = self
            .engine
            .sync_with_remote_mirror(mirror.as_ref(), device, self.mirror_timeout())
            .await?;
        println!(
            "Synced: {} added, {} removed, {} locked",
            report.added.len(),
            report.removed.len(),
            report.decision.locked_applications.len()
        );
        Ok(())
    }

    async fn execute(&self, command: Command, passcode: Option<&str>) -> Result<()> {
        let now = self.clock.now();
        let device = self.device().cloned().unwrap_or_else(|| DeviceId::new("local"));

        match command {
            Command::Run => self.run().await?,

            Command::Restrict { token, name } => {
                self.require_guardian(passcode)?;
                let event = self
                    .engine
                    .add_restriction(ApplicationProfile::new(token.clone(), name.clone()))?;
                println!("Restricted {name} ({token})");
                self.push(event.mirror_deltas(&device, now)).await;
            }

            Command::Unrestrict { token } => {
                self.require_guardian(passcode)?;
                let event = self.engine.remove_restriction(&token)?;
                println!("Unrestricted {token}");
                self.push(event.mirror_deltas(&device, now)).await;
            }

            Command::RestrictCategory { token, label } => {
                self.require_guardian(passcode)?;
                self.engine
                    .add_category_restriction(CategoryRestriction::new(token.clone(), label.clone()))?;
                println!("Restricted category {label} ({token})");
            }

            Command::UnrestrictCategory { token } => {
                self.require_guardian(passcode)?;
                self.engine.remove_category_restriction(&token)?;
                println!("Unrestricted category {token}");
            }

            Command::Grant { token, minutes } => {
                let outcome = match minutes {
                    Some(minutes) => self.engine.grant_temporary_access(&token, minutes)?,
                    None => self.engine.handle_shield_action(&token)?,
                };
                match &outcome {
                    GrantOutcome::Granted { session, .. } => println!(
                        "Unlocked {} for {} min (until {})",
                        session.application_name,
                        session.duration_minutes,
                        format_datetime_full(&session.expiry_date)
                    ),
                    GrantOutcome::NotRestricted { token } => {
                        println!("{token} is not restricted; nothing granted")
                    }
                }
                self.push(outcome.mirror_deltas(&device, now)).await;
            }

            Command::Reshield { token } => {
                self.require_guardian(passcode)?;
                let event = self.engine.reshield(&token)?;
                println!("Re-shielded {token}");
                self.push(event.mirror_deltas(&device, now)).await;
            }

            Command::Reconcile => {
                let rec = self.engine.reconcile()?;
                println!(
                    "Purged {} expired and {} duplicate grants; {} locked",
                    rec.purged.len(),
                    rec.collapsed.len(),
                    rec.decision.locked_applications.len()
                );
                self.push(rec.mirror_deltas(&device, now)).await;
            }

            Command::Sync => self.sync().await?,

            Command::Status { json } => self.print_status(json)?,

            Command::History { limit } => {
                for event in self.store.get_recent_audits(limit)? {
                    println!(
                        "{}  {}",
                        format_datetime_full(&event.timestamp),
                        serde_json::to_string(&event.event)?
                    );
                }
            }

            Command::Passcode { action } => self.passcode(action, passcode)?,
        }

        Ok(())
    }

    fn passcode(&self, action: PasscodeCommand, passcode: Option<&str>) -> Result<()> {
        match action {
            PasscodeCommand::Set { code } => {
                self.require_guardian(passcode)?;
                self.gate.set_passcode(&code)?;
                println!("Passcode set");
            }
            PasscodeCommand::Validate { code } => match self.gate.validate(&code)? {
                ValidationOutcome::Accepted => println!("Accepted"),
                ValidationOutcome::NotConfigured => println!("No passcode is set"),
                ValidationOutcome::Rejected { remaining_attempts } => {
                    bail!("Incorrect passcode ({remaining_attempts} attempts remaining)")
                }
                ValidationOutcome::LockedOut {
                    until,
                    remaining_seconds,
                } => bail!(
                    "Locked out until {} ({} remaining)",
                    format_datetime_full(&until),
                    format_remaining(Duration::from_secs(remaining_seconds))
                ),
            },
            PasscodeCommand::Reset => {
                self.require_guardian(passcode)?;
                self.gate.reset_passcode()?;
                println!("Passcode removed");
            }
            PasscodeCommand::Status => match self.gate.state()? {
                GateState::Disabled => println!("No passcode set"),
                GateState::Unlocked | GateState::Locked => println!("Passcode set"),
                GateState::LockedOut { until } => {
                    println!("Locked out until {}", format_datetime_full(&until))
                }
            },
        }
        Ok(())
    }

    fn print_status(&self, json: bool) -> Result<()> {
        let status = self.engine.status()?;
        if json {
            println!("{}", serde_json::to_string_pretty(&status)?);
            return Ok(());
        }

        println!("Restricted applications ({}):", status.restrictions.len());
        for view in &status.restrictions {
            let state = match &view.session {
                Some(session) => format!(
                    "unlocked, {} left",
                    format_remaining(session.time_remaining)
                ),
                None if view.locked => "locked".to_string(),
                None => "unlocked".to_string(),
            };
            println!(
                "  {}  {}  [{}]",
                view.profile.application_token, view.profile.application_name, state
            );
        }

        if !status.categories.is_empty() {
            println!("Restricted categories ({}):", status.categories.len());
            for category in &status.categories {
                println!("  {}  {}", category.category_token, category.label);
            }
        }

        if !status.orphan_sessions.is_empty() {
            println!("Grants without a restriction ({}):", status.orphan_sessions.len());
            for session in &status.orphan_sessions {
                println!(
                    "  {}  {}  {} left",
                    session.application_token,
                    session.application_name,
                    format_remaining(session.time_remaining)
                );
            }
        }

        let report = self.engine.consistency_report()?;
        if !report.duplicate_tokens.is_empty() {
            println!(
                "Duplicate grants for {} applications (run `shieldd reconcile`)",
                report.duplicate_tokens.len()
            );
        }

        Ok(())
    }

    async fn run(&self) -> Result<()> {
        self.store
            .append_audit(AuditEvent::new(AuditEventType::ServiceStarted))?;

        let device = self.device().cloned();
        let reconcile_interval = self.policy.shield.reconcile_interval;
        let mut reconcile_timer = tokio::time::interval(reconcile_interval);
        reconcile_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut sync_timer = match (&self.policy.mirror, &device) {
            (Some(mirror), Some(_)) => {
                let mut timer = tokio::time::interval(mirror.sync_interval);
                timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
                Some(timer)
            }
            (Some(_), None) => {
                warn!("Mirror configured without a device_id, sync disabled");
                None
            }
            _ => None,
        };

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;

        info!(
            reconcile_interval_secs = reconcile_interval.as_secs(),
            sync = sync_timer.is_some(),
            "Service running"
        );

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }

                _ = reconcile_timer.tick() => {
                    match self.engine.reconcile() {
                        Ok(rec) => {
                            if let Some(device) = &device {
                                self.push(rec.mirror_deltas(device, self.clock.now())).await;
                            }
                        }
                        Err(e) => error!(error = %e, "Reconcile failed"),
                    }
                }

                _ = next_tick(&mut sync_timer) => {
                    if let Err(e) = self.sync().await {
                        warn!(error = %e, "Mirror sync failed");
                    }
                }
            }
        }

        info!("Shutting down shieldd");
        if let Err(e) = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::ServiceStopped))
        {
            warn!(error = %e, "Failed to log service shutdown");
        }

        info!("Shutdown complete");
        Ok(())
    }
}

/// Tick an optional timer; a missing timer never fires
async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    debug!(version = env!("CARGO_PKG_VERSION"), "shieldd starting");

    if shield_util::is_mock_time_active() {
        warn!("Mock time is active; expiry and lockout use the overridden clock");
    }

    let shield = Shield::open(&args)?;
    let passcode = args.passcode.as_deref();

    shield.execute(args.command, passcode).await
}
