//! poolscaled — the poolscale daemon.
//!
//! Runs the autoscaler control loop for a single pool against an HTTP
//! provisioning API until SIGINT/SIGTERM.
//!
//! # Usage
//!
//! ```text
//! poolscaled scaffold --pool spark-pool > poolscale.toml
//! poolscaled check --config poolscale.toml --probe
//! poolscaled run --config poolscale.toml
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::info;

use poolscale_autoscale::{Autoscaler, AutoscalerSettings, ScalingPolicy, check_bounds};
use poolscale_converge::ConvergenceExecutor;
use poolscale_core::{Config, ProvisioningPort};
use poolscale_http::{HttpProvisioner, Reauthenticating};

const DEFAULT_FILTER: &str = "info,poolscale=debug";

#[derive(Parser)]
#[command(name = "poolscaled", about = "Elastic capacity autoscaler for a worker pool")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control loop.
    Run {
        /// Path to poolscale.toml.
        #[arg(long, env = "POOLSCALE_CONFIG", default_value = "poolscale.toml")]
        config: PathBuf,

        /// Scale reactively at all hours, ignoring the schedule windows.
        #[arg(long, env = "POOLSCALE_IGNORE_SCHEDULE")]
        ignore_schedule: bool,
    },

    /// Validate a config file and print what the loop would do now.
    Check {
        /// Path to poolscale.toml.
        #[arg(long, env = "POOLSCALE_CONFIG", default_value = "poolscale.toml")]
        config: PathBuf,

        /// Scale reactively at all hours, ignoring the schedule windows.
        #[arg(long, env = "POOLSCALE_IGNORE_SCHEDULE")]
        ignore_schedule: bool,

        /// Also contact the provisioner and list its units.
        #[arg(long)]
        probe: bool,
    },

    /// Print a starter poolscale.toml.
    Scaffold {
        /// Pool name to put in the config.
        #[arg(long, default_value = "spark-pool")]
        pool: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run {
            config,
            ignore_schedule,
        } => run(&config, ignore_schedule).await,
        Command::Check {
            config,
            ignore_schedule,
            probe,
        } => check(&config, ignore_schedule, probe).await,
        Command::Scaffold { pool } => {
            print!("{}", Config::scaffold(&pool).to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Load and validate the config, applying command-line overrides.
fn load_config(path: &Path, ignore_schedule: bool) -> anyhow::Result<Config> {
    let mut config = Config::from_file(path)
        .with_context(|| format!("loading config from {}", path.display()))?;
    if ignore_schedule {
        config.schedule.ignore = true;
    }
    check_bounds(&config.pool.bounds())
        .with_context(|| format!("pool {} has invalid bounds", config.pool.name))?;
    Ok(config)
}

fn build_provisioner(config: &Config) -> anyhow::Result<Arc<Reauthenticating<HttpProvisioner>>> {
    let provisioner = config
        .provisioner
        .as_ref()
        .context("config has no [provisioner] section")?;
    let http = HttpProvisioner::from_config(provisioner)?;
    Ok(Arc::new(Reauthenticating::new(
        http,
        provisioner.max_auth_attempts,
    )))
}

async fn run(config_path: &Path, ignore_schedule: bool) -> anyhow::Result<()> {
    let config = load_config(config_path, ignore_schedule)?;
    let settings = AutoscalerSettings::from_config(&config)?;
    let port = build_provisioner(&config)?;
    let interval = config.control.interval()?;

    let executor = ConvergenceExecutor::new(
        port.clone(),
        config.converge.poll_interval()?,
        config.converge.timeout()?,
    );
    info!(
        pool = %settings.pool,
        endpoint = port.inner().endpoint(),
        timezone = %settings.timezone,
        ignore_schedule = settings.ignore_schedule,
        "poolscaled starting"
    );
    let autoscaler = Autoscaler::new(settings, port.clone(), port, executor);

    // ── Shutdown signal ────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        autoscaler.run(interval, shutdown_rx).await;
    });

    shutdown_signal().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    handle.await?;
    info!("poolscaled stopped");
    Ok(())
}

async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;
    Ok(())
}

async fn check(config_path: &Path, ignore_schedule: bool, probe: bool) -> anyhow::Result<()> {
    let config = load_config(config_path, ignore_schedule)?;
    let settings = AutoscalerSettings::from_config(&config)?;
    for line in describe(&settings, Utc::now()) {
        println!("{line}");
    }

    if probe {
        let port = build_provisioner(&config)?;
        port.probe()
            .await
            .with_context(|| format!("probing {}", port.inner().endpoint()))?;
        let units = port.list_unit_ids().await?;
        println!("provisioner  {} ({} units)", port.inner().endpoint(), units.len());
    }
    Ok(())
}

/// Human-readable summary of the loop settings at `now`.
fn describe(settings: &AutoscalerSettings, now: DateTime<Utc>) -> Vec<String> {
    let bounds = &settings.bounds;
    let policy = match settings.policy {
        ScalingPolicy::IdleUnits => "idle units".to_string(),
        ScalingPolicy::Cores { cores_per_unit } => format!("cores ({cores_per_unit} per unit)"),
    };
    let windows: Vec<String> = settings
        .calendar
        .windows()
        .map(|w| {
            if w.whole_day {
                format!("{} all day", w.weekday)
            } else {
                format!("{} {:02}:00-{:02}:00", w.weekday, w.start_hour, w.end_hour)
            }
        })
        .collect();
    let schedule = if settings.ignore_schedule {
        "ignored, always reactive".to_string()
    } else if windows.is_empty() {
        "no windows, always pre-warming".to_string()
    } else {
        windows.join(", ")
    };
    let mode = if settings.schedule_active(now) {
        "reactive (inside window)"
    } else {
        "pre-warming to max (outside window)"
    };

    vec![
        format!("pool         {}", settings.pool),
        format!(
            "bounds       min {}, max {}, extra {}",
            bounds.min_units, bounds.max_units, bounds.extra_capacity
        ),
        format!("policy       {policy}"),
        format!("timezone     {}", settings.timezone),
        format!("schedule     {schedule}"),
        format!("now          {mode}"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_flags() {
        let cli = Cli::try_parse_from([
            "poolscaled",
            "--log-format",
            "json",
            "run",
            "--config",
            "/etc/poolscale.toml",
            "--ignore-schedule",
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        match cli.command {
            Command::Run {
                config,
                ignore_schedule,
            } => {
                assert_eq!(config, PathBuf::from("/etc/poolscale.toml"));
                assert!(ignore_schedule);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn scaffold_round_trips_through_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poolscale.toml");
        std::fs::write(&path, Config::scaffold("spark").to_toml_string().unwrap()).unwrap();

        let config = load_config(&path, true).unwrap();
        assert_eq!(config.pool.name, "spark");
        assert!(config.schedule.ignore);
        assert!(build_provisioner(&config).is_ok());
    }

    #[test]
    fn load_rejects_bad_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poolscale.toml");
        std::fs::write(
            &path,
            "[pool]\nname = \"p\"\nmin_units = 5\nmax_units = 3\n",
        )
        .unwrap();

        let err = load_config(&path, false).unwrap_err();
        assert!(format!("{err:#}").contains("min cannot exceed max"));
    }

    #[test]
    fn missing_provisioner_section_is_reported() {
        let config = Config::parse("[pool]\nname = \"p\"\nmin_units = 1\nmax_units = 3\n").unwrap();
        let err = build_provisioner(&config).err().unwrap();
        assert!(err.to_string().contains("[provisioner]"));
    }

    #[test]
    fn describes_schedule_and_mode() {
        let settings = AutoscalerSettings::from_config(&Config::scaffold("spark")).unwrap();
        // Saturday noon in Edmonton.
        let now = Utc.with_ymd_and_hms(2024, 1, 13, 19, 0, 0).unwrap();
        let lines = describe(&settings, now);

        assert_eq!(lines[0], "pool         spark");
        assert!(lines[2].ends_with("idle units"));
        assert!(lines[4].contains("Mon 20:00-06:00"));
        assert!(lines[4].contains("Sat all day"));
        assert!(lines[5].contains("reactive"));
    }
}
