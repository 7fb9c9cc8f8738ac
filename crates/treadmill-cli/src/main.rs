use clap::Parser;
use tracing::{info, warn};
use treadmill_core::config::TreadmillConfig;
use treadmill_machine::{Machine, MachineSettings};

mod notice;
mod task;

use task::CommandTask;

/// Run a command over and over, with pause alerts and a clean Ctrl-C stop.
#[derive(Debug, Parser)]
#[command(name = "treadmill", version)]
struct Cli {
    /// Config file (default: $TREADMILL_CONFIG or ~/.treadmill/treadmill.toml)
    #[arg(long)]
    config: Option<String>,

    /// Machine name used in logs and notices
    #[arg(long)]
    name: Option<String>,

    /// Seconds between run starts
    #[arg(long)]
    every: Option<f64>,

    /// Seconds to wait after a failed run
    #[arg(long)]
    on_error: Option<f64>,

    /// Pause instead of carrying on when a run fails
    #[arg(long)]
    pause_on_error: bool,

    /// Start paused
    #[arg(long)]
    paused: bool,

    /// Keep the last N runs (0 keeps all)
    #[arg(long)]
    history: Option<usize>,

    /// Command to run, with its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

impl Cli {
    /// Command-line flags win over the file and environment.
    fn apply(&self, config: &mut TreadmillConfig) {
        if let Some(name) = &self.name {
            config.machine.name = name.clone();
        }
        if let Some(every) = self.every {
            config.schedule.wait_run_frequency_secs = Some(every);
        }
        if let Some(on_error) = self.on_error {
            config.schedule.wait_on_error_secs = Some(on_error);
        }
        if self.pause_on_error {
            config.machine.pause_on_error = true;
        }
        if self.paused {
            config.machine.pause_on_start = true;
        }
        if let Some(history) = self.history {
            config.machine.run_history_limit = Some(history);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "treadmill=info,treadmill_machine=info".into()),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > TREADMILL_CONFIG env > ~/.treadmill/treadmill.toml
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("TREADMILL_CONFIG").ok());
    let mut config = TreadmillConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        TreadmillConfig::default()
    });
    cli.apply(&mut config);
    config.validate()?;

    let settings = MachineSettings::try_from(&config)?;
    let task = CommandTask::new(&cli.command)?;
    info!(
        machine = %config.machine.name,
        command = %task.command_line(),
        "starting treadmill"
    );

    let machine = Machine::builder(config.machine.name.clone())
        .with_settings(settings)
        .build(task);
    machine.start()?;

    // The loop only ends on its own when the engine fails.
    let waiter = machine.clone();
    let mut joined = tokio::task::spawn_blocking(move || waiter.join());

    tokio::select! {
        result = &mut joined => {
            result??;
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!(machine = %machine.name(), "interrupt received, stopping after the current run");
        }
    }

    machine.stop();
    joined.await??;

    if let Some(last) = machine.last_run() {
        info!(run = %serde_json::to_string(&last)?, "last run");
    }
    info!(machine = %machine.name(), runs = machine.run_count(), "treadmill stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "treadmill",
            "--name",
            "backup",
            "--every",
            "30",
            "--pause-on-error",
            "--history",
            "5",
            "rsync",
            "-a",
            "src/",
            "dst/",
        ]);
        assert_eq!(cli.command, vec!["rsync", "-a", "src/", "dst/"]);

        let mut config = TreadmillConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.machine.name, "backup");
        assert_eq!(config.schedule.wait_run_frequency_secs, Some(30.0));
        assert!(config.machine.pause_on_error);
        assert!(!config.machine.pause_on_start);
        assert_eq!(config.machine.run_history_limit, Some(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn command_is_required() {
        assert!(Cli::try_parse_from(["treadmill"]).is_err());
    }
}
