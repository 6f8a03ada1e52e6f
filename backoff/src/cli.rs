use crate::backoff::{Backoff, SleepOutcome};
use crate::config::{parse_bool, parse_factor, BackoffConfig, Config};
use crate::output::{emit_data, OutputFormat};
use crate::util::{format_duration, parse_duration};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{json, Value as JsonValue};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "backoff",
    about = "Exponential backoff delay generator",
    disable_help_subcommand = true,
    after_help = r#"Examples:
  backoff sequence --count 8
  backoff --factor 1.5 --max-delay 5s sequence --json
  backoff --jitter --raw sequence --count 5
  backoff --min-delay 50ms sleep --count 3
  backoff config set max_delay 10s
  BACKOFF_FACTOR=3 backoff config show"#
)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// JSON output
    #[arg(long, global = true)]
    pub json: bool,
    /// Raw output (one value per line)
    #[arg(long, global = true)]
    pub raw: bool,
    /// Minimum (first) delay, e.g. 100ms
    #[arg(long = "min-delay", global = true, value_parser = parse_duration)]
    pub min_delay: Option<Duration>,
    /// Maximum delay, e.g. 2s
    #[arg(long = "max-delay", global = true, value_parser = parse_duration)]
    pub max_delay: Option<Duration>,
    /// Growth factor per attempt
    #[arg(long, global = true, value_parser = parse_factor)]
    pub factor: Option<f64>,
    /// Randomize each delay between min-delay and the exponential value
    #[arg(
        long,
        global = true,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        value_parser = parse_bool
    )]
    pub jitter: Option<bool>,
    /// Verbose logging
    #[arg(long, global = true)]
    pub verbose: bool,
    /// Debug logging
    #[arg(long, global = true)]
    pub debug: bool,
    /// Color control
    #[arg(long, global = true, value_enum)]
    pub color: Option<ColorChoice>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
pub enum ColorChoice {
    Always,
    Auto,
    Never,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print successive delays
    Sequence {
        #[arg(long, default_value_t = 10)]
        count: u32,
    },
    /// Sleep through successive delays; Ctrl-C cancels
    Sleep {
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    Config(ConfigCmd),
}

#[derive(Args, Debug)]
pub struct ConfigCmd {
    #[command(subcommand)]
    sub: ConfigSub,
}
#[derive(Subcommand, Debug)]
pub enum ConfigSub {
    Show,
    Get { key: String },
    Set { key: String, value: String },
    Path,
}

pub async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Sequence { count } => run_sequence(*count, &effective_config(&cli)?, &cli),
        Commands::Sleep { count } => run_sleep(*count, &effective_config(&cli)?, &cli).await,
        Commands::Config(cmd) => run_config(cmd, &cli),
    }
}

/// File, then env, then flags.
fn effective_config(cli: &Cli) -> Result<Config> {
    let mut cfg = Config::load().context("load config")?;
    cfg.apply_env().context("apply env")?;
    cfg.apply_cli(cli);
    Ok(cfg)
}

fn fmt_from_cli(cli: &Cli) -> OutputFormat {
    if cli.raw {
        OutputFormat::Raw
    } else if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Yaml
    }
}

/// Drives `bo` for `count` steps and records each result. A step is
/// saturated when it left the attempt counter unchanged.
pub fn build_sequence(bo: &Backoff, count: u32) -> JsonValue {
    let steps = (1..=count)
        .map(|step| {
            let before = bo.attempts();
            let delay = bo.next_delay();
            let after = bo.attempts();
            json!({
                "step": step,
                "attempts": after,
                "delay": format_duration(delay),
                "delay_ms": delay.as_nanos() as f64 / 1_000_000.0,
                "saturated": after == before,
            })
        })
        .collect();
    JsonValue::Array(steps)
}

pub fn config_view(cfg: &BackoffConfig) -> JsonValue {
    json!({
        "min_delay": format_duration(cfg.min_delay),
        "max_delay": format_duration(cfg.max_delay),
        "factor": cfg.factor,
        "jitter": cfg.jitter,
    })
}

fn run_sequence(count: u32, cfg: &Config, cli: &Cli) -> Result<()> {
    let resolved = cfg.resolve().context("invalid backoff config")?;
    let bo = Backoff::from_config(&resolved);
    let steps = build_sequence(&bo, count);
    let fmt = fmt_from_cli(cli);
    if fmt == OutputFormat::Raw {
        let delays: Vec<JsonValue> = steps
            .as_array()
            .map(|arr| arr.iter().map(|s| s["delay"].clone()).collect())
            .unwrap_or_default();
        emit_data(&fmt, &JsonValue::Array(delays))
    } else {
        emit_data(&fmt, &steps)
    }
}

async fn run_sleep(count: u32, cfg: &Config, cli: &Cli) -> Result<()> {
    let resolved = cfg.resolve().context("invalid backoff config")?;
    let bo = Backoff::from_config(&resolved);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling sleep");
            on_signal.cancel();
        }
    });

    let started = Instant::now();
    let mut completed = 0u32;
    let mut cancelled = false;
    for step in 1..=count {
        match bo.sleep_cancelable(&cancel).await {
            SleepOutcome::Elapsed => {
                completed += 1;
                info!(step, attempts = bo.attempts(), "sleep elapsed");
            }
            SleepOutcome::Cancelled => {
                cancelled = true;
                break;
            }
        }
    }
    watcher.abort();

    let slept_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    emit_data(
        &fmt_from_cli(cli),
        &json!({
            "completed": completed,
            "cancelled": cancelled,
            "slept_ms": slept_ms,
            "attempts": bo.attempts(),
        }),
    )
}

fn run_config(cmd: &ConfigCmd, cli: &Cli) -> Result<()> {
    match &cmd.sub {
        ConfigSub::Show => {
            let resolved = effective_config(cli)?.resolve().context("invalid backoff config")?;
            let mut view = config_view(&resolved);
            if let Some(obj) = view.as_object_mut() {
                obj.insert("path".into(), JsonValue::String(Config::config_path().display().to_string()));
            }
            emit_data(&fmt_from_cli(cli), &view)
        }
        ConfigSub::Get { key } => {
            let resolved = effective_config(cli)?.resolve().context("invalid backoff config")?;
            let v = Config::from(resolved).get(key)?.unwrap_or_default();
            emit_data(&OutputFormat::Raw, &JsonValue::String(v))
        }
        ConfigSub::Set { key, value } => {
            // File layer only: env and flags must not leak into the saved file
            let path = Config::config_path();
            let mut file_cfg = match Config::load_from(&path) {
                Ok(cfg) => cfg,
                Err(err) => {
                    warn!(path = %path.display(), "config unreadable ({:#}), starting from defaults", err);
                    Config::default()
                }
            };
            file_cfg.set(key, value)?;
            file_cfg.resolve().context("refusing to save invalid config")?;
            file_cfg.save_to(&path)?;
            info!(key = %key, value = %value, "config saved");
            emit_data(&OutputFormat::Yaml, &json!({"status": "ok"}))
        }
        ConfigSub::Path => {
            emit_data(&OutputFormat::Raw, &JsonValue::String(Config::config_path().display().to_string()))
        }
    }
}
