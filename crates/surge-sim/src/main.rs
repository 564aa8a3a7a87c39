//! surge-sim — run the Surge autoscaler against a synthetic load.
//!
//! Loads a policy file, replays a load pattern (one value per tick,
//! cycling), and logs every capacity change the controller makes.
//!
//! # Usage
//!
//! ```text
//! surge-sim init > policy.toml
//! surge-sim run --policy policy.toml --load 5,40,40,40,1,1 --duration 30
//! surge-sim run --policy policy.toml --reload tight.toml --reload-after 10
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use surge_autoscale::{Controller, Policy, PolicyFile, SampleFn, SetCapacityFn, StatusFn};
use tracing::info;

/// Log filter used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "info,surge_autoscale=debug,surge_sim=debug";

#[derive(Parser)]
#[command(name = "surge-sim", about = "Surge autoscaler simulator", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a starter policy file.
    Init,
    /// Run the controller against a load pattern.
    Run {
        /// Policy file (TOML).
        #[arg(long)]
        policy: PathBuf,

        /// Comma-separated load values, replayed one per tick.
        #[arg(long, default_value = "0")]
        load: String,

        /// How long to run, in seconds.
        #[arg(long, default_value = "30")]
        duration: u64,

        /// Policy file to swap in while running.
        #[arg(long)]
        reload: Option<PathBuf>,

        /// Seconds after start at which `--reload` is applied.
        #[arg(long, default_value = "10")]
        reload_after: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Init => {
            print!("{}", starter_policy().to_toml_string()?);
            Ok(())
        }
        Command::Run {
            policy,
            load,
            duration,
            reload,
            reload_after,
        } => {
            let pattern = parse_load_pattern(&load)?;
            run_simulation(
                &policy,
                pattern,
                Duration::from_secs(duration),
                reload.as_deref(),
                Duration::from_secs(reload_after),
            )
            .await
        }
    }
}

async fn run_simulation(
    policy_path: &Path,
    pattern: Vec<i64>,
    duration: Duration,
    reload_path: Option<&Path>,
    reload_after: Duration,
) -> anyhow::Result<()> {
    let sample = cycling_load(pattern);
    let set: SetCapacityFn = Arc::new(|desired: i64| {
        info!(desired, "capacity set");
    });
    let status: StatusFn = Arc::new(|| true);

    let policy = load_policy(policy_path, &sample, &set, &status)?;
    let controller = Controller::start(&policy);

    // The replacement is loaded up front so a bad file fails fast.
    let replacement = reload_path
        .map(|path| load_policy(path, &sample, &set, &status))
        .transpose()?;

    let finished = tokio::time::sleep(duration);
    tokio::pin!(finished);

    if let Some(replacement) = replacement {
        tokio::select! {
            _ = tokio::time::sleep(reload_after) => {
                controller.reload(&replacement);
            }
            _ = &mut finished => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                return shutdown(controller).await;
            }
        }
    }

    tokio::select! {
        _ = &mut finished => {
            info!("simulation finished");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
        }
    }

    shutdown(controller).await
}

async fn shutdown(controller: Controller) -> anyhow::Result<()> {
    controller
        .shutdown()
        .await
        .context("autoscaling controller failed")?;
    info!(desired = controller.desired(), "simulator stopped");
    Ok(())
}

fn load_policy(
    path: &Path,
    sample: &SampleFn,
    set: &SetCapacityFn,
    status: &StatusFn,
) -> anyhow::Result<Policy> {
    let file = PolicyFile::from_file(path)
        .with_context(|| format!("loading policy {}", path.display()))?;
    file.validate()?;
    let policy = file.into_policy(Arc::clone(sample), Arc::clone(set), Arc::clone(status))?;
    info!(path = %path.display(), ?policy, "policy loaded");
    Ok(policy)
}

/// A sampler that walks `pattern` one value per call, wrapping around.
fn cycling_load(pattern: Vec<i64>) -> SampleFn {
    let cursor = AtomicUsize::new(0);
    Arc::new(move || {
        let i = cursor.fetch_add(1, Ordering::Relaxed);
        pattern[i % pattern.len()]
    })
}

fn parse_load_pattern(s: &str) -> anyhow::Result<Vec<i64>> {
    let pattern = s
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<i64>()
                .with_context(|| format!("invalid load value {v:?}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    anyhow::ensure!(!pattern.is_empty(), "load pattern is empty");
    Ok(pattern)
}

fn starter_policy() -> PolicyFile {
    PolicyFile {
        min: 1,
        max: 8,
        scale_up_threshold: 30,
        scale_down_threshold: 5,
        interval: Some("1s".to_string()),
        cool_down: Some("5s".to_string()),
    }
}
