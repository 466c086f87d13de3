//! # gcbridge
//!
//! Command line front end for the GC bridge. Runs canned bridge passes over
//! the simulated heaps and reports what the capability probe selects.
//!
//! Configuration comes from the `GCBRIDGE_*` environment variables (see
//! [`gcbridge_core::config`]); command line flags override them. Set
//! `RUST_LOG` (for example `RUST_LOG=gcbridge::gc=trace`) together with
//! `--trace` to see the bridge's own diagnostics.
use clap::{Parser, Subcommand, ValueEnum};
use gcbridge_core::{BridgeConfig, BridgeError, WeakRefMode};
use gcbridge_sim::{Scenario, run_scenario};
use serde::Serialize;
use std::process::ExitCode;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Cross-heap GC bridge driven against simulated heaps"
)]
pub struct Args {
    /// Log bridge diagnostics to stderr, filtered by `RUST_LOG`.
    #[arg(long, global = true)]
    pub trace: bool,
    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,
    /// Force the weak reference strategy.
    #[arg(long, global = true, value_enum)]
    pub weak_refs: Option<WeakRefsArg>,
    /// Turn the bridge off.
    #[arg(long, global = true)]
    pub disable: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build a small object graph, run one bridge pass and print its outcome.
    Scenario {
        #[arg(value_enum)]
        name: ScenarioArg,
        /// Ring length for `ring`.
        #[arg(long, default_value_t = 4)]
        size: usize,
        /// Pin the first peer of the ring on the host side.
        #[arg(long)]
        pinned: bool,
    },
    /// Print the weak reference strategy the capability probe selects.
    Probe,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioArg {
    /// Unreferenced two-object cycle.
    A,
    /// Two-object cycle held by a host root.
    B,
    /// Object-less component linked to a rooted singleton.
    C,
    /// Ring of `--size` objects.
    Ring,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeakRefsArg {
    /// Native weak global references.
    Jni,
    /// Weak references emulated with a wrapper object.
    Java,
}

impl From<WeakRefsArg> for WeakRefMode {
    fn from(arg: WeakRefsArg) -> Self {
        match arg {
            WeakRefsArg::Jni => WeakRefMode::Native,
            WeakRefsArg::Java => WeakRefMode::Emulated,
        }
    }
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error("Failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
struct ProbeReport {
    enabled: bool,
    weak_ref_mode: WeakRefMode,
    weak_ref_override: Option<WeakRefMode>,
    api_level: Option<u32>,
    vm_name: Option<String>,
    vm_version: Option<String>,
}

fn install_subscriber(trace: bool) {
    if !trace {
        return;
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Apply the command line overrides to `config`.
pub fn effective_config(args: &Args, mut config: BridgeConfig) -> BridgeConfig {
    if let Some(mode) = args.weak_refs {
        config = config.weak_ref_mode(mode.into());
    }
    if args.disable {
        config = config.enabled(false);
    }
    config
}

/// Execute `args` against `config` and return the text to print.
pub fn run(args: &Args, config: BridgeConfig) -> Result<String, CliError> {
    let config = effective_config(args, config);
    match args.command {
        Command::Scenario { name, size, pinned } => {
            let scenario = match name {
                ScenarioArg::A => Scenario::A,
                ScenarioArg::B => Scenario::B,
                ScenarioArg::C => Scenario::C,
                ScenarioArg::Ring => Scenario::Ring { size, pinned },
            };
            let report = run_scenario(scenario, config)?;
            if args.json {
                Ok(serde_json::to_string_pretty(&report)?)
            } else {
                Ok(report.to_string())
            }
        }
        Command::Probe => {
            let report = ProbeReport {
                enabled: config.enabled,
                weak_ref_mode: config.weak_ref_mode_selected(),
                weak_ref_override: config.weak_ref_override,
                api_level: config.runtime.api_level,
                vm_name: config.runtime.vm_name.clone(),
                vm_version: config.runtime.vm_version.clone(),
            };
            if args.json {
                Ok(serde_json::to_string_pretty(&report)?)
            } else {
                Ok(format!(
                    "bridge {}, weak references: {:?}{}",
                    if report.enabled { "enabled" } else { "disabled" },
                    report.weak_ref_mode,
                    if report.weak_ref_override.is_some() {
                        " (forced)"
                    } else {
                        ""
                    }
                ))
            }
        }
    }
}

pub fn run_cli() -> ExitCode {
    let args = Args::parse();
    install_subscriber(args.trace);

    let config = BridgeConfig::from_env();
    tracing::debug!(target: "gcbridge::cli", "{:?} with {:?}", args.command, config);

    match run(&args, config) {
        Ok(output) => {
            println!("{}", output.trim_end());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(1)
        }
    }
}
