//! # allot
//!
//! Command line entry point for the context window budget planner.
//!
//! Every command prints JSON on stdout; logs go to stderr.

#![deny(unsafe_code)]

mod catalog;

use std::path::PathBuf;
use std::sync::Arc;

use allot_core::{ContextWindowType, ContextWindowTypeStore, SessionId, StaticModuleRegistry, TurnContext, validate};
use allot_engine::{TargetCondenser, TurnPlanner};
use allot_settings::AllotSettings;
use allot_telemetry::{TelemetryConfig, init_telemetry};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::catalog::{TurnInput, build_catalog, read_json, resolve_type};

/// Context window budget planner.
#[derive(Parser, Debug)]
#[command(name = "allot", version, about = "Plan per-turn context window budgets")]
struct Cli {
    /// Settings file (defaults to `~/.allot/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a context window type file.
    Validate {
        /// Path to the type JSON.
        file: PathBuf,
    },
    /// Plan a single turn.
    Plan {
        /// Type file or catalog id. Defaults to the configured default type.
        #[arg(long = "type")]
        window_type: Option<String>,
        /// Turn context JSON.
        #[arg(long)]
        turn: PathBuf,
    },
    /// Plan a whole session and print per-turn results plus the session report.
    Simulate {
        /// Type file or catalog id. Defaults to the configured default type.
        #[arg(long = "type")]
        window_type: Option<String>,
        /// JSON array of turn contexts.
        #[arg(long)]
        session: PathBuf,
        /// Session id to tag the aggregate with. A new one is generated if omitted.
        #[arg(long)]
        session_id: Option<String>,
    },
    /// List the types in the catalog.
    Presets,
}

fn load_settings(path: Option<&PathBuf>) -> Result<AllotSettings> {
    match path {
        Some(p) => allot_settings::load_settings_from_path(p)
            .with_context(|| format!("Failed to load settings: {}", p.display())),
        None => Ok(allot_settings::get_settings().clone()),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{out}");
    Ok(())
}

fn run(cli: Cli, settings: &AllotSettings) -> Result<()> {
    let registry = Arc::new(StaticModuleRegistry::builtin());
    let planner = TurnPlanner::from_settings(&settings.engine);

    match cli.command {
        Command::Validate { file } => {
            let candidate: ContextWindowType = read_json(&file)?;
            match validate(candidate, &*registry) {
                Ok(validated) => print_json(&json!({
                    "valid": true,
                    "id": validated.id,
                    "warnings": validated.warnings(),
                })),
                Err(errors) => {
                    print_json(&json!({
                        "valid": false,
                        "violations": errors.violations,
                    }))?;
                    Err(errors).with_context(|| format!("{} is not a valid context window type", file.display()))
                }
            }
        }
        Command::Plan { window_type, turn } => {
            let store = build_catalog(&settings.types, &registry)?;
            let t = resolve_type(window_type.as_deref(), &store, &registry, &settings.types.default_type)?;
            let ctx = read_json::<TurnInput>(&turn)?.into_context(settings.engine.default_capacity_tokens);

            let result = planner.plan(&t, &ctx, &TargetCondenser);
            for w in &result.warnings {
                warn!(warning = %w, "turn planned with warning");
            }
            print_json(&result)
        }
        Command::Simulate {
            window_type,
            session,
            session_id,
        } => {
            let store = build_catalog(&settings.types, &registry)?;
            let t = resolve_type(window_type.as_deref(), &store, &registry, &settings.types.default_type)?;
            let turns: Vec<TurnContext> = read_json::<Vec<TurnInput>>(&session)?
                .into_iter()
                .map(|input| input.into_context(settings.engine.default_capacity_tokens))
                .collect();
            let session_id = session_id.map_or_else(SessionId::new, SessionId::from);

            let (results, aggregate) = planner.plan_session(session_id.clone(), &t, &turns, &TargetCondenser);
            debug!(session_id = %session_id, turns = results.len(), "session simulated");
            print_json(&json!({
                "sessionId": session_id,
                "typeId": t.id,
                "turns": results,
                "aggregate": aggregate,
                "report": aggregate.report(),
            }))
        }
        Command::Presets => {
            let store = build_catalog(&settings.types, &registry)?;
            let types = store.list();
            let listed: Vec<&ContextWindowType> = types.iter().map(|t| t.as_type()).collect();
            print_json(&listed)
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.settings.as_ref())?;

    let logging = &settings.logging;
    let (config, rejected) = TelemetryConfig::from_levels(&logging.level, logging.json, &logging.module_levels);
    let _ = init_telemetry(&config);
    for level in rejected {
        warn!(level = %level, "ignoring unknown log level");
    }

    run(cli, &settings)
}
