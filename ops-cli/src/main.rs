use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use colored::*;
use logger_redacted::{init_tracing, LogFormat, LoggerConfig};
use ops_cli::{describe_definition, load_definitions, run_script, Script};
use std::path::PathBuf;
use tracing::info;
use workflow_engine::{EngineConfig, WorkflowEngine};

/// User workflow operations tool
#[derive(Parser, Debug)]
#[command(name = "userworkflow")]
#[command(about = "Validate, inspect and simulate user provisioning workflows")]
#[command(version)]
struct Args {
    /// Log filter, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check a definitions file for structural errors
    Validate {
        definitions: PathBuf,
    },
    /// Print the steps and transitions of each definition
    Inspect {
        definitions: PathBuf,

        /// Only this workflow kind
        #[arg(long)]
        kind: Option<String>,

        /// Print the definitions as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replay a script against an in-memory engine and print a JSON report
    Simulate {
        /// Definitions file; the built-in user workflow when omitted
        #[arg(long)]
        definitions: Option<PathBuf>,

        #[arg(long)]
        script: PathBuf,

        /// Engine configuration file (YAML, TOML or JSON)
        #[arg(long, env = "USERWF_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing(&LoggerConfig {
        log_level: args.log_level.clone(),
        format: if args.json_logs {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        },
    })?;

    match args.command {
        Command::Validate { definitions } => {
            let registry = load_definitions(&definitions)
                .with_context(|| format!("{} is not a valid definitions file", definitions.display()))?;
            for kind in registry.kinds() {
                let definition = registry.get(kind)?;
                println!(
                    "{} {} ({} steps)",
                    "✓".bright_green(),
                    kind.bright_white(),
                    definition.steps.len()
                );
            }
        }
        Command::Inspect {
            definitions,
            kind,
            json,
        } => {
            let registry = load_definitions(&definitions)?;
            let kinds: Vec<String> = match kind {
                Some(kind) => vec![registry.get(&kind)?.kind.clone()],
                None => registry.kinds().into_iter().map(str::to_string).collect(),
            };
            for kind in kinds {
                let definition = registry.get(&kind)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(definition.as_ref())?);
                } else {
                    print!("{}", describe_definition(&definition).bright_cyan());
                }
            }
        }
        Command::Simulate {
            definitions,
            script,
            config,
        } => {
            let mut engine_config = EngineConfig::load(config.as_deref())?;
            if definitions.is_some() {
                engine_config.definitions_path = definitions;
            }
            let engine = WorkflowEngine::builder().config(engine_config).build()?;
            let script = Script::from_path(&script)?;
            info!(steps = script.steps.len(), "Replaying script");

            let report = run_script(&engine, &script).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.failures > 0 {
                eprintln!(
                    "{}",
                    format!("{} of {} steps did not behave as expected", report.failures, report.steps.len())
                        .bright_red()
                );
                bail!("simulation failed");
            }
            eprintln!("{}", "All steps behaved as expected".bright_green());
        }
    }
    Ok(())
}
