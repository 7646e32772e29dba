//! Strata CLI - code partitioning and import dependency analysis
//!
//! Every command prints plain JSON (or YAML for configuration) to stdout;
//! logs go to stderr.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use strata::api::engine::{AnalysisEngine, AnalysisOptions};
use strata::core::config::StrataConfig;
use strata::lang::{registered_languages, Language};

#[derive(Parser)]
#[command(name = "strata")]
#[command(version)]
#[command(about = "Fault-tolerant code partitioning and import dependency analysis")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (YAML)
    #[arg(short, long, global = true, env = "STRATA_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging for debugging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a file into located, typed blocks
    Partition(PartitionArgs),

    /// Build the import dependency graph reachable from entry files
    Imports(ImportsArgs),

    /// Print default configuration in YAML format
    #[command(name = "print-default-config")]
    PrintDefaultConfig,

    /// Validate a configuration file
    #[command(name = "validate-config")]
    ValidateConfig {
        /// Configuration file to check
        path: PathBuf,
    },

    /// List recognised languages and their extensions
    #[command(name = "list-languages")]
    ListLanguages,
}

#[derive(Args)]
struct PartitionArgs {
    /// File to partition
    file: PathBuf,

    /// Skip detection and partition as this language
    #[arg(short, long)]
    language: Option<String>,

    /// Print only a per-block summary instead of full block content
    #[arg(long)]
    summary: bool,
}

#[derive(Args)]
struct ImportsArgs {
    /// Entry files
    #[arg(required = true)]
    entries: Vec<PathBuf>,

    /// Maximum traversal depth (entry files are depth 0)
    #[arg(long)]
    max_depth: Option<usize>,

    /// Ignore cached analyses
    #[arg(long)]
    refresh: bool,

    /// Project root used to classify and resolve imports
    #[arg(long)]
    project_root: Option<PathBuf>,

    /// Disable the import analysis cache
    #[arg(long)]
    no_cache: bool,

    /// Exit with status 1 when a cycle is found
    #[arg(long)]
    fail_on_cycles: bool,
}

#[derive(Serialize)]
struct BlockSummary<'a> {
    name: Option<&'a str>,
    kind: &'static str,
    start_line: usize,
    end_line: usize,
    estimated_tokens: usize,
}

#[derive(Serialize)]
struct LanguageEntry {
    name: &'static str,
    display_name: &'static str,
    extensions: &'static [&'static str],
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool, format: LogFormat) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Partition(args) => {
            let engine = AnalysisEngine::new(load_config(cli.config.as_deref())?)?;
            partition_command(&engine, args)?;
        }
        Commands::Imports(args) => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(root) = &args.project_root {
                config = config.with_project_root(root);
            }
            if args.no_cache {
                config = config.without_cache();
            }
            let engine = AnalysisEngine::new(config)?;
            return imports_command(&engine, args);
        }
        Commands::PrintDefaultConfig => {
            print!("{}", serde_yaml::to_string(&StrataConfig::default())?);
        }
        Commands::ValidateConfig { path } => {
            StrataConfig::from_yaml_file(&path)
                .with_context(|| format!("Invalid configuration: {}", path.display()))?;
            println!("Configuration is valid: {}", path.display());
        }
        Commands::ListLanguages => {
            let languages: Vec<LanguageEntry> = registered_languages()
                .iter()
                .map(|info| LanguageEntry {
                    name: info.language.name(),
                    display_name: info.display_name,
                    extensions: info.extensions,
                })
                .collect();
            print_json(&languages)?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn load_config(path: Option<&Path>) -> anyhow::Result<StrataConfig> {
    match path {
        Some(path) => {
            debug!(path = %path.display(), "Loading configuration");
            StrataConfig::from_yaml_file(path)
                .with_context(|| format!("Failed to load configuration: {}", path.display()))
        }
        None => Ok(StrataConfig::default()),
    }
}

fn partition_command(engine: &AnalysisEngine, args: PartitionArgs) -> anyhow::Result<()> {
    let language = args
        .language
        .as_deref()
        .map(|name| Language::from_name(name).ok_or_else(|| anyhow!("Unknown language: {name}")))
        .transpose()?;

    let result = engine.partition_file(&args.file, None, language);
    if args.summary {
        let blocks: Vec<BlockSummary<'_>> = result
            .blocks
            .iter()
            .map(|block| BlockSummary {
                name: block.name.as_deref(),
                kind: block.kind.as_str(),
                start_line: block.location.start_line,
                end_line: block.location.end_line,
                estimated_tokens: block.estimated_tokens,
            })
            .collect();
        print_json(&serde_json::json!({
            "file_path": result.file_path,
            "language": result.language,
            "strategy_used": result.strategy_used,
            "success": result.success,
            "blocks": blocks,
            "warnings": result.warnings,
            "errors": result.errors,
        }))
    } else {
        print_json(&result)
    }
}

fn imports_command(engine: &AnalysisEngine, args: ImportsArgs) -> anyhow::Result<ExitCode> {
    let options = AnalysisOptions {
        max_depth: args.max_depth,
        refresh: args.refresh,
    };
    let report = engine.analyze_imports(&args.entries, options)?;
    print_json(&report)?;

    if args.fail_on_cycles && report.has_cycles() {
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
