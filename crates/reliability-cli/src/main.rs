//! `reliability` command-line interface.
//!
//! ```text
//! reliability run --prompt "Write a title for a ceramic mug" --task title --version v1 --runs 5
//! reliability report
//! reliability ingest briefs.csv
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use reliability_core::{Report, ResultsStore};
use reliability_runtime::{
    OutputMode, ProviderModel, ProviderRegistry, RunExecutor, RunRequest, RuntimeConfig,
    DEFAULT_RUNS,
};

#[derive(Parser, Debug)]
#[command(name = "reliability", version, about = "Measure how reliably an LLM answers one prompt")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a prompt N times, save the batch and print its report
    Run(RunArgs),

    /// Print the report for the most recent batch
    Report {
        /// Directory holding result files
        #[arg(long, default_value = reliability_core::DEFAULT_RESULTS_DIR)]
        results_dir: PathBuf,
    },

    /// Load content briefs from a CSV or XLSX file and print them as JSON
    Ingest {
        /// Brief file (.csv, or .xlsx with the `xlsx` feature)
        file: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Prompt text
    #[arg(long, required_unless_present = "prompt_file", conflicts_with = "prompt_file")]
    prompt: Option<String>,

    /// Read the prompt from a file
    #[arg(long)]
    prompt_file: Option<PathBuf>,

    /// Task identifier recorded in the batch
    #[arg(long)]
    task: String,

    /// Prompt version tag recorded in the batch
    #[arg(long = "version", id = "prompt_version")]
    prompt_version: String,

    /// Number of trials
    #[arg(long, default_value_t = DEFAULT_RUNS)]
    runs: u32,

    /// Sampling temperature
    #[arg(long, default_value_t = 0.0)]
    temperature: f64,

    /// Ask for a JSON object instead of free text
    #[arg(long)]
    json: bool,

    /// YAML runtime configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Provider registry key (overrides config)
    #[arg(long)]
    provider: Option<String>,

    /// Model id (overrides config; RELIABILITY_MODEL overrides both)
    #[arg(long)]
    model: Option<String>,

    /// Directory for result files (overrides config)
    #[arg(long)]
    results_dir: Option<PathBuf>,

    /// Only save the batch, skip the report
    #[arg(long)]
    no_report: bool,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Report { results_dir } => report(&ResultsStore::new(results_dir)),
        Command::Ingest { file } => ingest(&file),
    }
}

fn load_config(args: &RunArgs) -> Result<RuntimeConfig> {
    let mut config = match &args.config {
        Some(path) => RuntimeConfig::from_yaml_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };

    if let Some(provider) = &args.provider {
        config.provider = provider.clone();
    }
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if let Some(dir) = &args.results_dir {
        config.results_dir = dir.clone();
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn read_prompt(args: &RunArgs) -> Result<String> {
    let prompt = match (&args.prompt, &args.prompt_file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("reading prompt file {}", path.display()))?,
        (None, None) => bail!("either --prompt or --prompt-file is required"),
    };
    if prompt.trim().is_empty() {
        bail!("prompt is empty");
    }
    Ok(prompt)
}

async fn run(args: RunArgs) -> Result<()> {
    let config = load_config(&args)?;
    let prompt = read_prompt(&args)?;

    let registry = ProviderRegistry::with_defaults();
    tracing::info!(
        provider = %config.provider,
        available = ?registry.available_types(),
        results_dir = %config.results_dir.display(),
        "Starting run"
    );
    let model = ProviderModel::from_config(&registry, &config)?;
    let executor = RunExecutor::new(Arc::new(model));

    let mode = if args.json {
        OutputMode::Structured
    } else {
        OutputMode::Text
    };
    let request = RunRequest::new(prompt, args.task, args.prompt_version)
        .with_runs(args.runs)
        .with_temperature(args.temperature)
        .with_mode(mode);

    let store = config.results_store();
    let (path, _) = executor.execute_and_save(&request, None, &store).await?;
    println!("Saved results to {}", path.display());

    if !args.no_report {
        println!();
        report(&store)?;
    }
    Ok(())
}

fn report(store: &ResultsStore) -> Result<()> {
    let report = Report::latest(store)?;
    println!("{}", report);
    Ok(())
}

fn ingest(file: &Path) -> Result<()> {
    let briefs = reliability_ingest::load_briefs(file)
        .with_context(|| format!("loading briefs from {}", file.display()))?;
    println!("{}", serde_json::to_string_pretty(&briefs)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_args() {
        let cli = Cli::parse_from([
            "reliability",
            "run",
            "--prompt",
            "Say OK",
            "--task",
            "smoke",
            "--version",
            "v1",
            "--runs",
            "3",
            "--json",
        ]);

        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.prompt.as_deref(), Some("Say OK"));
                assert_eq!(args.prompt_version, "v1");
                assert_eq!(args.runs, 3);
                assert!(args.json);
                assert_eq!(args.temperature, 0.0);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_run_requires_one_prompt_source() {
        assert!(Cli::try_parse_from(["reliability", "run", "--task", "t", "--version", "v"]).is_err());
        assert!(Cli::try_parse_from([
            "reliability",
            "run",
            "--prompt",
            "a",
            "--prompt-file",
            "b.txt",
            "--task",
            "t",
            "--version",
            "v",
        ])
        .is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "reliability",
            "run",
            "--prompt",
            "p",
            "--task",
            "t",
            "--version",
            "v",
            "--provider",
            "scripted",
            "--results-dir",
            "out",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };

        let config = load_config(&args).unwrap();
        assert_eq!(config.provider, "scripted");
        assert_eq!(config.results_dir, PathBuf::from("out"));
    }

    #[test]
    fn test_report_default_dir() {
        let cli = Cli::parse_from(["reliability", "-v", "report"]);
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Command::Report { results_dir } => assert_eq!(results_dir, PathBuf::from("results")),
            other => panic!("unexpected command {:?}", other),
        }
    }
}
