//! Stratus CLI - pipeline runner and registry inspector

use clap::{Parser, Subcommand};
use colored::Colorize;

use stratus::{ConfigFile, Orchestrator};

#[derive(Parser)]
#[command(name = "stratus")]
#[command(about = "Stratus - configuration-driven data-processing orchestrator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline configuration file
    Run {
        /// Path to the pipeline YAML file
        config: String,

        /// Force sequential execution (max_workers = 1)
        #[arg(long)]
        sequential: bool,
    },

    /// List registered methods
    List {
        /// Filter by component
        #[arg(short, long)]
        component: Option<String>,

        /// Filter by engine
        #[arg(short, long)]
        engine: Option<String>,
    },

    /// Describe the implementations of one capability
    Describe {
        component: String,
        method: String,
    },

    /// Delete the persistent cache
    ClearCache {
        /// Store base directory
        #[arg(long, default_value = ".pipeline")]
        base: String,
    },

    /// Show registry and hook statistics
    Status,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run { config, sequential } => run_pipeline(&config, sequential).await,
        Commands::List { component, engine } => list_methods(component, engine),
        Commands::Describe { component, method } => describe(&component, &method),
        Commands::ClearCache { base } => {
            Orchestrator::clear_cache(&base);
            println!("{} cache cleared under {base}", "ok:".green().bold());
            Ok(())
        }
        Commands::Status => status(),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run_pipeline(path: &str, sequential: bool) -> anyhow::Result<()> {
    let mut config = ConfigFile::load(path)?;
    if sequential {
        config.pipeline.orchestration.task_runner = stratus::config::TaskRunner::Sequential;
    }

    let orchestrator = Orchestrator::with_registry(stratus::registry::global());
    let result = orchestrator.run(&config).await?;

    let status_line = match result.overall_status.as_str() {
        "completed" => result.overall_status.green().bold(),
        "completed_with_failures" => result.overall_status.yellow().bold(),
        _ => result.overall_status.red().bold(),
    };
    println!("{} {}", "status:".bold(), status_line);
    println!(
        "  steps: {}  cache hits: {}/{}  execution time: {:.3}s",
        result.executed_steps.len(),
        result.metrics.cache.cache_hits,
        result.metrics.cache.node_total,
        result.metrics.cache.total_execution_time_sec,
    );
    for (step, lineage) in &result.lineage {
        let marker = match (&lineage.status, lineage.cached) {
            (stratus::StepStatus::Completed, true) => "cached".cyan(),
            (stratus::StepStatus::Completed, false) => "ok".green(),
            (stratus::StepStatus::Failed, _) => "failed".red(),
            (stratus::StepStatus::Skipped, _) => "skipped".yellow(),
        };
        println!("  {marker:>8}  {step}  ({:.3}s)", lineage.duration_sec);
    }

    if result.overall_status == "failed" {
        anyhow::bail!("pipeline failed");
    }
    Ok(())
}

fn list_methods(component: Option<String>, engine: Option<String>) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::with_registry(stratus::registry::global());
    let records = orchestrator.list_methods(component.as_deref(), engine.as_deref());
    if records.is_empty() {
        println!("no methods registered");
        return Ok(());
    }
    for record in records {
        let flags = if record.deprecated { " (deprecated)" } else { "" };
        println!(
            "{}  v{} p{}{}",
            record.full_key().bold(),
            record.version,
            record.priority,
            flags.yellow(),
        );
        if !record.description.is_empty() {
            println!("    {}", record.description);
        }
    }
    Ok(())
}

fn describe(component: &str, method: &str) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::with_registry(stratus::registry::global());
    let desc = orchestrator.describe(component, method);
    println!("{}", serde_json::to_string_pretty(&desc)?);
    Ok(())
}

fn status() -> anyhow::Result<()> {
    let orchestrator = Orchestrator::with_registry(stratus::registry::global());
    let stats = orchestrator.stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
