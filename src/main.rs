//! # shelfname CLI
//!
//! The `shelfname` binary renames PDF and EPUB files after their
//! reconciled author, title and year.
//!
//! ## Usage
//!
//! ```bash
//! shelfname --config ./config/shelfname.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `shelfname rename <paths>…` | Derive metadata and rename (or preview with `--dry-run`) |
//! | `shelfname inspect <paths>…` | Show the reconciled record per file; never renames |
//! | `shelfname cache stats` | Show AI cache entry count and age |
//! | `shelfname cache clear` | Delete every cached AI result |
//!
//! ## Examples
//!
//! ```bash
//! # Preview what would change
//! shelfname --dry-run rename ~/Books
//!
//! # Rename with AI correction for low-confidence files
//! export PERPLEXITY_API_KEY=pplx-...
//! shelfname --use-ai --confidence 0.8 rename ~/Books
//!
//! # Machine-readable outcomes
//! shelfname --dry-run --json rename ~/Books > plan.json
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use shelfname::cache::Cache;
use shelfname::config::{self, Config};
use shelfname::enhance;
use shelfname::models::{FileOutcome, OutcomeStatus};
use shelfname::pipeline::{Pipeline, Summary};
use shelfname::progress::{ProgressMode, ProgressReporter};
use shelfname::scan;

/// shelfname: derive canonical author/title/year for PDF and EPUB files
/// and rename them consistently.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/shelfname.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "shelfname",
    about = "Derive canonical author/title/year metadata for PDF and EPUB files and rename them",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/shelfname.toml`. A missing file means
    /// built-in defaults.
    #[arg(long, global = true, default_value = "./config/shelfname.toml")]
    config: PathBuf,

    /// Report proposed names without renaming anything.
    #[arg(long, global = true)]
    dry_run: bool,

    /// Enable AI enhancement for low-confidence files.
    #[arg(long, global = true)]
    use_ai: bool,

    /// Skip the content scan of leading pages.
    #[arg(long, global = true)]
    no_advanced: bool,

    /// Confidence below which AI enhancement is attempted (0.0-1.0).
    #[arg(long, global = true)]
    confidence: Option<f64>,

    /// Earliest plausible publication year.
    #[arg(long, global = true)]
    min_year: Option<i32>,

    /// Latest plausible publication year.
    #[arg(long, global = true)]
    max_year: Option<i32>,

    /// Maximum number of files processed concurrently.
    #[arg(long, global = true)]
    max_concurrent: Option<usize>,

    /// Print outcomes as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    /// Progress output on stderr.
    #[arg(long, global = true, value_enum, default_value_t = ProgressArg::Auto)]
    progress: ProgressArg,

    /// More log output (-v info, -vv debug). `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Derive metadata for each file and rename it.
    ///
    /// Directories are walked (recursively by default) for files matching
    /// `extraction.include_globs`.
    Rename {
        /// Files or directories to process.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Show the reconciled metadata per file. Never renames.
    Inspect {
        /// Files or directories to inspect.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Manage the AI result cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show entry count and the oldest/newest entry.
    Stats,
    /// Delete every cached entry.
    Clear,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    /// Human progress when stderr is a terminal.
    Auto,
    Off,
    Human,
    Json,
}

impl ProgressArg {
    fn mode(self) -> ProgressMode {
        match self {
            ProgressArg::Auto => ProgressMode::default_for_tty(),
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "shelfname=warn",
        1 => "shelfname=info",
        _ => "shelfname=debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut cfg = config::load_config(&cli.config)?;
    apply_overrides(&mut cfg, &cli);
    let home = std::env::var_os("HOME").map(PathBuf::from);
    cfg.cache.path = config::expand_tilde(&cfg.cache.path, home.as_deref());
    cfg.validate().context("invalid configuration")?;

    match cli.command {
        Commands::Rename { ref paths } => {
            let outcomes = run(&cfg, paths, cli.progress.mode()).await?;
            report(&outcomes, cli.json, false)?;
            if outcomes.iter().any(|o| o.status == OutcomeStatus::Failed) {
                std::process::exit(1);
            }
        }
        Commands::Inspect { ref paths } => {
            cfg.run.dry_run = true;
            let outcomes = run(&cfg, paths, cli.progress.mode()).await?;
            report(&outcomes, cli.json, true)?;
        }
        Commands::Cache { ref action } => {
            let cache = Cache::open(&cfg.cache)
                .await
                .with_context(|| format!("Failed to open cache at {}", cfg.cache.path.display()))?;
            match action {
                CacheAction::Stats => {
                    let stats = cache.stats().await?;
                    if cli.json {
                        println!("{}", serde_json::to_string_pretty(&stats)?);
                    } else {
                        println!("Cache: {}", cfg.cache.path.display());
                        println!("Entries: {}", stats.entries);
                        if let (Some(oldest), Some(newest)) = (stats.oldest, stats.newest) {
                            println!("Oldest: {}", oldest.format("%Y-%m-%d %H:%M:%S UTC"));
                            println!("Newest: {}", newest.format("%Y-%m-%d %H:%M:%S UTC"));
                        }
                    }
                }
                CacheAction::Clear => {
                    let removed = cache.clear().await?;
                    println!("Cleared {} cache entr{}.", removed, if removed == 1 { "y" } else { "ies" });
                }
            }
        }
    }

    Ok(())
}

fn apply_overrides(cfg: &mut Config, cli: &Cli) {
    if cli.dry_run {
        cfg.run.dry_run = true;
    }
    if cli.use_ai {
        cfg.enhancement.enabled = true;
    }
    if cli.no_advanced {
        cfg.extraction.advanced = false;
    }
    if let Some(threshold) = cli.confidence {
        cfg.enhancement.threshold = threshold;
    }
    if let Some(min) = cli.min_year {
        cfg.years.min = min;
    }
    if let Some(max) = cli.max_year {
        cfg.years.max = max;
    }
    if let Some(n) = cli.max_concurrent {
        cfg.run.max_concurrent = n;
    }
}

async fn run(
    cfg: &Config,
    paths: &[PathBuf],
    progress: ProgressMode,
) -> anyhow::Result<Vec<FileOutcome>> {
    // Besides HOME and logging setup, the only environment read.
    let credential = std::env::var(&cfg.enhancement.api_key_env).ok();
    let oracle = enhance::create_oracle(&cfg.enhancement, credential)?;

    let files = scan::discover(paths, &cfg.extraction)?;
    if files.is_empty() {
        bail!("No PDF or EPUB files found in the given paths");
    }

    let cache = match Cache::open(&cfg.cache).await {
        Ok(cache) => cache,
        Err(e) => {
            tracing::warn!(error = %e, "AI cache unavailable, using an in-memory cache");
            Cache::in_memory()
        }
    };

    let pipeline = Pipeline::new(cfg.clone(), oracle, Arc::new(cache));
    let reporter: Arc<dyn ProgressReporter> = Arc::from(progress.reporter());

    tokio::select! {
        outcomes = pipeline.run_batch(files, reporter) => Ok(outcomes),
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted; files already renamed keep their new names.");
            std::process::exit(130);
        }
    }
}

fn report(outcomes: &[FileOutcome], json: bool, detailed: bool) -> anyhow::Result<()> {
    let summary = Summary::from_outcomes(outcomes);

    if json {
        let doc = serde_json::json!({
            "outcomes": outcomes,
            "summary": summary,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    for o in outcomes {
        let original = o.original.display();
        match (&o.proposed, o.status) {
            (Some(target), OutcomeStatus::Renamed | OutcomeStatus::DryRun) => {
                let ai = if o.enhancement.used_ai() { ", ai" } else { "" };
                println!(
                    "{:<9}  {} -> {}  (confidence {:.2}{})",
                    o.status.as_str(),
                    original,
                    target.display(),
                    o.confidence,
                    ai
                );
            }
            _ => {
                let reason = o.message.as_deref().unwrap_or("");
                println!("{:<9}  {}  {}", o.status.as_str(), original, reason);
            }
        }

        if detailed {
            if let Some(record) = &o.record {
                println!("    author: {}", record.author.as_deref().unwrap_or("-"));
                println!("    title:  {}", record.title.as_deref().unwrap_or("-"));
                println!(
                    "    year:   {}",
                    record.year.map(|y| y.to_string()).unwrap_or_else(|| "-".to_string())
                );
                println!("    confidence: {:.2}", record.confidence);
                println!("    enhancement: {:?}", o.enhancement);
            }
        }
        for warning in &o.warnings {
            println!("    warning: {}", warning);
        }
    }

    println!();
    println!(
        "{} file(s): {} renamed, {} dry-run, {} unchanged, {} skipped, {} failed ({} with AI)",
        summary.total,
        summary.renamed,
        summary.dry_run,
        summary.unchanged,
        summary.skipped,
        summary.failed,
        summary.ai_used
    );
    Ok(())
}
