use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::*;
use tracing_subscriber::EnvFilter;

use autotee::capture_refs::{self, ParserStats};
use autotee::config::Config;
use autotee::env_export::EnvExporter;
use autotee::freshness::{CaptureMetadata, CurrentState, FreshnessScorer};
use autotee::inspector::Inspector;
use autotee::ledger::CaptureLedger;
use autotee::policy::{Policy, EXPENSIVE_PATTERNS};
use autotee::quoting::{self, Dialect};
use autotee::rewriter;
use autotee::semantic::SemanticExtractor;
use autotee::{process_hook_input, rewrite_command};

#[derive(Parser)]
#[command(name = "autotee")]
#[command(about = "Inject tee capture stages into piped shell commands")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a hook payload from stdin and print the result
    Hook,
    /// Show structural facts and the activation decision for a command
    Inspect {
        /// Command to inspect (wrap commands with pipes in quotes)
        #[arg(required = true)]
        command: String,
    },
    /// Print the rewritten form of a command
    Rewrite {
        /// Command to rewrite (wrap commands with pipes in quotes)
        #[arg(required = true)]
        command: String,
    },
    /// Quote a path for a shell dialect
    Quote {
        #[arg(required = true)]
        path: String,
        /// bash, zsh, sh, fish, cmd, or powershell
        #[arg(long, default_value = "bash")]
        shell: String,
    },
    /// List capture references found in text on stdin
    Captures {
        /// Also delete capture files older than 24 hours
        #[arg(long)]
        sweep: bool,
    },
    /// Emit environment exports for captures referenced in text on stdin
    Env {
        /// bash, zsh, sh, or fish
        #[arg(long, default_value = "bash")]
        shell: String,
    },
    /// Score how fresh a capture file still is
    Score {
        #[arg(required = true)]
        path: PathBuf,
        /// Command that produced the capture
        #[arg(long)]
        command: Option<String>,
    },
    /// Extract errors, metrics, and paths from captured output
    Semantic {
        /// File to analyze; stdin when omitted
        file: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::new()?;

    match cli.command {
        Commands::Hook => run_hook(&config),
        Commands::Inspect { command } => run_inspect(&command, &config),
        Commands::Rewrite { command } => run_rewrite(&command, &config),
        Commands::Quote { path, shell } => run_quote(&path, &shell),
        Commands::Captures { sweep } => run_captures(sweep),
        Commands::Env { shell } => run_env(&shell, &config),
        Commands::Score { path, command } => run_score(path, command),
        Commands::Semantic { file } => run_semantic(file),
    }
}

fn read_stdin() -> Result<String> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .context("failed to read stdin")?;
    Ok(input)
}

/// The hook never breaks the tool call it wraps: any processing failure
/// falls back to echoing the payload unchanged.
fn run_hook(config: &Config) -> Result<()> {
    let input = read_stdin()?;
    match process_hook_input(&input, config) {
        Ok(output) => println!("{output}"),
        Err(err) => {
            eprintln!("{}", format!("hook processing failed: {err:#}").yellow());
            println!("{input}");
        }
    }
    Ok(())
}

fn run_inspect(command: &str, config: &Config) -> Result<()> {
    let facts = Inspector::with_trivial_max_len(config.activation.trivial_max_len).inspect(command);
    let mut policy = Policy::new().with_min_command_len(config.activation.min_command_len);
    if config.activation.enable_pattern_catalog {
        policy = policy.with_catalog(EXPENSIVE_PATTERNS.clone());
    }
    let plan = policy.decide(command, &facts);

    println!("{}", serde_json::to_string_pretty(&facts)?);
    let verdict = if plan.should_rewrite {
        format!("rewrite ({})", plan.reason).green()
    } else {
        format!("pass through ({})", plan.reason).yellow()
    };
    println!("{}: {verdict}", "decision".bold());
    Ok(())
}

fn run_rewrite(command: &str, config: &Config) -> Result<()> {
    match rewrite_command(command, config) {
        Some(rewritten) => println!("{rewritten}"),
        None => {
            eprintln!("{}", "command left unchanged".yellow());
            println!("{command}");
        }
    }
    Ok(())
}

fn run_quote(path: &str, shell: &str) -> Result<()> {
    let dialect: Dialect = shell.parse()?;
    println!("{}", quoting::quote(path, dialect)?);
    Ok(())
}

fn run_captures(sweep: bool) -> Result<()> {
    let input = read_stdin()?;
    let mut stats = ParserStats::default();
    let refs = capture_refs::parse(&input, &mut stats);

    if refs.is_empty() {
        println!("{}", "no capture references found".yellow());
    } else {
        for r in &refs {
            let status = if r.path.exists() {
                "exists".green()
            } else {
                "missing".red()
            };
            println!("{} [{status}]", r.path.display());
        }
    }

    if sweep {
        let removed = rewriter::sweep_stale_captures(Duration::from_secs(24 * 60 * 60))?;
        println!("swept {removed} stale capture file(s)");
    }
    Ok(())
}

fn run_env(shell: &str, config: &Config) -> Result<()> {
    let input = read_stdin()?;
    let dialect: Dialect = shell.parse()?;
    let exporter = EnvExporter::new(dialect)?;

    let mut stats = ParserStats::default();
    let mut ledger = CaptureLedger::new(config.capture.max_history, config.capture.atomic_history);
    for r in capture_refs::parse(&input, &mut stats) {
        if let Err(err) = ledger.add(&r.path, "", serde_json::Map::new()) {
            eprintln!("{}", format!("skipping {}: {err}", r.path.display()).yellow());
        }
    }

    print!("{}", exporter.export_script(&ledger)?);
    Ok(())
}

fn run_score(path: PathBuf, command: Option<String>) -> Result<()> {
    let metadata = fs::metadata(&path)
        .with_context(|| format!("cannot stat capture file {}", path.display()))?;
    let timestamp: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::from)
        .unwrap_or_else(|_| Utc::now());

    let capture = CaptureMetadata {
        path: path.clone(),
        command: command.unwrap_or_default(),
        timestamp,
        size: metadata.len(),
        hash: String::new(),
        working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        related_files: Vec::new(),
    };

    let result = FreshnessScorer::default().score(&capture, &CurrentState::default());
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn run_semantic(file: Option<PathBuf>) -> Result<()> {
    let text = match file {
        Some(path) => {
            fs::read_to_string(&path).with_context(|| format!("cannot read {}", path.display()))?
        }
        None => read_stdin()?,
    };
    let extraction = SemanticExtractor::new().extract(&text);
    println!("{}", serde_json::to_string_pretty(&extraction)?);
    Ok(())
}
