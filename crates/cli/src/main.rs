//! gitsecret CLI — scan, analyze, and clean leaked credentials from the
//! terminal.
//!
//! Calls `gitsecret-core` directly with no server overhead.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use gitsecret_core::cleaner::{self, CleanOptions, Cleaner, Source as CoreSource, Tool as CoreTool};
use gitsecret_core::{config, Analyzer, ScanOptions, Scanner};

/// gitsecret — find and remove leaked credentials in git repositories.
#[derive(Parser)]
#[command(name = "gitsecret", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a repository's history (and optionally its working tree) for secrets
    Scan {
        /// Path to the repository
        repo: PathBuf,

        /// Branch or ref to scan (default: --all)
        #[arg(long, default_value = "--all")]
        branch: String,

        /// Scan only the working tree, skipping history entirely
        #[arg(long)]
        current: bool,

        /// Scan both history and the working tree, merging the results
        #[arg(long)]
        both: bool,

        /// Stream JSONL output to this path instead of printing a full result
        #[arg(long)]
        stream: Option<PathBuf>,

        /// Maximum number of keywords searched concurrently
        #[arg(long, default_value = "4")]
        max_concurrent: usize,

        /// Path to a custom pattern/keyword configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Aggregate a scan's output into per-secret history and statistics
    Analyze {
        /// Path to a scan result (JSON array or JSONL stream of events)
        input: PathBuf,

        /// Treat the input as JSONL (one event per line)
        #[arg(long)]
        jsonl: bool,

        /// Write a CSV report of secrets to this path
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Write a CSV report of corpus-wide statistics to this path
        #[arg(long)]
        stats_csv: Option<PathBuf>,

        /// Show masked values per secret in the text report
        #[arg(long)]
        show_values: bool,

        /// Cap the number of secrets listed in the text report (0 = no cap)
        #[arg(long, default_value = "0")]
        max_secrets: usize,
    },
    /// Purge secret values from a repository's working tree and/or history
    Clean {
        /// Path to the repository
        repo: PathBuf,

        /// Path to the secrets to remove (JSON array or JSONL stream of events)
        input: PathBuf,

        /// Treat the input as JSONL (one event per line)
        #[arg(long)]
        jsonl: bool,

        /// History rewrite tool to use (default: auto-detect)
        #[arg(long)]
        tool: Option<CliTool>,

        /// Which scope to clean
        #[arg(long, default_value = "both")]
        source: CliSource,

        /// Preview what would change without modifying anything
        #[arg(long)]
        dry_run: bool,

        /// Skip creating a backup branch before rewriting history
        #[arg(long)]
        no_backup: bool,

        /// Pass --force to git filter-repo (needed on a non-fresh clone)
        #[arg(long)]
        force: bool,
    },
    /// Inspect or create a pattern/keyword configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the built-in default configuration
    Show,
    /// Write the built-in default configuration to a file
    Init {
        /// Destination path (default: patterns.json)
        #[arg(long, default_value = "patterns.json")]
        path: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CliTool {
    Auto,
    FilterRepo,
    Bfg,
    FilterBranch,
}

#[derive(Clone, Copy, ValueEnum)]
enum CliSource {
    Current,
    History,
    Both,
}

impl From<CliSource> for CoreSource {
    fn from(s: CliSource) -> Self {
        match s {
            CliSource::Current => CoreSource::Current,
            CliSource::History => CoreSource::History,
            CliSource::Both => CoreSource::Both,
        }
    }
}

fn resolve_repo(repo: PathBuf) -> PathBuf {
    repo.canonicalize().unwrap_or_else(|e| {
        eprintln!("Path not found: {}: {e}", repo.display());
        std::process::exit(1);
    })
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gitsecret=warn".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scan { repo, branch, current, both, stream, max_concurrent, config } => {
            run_scan(repo, branch, current, both, stream, max_concurrent, config, cli.json)
        }
        Commands::Analyze { input, jsonl, csv, stats_csv, show_values, max_secrets } => {
            run_analyze(input, jsonl, csv, stats_csv, show_values, max_secrets, cli.json)
        }
        Commands::Clean { repo, input, jsonl, tool, source, dry_run, no_backup, force } => {
            run_clean(repo, input, jsonl, tool, source, dry_run, no_backup, force, cli.json)
        }
        Commands::Config { action } => run_config(action),
    }
}

fn load_config(path: Option<PathBuf>) -> config::Config {
    match config::load(path.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_scan(
    repo: PathBuf,
    branch: String,
    current: bool,
    both: bool,
    stream: Option<PathBuf>,
    max_concurrent: usize,
    config_path: Option<PathBuf>,
    json: bool,
) {
    let repo = resolve_repo(repo);
    let scanner = Scanner::new(load_config(config_path));
    let opts = ScanOptions { branch, max_concurrent, on_progress: None };

    if let Some(out) = stream {
        let result = if current {
            scanner.scan_current_stream(&repo, &out)
        } else if both {
            scanner.scan_both_stream(&repo, &out, &opts)
        } else {
            scanner.scan_stream(&repo, &out, &opts)
        };
        if let Err(e) = result {
            eprintln!("Scan failed: {e}");
            std::process::exit(1);
        }
        eprintln!("Wrote stream to {}", out.display());
        return;
    }

    let result = if current {
        scanner.scan_current(&repo)
    } else if both {
        scanner.scan_both(&repo, &opts)
    } else {
        scanner.scan(&repo, &opts)
    };

    let result = match result {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Scan failed: {e}");
            std::process::exit(1);
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result).unwrap());
    } else {
        println!("Repository: {}", result.repository);
        println!("Branch:     {}", result.branch);
        println!("Secrets found: {}", result.secrets_found);
        println!("Total values:  {}\n", result.total_values);
        for secret in &result.secrets {
            println!(
                "{}:{} [{}] changed {} times, {} value(s)",
                secret.file,
                secret.key,
                secret.secret_type,
                secret.change_count,
                secret.history.len()
            );
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_analyze(
    input: PathBuf,
    jsonl: bool,
    csv: Option<PathBuf>,
    stats_csv: Option<PathBuf>,
    show_values: bool,
    max_secrets: usize,
    json: bool,
) {
    if !input.exists() {
        eprintln!("Input not found: {}", input.display());
        std::process::exit(1);
    }

    let analyzer = Analyzer::new();
    let analysis = if jsonl {
        let progress = |n: usize| eprintln!("...{n} events processed");
        analyzer.analyze_jsonl(&input, Some(&progress))
    } else {
        analyzer.analyze_json(&input)
    };

    let analysis = match analysis {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Analyze failed: {e}");
            std::process::exit(1);
        }
    };

    if let Some(path) = csv {
        if let Err(e) = gitsecret_core::report::export_csv(&analysis, &path) {
            eprintln!("Failed to write CSV: {e}");
            std::process::exit(1);
        }
        eprintln!("Wrote {}", path.display());
    }
    if let Some(path) = stats_csv {
        if let Err(e) = gitsecret_core::report::export_stats_csv(&analysis, &path) {
            eprintln!("Failed to write stats CSV: {e}");
            std::process::exit(1);
        }
        eprintln!("Wrote {}", path.display());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&analysis).unwrap());
    } else if show_values {
        print!("{}", gitsecret_core::report::generate_text_report(&analysis, max_secrets));
    } else {
        println!("Total events:   {}", analysis.stats.total_entries);
        println!("Unique secrets: {}", analysis.stats.unique_secrets);
        println!("Unique values:  {}", analysis.stats.unique_values);
    }
}

#[allow(clippy::too_many_arguments)]
fn run_clean(
    repo: PathBuf,
    input: PathBuf,
    jsonl: bool,
    tool: Option<CliTool>,
    source: CliSource,
    dry_run: bool,
    no_backup: bool,
    force: bool,
    json: bool,
) {
    let repo = resolve_repo(repo);
    if !input.exists() {
        eprintln!("Input not found: {}", input.display());
        std::process::exit(1);
    }

    let loaded = if jsonl {
        cleaner::load_secrets_from_jsonl(&input)
    } else {
        cleaner::load_secrets_from_json(&input)
    };
    let loaded = match loaded {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to load secrets: {e}");
            std::process::exit(1);
        }
    };

    let tool = tool.and_then(|t| match t {
        CliTool::Auto => None,
        CliTool::FilterRepo => Some(CoreTool::FilterRepo),
        CliTool::Bfg => Some(CoreTool::Bfg),
        CliTool::FilterBranch => Some(CoreTool::FilterBranch),
    });

    let opts = CleanOptions {
        tool,
        source: source.into(),
        file_paths: loaded.file_paths.clone(),
        dry_run,
        backup: !no_backup,
        force,
    };
    let result = Cleaner::new().clean(&repo, &loaded.values, &opts);

    let result = match result {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Clean failed: {e}");
            std::process::exit(1);
        }
    };

    if json {
        let output = serde_json::json!({
            "tool": result.tool,
            "backupBranch": result.backup_branch,
            "filesModified": result.files_modified,
            "secretsRemoved": result.secrets_removed,
            "patternsUsed": result.patterns_used,
            "success": result.success,
            "message": result.message,
            "dryRun": result.dry_run,
            "previewSecrets": result.preview_secrets,
        });
        println!("{}", serde_json::to_string_pretty(&output).unwrap());
    } else if result.dry_run {
        println!("{}", result.message);
        for preview in &result.preview_secrets {
            println!("  {preview}");
        }
    } else {
        println!("{}", result.message);
        println!("Files modified:   {}", result.files_modified);
        println!("Secrets removed:  {}", result.secrets_removed);
        if let Some(tool) = &result.tool {
            println!("History rewritten with: {tool}");
        }
        if let Some(branch) = &result.backup_branch {
            println!("Backup branch: {branch}");
        }
    }

    if !result.success {
        std::process::exit(1);
    }
}

fn run_config(action: ConfigAction) {
    match action {
        ConfigAction::Show => {
            let cfg = config::default_config();
            println!("{}", serde_json::to_string_pretty(&cfg).unwrap());
        }
        ConfigAction::Init { path } => {
            let cfg = config::default_config();
            if let Err(e) = cfg.save(&path) {
                eprintln!("Failed to write config: {e}");
                std::process::exit(1);
            }
            eprintln!("Wrote {}", path.display());
        }
    }
}
