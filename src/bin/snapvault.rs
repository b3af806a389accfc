//! # Snapvault CLI - Snapshot and restore experiment workspaces
//!
//! Command-line interface for the snapvault storage engine.
//!
//! ## Usage
//! ```bash
//! # Snapshot the current directory under a run id
//! snapvault snapshot --run exp-0042
//!
//! # List known runs
//! snapvault list
//!
//! # Restore a run into a directory
//! snapvault restore exp-0042 --target ./replay
//!
//! # Export a run as a zip archive
//! snapvault export exp-0042 --output exp-0042.zip
//!
//! # Delete a run, reclaiming blobs nothing else references
//! snapvault delete-run exp-0042
//!
//! # Sweep orphaned blobs
//! snapvault gc --dry-run
//! ```

use clap::{Parser, Subcommand};
use colored::*;
use snapvault::{AssetStore, Result, SnapshotLimits};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Snapvault CLI - content-addressed snapshots of experiment workspaces
#[derive(Parser)]
#[command(name = "snapvault")]
#[command(version)]
#[command(about = "Snapshot, restore, and garbage-collect experiment workspaces")]
struct Cli {
    /// Storage root (defaults to .snapvault)
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit machine-readable JSON instead of human output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Snapshot a workspace directory
    #[command(alias = "snap")]
    Snapshot {
        /// Workspace to capture (defaults to current directory)
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        /// Run identifier (a random one is generated if omitted)
        #[arg(long)]
        run: Option<String>,

        /// Bypass the snapshot size caps
        #[arg(long)]
        unlimited: bool,
    },

    /// Restore a run's snapshot into a directory
    #[command(alias = "rs")]
    Restore {
        /// Run identifier
        run: String,

        /// Target directory
        #[arg(short, long)]
        target: PathBuf,

        /// Replace files that already exist in the target
        #[arg(long)]
        overwrite: bool,
    },

    /// Export a run's snapshot as a zip archive
    Export {
        /// Run identifier
        run: String,

        /// Output archive path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// List runs with a stored snapshot
    #[command(alias = "ls")]
    List,

    /// Verify a run's manifest against the blobs on disk
    Verify {
        /// Run identifier
        run: String,
    },

    /// Delete a run and reclaim its exclusively-owned blobs
    DeleteRun {
        /// Run identifier
        run: String,

        /// Report what would be deleted without touching the disk
        #[arg(long)]
        dry_run: bool,
    },

    /// Sweep blobs no manifest references
    Gc {
        /// Report orphans without deleting them
        #[arg(long)]
        dry_run: bool,
    },

    /// Show store statistics
    Stats,
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("snapvault=debug")),
            )
            .init();
    }

    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red().bold(), e.user_message());
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let root = cli.root.unwrap_or_else(|| PathBuf::from(".snapvault"));
    let json = cli.json;

    match cli.command {
        Commands::Snapshot {
            workspace,
            run,
            unlimited,
        } => {
            let workspace = workspace.unwrap_or_else(|| PathBuf::from("."));
            let run_id = run.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

            let store = AssetStore::builder(&root)
                .limits(SnapshotLimits {
                    unlimited,
                    ..Default::default()
                })
                .build()?;
            let manifest = store.snapshot_run(&workspace, &run_id)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&manifest)?);
            } else {
                println!(
                    "{} Captured run {} ({} files, {})",
                    "✓".green().bold(),
                    run_id.cyan(),
                    manifest.file_count(),
                    format_bytes(manifest.total_bytes())
                );
            }
            Ok(())
        }

        Commands::Restore {
            run,
            target,
            overwrite,
        } => {
            let store = AssetStore::open(&root)?;
            let report = store.restore_run(&run, &target, overwrite)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }
            println!(
                "{} Restored {} files ({}) into {}",
                "✓".green().bold(),
                report.restored_count,
                format_bytes(report.bytes_written),
                target.display()
            );
            if report.skipped_count > 0 {
                println!(
                    "  {} existing files skipped (use --overwrite to replace)",
                    report.skipped_count.to_string().yellow()
                );
            }
            for fp in &report.missing_blobs {
                println!("  {} missing blob {}", "!".red().bold(), &fp[..12]);
            }
            for err in &report.errors {
                println!("  {} {}", "!".red().bold(), err);
            }
            Ok(())
        }

        Commands::Export { run, output } => {
            let store = AssetStore::open(&root)?;
            let report = store.export_run_to_zip(&run, &output)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "{} Exported {} files ({}) to {}",
                    "✓".green().bold(),
                    report.restored_count,
                    format_bytes(report.bytes_written),
                    output.display()
                );
                if !report.missing_blobs.is_empty() {
                    println!(
                        "  {} entries skipped for missing blobs",
                        report.missing_blobs.len().to_string().red()
                    );
                }
            }
            Ok(())
        }

        Commands::List => {
            let store = AssetStore::open(&root)?;
            let runs = store.list_runs()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&runs)?);
                return Ok(());
            }
            if runs.is_empty() {
                println!("No runs stored yet.");
                return Ok(());
            }
            for run_id in runs {
                match store.load_manifest(&run_id) {
                    Ok(m) => println!(
                        "{}  {} files, {}",
                        run_id.cyan(),
                        m.file_count(),
                        format_bytes(m.total_bytes())
                    ),
                    Err(e) => println!("{}  {}", run_id.cyan(), e.to_string().red()),
                }
            }
            Ok(())
        }

        Commands::Verify { run } => {
            let store = AssetStore::open(&root)?;
            let manifest = store.verify_run(&run)?;

            let missing: Vec<_> = manifest
                .files
                .iter()
                .filter(|e| !store.blobs().exists(&e.fingerprint))
                .collect();

            if json {
                let summary = serde_json::json!({
                    "run_id": run,
                    "files": manifest.file_count(),
                    "missing_blobs": missing.iter().map(|e| e.path.as_str()).collect::<Vec<_>>(),
                });
                println!("{}", serde_json::to_string_pretty(&summary)?);
                return Ok(());
            }
            if missing.is_empty() {
                println!(
                    "{} Run {} is intact ({} files)",
                    "✓".green().bold(),
                    run.cyan(),
                    manifest.file_count()
                );
            } else {
                println!(
                    "{} Run {} has {} entries with missing blobs:",
                    "!".red().bold(),
                    run.cyan(),
                    missing.len()
                );
                for entry in missing {
                    println!("  - {}", entry.path.red());
                }
            }
            Ok(())
        }

        Commands::DeleteRun { run, dry_run } => {
            let store = AssetStore::open(&root)?;
            let result = store.delete_run(&run, dry_run)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
                return Ok(());
            }
            let verb = if dry_run { "Would delete" } else { "Deleted" };
            println!(
                "{} {} run {}: {} blobs ({}), {} shared blobs kept",
                "✓".green().bold(),
                verb,
                run.cyan(),
                result.blobs_deleted,
                format_bytes(result.bytes_freed),
                result.kept_assets.len()
            );
            for err in &result.errors {
                println!("  {} {}", "!".red().bold(), err);
            }
            Ok(())
        }

        Commands::Gc { dry_run } => {
            let store = AssetStore::open(&root)?;
            let sweep = store.cleanup_orphaned_blobs(dry_run)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&sweep)?);
                return Ok(());
            }
            if dry_run {
                println!(
                    "{} orphaned blobs out of {} scanned, {} reclaimable",
                    sweep.orphaned_blobs.len(),
                    sweep.blobs_scanned,
                    format_bytes(sweep.bytes_freed)
                );
            } else {
                println!(
                    "{} Swept {} orphaned blobs ({})",
                    "✓".green().bold(),
                    sweep.blobs_deleted,
                    format_bytes(sweep.bytes_freed)
                );
            }
            for err in &sweep.errors {
                println!("  {} {}", "!".red().bold(), err);
            }
            Ok(())
        }

        Commands::Stats => {
            let store = AssetStore::open(&root)?;
            let stats = store.stats()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Storage root: {}", store.root().display());
                println!("  Runs:  {}", stats.manifest_count);
                println!("  Blobs: {}", stats.blob_count);
                println!("  Size:  {}", format_bytes(stats.total_bytes));
            }
            Ok(())
        }
    }
}

/// Human-readable byte count
fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
