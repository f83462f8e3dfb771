use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use curator::fetcher::{ProfileDump, fetch_records};
use curator::filter::RejectReason;
use curator::handles::{DEFAULT_HANDLE_COLUMN, extract_handles};
use curator::manifest::{self, ManifestInfo};
use curator::pipeline::Origin;
use curator::sort::SORT_ORDER;
use curator::store::{self, OnMalformed};
use curator::{ReconcileReport, RunConfig, reconcile};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "roster",
    about = "Roster index tools: merge incoming batches, publish and verify the manifest"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge incoming batches into the store, then rewrite the store and manifest.
    Reconcile {
        /// TOML run config. Without it, ROSTER_* environment variables and defaults apply.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Store path (overrides the config).
        #[arg(long)]
        store: Option<PathBuf>,

        /// Manifest path (overrides the config).
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Batch files merged in this run, in order. Appended to the config's list.
        #[arg(long, num_args = 1..)]
        incoming: Vec<PathBuf>,

        /// Directory of *.jsonl batches, merged after the explicit files.
        #[arg(long)]
        incoming_dir: Option<PathBuf>,

        /// Abort on the first malformed line instead of skipping it.
        #[arg(long)]
        strict: bool,

        /// Replaced snapshots to keep next to the store (0 disables archiving).
        #[arg(long)]
        keep_archives: Option<usize>,

        /// Run timestamp (RFC 3339). Defaults to the current time.
        #[arg(long)]
        now: Option<String>,
    },

    /// Check that the manifest matches the store it describes.
    Verify {
        #[arg(long)]
        store: Option<PathBuf>,
        #[arg(long)]
        manifest: Option<PathBuf>,
    },

    /// Recompute and write the manifest for the store as it is on disk.
    Publish {
        #[arg(long)]
        store: Option<PathBuf>,
        #[arg(long)]
        manifest: Option<PathBuf>,
        #[arg(long)]
        schema_version: Option<String>,
    },

    /// Print the SHA-256 and record count of a JSONL file.
    Hash {
        file: PathBuf,
    },

    /// Pull valid, deduplicated handles out of a CSV export.
    ExtractHandles {
        csv: PathBuf,

        /// Column holding the handle (case-insensitive).
        #[arg(long, default_value = DEFAULT_HANDLE_COLUMN)]
        column: String,

        /// Write handles here, one per line, instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Turn a profile fetcher dump into an incoming batch for the requested handles.
    ImportProfiles {
        /// JSONL dump written by the profile fetcher.
        #[arg(long)]
        dump: PathBuf,

        /// File with one handle per line (# starts a comment).
        #[arg(long)]
        handles: PathBuf,

        /// Profiles below this follower count are reported and skipped.
        #[arg(long, default_value_t = 30_000)]
        min_followers: u64,

        /// Batch file to write.
        #[arg(short, long)]
        output: PathBuf,
    },
}

pub fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    execute(cli.command)
}

fn execute(command: Commands) -> Result<()> {
    match command {
        Commands::Reconcile {
            config,
            store,
            manifest,
            incoming,
            incoming_dir,
            strict,
            keep_archives,
            now,
        } => {
            let mut config = match config {
                Some(path) => RunConfig::load(&path)?,
                None => RunConfig::from_env(),
            };
            if let Some(store) = store {
                config.store = store;
            }
            if let Some(manifest) = manifest {
                config.manifest = manifest;
            }
            config.incoming.extend(incoming);
            if incoming_dir.is_some() {
                config.incoming_dir = incoming_dir;
            }
            if strict {
                config.on_malformed = OnMalformed::Abort;
            }
            if let Some(keep) = keep_archives {
                config.keep_archives = keep;
            }
            let now = parse_optional_ts(now.as_deref(), "--now")?.unwrap_or_else(Utc::now);
            run_reconcile(&config, now)
        }
        Commands::Verify { store, manifest } => {
            let config = with_paths(store, manifest);
            run_verify(&config.store, &config.manifest)
        }
        Commands::Publish {
            store,
            manifest,
            schema_version,
        } => {
            let mut config = with_paths(store, manifest);
            if let Some(version) = schema_version {
                config.schema_version = version;
            }
            run_publish(&config)
        }
        Commands::Hash { file } => run_hash(&file),
        Commands::ExtractHandles {
            csv,
            column,
            output,
        } => run_extract_handles(&csv, &column, output.as_deref()),
        Commands::ImportProfiles {
            dump,
            handles,
            min_followers,
            output,
        } => run_import_profiles(&dump, &handles, min_followers, &output),
    }
}

fn with_paths(store: Option<PathBuf>, manifest: Option<PathBuf>) -> RunConfig {
    let mut config = RunConfig::from_env();
    if let Some(store) = store {
        config.store = store;
    }
    if let Some(manifest) = manifest {
        config.manifest = manifest;
    }
    config
}

fn run_reconcile(config: &RunConfig, now: DateTime<Utc>) -> Result<()> {
    println!(
        "Reconciling {} ({} batch file(s){})",
        config.store.display(),
        config.incoming.len(),
        config
            .incoming_dir
            .as_ref()
            .map(|d| format!(" + {}", d.display()))
            .unwrap_or_default()
    );
    let report = reconcile(config, now)?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &ReconcileReport) {
    println!(
        "Loaded: existing={} incoming={} from {} file(s) (malformed={} schema_violations={} migrated={})",
        report.existing_loaded,
        report.incoming_loaded,
        report.incoming_files.len(),
        report.malformed,
        report.schema_violations,
        report.migrated,
    );
    if report.patched > 0 {
        println!("Patched: {}", report.patched);
    }
    for (origin, reason, count) in rejection_summary(report) {
        println!("Rejected {origin}: {reason}={count}");
    }
    println!(
        "Published {} records (added={} scored={}){}",
        report.published,
        report.added,
        report.scored,
        if report.store_changed { "" } else { ", store unchanged" }
    );
    if let Some(path) = &report.archive_path {
        println!("Archived previous store to {}", path.display());
    }
    println!(
        "Manifest: count={} sha256={}",
        report.manifest.count, report.manifest.sha256
    );
}

fn rejection_summary(report: &ReconcileReport) -> Vec<(&'static str, RejectReason, usize)> {
    let mut counts: BTreeMap<(&'static str, &'static str), (RejectReason, usize)> = BTreeMap::new();
    for rejection in &report.rejected {
        let origin = match rejection.origin {
            Origin::Existing => "existing",
            Origin::Incoming => "incoming",
        };
        counts
            .entry((origin, rejection.reason.as_str()))
            .or_insert((rejection.reason, 0))
            .1 += 1;
    }
    counts
        .into_iter()
        .map(|((origin, _), (reason, count))| (origin, reason, count))
        .collect()
}

fn run_verify(store_path: &Path, manifest_path: &Path) -> Result<()> {
    let manifest = manifest::verify(store_path, manifest_path)?;
    println!(
        "OK: {} matches {} (count={} sha256={})",
        manifest_path.display(),
        store_path.display(),
        manifest.count,
        manifest.sha256
    );
    Ok(())
}

fn run_publish(config: &RunConfig) -> Result<()> {
    let scorer = config.scorer()?;
    let info = ManifestInfo {
        schema_version: config.schema_version.clone(),
        sort_order: SORT_ORDER.to_string(),
        score_formula: format!("{}: {}", scorer.version(), scorer.formula()),
    };
    let manifest = manifest::publish(&config.store, &config.manifest, &info, Utc::now(), None)?;
    println!(
        "Published {} (count={} sha256={})",
        config.manifest.display(),
        manifest.count,
        manifest.sha256
    );
    Ok(())
}

fn run_hash(file: &Path) -> Result<()> {
    let sha = store::hash(file)?;
    let count = store::count_lines(file)?;
    println!("{sha}  {}  ({count} records)", file.display());
    Ok(())
}

fn run_extract_handles(csv: &Path, column: &str, output: Option<&Path>) -> Result<()> {
    let extraction = extract_handles(csv, column)?;
    for invalid in &extraction.invalid {
        eprintln!(
            "row {}: {} ({:?})",
            invalid.row, invalid.reason, invalid.raw
        );
    }

    let mut text = extraction.valid.join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    match output {
        Some(path) => {
            store::write_atomic(path, text.as_bytes())?;
            println!(
                "Extracted {} handles to {} (invalid={} duplicates={})",
                extraction.valid.len(),
                path.display(),
                extraction.invalid.len(),
                extraction.duplicates
            );
        }
        None => print!("{text}"),
    }
    Ok(())
}

fn run_import_profiles(dump: &Path, handles: &Path, min_followers: u64, output: &Path) -> Result<()> {
    let text = fs::read_to_string(handles)
        .with_context(|| format!("failed to read handle list {}", handles.display()))?;
    let requested = parse_handle_list(&text);
    if requested.is_empty() {
        anyhow::bail!("no handles listed in {}", handles.display());
    }

    let fetcher = ProfileDump::new(dump);
    let (records, failures) = fetch_records(&fetcher, &requested, min_followers, Utc::now())?;
    for failure in &failures {
        eprintln!("{}: {}", failure.handle, failure.reason);
    }
    store::write(output, &records)?;
    println!(
        "Imported {} of {} requested profiles to {} (failed={})",
        records.len(),
        requested.len(),
        output.display(),
        failures.len()
    );
    Ok(())
}

fn parse_handle_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn parse_optional_ts(value: Option<&str>, flag_name: &str) -> Result<Option<DateTime<Utc>>> {
    match value {
        None => Ok(None),
        Some(s) => {
            let dt = s
                .parse::<DateTime<Utc>>()
                .map_err(|e| anyhow::anyhow!("invalid {flag_name} timestamp '{s}': {e}"))?;
            Ok(Some(dt))
        }
    }
}
