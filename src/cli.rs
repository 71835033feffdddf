//! Command-line surface: thin clap wiring that parses verbs/flags and dispatches into the
//! four engines.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::calibrate::CalibrationMemo;
use crate::cancel::CancelHandle;
use crate::config::{FillConsts, PackagePaths, ScanEnvConfig};
use crate::engine::dedup::{ActionPolicy, HashCache, OriginalPolicy};
use crate::engine::scan::{ScanMode, ScanOptions};
use crate::engine::{capacity, dedup, fill, scan};
use crate::error::FiledoError;
use crate::history;
use crate::target;
use crate::types::{DamageState, HistoryRecord};

/// Local storage-integrity toolkit: fake-capacity detection, fill/secure-wipe, damage
/// scanning, and duplicate-file finding.
#[derive(Parser)]
#[command(name = "filedo")]
#[command(about = "Detect fake storage, fill/wipe free space, scan for damage, find duplicates.")]
pub struct Cli {
    /// Target: a drive letter (`C`/`C:`), a directory path, or a `\\` / `//` share path.
    pub target: String,

    #[command(subcommand)]
    pub command: Command,

    /// Suppress history.json append (`nohist`/`no_history`).
    #[arg(long, alias = "no_history", global = true)]
    pub nohist: bool,

    /// Verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Reduced verbosity (`q`/`s`/`short`/`quiet`).
    #[arg(short, long, alias = "short", alias = "s", global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Fake-capacity engine: write and re-verify up to 100 large test files.
    Test {
        /// Auto-delete test files on success (`d`/`del`/`delete`).
        #[arg(long, alias = "del", alias = "d", alias = "delete")]
        del: bool,
    },
    /// Fill engine: clone a template file to consume free space.
    Fill {
        /// Size in MB per file, or `max` for the 10240 MB cap.
        size_mb: String,
        #[arg(long, alias = "del", alias = "d", alias = "delete")]
        del: bool,
    },
    /// Fill engine, clean mode: delete existing test files.
    Clean,
    /// Damage-scan engine.
    Check {
        /// Scan depth: quick (default), balanced, or deep.
        #[arg(value_enum, default_value = "quick")]
        mode: CheckMode,
        #[arg(long)]
        max_files: Option<usize>,
    },
    /// Duplicate-finder engine.
    #[command(alias = "cd")]
    CheckDuplicates {
        /// Original-selection policy: old, new (default), abc, xyz.
        #[arg(value_enum, default_value = "new")]
        policy: PolicyArg,
        #[arg(long, alias = "del", alias = "d", alias = "delete")]
        del: bool,
        #[arg(long)]
        r#move: Option<PathBuf>,
        #[arg(long)]
        list: Option<PathBuf>,
        /// Re-apply selection/action from a previously emitted list file instead of scanning
        /// (`cd from list <file>`).
        #[arg(long = "from-list")]
        from_list: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
pub enum CheckMode {
    Quick,
    Balanced,
    Deep,
}

impl From<CheckMode> for ScanMode {
    fn from(m: CheckMode) -> Self {
        match m {
            CheckMode::Quick => ScanMode::Quick,
            CheckMode::Balanced => ScanMode::Balanced,
            CheckMode::Deep => ScanMode::Deep,
        }
    }
}

#[derive(Clone, Copy, clap::ValueEnum)]
pub enum PolicyArg {
    Old,
    New,
    Abc,
    Xyz,
}

impl From<PolicyArg> for OriginalPolicy {
    fn from(p: PolicyArg) -> Self {
        match p {
            PolicyArg::Old => OriginalPolicy::OldestMtime,
            PolicyArg::New => OriginalPolicy::NewestMtime,
            PolicyArg::Abc => OriginalPolicy::FirstAlpha,
            PolicyArg::Xyz => OriginalPolicy::LastAlpha,
        }
    }
}

fn operation_name(command: &Command) -> &'static str {
    match command {
        Command::Test { .. } => "test",
        Command::Fill { .. } => "fill",
        Command::Clean => "clean",
        Command::Check { .. } => "check",
        Command::CheckDuplicates { .. } => "check-duplicates",
    }
}

/// Reduce a dispatch failure to the short reason stored in a history record's `error` field:
/// `"cancelled"` for a cooperative cancel, the error's rendered message otherwise.
fn error_reason(err: &anyhow::Error) -> String {
    if let Some(FiledoError::Cancelled) = err.downcast_ref::<FiledoError>() {
        return "cancelled".to_string();
    }
    err.to_string()
}

/// Parse CLI args, dispatch to the selected engine, and append a history record. Returns the
/// process exit code (0 on success, non-zero on any failure). A failing dispatch still appends
/// its history record (with `success=false` and a populated `error`) before the failure is
/// propagated to the caller.
pub fn run() -> Result<i32> {
    let cli = Cli::parse();
    crate::logging::setup_logging(cli.verbose, cli.quiet);

    let resolved = target::resolve(&cli.target).context("resolve target")?;
    let cancel = CancelHandle::new();
    cancel.install_signal_handler().context("install signal handler")?;
    let memo = CalibrationMemo::new();

    let start = Instant::now();
    let dispatch_result = dispatch(&cli, &resolved, &cancel, &memo);
    let duration = start.elapsed().as_secs_f64();

    let (operation, success, summary, error) = match &dispatch_result {
        Ok((operation, success, summary, error)) => {
            (operation.clone(), *success, summary.clone(), error.clone())
        }
        Err(e) => (
            operation_name(&cli.command).to_string(),
            false,
            format!("failed: {e:#}"),
            Some(error_reason(e)),
        ),
    };

    if !cli.nohist {
        let record = HistoryRecord {
            timestamp: crate::fs_util::compact_timestamp(),
            command: std::env::args().collect::<Vec<_>>().join(" "),
            target: cli.target.clone(),
            operation,
            parameters: serde_json::json!({}),
            results: serde_json::json!({ "summary": summary }),
            duration_secs: duration,
            success,
            error,
            summary: Some(summary),
        };
        let _ = history::append(&resolved.path, record);
    }

    dispatch_result?;
    Ok(if success { 0 } else { 1 })
}

fn dispatch(
    cli: &Cli,
    resolved: &target::ResolvedTarget,
    cancel: &CancelHandle,
    memo: &CalibrationMemo,
) -> Result<(String, bool, String, Option<String>)> {
    match &cli.command {
        Command::Test { del } => {
            let buffer = memo
                .calibrate(&resolved.path, cancel)
                .context("calibrate buffer size")?;
            let result = capacity::run_capacity_test(
                &resolved.path,
                resolved.volume.free_bytes,
                buffer,
                *del,
                cancel,
            );
            let summary = format!(
                "capacity test: passed={} files={} baseline={:.2} MiB/s avg={:.2} MiB/s",
                result.passed, result.files_created, result.baseline_mbps, result.avg_mbps
            );
            println!("{summary}");
            let error = result.failure.as_ref().map(|f| f.describe());
            Ok(("test".to_string(), result.passed, summary, error))
        }
        Command::Fill { size_mb, del } => {
            let mb: u64 = if size_mb.eq_ignore_ascii_case("max") {
                FillConsts::MAX_SIZE_MB
            } else {
                size_mb.parse().context("parse fill size_mb")?
            };
            let mb = mb.clamp(FillConsts::MIN_SIZE_MB, FillConsts::MAX_SIZE_MB);
            let buffer = memo
                .calibrate(&resolved.path, cancel)
                .context("calibrate buffer size")?;
            let hint = match resolved.volume.kind {
                crate::types::VolumeKind::Removable | crate::types::VolumeKind::Network => {
                    fill::WorkerHint::RemovableOrNetwork
                }
                _ => fill::WorkerHint::Ssd,
            };
            let free = if matches!(resolved.volume.kind, crate::types::VolumeKind::Network) {
                None
            } else {
                Some(resolved.volume.free_bytes)
            };
            let result = fill::run_fill(
                &resolved.path,
                mb * 1024 * 1024,
                free,
                hint,
                buffer,
                *del,
                cancel,
            )?;
            let summary = format!(
                "fill: files_written={} bytes_written={}",
                result.files_written, result.bytes_written
            );
            println!("{summary}");
            Ok(("fill".to_string(), true, summary, None))
        }
        Command::Clean => {
            let is_network = matches!(resolved.volume.kind, crate::types::VolumeKind::Network);
            let result = fill::run_clean(&resolved.path, is_network, cancel)?;
            let summary = format!(
                "clean: deleted={} bytes_freed={}",
                result.deleted, result.bytes_freed
            );
            println!("{summary}");
            Ok(("clean".to_string(), true, summary, None))
        }
        Command::Check { mode, max_files } => {
            let env = ScanEnvConfig::from_env();
            if env.verbose.unwrap_or(false) || env.quiet.unwrap_or(false) {
                crate::logging::setup_logging(
                    cli.verbose || env.verbose.unwrap_or(false),
                    cli.quiet || env.quiet.unwrap_or(false),
                );
            }

            // CLI flag wins whenever it's anything other than the clap default; otherwise
            // fall back to the env var, then the engine default.
            let resolved_mode: ScanMode = if matches!(mode, CheckMode::Quick) {
                env.mode
                    .as_deref()
                    .and_then(|s| s.parse::<ScanMode>().ok())
                    .unwrap_or(ScanMode::Quick)
            } else {
                (*mode).into()
            };

            let mut opts = ScanOptions {
                mode: resolved_mode,
                max_files: max_files.or(env.max_files),
                workers: env.workers.unwrap_or_else(|| ScanOptions::default().workers),
                ..ScanOptions::default()
            };
            if let Some(threshold_secs) = env.threshold_seconds {
                opts.threshold = Duration::from_secs_f64(threshold_secs);
            }
            if let Some(warmup_secs) = env.warmup_seconds {
                opts.warmup_grace = Duration::from_secs_f64(warmup_secs);
            }

            let state_dir = &resolved.path;
            let state = DamageState {
                block_list: scan::load_list(&state_dir.join(PackagePaths::get().block_list_filename())),
                allow_list: scan::load_list(&state_dir.join(PackagePaths::get().allow_list_filename())),
            };
            let cursor = scan::load_cursor(&state_dir.join(PackagePaths::get().cursor_filename()));
            let (summary, _state) =
                scan::run_scan(&resolved.path, state_dir, &opts, state, cursor, cancel)?;
            let summary_text = format!(
                "scan: seen={} probed={} flagged={}",
                summary.files_seen, summary.files_probed, summary.files_flagged
            );
            println!("{summary_text}");
            Ok(("check".to_string(), true, summary_text, None))
        }
        Command::CheckDuplicates { policy, del, r#move, list, from_list } => {
            let groups = if let Some(list_path) = from_list {
                dedup::load_groups_from_list(list_path, (*policy).into())?
            } else {
                let cache_path = resolved.path.join(PackagePaths::get().hash_cache_filename());
                let cache = HashCache::load(&cache_path)?;
                let groups =
                    dedup::find_duplicates(&resolved.path, &cache, (*policy).into(), cancel)?;
                cache.save(&cache_path)?;
                groups
            };

            let action = if let Some(dir) = r#move {
                ActionPolicy::Move(dir.clone())
            } else if *del {
                ActionPolicy::Delete
            } else {
                ActionPolicy::Report
            };
            let (acted, bytes) = dedup::apply_action(&groups, &action)?;

            if let Some(list_path) = list {
                std::fs::write(list_path, dedup::render_report(&groups))
                    .context("write duplicate report")?;
            }

            let summary = format!(
                "duplicates: groups={} acted_on={} bytes_reclaimed={}",
                groups.len(),
                acted,
                bytes
            );
            println!("{summary}");
            Ok(("check-duplicates".to_string(), true, summary, None))
        }
    }
}
