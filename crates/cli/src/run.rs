//! `sfill run` / `sfill validate`: config-driven linkage and backfill.

use std::path::{Path, PathBuf};

use serde::Serialize;
use solarfill_linkage::load::{load_batches, target_file};
use solarfill_linkage::{LinkageConfig, LinkageError, LinkageResult, TargetSource};
use solarfill_sink::{
    apply_patches, ApplyReport, HttpPatchSink, JsonlPatchSink, PatchSink, RetryPolicy,
};

use crate::exit_codes::{
    linkage_exit_code, EXIT_ERROR, EXIT_IO, EXIT_PATCH_FAILURES, EXIT_STRICT_UNRESOLVED,
    EXIT_USAGE,
};
use crate::CliError;

/// Options for `sfill run`, as parsed from the command line.
pub struct RunOptions {
    pub config: PathBuf,
    pub dry_run: bool,
    pub json: bool,
    pub output: Option<PathBuf>,
    pub patches: Option<PathBuf>,
    pub workers: Option<usize>,
    pub strict: bool,
}

/// Result document written by `--json` / `--output`.
#[derive(Serialize)]
struct RunReport<'a> {
    #[serde(flatten)]
    result: &'a LinkageResult,
    dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    apply: Option<&'a ApplyReport>,
}

fn linkage_err(err: LinkageError) -> CliError {
    CliError {
        code: linkage_exit_code(&err),
        message: err.to_string(),
        hint: None,
    }
}

fn load_config(path: &Path) -> Result<LinkageConfig, CliError> {
    let text = std::fs::read_to_string(path).map_err(|e| CliError {
        code: EXIT_IO,
        message: format!("cannot read config {}: {e}", path.display()),
        hint: None,
    })?;
    LinkageConfig::from_toml(&text).map_err(linkage_err)
}

/// Relative file paths in the config resolve against its directory.
fn base_dir(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

pub fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    eprintln!(
        "config ok: \"{}\", {} dataset(s): {}",
        config.name,
        config.datasets.len(),
        config.datasets.keys().cloned().collect::<Vec<_>>().join(", ")
    );
    Ok(())
}

pub fn cmd_run(opts: RunOptions) -> Result<(), CliError> {
    let config = load_config(&opts.config)?;
    let base = base_dir(&opts.config);

    let workers = opts.workers.unwrap_or(config.apply.workers);
    if workers == 0 {
        return Err(CliError::usage("--workers must be at least 1"));
    }

    let targets = target_file(&config, base)
        .and_then(|f| f.load_targets())
        .map_err(linkage_err)?;
    let batches = load_batches(&config, base).map_err(linkage_err)?;

    let result = solarfill_linkage::run(&config, targets, &batches).map_err(linkage_err)?;

    let report = if opts.dry_run {
        tracing::info!(patches = result.patches.len(), "dry run: patches not applied");
        None
    } else {
        open_sink(&config, opts.patches.as_deref())?.map(|sink| {
            apply_patches(
                sink.as_ref(),
                &result.patches,
                workers,
                &RetryPolicy::from(&config.apply),
            )
        })
    };

    let doc = RunReport {
        result: &result,
        dry_run: opts.dry_run,
        apply: report.as_ref(),
    };
    let json_str = serde_json::to_string_pretty(&doc).map_err(|e| CliError {
        code: EXIT_ERROR,
        message: format!("JSON serialization error: {e}"),
        hint: None,
    })?;

    if let Some(ref path) = opts.output {
        std::fs::write(path, &json_str).map_err(|e| CliError {
            code: EXIT_IO,
            message: format!("cannot write output {}: {e}", path.display()),
            hint: None,
        })?;
        eprintln!("wrote {}", path.display());
    }

    if opts.json {
        println!("{json_str}");
    }

    print_summary(&result, report.as_ref(), opts.dry_run);

    if let Some(report) = &report {
        if !report.is_success() {
            return Err(CliError {
                code: EXIT_PATCH_FAILURES,
                message: format!("{} patch(es) failed to apply", report.failed.len()),
                hint: Some("failed patches are listed in the JSON output; re-running is safe".into()),
            });
        }
    }

    if opts.strict {
        let low = result.summary.tier_counts.get("low").copied().unwrap_or(0);
        if low > 0 || result.summary.unmatched > 0 {
            return Err(CliError {
                code: EXIT_STRICT_UNRESOLVED,
                message: format!(
                    "{low} LOW-tier match(es), {} unmatched source(s)",
                    result.summary.unmatched
                ),
                hint: None,
            });
        }
    }

    Ok(())
}

/// `--patches` writes JSON lines; otherwise `apply.endpoint` selects the
/// HTTP store. Neither means there is nowhere to apply.
fn open_sink(
    config: &LinkageConfig,
    patches_file: Option<&Path>,
) -> Result<Option<Box<dyn PatchSink>>, CliError> {
    if let Some(path) = patches_file {
        let sink = JsonlPatchSink::create(path).map_err(|e| CliError {
            code: EXIT_IO,
            message: e.to_string(),
            hint: None,
        })?;
        return Ok(Some(Box::new(sink)));
    }

    let Some(endpoint) = config.apply.endpoint.as_deref() else {
        tracing::warn!("no patch sink configured (set apply.endpoint or pass --patches)");
        return Ok(None);
    };

    let token = match config.apply.token_env.as_deref() {
        Some(var) => match std::env::var(var) {
            Ok(token) => Some(token),
            Err(_) => {
                return Err(CliError {
                    code: EXIT_USAGE,
                    message: format!("environment variable {var} is not set"),
                    hint: Some("export the store token or use --dry-run".into()),
                })
            }
        },
        None => None,
    };

    let sink = HttpPatchSink::new(endpoint, token).map_err(|e| CliError {
        code: EXIT_ERROR,
        message: e.to_string(),
        hint: None,
    })?;
    Ok(Some(Box::new(sink)))
}

fn print_summary(result: &LinkageResult, report: Option<&ApplyReport>, dry_run: bool) {
    let s = &result.summary;
    let tier = |t: &str| s.tier_counts.get(t).copied().unwrap_or(0);
    eprintln!(
        "linkage: {} sources, {} matched (high {}, medium {}, low {}), {} unmatched, {} unmatchable, {} infeasible",
        s.total_sources,
        s.matched,
        tier("high"),
        tier("medium"),
        tier("low"),
        s.unmatched,
        s.unmatchable,
        s.infeasible,
    );
    for (name, ds) in &s.datasets {
        eprintln!(
            "  {name}: {} sources, {} matched, {} patches",
            ds.sources, ds.matched, ds.patches
        );
    }

    match (dry_run, report) {
        (true, _) => eprintln!("patches: {} (dry run, not applied)", s.patches),
        (false, Some(r)) => eprintln!(
            "patches: {} applied via {}, {} retried, {} failed",
            r.applied,
            r.sink,
            r.retried,
            r.failed.len()
        ),
        (false, None) => eprintln!("patches: {} (no sink, not applied)", s.patches),
    }
}
