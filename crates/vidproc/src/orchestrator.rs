use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use chrono::Local;
use log::{error, info, warn};
use tokio::sync::watch;
use crate::concat::ConcatManifest;
use crate::config::StabilizeConfig;
use crate::error::{Result, Stage, VidprocError};
use crate::ffmpeg::{self, CommandBuilder, FfmpegRunner};
use crate::report::{RunSummary, StageReport};
use crate::scan;
use crate::stabilize::Stabilizer;
use crate::workdir::{delete_file, WorkDir};

/// How a run ended when it didn't fail
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// All inputs stabilized and joined
    Completed(RunSummary),
    /// The output was already there; nothing was touched
    AlreadyExists(PathBuf),
}

/// Stabilize every video in `cfg.input_dir` and join them into `output`.
///
/// A relative `output` is resolved against the input directory. The ffmpeg
/// preflight (when enabled) only runs once the output name is valid and the
/// output doesn't exist yet. Setting
/// `shutdown` to true terminates the active ffmpeg process and ends the run
/// with `Interrupted`. Committed checkpoints always survive a failed run;
/// run-scoped scratch files never do.
pub async fn run(
    cfg: &StabilizeConfig,
    output: &Path,
    mut shutdown: watch::Receiver<bool>,
) -> Result<RunOutcome> {
    let started_at = Local::now();
    let tick = Instant::now();

    cfg.check_output_suffix(output)?;

    let input_dir = fs::canonicalize(&cfg.input_dir)
        .map_err(|e| VidprocError::io("resolve input directory", &cfg.input_dir, e))?;
    let output = input_dir.join(output);

    if output.exists() {
        info!("{} already exists. Nothing to do", output.display());
        return Ok(RunOutcome::AlreadyExists(output));
    }

    if cfg.preflight {
        ffmpeg::probe_ffmpeg(cfg).await?;
    }

    let store = WorkDir::new(cfg, &input_dir);
    if store.has_temp_artifacts() {
        warn!("Discarding scratch files left behind by an earlier run");
    }
    store.clear_temp_artifacts()?;

    let result = stabilize_and_join(cfg, &store, &output, &mut shutdown).await;

    match (result, store.clear_temp_artifacts()) {
        (Ok((stabilized, stages)), Ok(_)) => {
            let output_bytes = fs::metadata(&output)
                .map_err(|e| VidprocError::io("stat", &output, e))?
                .len();
            let summary = RunSummary {
                started_at,
                output,
                output_bytes,
                stabilized,
                stages,
                elapsed: tick.elapsed(),
            };
            Ok(RunOutcome::Completed(summary))
        }
        (Ok(_), Err(cleanup_err)) => Err(cleanup_err),
        (Err(e), Err(cleanup_err)) => {
            error!("Cleanup after failed run also failed: {}", cleanup_err);
            Err(e)
        }
        (Err(e), Ok(_)) => Err(e),
    }
}

async fn stabilize_and_join(
    cfg: &StabilizeConfig,
    store: &WorkDir,
    output: &Path,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(Vec<PathBuf>, Vec<StageReport>)> {
    let input_dir = store.input_dir();
    let inputs = scan::list_input_videos(cfg, input_dir, output)?;
    if inputs.is_empty() {
        return Err(VidprocError::Config(format!(
            "No input videos found in {}",
            input_dir.display()
        )));
    }
    scan::check_base_names(cfg, &inputs)?;

    store.ensure_directory()?;

    let runner = FfmpegRunner::new(cfg, input_dir);
    let commands = CommandBuilder::new(cfg);
    let stabilizer = Stabilizer::new(store, &runner, &commands);

    let mut stabilized = Vec::with_capacity(inputs.len());
    let mut stages = Vec::new();
    for (idx, input) in inputs.iter().enumerate() {
        info!("[{}/{}] {}", idx + 1, inputs.len(), input.file_name);
        let done = stabilizer.stabilize(input, shutdown).await?;
        stabilized.push(done.path);
        stages.extend(done.stages);
    }

    stages.push(join(store, &runner, &commands, &stabilized, output, shutdown).await?);
    Ok((stabilized, stages))
}

/// Stream-copy the stabilized videos, in order, into `output`
async fn join(
    store: &WorkDir,
    runner: &FfmpegRunner,
    commands: &CommandBuilder,
    stabilized: &[PathBuf],
    output: &Path,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<StageReport> {
    let tick = Instant::now();
    info!(
        "Joining {} video files without re-encoding, into {}",
        stabilized.len(),
        output.display()
    );

    let listing = store.listing_path();
    let manifest = ConcatManifest::new(stabilized, store.input_dir());
    manifest.write_to(listing)?;

    let args = commands.build_concat_command(listing, output);
    if let Err(e) = runner.run(Stage::Concat, args, shutdown).await {
        // An output left behind would make the next run a no-op
        if let Err(cleanup_err) = delete_file(output) {
            error!("Could not remove partial output: {}", cleanup_err);
        }
        return Err(e);
    }
    delete_file(listing)?;

    let report = StageReport::new(Stage::Concat, output.to_path_buf(), tick.elapsed());
    info!("{}", report);
    Ok(report)
}
