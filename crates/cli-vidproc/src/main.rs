use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::watch;
use vidproc::{RunOutcome, StabilizeConfig, VidprocError};

/// Stabilize every video in a folder and join them, in filename order, into one MP4.
///
/// Interrupted runs pick up where they stopped as long as the `vidproc`
/// side folder is kept. Delete it once the output looks right.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Output video filename, must end in .mp4 [default: out.mp4]
    output: Option<PathBuf>,

    /// Folder holding the input videos [default: current directory]
    #[arg(short, long)]
    input_dir: Option<PathBuf>,

    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Don't check the ffmpeg build for the vid.stab filters before starting
    #[arg(long)]
    skip_preflight: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    // RUST_LOG wins; otherwise info, or debug with --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let mut cfg = StabilizeConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(dir) = args.input_dir {
        cfg.input_dir = dir;
    }
    if args.skip_preflight {
        cfg.preflight = false;
    }
    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(&cfg.default_output));

    info!("Input folder: {}", cfg.input_dir.display());
    info!("Output video: {}", output.display());
    info!("ffmpeg: {}", cfg.ffmpeg_bin.display());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if wait_for_signal().await {
            warn!("Interrupt received, stopping ffmpeg and cleaning up...");
            let _ = shutdown_tx.send(true);
        }
    });

    match vidproc::run(&cfg, &output, shutdown_rx).await? {
        RunOutcome::AlreadyExists(path) => {
            info!("{} already exists. Nothing to do", path.display());
        }
        RunOutcome::Completed(summary) => {
            println!("{}", summary);
            info!(
                "Stabilized and joined videos in {} into {}",
                vidproc::report::format_duration(summary.elapsed),
                summary.output.display()
            );
        }
    }

    Ok(())
}

/// Exit status for a failed run: 2 for configuration problems, 130 for interrupts
fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<VidprocError>() {
        Some(VidprocError::Config(_)) => 2,
        Some(VidprocError::Interrupted) => 130,
        _ => 1,
    }
}

/// Resolves true on SIGINT (or SIGTERM on unix), false if signals can't be watched
#[cfg(unix)]
async fn wait_for_signal() -> bool {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            return tokio::signal::ctrl_c().await.is_ok();
        }
    };

    tokio::select! {
        res = tokio::signal::ctrl_c() => res.is_ok(),
        _ = terminate.recv() => true,
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> bool {
    tokio::signal::ctrl_c().await.is_ok()
}
