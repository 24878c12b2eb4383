use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use anyhow::{anyhow, Context};
use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use crate::config::StabilizeConfig;
use crate::error::{Result, Stage, VidprocError};

/// How much of ffmpeg's stderr is kept for error reports
const STDERR_TAIL_BYTES: usize = 4096;

/// FFmpeg version information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FFmpegVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FFmpegVersion {
    /// Parse version from FFmpeg version string
    /// Example: "ffmpeg version 6.1.1-3ubuntu5" -> FFmpegVersion { major: 6, minor: 1, patch: 1 }
    pub fn parse(version_str: &str) -> anyhow::Result<Self> {
        let version_part = version_str
            .split_whitespace()
            .find(|s| s.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false))
            .ok_or_else(|| anyhow!("No version number found in: {}", version_str))?;

        // Distro builds append a suffix: "6.1.1-3ubuntu5", "7.0.2+dfsg"
        let numeric: String = version_part
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        let parts: Vec<&str> = numeric.split('.').filter(|p| !p.is_empty()).collect();

        if parts.is_empty() {
            return Err(anyhow!("Invalid version format: {}", version_str));
        }

        let major = parts[0].parse::<u32>()
            .with_context(|| format!("Failed to parse major version from: {}", parts[0]))?;
        let minor = match parts.get(1) {
            Some(p) => p.parse::<u32>()
                .with_context(|| format!("Failed to parse minor version from: {}", p))?,
            None => 0,
        };
        let patch = match parts.get(2) {
            Some(p) => p.parse::<u32>()
                .with_context(|| format!("Failed to parse patch version from: {}", p))?,
            None => 0,
        };

        Ok(FFmpegVersion { major, minor, patch })
    }
}

/// What the preflight learned about the configured ffmpeg
#[derive(Debug, Clone)]
pub struct FFmpegInfo {
    pub ffmpeg_bin: PathBuf,
    /// None for git builds that report a commit instead of a release
    pub version: Option<FFmpegVersion>,
}

/// Check that ffmpeg runs and was built with the stabilization filters
pub async fn probe_ffmpeg(cfg: &StabilizeConfig) -> Result<FFmpegInfo> {
    let version_out = capture(&cfg.ffmpeg_bin, &["-version"]).await?;
    let first_line = version_out.lines().next().unwrap_or_default();
    let version = match FFmpegVersion::parse(first_line) {
        Ok(v) => {
            info!("Using ffmpeg {}.{}.{} at {}", v.major, v.minor, v.patch, cfg.ffmpeg_bin.display());
            Some(v)
        }
        Err(e) => {
            warn!("Could not determine ffmpeg version: {:#}", e);
            None
        }
    };

    let filters_out = capture(&cfg.ffmpeg_bin, &["-hide_banner", "-filters"]).await?;
    let missing = missing_filters(&filters_out, &[cfg.detect_filter.as_str(), cfg.transform_filter.as_str()]);
    if !missing.is_empty() {
        return Err(VidprocError::Config(format!(
            "{} lacks the {} filter(s); install an ffmpeg built with --enable-libvidstab",
            cfg.ffmpeg_bin.display(),
            missing.join(", ")
        )));
    }

    Ok(FFmpegInfo {
        ffmpeg_bin: cfg.ffmpeg_bin.clone(),
        version,
    })
}

/// Filter names (the part before any `=` options) absent from `ffmpeg -filters` output
fn missing_filters(filters_out: &str, wanted: &[&str]) -> Vec<String> {
    wanted
        .iter()
        .map(|graph| graph.split('=').next().unwrap_or("").trim())
        .filter(|name| {
            !filters_out
                .lines()
                .any(|line| line.split_whitespace().nth(1) == Some(*name))
        })
        .map(str::to_string)
        .collect()
}

async fn capture(ffmpeg_bin: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new(ffmpeg_bin)
        .args(args)
        .output()
        .await
        .map_err(|e| VidprocError::Spawn { program: ffmpeg_bin.to_path_buf(), source: e })?;

    if !output.status.success() {
        return Err(VidprocError::ToolFailed {
            stage: Stage::Preflight,
            code: output.status.code(),
            command: format!("{} {}", ffmpeg_bin.display(), args.join(" ")),
            stderr_tail: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Runs ffmpeg in the input directory, one invocation at a time
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    ffmpeg_bin: PathBuf,
    working_dir: PathBuf,
}

impl FfmpegRunner {
    pub fn new(cfg: &StabilizeConfig, working_dir: &Path) -> Self {
        Self {
            ffmpeg_bin: cfg.ffmpeg_bin.clone(),
            working_dir: working_dir.to_path_buf(),
        }
    }

    /// Start ffmpeg with `args`.
    ///
    /// stdout is inherited; stderr is passed through to ours while the last few
    /// KiB are kept for the error report.
    pub fn spawn(&self, stage: Stage, args: Vec<String>) -> Result<ToolInvocation> {
        let command = format!("{} {}", self.ffmpeg_bin.display(), args.join(" "));
        debug!("Executing FFmpeg: {}", command);

        let mut child = Command::new(&self.ffmpeg_bin)
            .args(&args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| VidprocError::Spawn { program: self.ffmpeg_bin.clone(), source: e })?;

        info!("Started ffmpeg {} (pid {})", stage, child.id().unwrap_or_default());

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut tail: VecDeque<u8> = VecDeque::with_capacity(STDERR_TAIL_BYTES);
                let mut out = tokio::io::stderr();
                let mut buf = [0u8; 4096];
                loop {
                    let n = match stderr.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    };
                    // Passing through is best effort; the tail still gets recorded
                    let _ = out.write_all(&buf[..n]).await;
                    for &byte in &buf[..n] {
                        if tail.len() == STDERR_TAIL_BYTES {
                            tail.pop_front();
                        }
                        tail.push_back(byte);
                    }
                }
                let _ = out.flush().await;
                String::from_utf8_lossy(tail.make_contiguous()).into_owned()
            })
        });

        Ok(ToolInvocation {
            stage,
            command,
            child,
            stderr_task,
        })
    }

    /// Run one invocation to completion, or terminate it once `shutdown` turns true
    pub async fn run(
        &self,
        stage: Stage,
        args: Vec<String>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        if *shutdown.borrow() {
            return Err(VidprocError::Interrupted);
        }

        let mut invocation = self.spawn(stage, args)?;

        let status = tokio::select! {
            status = invocation.wait() => status?,
            // Err means the sender is gone, which never asks for shutdown.
            // The borrowed value is dropped here so the future stays Send.
            Ok(()) = async { shutdown.wait_for(|stop| *stop).await.map(|_| ()) } => {
                warn!("Shutdown requested, terminating ffmpeg {}", stage);
                invocation.terminate().await?;
                return Err(VidprocError::Interrupted);
            }
        };

        invocation.check(status).await
    }
}

/// A running ffmpeg process. Killed when dropped before it exits.
pub struct ToolInvocation {
    stage: Stage,
    command: String,
    child: Child,
    stderr_task: Option<JoinHandle<String>>,
}

impl ToolInvocation {
    /// Block until the process exits
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        self.child
            .wait()
            .await
            .map_err(|e| VidprocError::io("wait for", PathBuf::from(&self.command), e))
    }

    /// Kill the process and reap it
    pub async fn terminate(&mut self) -> Result<()> {
        match self.child.try_wait() {
            Ok(Some(_)) => return Ok(()),
            Ok(None) => {}
            Err(e) => warn!("Could not poll ffmpeg {}: {}", self.stage, e),
        }
        self.child
            .kill()
            .await
            .map_err(|e| VidprocError::io("kill", PathBuf::from(&self.command), e))?;
        info!("Terminated ffmpeg {}", self.stage);
        Ok(())
    }

    /// Turn the exit status into a result, attaching the stderr tail on failure
    pub async fn check(mut self, status: ExitStatus) -> Result<()> {
        info!("ffmpeg {} exited with code: {}", self.stage, status.code().unwrap_or(-1));
        if status.success() {
            return Ok(());
        }
        let stderr_tail = match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        Err(VidprocError::ToolFailed {
            stage: self.stage,
            code: status.code(),
            command: self.command,
            stderr_tail,
        })
    }
}

/// Command builder for the three ffmpeg invocations of a run
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    loglevel: Option<String>,
    detect_filter: String,
    transform_filter: String,
}

impl CommandBuilder {
    pub fn new(cfg: &StabilizeConfig) -> Self {
        Self {
            loglevel: cfg.ffmpeg_loglevel.clone(),
            detect_filter: cfg.detect_filter.clone(),
            transform_filter: cfg.transform_filter.clone(),
        }
    }

    fn base_args(&self) -> Vec<String> {
        match &self.loglevel {
            Some(level) => vec!["-loglevel".to_string(), level.clone()],
            None => Vec::new(),
        }
    }

    /// Analysis pass: `-i <input> -vf vidstabdetect -f null -`
    pub fn build_detect_command(&self, input: &Path) -> Vec<String> {
        let mut args = self.base_args();
        args.push("-i".to_string());
        args.push(input.to_string_lossy().to_string());
        args.push("-vf".to_string());
        args.push(self.detect_filter.clone());
        args.push("-f".to_string());
        args.push("null".to_string());
        args.push("-".to_string());
        args
    }

    /// Transform pass: `-i <input> -vf vidstabtransform <output>`
    pub fn build_transform_command(&self, input: &Path, output: &Path) -> Vec<String> {
        let mut args = self.base_args();
        args.push("-i".to_string());
        args.push(input.to_string_lossy().to_string());
        args.push("-vf".to_string());
        args.push(self.transform_filter.clone());
        args.push(output.to_string_lossy().to_string());
        args
    }

    /// Stream-copy join: `-f concat -safe 0 -i <listing> -c copy <output>`
    pub fn build_concat_command(&self, listing: &Path, output: &Path) -> Vec<String> {
        let mut args = self.base_args();
        args.push("-f".to_string());
        args.push("concat".to_string());
        args.push("-safe".to_string());
        args.push("0".to_string());
        args.push("-i".to_string());
        args.push(listing.to_string_lossy().to_string());
        args.push("-c".to_string());
        args.push("copy".to_string());
        args.push(output.to_string_lossy().to_string());
        args
    }
}
