use std::path::PathBuf;
use std::time::Instant;
use log::info;
use tokio::sync::watch;
use crate::error::{Result, Stage};
use crate::ffmpeg::{CommandBuilder, FfmpegRunner};
use crate::report::StageReport;
use crate::scan::InputVideo;
use crate::workdir::{delete_file, WorkDir};

/// Where an input stands, judged from the checkpoint artifacts on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilizeState {
    /// No transform descriptor yet
    NeedsAnalysis,
    /// Transform descriptor committed, stabilized video missing
    NeedsTransform,
    /// Stabilized video committed
    Complete,
}

/// Decide the entry state for `base_name`. Always re-reads the filesystem.
pub fn initial_state(store: &WorkDir, base_name: &str) -> StabilizeState {
    if store.has_stabilized_video(base_name) {
        StabilizeState::Complete
    } else if store.has_transform_descriptor(base_name) {
        StabilizeState::NeedsTransform
    } else {
        StabilizeState::NeedsAnalysis
    }
}

/// Result of driving one input to `Complete`
#[derive(Debug, Clone)]
pub struct StabilizedVideo {
    pub path: PathBuf,
    /// State found on entry
    pub resumed_from: StabilizeState,
    /// Tool stages run for this input, in order
    pub stages: Vec<StageReport>,
}

/// Drives inputs through analysis and transform, checkpointing each stage
pub struct Stabilizer<'a> {
    store: &'a WorkDir,
    runner: &'a FfmpegRunner,
    commands: &'a CommandBuilder,
}

impl<'a> Stabilizer<'a> {
    pub fn new(store: &'a WorkDir, runner: &'a FfmpegRunner, commands: &'a CommandBuilder) -> Self {
        Self { store, runner, commands }
    }

    /// Bring `input` to `Complete`, skipping every stage whose checkpoint exists.
    ///
    /// A tool failure returns before anything is committed for that stage.
    pub async fn stabilize(
        &self,
        input: &InputVideo,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<StabilizedVideo> {
        let base = input.base_name.as_str();
        let stabilized = self.store.path_for_stabilized_video(base);
        let resumed_from = initial_state(self.store, base);
        let mut stages = Vec::new();

        if resumed_from == StabilizeState::Complete {
            info!("Stabilized video already exists: {}", stabilized.display());
            return Ok(StabilizedVideo { path: stabilized, resumed_from, stages });
        }

        // Leftovers from a crashed attempt would be read as this input's transforms
        self.store.clear_temp_artifacts()?;

        if resumed_from == StabilizeState::NeedsTransform {
            // The descriptor is trusted by name only; a swapped input with the same base name reuses it
            info!(
                "Transforms file already exists: {}",
                self.store.path_for_transform_descriptor(base).display()
            );
            self.store.restore_transform_descriptor(base)?;
        }

        let mut state = resumed_from;
        loop {
            state = match state {
                StabilizeState::NeedsAnalysis => {
                    stages.push(self.analyze(input, shutdown).await?);
                    StabilizeState::NeedsTransform
                }
                StabilizeState::NeedsTransform => {
                    stages.push(self.transform(input, shutdown).await?);
                    StabilizeState::Complete
                }
                StabilizeState::Complete => break,
            };
        }

        Ok(StabilizedVideo { path: stabilized, resumed_from, stages })
    }

    async fn analyze(&self, input: &InputVideo, shutdown: &mut watch::Receiver<bool>) -> Result<StageReport> {
        let tick = Instant::now();
        info!("Creating transforms file for: {}", input.path.display());

        let args = self.commands.build_detect_command(&input.path);
        self.runner.run(Stage::Analyze, args, shutdown).await?;

        let descriptor = self
            .store
            .commit_temp_as_transform_descriptor(self.store.temp_transforms_path(), &input.base_name)?;

        let report = StageReport::new(Stage::Analyze, descriptor, tick.elapsed());
        info!("{} ({})", report, input.file_name);
        Ok(report)
    }

    async fn transform(&self, input: &InputVideo, shutdown: &mut watch::Receiver<bool>) -> Result<StageReport> {
        let tick = Instant::now();
        info!("Creating stabilized video for: {}", input.path.display());

        let temp = self.store.temp_stabilized_path();
        delete_file(temp)?;

        let args = self.commands.build_transform_command(&input.path, temp);
        self.runner.run(Stage::Transform, args, shutdown).await?;

        let stabilized = self.store.commit_temp_as_stabilized_video(temp, &input.base_name)?;
        delete_file(self.store.temp_transforms_path())?;

        let report = StageReport::new(Stage::Transform, stabilized, tick.elapsed());
        info!("{}", report);
        Ok(report)
    }
}
