use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use chrono::{DateTime, Local};
use humansize::{format_size, DECIMAL};
use serde::Serialize;
use crate::error::Stage;

/// Timing of one external tool stage
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    /// The file the stage produced
    pub subject: PathBuf,
    pub elapsed: Duration,
}

impl StageReport {
    pub fn new(stage: Stage, subject: PathBuf, elapsed: Duration) -> Self {
        Self { stage, subject, elapsed }
    }
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.stage {
            Stage::Analyze => "Analysed into",
            Stage::Transform => "Stabilized",
            Stage::Concat => "Joined stabilized video files into",
            Stage::Preflight => "Checked",
        };
        write!(
            f,
            "{} {} in {}",
            verb,
            self.subject.display(),
            format_duration(self.elapsed)
        )
    }
}

/// What a completed run did
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Local>,
    pub output: PathBuf,
    pub output_bytes: u64,
    /// Stabilized videos in join order
    pub stabilized: Vec<PathBuf>,
    /// Stages actually executed; checkpointed work has no entry
    pub stages: Vec<StageReport>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn count(&self, stage: Stage) -> usize {
        self.stages.iter().filter(|s| s.stage == stage).count()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for stage in &self.stages {
            writeln!(f, "{}", stage)?;
        }
        write!(
            f,
            "Stabilized and joined {} videos in {} into {} ({}), started {}",
            self.stabilized.len(),
            format_duration(self.elapsed),
            self.output.display(),
            format_size(self.output_bytes, DECIMAL),
            self.started_at.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

/// Whole seconds, with minutes and hours once they apply
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
