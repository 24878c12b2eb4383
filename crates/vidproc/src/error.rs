use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The external tool stage an invocation belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Stage {
    /// vid.stab detection pass, writes the transform descriptor
    Analyze,
    /// vid.stab transform pass, writes the stabilized video
    Transform,
    /// stream-copy join of all stabilized videos
    Concat,
    /// `ffmpeg -version` / `-filters` checks before a run
    Preflight,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Analyze => "analyze",
            Stage::Transform => "transform",
            Stage::Concat => "concat",
            Stage::Preflight => "preflight",
        };
        f.write_str(name)
    }
}

/// Errors raised while stabilizing and joining videos
#[derive(Error, Debug)]
pub enum VidprocError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to start {}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ffmpeg {stage} failed (exit code: {})\nCommand: {command}\nSTDERR (tail):\n{stderr_tail}", .code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    ToolFailed {
        stage: Stage,
        code: Option<i32>,
        command: String,
        stderr_tail: String,
    },

    #[error("Failed to {op} {}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Interrupted, active ffmpeg process terminated")]
    Interrupted,
}

impl VidprocError {
    /// Wrap an I/O error with the operation and path it came from
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        VidprocError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, VidprocError::Config(_))
    }
}

/// Result type for vidproc operations
pub type Result<T> = std::result::Result<T, VidprocError>;
