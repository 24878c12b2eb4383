pub mod config;
pub mod error;
pub mod scan;
pub mod workdir;
pub mod ffmpeg;
pub mod concat;
pub mod report;
pub mod stabilize;
pub mod orchestrator;

pub use config::StabilizeConfig;
pub use error::{Stage, VidprocError};
pub use orchestrator::{run, RunOutcome};
pub use report::{RunSummary, StageReport};
pub use stabilize::StabilizeState;
