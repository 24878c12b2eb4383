use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use crate::error::{Result, VidprocError};

/// Configuration for a stabilize-and-join run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizeConfig {
    /// Directory holding the input videos; ffmpeg runs with this as its working directory
    pub input_dir: PathBuf,
    /// Path to the ffmpeg binary
    pub ffmpeg_bin: PathBuf,
    /// Optional `-loglevel` passed to every ffmpeg invocation
    pub ffmpeg_loglevel: Option<String>,
    /// Check the ffmpeg build for the stabilization filters before doing any work
    pub preflight: bool,
    /// Side directory (inside `input_dir`) holding transform descriptors and stabilized videos
    pub work_dir_name: String,
    /// Output filename used when none is given on the command line
    pub default_output: String,
    /// Container suffix required on the output and used for stabilized videos
    pub video_suffix: String,
    /// Suffix of durable transform descriptors
    pub transforms_suffix: String,
    /// Concat demuxer listing written before the join
    pub listing_filename: String,
    /// Transform file the vid.stab filters read and write by default. Don't change
    /// this unless the filters are given a matching `result=`/`input=` option.
    pub temp_transforms_file: String,
    /// Scratch file (inside the side directory) the transform pass encodes into
    pub temp_stabilized_file: String,
    /// Analysis filter graph
    pub detect_filter: String,
    /// Transform filter graph
    pub transform_filter: String,
    /// Only files with these extensions are inputs (case-insensitive); empty accepts every regular file
    pub input_extensions: Vec<String>,
}

impl Default for StabilizeConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl StabilizeConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            input_dir: PathBuf::from("."),
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffmpeg_loglevel: None,
            preflight: true,
            work_dir_name: "vidproc".to_string(),
            default_output: "out.mp4".to_string(),
            video_suffix: ".mp4".to_string(),
            transforms_suffix: ".trf".to_string(),
            listing_filename: "files.txt".to_string(),
            temp_transforms_file: "transforms.trf".to_string(),
            temp_stabilized_file: "temp_stabilized.mp4".to_string(),
            detect_filter: "vidstabdetect".to_string(),
            transform_filter: "vidstabtransform".to_string(),
            input_extensions: Vec::new(),
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .map_err(|e| VidprocError::io("read config file", config_path, e))?;

                // TOML by extension, JSON otherwise
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content).map_err(|e| {
                        VidprocError::Config(format!(
                            "Failed to parse TOML config {}: {}",
                            config_path.display(),
                            e
                        ))
                    })?;
                } else {
                    config = serde_json::from_str(&content).map_err(|e| {
                        VidprocError::Config(format!(
                            "Failed to parse JSON config {}: {}",
                            config_path.display(),
                            e
                        ))
                    })?;
                }
            } else {
                log::warn!("Config file {} not found, using defaults", config_path.display());
            }
        }

        Ok(config)
    }

    /// Reject an output filename that doesn't carry the container suffix
    pub fn check_output_suffix(&self, output: &Path) -> Result<()> {
        let file_name = output
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                VidprocError::Config(format!("Output path has no file name: {}", output.display()))
            })?;

        if has_suffix_ignore_case(file_name, &self.video_suffix) {
            Ok(())
        } else {
            Err(VidprocError::Config(format!(
                "Output video filename suffix should be {} (got {})",
                self.video_suffix, file_name
            )))
        }
    }

    /// Whether a file with this name is accepted by `input_extensions`
    pub fn accepts_input(&self, file_name: &str) -> bool {
        if self.input_extensions.is_empty() {
            return true;
        }
        let ext = match file_name.rfind('.') {
            Some(idx) => &file_name[idx + 1..],
            None => return false,
        };
        self.input_extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }
}

/// Compare the text from the last `.` onwards with `suffix`, ignoring ASCII case
fn has_suffix_ignore_case(file_name: &str, suffix: &str) -> bool {
    match file_name.rfind('.') {
        Some(idx) => file_name[idx..].eq_ignore_ascii_case(suffix),
        None => false,
    }
}
