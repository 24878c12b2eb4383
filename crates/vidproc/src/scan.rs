use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use log::{debug, info, warn};
use crate::config::StabilizeConfig;
use crate::error::{Result, VidprocError};

/// A video file found in the input directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputVideo {
    pub path: PathBuf,
    /// File name without directory; defines the join order
    pub file_name: String,
    /// File name without its last extension; keys the checkpoint artifacts
    pub base_name: String,
}

impl InputVideo {
    pub fn new(path: PathBuf, file_name: String) -> Self {
        let base_name = base_name(&file_name).to_string();
        Self { path, file_name, base_name }
    }
}

/// Strip the last extension from a file name (`clip.01.mov` -> `clip.01`).
/// Names without an extension, and dotfiles, are returned whole.
pub fn base_name(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(idx) if idx > 0 => &file_name[..idx],
        _ => file_name,
    }
}

/// List the regular files directly inside `dir`, sorted by file name.
///
/// Files the run owns (`output`, the concat listing and the temp transform
/// file) are never returned, and `input_extensions` is applied if configured.
pub fn list_input_videos(cfg: &StabilizeConfig, dir: &Path, output: &Path) -> Result<Vec<InputVideo>> {
    let mut inputs = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(true) {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
            let source = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "directory loop"));
            VidprocError::io("list", path, source)
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => {
                warn!("Skipping file with non UTF-8 name: {}", path.display());
                continue;
            }
        };

        if path == output
            || file_name == cfg.listing_filename
            || file_name == cfg.temp_transforms_file
        {
            debug!("Ignoring run-owned file: {}", path.display());
            continue;
        }

        if !cfg.accepts_input(&file_name) {
            debug!("Ignoring file with unlisted extension: {}", path.display());
            continue;
        }

        inputs.push(InputVideo::new(path.to_path_buf(), file_name));
    }

    inputs.sort_by(|a, b| a.file_name.cmp(&b.file_name));

    for input in &inputs {
        info!("Input video: {}", input.path.display());
    }

    Ok(inputs)
}

/// Fail if two inputs would share checkpoint artifacts, or if an input's
/// checkpoint would land on the side directory's scratch file
pub fn check_base_names(cfg: &StabilizeConfig, inputs: &[InputVideo]) -> Result<()> {
    let mut seen: HashMap<&str, &str> = HashMap::new();
    for input in inputs {
        for suffix in [&cfg.video_suffix, &cfg.transforms_suffix] {
            let checkpoint = format!("{}{}", input.base_name, suffix);
            if checkpoint.eq_ignore_ascii_case(&cfg.temp_stabilized_file) {
                return Err(VidprocError::Config(format!(
                    "{} would be checkpointed as {}, which is reserved for scratch; rename it",
                    input.file_name, checkpoint
                )));
            }
        }
        if let Some(previous) = seen.insert(&input.base_name, &input.file_name) {
            return Err(VidprocError::Config(format!(
                "{} and {} share the base name '{}'; rename one of them",
                previous, input.file_name, input.base_name
            )));
        }
    }
    Ok(())
}
