use std::fs;
use std::path::{Path, PathBuf};
use log::info;
use crate::config::StabilizeConfig;
use crate::error::{Result, VidprocError};

/// Suffix of the staging copy made while committing a transform descriptor
const PARTIAL_SUFFIX: &str = ".partial";

/// The side directory holding per-input checkpoint artifacts.
///
/// A `<base>.mp4` means stabilization of that input finished; a `<base>.trf`
/// alone means analysis finished. Durable files only appear through a rename
/// of a completed file, so their presence is always trustworthy.
#[derive(Debug, Clone)]
pub struct WorkDir {
    input_dir: PathBuf,
    root: PathBuf,
    video_suffix: String,
    transforms_suffix: String,
    temp_transforms: PathBuf,
    temp_stabilized: PathBuf,
    listing: PathBuf,
}

impl WorkDir {
    pub fn new(cfg: &StabilizeConfig, input_dir: &Path) -> Self {
        let root = input_dir.join(&cfg.work_dir_name);
        Self {
            input_dir: input_dir.to_path_buf(),
            temp_transforms: input_dir.join(&cfg.temp_transforms_file),
            temp_stabilized: root.join(&cfg.temp_stabilized_file),
            listing: input_dir.join(&cfg.listing_filename),
            root,
            video_suffix: cfg.video_suffix.clone(),
            transforms_suffix: cfg.transforms_suffix.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    /// Where ffmpeg's vid.stab filters read and write transforms
    pub fn temp_transforms_path(&self) -> &Path {
        &self.temp_transforms
    }

    /// Where the transform pass encodes before the result is committed
    pub fn temp_stabilized_path(&self) -> &Path {
        &self.temp_stabilized
    }

    /// Concat demuxer listing location
    pub fn listing_path(&self) -> &Path {
        &self.listing
    }

    /// Create the side directory if it isn't there yet
    pub fn ensure_directory(&self) -> Result<()> {
        if self.root.is_dir() {
            info!("Folder already exists: {}", self.root.display());
            return Ok(());
        }
        fs::create_dir_all(&self.root)
            .map_err(|e| VidprocError::io("create folder", &self.root, e))?;
        info!("Created folder: {}", self.root.display());
        Ok(())
    }

    pub fn path_for_stabilized_video(&self, base_name: &str) -> PathBuf {
        self.root.join(format!("{}{}", base_name, self.video_suffix))
    }

    pub fn path_for_transform_descriptor(&self, base_name: &str) -> PathBuf {
        self.root.join(format!("{}{}", base_name, self.transforms_suffix))
    }

    fn staging_path_for_transform_descriptor(&self, base_name: &str) -> PathBuf {
        self.root
            .join(format!("{}{}{}", base_name, self.transforms_suffix, PARTIAL_SUFFIX))
    }

    pub fn has_stabilized_video(&self, base_name: &str) -> bool {
        self.path_for_stabilized_video(base_name).is_file()
    }

    pub fn has_transform_descriptor(&self, base_name: &str) -> bool {
        self.path_for_transform_descriptor(base_name).is_file()
    }

    /// Move a finished temp video into its durable slot
    pub fn commit_temp_as_stabilized_video(&self, temp: &Path, base_name: &str) -> Result<PathBuf> {
        let dest = self.path_for_stabilized_video(base_name);
        move_file(temp, &dest)?;
        Ok(dest)
    }

    /// Record a finished temp transform descriptor as durable.
    ///
    /// The temp file is still needed by the transform pass, so it is copied to
    /// a staging file next to the destination and the staging file is renamed.
    pub fn commit_temp_as_transform_descriptor(&self, temp: &Path, base_name: &str) -> Result<PathBuf> {
        let staging = self.staging_path_for_transform_descriptor(base_name);
        let dest = self.path_for_transform_descriptor(base_name);
        copy_file(temp, &staging)?;
        move_file(&staging, &dest)?;
        Ok(dest)
    }

    /// Copy a durable transform descriptor back to where ffmpeg expects it
    pub fn restore_transform_descriptor(&self, base_name: &str) -> Result<()> {
        let src = self.path_for_transform_descriptor(base_name);
        copy_file(&src, &self.temp_transforms)
    }

    /// Delete every run-scoped scratch file that exists. Returns how many were removed.
    pub fn clear_temp_artifacts(&self) -> Result<usize> {
        let mut removed = 0;
        for path in [&self.listing, &self.temp_transforms, &self.temp_stabilized] {
            if delete_file(path)? {
                removed += 1;
            }
        }

        // Leftover staging copies from an interrupted commit
        if self.root.is_dir() {
            let entries = fs::read_dir(&self.root)
                .map_err(|e| VidprocError::io("list", &self.root, e))?;
            for entry in entries {
                let entry = entry.map_err(|e| VidprocError::io("list", &self.root, e))?;
                let path = entry.path();
                let is_partial = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.ends_with(PARTIAL_SUFFIX))
                    .unwrap_or(false);
                if is_partial && delete_file(&path)? {
                    removed += 1;
                }
            }
        }

        Ok(removed)
    }

    /// Whether any run-scoped scratch file is present
    pub fn has_temp_artifacts(&self) -> bool {
        if self.listing.exists() || self.temp_transforms.exists() || self.temp_stabilized.exists() {
            return true;
        }
        fs::read_dir(&self.root)
            .map(|entries| {
                entries.filter_map(|e| e.ok()).any(|e| {
                    e.file_name()
                        .to_str()
                        .map(|n| n.ends_with(PARTIAL_SUFFIX))
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false)
    }
}

/// Rename `src` to `dest`
pub fn move_file(src: &Path, dest: &Path) -> Result<()> {
    fs::rename(src, dest).map_err(|e| VidprocError::io("move", src, e))?;
    info!("Moved {} to {}", src.display(), dest.display());
    Ok(())
}

/// Copy `src` to `dest`, replacing `dest`
pub fn copy_file(src: &Path, dest: &Path) -> Result<()> {
    fs::copy(src, dest).map_err(|e| VidprocError::io("copy", src, e))?;
    info!("Copied {} to {}", src.display(), dest.display());
    Ok(())
}

/// Delete `path` if it exists. Returns whether something was deleted.
pub fn delete_file(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => {
            info!("Deleted {}", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(VidprocError::io("delete", path, e)),
    }
}
