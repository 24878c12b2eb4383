use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use log::info;
use crate::error::{Result, VidprocError};

/// Ordered list of stabilized videos handed to ffmpeg's concat demuxer
#[derive(Debug, Clone, Default)]
pub struct ConcatManifest {
    entries: Vec<PathBuf>,
}

impl ConcatManifest {
    /// Entries are written relative to `base_dir` when they live under it,
    /// since the concat demuxer resolves relative paths against the listing's folder.
    pub fn new(videos: &[PathBuf], base_dir: &Path) -> Self {
        let entries = videos
            .iter()
            .map(|v| v.strip_prefix(base_dir).map(Path::to_path_buf).unwrap_or_else(|_| v.clone()))
            .collect();
        Self { entries }
    }

    /// One `file '<path>'` line per entry
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|p| format!("file '{}'\n", quote(&p.to_string_lossy())))
            .collect()
    }

    /// Write the listing, replacing any previous one
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(path)
            .map_err(|e| VidprocError::io("create", path, e))?;
        f.write_all(self.render().as_bytes())
            .map_err(|e| VidprocError::io("write", path, e))?;
        info!("Wrote {} entries to {}", self.entries.len(), path.display());
        Ok(())
    }
}

/// Escape for the concat demuxer's single-quoted strings: `'` becomes `'\''`
fn quote(s: &str) -> String {
    s.replace('\'', r"'\''")
}
