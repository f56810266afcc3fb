use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

/// A file owned by a single pipeline run. It is removed when dropped unless retained.
#[derive(Debug)]
struct ScopedFile {
    path: PathBuf,
    retain: bool,
}

impl ScopedFile {
    fn new(path: PathBuf, retain: bool) -> Self {
        Self { path, retain }
    }
}

impl Drop for ScopedFile {
    fn drop(&mut self) {
        if self.retain {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed intermediate file"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                path = %self.path.display(),
                "Failed to remove intermediate file: {}",
                err
            ),
        }
    }
}

/// Per-run download directory. Tools that leave partial files behind write here.
pub fn scratch_dir(parent: &Path, retain: bool) -> io::Result<TempDir> {
    tempfile::Builder::new()
        .prefix("accent-probe-")
        .keep(retain)
        .tempdir_in(parent)
}

/// Media downloaded by the acquirer, consumed by the extractor.
#[derive(Debug)]
pub struct MediaAsset {
    file: ScopedFile,
    // Dropped after `file`, takes any sibling files with it
    scratch: Option<TempDir>,
}

impl MediaAsset {
    pub fn new(path: impl Into<PathBuf>, retain: bool) -> Self {
        Self {
            file: ScopedFile::new(path.into(), retain),
            scratch: None,
        }
    }

    /// A file inside `scratch`, the whole directory goes when the asset is dropped.
    pub fn in_scratch_dir(path: impl Into<PathBuf>, scratch: TempDir, retain: bool) -> Self {
        Self {
            file: ScopedFile::new(path.into(), retain),
            scratch: Some(scratch),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file.path
    }

    pub fn scratch_path(&self) -> Option<&Path> {
        self.scratch.as_ref().map(TempDir::path)
    }

    /// Size of the file on disk, failing if it is missing.
    pub fn size_on_disk(&self) -> io::Result<u64> {
        Ok(fs::metadata(self.path())?.len())
    }
}

/// Mono 16 kHz waveform produced by the extractor, consumed by the classifier.
#[derive(Debug)]
pub struct AudioAsset(ScopedFile);

impl AudioAsset {
    pub fn new(path: impl Into<PathBuf>, retain: bool) -> Self {
        Self(ScopedFile::new(path.into(), retain))
    }

    pub fn path(&self) -> &Path {
        &self.0.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_file_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        fs::write(&path, b"data").unwrap();

        let asset = MediaAsset::new(&path, false);
        assert_eq!(asset.size_on_disk().unwrap(), 4);
        drop(asset);
        assert!(!path.exists());
    }

    #[test]
    fn retained_files_survive() {
        let dir = tempfile::tempdir().unwrap();
        let retained = dir.path().join("retained.wav");
        fs::write(&retained, b"a").unwrap();

        drop(AudioAsset::new(&retained, true));
        assert!(retained.exists());
    }

    #[test]
    fn scratch_dir_goes_with_its_media() {
        let work_dir = tempfile::tempdir().unwrap();
        let scratch = scratch_dir(work_dir.path(), false).unwrap();
        let media = scratch.path().join("abc.webm");
        let leftover = scratch.path().join("abc.webm.part");
        fs::write(&media, b"data").unwrap();
        fs::write(&leftover, b"partial").unwrap();

        let asset = MediaAsset::in_scratch_dir(&media, scratch, false);
        let scratch_path = asset.scratch_path().unwrap().to_path_buf();
        drop(asset);
        assert!(!scratch_path.exists());
        assert_eq!(fs::read_dir(work_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn retained_scratch_dir_survives() {
        let work_dir = tempfile::tempdir().unwrap();
        let scratch = scratch_dir(work_dir.path(), true).unwrap();
        let media = scratch.path().join("abc.webm");
        fs::write(&media, b"data").unwrap();

        drop(MediaAsset::in_scratch_dir(&media, scratch, true));
        assert!(media.exists());
    }

    #[test]
    fn missing_file_is_not_an_error_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let asset = MediaAsset::new(dir.path().join("never-written.mp4"), false);
        assert!(asset.size_on_disk().is_err());
        drop(asset);
    }
}
