use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use currency_assist_common::frame::Frame;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("failed to create archive directory {path}: {err}", path = .0.display(), err = .1)]
    CreateDir(PathBuf, io::Error),
    #[error("failed to scan archive directory {path}: {err}", path = .0.display(), err = .1)]
    Scan(PathBuf, io::Error),
    #[error("failed to write {path}: {err}", path = .0.display(), err = .1)]
    Write(PathBuf, io::Error),
    #[error("failed to remove {path}: {err}", path = .0.display(), err = .1)]
    Remove(PathBuf, io::Error),
}

/// Admitted frames on local disk as `{dir}/{date}/{timestamp}_{seq}.jpg`,
/// keeping at most `max_files`. Oldest go first.
pub struct CaptureArchive {
    dir: PathBuf,
    max_files: usize,
    /// Keys relative to `dir`. They sort chronologically.
    index: BTreeSet<String>,
}

impl CaptureArchive {
    /// Open (creating if needed) the archive and index what is already there.
    pub async fn open(dir: impl Into<PathBuf>, max_files: usize) -> Result<Self, ArchiveError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ArchiveError::CreateDir(dir.clone(), e))?;

        let index = scan(&dir).await?;
        info!(
            dir = %dir.display(),
            files = index.len(),
            max_files,
            "capture archive opened"
        );

        let mut archive = Self {
            dir,
            max_files,
            index,
        };
        archive.evict().await?;
        Ok(archive)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[cfg(test)]
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains(key)
    }

    pub async fn store(&mut self, frame: &Frame) -> Result<(), ArchiveError> {
        let key = frame.object_key("");
        let path = self.dir.join(&key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ArchiveError::CreateDir(parent.to_path_buf(), e))?;
        }
        tokio::fs::write(&path, &frame.jpeg)
            .await
            .map_err(|e| ArchiveError::Write(path.clone(), e))?;
        debug!(key, size = frame.payload_size(), "archived frame");

        self.index.insert(key);
        self.evict().await
    }

    async fn evict(&mut self) -> Result<(), ArchiveError> {
        while self.index.len() > self.max_files {
            let Some(oldest) = self.index.pop_first() else {
                break;
            };
            let path = self.dir.join(&oldest);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(key = oldest, "evicted archived frame"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    // Still on disk, so still indexed.
                    self.index.insert(oldest);
                    return Err(ArchiveError::Remove(path, e));
                }
            }
            if let Some(day) = path.parent() {
                // Only succeeds once the day directory is empty.
                let _ = tokio::fs::remove_dir(day).await;
            }
        }
        Ok(())
    }
}

async fn scan(dir: &Path) -> Result<BTreeSet<String>, ArchiveError> {
    let scan_err = |e| ArchiveError::Scan(dir.to_path_buf(), e);
    let mut index = BTreeSet::new();

    let mut days = tokio::fs::read_dir(dir).await.map_err(scan_err)?;
    while let Some(day) = days.next_entry().await.map_err(scan_err)? {
        if !day.file_type().await.map_err(scan_err)?.is_dir() {
            continue;
        }
        let day_name = day.file_name().to_string_lossy().into_owned();
        let mut files = match tokio::fs::read_dir(day.path()).await {
            Ok(files) => files,
            Err(e) => {
                warn!(
                    dir = %day.path().display(),
                    error = %e,
                    "skipping unreadable archive directory"
                );
                continue;
            }
        };
        while let Some(file) = files.next_entry().await.map_err(scan_err)? {
            let name = file.file_name().to_string_lossy().into_owned();
            if name.ends_with(".jpg") {
                index.insert(format!("{day_name}/{name}"));
            }
        }
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{frame, Pattern};

    #[tokio::test]
    async fn stores_under_date_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let mut archive = CaptureArchive::open(tmp.path(), 10).await.unwrap();

        archive.store(&frame(7, Pattern::LeftBright)).await.unwrap();
        let key = "2024-02-19/20240219T002647000Z_000007.jpg";
        assert!(archive.contains(key));
        let written = std::fs::read(tmp.path().join(key)).unwrap();
        assert_eq!(&written[..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn evicts_oldest_beyond_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let mut archive = CaptureArchive::open(tmp.path(), 3).await.unwrap();

        for seq in 0..5 {
            archive.store(&frame(seq, Pattern::TopBright)).await.unwrap();
        }
        assert_eq!(archive.len(), 3);
        assert!(!archive.contains("2024-02-19/20240219T002640000Z_000000.jpg"));
        assert!(!archive.contains("2024-02-19/20240219T002641000Z_000001.jpg"));
        assert!(archive.contains("2024-02-19/20240219T002644000Z_000004.jpg"));

        let on_disk = std::fs::read_dir(tmp.path().join("2024-02-19")).unwrap().count();
        assert_eq!(on_disk, 3);
    }

    #[tokio::test]
    async fn reopening_picks_up_existing_files() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let mut archive = CaptureArchive::open(tmp.path(), 10).await.unwrap();
            for seq in 0..4 {
                archive.store(&frame(seq, Pattern::LeftBright)).await.unwrap();
            }
        }
        std::fs::write(tmp.path().join("notes.txt"), b"ignored").unwrap();

        let archive = CaptureArchive::open(tmp.path(), 2).await.unwrap();
        assert_eq!(archive.len(), 2);
        assert!(archive.contains("2024-02-19/20240219T002643000Z_000003.jpg"));
    }

    #[tokio::test]
    async fn open_on_a_file_names_the_path() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("captures");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let err = CaptureArchive::open(&blocker, 10).await.err().unwrap();
        assert!(matches!(err, ArchiveError::CreateDir(..)));
        let message = err.to_string();
        assert!(message.starts_with("failed to create archive directory"));
        assert!(message.contains(&blocker.display().to_string()));
    }

    #[tokio::test]
    async fn failed_removal_stays_indexed() {
        let tmp = tempfile::tempdir().unwrap();
        // A directory where the oldest frame should be: remove_file cannot delete it.
        let stuck = "2024-02-19/20240219T002640000Z_000000.jpg";
        std::fs::create_dir_all(tmp.path().join(stuck)).unwrap();

        let mut archive = CaptureArchive::open(tmp.path(), 1).await.unwrap();
        assert!(archive.contains(stuck));

        let err = archive.store(&frame(1, Pattern::LeftBright)).await.unwrap_err();
        assert!(matches!(err, ArchiveError::Remove(..)));
        assert_eq!(archive.len(), 2);
        assert!(archive.contains(stuck));
        assert!(archive.contains("2024-02-19/20240219T002641000Z_000001.jpg"));
    }

    #[tokio::test]
    async fn empty_day_directories_are_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let mut archive = CaptureArchive::open(tmp.path(), 1).await.unwrap();

        archive.store(&frame(0, Pattern::LeftBright)).await.unwrap();
        // A frame from the next day pushes the only older file out.
        let next_day = Frame::new(
            crate::testutil::jpeg(Pattern::LeftBright),
            1_708_302_400_000 + 86_400_000,
            1,
            currency_assist_common::frame::Resolution::new(64, 64),
        )
        .unwrap();
        archive.store(&next_day).await.unwrap();

        assert!(!tmp.path().join("2024-02-19").exists());
        assert!(tmp.path().join("2024-02-20").is_dir());
    }
}
