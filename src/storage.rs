use std::{
    io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, TimeZone};
use tokio::fs::{self, File, OpenOptions};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H.%M.%S";

#[derive(thiserror::Error, Debug)]
pub enum StagingError {
    #[error("Segment {0} has not been staged")]
    Missing(u64),
    #[error("I/O error")]
    IoError(#[from] io::Error),
}

impl StagingError {
    pub fn is_missing(&self) -> bool {
        matches!(self, StagingError::Missing(_))
    }
}

/// On-disk layout of one capture session: the master file
/// `{dir}/{stem}.ts` and the staged artifacts `{dir}/{stem}~{index}.ts`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionFiles {
    dir: PathBuf,
    stem: String,
}

impl SessionFiles {
    pub fn new<Tz>(dir: &Path, started_at: &DateTime<Tz>) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        Self {
            dir: dir.to_path_buf(),
            stem: started_at.format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn master(&self) -> PathBuf {
        self.dir.join(format!("{}.ts", self.stem))
    }

    pub fn artifact(&self, index: u64) -> PathBuf {
        self.dir.join(format!("{}~{}.ts", self.stem, index))
    }

    fn artifact_temp(&self, index: u64) -> PathBuf {
        self.dir.join(format!("{}~{}.ts.tmp", self.stem, index))
    }

    pub async fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir).await
    }

    pub async fn create_master(&self) -> io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.master())
            .await
    }

    /// Persist a segment body. It only becomes visible under its final name
    /// once fully written.
    pub async fn stage(&self, index: u64, body: &[u8]) -> io::Result<()> {
        let temp_path = self.artifact_temp(index);
        fs::write(&temp_path, body).await?;
        fs::rename(temp_path, self.artifact(index)).await
    }

    pub async fn read(&self, index: u64) -> Result<Vec<u8>, StagingError> {
        match fs::read(self.artifact(index)).await {
            Ok(body) => Ok(body),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StagingError::Missing(index)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn discard(&self, index: u64) -> io::Result<()> {
        fs::remove_file(self.artifact(index)).await
    }

    /// Remove every staged artifact of this session, partial ones included.
    /// Returns the number of files removed.
    pub async fn sweep_staged(&self) -> io::Result<usize> {
        let prefix = format!("{}~", self.stem);
        let mut removed = 0;

        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }

        Ok(removed)
    }
}
