use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;

/// Transcripts of this size or smaller are dropped as noise.
pub const MIN_MESSAGE_SIZE: u64 = 50;

/// Per-connection capture file. Deleted when dropped.
pub struct Spool {
    file: NamedTempFile,
    len: u64,
}

impl Spool {
    pub fn create(dir: &Path) -> Result<Self> {
        let file = tempfile::Builder::new()
            .prefix("smtp-sink-")
            .tempfile_in(dir)
            .with_context(|| format!("Failed to create spool file in {:?}", dir))?;
        Ok(Self { file, len: 0 })
    }

    pub fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.write_all(bytes)?;
        self.len += bytes.len() as u64;
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Flushes to disk and reports the size actually stored.
    pub fn sync(&mut self) -> io::Result<u64> {
        self.file.flush()?;
        self.file.as_file().sync_all()?;
        Ok(self.file.as_file().metadata()?.len())
    }

    /// A fresh handle reading from the start of the capture.
    pub fn reader(&self) -> io::Result<File> {
        self.file.reopen()
    }
}

/// Metadata a persisted message is named after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub to: String,
    pub from: String,
    pub remote_ip: String,
    pub timestamp: i64,
}

impl Envelope {
    pub fn file_name(&self) -> String {
        format!(
            "{}--{}--{}--{}.txt",
            self.to, self.from, self.remote_ip, self.timestamp
        )
    }
}

/// The output directory that completed messages land in.
#[derive(Debug, Clone)]
pub struct MessageStore {
    dir: PathBuf,
}

impl MessageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create output directory: {:?}", self.dir))
    }

    /// Number of entries already in the output directory.
    pub fn count(&self) -> Result<usize> {
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list output directory: {:?}", self.dir))?;
        Ok(entries.filter_map(|e| e.ok()).count())
    }

    /// Copies `message` into a hidden temporary file next to its final name,
    /// syncs it, then renames it into place. A same-named file is replaced.
    pub fn finalize<R: Read>(&self, mut message: R, envelope: &Envelope) -> Result<PathBuf> {
        let path = self.dir.join(envelope.file_name());

        let mut tmp = tempfile::Builder::new()
            .prefix(".incoming-")
            .tempfile_in(&self.dir)
            .with_context(|| format!("Failed to create temporary file in {:?}", self.dir))?;
        io::copy(&mut message, &mut tmp).context("Failed to copy message")?;
        tmp.as_file().sync_all().context("Failed to sync message")?;
        tmp.persist(&path)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to persist message: {:?}", path))?;

        Ok(path)
    }
}
