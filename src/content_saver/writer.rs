//! Atomic, hashed file output
//!
//! `StagedWriter` is the tail of the asset stream: optional brotli
//! compression, then size accounting and hashing, then a temp file in the
//! destination directory. Nothing appears at the destination path until
//! `finish` persists the temp file; dropping the writer earlier removes it.

use brotli::CompressorWriter;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::crawl_engine::crawl_types::{ReplicaError, ReplicaResult};
use crate::manifest::{integrity_from_digest, integrity_of};

const BROTLI_BUFFER: usize = 4096;
const BROTLI_QUALITY: u32 = 11;
const BROTLI_WINDOW: u32 = 22;

/// Size and integrity of a persisted file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFile {
    pub path: PathBuf,
    pub size: u64,
    pub integrity: String,
}

pub struct StagedWriter {
    url: String,
    destination: PathBuf,
    temp: NamedTempFile,
    compressor: Option<CompressorWriter<Vec<u8>>>,
    hasher: Sha256,
    written: u64,
    limit: u64,
}

impl StagedWriter {
    /// Open a temp file next to `destination`, creating parent directories
    pub fn create(url: &str, destination: &Path, compress: bool, limit: u64) -> ReplicaResult<Self> {
        let parent = destination
            .parent()
            .ok_or_else(|| ReplicaError::PathTraversal(destination.display().to_string()))?;
        std::fs::create_dir_all(parent)?;

        Ok(Self {
            url: url.to_string(),
            destination: destination.to_path_buf(),
            temp: NamedTempFile::new_in(parent)?,
            compressor: compress.then(|| {
                CompressorWriter::new(Vec::new(), BROTLI_BUFFER, BROTLI_QUALITY, BROTLI_WINDOW)
            }),
            hasher: Sha256::new(),
            written: 0,
            limit,
        })
    }

    /// Feed transformed bytes into the compression stage (if any) and on
    pub fn write_chunk(&mut self, chunk: &[u8]) -> ReplicaResult<()> {
        match self.compressor.as_mut() {
            Some(compressor) => {
                compressor.write_all(chunk)?;
                let ready = std::mem::take(compressor.get_mut());
                self.account(&ready)
            }
            None => self.account(chunk),
        }
    }

    /// Bytes that reached the file so far
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written
    }

    fn account(&mut self, bytes: &[u8]) -> ReplicaResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.written += bytes.len() as u64;
        if self.written > self.limit {
            return Err(ReplicaError::MaxSizeExceeded {
                url: self.url.clone(),
                limit: self.limit,
            });
        }
        self.hasher.update(bytes);
        self.temp.write_all(bytes)?;
        Ok(())
    }

    /// Flush the compressor, sync, and move the file into place
    pub fn finish(mut self) -> ReplicaResult<WrittenFile> {
        if let Some(compressor) = self.compressor.take() {
            let tail = compressor.into_inner();
            self.account(&tail)?;
        }
        self.temp.as_file().sync_all()?;
        self.temp
            .persist(&self.destination)
            .map_err(|e| ReplicaError::Io(e.error))?;

        Ok(WrittenFile {
            path: self.destination,
            size: self.written,
            integrity: integrity_from_digest(self.hasher),
        })
    }
}

/// Write a complete buffer atomically and return its integrity token
pub fn write_atomic(destination: &Path, bytes: &[u8]) -> ReplicaResult<String> {
    let parent = destination
        .parent()
        .ok_or_else(|| ReplicaError::PathTraversal(destination.display().to_string()))?;
    std::fs::create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(destination).map_err(|e| ReplicaError::Io(e.error))?;
    Ok(integrity_of(bytes))
}
