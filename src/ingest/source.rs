use std::{
    io::SeekFrom,
    path::{Path, PathBuf},
};

use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::{SyncError, SyncResult};

/// Read access to the watched telemetry file. Every call opens the file
/// afresh so a replaced file is picked up without bookkeeping.
#[derive(Debug, Clone)]
pub struct SourceFile {
    path: PathBuf,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn size(&self) -> SyncResult<u64> {
        tokio::fs::metadata(&self.path)
            .await
            .map(|meta| meta.len())
            .map_err(|err| SyncError::source_unavailable(&self.path, err))
    }

    pub async fn read_all(&self) -> SyncResult<String> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|err| SyncError::source_unavailable(&self.path, err))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Reads up to `len` bytes starting at `offset`. Fewer bytes come back if
    /// the file shrank in between.
    pub async fn read_range(&self, offset: u64, len: u64) -> SyncResult<Vec<u8>> {
        let unavailable = |err: std::io::Error| SyncError::source_unavailable(&self.path, err);

        let mut file = tokio::fs::File::open(&self.path).await.map_err(unavailable)?;
        file.seek(SeekFrom::Start(offset)).await.map_err(unavailable)?;

        let mut buffer = Vec::with_capacity(len as usize);
        file.take(len)
            .read_to_end(&mut buffer)
            .await
            .map_err(unavailable)?;
        Ok(buffer)
    }
}
