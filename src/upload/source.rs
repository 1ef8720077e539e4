use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Random-access payload. Retries re-read the same range, so reads must be
/// repeatable.
#[async_trait]
pub trait ChunkSource: Send {
    fn total_bytes(&self) -> u64;

    async fn read_at(&mut self, offset: u64, len: usize) -> std::io::Result<Vec<u8>>;
}

/// File on local disk, read range by range so only one chunk is in memory.
#[derive(Debug)]
pub struct FileSource {
    file: File,
    path: PathBuf,
    total_bytes: u64,
}

impl FileSource {
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path).await?;
        let total_bytes = file.metadata().await?.len();
        Ok(Self {
            file,
            path: path.to_path_buf(),
            total_bytes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ChunkSource for FileSource {
    fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    async fn read_at(&mut self, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len];
        self.file.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

/// In-memory payload, for callers that already hold the bytes.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

#[async_trait]
impl ChunkSource for MemorySource {
    fn total_bytes(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_at(&mut self, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
        let start = usize::try_from(offset).map_err(std::io::Error::other)?;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("range {start}+{len} past end of {} bytes", self.data.len()),
                )
            })?;
        Ok(self.data[start..end].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_file_source_reads_ranges() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"AABBCCDDEE").unwrap();
        let mut src = FileSource::open(tmp.path()).await.unwrap();
        assert_eq!(src.total_bytes(), 10);
        assert_eq!(src.read_at(4, 4).await.unwrap(), b"CCDD");
        // Re-reading a range returns the same bytes
        assert_eq!(src.read_at(4, 4).await.unwrap(), b"CCDD");
        assert_eq!(src.read_at(8, 2).await.unwrap(), b"EE");
    }

    #[tokio::test]
    async fn test_file_source_short_read_is_error() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"abc").unwrap();
        let mut src = FileSource::open(tmp.path()).await.unwrap();
        let err = src.read_at(2, 4).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_memory_source_bounds() {
        let mut src = MemorySource::new(b"0123456789".to_vec());
        assert_eq!(src.read_at(6, 4).await.unwrap(), b"6789");
        assert!(src.read_at(8, 4).await.is_err());
    }
}
