//! Where upload bytes come from.

use async_trait::async_trait;
use bytes::Bytes;
use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Random-access byte source for an upload. Chunks are re-read after a
/// resync, so implementations must be able to serve any range again.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Total size in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// MIME type sent with the chunks.
    fn content_type(&self) -> &str;

    /// Read exactly `range`.
    async fn read_range(&self, range: Range<u64>) -> std::io::Result<Bytes>;
}

/// A file on local disk.
pub struct FileSource {
    path: PathBuf,
    len: u64,
    content_type: String,
}

impl FileSource {
    /// Open `path`, recording its size up front.
    pub async fn open(path: impl AsRef<Path>, content_type: impl Into<String>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let len = tokio::fs::metadata(&path).await?.len();
        Ok(Self {
            path,
            len,
            content_type: content_type.into(),
        })
    }
}

#[async_trait]
impl MediaSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn content_type(&self) -> &str {
        &self.content_type
    }

    async fn read_range(&self, range: Range<u64>) -> std::io::Result<Bytes> {
        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(range.start)).await?;
        let mut buf = vec![0u8; (range.end - range.start) as usize];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

/// Bytes already in memory.
pub struct MemorySource {
    data: Bytes,
    content_type: String,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            content_type: content_type.into(),
        }
    }
}

#[async_trait]
impl MediaSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn content_type(&self) -> &str {
        &self.content_type
    }

    async fn read_range(&self, range: Range<u64>) -> std::io::Result<Bytes> {
        if range.end > self.len() || range.start > range.end {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("range {:?} outside {} bytes", range, self.len()),
            ));
        }
        Ok(self.data.slice(range.start as usize..range.end as usize))
    }
}
