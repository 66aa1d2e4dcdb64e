//! Storage seam for session segments

use async_trait::async_trait;
use std::io;
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Append-only segment storage
///
/// The session writer is the only caller and never issues concurrent calls
/// for the same path.
#[async_trait]
pub trait SegmentStore: Send + Sync {
    /// Create `dir` and any missing parents, owner-only
    async fn create_dir(&self, dir: &Path) -> io::Result<()>;

    /// Append `bytes` to `path`, creating it owner read/write if absent
    async fn append(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;

    /// Size of an existing segment, `None` when absent
    async fn size(&self, path: &Path) -> io::Result<Option<u64>>;
}

/// Local file system store
#[derive(Debug, Default, Clone, Copy)]
pub struct FsSegmentStore;

#[async_trait]
impl SegmentStore for FsSegmentStore {
    async fn create_dir(&self, dir: &Path) -> io::Result<()> {
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(0o700);
        builder.create(dir).await
    }

    async fn append(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut options = tokio::fs::OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options.open(path).await?;
        file.write_all(bytes).await?;
        file.flush().await
    }

    async fn size(&self, path: &Path) -> io::Result<Option<u64>> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}
