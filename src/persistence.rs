use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::bail;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::fs;
use tracing::trace;

/// Keeps the sender's last used sequence number across restarts. Receiver state is
///  deliberately not persisted: a restarted receiver accepts whatever sequence number comes next.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SequenceStore: Send + Sync + 'static {
    /// `None` if no sequence number was saved yet
    async fn load(&self) -> anyhow::Result<Option<u32>>;

    async fn save(&self, last_sent_seq: u32) -> anyhow::Result<()>;
}

/// Persists nothing, i.e. every process start begins at sequence number 1
pub struct NoSequenceStore;

#[async_trait]
impl SequenceStore for NoSequenceStore {
    async fn load(&self) -> anyhow::Result<Option<u32>> {
        Ok(None)
    }

    async fn save(&self, _last_sent_seq: u32) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Stores the sequence number as 4 bytes (BE) in a file. Writes go to a sibling temp file which
///  is then renamed over the target, so a crash never leaves a partially written file behind.
pub struct FileSequenceStore {
    path: PathBuf,
}

impl FileSequenceStore {
    pub fn new(path: impl Into<PathBuf>) -> FileSequenceStore {
        FileSequenceStore {
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut file_name = self.path.file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        file_name.push(".tmp");
        self.path.with_file_name(file_name)
    }
}

#[async_trait]
impl SequenceStore for FileSequenceStore {
    async fn load(&self) -> anyhow::Result<Option<u32>> {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                trace!("no sequence file at {:?}", self.path);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let Ok(raw) = <[u8; 4]>::try_from(raw.as_slice()) else {
            bail!("sequence file {:?} has {} bytes, expected 4", self.path, raw.len());
        };
        Ok(Some(u32::from_be_bytes(raw)))
    }

    async fn save(&self, last_sent_seq: u32) -> anyhow::Result<()> {
        let temp_path = self.temp_path();
        fs::write(&temp_path, last_sent_seq.to_be_bytes()).await?;
        fs::rename(&temp_path, &self.path).await?;
        trace!("saved sequence number {} to {:?}", last_sent_seq, self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("arq-link-{}-{}", std::process::id(), name))
    }

    #[tokio::test]
    async fn test_file_store_missing_file() {
        let store = FileSequenceStore::new(test_path("missing"));
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_save_and_load() {
        let store = FileSequenceStore::new(test_path("save-load"));

        store.save(17).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(17));

        store.save(u32::MAX).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(u32::MAX));
        assert_eq!(std::fs::read(store.path()).unwrap(), vec![255, 255, 255, 255]);
        assert!(!store.temp_path().exists());

        std::fs::remove_file(store.path()).unwrap();
    }

    #[tokio::test]
    async fn test_file_store_corrupt_file() {
        let store = FileSequenceStore::new(test_path("corrupt"));
        std::fs::write(store.path(), [1, 2, 3]).unwrap();

        assert!(store.load().await.is_err());

        std::fs::remove_file(store.path()).unwrap();
    }

    #[tokio::test]
    async fn test_no_store() {
        NoSequenceStore.save(5).await.unwrap();
        assert_eq!(NoSequenceStore.load().await.unwrap(), None);
    }
}
