use std::collections::HashMap;
use std::sync::Arc;

use futures::TryStreamExt;
use tokio::sync::Mutex;

use crate::opendal::Operator;

/// Manager exposes the two persistent namespaces of the service, both keyed
/// by canonical id: the info namespace holds small descriptor records, the
/// data namespace holds opaque sketch state blobs.
///
/// A successful save is visible to subsequent loads across process restarts.
/// Atomicity across the two namespaces is not guaranteed.
pub struct Manager {
    info: Operator,
    data: Operator,
}

impl Manager {
    /// open prepares both namespaces, creating the backing directories when
    /// missing.
    pub async fn open(info_dir: &str, data_dir: &str) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(info_dir).await?;
        tokio::fs::create_dir_all(data_dir).await?;

        Ok(Self {
            info: crate::operator(info_dir)?,
            data: crate::operator(data_dir)?,
        })
    }

    /// save_info creates or overwrites the descriptor record for id.
    pub async fn save_info(&self, id: &str, data: &[u8]) -> anyhow::Result<()> {
        self.info.write(id, data.to_vec()).await?;
        Ok(())
    }

    /// load_all_info reads every descriptor record in the info namespace.
    pub async fn load_all_info(&self) -> anyhow::Result<HashMap<String, Vec<u8>>> {
        let mut infos = HashMap::new();

        let mut lister = self.info.lister("/").await?;
        while let Some(entry) = lister.try_next().await? {
            if entry.path().ends_with('/') {
                continue;
            }
            let data = self.info.read(entry.path()).await?;
            infos.insert(entry.name().to_string(), data);
        }

        Ok(infos)
    }

    pub async fn delete_info(&self, id: &str) -> anyhow::Result<()> {
        self.info.delete(id).await?;
        Ok(())
    }

    /// save_data writes the full state blob for id.
    pub async fn save_data(&self, id: &str, data: &[u8]) -> anyhow::Result<()> {
        self.data.write(id, data.to_vec()).await?;
        Ok(())
    }

    /// load_data reads length bytes of the state blob for id starting at
    /// offset; length 0 means through the end of the blob.
    pub async fn load_data(&self, id: &str, offset: u64, length: u64) -> anyhow::Result<Vec<u8>> {
        let data = if offset == 0 && length == 0 {
            self.data.read(id).await?
        } else if length == 0 {
            self.data.read_with(id).range(offset..).await?
        } else {
            self.data.read_with(id).range(offset..offset + length).await?
        };
        Ok(data)
    }

    pub async fn delete_data(&self, id: &str) -> anyhow::Result<()> {
        self.data.delete(id).await?;
        Ok(())
    }
}

lazy_static! {
    static ref MANAGER: Mutex<Option<Arc<Manager>>> = Mutex::new(None);
}

/// get returns the process-wide storage manager, opening the configured
/// namespaces on first call.
pub async fn get() -> anyhow::Result<Arc<Manager>> {
    let mut guard = MANAGER.lock().await;
    if guard.is_none() {
        let settings = sketchd_common::config::get()?;
        let manager = Manager::open(&settings.info_dir, &settings.data_dir).await?;
        *guard = Some(Arc::new(manager));
    }
    Ok(guard.as_ref().unwrap().clone())
}

/// destroy drops the process-wide storage manager. For tests.
pub async fn destroy() {
    *MANAGER.lock().await = None;
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn scratch_manager() -> anyhow::Result<(tempfile::TempDir, Manager)> {
        let dir = tempfile::tempdir()?;
        let info_dir = dir.path().join("info").display().to_string();
        let data_dir = dir.path().join("data").display().to_string();
        let manager = Manager::open(&info_dir, &data_dir).await?;
        Ok((dir, manager))
    }

    #[tokio::test]
    async fn test_info_round_trip() -> anyhow::Result<()> {
        let (_dir, manager) = scratch_manager().await?;

        manager.save_info("marvel.cardinality", b"{\"id\":1}").await?;
        manager.save_info("x-force.frequency", b"{\"id\":2}").await?;

        let infos = manager.load_all_info().await?;
        assert_eq!(infos.len(), 2);
        assert_eq!(infos["marvel.cardinality"], b"{\"id\":1}".to_vec());
        assert_eq!(infos["x-force.frequency"], b"{\"id\":2}".to_vec());

        manager.delete_info("marvel.cardinality").await?;
        let infos = manager.load_all_info().await?;
        assert_eq!(infos.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_info_overwrite() -> anyhow::Result<()> {
        let (_dir, manager) = scratch_manager().await?;

        manager.save_info("marvel.cardinality", b"old").await?;
        manager.save_info("marvel.cardinality", b"new").await?;

        let infos = manager.load_all_info().await?;
        assert_eq!(infos["marvel.cardinality"], b"new".to_vec());
        Ok(())
    }

    #[tokio::test]
    async fn test_data_round_trip() -> anyhow::Result<()> {
        let (_dir, manager) = scratch_manager().await?;

        manager.save_data("marvel.cardinality", &[1, 2, 3, 4, 5]).await?;

        let all = manager.load_data("marvel.cardinality", 0, 0).await?;
        assert_eq!(all, vec![1, 2, 3, 4, 5]);

        let middle = manager.load_data("marvel.cardinality", 1, 3).await?;
        assert_eq!(middle, vec![2, 3, 4]);

        let tail = manager.load_data("marvel.cardinality", 3, 0).await?;
        assert_eq!(tail, vec![4, 5]);

        manager.delete_data("marvel.cardinality").await?;
        assert!(manager.load_data("marvel.cardinality", 0, 0).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_load_missing_data_errors() -> anyhow::Result<()> {
        let (_dir, manager) = scratch_manager().await?;
        assert!(manager.load_data("ghost.cardinality", 0, 0).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_namespaces() -> anyhow::Result<()> {
        let (_dir, manager) = scratch_manager().await?;
        assert!(manager.load_all_info().await?.is_empty());
        Ok(())
    }
}
