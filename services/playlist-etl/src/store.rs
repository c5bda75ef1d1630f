//!
//! src/store.rs  Andrew Belles  Oct 19th, 2026
//!
//! Object store interface the etl persists through, plus a directory
//! backed implementation. Keys are '/' separated and relative to the
//! store root, writes land whole or not at all
//!

use std::{fs, path::{Component, Path, PathBuf}, sync::Arc};

use async_trait::async_trait;

use crate::errors::EtlError;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Every key starting with `prefix`, sorted
    async fn list(&self, prefix: &str) -> Result<Vec<String>, EtlError>;
    async fn read(&self, key: &str) -> Result<Vec<u8>, EtlError>;
    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), EtlError>;
    async fn copy(&self, src_key: &str, dst_key: &str) -> Result<(), EtlError>;
    async fn delete(&self, key: &str) -> Result<(), EtlError>;

    async fn exists(&self, key: &str) -> Result<bool, EtlError> {
        Ok(self.list(key).await?.iter().any(|k| k == key))
    }
}

pub struct DiskObjectStore {
    root: PathBuf
}

impl DiskObjectStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    fn path_for(root: &Path, key: &str) -> Result<PathBuf, EtlError> {
        let rel = Path::new(key);
        let clean = !key.is_empty() && rel.components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(EtlError::Storage(format!("invalid object key: {key:?}")));
        }
        Ok(root.join(rel))
    }

    fn key_for(root: &Path, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(root).ok()?;
        let parts: Option<Vec<&str>> = rel.components()
            .map(|c| match c {
                Component::Normal(s) => s.to_str(),
                _ => None
            })
            .collect();
        Some(parts?.join("/"))
    }

    fn list_blocking(root: &Path, prefix: &str) -> Result<Vec<String>, EtlError> {
        let mut keys = Vec::new();
        if !root.exists() {
            return Ok(keys);
        }

        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let entries = fs::read_dir(&dir).map_err(|e| EtlError::Storage(
                format!("read dir {}: {e}", dir.display())
            ))?;
            for entry in entries {
                let path = entry?.path();
                if path.is_dir() {
                    pending.push(path);
                } else if let Some(key) = Self::key_for(root, &path) {
                    // in-flight temp files are never visible as objects
                    if key.starts_with(prefix) && !Self::is_temp(&path) {
                        keys.push(key);
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn is_temp(path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(".tmp"))
    }

    fn write_blocking(path: &Path, bytes: &[u8]) -> Result<(), EtlError> {
        let parent = path.parent().ok_or_else(|| EtlError::Storage(
            format!("no parent for {}", path.display())
        ))?;
        fs::create_dir_all(parent).map_err(|e| EtlError::Storage(
            format!("create dir {}: {e}", parent.display())
        ))?;

        let mut temp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| EtlError::Storage(
                format!("tempfile in {}: {e}", parent.display())
            ))?;
        std::io::Write::write_all(&mut temp, bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| EtlError::Storage(
            format!("persist {}: {e}", path.display())
        ))?;
        Ok(())
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, EtlError>
    where
        T: Send + 'static,
        F: FnOnce(PathBuf) -> Result<T, EtlError> + Send + 'static,
    {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || f(root)).await?
    }
}

#[async_trait]
impl ObjectStore for DiskObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, EtlError> {
        let prefix = prefix.to_string();
        self.blocking(move |root| Self::list_blocking(&root, &prefix)).await
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, EtlError> {
        let key = key.to_string();
        self.blocking(move |root| {
            let path = Self::path_for(&root, &key)?;
            fs::read(&path).map_err(|e| EtlError::Storage(
                format!("read {key}: {e}")
            ))
        }).await
    }

    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), EtlError> {
        let key = key.to_string();
        self.blocking(move |root| {
            let path = Self::path_for(&root, &key)?;
            Self::write_blocking(&path, &bytes)
        }).await
    }

    async fn copy(&self, src_key: &str, dst_key: &str) -> Result<(), EtlError> {
        let (src_key, dst_key) = (src_key.to_string(), dst_key.to_string());
        self.blocking(move |root| {
            let src = Self::path_for(&root, &src_key)?;
            let dst = Self::path_for(&root, &dst_key)?;
            let bytes = fs::read(&src).map_err(|e| EtlError::Storage(
                format!("copy source {src_key}: {e}")
            ))?;
            Self::write_blocking(&dst, &bytes)
        }).await
    }

    async fn delete(&self, key: &str) -> Result<(), EtlError> {
        let key = key.to_string();
        self.blocking(move |root| {
            let path = Self::path_for(&root, &key)?;
            fs::remove_file(&path).map_err(|e| EtlError::Storage(
                format!("delete {key}: {e}")
            ))
        }).await
    }

    async fn exists(&self, key: &str) -> Result<bool, EtlError> {
        let key = key.to_string();
        self.blocking(move |root| Ok(Self::path_for(&root, &key)?.is_file())).await
    }
}

pub type SharedStore = Arc<dyn ObjectStore>;


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disk_store_write_list_copy_delete() -> Result<(), EtlError> {
        let dir = tempfile::TempDir::new()?;
        let store = DiskObjectStore::new(dir.path());

        store.write("raw/a/one.json", b"1".to_vec()).await?;
        store.write("raw/b/two.json", b"2".to_vec()).await?;
        store.write("other/three.json", b"3".to_vec()).await?;

        assert_eq!(store.list("raw/").await?, vec!["raw/a/one.json", "raw/b/two.json"]);

        store.copy("raw/a/one.json", "done/one.json").await?;
        assert_eq!(store.read("done/one.json").await?, b"1");
        assert!(store.exists("raw/a/one.json").await?);

        store.delete("raw/a/one.json").await?;
        assert!(!store.exists("raw/a/one.json").await?);
        assert_eq!(store.list("raw/").await?, vec!["raw/b/two.json"]);
        Ok(())
    }

    #[tokio::test]
    async fn disk_store_overwrite_is_whole() -> Result<(), EtlError> {
        let dir = tempfile::TempDir::new()?;
        let store = DiskObjectStore::new(dir.path());

        store.write("t/x.csv", b"a much longer first version".to_vec()).await?;
        store.write("t/x.csv", b"short".to_vec()).await?;
        assert_eq!(store.read("t/x.csv").await?, b"short");
        assert_eq!(store.list("t/").await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn disk_store_rejects_escaping_keys() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = DiskObjectStore::new(dir.path());

        assert!(store.write("../escape.json", b"x".to_vec()).await.is_err());
        assert!(store.write("/abs.json", b"x".to_vec()).await.is_err());
        assert!(store.read("").await.is_err());
    }

    #[tokio::test]
    async fn disk_store_missing_root_lists_nothing() -> Result<(), EtlError> {
        let dir = tempfile::TempDir::new()?;
        let store = DiskObjectStore::new(dir.path().join("not-yet"));
        assert!(store.list("").await?.is_empty());
        Ok(())
    }
}
