use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, StorageError};
use crate::{validate_key, Object, ObjectMeta, Precondition, PutOutcome, Storage};

const LOCK_SUFFIX: &str = ".prospector-lock";
const TMP_SUFFIX: &str = ".prospector-tmp";

/// A lock file older than this belongs to a crashed writer.
const STALE_LOCK_AGE: Duration = Duration::from_secs(30);
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(10);
const LOCK_MAX_ATTEMPTS: u32 = 300;

/// Store rooted at a directory. Safe for several processes sharing the same
/// disk: create-if-absent uses an atomic hard link of a fully written temp
/// file, compare-and-swap holds a per-key lock file.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |p, seg| p.join(seg)))
    }

    async fn write_temp(&self, path: &Path, data: &[u8]) -> Result<PathBuf> {
        let parent = path
            .parent()
            .ok_or_else(|| StorageError::InvalidKey(path.display().to_string()))?;
        fs::create_dir_all(parent).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let tmp = parent.join(format!(".{name}.{}{TMP_SUFFIX}", Uuid::new_v4().simple()));
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        Ok(tmp)
    }

    async fn create_new(&self, path: &Path, data: &[u8]) -> Result<PutOutcome> {
        let tmp = self.write_temp(path, data).await?;
        let linked = fs::hard_link(&tmp, path).await;
        let _ = fs::remove_file(&tmp).await;
        match linked {
            Ok(()) => Ok(PutOutcome::Written {
                version: version_of(data),
            }),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(PutOutcome::PreconditionFailed),
            Err(e) => Err(e.into()),
        }
    }

    async fn replace(&self, path: &Path, data: &[u8]) -> Result<PutOutcome> {
        let tmp = self.write_temp(path, data).await?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(PutOutcome::Written {
            version: version_of(data),
        })
    }

    async fn compare_and_swap(&self, path: &Path, expected: &str, data: &[u8]) -> Result<PutOutcome> {
        let lock = lock_path(path);
        acquire_lock(&lock).await?;
        let outcome = async {
            match fs::read(path).await {
                Ok(current) if version_of(&current) == expected => self.replace(path, data).await,
                Ok(_) => Ok(PutOutcome::PreconditionFailed),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(PutOutcome::PreconditionFailed),
                Err(e) => Err(e.into()),
            }
        }
        .await;
        if let Err(e) = fs::remove_file(&lock).await {
            warn!(lock = %lock.display(), error = %e, "Failed to release key lock");
        }
        outcome
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        Some(parts.join("/"))
    }
}

/// Content hash used as the version token.
pub fn version_of(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn lock_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(LOCK_SUFFIX);
    PathBuf::from(s)
}

fn is_internal(name: &str) -> bool {
    name.ends_with(LOCK_SUFFIX) || name.ends_with(TMP_SUFFIX)
}

async fn acquire_lock(lock: &Path) -> Result<()> {
    for _ in 0..LOCK_MAX_ATTEMPTS {
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock)
            .await
        {
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if lock_is_stale(lock).await {
                    debug!(lock = %lock.display(), "Breaking stale key lock");
                    let _ = fs::remove_file(lock).await;
                    continue;
                }
                tokio::time::sleep(LOCK_RETRY_DELAY).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(StorageError::Busy(lock.display().to_string()))
}

async fn lock_is_stale(lock: &Path) -> bool {
    let Ok(meta) = fs::metadata(lock).await else {
        return false;
    };
    let Ok(modified) = meta.modified() else {
        return false;
    };
    SystemTime::now()
        .duration_since(modified)
        .map(|age| age > STALE_LOCK_AGE)
        .unwrap_or(false)
}

#[async_trait]
impl Storage for LocalStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn get(&self, key: &str) -> Result<Option<Object>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(Object {
                version: version_of(&data),
                data: Bytes::from(data),
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            // A directory where a file was expected reads as absent.
            Err(e) if path.is_dir() => {
                debug!(key, error = %e, "Key names a directory");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, data: Bytes, precondition: Precondition) -> Result<PutOutcome> {
        let path = self.path_for(key)?;
        match precondition {
            Precondition::None => self.replace(&path, &data).await,
            Precondition::DoesNotExist => self.create_new(&path, &data).await,
            Precondition::MatchesVersion(v) => self.compare_and_swap(&path, &v, &data).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        // Walk from the deepest directory the prefix names fully.
        let dir_part = match prefix.rfind('/') {
            Some(i) => &prefix[..i],
            None => "",
        };
        let start = if dir_part.is_empty() {
            self.root.clone()
        } else {
            self.path_for(dir_part)?
        };

        let mut out = Vec::new();
        let mut stack = vec![start];
        while let Some(dir) = stack.pop() {
            if !dir.is_dir() {
                continue;
            }
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().to_string();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push(entry.path());
                } else if !is_internal(&name) {
                    let Some(key) = self.key_for(&entry.path()) else {
                        continue;
                    };
                    if key.starts_with(prefix) {
                        let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                        out.push(ObjectMeta { key, size });
                    }
                }
            }
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }

    async fn prune(&self, prefix: &str) -> Result<usize> {
        let trimmed = prefix.trim_end_matches('/');
        let start = if trimmed.is_empty() {
            self.root.clone()
        } else {
            self.path_for(trimmed)?
        };
        if !start.is_dir() {
            return Ok(0);
        }

        // Collect directories depth-first, then remove children before parents.
        let mut dirs = Vec::new();
        let mut stack = vec![start.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_dir() {
                    stack.push(entry.path());
                }
            }
            dirs.push(dir);
        }

        let mut removed = 0;
        for dir in dirs.iter().rev() {
            if *dir == self.root {
                continue;
            }
            let mut entries = fs::read_dir(dir).await?;
            if entries.next_entry().await?.is_none() {
                match fs::remove_dir(dir).await {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => debug!(dir = %dir.display(), error = %e, "Could not prune directory"),
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_new_fails_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());

        let first = store
            .put("q/lease.json", Bytes::from_static(b"a"), Precondition::DoesNotExist)
            .await
            .unwrap();
        assert!(first.is_written());

        let second = store
            .put("q/lease.json", Bytes::from_static(b"b"), Precondition::DoesNotExist)
            .await
            .unwrap();
        assert_eq!(second, PutOutcome::PreconditionFailed);

        let obj = store.get("q/lease.json").await.unwrap().unwrap();
        assert_eq!(&obj.data[..], b"a");
    }

    #[tokio::test]
    async fn compare_and_swap_checks_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        store
            .put("k", Bytes::from_static(b"v1"), Precondition::None)
            .await
            .unwrap();
        let v1 = store.get("k").await.unwrap().unwrap().version;

        let stale = Precondition::MatchesVersion(version_of(b"other"));
        assert_eq!(
            store.put("k", Bytes::from_static(b"x"), stale).await.unwrap(),
            PutOutcome::PreconditionFailed
        );

        let ok = store
            .put("k", Bytes::from_static(b"v2"), Precondition::MatchesVersion(v1.clone()))
            .await
            .unwrap();
        assert!(ok.is_written());

        // The old version no longer matches.
        assert_eq!(
            store
                .put("k", Bytes::from_static(b"v3"), Precondition::MatchesVersion(v1))
                .await
                .unwrap(),
            PutOutcome::PreconditionFailed
        );
        assert!(!lock_path(&store.path_for("k").unwrap()).exists());
    }

    #[tokio::test]
    async fn list_hides_internal_files_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        for key in ["a/b/2.json", "a/b/1.json", "a/c.json", "z.json"] {
            store
                .put(key, Bytes::from_static(b"{}"), Precondition::None)
                .await
                .unwrap();
        }
        std::fs::write(dir.path().join("a/b/1.json.prospector-lock"), b"").unwrap();

        let keys: Vec<String> = store.list("a/").await.unwrap().into_iter().map(|m| m.key).collect();
        assert_eq!(keys, vec!["a/b/1.json", "a/b/2.json", "a/c.json"]);

        let keys: Vec<String> = store.list("a/b/1").await.unwrap().into_iter().map(|m| m.key).collect();
        assert_eq!(keys, vec!["a/b/1.json"]);

        assert!(store.list("missing/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_prune_removes_empty_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        store
            .put("x/y/z/file.usv", Bytes::from_static(b"row"), Precondition::None)
            .await
            .unwrap();
        store.delete("x/y/z/file.usv").await.unwrap();
        store.delete("x/y/z/file.usv").await.unwrap();

        let removed = store.prune("x/").await.unwrap();
        assert_eq!(removed, 3);
        assert!(!dir.path().join("x").exists());
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn stale_lock_is_broken() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        store
            .put("k", Bytes::from_static(b"v1"), Precondition::None)
            .await
            .unwrap();
        let lock = lock_path(&store.path_for("k").unwrap());
        let file = std::fs::File::create(&lock).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(120))
            .unwrap();
        drop(file);

        let v1 = version_of(b"v1");
        let outcome = store
            .put("k", Bytes::from_static(b"v2"), Precondition::MatchesVersion(v1))
            .await
            .unwrap();
        assert!(outcome.is_written());
    }
}
