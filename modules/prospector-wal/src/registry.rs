use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;

use prospector_common::keys::ENTITY_DIR;
use prospector_common::tasks::sanitize_id;

/// Which entities this node already knows. Replicated updates for unknown
/// entities are dropped.
#[async_trait]
pub trait EntityRegistry: Send + Sync {
    async fn contains(&self, entity: &str) -> bool;

    /// Record that this node now holds `entity`. Idempotent.
    async fn register(&self, entity: &str) -> std::io::Result<()>;
}

/// Entities are directories under `{data_root}/companies/`.
pub struct DirectoryRegistry {
    root: PathBuf,
}

impl DirectoryRegistry {
    pub fn new(data_root: &Path) -> Self {
        Self {
            root: data_root.join(ENTITY_DIR),
        }
    }
}

#[async_trait]
impl EntityRegistry for DirectoryRegistry {
    async fn contains(&self, entity: &str) -> bool {
        tokio::fs::try_exists(self.root.join(sanitize_id(entity)))
            .await
            .unwrap_or(false)
    }

    async fn register(&self, entity: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(self.root.join(sanitize_id(entity))).await
    }
}

/// Fixed in-memory set.
#[derive(Default)]
pub struct StaticRegistry {
    known: RwLock<HashSet<String>>,
}

impl StaticRegistry {
    pub fn new<I, S>(entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: RwLock::new(entities.into_iter().map(Into::into).collect()),
        }
    }

    pub fn insert(&self, entity: &str) {
        if let Ok(mut known) = self.known.write() {
            known.insert(entity.to_string());
        }
    }
}

#[async_trait]
impl EntityRegistry for StaticRegistry {
    async fn contains(&self, entity: &str) -> bool {
        self.known
            .read()
            .map(|k| k.contains(entity))
            .unwrap_or(false)
    }

    async fn register(&self, entity: &str) -> std::io::Result<()> {
        self.insert(entity);
        Ok(())
    }
}
