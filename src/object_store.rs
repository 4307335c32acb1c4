use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::Environment;

/// Object storage for offloaded payloads.
///
/// Uploads are not rolled back when a later pipeline step fails; paths are
/// keyed by run friendly id so a retried request with a fresh id never
/// overwrites an earlier upload.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `path`, scoped to the environment.
    async fn upload(
        &self,
        environment: &Environment,
        path: &str,
        body: String,
        content_type: &str,
    ) -> anyhow::Result<()>;
}

/// A stored object, as kept by [`InMemoryObjectStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub environment_id: String,
    pub body: String,
    pub content_type: String,
}

/// Map-backed store for tests and local development.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<HashMap<String, StoredObject>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a stored object by path.
    pub fn get(&self, path: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(path)
            .cloned()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn upload(
        &self,
        environment: &Environment,
        path: &str,
        body: String,
        content_type: &str,
    ) -> anyhow::Result<()> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(
                path.to_string(),
                StoredObject {
                    environment_id: environment.id.clone(),
                    body,
                    content_type: content_type.to_string(),
                },
            );
        Ok(())
    }
}
