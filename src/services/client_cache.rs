//! Long-lived provider client, rebuilt only when the configuration changes.

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{
    models::StorageConfig,
    store::{ClientFactory, ObjectStoreClient, StoreResult},
};

struct CachedClient {
    config: StorageConfig,
    client: Arc<dyn ObjectStoreClient>,
}

pub struct ClientCache {
    factory: Arc<dyn ClientFactory>,
    current: RwLock<Option<CachedClient>>,
}

impl ClientCache {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            current: RwLock::new(None),
        }
    }

    /// Client for `config`, reusing the cached one while the config is unchanged.
    pub async fn client_for(&self, config: &StorageConfig) -> StoreResult<Arc<dyn ObjectStoreClient>> {
        if let Some(cached) = self.current.read().await.as_ref() {
            if cached.config == *config {
                return Ok(cached.client.clone());
            }
        }

        let mut slot = self.current.write().await;
        // Another task may have rebuilt it while we waited for the write lock.
        if let Some(cached) = slot.as_ref() {
            if cached.config == *config {
                return Ok(cached.client.clone());
            }
        }

        let client = self.factory.build(config)?;
        debug!(bucket = %config.bucket_name, region = %config.region, "built object store client");
        *slot = Some(CachedClient {
            config: config.clone(),
            client: client.clone(),
        });
        Ok(client)
    }

    pub async fn invalidate(&self) {
        *self.current.write().await = None;
    }
}
