//! On-disk storefront cache keyed by the sha256 of the account's user
//! token, so raw credentials never touch disk. Populated on first
//! successful probe per account, loaded once at startup.

use std::collections::HashMap;
use std::path::PathBuf;

use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::warn;

pub struct StorefrontCache {
    path: PathBuf,
    entries: RwLock<HashMap<String, String>>,
}

fn hash_token(user_token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_token.as_bytes());
    hex::encode(hasher.finalize())
}

impl StorefrontCache {
    pub async fn load(path: PathBuf) -> Self {
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => HashMap::new(),
        };
        StorefrontCache {
            path,
            entries: RwLock::new(entries),
        }
    }

    pub async fn get(&self, user_token: &str) -> Option<String> {
        let key = hash_token(user_token);
        self.entries.read().await.get(&key).cloned()
    }

    pub async fn set(&self, user_token: &str, storefront_code: &str) {
        let key = hash_token(user_token);
        {
            let mut entries = self.entries.write().await;
            entries.insert(key, storefront_code.to_string());
        }
        self.persist().await;
    }

    async fn persist(&self) {
        let entries = self.entries.read().await;
        match serde_json::to_vec_pretty(&*entries) {
            Ok(bytes) => {
                if let Err(err) = tokio::fs::write(&self.path, bytes).await {
                    warn!(error = %err, "failed to persist storefront cache");
                }
            }
            Err(err) => warn!(error = %err, "failed to serialize storefront cache"),
        }
    }
}
