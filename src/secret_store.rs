// =============================================================================
// Secret store (§6.3)
// =============================================================================
//
// The engine never embeds credentials in config files or logs. This
// trait is the seam between the OAuth session manager and wherever
// consumer key/secret, access token, and access-token-secret actually
// live. `FileSecretStore` is the dev/test backend, reading from a
// gitignored JSON file; production deployments are expected to supply
// their own implementation (a vault client, an env-injected secret
// mount, ...) — that backend is an external collaborator, out of scope
// for this crate.
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::RwLock;

/// The OAuth 1.0a credential set for one environment (sandbox or live).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_token_secret: String,
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn load(&self) -> Result<Credentials>;
    async fn save(&self, credentials: &Credentials) -> Result<()>;
}

/// Reads and writes credentials to a single JSON file on disk, using the
/// same atomic write-tmp-then-rename pattern as the rest of the
/// persisted state in this codebase.
pub struct FileSecretStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl FileSecretStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: RwLock::new(()),
        }
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn load(&self) -> Result<Credentials> {
        let _guard = self.lock.read().await;
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading secret store {}", self.path.display()))?;
        serde_json::from_str(&raw).context("parsing secret store JSON")
    }

    async fn save(&self, credentials: &Credentials) -> Result<()> {
        let _guard = self.lock.write().await;
        let tmp_path = self.path.with_extension("json.tmp");
        let serialized = serde_json::to_string_pretty(credentials).context("serialising credentials")?;
        use std::io::Write as _;
        let mut file = std::fs::File::create(&tmp_path)
            .with_context(|| format!("creating {}", tmp_path.display()))?;
        file.write_all(serialized.as_bytes())
            .with_context(|| format!("writing {}", tmp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("fsyncing {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("renaming {} to {}", tmp_path.display(), self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip_save_and_load() {
        let dir = std::env::temp_dir().join(format!("ees-secret-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("credentials.json");
        let store = FileSecretStore::new(path.clone());
        let creds = Credentials {
            consumer_key: "ck".into(),
            consumer_secret: "cs".into(),
            access_token: "at".into(),
            access_token_secret: "ats".into(),
        };
        store.save(&creds).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.consumer_key, "ck");
        std::fs::remove_dir_all(&dir).ok();
    }
}
