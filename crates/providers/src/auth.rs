//! Versioned JSON credential store.
//!
//! Lives at `<data_dir>/auth.json`: per-provider API keys and/or OAuth
//! token blobs with a last-updated timestamp. Written atomically via a
//! temp file rename.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sb_domain::error::{Error, Result};

const AUTH_STORE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthFile {
    version: u32,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    providers: HashMap<String, ProviderCredentials>,
}

impl Default for AuthFile {
    fn default() -> Self {
        Self {
            version: AUTH_STORE_VERSION,
            updated_at: Utc::now(),
            providers: HashMap::new(),
        }
    }
}

pub struct AuthStore {
    path: PathBuf,
    state: RwLock<AuthFile>,
}

impl AuthStore {
    /// Load or create the store at `data_dir/auth.json`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir).map_err(Error::Io)?;
        let path = data_dir.join("auth.json");
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "auth store unreadable, starting fresh");
                AuthFile::default()
            })
        } else {
            AuthFile::default()
        };
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    pub fn get(&self, provider_id: &str) -> Option<ProviderCredentials> {
        self.state.read().providers.get(provider_id).cloned()
    }

    pub fn set(&self, provider_id: &str, credentials: ProviderCredentials) -> Result<()> {
        {
            let mut state = self.state.write();
            state
                .providers
                .insert(provider_id.to_owned(), credentials);
            state.updated_at = Utc::now();
        }
        self.flush()
    }

    pub fn remove(&self, provider_id: &str) -> Result<()> {
        {
            let mut state = self.state.write();
            state.providers.remove(provider_id);
            state.updated_at = Utc::now();
        }
        self.flush()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.state.read().updated_at
    }

    fn flush(&self) -> Result<()> {
        let json = {
            let state = self.state.read();
            serde_json::to_string_pretty(&*state)?
        };
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &json).map_err(Error::Io)?;
        std::fs::rename(&tmp, &self.path).map_err(Error::Io)?;
        Ok(())
    }
}
