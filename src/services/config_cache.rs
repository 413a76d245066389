use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Result;

/// Last-known connection settings, persisted for diagnostics only. Never
/// consulted for authorization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedConnection {
    pub url: String,
    /// First characters of the anon key; the key itself is never written.
    pub key_prefix: String,
    pub service_role_available: bool,
    pub saved_at: DateTime<Utc>,
}

const KEY_PREFIX_LEN: usize = 12;

impl CachedConnection {
    pub fn from_config(config: &Config) -> Self {
        Self {
            url: config.backend_url.clone(),
            key_prefix: config.anon_key.chars().take(KEY_PREFIX_LEN).collect(),
            service_role_available: config.service_role_key.is_some(),
            saved_at: Utc::now(),
        }
    }
}

pub fn save(path: impl AsRef<Path>, record: &CachedConnection) -> Result<()> {
    let path = path.as_ref();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, serde_json::to_vec_pretty(record)?)?;
    Ok(())
}

/// `None` when nothing was cached yet or the file is unreadable.
pub fn load(path: impl AsRef<Path>) -> Option<CachedConnection> {
    let bytes = std::fs::read(path.as_ref()).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!("Ignoring unreadable connection cache {}: {e}", path.as_ref().display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trips_through_its_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("connection.json");
        assert!(load(&path).is_none());

        let mut config = Config::local();
        config.anon_key = "eyJhbGciOiJIUzI1NiJ9.very-secret".into();
        let record = CachedConnection::from_config(&config);
        save(&path, &record).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded, record);
        assert_eq!(loaded.key_prefix, "eyJhbGciOiJI");
        assert!(!std::fs::read_to_string(&path).unwrap().contains("very-secret"));
    }

    #[test]
    fn corrupt_cache_is_ignored() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"{not json").unwrap();
        assert!(load(file.path()).is_none());
    }
}
