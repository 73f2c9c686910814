// Persisted session state: identity, bearer token, and the last room the
// user was in. Survives restarts; cleared on logout. The store is passive —
// tearing down channels and cached lists on clear() is the controller's job.

use anyhow::{anyhow, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Read;
use std::path::PathBuf;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StoredSession {
    pub username: String,
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_room: Option<String>,
    #[serde(default)]
    pub joined: bool,
}

impl StoredSession {
    pub fn new(username: &str, token: &str) -> Self {
        StoredSession {
            username: username.to_string(),
            token: token.to_string(),
            last_room: None,
            joined: false,
        }
    }
}

pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Store under the platform config directory, created if missing.
    pub fn open_default() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?
            .join("parley");

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)?;
        }

        Ok(CredentialStore {
            path: config_dir.join("session.json"),
        })
    }

    /// Store backed by an explicit file, used by tests.
    pub fn at(path: PathBuf) -> Self {
        CredentialStore { path }
    }

    pub fn load(&self) -> Result<Option<StoredSession>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&self.path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let session: StoredSession = serde_json::from_str(&contents)?;
        info!(
            "Loaded stored session for {} from {}",
            session.username,
            self.path.display()
        );

        Ok(Some(session))
    }

    pub fn save(&self, session: &StoredSession) -> Result<()> {
        let file = File::create(&self.path)?;
        serde_json::to_writer_pretty(file, session)?;

        info!("Session saved for {}", session.username);
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
            info!("Stored session cleared");
        }
        Ok(())
    }
}
