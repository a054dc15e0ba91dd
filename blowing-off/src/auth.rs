//! Bearer token storage for the client transport (§6.1 external
//! collaborator boundary), grounded on
//! `original_source/blowing-off/tests/unit/test_auth_sync.py`'s
//! `AuthManager` shape: a token, its expiry, role and permissions,
//! persisted to a JSON file on disk. QR enrollment and interactive
//! login flows stay out of scope per the Non-goals; only the minimal
//! token-file interface the transport needs is implemented here.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    token: String,
    expires: chrono::DateTime<chrono::Utc>,
    role: String,
    permissions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AuthManager {
    server_url: String,
    token_file: PathBuf,
    token: Option<String>,
    token_expires: Option<chrono::DateTime<chrono::Utc>>,
    role: Option<String>,
    permissions: Vec<String>,
}

impl AuthManager {
    pub fn new(server_url: &str, token_file: Option<PathBuf>) -> Self {
        let token_file = token_file.unwrap_or_else(default_token_file);
        if let Some(parent) = token_file.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let mut manager = Self {
            server_url: server_url.trim_end_matches('/').to_string(),
            token_file,
            token: None,
            token_expires: None,
            role: None,
            permissions: Vec::new(),
        };
        manager.load();
        manager
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn token_file(&self) -> &Path {
        &self.token_file
    }

    /// Current token if present and not expired, per `test_load_expired_token`.
    pub fn token(&self) -> Option<&str> {
        match self.token_expires {
            Some(expires) if expires <= chrono::Utc::now() => None,
            _ => self.token.as_deref(),
        }
    }

    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    pub fn permissions(&self) -> &[String] {
        &self.permissions
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    fn load(&mut self) {
        let Ok(contents) = std::fs::read_to_string(&self.token_file) else { return };
        let Ok(stored) = serde_json::from_str::<StoredToken>(&contents) else { return };
        if stored.expires <= chrono::Utc::now() {
            return;
        }
        self.token = Some(stored.token);
        self.token_expires = Some(stored.expires);
        self.role = Some(stored.role);
        self.permissions = stored.permissions;
    }

    /// Persists a freshly obtained token to disk so it survives restarts.
    pub fn store(&mut self, token: String, expires: chrono::DateTime<chrono::Utc>, role: String, permissions: Vec<String>) -> std::io::Result<()> {
        let stored = StoredToken { token: token.clone(), expires, role: role.clone(), permissions: permissions.clone() };
        std::fs::write(&self.token_file, serde_json::to_string_pretty(&stored).unwrap())?;
        self.token = Some(token);
        self.token_expires = Some(expires);
        self.role = Some(role);
        self.permissions = permissions;
        Ok(())
    }

    pub fn clear(&mut self) -> std::io::Result<()> {
        self.token = None;
        self.token_expires = None;
        self.role = None;
        self.permissions = Vec::new();
        if self.token_file.exists() {
            std::fs::remove_file(&self.token_file)?;
        }
        Ok(())
    }
}

fn default_token_file() -> PathBuf {
    dirs_home().join(".blowing-off").join("token.json")
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."))
}
