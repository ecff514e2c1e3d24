//! File-backed credential storage.
//!
//! Per backend, three separately persisted blobs under
//! `<root>/<backend>/`:
//!
//! - `client_info.json`: dynamic-registration result
//! - `tokens.json`: access/refresh tokens plus expiry metadata
//! - `code_verifier.txt`: PKCE secret staged between redirect and callback
//!
//! Every write is an atomic replace (temp file + rename in the same
//! directory). The verifier is written before the redirect and consumed
//! exactly once during the callback.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::OAuthError;

const CLIENT_INFO_FILE: &str = "client_info.json";
const TOKENS_FILE: &str = "tokens.json";
const VERIFIER_FILE: &str = "code_verifier.txt";

/// Leeway subtracted from token lifetimes when judging expiry.
const EXPIRY_SKEW_SECS: u64 = 30;

/// Dynamic client registration result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Remaining registration fields, kept verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Persisted token set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds, as reported by the token endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    /// Unix seconds at which the set was obtained
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obtained_at: Option<u64>,
    /// Token endpoint the set came from, kept for refresh
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,
}

impl TokenSet {
    /// Stamp the acquisition time; called right after the exchange.
    pub fn stamped(mut self) -> Self {
        self.obtained_at = Some(unix_now());
        self
    }

    /// Whether the access token should be considered expired.
    pub fn is_expired(&self) -> bool {
        match (self.obtained_at, self.expires_in) {
            (Some(obtained), Some(lifetime)) => {
                unix_now() + EXPIRY_SKEW_SECS >= obtained + lifetime
            }
            // Without expiry metadata the token is assumed live.
            _ => false,
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Scope of an [`OAuthStore::invalidate`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidateScope {
    All,
    Client,
    Tokens,
    Verifier,
}

/// The broker's storage directory. The broker owns it exclusively.
#[derive(Debug, Clone)]
pub struct OAuthStore {
    root: PathBuf,
}

impl OAuthStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn backend_dir(&self, backend: &str) -> PathBuf {
        self.root.join(backend)
    }

    fn atomic_write(&self, path: &Path, bytes: &[u8]) -> Result<(), OAuthError> {
        let dir = path
            .parent()
            .ok_or_else(|| OAuthError::Serialization("path has no parent".to_string()))?;
        std::fs::create_dir_all(dir)?;

        let tmp = dir.join(format!(
            ".{}.tmp",
            path.file_name().unwrap_or_default().to_string_lossy()
        ));
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn save_client_info(&self, backend: &str, info: &ClientInfo) -> Result<(), OAuthError> {
        let bytes = serde_json::to_vec_pretty(info)
            .map_err(|e| OAuthError::Serialization(e.to_string()))?;
        self.atomic_write(&self.backend_dir(backend).join(CLIENT_INFO_FILE), &bytes)
    }

    pub fn load_client_info(&self, backend: &str) -> Result<Option<ClientInfo>, OAuthError> {
        let path = self.backend_dir(backend).join(CLIENT_INFO_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        let info = serde_json::from_slice(&bytes)
            .map_err(|e| OAuthError::Serialization(e.to_string()))?;
        Ok(Some(info))
    }

    pub fn save_tokens(&self, backend: &str, tokens: &TokenSet) -> Result<(), OAuthError> {
        let bytes = serde_json::to_vec_pretty(tokens)
            .map_err(|e| OAuthError::Serialization(e.to_string()))?;
        self.atomic_write(&self.backend_dir(backend).join(TOKENS_FILE), &bytes)
    }

    pub fn load_tokens(&self, backend: &str) -> Result<Option<TokenSet>, OAuthError> {
        let path = self.backend_dir(backend).join(TOKENS_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        let tokens = serde_json::from_slice(&bytes)
            .map_err(|e| OAuthError::Serialization(e.to_string()))?;
        Ok(Some(tokens))
    }

    /// Stage the PKCE verifier ahead of the redirect.
    pub fn save_verifier(&self, backend: &str, verifier: &str) -> Result<(), OAuthError> {
        self.atomic_write(
            &self.backend_dir(backend).join(VERIFIER_FILE),
            verifier.as_bytes(),
        )
    }

    /// Consume the staged verifier. It is deleted on read, so a verifier
    /// can back at most one token exchange.
    pub fn take_verifier(&self, backend: &str) -> Result<String, OAuthError> {
        let path = self.backend_dir(backend).join(VERIFIER_FILE);
        if !path.exists() {
            return Err(OAuthError::MissingVerifier(backend.to_string()));
        }
        let verifier = std::fs::read_to_string(&path)?;
        std::fs::remove_file(&path)?;
        Ok(verifier.trim().to_string())
    }

    /// Scoped clear of persisted state.
    pub fn invalidate(&self, backend: &str, scope: InvalidateScope) -> Result<(), OAuthError> {
        let dir = self.backend_dir(backend);
        let remove = |file: &str| -> Result<(), OAuthError> {
            let path = dir.join(file);
            if path.exists() {
                std::fs::remove_file(path)?;
            }
            Ok(())
        };

        match scope {
            InvalidateScope::All => {
                if dir.exists() {
                    std::fs::remove_dir_all(&dir)?;
                }
            }
            InvalidateScope::Client => remove(CLIENT_INFO_FILE)?,
            InvalidateScope::Tokens => remove(TOKENS_FILE)?,
            InvalidateScope::Verifier => remove(VERIFIER_FILE)?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, OAuthStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = OAuthStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn test_client_info_roundtrip() {
        let (_dir, store) = store();
        let info = ClientInfo {
            client_id: "abc".to_string(),
            client_secret: None,
            extra: serde_json::Map::new(),
        };

        store.save_client_info("docs", &info).unwrap();
        let loaded = store.load_client_info("docs").unwrap().unwrap();
        assert_eq!(loaded.client_id, "abc");
    }

    #[test]
    fn test_tokens_roundtrip_and_expiry() {
        let (_dir, store) = store();
        let tokens = TokenSet {
            access_token: "tok".to_string(),
            token_type: Some("Bearer".to_string()),
            refresh_token: Some("ref".to_string()),
            expires_in: Some(3600),
            obtained_at: None,
            token_endpoint: None,
        }
        .stamped();

        assert!(!tokens.is_expired());
        store.save_tokens("docs", &tokens).unwrap();
        let loaded = store.load_tokens("docs").unwrap().unwrap();
        assert_eq!(loaded.refresh_token.as_deref(), Some("ref"));
    }

    #[test]
    fn test_expired_token() {
        let tokens = TokenSet {
            access_token: "tok".to_string(),
            token_type: None,
            refresh_token: None,
            expires_in: Some(10),
            obtained_at: Some(0),
            token_endpoint: None,
        };
        assert!(tokens.is_expired());
    }

    #[test]
    fn test_verifier_consumed_exactly_once() {
        let (_dir, store) = store();
        store.save_verifier("docs", "secret").unwrap();

        assert_eq!(store.take_verifier("docs").unwrap(), "secret");
        assert!(matches!(
            store.take_verifier("docs"),
            Err(OAuthError::MissingVerifier(_))
        ));
    }

    #[test]
    fn test_invalidate_all_removes_everything() {
        let (dir, store) = store();
        store.save_verifier("docs", "v").unwrap();
        store
            .save_tokens(
                "docs",
                &TokenSet {
                    access_token: "t".to_string(),
                    token_type: None,
                    refresh_token: None,
                    expires_in: None,
                    obtained_at: None,
                    token_endpoint: None,
                },
            )
            .unwrap();

        store.invalidate("docs", InvalidateScope::All).unwrap();
        assert!(!dir.path().join("docs").exists());
    }

    #[test]
    fn test_invalidate_tokens_only() {
        let (dir, store) = store();
        store.save_verifier("docs", "v").unwrap();
        store
            .save_tokens(
                "docs",
                &TokenSet {
                    access_token: "t".to_string(),
                    token_type: None,
                    refresh_token: None,
                    expires_in: None,
                    obtained_at: None,
                    token_endpoint: None,
                },
            )
            .unwrap();

        store.invalidate("docs", InvalidateScope::Tokens).unwrap();
        assert!(!dir.path().join("docs/tokens.json").exists());
        assert!(dir.path().join("docs/code_verifier.txt").exists());
    }
}
