//! File-based account seeding
//!
//! Loads the accounts that seed the in-memory identity, membership and
//! credit stores from a JSON file

use crate::models::UserId;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

/// Accounts loaded from JSON file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountsFile {
    #[serde(default)]
    pub accounts: Vec<AccountSeed>,
}

/// One seeded account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSeed {
    #[serde(rename = "userId")]
    pub user_id: UserId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Bearer credential accepted for this user
    pub token: String,

    /// Credential expiry (never expires when absent)
    #[serde(rename = "tokenExpiresAt", default, skip_serializing_if = "Option::is_none")]
    pub token_expires_at: Option<DateTime<Utc>>,

    /// Remaining chat credits
    #[serde(default)]
    pub credits: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub membership: Option<MembershipSeed>,
}

/// Membership attached to a seeded account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipSeed {
    pub name: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,
}

impl AccountsFile {
    /// Load accounts from JSON file
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading accounts from: {:?}", path);

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read accounts file: {:?}", path))?;

        let file: AccountsFile = serde_json::from_str(&content)
            .with_context(|| "Failed to parse accounts JSON")?;

        file.validate()?;

        debug!("Loaded {} accounts", file.accounts.len());
        Ok(file)
    }

    /// Load accounts from default locations
    /// Searches in order:
    /// 1. ~/.config/chatrelay/accounts.json
    /// 2. ./accounts.json
    ///
    /// Returns `Ok(None)` if no file exists.
    pub fn load_default() -> Result<Option<Self>> {
        if let Some(home) = dirs::home_dir() {
            let path = home.join(".config").join("chatrelay").join("accounts.json");
            if path.exists() {
                return Self::load(&path).map(Some);
            }
        }

        let local_path = Path::new("accounts.json");
        if local_path.exists() {
            return Self::load(local_path).map(Some);
        }

        Ok(None)
    }

    /// Validate accounts
    fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        let mut tokens = HashSet::new();

        for account in &self.accounts {
            if !ids.insert(account.user_id) {
                anyhow::bail!("Duplicate user id {} in accounts file", account.user_id);
            }

            if account.token.trim().is_empty() {
                anyhow::bail!("Account {} must have a non-empty token", account.user_id);
            }

            if !tokens.insert(account.token.as_str()) {
                anyhow::bail!("Token of account {} is already used by another account", account.user_id);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_accounts() {
        let file = write_file(
            r#"{
                "accounts": [
                    {
                        "userId": 1,
                        "email": "premium@example.com",
                        "token": "token-premium-0001",
                        "credits": 30,
                        "membership": {
                            "name": "premium",
                            "features": ["learning", "chat"],
                            "expiresAt": "2099-01-01T00:00:00Z"
                        }
                    },
                    {
                        "userId": 2,
                        "token": "token-basic-0002"
                    }
                ]
            }"#,
        );

        let accounts = AccountsFile::load(file.path()).unwrap();
        assert_eq!(accounts.accounts.len(), 2);
        assert_eq!(accounts.accounts[0].credits, 30);
        assert_eq!(accounts.accounts[0].membership.as_ref().unwrap().features.len(), 2);
        assert!(accounts.accounts[1].membership.is_none());
        assert_eq!(accounts.accounts[1].credits, 0);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let file = write_file(
            r#"{"accounts": [
                {"userId": 1, "token": "aaaaaaaa"},
                {"userId": 1, "token": "bbbbbbbb"}
            ]}"#,
        );
        assert!(AccountsFile::load(file.path()).is_err());
    }

    #[test]
    fn test_duplicate_tokens_rejected() {
        let file = write_file(
            r#"{"accounts": [
                {"userId": 1, "token": "same-token"},
                {"userId": 2, "token": "same-token"}
            ]}"#,
        );
        assert!(AccountsFile::load(file.path()).is_err());
    }

    #[test]
    fn test_invalid_json_rejected() {
        let file = write_file("{not json");
        assert!(AccountsFile::load(file.path()).is_err());
    }
}
