use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{Config, CredentialConfig};

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("No credential with id `{0}`")]
    NotFound(String),

    #[error("No active credential configured")]
    NoActive,
}

/// Backend a credential (and every pull request fetched with it) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "github")]
    GitHub,
    #[serde(rename = "azure")]
    AzureDevOps,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::GitHub => "github",
            ProviderKind::AzureDevOps => "azure",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::GitHub => write!(f, "GitHub"),
            ProviderKind::AzureDevOps => write!(f, "Azure DevOps"),
        }
    }
}

/// A stored personal access token and the identity it belongs to.
#[derive(Clone)]
pub struct Credential {
    pub id: String,
    pub name: String,
    pub token: Option<String>,
    pub provider: ProviderKind,
    pub username: String,
    /// Azure DevOps organization URL, e.g. `https://dev.azure.com/contoso`
    pub organization: Option<String>,
    pub active: bool,
    pub selected: bool,
    pub primary: bool,
}

impl Credential {
    /// Whether pull requests should be listed under this credential.
    pub fn is_listed(&self) -> bool {
        self.active || self.selected
    }
}

// Keep tokens out of logs and panic messages
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("provider", &self.provider)
            .field("username", &self.username)
            .field("organization", &self.organization)
            .field("active", &self.active)
            .field("selected", &self.selected)
            .field("primary", &self.primary)
            .finish()
    }
}

/// Read access to stored credentials. Writes belong to the storage layer.
pub trait CredentialStore: Send + Sync {
    fn list(&self) -> Vec<Credential>;

    fn get(&self, id: &str) -> Result<Credential, CredentialError>;

    /// The active credential; the primary one wins when several are active.
    fn get_active(&self) -> Result<Credential, CredentialError>;
}

/// Credentials declared in the configuration file.
#[derive(Debug, Clone, Default)]
pub struct ConfigCredentialStore {
    credentials: Vec<Credential>,
}

impl ConfigCredentialStore {
    pub fn new(credentials: Vec<Credential>) -> Self {
        Self { credentials }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.credentials.iter().map(credential_from_config).collect())
    }
}

impl CredentialStore for ConfigCredentialStore {
    fn list(&self) -> Vec<Credential> {
        self.credentials.clone()
    }

    fn get(&self, id: &str) -> Result<Credential, CredentialError> {
        self.credentials
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| CredentialError::NotFound(id.to_string()))
    }

    fn get_active(&self) -> Result<Credential, CredentialError> {
        let mut active = self.credentials.iter().filter(|c| c.active);
        let first = active.next().ok_or(CredentialError::NoActive)?;
        if first.primary {
            return Ok(first.clone());
        }
        Ok(active.find(|c| c.primary).unwrap_or(first).clone())
    }
}

/// Inline `token` wins over `token_env`.
fn credential_from_config(entry: &CredentialConfig) -> Credential {
    let token = entry.token.clone().or_else(|| {
        entry
            .token_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|t| !t.is_empty())
    });

    Credential {
        id: entry.id.clone(),
        name: entry.name.clone().unwrap_or_else(|| entry.id.clone()),
        token,
        provider: entry.provider,
        username: entry.username.clone(),
        organization: entry.organization.clone(),
        active: entry.active,
        selected: entry.selected,
        primary: entry.primary,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn credential(id: &str, provider: ProviderKind, username: &str) -> Credential {
        Credential {
            id: id.to_string(),
            name: format!("{id} credential"),
            token: Some("token".to_string()),
            provider,
            username: username.to_string(),
            organization: None,
            active: true,
            selected: false,
            primary: false,
        }
    }

    #[test]
    fn test_get_active_prefers_primary() {
        let mut first = credential("a", ProviderKind::GitHub, "alice");
        let mut second = credential("b", ProviderKind::AzureDevOps, "alice");
        second.primary = true;
        let store = ConfigCredentialStore::new(vec![first.clone(), second]);
        assert_eq!(store.get_active().unwrap().id, "b");

        first.active = false;
        let store = ConfigCredentialStore::new(vec![first]);
        assert!(matches!(store.get_active(), Err(CredentialError::NoActive)));
    }

    #[test]
    fn test_get_by_id() {
        let store = ConfigCredentialStore::new(vec![credential("a", ProviderKind::GitHub, "alice")]);
        assert_eq!(store.get("a").unwrap().username, "alice");
        assert!(matches!(store.get("zzz"), Err(CredentialError::NotFound(_))));
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn test_debug_redacts_token() {
        let cred = credential("a", ProviderKind::GitHub, "alice");
        let rendered = format!("{cred:?}");
        assert!(!rendered.contains("\"token\""));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn test_inline_token_wins_over_env() {
        let entry = CredentialConfig {
            id: "w".to_string(),
            name: None,
            provider: ProviderKind::GitHub,
            username: "alice".to_string(),
            token: Some("inline".to_string()),
            token_env: Some("PR_HUB_TEST_UNUSED_TOKEN_VAR".to_string()),
            organization: None,
            active: true,
            selected: false,
            primary: false,
        };
        let cred = credential_from_config(&entry);
        assert_eq!(cred.token.as_deref(), Some("inline"));
        assert_eq!(cred.name, "w");
    }
}
