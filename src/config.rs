use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::credentials::ProviderKind;

pub const DEFAULT_CONFIG_FILE: &str = "pr-hub.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("No token configured for credential `{0}`")]
    MissingToken(String),

    #[error("Credential `{0}` is an Azure DevOps credential without an organization URL")]
    MissingOrganization(String),
}

/// Top-level configuration loaded from pr-hub.toml.
/// All sections are optional; with no file the tool runs with no credentials.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub github: GitHubConfig,

    #[serde(default)]
    pub azure: AzureConfig,

    #[serde(default)]
    pub credentials: Vec<CredentialConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    /// How long a resolved Azure DevOps project/repository pair stays cached
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}

impl ResolverConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

fn default_ttl_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubConfig {
    #[serde(default = "default_github_api")]
    pub api_base: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_base: default_github_api(),
        }
    }
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AzureConfig {
    #[serde(default = "default_azure_api_version")]
    pub api_version: String,
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            api_version: default_azure_api_version(),
        }
    }
}

fn default_azure_api_version() -> String {
    "7.1".to_string()
}

/// One `[[credentials]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialConfig {
    pub id: String,
    pub name: Option<String>,
    pub provider: ProviderKind,
    pub username: String,
    /// Inline token. Prefer `token_env` for anything checked in.
    pub token: Option<String>,
    /// Environment variable holding the token
    pub token_env: Option<String>,
    /// Azure DevOps organization URL
    pub organization: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub selected: bool,
    #[serde(default)]
    pub primary: bool,
}

impl Config {
    /// Load configuration from `path`, or from pr-hub.toml in the current
    /// directory. Returns the default config if the file doesn't exist.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::load_from(path)
                } else {
                    Ok(Config::default())
                }
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.credentials.is_empty());
        assert_eq!(config.resolver.ttl(), Duration::from_secs(300));
        assert_eq!(config.github.api_base, "https://api.github.com");
        assert_eq!(config.azure.api_version, "7.1");
    }

    #[test]
    fn test_parse_config_toml() {
        let toml_str = r#"
[resolver]
ttl_secs = 60

[[credentials]]
id = "work"
provider = "azure"
username = "alice@contoso.com"
token_env = "WORK_PAT"
organization = "https://dev.azure.com/contoso"
active = true
primary = true

[[credentials]]
id = "oss"
name = "Open source"
provider = "github"
username = "alice"
token = "ghp_x"
selected = true
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.resolver.ttl_secs, 60);
        assert_eq!(config.credentials.len(), 2);
        assert_eq!(config.credentials[0].provider, ProviderKind::AzureDevOps);
        assert!(config.credentials[0].primary);
        assert!(!config.credentials[1].active);
        assert!(config.credentials[1].selected);
        assert_eq!(config.github.api_base, "https://api.github.com");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[github]\napi_base = \"http://localhost:9000\"").unwrap();
        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.github.api_base, "http://localhost:9000");
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let result = Config::load(Some(Path::new("/nonexistent/pr-hub.toml")));
        assert!(matches!(result, Err(ConfigError::FileRead(_))));
    }
}
