//! Configuration loading and management.
//!
//! Loads configuration from embedded config.toml, an optional user file,
//! and environment variable overrides.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

/// Embedded configuration file content.
const CONFIG_TOML: &str = include_str!("../config.toml");

/// Placeholder substituted with the tenant in `authority_template`.
pub const TENANT_PLACEHOLDER: &str = "{tenant}";

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub oauth: OAuthConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    pub authority_template: String,
    pub tenant: String,
    pub client_id: String,
    pub redirect_uri: String,
    /// Resource the access token is requested for.
    pub resource: String,
    #[serde(default = "default_validate_authority")]
    pub validate_authority: bool,
}

fn default_validate_authority() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Directory endpoint, with trailing slash (e.g. `https://graph.windows.net/`).
    pub graph_endpoint: String,
    pub api_version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    /// Load configuration with environment variable overrides.
    ///
    /// A user file at `<config dir>/directory-searcher/config.toml` replaces the
    /// embedded defaults when present.
    pub fn load() -> Result<Self> {
        let mut config = match user_config_path().filter(|p| p.exists()) {
            Some(path) => {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                toml::from_str::<Config>(&content)
                    .with_context(|| format!("Failed to parse {}", path.display()))?
            }
            None => toml::from_str(CONFIG_TOML).context("Failed to parse embedded config.toml")?,
        };

        // Apply environment variable overrides
        if let Ok(client_id) = env::var("AZURE_CLIENT_ID") {
            config.oauth.client_id = client_id;
        }

        if let Ok(tenant) = env::var("AZURE_TENANT_ID") {
            config.oauth.tenant = tenant;
        }

        if let Ok(redirect_uri) = env::var("AZURE_REDIRECT_URI") {
            config.oauth.redirect_uri = redirect_uri;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            config.logging.level = log_level;
        }

        config.validate()?;

        Ok(config)
    }

    /// Validate that required configuration is present.
    pub fn validate(&self) -> Result<()> {
        if self.oauth.client_id.is_empty() || self.oauth.client_id == "YOUR_AZURE_AD_CLIENT_ID" {
            anyhow::bail!(
                "Azure AD client_id not configured. Set AZURE_CLIENT_ID environment variable \
                 or update config.toml"
            );
        }

        if self.oauth.tenant.is_empty() || self.oauth.tenant == "YOUR_TENANT_ID" {
            anyhow::bail!(
                "Azure AD tenant not configured. Set AZURE_TENANT_ID environment variable \
                 or update config.toml"
            );
        }

        if !self.oauth.authority_template.contains(TENANT_PLACEHOLDER) {
            anyhow::bail!(
                "authority_template must contain the {} placeholder",
                TENANT_PLACEHOLDER
            );
        }

        if self.api.api_version.is_empty() {
            anyhow::bail!("Directory api_version not configured");
        }

        Ok(())
    }
}

/// Location of the optional per-user configuration file.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("directory-searcher").join("config.toml"))
}

#[cfg(test)]
pub(crate) fn test_config(base_url: &str) -> Config {
    Config {
        app: AppConfig {
            name: "test".into(),
        },
        oauth: OAuthConfig {
            authority_template: format!("{}/{}", base_url, TENANT_PLACEHOLDER),
            tenant: "contoso.onmicrosoft.com".into(),
            client_id: "test-client".into(),
            redirect_uri: "http://localhost:28491/callback".into(),
            resource: "https://graph.windows.net/".into(),
            validate_authority: false,
        },
        api: ApiConfig {
            graph_endpoint: format!("{}/", base_url),
            api_version: "1.5".into(),
        },
        logging: LoggingConfig {
            level: "debug".into(),
        },
    }
}
