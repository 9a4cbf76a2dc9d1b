//! Sign-in authority for a tenant.

use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::config::TENANT_PLACEHOLDER;
use crate::error::AuthError;

/// The tenant's sign-in endpoint, e.g. `https://login.microsoftonline.com/contoso.onmicrosoft.com`.
///
/// Fixed for the lifetime of the context that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authority {
    base: String,
}

/// Subset of the OpenID discovery document used to validate an authority.
#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    authorization_endpoint: Option<String>,
}

impl Authority {
    /// Build the authority by substituting `tenant` into `template`.
    pub fn from_template(template: &str, tenant: &str) -> Result<Self, AuthError> {
        if !template.contains(TENANT_PLACEHOLDER) {
            return Err(AuthError::InvalidAuthority(format!(
                "template '{}' has no {} placeholder",
                template, TENANT_PLACEHOLDER
            )));
        }
        if tenant.trim().is_empty() {
            return Err(AuthError::InvalidAuthority("tenant is empty".into()));
        }

        let base = template
            .replace(TENANT_PLACEHOLDER, tenant)
            .trim_end_matches('/')
            .to_string();

        let url = Url::parse(&base).map_err(|e| AuthError::InvalidAuthority(e.to_string()))?;
        if !matches!(url.scheme(), "https" | "http") || url.host_str().is_none() {
            return Err(AuthError::InvalidAuthority(format!(
                "'{}' is not an http(s) URL",
                base
            )));
        }

        Ok(Self { base })
    }

    pub fn as_str(&self) -> &str {
        &self.base
    }

    pub fn authorize_endpoint(&self) -> String {
        format!("{}/oauth2/authorize", self.base)
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}/oauth2/token", self.base)
    }

    pub fn discovery_endpoint(&self) -> String {
        format!("{}/.well-known/openid-configuration", self.base)
    }

    /// Confirm the authority exists by fetching its discovery document.
    pub async fn validate(&self, http_client: &reqwest::Client) -> Result<(), AuthError> {
        let url = self.discovery_endpoint();
        debug!("Validating authority via {}", url);

        let response = http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| AuthError::AuthorityValidationFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::AuthorityValidationFailed(format!(
                "HTTP {}",
                response.status().as_u16()
            )));
        }

        let document: DiscoveryDocument = response
            .json()
            .await
            .map_err(|e| AuthError::AuthorityValidationFailed(e.to_string()))?;

        if document.authorization_endpoint.is_none() {
            return Err(AuthError::AuthorityValidationFailed(
                "discovery document has no authorization_endpoint".into(),
            ));
        }

        info!("Authority {} validated", self.base);
        Ok(())
    }
}

impl std::fmt::Display for Authority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.base)
    }
}
