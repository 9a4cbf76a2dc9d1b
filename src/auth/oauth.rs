//! OAuth2 authorization-code client with PKCE support for Azure AD.

use crate::auth::authority::Authority;
use crate::error::AuthError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use serde::{Deserialize, Deserializer};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use url::Url;
use uuid::Uuid;

/// PKCE code verifier and challenge pair.
#[derive(Debug)]
pub struct PkceChallenge {
    /// The code verifier (stored locally, sent in token exchange).
    pub verifier: String,
    /// The code challenge (SHA256 hash of verifier, sent in auth request).
    pub challenge: String,
}

impl PkceChallenge {
    /// Generate a new PKCE challenge pair.
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        let verifier_bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
        let verifier = URL_SAFE_NO_PAD.encode(&verifier_bytes);

        // challenge = BASE64URL(SHA256(verifier))
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        let challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());

        Self {
            verifier,
            challenge,
        }
    }
}

impl Default for PkceChallenge {
    fn default() -> Self {
        Self::new()
    }
}

/// The (resource, client, redirect) triple a token is requested for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    pub resource: String,
    pub client_id: String,
    pub redirect_uri: String,
}

/// OAuth2 client bound to one authority.
pub struct OAuth2Client {
    authority: Authority,
    http_client: reqwest::Client,
}

impl OAuth2Client {
    pub fn new(authority: Authority, http_client: reqwest::Client) -> Self {
        Self {
            authority,
            http_client,
        }
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Generate the authorization URL for browser-based sign-in.
    ///
    /// Returns the URL and a CSRF state token that must be verified in the callback.
    pub fn generate_auth_url(
        &self,
        request: &TokenRequest,
        pkce: &PkceChallenge,
    ) -> Result<(Url, String), AuthError> {
        let mut rng = rand::thread_rng();
        let state_bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
        let state = URL_SAFE_NO_PAD.encode(&state_bytes);

        let mut url = Url::parse(&self.authority.authorize_endpoint())
            .map_err(|e| AuthError::InvalidAuthority(e.to_string()))?;

        url.query_pairs_mut()
            .append_pair("client_id", &request.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &request.redirect_uri)
            .append_pair("resource", &request.resource)
            .append_pair("state", &state)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256");

        Ok((url, state))
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        request: &TokenRequest,
        code: &str,
        pkce_verifier: &str,
    ) -> Result<TokenResponse, AuthError> {
        let correlation_id = Uuid::new_v4();
        let params = [
            ("client_id", request.client_id.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", request.redirect_uri.as_str()),
            ("code_verifier", pkce_verifier),
            ("resource", request.resource.as_str()),
        ];

        let response = self
            .http_client
            .post(self.authority.token_endpoint())
            .header("client-request-id", correlation_id.to_string())
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::TokenExchangeFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            tracing::error!(
                %correlation_id,
                "Token exchange failed: HTTP {} - {}",
                status,
                error_body
            );
            return Err(match serde_json::from_str::<TokenErrorResponse>(&error_body) {
                Ok(err) => AuthError::OAuthFailed {
                    description: err.error_description.unwrap_or_else(|| err.error.clone()),
                    code: err.error,
                },
                Err(_) => AuthError::TokenExchangeFailed(format!("HTTP {}", status.as_u16())),
            });
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::TokenExchangeFailed(e.to_string()))?;

        tracing::debug!(%correlation_id, "Authorization code exchanged");
        Ok(token_response)
    }
}

/// Token response from Azure AD.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    /// Seconds until expiry. The v1 endpoint sends this as a string.
    #[serde(deserialize_with = "deserialize_seconds")]
    pub expires_in: u64,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
}

/// Error body returned by the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

fn deserialize_seconds<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(u64),
        Text(String),
    }

    match Seconds::deserialize(deserializer)? {
        Seconds::Number(n) => Ok(n),
        Seconds::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Claims read from the id_token to identify the signed-in user.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdTokenClaims {
    pub oid: Option<String>,
    pub upn: Option<String>,
    pub email: Option<String>,
    pub unique_name: Option<String>,
    pub preferred_username: Option<String>,
}

impl IdTokenClaims {
    /// Decode the payload segment of an id_token. The signature is not checked;
    /// the token came straight from the token endpoint over TLS.
    pub fn decode(id_token: &str) -> Option<Self> {
        let payload = id_token.split('.').nth(1)?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// The identifier shown to the user, usually the UPN.
    pub fn displayable_id(&self) -> Option<String> {
        self.upn
            .clone()
            .or_else(|| self.email.clone())
            .or_else(|| self.unique_name.clone())
            .or_else(|| self.preferred_username.clone())
    }

    /// Stable account identifier used as part of the cache key.
    pub fn account_id(&self) -> Option<String> {
        self.oid.clone().or_else(|| self.displayable_id())
    }
}

/// Parse the sign-in redirect URL to extract code and state.
pub fn parse_callback_url(url_string: &str) -> Result<(String, String), AuthError> {
    let url = Url::parse(url_string).map_err(|_| AuthError::InvalidAuthCode)?;

    let params: HashMap<_, _> = url.query_pairs().collect();

    if let Some(error) = params.get("error") {
        let description = params
            .get("error_description")
            .map(|s| s.to_string())
            .unwrap_or_else(|| error.to_string());
        return Err(AuthError::OAuthFailed {
            code: error.to_string(),
            description,
        });
    }

    let code = params
        .get("code")
        .ok_or(AuthError::InvalidAuthCode)?
        .to_string();

    let state = params
        .get("state")
        .ok_or(AuthError::StateValidationFailed)?
        .to_string();

    Ok((code, state))
}

#[cfg(test)]
pub(crate) fn encode_test_id_token(claims: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.", header, payload)
}
