//! Directory query client.
//!
//! Issues one `startswith(userPrincipalName, ...)` users query per search and
//! classifies the response.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use super::models::{DirectoryUser, SearchOutcome, UserPage};
use crate::config::ApiConfig;
use crate::error::ApiError;

/// HTTP request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP connection timeout.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Top-level fields that flag an error body despite a 2xx status.
const ERROR_MARKERS: [&str; 2] = ["odata.error", "error"];

/// Directory client for a single tenant.
pub struct DirectoryQueryClient {
    http_client: Client,
    users_url: Url,
    api_version: String,
}

impl DirectoryQueryClient {
    pub fn new(api: &ApiConfig, tenant: &str) -> Result<Self, ApiError> {
        let http_client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .build()
            .map_err(ApiError::ClientBuild)?;

        let users_url = format!(
            "{}/{}/users",
            api.graph_endpoint.trim_end_matches('/'),
            tenant
        );
        let users_url =
            Url::parse(&users_url).map_err(|e| ApiError::InvalidEndpoint(e.to_string()))?;

        Ok(Self {
            http_client,
            users_url,
            api_version: api.api_version.clone(),
        })
    }

    /// Build the filtered users URL for `search_term`.
    ///
    /// Single quotes are doubled for the OData string literal; the whole
    /// filter is then URL-encoded as a query value.
    pub fn query_url(&self, search_term: &str) -> Url {
        let filter = format!(
            "startswith(userPrincipalName, '{}')",
            search_term.replace('\'', "''")
        );

        let mut url = self.users_url.clone();
        url.query_pairs_mut()
            .append_pair("api-version", &self.api_version)
            .append_pair("$filter", &filter);
        url
    }

    /// Search users whose principal name starts with `search_term`.
    ///
    /// The caller rejects empty terms before getting here.
    pub async fn query(&self, access_token: &str, search_term: &str) -> SearchOutcome {
        let url = self.query_url(search_term);
        let correlation_id = Uuid::new_v4();

        debug!(%correlation_id, "Querying directory: {}", url);

        let response = match self
            .http_client
            .get(url)
            .bearer_auth(access_token)
            .header("client-request-id", correlation_id.to_string())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!(%correlation_id, "Directory request failed: {}", e);
                return SearchOutcome::ApiError;
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                error!(%correlation_id, "Failed to read directory response: {}", e);
                return SearchOutcome::ApiError;
            }
        };

        let outcome = classify_response(status, &body);
        match &outcome {
            SearchOutcome::Success(users) => {
                info!(%correlation_id, "Directory returned {} users", users.len())
            }
            SearchOutcome::NoResults => info!(%correlation_id, "Directory returned no users"),
            SearchOutcome::Unauthorized => {
                warn!(%correlation_id, "Directory rejected the access token (401)")
            }
            _ => error!(%correlation_id, "Directory query failed: HTTP {}", status),
        }
        outcome
    }
}

/// Classify a directory response by status, error marker and `value` contents.
pub fn classify_response(status: StatusCode, body: &str) -> SearchOutcome {
    if status == StatusCode::UNAUTHORIZED {
        return SearchOutcome::Unauthorized;
    }
    if !status.is_success() {
        return SearchOutcome::ApiError;
    }

    let json: serde_json::Value = match serde_json::from_str(body) {
        Ok(json) => json,
        Err(e) => {
            debug!("Directory body is not JSON: {}", e);
            return SearchOutcome::ApiError;
        }
    };

    if ERROR_MARKERS.iter().any(|marker| json.get(marker).is_some()) {
        return SearchOutcome::ApiError;
    }

    let page: UserPage = match serde_json::from_value(json) {
        Ok(page) => page,
        Err(e) => {
            debug!("Directory body has no usable value array: {}", e);
            return SearchOutcome::ApiError;
        }
    };

    if page.value.is_empty() {
        SearchOutcome::NoResults
    } else {
        SearchOutcome::Success(page.value.into_iter().map(DirectoryUser::from).collect())
    }
}
