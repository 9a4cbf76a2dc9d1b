//! Directory users and the classified outcome of a search.

use serde::Deserialize;

/// One user record returned by the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryUser {
    pub principal_name: String,
    pub display_name: String,
}

/// The single result a search attempt produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    /// No search term was entered; nothing was attempted.
    EmptyQuery,
    /// Sign-in failed or was cancelled.
    AuthFailure { code: String, description: String },
    /// The directory rejected the token (HTTP 401).
    Unauthorized,
    /// Any other failed or error-flagged directory response.
    ApiError,
    NoResults,
    /// Matching users, in the order the server returned them.
    Success(Vec<DirectoryUser>),
}

impl SearchOutcome {
    /// Short status line for the results area.
    pub fn status_text(&self) -> &str {
        match self {
            Self::Success(_) => "Success",
            Self::NoResults => "No Users Found",
            Self::EmptyQuery => "",
            Self::AuthFailure { .. } | Self::Unauthorized | Self::ApiError => "Error",
        }
    }

    /// Returns a user-friendly message for display in the UI.
    pub fn user_message(&self) -> String {
        match self {
            Self::EmptyQuery => "Please enter a valid search term.".to_string(),
            Self::AuthFailure { code, description } => format!(
                "Sorry, an error occurred while signing you in. \
                 If the error continues, please contact your administrator.\n\n\
                 Error: {}\n\nError Description:\n\n{}",
                code, description
            ),
            Self::Unauthorized => {
                "Sorry, you don't have access to the Graph API. Please sign-in again.".to_string()
            }
            Self::ApiError => {
                "Sorry, an error occurred accessing the Graph API. Please try again.".to_string()
            }
            Self::NoResults => "No Users Found".to_string(),
            Self::Success(users) => format!("Found {} user(s)", users.len()),
        }
    }

    /// Returns true if this outcome means the cached token is stale.
    pub fn requires_sign_out(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

/// Success body of a users query.
#[derive(Debug, Deserialize)]
pub(crate) struct UserPage {
    pub value: Vec<UserRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserRecord {
    pub user_principal_name: Option<String>,
    pub display_name: Option<String>,
}

impl From<UserRecord> for DirectoryUser {
    fn from(record: UserRecord) -> Self {
        Self {
            principal_name: record.user_principal_name.unwrap_or_default(),
            display_name: record.display_name.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_distinct() {
        let outcomes = [
            SearchOutcome::EmptyQuery,
            SearchOutcome::AuthFailure {
                code: "access_denied".into(),
                description: "denied".into(),
            },
            SearchOutcome::Unauthorized,
            SearchOutcome::ApiError,
            SearchOutcome::NoResults,
            SearchOutcome::Success(vec![]),
        ];

        let messages: std::collections::HashSet<String> =
            outcomes.iter().map(|o| o.user_message()).collect();
        assert_eq!(messages.len(), outcomes.len());
    }

    #[test]
    fn test_auth_failure_message_includes_provider_details() {
        let outcome = SearchOutcome::AuthFailure {
            code: "access_denied".into(),
            description: "User declined consent".into(),
        };
        let message = outcome.user_message();
        assert!(message.contains("access_denied"));
        assert!(message.contains("User declined consent"));
    }

    #[test]
    fn test_status_text() {
        assert_eq!(SearchOutcome::NoResults.status_text(), "No Users Found");
        assert_eq!(SearchOutcome::Success(vec![]).status_text(), "Success");
        assert!(SearchOutcome::Unauthorized.requires_sign_out());
        assert!(!SearchOutcome::ApiError.requires_sign_out());
    }

    #[test]
    fn test_user_record_with_missing_fields() {
        let record: UserRecord =
            serde_json::from_str(r#"{"userPrincipalName":"a@b.com","displayName":null}"#).unwrap();
        let user = DirectoryUser::from(record);
        assert_eq!(user.principal_name, "a@b.com");
        assert_eq!(user.display_name, "");
    }
}
