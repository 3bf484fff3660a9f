use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::warn;

use super::ProviderError;
use crate::credentials::ProviderKind;

const USER_AGENT_VALUE: &str = "pr-hub/0.1";

/// Client with the authorization header baked in.
pub fn build_client(authorization: &str, accept: &'static str) -> Result<reqwest::Client, ProviderError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
    headers.insert(ACCEPT, HeaderValue::from_static(accept));
    let mut auth = HeaderValue::from_str(authorization)
        .map_err(|_| ProviderError::InvalidRequest("token contains invalid header characters".to_string()))?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);

    let client = reqwest::Client::builder().default_headers(headers).build()?;
    Ok(client)
}

/// Error payload shape shared closely enough by both backends.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    /// GitHub
    message: Option<String>,
    /// Azure DevOps, which also sends `message`
    #[serde(rename = "typeKey")]
    type_key: Option<String>,
}

/// Map a non-success response to a typed error: 401/403 become
/// `AuthFailure`, 404 `NotFound`, anything else `Api`.
pub async fn ensure_success(
    response: reqwest::Response,
    provider: ProviderKind,
    context: &str,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body);

    warn!(
        provider = provider.as_str(),
        context = context,
        status = status.as_u16(),
        error_message = %message,
        "API request failed"
    );

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::AuthFailure {
            provider,
            message: format!("{context}: {message}"),
        },
        StatusCode::NOT_FOUND => ProviderError::NotFound {
            what: format!("{context}: {message}"),
        },
        _ => ProviderError::Api {
            context: context.to_string(),
            status: status.as_u16(),
            message,
        },
    })
}

fn error_message(body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ApiErrorBody>(body) {
        let message = parsed.message.filter(|m| !m.is_empty());
        match (message, parsed.type_key) {
            (Some(m), Some(key)) => return format!("{m} ({key})"),
            (Some(m), None) => return m,
            _ => {}
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        "no response body".to_string()
    } else if trimmed.len() > 300 {
        // Azure DevOps answers some auth failures with a full HTML page
        let cut = (0..=300).rev().find(|&i| trimmed.is_char_boundary(i)).unwrap_or(0);
        format!("{}…", &trimmed[..cut])
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_from_github_json() {
        let body = r#"{"message":"Bad credentials","documentation_url":"https://docs.github.com"}"#;
        assert_eq!(error_message(body), "Bad credentials");
    }

    #[test]
    fn test_error_message_from_azure_json() {
        let body = r#"{"$id":"1","message":"TF401019: repo missing","typeKey":"GitRepositoryNotFoundException"}"#;
        assert_eq!(
            error_message(body),
            "TF401019: repo missing (GitRepositoryNotFoundException)"
        );
    }

    #[test]
    fn test_error_message_plain_and_empty() {
        assert_eq!(error_message(""), "no response body");
        assert_eq!(error_message("  oops \n"), "oops");
        let long = "x".repeat(1000);
        assert!(error_message(&long).chars().count() <= 301);
    }

    #[test]
    fn test_build_client_rejects_bad_token() {
        assert!(build_client("Bearer bad\ntoken", "application/json").is_err());
        assert!(build_client("Bearer good", "application/json").is_ok());
    }
}
