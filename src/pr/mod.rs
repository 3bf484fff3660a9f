pub mod diff;
pub mod types;

pub use diff::{parse_diff, Diff, DiffLine, FileDiff, LineKind};
pub use types::{
    Comment, CommentSide, Mergeability, PendingComment, PrCategory, PrGroup, PrId, PrStatus,
    PullRequest, Review, ReviewAction,
};

use percent_encoding::percent_decode_str;
use thiserror::Error;

use crate::credentials::ProviderKind;

#[derive(Debug, Error)]
pub enum PrError {
    #[error("Invalid PR reference: {0}")]
    InvalidReference(String),
}

/// Parse a pull request reference into a [`PrId`].
///
/// Accepted forms:
/// - `https://github.com/{owner}/{repo}/pull/{number}`
/// - `https://dev.azure.com/{org}/{project}/_git/{repo}/pullrequest/{number}`
/// - `https://{org}.visualstudio.com/{project}/_git/{repo}/pullrequest/{number}`
/// - `{owner}/{repo}#{number}`, attributed to `default_provider`
pub fn parse_pr_reference(reference: &str, default_provider: ProviderKind) -> Result<PrId, PrError> {
    let invalid = || PrError::InvalidReference(reference.to_string());

    if let Some((repository, number)) = reference.split_once('#') {
        if reference.contains("://") {
            return Err(invalid());
        }
        let number = number.parse::<u64>().map_err(|_| invalid())?;
        let id = PrId::new(default_provider, repository, number);
        return match id.split_repository() {
            Some(_) => Ok(id),
            None => Err(invalid()),
        };
    }

    let parsed = reqwest::Url::parse(reference).map_err(|_| invalid())?;
    let host = parsed.host_str().ok_or_else(invalid)?;

    // Azure DevOps project names may contain spaces, which arrive as %20
    let segments: Vec<String> = parsed
        .path_segments()
        .ok_or_else(invalid)?
        .filter(|segment| !segment.is_empty())
        .map(|segment| percent_decode_str(segment).decode_utf8_lossy().into_owned())
        .collect();
    let segments: Vec<&str> = segments.iter().map(String::as_str).collect();

    let (provider, project, repo, number) = if host == "github.com" {
        match segments.as_slice() {
            [owner, repo, "pull", number, ..] => (ProviderKind::GitHub, *owner, *repo, *number),
            _ => return Err(invalid()),
        }
    } else if host == "dev.azure.com" {
        match segments.as_slice() {
            [_org, project, "_git", repo, "pullrequest", number, ..] => {
                (ProviderKind::AzureDevOps, *project, *repo, *number)
            }
            _ => return Err(invalid()),
        }
    } else if host.ends_with(".visualstudio.com") {
        match segments.as_slice() {
            [project, "_git", repo, "pullrequest", number, ..] => {
                (ProviderKind::AzureDevOps, *project, *repo, *number)
            }
            _ => return Err(invalid()),
        }
    } else {
        return Err(invalid());
    };

    let number = number.parse::<u64>().map_err(|_| invalid())?;
    Ok(PrId::new(provider, format!("{project}/{repo}"), number))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_github_url() {
        let id = parse_pr_reference("https://github.com/org/repo/pull/42", ProviderKind::AzureDevOps)
            .unwrap();
        assert_eq!(id.provider, ProviderKind::GitHub);
        assert_eq!(id.repository, "org/repo");
        assert_eq!(id.number, 42);
    }

    #[test]
    fn test_parse_azure_urls() {
        let id = parse_pr_reference(
            "https://dev.azure.com/contoso/Platform/_git/api/pullrequest/7",
            ProviderKind::GitHub,
        )
        .unwrap();
        assert_eq!(id.provider, ProviderKind::AzureDevOps);
        assert_eq!(id.repository, "Platform/api");
        assert_eq!(id.number, 7);

        let legacy = parse_pr_reference(
            "https://contoso.visualstudio.com/Platform/_git/api/pullrequest/8",
            ProviderKind::GitHub,
        )
        .unwrap();
        assert_eq!(legacy.repository, "Platform/api");
        assert_eq!(legacy.number, 8);
    }

    #[test]
    fn test_parse_azure_url_decodes_project_name() {
        let id = parse_pr_reference(
            "https://dev.azure.com/contoso/My%20Project/_git/api/pullrequest/7",
            ProviderKind::GitHub,
        )
        .unwrap();
        assert_eq!(id.repository, "My Project/api");
        assert_eq!(id.split_repository(), Some(("My Project", "api")));
    }

    #[test]
    fn test_parse_shorthand() {
        let id = parse_pr_reference("org/repo#12", ProviderKind::AzureDevOps).unwrap();
        assert_eq!(id.provider, ProviderKind::AzureDevOps);
        assert_eq!(id.repository, "org/repo");
        assert_eq!(id.number, 12);
    }

    #[test]
    fn test_parse_invalid_references() {
        assert!(parse_pr_reference("https://example.com", ProviderKind::GitHub).is_err());
        assert!(parse_pr_reference("not-a-url", ProviderKind::GitHub).is_err());
        assert!(parse_pr_reference("https://github.com/org/repo/pulls/42", ProviderKind::GitHub).is_err());
        assert!(parse_pr_reference("repo#1", ProviderKind::GitHub).is_err());
        assert!(parse_pr_reference("org/repo#abc", ProviderKind::GitHub).is_err());
    }
}
