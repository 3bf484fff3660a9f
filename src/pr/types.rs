use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::credentials::ProviderKind;

/// Identity of a pull request on a specific backend.
///
/// `repository` is `owner/repo` on GitHub and `project/repo` on Azure DevOps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PrId {
    pub provider: ProviderKind,
    pub repository: String,
    pub number: u64,
}

impl PrId {
    pub fn new(provider: ProviderKind, repository: impl Into<String>, number: u64) -> Self {
        Self {
            provider,
            repository: repository.into(),
            number,
        }
    }

    /// Split `repository` into its two halves (owner/project, repo).
    pub fn split_repository(&self) -> Option<(&str, &str)> {
        self.repository
            .split_once('/')
            .filter(|(left, right)| !left.is_empty() && !right.is_empty())
    }
}

impl std::fmt::Display for PrId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.repository, self.number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrStatus {
    Open,
    Closed,
    Merged,
}

impl std::fmt::Display for PrStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrStatus::Open => write!(f, "open"),
            PrStatus::Closed => write!(f, "closed"),
            PrStatus::Merged => write!(f, "merged"),
        }
    }
}

/// Relationship between a pull request and the identity that queried it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrCategory {
    Authored,
    Assigned,
    Other,
}

impl PrCategory {
    /// Classify a pull request relative to `identity`.
    ///
    /// Logins are compared case-insensitively: both backends treat them that way.
    pub fn classify(identity: &str, author: &str, reviewers: &[String]) -> Self {
        if author.eq_ignore_ascii_case(identity) {
            PrCategory::Authored
        } else if reviewers.iter().any(|r| r.eq_ignore_ascii_case(identity)) {
            PrCategory::Assigned
        } else {
            PrCategory::Other
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mergeability {
    Mergeable,
    Conflicting,
    Unknown,
}

/// A pull request as fetched from a backend.
///
/// Constructed fresh on every fetch. The orchestrator only ever touches
/// `credential_id`/`credential_name` after construction.
#[derive(Debug, Clone, Serialize)]
pub struct PullRequest {
    pub id: PrId,
    pub title: String,
    pub description: String,
    /// Author login (GitHub) or unique name (Azure DevOps)
    pub author: String,
    pub source_branch: String,
    pub target_branch: String,
    pub status: PrStatus,
    pub category: PrCategory,
    pub mergeable: Mergeability,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Browser URL of the pull request
    pub url: String,
    /// Credential the pull request was fetched under, attached during aggregation
    pub credential_id: Option<String>,
    pub credential_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentSide {
    /// Old version of the file
    Left,
    /// New version of the file
    Right,
}

/// A comment fetched from a backend.
#[derive(Debug, Clone, Serialize)]
pub struct Comment {
    pub id: String,
    pub author: String,
    pub body: String,
    /// None for general (non-inline) comments
    pub path: Option<String>,
    pub line: Option<u32>,
    pub side: CommentSide,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// An inline comment that has not been sent yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingComment {
    pub body: String,
    pub path: String,
    pub line: u32,
    pub side: CommentSide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Approve,
    RequestChanges,
    Comment,
}

impl ReviewAction {
    /// Whether the action carries a verdict (and is therefore refused on one's own PR).
    pub fn is_verdict(self) -> bool {
        matches!(self, ReviewAction::Approve | ReviewAction::RequestChanges)
    }
}

impl std::fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewAction::Approve => write!(f, "approve"),
            ReviewAction::RequestChanges => write!(f, "request changes"),
            ReviewAction::Comment => write!(f, "comment"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Review {
    pub pr: PrId,
    pub action: ReviewAction,
    pub body: String,
    pub comments: Vec<PendingComment>,
}

/// Pull requests fetched under one credential, for display grouping.
#[derive(Debug, Clone, Serialize)]
pub struct PrGroup {
    pub credential_id: String,
    pub credential_name: String,
    pub provider: ProviderKind,
    pub username: String,
    pub primary: bool,
    pub pull_requests: Vec<PullRequest>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_repository() {
        let id = PrId::new(ProviderKind::GitHub, "org/repo", 42);
        assert_eq!(id.split_repository(), Some(("org", "repo")));
        assert_eq!(id.to_string(), "org/repo#42");

        let bad = PrId::new(ProviderKind::GitHub, "norepo", 1);
        assert_eq!(bad.split_repository(), None);
    }

    #[test]
    fn test_classify_category() {
        let reviewers = vec!["bob".to_string()];
        assert_eq!(PrCategory::classify("Alice", "alice", &reviewers), PrCategory::Authored);
        assert_eq!(PrCategory::classify("bob", "alice", &reviewers), PrCategory::Assigned);
        assert_eq!(PrCategory::classify("carol", "alice", &reviewers), PrCategory::Other);
    }

    #[test]
    fn test_verdict_actions() {
        assert!(ReviewAction::Approve.is_verdict());
        assert!(ReviewAction::RequestChanges.is_verdict());
        assert!(!ReviewAction::Comment.is_verdict());
    }
}
