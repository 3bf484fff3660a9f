use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::http::{build_client, ensure_success};
use super::{AtomicReview, ProviderAdapter, ProviderError, ReviewChannel};
use crate::config::GitHubConfig;
use crate::credentials::ProviderKind;
use crate::pr::{
    parse_diff, Comment, CommentSide, Diff, Mergeability, PrCategory, PrId, PrStatus, PullRequest,
    Review, ReviewAction,
};

const DIFF_MEDIA_TYPE: &str = "application/vnd.github.diff";
const PAGE_SIZE: &str = "100";

/// GitHub REST adapter. Reviews are atomic: one call carries the verdict,
/// the body and every inline comment.
pub struct GitHubAdapter {
    client: reqwest::Client,
    api_base: String,
    username: String,
}

#[derive(Debug, Deserialize)]
struct User {
    login: String,
}

#[derive(Debug, Deserialize)]
struct BranchRef {
    #[serde(rename = "ref")]
    name: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    number: u64,
    title: String,
    body: Option<String>,
    user: User,
    state: String,
    #[serde(default)]
    merged: bool,
    merged_at: Option<DateTime<Utc>>,
    mergeable: Option<bool>,
    head: BranchRef,
    base: BranchRef,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    html_url: String,
    #[serde(default)]
    requested_reviewers: Vec<User>,
    #[serde(default)]
    assignees: Vec<User>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    number: u64,
    title: String,
    body: Option<String>,
    user: User,
    state: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    html_url: String,
    /// `https://api.github.com/repos/{owner}/{repo}`
    repository_url: String,
    #[serde(default)]
    assignees: Vec<User>,
    pull_request: Option<SearchPullRef>,
}

#[derive(Debug, Deserialize)]
struct SearchPullRef {
    merged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ReviewCommentResponse {
    id: u64,
    user: User,
    body: String,
    path: String,
    line: Option<u32>,
    original_line: Option<u32>,
    side: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct IssueCommentResponse {
    id: u64,
    user: User,
    body: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct ReviewRequest<'a> {
    body: &'a str,
    event: &'static str,
    comments: Vec<ReviewCommentRequest<'a>>,
}

#[derive(Debug, Serialize)]
struct ReviewCommentRequest<'a> {
    path: &'a str,
    line: u32,
    side: &'static str,
    body: &'a str,
}

impl GitHubAdapter {
    pub fn new(config: &GitHubConfig, token: &str, username: &str) -> Result<Self, ProviderError> {
        let client = build_client(&format!("Bearer {token}"), "application/vnd.github+json")?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            username: username.to_string(),
        })
    }

    fn pull_url(&self, id: &PrId) -> Result<String, ProviderError> {
        let (owner, repo) = id.split_repository().ok_or_else(|| {
            ProviderError::InvalidRequest(format!("`{}` is not an owner/repo name", id.repository))
        })?;
        Ok(format!("{}/repos/{owner}/{repo}/pulls/{}", self.api_base, id.number))
    }

    fn issue_url(&self, id: &PrId) -> Result<String, ProviderError> {
        let (owner, repo) = id.split_repository().ok_or_else(|| {
            ProviderError::InvalidRequest(format!("`{}` is not an owner/repo name", id.repository))
        })?;
        Ok(format!("{}/repos/{owner}/{repo}/issues/{}", self.api_base, id.number))
    }

    async fn fetch_pull(&self, id: &PrId) -> Result<PullResponse, ProviderError> {
        let response = self.client.get(self.pull_url(id)?).send().await?;
        let response = ensure_success(response, ProviderKind::GitHub, &format!("get pull request {id}")).await?;
        Ok(response.json::<PullResponse>().await?)
    }
}

#[async_trait]
impl ProviderAdapter for GitHubAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GitHub
    }

    #[instrument(skip(self))]
    async fn list_pull_requests(&self, identity: &str) -> Result<Vec<PullRequest>, ProviderError> {
        let query = format!("is:pr is:open archived:false involves:{identity}");
        let response = self
            .client
            .get(format!("{}/search/issues", self.api_base))
            .query(&[("q", query.as_str()), ("per_page", PAGE_SIZE), ("sort", "updated")])
            .send()
            .await?;
        let response = ensure_success(response, ProviderKind::GitHub, "search pull requests").await?;
        let parsed = response.json::<SearchResponse>().await?;
        debug!(results = parsed.items.len(), "received search results");

        Ok(parsed
            .items
            .into_iter()
            .filter_map(|item| search_item_to_pull_request(item, identity))
            .collect())
    }

    #[instrument(skip(self), fields(pr = %id))]
    async fn get_pull_request(&self, id: &PrId) -> Result<PullRequest, ProviderError> {
        let pull = self.fetch_pull(id).await?;
        Ok(pull_to_pull_request(pull, &id.repository, &self.username))
    }

    #[instrument(skip(self), fields(pr = %id))]
    async fn get_diff(&self, id: &PrId) -> Result<Diff, ProviderError> {
        let diff_text = self
            .client
            .get(self.pull_url(id)?)
            .header(reqwest::header::ACCEPT, DIFF_MEDIA_TYPE)
            .send()
            .await?;
        let diff_text = ensure_success(diff_text, ProviderKind::GitHub, &format!("get diff for {id}"))
            .await?
            .text()
            .await?;
        debug!(diff_bytes = diff_text.len(), "received PR diff");
        Ok(parse_diff(&diff_text))
    }

    #[instrument(skip(self), fields(pr = %id))]
    async fn get_comments(&self, id: &PrId) -> Result<Vec<Comment>, ProviderError> {
        let review_comments = self
            .client
            .get(format!("{}/comments", self.pull_url(id)?))
            .query(&[("per_page", PAGE_SIZE)])
            .send()
            .await?;
        let review_comments = ensure_success(review_comments, ProviderKind::GitHub, "list review comments")
            .await?
            .json::<Vec<ReviewCommentResponse>>()
            .await?;

        let issue_comments = self
            .client
            .get(format!("{}/comments", self.issue_url(id)?))
            .query(&[("per_page", PAGE_SIZE)])
            .send()
            .await?;
        let issue_comments = ensure_success(issue_comments, ProviderKind::GitHub, "list issue comments")
            .await?
            .json::<Vec<IssueCommentResponse>>()
            .await?;

        let mut comments: Vec<Comment> = review_comments
            .into_iter()
            .map(review_comment_to_comment)
            .chain(issue_comments.into_iter().map(issue_comment_to_comment))
            .collect();
        comments.sort_by_key(|c| c.created_at);
        Ok(comments)
    }

    #[instrument(skip(self, body), fields(pr = %id))]
    async fn add_comment(
        &self,
        id: &PrId,
        body: &str,
        path: Option<&str>,
        line: Option<u32>,
    ) -> Result<(), ProviderError> {
        let response = match (path, line) {
            (Some(path), Some(line)) => {
                // Inline comments are pinned to the head commit
                let pull = self.fetch_pull(id).await?;
                self.client
                    .post(format!("{}/comments", self.pull_url(id)?))
                    .json(&serde_json::json!({
                        "body": body,
                        "commit_id": pull.head.sha,
                        "path": path,
                        "line": line,
                        "side": "RIGHT",
                    }))
                    .send()
                    .await?
            }
            (None, None) => {
                self.client
                    .post(format!("{}/comments", self.issue_url(id)?))
                    .json(&serde_json::json!({ "body": body }))
                    .send()
                    .await?
            }
            _ => {
                return Err(ProviderError::InvalidRequest(
                    "inline comments need both a path and a line".to_string(),
                ))
            }
        };
        ensure_success(response, ProviderKind::GitHub, &format!("comment on {id}")).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn validate_credentials(&self) -> Result<String, ProviderError> {
        let response = self.client.get(format!("{}/user", self.api_base)).send().await?;
        let user = ensure_success(response, ProviderKind::GitHub, "fetch authenticated user")
            .await?
            .json::<User>()
            .await?;
        if !user.login.eq_ignore_ascii_case(&self.username) {
            warn!(configured = %self.username, actual = %user.login, "token belongs to a different user");
        }
        Ok(user.login)
    }

    fn review_channel(&self) -> ReviewChannel<'_> {
        ReviewChannel::Atomic(self)
    }
}

#[async_trait]
impl AtomicReview for GitHubAdapter {
    #[instrument(skip(self, review), fields(pr = %review.pr, action = %review.action))]
    async fn post_review(&self, review: &Review) -> Result<(), ProviderError> {
        let response = self
            .client
            .post(format!("{}/reviews", self.pull_url(&review.pr)?))
            .json(&review_request(review))
            .send()
            .await?;
        ensure_success(response, ProviderKind::GitHub, &format!("submit review on {}", review.pr)).await?;
        debug!(comments = review.comments.len(), "review submitted");
        Ok(())
    }
}

fn review_event(action: ReviewAction) -> &'static str {
    match action {
        ReviewAction::Approve => "APPROVE",
        ReviewAction::RequestChanges => "REQUEST_CHANGES",
        ReviewAction::Comment => "COMMENT",
    }
}

fn side_name(side: CommentSide) -> &'static str {
    match side {
        CommentSide::Left => "LEFT",
        CommentSide::Right => "RIGHT",
    }
}

fn review_request(review: &Review) -> ReviewRequest<'_> {
    ReviewRequest {
        body: &review.body,
        event: review_event(review.action),
        comments: review
            .comments
            .iter()
            .map(|c| ReviewCommentRequest {
                path: &c.path,
                line: c.line,
                side: side_name(c.side),
                body: &c.body,
            })
            .collect(),
    }
}

fn pull_to_pull_request(pull: PullResponse, repository: &str, identity: &str) -> PullRequest {
    let reviewers: Vec<String> = pull
        .requested_reviewers
        .into_iter()
        .chain(pull.assignees)
        .map(|u| u.login)
        .collect();
    let status = if pull.merged || pull.merged_at.is_some() {
        PrStatus::Merged
    } else if pull.state == "closed" {
        PrStatus::Closed
    } else {
        PrStatus::Open
    };
    let mergeable = match pull.mergeable {
        Some(true) => Mergeability::Mergeable,
        Some(false) => Mergeability::Conflicting,
        None => Mergeability::Unknown,
    };

    PullRequest {
        id: PrId::new(ProviderKind::GitHub, repository, pull.number),
        title: pull.title,
        description: pull.body.unwrap_or_default(),
        category: PrCategory::classify(identity, &pull.user.login, &reviewers),
        author: pull.user.login,
        source_branch: pull.head.name,
        target_branch: pull.base.name,
        status,
        mergeable,
        created_at: pull.created_at,
        updated_at: pull.updated_at,
        url: pull.html_url,
        credential_id: None,
        credential_name: None,
    }
}

/// Search results carry no branch or mergeability data; those stay empty
/// until the pull request is fetched individually.
fn search_item_to_pull_request(item: SearchItem, identity: &str) -> Option<PullRequest> {
    let pull_ref = item.pull_request?;
    let repository = repository_from_api_url(&item.repository_url)?;
    let assignees: Vec<String> = item.assignees.into_iter().map(|u| u.login).collect();
    let status = if pull_ref.merged_at.is_some() {
        PrStatus::Merged
    } else if item.state == "closed" {
        PrStatus::Closed
    } else {
        PrStatus::Open
    };

    Some(PullRequest {
        id: PrId::new(ProviderKind::GitHub, repository, item.number),
        title: item.title,
        description: item.body.unwrap_or_default(),
        category: PrCategory::classify(identity, &item.user.login, &assignees),
        author: item.user.login,
        source_branch: String::new(),
        target_branch: String::new(),
        status,
        mergeable: Mergeability::Unknown,
        created_at: item.created_at,
        updated_at: item.updated_at,
        url: item.html_url,
        credential_id: None,
        credential_name: None,
    })
}

fn repository_from_api_url(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("/repos/")?;
    let mut parts = rest.trim_end_matches('/').splitn(2, '/');
    let owner = parts.next().filter(|s| !s.is_empty())?;
    let repo = parts.next().filter(|s| !s.is_empty() && !s.contains('/'))?;
    Some(format!("{owner}/{repo}"))
}

fn review_comment_to_comment(c: ReviewCommentResponse) -> Comment {
    let side = match c.side.as_deref() {
        Some("LEFT") => CommentSide::Left,
        _ => CommentSide::Right,
    };
    Comment {
        id: c.id.to_string(),
        author: c.user.login,
        body: c.body,
        path: Some(c.path),
        // Outdated comments lose `line` but keep where they were written
        line: c.line.or(c.original_line),
        side,
        created_at: c.created_at,
        updated_at: c.updated_at,
    }
}

fn issue_comment_to_comment(c: IssueCommentResponse) -> Comment {
    Comment {
        id: c.id.to_string(),
        author: c.user.login,
        body: c.body.unwrap_or_default(),
        path: None,
        line: None,
        side: CommentSide::Right,
        created_at: c.created_at,
        updated_at: c.updated_at,
    }
}
