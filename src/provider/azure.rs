use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use similar::TextDiff;
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};

use super::http::{build_client, ensure_success};
use super::{ProviderAdapter, ProviderError, ReviewChannel, ThreadRef, ThreadTarget, ThreadedReview};
use crate::config::AzureConfig;
use crate::credentials::ProviderKind;
use crate::pr::{
    parse_diff, Comment, CommentSide, Diff, Mergeability, PrCategory, PrId, PrStatus, PullRequest,
    ReviewAction,
};
use crate::resolver::{NamedId, RepositoryDirectory, RepositoryResolver};

const CONTEXT_LINES: usize = 3;

/// Thin REST client scoped to one organization.
#[derive(Clone)]
pub struct AzureApi {
    client: reqwest::Client,
    org_url: String,
    api_version: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct NamedEntity {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityRef {
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    unique_name: String,
}

#[derive(Debug, Deserialize)]
struct RepositoryRef {
    name: String,
    project: ProjectRef,
}

#[derive(Debug, Deserialize)]
struct ProjectRef {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Reviewer {
    #[serde(default)]
    unique_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzurePullRequest {
    pull_request_id: u64,
    title: String,
    description: Option<String>,
    created_by: IdentityRef,
    creation_date: DateTime<Utc>,
    closed_date: Option<DateTime<Utc>>,
    status: String,
    source_ref_name: String,
    target_ref_name: String,
    merge_status: Option<String>,
    repository: RepositoryRef,
    #[serde(default)]
    reviewers: Vec<Reviewer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitRef {
    commit_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Iteration {
    id: u64,
    source_ref_commit: Option<CommitRef>,
    target_ref_commit: Option<CommitRef>,
    common_ref_commit: Option<CommitRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IterationChanges {
    #[serde(default)]
    change_entries: Vec<ChangeEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeEntry {
    change_type: String,
    item: ChangeItem,
    original_path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeItem {
    path: Option<String>,
    #[serde(default)]
    is_folder: bool,
}

#[derive(Debug, Deserialize)]
struct ItemContent {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Thread {
    id: i64,
    thread_context: Option<ThreadContext>,
    #[serde(default)]
    comments: Vec<ThreadComment>,
    #[serde(default)]
    is_deleted: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadContext {
    file_path: Option<String>,
    right_file_start: Option<FilePosition>,
    left_file_start: Option<FilePosition>,
}

#[derive(Debug, Deserialize)]
struct FilePosition {
    line: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadComment {
    id: i64,
    author: IdentityRef,
    content: Option<String>,
    published_date: DateTime<Utc>,
    last_updated_date: Option<DateTime<Utc>>,
    comment_type: Option<String>,
    #[serde(default)]
    is_deleted: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionData {
    authenticated_user: AuthenticatedUser,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthenticatedUser {
    id: String,
    #[serde(default)]
    provider_display_name: String,
    #[serde(default)]
    properties: Value,
}

impl AuthenticatedUser {
    /// Account name (usually the sign-in email), falling back to the display name.
    fn account(&self) -> &str {
        self.properties
            .pointer("/Account/$value")
            .and_then(Value::as_str)
            .unwrap_or(&self.provider_display_name)
    }
}

impl AzureApi {
    pub fn new(config: &AzureConfig, organization: &str, token: &str) -> Result<Self, ProviderError> {
        let basic = STANDARD.encode(format!(":{token}"));
        let client = build_client(&format!("Basic {basic}"), "application/json")?;
        Ok(Self {
            client,
            org_url: organization.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.org_url, path.trim_start_matches('/'))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        context: &str,
    ) -> Result<T, ProviderError> {
        let response = self
            .client
            .get(url)
            .query(&[("api-version", self.api_version.as_str())])
            .query(query)
            .send()
            .await?;
        let response = ensure_success(response, ProviderKind::AzureDevOps, context).await?;
        Ok(response.json::<T>().await?)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        body: &Value,
        context: &str,
    ) -> Result<T, ProviderError> {
        let response = request
            .query(&[("api-version", self.api_version.as_str())])
            .json(body)
            .send()
            .await?;
        let response = ensure_success(response, ProviderKind::AzureDevOps, context).await?;
        Ok(response.json::<T>().await?)
    }

    async fn connection_data(&self) -> Result<AuthenticatedUser, ProviderError> {
        let response = self.client.get(self.url("_apis/connectionData")).send().await?;
        let data = ensure_success(response, ProviderKind::AzureDevOps, "fetch connection data")
            .await?
            .json::<ConnectionData>()
            .await?;
        Ok(data.authenticated_user)
    }
}

#[async_trait]
impl RepositoryDirectory for AzureApi {
    async fn list_projects(&self) -> Result<Vec<NamedId>, ProviderError> {
        let projects: ListResponse<NamedEntity> = self
            .get_json(&self.url("_apis/projects"), &[("$top", "500")], "list projects")
            .await?;
        Ok(projects.value.into_iter().map(named_id).collect())
    }

    async fn list_repositories(&self, project_id: &str) -> Result<Vec<NamedId>, ProviderError> {
        let repos: ListResponse<NamedEntity> = self
            .get_json(
                &self.url(&format!("{project_id}/_apis/git/repositories")),
                &[],
                "list repositories",
            )
            .await?;
        Ok(repos.value.into_iter().map(named_id).collect())
    }
}

fn named_id(entity: NamedEntity) -> NamedId {
    NamedId {
        id: entity.id,
        name: entity.name,
    }
}

/// Azure DevOps adapter. Reviews are best-effort: each comment is its own
/// thread and the vote is a separate call.
pub struct AzureDevOpsAdapter {
    api: AzureApi,
    resolver: RepositoryResolver<AzureApi>,
    username: String,
    reviewer_id: OnceCell<String>,
}

impl AzureDevOpsAdapter {
    pub fn new(
        config: &AzureConfig,
        ttl: Duration,
        organization: &str,
        token: &str,
        username: &str,
    ) -> Result<Self, ProviderError> {
        let api = AzureApi::new(config, organization, token)?;
        Ok(Self {
            resolver: RepositoryResolver::new(api.clone(), ttl),
            api,
            username: username.to_string(),
            reviewer_id: OnceCell::new(),
        })
    }

    /// `{org}/{project_id}/_apis/git/repositories/{repo_id}`
    async fn repository_url(&self, repository: &str) -> Result<String, ProviderError> {
        let (project_id, repo_id) = self.resolver.resolve(repository).await?;
        Ok(self
            .api
            .url(&format!("{project_id}/_apis/git/repositories/{repo_id}")))
    }

    async fn pull_url(&self, id: &PrId) -> Result<String, ProviderError> {
        Ok(format!(
            "{}/pullrequests/{}",
            self.repository_url(&id.repository).await?,
            id.number
        ))
    }

    async fn reviewer_id(&self) -> Result<&str, ProviderError> {
        let id = self
            .reviewer_id
            .get_or_try_init(|| async { self.api.connection_data().await.map(|user| user.id) })
            .await?;
        Ok(id.as_str())
    }

    async fn file_content(
        &self,
        repository_url: &str,
        path: &str,
        commit: &str,
    ) -> Result<String, ProviderError> {
        let item: ItemContent = self
            .api
            .get_json(
                &format!("{repository_url}/items"),
                &[
                    ("path", path),
                    ("versionDescriptor.version", commit),
                    ("versionDescriptor.versionType", "commit"),
                    ("includeContent", "true"),
                ],
                &format!("fetch {path}@{commit}"),
            )
            .await?;
        Ok(item.content)
    }
}

#[async_trait]
impl ProviderAdapter for AzureDevOpsAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::AzureDevOps
    }

    #[instrument(skip(self))]
    async fn list_pull_requests(&self, identity: &str) -> Result<Vec<PullRequest>, ProviderError> {
        let projects = self.api.list_projects().await?;
        let mut pull_requests = Vec::new();

        for project in projects {
            let listed: ListResponse<AzurePullRequest> = self
                .api
                .get_json(
                    &self.api.url(&format!("{}/_apis/git/pullrequests", project.id)),
                    &[("searchCriteria.status", "active"), ("$top", "200")],
                    &format!("list pull requests in {}", project.name),
                )
                .await?;
            debug!(project = %project.name, count = listed.value.len(), "listed project pull requests");
            pull_requests.extend(
                listed
                    .value
                    .into_iter()
                    .map(|pr| to_pull_request(pr, &self.api.org_url, identity)),
            );
        }

        Ok(pull_requests)
    }

    #[instrument(skip(self), fields(pr = %id))]
    async fn get_pull_request(&self, id: &PrId) -> Result<PullRequest, ProviderError> {
        let pr: AzurePullRequest = self
            .api
            .get_json(&self.pull_url(id).await?, &[], &format!("get pull request {id}"))
            .await?;
        Ok(to_pull_request(pr, &self.api.org_url, &self.username))
    }

    /// Azure DevOps has no textual diff endpoint: the latest iteration's
    /// changes are rendered into a unified diff and parsed like any other.
    #[instrument(skip(self), fields(pr = %id))]
    async fn get_diff(&self, id: &PrId) -> Result<Diff, ProviderError> {
        let repository_url = self.repository_url(&id.repository).await?;
        let pull_url = format!("{repository_url}/pullrequests/{}", id.number);

        let iterations: ListResponse<Iteration> = self
            .api
            .get_json(&format!("{pull_url}/iterations"), &[], "list iterations")
            .await?;
        let Some(latest) = iterations.value.into_iter().max_by_key(|i| i.id) else {
            return Ok(Diff::default());
        };
        let target = latest
            .source_ref_commit
            .map(|c| c.commit_id)
            .ok_or_else(|| ProviderError::NotFound {
                what: format!("source commit of iteration {}", latest.id),
            })?;
        let base = latest
            .common_ref_commit
            .or(latest.target_ref_commit)
            .map(|c| c.commit_id)
            .ok_or_else(|| ProviderError::NotFound {
                what: format!("base commit of iteration {}", latest.id),
            })?;

        let changes: IterationChanges = self
            .api
            .get_json(
                &format!("{pull_url}/iterations/{}/changes", latest.id),
                &[("$top", "2000")],
                "list iteration changes",
            )
            .await?;

        let mut text = String::new();
        for change in changes.change_entries {
            let Some((old_path, new_path)) = change_paths(&change) else {
                continue;
            };
            let old = match old_path.as_deref() {
                Some(path) => self.file_content(&repository_url, path, &base).await?,
                None => String::new(),
            };
            let new = match new_path.as_deref() {
                Some(path) => self.file_content(&repository_url, path, &target).await?,
                None => String::new(),
            };
            text.push_str(&render_file_diff(old_path.as_deref(), new_path.as_deref(), &old, &new));
        }

        debug!(diff_bytes = text.len(), "rendered iteration diff");
        Ok(parse_diff(&text))
    }

    #[instrument(skip(self), fields(pr = %id))]
    async fn get_comments(&self, id: &PrId) -> Result<Vec<Comment>, ProviderError> {
        let threads: ListResponse<Thread> = self
            .api
            .get_json(&format!("{}/threads", self.pull_url(id).await?), &[], "list threads")
            .await?;
        let mut comments: Vec<Comment> = threads.value.into_iter().flat_map(thread_comments).collect();
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
        let target = match (path, line) {
            (Some(path), Some(line)) => ThreadTarget::Inline {
                path,
                line,
                side: CommentSide::Right,
            },
            (None, None) => ThreadTarget::General,
            _ => {
                return Err(ProviderError::InvalidRequest(
                    "inline comments need both a path and a line".to_string(),
                ))
            }
        };
        self.create_thread(id, body, target).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn validate_credentials(&self) -> Result<String, ProviderError> {
        let user = self.api.connection_data().await?;
        let account = user.account().to_string();
        if !account.eq_ignore_ascii_case(&self.username) {
            warn!(configured = %self.username, actual = %account, "token belongs to a different user");
        }
        // Seed the reviewer id so a later vote does not ask again
        let _ = self.reviewer_id.set(user.id);
        Ok(account)
    }

    fn review_channel(&self) -> ReviewChannel<'_> {
        ReviewChannel::BestEffort(self)
    }
}

#[async_trait]
impl ThreadedReview for AzureDevOpsAdapter {
    #[instrument(skip(self, body), fields(pr = %pr))]
    async fn create_thread(
        &self,
        pr: &PrId,
        body: &str,
        target: ThreadTarget<'_>,
    ) -> Result<ThreadRef, ProviderError> {
        let url = format!("{}/threads", self.pull_url(pr).await?);
        let thread: Thread = self
            .api
            .send_json(self.api.client.post(url), &thread_body(body, target), "create thread")
            .await?;
        let comment_id = thread.comments.first().map(|c| c.id).unwrap_or(1);
        debug!(thread_id = thread.id, "thread created");
        Ok(ThreadRef {
            thread_id: thread.id,
            comment_id,
        })
    }

    #[instrument(skip(self), fields(pr = %pr))]
    async fn delete_thread(&self, pr: &PrId, thread: &ThreadRef) -> Result<(), ProviderError> {
        let url = format!(
            "{}/threads/{}/comments/{}",
            self.pull_url(pr).await?,
            thread.thread_id,
            thread.comment_id
        );
        let response = self
            .api
            .client
            .delete(url)
            .query(&[("api-version", self.api.api_version.as_str())])
            .send()
            .await?;
        ensure_success(response, ProviderKind::AzureDevOps, "delete thread comment").await?;
        Ok(())
    }

    #[instrument(skip(self), fields(pr = %pr))]
    async fn cast_vote(&self, pr: &PrId, action: ReviewAction) -> Result<(), ProviderError> {
        let Some(vote) = vote_value(action) else {
            // A plain comment carries no vote; sending 0 would reset an earlier one
            return Ok(());
        };
        let reviewer_id = self.reviewer_id().await?.to_string();
        let url = format!("{}/reviewers/{reviewer_id}", self.pull_url(pr).await?);
        let _: Value = self
            .api
            .send_json(self.api.client.put(url), &json!({ "vote": vote }), "cast vote")
            .await?;
        Ok(())
    }
}

/// 10 approves, -5 is "waiting for author".
fn vote_value(action: ReviewAction) -> Option<i32> {
    match action {
        ReviewAction::Approve => Some(10),
        ReviewAction::RequestChanges => Some(-5),
        ReviewAction::Comment => None,
    }
}

fn thread_body(body: &str, target: ThreadTarget<'_>) -> Value {
    let mut thread = json!({
        "comments": [{ "parentCommentId": 0, "content": body, "commentType": 1 }],
        "status": 1,
    });
    if let ThreadTarget::Inline { path, line, side } = target {
        let position = json!({ "line": line, "offset": 1 });
        let (start, end) = match side {
            CommentSide::Left => ("leftFileStart", "leftFileEnd"),
            CommentSide::Right => ("rightFileStart", "rightFileEnd"),
        };
        let mut context = serde_json::Map::new();
        context.insert("filePath".to_string(), json!(format!("/{}", path.trim_start_matches('/'))));
        context.insert(start.to_string(), position.clone());
        context.insert(end.to_string(), position);
        thread["threadContext"] = Value::Object(context);
    }
    thread
}

fn to_pull_request(pr: AzurePullRequest, org_url: &str, identity: &str) -> PullRequest {
    let reviewers: Vec<String> = pr.reviewers.into_iter().map(|r| r.unique_name).collect();
    let status = match pr.status.as_str() {
        "completed" => PrStatus::Merged,
        "abandoned" => PrStatus::Closed,
        _ => PrStatus::Open,
    };
    let mergeable = match pr.merge_status.as_deref() {
        Some("succeeded") => Mergeability::Mergeable,
        Some("conflicts") => Mergeability::Conflicting,
        _ => Mergeability::Unknown,
    };
    let project = pr.repository.project.name;
    let repo = pr.repository.name;
    let author = if pr.created_by.unique_name.is_empty() {
        pr.created_by.display_name
    } else {
        pr.created_by.unique_name
    };

    PullRequest {
        id: PrId::new(ProviderKind::AzureDevOps, format!("{project}/{repo}"), pr.pull_request_id),
        title: pr.title,
        description: pr.description.unwrap_or_default(),
        category: PrCategory::classify(identity, &author, &reviewers),
        author,
        source_branch: strip_ref(&pr.source_ref_name),
        target_branch: strip_ref(&pr.target_ref_name),
        status,
        mergeable,
        created_at: pr.creation_date,
        updated_at: pr.closed_date.unwrap_or(pr.creation_date),
        url: format!("{org_url}/{project}/_git/{repo}/pullrequest/{}", pr.pull_request_id),
        credential_id: None,
        credential_name: None,
    }
}

fn strip_ref(name: &str) -> String {
    name.strip_prefix("refs/heads/").unwrap_or(name).to_string()
}

/// Old and new repository paths of a change, `None` on the side where the
/// file does not exist. Folders yield nothing.
fn change_paths(change: &ChangeEntry) -> Option<(Option<String>, Option<String>)> {
    if change.item.is_folder {
        return None;
    }
    let path = change.item.path.clone()?;
    let kind = change.change_type.to_ascii_lowercase();
    if kind.contains("add") {
        Some((None, Some(path)))
    } else if kind.contains("delete") {
        Some((Some(path), None))
    } else {
        let old = change.original_path.clone().unwrap_or_else(|| path.clone());
        Some((Some(old), Some(path)))
    }
}

fn render_file_diff(old_path: Option<&str>, new_path: Option<&str>, old: &str, new: &str) -> String {
    let clean = |p: &str| p.trim_start_matches('/').to_string();
    let old_clean = old_path.map(clean);
    let new_clean = new_path.map(clean);
    let header_old = old_clean.clone().or_else(|| new_clean.clone()).unwrap_or_default();
    let header_new = new_clean.clone().or_else(|| old_clean.clone()).unwrap_or_default();

    let mut out = format!("diff --git a/{header_old} b/{header_new}\n");
    let marker_old = old_clean.map_or_else(|| "/dev/null".to_string(), |p| format!("a/{p}"));
    let marker_new = new_clean.map_or_else(|| "/dev/null".to_string(), |p| format!("b/{p}"));

    let text_diff = TextDiff::from_lines(old, new);
    out.push_str(
        &text_diff
            .unified_diff()
            .context_radius(CONTEXT_LINES)
            .header(&marker_old, &marker_new)
            .to_string(),
    );
    out
}

fn thread_comments(thread: Thread) -> Vec<Comment> {
    if thread.is_deleted {
        return Vec::new();
    }
    let (path, line, side) = match &thread.thread_context {
        Some(ctx) => {
            let path = ctx
                .file_path
                .as_deref()
                .map(|p| p.trim_start_matches('/').to_string());
            match (&ctx.right_file_start, &ctx.left_file_start) {
                (Some(right), _) => (path, Some(right.line), CommentSide::Right),
                (None, Some(left)) => (path, Some(left.line), CommentSide::Left),
                (None, None) => (path, None, CommentSide::Right),
            }
        }
        None => (None, None, CommentSide::Right),
    };

    thread
        .comments
        .into_iter()
        .filter(|c| !c.is_deleted && c.comment_type.as_deref() != Some("system"))
        .map(|c| Comment {
            id: format!("{}:{}", thread.id, c.id),
            author: if c.author.unique_name.is_empty() {
                c.author.display_name
            } else {
                c.author.unique_name
            },
            body: c.content.unwrap_or_default(),
            path: path.clone(),
            line,
            side,
            created_at: c.published_date,
            updated_at: c.last_updated_date,
        })
        .collect()
}
