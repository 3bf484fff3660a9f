pub mod azure;
pub mod github;
pub mod http;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::config::{Config, ConfigError};
use crate::credentials::{Credential, ProviderKind};
use crate::pr::{Comment, CommentSide, Diff, PrId, PullRequest, Review, ReviewAction};
use crate::review::{dispatch, ReviewError};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("{provider} rejected the credential: {message}")]
    AuthFailure {
        provider: ProviderKind,
        message: String,
    },

    #[error("{context} failed with status {status}. {message}")]
    Api {
        context: String,
        status: u16,
        message: String,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Uniform capability set over one backend, bound to one credential.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Open pull requests involving `identity`, categorised relative to it.
    async fn list_pull_requests(&self, identity: &str) -> Result<Vec<PullRequest>, ProviderError>;

    async fn get_pull_request(&self, id: &PrId) -> Result<PullRequest, ProviderError>;

    async fn get_diff(&self, id: &PrId) -> Result<Diff, ProviderError>;

    async fn get_comments(&self, id: &PrId) -> Result<Vec<Comment>, ProviderError>;

    /// General comment when `path`/`line` are absent, inline otherwise.
    async fn add_comment(
        &self,
        id: &PrId,
        body: &str,
        path: Option<&str>,
        line: Option<u32>,
    ) -> Result<(), ProviderError>;

    /// Check the token and return the login it authenticates as.
    async fn validate_credentials(&self) -> Result<String, ProviderError>;

    /// How this backend accepts reviews.
    fn review_channel(&self) -> ReviewChannel<'_>;

    /// Submit a review with this backend's native guarantee. No own-PR
    /// guard is applied here; see [`crate::review::ReviewSubmitter`].
    async fn submit_review(&self, review: &Review) -> Result<(), ReviewError> {
        dispatch(self.review_channel(), review).await
    }
}

/// Review capability of a backend.
pub enum ReviewChannel<'a> {
    /// Action, body and inline comments land in one call, or not at all
    Atomic(&'a dyn AtomicReview),
    /// Comment threads and the vote are separate calls
    BestEffort(&'a dyn ThreadedReview),
}

#[async_trait]
pub trait AtomicReview: Send + Sync {
    async fn post_review(&self, review: &Review) -> Result<(), ProviderError>;
}

/// Where a new comment thread is anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadTarget<'a> {
    General,
    Inline {
        path: &'a str,
        line: u32,
        side: CommentSide,
    },
}

/// Handle to a created thread, enough to remove it again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadRef {
    pub thread_id: i64,
    pub comment_id: i64,
}

#[async_trait]
pub trait ThreadedReview: Send + Sync {
    async fn create_thread(
        &self,
        pr: &PrId,
        body: &str,
        target: ThreadTarget<'_>,
    ) -> Result<ThreadRef, ProviderError>;

    async fn delete_thread(&self, pr: &PrId, thread: &ThreadRef) -> Result<(), ProviderError>;

    async fn cast_vote(&self, pr: &PrId, action: ReviewAction) -> Result<(), ProviderError>;
}

/// Builds the adapter for a credential.
pub trait AdapterFactory: Send + Sync {
    fn adapter_for(&self, credential: &Credential) -> Result<Arc<dyn ProviderAdapter>, ProviderError>;
}

/// Factory for the real HTTP adapters. Adapters are kept per credential so
/// the Azure DevOps repository cache outlives a single listing.
pub struct HttpAdapterFactory {
    config: Config,
    adapters: Mutex<HashMap<String, Arc<dyn ProviderAdapter>>>,
}

impl HttpAdapterFactory {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            adapters: Mutex::new(HashMap::new()),
        }
    }
}

impl AdapterFactory for HttpAdapterFactory {
    fn adapter_for(&self, credential: &Credential) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        let mut adapters = self.adapters.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(adapter) = adapters.get(&credential.id) {
            return Ok(adapter.clone());
        }

        let token = credential
            .token
            .as_deref()
            .ok_or_else(|| ConfigError::MissingToken(credential.id.clone()))?;

        debug!(credential = %credential.id, provider = credential.provider.as_str(), "building adapter");
        let adapter: Arc<dyn ProviderAdapter> = match credential.provider {
            ProviderKind::GitHub => Arc::new(github::GitHubAdapter::new(
                &self.config.github,
                token,
                &credential.username,
            )?),
            ProviderKind::AzureDevOps => {
                let organization = credential
                    .organization
                    .as_deref()
                    .ok_or_else(|| ConfigError::MissingOrganization(credential.id.clone()))?;
                Arc::new(azure::AzureDevOpsAdapter::new(
                    &self.config.azure,
                    self.config.resolver.ttl(),
                    organization,
                    token,
                    &credential.username,
                )?)
            }
        };

        adapters.insert(credential.id.clone(), adapter.clone());
        Ok(adapter)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::credentials::tests::credential;
    use crate::pr::{Mergeability, PrCategory, PrStatus};
    use chrono::{TimeZone, Utc};

    /// Build a minimal open pull request for tests.
    pub fn sample_pull_request(provider: ProviderKind, number: u64, author: &str) -> PullRequest {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        PullRequest {
            id: PrId::new(provider, "org/repo", number),
            title: format!("PR {number}"),
            description: String::new(),
            author: author.to_string(),
            source_branch: "feature".to_string(),
            target_branch: "main".to_string(),
            status: PrStatus::Open,
            category: PrCategory::Other,
            mergeable: Mergeability::Unknown,
            created_at: at,
            updated_at: at,
            url: String::new(),
            credential_id: None,
            credential_name: None,
        }
    }

    /// Adapter serving canned pull requests, recording posted reviews.
    pub struct FakeAdapter {
        pub kind: ProviderKind,
        pub pull_requests: Vec<PullRequest>,
        pub fail_listing: bool,
        pub posted: Mutex<Vec<Review>>,
    }

    impl FakeAdapter {
        pub fn new(kind: ProviderKind, pull_requests: Vec<PullRequest>) -> Self {
            Self {
                kind,
                pull_requests,
                fail_listing: false,
                posted: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(kind: ProviderKind) -> Self {
            Self {
                fail_listing: true,
                ..Self::new(kind, Vec::new())
            }
        }
    }

    #[async_trait]
    impl ProviderAdapter for FakeAdapter {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        async fn list_pull_requests(&self, _identity: &str) -> Result<Vec<PullRequest>, ProviderError> {
            if self.fail_listing {
                return Err(ProviderError::AuthFailure {
                    provider: self.kind,
                    message: "token expired".to_string(),
                });
            }
            Ok(self.pull_requests.clone())
        }

        async fn get_pull_request(&self, id: &PrId) -> Result<PullRequest, ProviderError> {
            self.pull_requests
                .iter()
                .find(|pr| &pr.id == id)
                .cloned()
                .ok_or_else(|| ProviderError::NotFound { what: id.to_string() })
        }

        async fn get_diff(&self, _id: &PrId) -> Result<Diff, ProviderError> {
            Ok(Diff::default())
        }

        async fn get_comments(&self, _id: &PrId) -> Result<Vec<Comment>, ProviderError> {
            Ok(Vec::new())
        }

        async fn add_comment(
            &self,
            _id: &PrId,
            _body: &str,
            _path: Option<&str>,
            _line: Option<u32>,
        ) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn validate_credentials(&self) -> Result<String, ProviderError> {
            Ok("fake".to_string())
        }

        fn review_channel(&self) -> ReviewChannel<'_> {
            ReviewChannel::Atomic(self)
        }
    }

    #[async_trait]
    impl AtomicReview for FakeAdapter {
        async fn post_review(&self, review: &Review) -> Result<(), ProviderError> {
            self.posted.lock().unwrap().push(review.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_default_submit_review_uses_channel() {
        let adapter = FakeAdapter::new(ProviderKind::GitHub, Vec::new());
        let review = Review {
            pr: PrId::new(ProviderKind::GitHub, "org/repo", 1),
            action: ReviewAction::Approve,
            body: "lgtm".to_string(),
            comments: Vec::new(),
        };
        adapter.submit_review(&review).await.unwrap();
        let posted = adapter.posted.lock().unwrap();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].action, ReviewAction::Approve);
    }

    #[test]
    fn test_factory_reuses_adapter_per_credential() {
        let factory = HttpAdapterFactory::new(Config::default());
        let cred = credential("gh", ProviderKind::GitHub, "alice");
        let first = factory.adapter_for(&cred).unwrap();
        let second = factory.adapter_for(&cred).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.kind(), ProviderKind::GitHub);
    }

    #[test]
    fn test_factory_requires_token() {
        let factory = HttpAdapterFactory::new(Config::default());
        let mut cred = credential("gh", ProviderKind::GitHub, "alice");
        cred.token = None;
        assert!(matches!(
            factory.adapter_for(&cred),
            Err(ProviderError::Config(ConfigError::MissingToken(_)))
        ));
    }

    #[test]
    fn test_factory_requires_azure_organization() {
        let factory = HttpAdapterFactory::new(Config::default());
        let cred = credential("ado", ProviderKind::AzureDevOps, "alice@contoso.com");
        assert!(matches!(
            factory.adapter_for(&cred),
            Err(ProviderError::Config(ConfigError::MissingOrganization(_)))
        ));

        let mut with_org = cred.clone();
        with_org.organization = Some("https://dev.azure.com/contoso/".to_string());
        let adapter = factory.adapter_for(&with_org).unwrap();
        assert_eq!(adapter.kind(), ProviderKind::AzureDevOps);
    }
}
