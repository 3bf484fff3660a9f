pub mod types;

pub use types::{CleanupStatus, ReviewError, Submitted};

use tracing::{debug, info, instrument, warn};

use crate::pr::{PullRequest, Review, ReviewAction};
use crate::provider::{
    AtomicReview, ProviderAdapter, ProviderError, ReviewChannel, ThreadRef, ThreadTarget,
    ThreadedReview,
};

/// Submits reviews, applying the own-PR guard before handing the review to
/// the backend's native submission model.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReviewSubmitter;

impl ReviewSubmitter {
    pub fn new() -> Self {
        Self
    }

    /// Submit `review` on `pr` through `adapter`, acting as `identity`
    /// (the username of the credential the pull request was fetched with).
    #[instrument(skip_all, fields(pr = %review.pr, action = %review.action))]
    pub async fn submit(
        &self,
        adapter: &dyn ProviderAdapter,
        pr: &PullRequest,
        identity: &str,
        mut review: Review,
    ) -> Result<Submitted, ReviewError> {
        let downgraded = apply_own_pr_guard(&mut review, identity, &pr.author);
        if downgraded {
            info!(author = %pr.author, "own pull request, submitting as a comment");
        }

        adapter.submit_review(&review).await?;
        Ok(Submitted {
            action: review.action,
            downgraded,
        })
    }
}

/// Backends refuse a verdict on one's own pull request; turn it into a
/// comment rather than send a request that is certain to fail.
/// Returns whether the action was changed.
pub fn apply_own_pr_guard(review: &mut Review, identity: &str, author: &str) -> bool {
    if review.action.is_verdict() && !identity.is_empty() && identity.eq_ignore_ascii_case(author) {
        review.action = ReviewAction::Comment;
        return true;
    }
    false
}

/// Run `review` through a backend's review channel.
pub async fn dispatch(channel: ReviewChannel<'_>, review: &Review) -> Result<(), ReviewError> {
    validate(review)?;
    match channel {
        ReviewChannel::Atomic(backend) => submit_atomic(backend, review).await,
        ReviewChannel::BestEffort(backend) => submit_best_effort(backend, review).await,
    }
}

/// Reject reviews that carry nothing, and inline comments that cannot be
/// anchored, before touching the network.
fn validate(review: &Review) -> Result<(), ReviewError> {
    if review.action == ReviewAction::Comment
        && review.body.trim().is_empty()
        && review.comments.is_empty()
    {
        return Err(ReviewError::FullyRejected {
            source: ProviderError::InvalidRequest(
                "a comment review needs a body or at least one inline comment".to_string(),
            ),
        });
    }
    for comment in &review.comments {
        if comment.path.trim().is_empty() || comment.line == 0 {
            return Err(ReviewError::FullyRejected {
                source: ProviderError::InvalidRequest(format!(
                    "inline comment needs a file path and a line number >= 1 (got `{}`:{})",
                    comment.path, comment.line
                )),
            });
        }
    }
    Ok(())
}

async fn submit_atomic(backend: &dyn AtomicReview, review: &Review) -> Result<(), ReviewError> {
    backend
        .post_review(review)
        .await
        .map_err(|source| ReviewError::FullyRejected { source })
}

/// Threads first, in order, then the vote. Anything that fails after the
/// first thread landed is rolled back as far as possible and reported as
/// partially applied.
async fn submit_best_effort(backend: &dyn ThreadedReview, review: &Review) -> Result<(), ReviewError> {
    let mut created: Vec<ThreadRef> = Vec::new();

    let mut threads: Vec<(&str, ThreadTarget<'_>)> = Vec::new();
    if !review.body.trim().is_empty() {
        threads.push((review.body.as_str(), ThreadTarget::General));
    }
    for comment in &review.comments {
        threads.push((
            comment.body.as_str(),
            ThreadTarget::Inline {
                path: comment.path.as_str(),
                line: comment.line,
                side: comment.side,
            },
        ));
    }

    for (body, target) in threads {
        match backend.create_thread(&review.pr, body, target).await {
            Ok(thread) => created.push(thread),
            Err(source) if created.is_empty() => return Err(ReviewError::FullyRejected { source }),
            Err(source) => {
                let step = format!("Creating comment thread {} failed", created.len() + 1);
                return Err(roll_back(backend, review, &created, &step, source).await);
            }
        }
    }
    debug!(threads = created.len(), "comment threads created");

    if let Err(source) = backend.cast_vote(&review.pr, review.action).await {
        if created.is_empty() {
            return Err(ReviewError::FullyRejected { source });
        }
        return Err(roll_back(backend, review, &created, "Submitting the vote failed", source).await);
    }

    Ok(())
}

async fn roll_back(
    backend: &dyn ThreadedReview,
    review: &Review,
    created: &[ThreadRef],
    step: &str,
    source: ProviderError,
) -> ReviewError {
    warn!(error = %source, threads = created.len(), "review step failed, removing created threads");

    let mut failures = Vec::new();
    for thread in created {
        if let Err(err) = backend.delete_thread(&review.pr, thread).await {
            warn!(thread_id = thread.thread_id, error = %err, "failed to remove thread");
            failures.push(format!("thread {}: {err}", thread.thread_id));
        }
    }

    let cleanup = if failures.is_empty() {
        CleanupStatus::RolledBack {
            removed: created.len(),
        }
    } else {
        CleanupStatus::Failed {
            removed: created.len() - failures.len(),
            remaining: failures.len(),
            errors: failures,
        }
    };

    let message = match &cleanup {
        CleanupStatus::RolledBack { removed } => format!(
            "{step}: {source}. The {removed} comment thread(s) already created were removed; \
             nothing remains on the pull request."
        ),
        CleanupStatus::Failed {
            remaining, errors, ..
        } => format!(
            "{step}: {source}. Cleanup failed for {remaining} comment thread(s) ({}); \
             remove them manually.",
            errors.join("; ")
        ),
    };

    ReviewError::PartiallyApplied { message, cleanup }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::ProviderKind;
    use crate::pr::{CommentSide, PendingComment, PrId};
    use crate::provider::tests::{sample_pull_request, FakeAdapter};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Post(ReviewAction, usize),
        Create(String),
        Delete(i64),
        Vote(ReviewAction),
    }

    /// Scriptable backend that records every call it receives.
    #[derive(Default)]
    struct FakeBackend {
        calls: Mutex<Vec<Call>>,
        fail_post: bool,
        fail_create_at: Option<usize>,
        fail_vote: bool,
        fail_delete: bool,
    }

    impl FakeBackend {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn api_error(what: &str) -> ProviderError {
            ProviderError::Api {
                context: what.to_string(),
                status: 500,
                message: "boom".to_string(),
            }
        }
    }

    #[async_trait]
    impl AtomicReview for FakeBackend {
        async fn post_review(&self, review: &Review) -> Result<(), ProviderError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Post(review.action, review.comments.len()));
            if self.fail_post {
                return Err(Self::api_error("post review"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ThreadedReview for FakeBackend {
        async fn create_thread(
            &self,
            _pr: &PrId,
            body: &str,
            _target: ThreadTarget<'_>,
        ) -> Result<ThreadRef, ProviderError> {
            let mut calls = self.calls.lock().unwrap();
            let index = calls.iter().filter(|c| matches!(c, Call::Create(_))).count();
            calls.push(Call::Create(body.to_string()));
            if self.fail_create_at == Some(index) {
                return Err(Self::api_error("create thread"));
            }
            Ok(ThreadRef {
                thread_id: index as i64 + 100,
                comment_id: 1,
            })
        }

        async fn delete_thread(&self, _pr: &PrId, thread: &ThreadRef) -> Result<(), ProviderError> {
            self.calls.lock().unwrap().push(Call::Delete(thread.thread_id));
            if self.fail_delete {
                return Err(Self::api_error("delete thread"));
            }
            Ok(())
        }

        async fn cast_vote(&self, _pr: &PrId, action: ReviewAction) -> Result<(), ProviderError> {
            self.calls.lock().unwrap().push(Call::Vote(action));
            if self.fail_vote {
                return Err(Self::api_error("vote"));
            }
            Ok(())
        }
    }

    fn review(action: ReviewAction, body: &str, inline: usize) -> Review {
        Review {
            pr: PrId::new(ProviderKind::AzureDevOps, "Platform/api", 5),
            action,
            body: body.to_string(),
            comments: (0..inline)
                .map(|i| PendingComment {
                    body: format!("inline {i}"),
                    path: "src/lib.rs".to_string(),
                    line: i as u32 + 1,
                    side: CommentSide::Right,
                })
                .collect(),
        }
    }

    #[test]
    fn test_own_pr_guard_downgrades_verdicts() {
        let mut approve = review(ReviewAction::Approve, "lgtm", 0);
        assert!(apply_own_pr_guard(&mut approve, "Alice", "alice"));
        assert_eq!(approve.action, ReviewAction::Comment);

        let mut reject = review(ReviewAction::RequestChanges, "", 0);
        assert!(apply_own_pr_guard(&mut reject, "alice", "alice"));
        assert_eq!(reject.action, ReviewAction::Comment);

        let mut other = review(ReviewAction::Approve, "", 0);
        assert!(!apply_own_pr_guard(&mut other, "bob", "alice"));
        assert_eq!(other.action, ReviewAction::Approve);

        let mut comment = review(ReviewAction::Comment, "", 0);
        assert!(!apply_own_pr_guard(&mut comment, "alice", "alice"));
    }

    #[tokio::test]
    async fn test_atomic_success_sends_one_call() {
        let backend = FakeBackend::default();
        dispatch(ReviewChannel::Atomic(&backend), &review(ReviewAction::Approve, "lgtm", 2))
            .await
            .unwrap();
        assert_eq!(backend.calls(), vec![Call::Post(ReviewAction::Approve, 2)]);
    }

    #[tokio::test]
    async fn test_atomic_failure_is_fully_rejected() {
        let backend = FakeBackend {
            fail_post: true,
            ..FakeBackend::default()
        };
        let err = dispatch(ReviewChannel::Atomic(&backend), &review(ReviewAction::Approve, "", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::FullyRejected { .. }));
        assert!(!err.has_remote_effects());
    }

    #[tokio::test]
    async fn test_best_effort_creates_threads_before_vote() {
        let backend = FakeBackend::default();
        dispatch(
            ReviewChannel::BestEffort(&backend),
            &review(ReviewAction::Approve, "summary", 2),
        )
        .await
        .unwrap();
        assert_eq!(
            backend.calls(),
            vec![
                Call::Create("summary".to_string()),
                Call::Create("inline 0".to_string()),
                Call::Create("inline 1".to_string()),
                Call::Vote(ReviewAction::Approve),
            ]
        );
    }

    #[tokio::test]
    async fn test_vote_failure_rolls_back_and_reports_partial() {
        let backend = FakeBackend {
            fail_vote: true,
            ..FakeBackend::default()
        };
        let err = dispatch(
            ReviewChannel::BestEffort(&backend),
            &review(ReviewAction::Approve, "", 2),
        )
        .await
        .unwrap_err();

        match &err {
            ReviewError::PartiallyApplied { message, cleanup } => {
                assert_eq!(*cleanup, CleanupStatus::RolledBack { removed: 2 });
                assert!(message.contains("were removed"));
                assert!(message.contains("Submitting the vote failed"));
            }
            other => panic!("expected partial application, got {other:?}"),
        }
        assert!(err.has_remote_effects());
        assert_eq!(
            backend.calls()[2..],
            [Call::Vote(ReviewAction::Approve), Call::Delete(100), Call::Delete(101)]
        );
    }

    #[tokio::test]
    async fn test_failed_cleanup_surfaces_both_errors() {
        let backend = FakeBackend {
            fail_vote: true,
            fail_delete: true,
            ..FakeBackend::default()
        };
        let err = dispatch(
            ReviewChannel::BestEffort(&backend),
            &review(ReviewAction::RequestChanges, "", 1),
        )
        .await
        .unwrap_err();

        let ReviewError::PartiallyApplied { message, cleanup } = err else {
            panic!("expected partial application");
        };
        assert!(matches!(cleanup, CleanupStatus::Failed { removed: 0, remaining: 1, .. }));
        assert!(message.contains("vote failed with status 500"));
        assert!(message.contains("delete thread failed with status 500"));
        assert!(message.contains("remove them manually"));
    }

    #[tokio::test]
    async fn test_first_thread_failure_is_fully_rejected() {
        let backend = FakeBackend {
            fail_create_at: Some(0),
            ..FakeBackend::default()
        };
        let err = dispatch(
            ReviewChannel::BestEffort(&backend),
            &review(ReviewAction::Approve, "summary", 1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ReviewError::FullyRejected { .. }));
        assert_eq!(backend.calls(), vec![Call::Create("summary".to_string())]);
    }

    #[tokio::test]
    async fn test_later_thread_failure_rolls_back_earlier_threads() {
        let backend = FakeBackend {
            fail_create_at: Some(1),
            ..FakeBackend::default()
        };
        let err = dispatch(
            ReviewChannel::BestEffort(&backend),
            &review(ReviewAction::Approve, "", 3),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ReviewError::PartiallyApplied {
                cleanup: CleanupStatus::RolledBack { removed: 1 },
                ..
            }
        ));
        // No vote after a failed thread
        assert!(!backend.calls().iter().any(|c| matches!(c, Call::Vote(_))));
    }

    #[tokio::test]
    async fn test_vote_failure_without_threads_is_fully_rejected() {
        let backend = FakeBackend {
            fail_vote: true,
            ..FakeBackend::default()
        };
        let err = dispatch(
            ReviewChannel::BestEffort(&backend),
            &review(ReviewAction::Approve, "  ", 0),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ReviewError::FullyRejected { .. }));
    }

    #[tokio::test]
    async fn test_submitter_sends_comment_on_own_pr() {
        let pr = sample_pull_request(ProviderKind::GitHub, 9, "alice");
        let adapter = FakeAdapter::new(ProviderKind::GitHub, vec![pr.clone()]);
        let mut approve = review(ReviewAction::Approve, "lgtm", 0);
        approve.pr = pr.id.clone();

        let submitted = ReviewSubmitter::new()
            .submit(&adapter, &pr, "alice", approve)
            .await
            .unwrap();

        assert_eq!(
            submitted,
            Submitted {
                action: ReviewAction::Comment,
                downgraded: true
            }
        );
        let posted = adapter.posted.lock().unwrap();
        assert_eq!(posted[0].action, ReviewAction::Comment);
    }

    #[tokio::test]
    async fn test_submitter_keeps_verdict_on_someone_elses_pr() {
        let pr = sample_pull_request(ProviderKind::GitHub, 9, "carol");
        let adapter = FakeAdapter::new(ProviderKind::GitHub, vec![pr.clone()]);
        let submitted = ReviewSubmitter::new()
            .submit(&adapter, &pr, "alice", review(ReviewAction::RequestChanges, "fix", 0))
            .await
            .unwrap();
        assert_eq!(submitted.action, ReviewAction::RequestChanges);
        assert!(!submitted.downgraded);
    }

    #[tokio::test]
    async fn test_empty_comment_review_rejected_on_both_channels() {
        let empty = review(ReviewAction::Comment, " ", 0);

        let atomic = FakeBackend::default();
        let err = dispatch(ReviewChannel::Atomic(&atomic), &empty).await.unwrap_err();
        assert!(matches!(
            err,
            ReviewError::FullyRejected {
                source: ProviderError::InvalidRequest(_)
            }
        ));
        assert!(atomic.calls().is_empty());

        let threaded = FakeBackend::default();
        let err = dispatch(ReviewChannel::BestEffort(&threaded), &empty).await.unwrap_err();
        assert!(!err.has_remote_effects());
        assert!(threaded.calls().is_empty());
    }

    #[tokio::test]
    async fn test_downgraded_approval_without_body_is_rejected() {
        let pr = sample_pull_request(ProviderKind::GitHub, 9, "alice");
        let adapter = FakeAdapter::new(ProviderKind::GitHub, vec![pr.clone()]);
        let err = ReviewSubmitter::new()
            .submit(&adapter, &pr, "alice", review(ReviewAction::Approve, "", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::FullyRejected { .. }));
        assert!(adapter.posted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_inline_comment_rejected_before_any_call() {
        let backend = FakeBackend::default();
        let mut bad = review(ReviewAction::Comment, "", 1);
        bad.comments[0].line = 0;
        let err = dispatch(ReviewChannel::BestEffort(&backend), &bad).await.unwrap_err();
        assert!(matches!(
            err,
            ReviewError::FullyRejected {
                source: ProviderError::InvalidRequest(_)
            }
        ));
        assert!(backend.calls().is_empty());
    }
}
