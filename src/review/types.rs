use thiserror::Error;

use crate::pr::ReviewAction;
use crate::provider::ProviderError;

/// A review the backend accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submitted {
    /// Action actually sent
    pub action: ReviewAction,
    /// Whether the own-PR guard turned a verdict into a comment
    pub downgraded: bool,
}

/// What happened to the side effects of a half-applied review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupStatus {
    /// Every created thread was removed again
    RolledBack { removed: usize },
    /// Some threads are still on the pull request
    Failed {
        removed: usize,
        remaining: usize,
        errors: Vec<String>,
    },
}

#[derive(Debug, Error)]
pub enum ReviewError {
    /// Nothing reached the pull request.
    #[error("Review was rejected and nothing was applied: {source}")]
    FullyRejected {
        #[source]
        source: ProviderError,
    },

    /// Some side effects landed before a later step failed.
    #[error("Review was partially applied: {message}")]
    PartiallyApplied {
        message: String,
        cleanup: CleanupStatus,
    },
}

impl ReviewError {
    /// Whether the failed submission may have changed the pull request.
    pub fn has_remote_effects(&self) -> bool {
        matches!(self, ReviewError::PartiallyApplied { .. })
    }

    /// Whether the user has to remove leftovers by hand.
    pub fn needs_manual_cleanup(&self) -> bool {
        matches!(
            self,
            ReviewError::PartiallyApplied {
                cleanup: CleanupStatus::Failed { .. },
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_cleanup_only_when_rollback_failed() {
        let rolled_back = ReviewError::PartiallyApplied {
            message: "vote failed".to_string(),
            cleanup: CleanupStatus::RolledBack { removed: 2 },
        };
        assert!(rolled_back.has_remote_effects());
        assert!(!rolled_back.needs_manual_cleanup());

        let stuck = ReviewError::PartiallyApplied {
            message: "vote failed".to_string(),
            cleanup: CleanupStatus::Failed {
                removed: 1,
                remaining: 1,
                errors: vec!["thread 7: gone".to_string()],
            },
        };
        assert!(stuck.needs_manual_cleanup());

        let rejected = ReviewError::FullyRejected {
            source: ProviderError::InvalidRequest("bad".to_string()),
        };
        assert!(!rejected.has_remote_effects());
        assert!(!rejected.needs_manual_cleanup());
        assert!(rejected.to_string().contains("nothing was applied"));
    }
}
