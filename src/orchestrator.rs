use std::cmp::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, info_span, instrument, warn, Instrument};

use crate::credentials::Credential;
use crate::pr::{PrGroup, PullRequest};
use crate::provider::{AdapterFactory, ProviderError};

/// A credential whose listing failed; its pull requests are left out.
#[derive(Debug, Clone)]
pub struct CredentialFailure {
    pub credential_id: String,
    pub credential_name: String,
    pub error: String,
}

/// Pull requests across every listed credential.
///
/// `pull_requests` is the source of truth for counts; `groups` holds the
/// same pull requests split per credential for display.
#[derive(Debug, Default)]
pub struct Aggregate {
    pub pull_requests: Vec<PullRequest>,
    pub groups: Vec<PrGroup>,
    pub failures: Vec<CredentialFailure>,
}

impl Aggregate {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Fans `list_pull_requests` out over credentials, one task each.
pub struct Orchestrator {
    factory: Arc<dyn AdapterFactory>,
}

impl Orchestrator {
    pub fn new(factory: Arc<dyn AdapterFactory>) -> Self {
        Self { factory }
    }

    /// List pull requests under every active or selected credential.
    ///
    /// Never fails: a credential whose adapter cannot be built or whose
    /// listing errors is logged and recorded in `failures`. Groups come back
    /// primary first, then by provider, then by username.
    #[instrument(skip_all, fields(credentials = credentials.len()))]
    pub async fn list_all(&self, credentials: &[Credential]) -> Aggregate {
        let listed: Vec<&Credential> = credentials.iter().filter(|c| c.is_listed()).collect();
        if listed.is_empty() {
            return Aggregate::default();
        }

        let (tx, mut rx) = mpsc::channel(listed.len());
        for (index, credential) in listed.iter().enumerate() {
            let credential = (*credential).clone();
            let factory = self.factory.clone();
            let tx = tx.clone();
            let span = info_span!(
                "list_credential",
                credential = %credential.id,
                provider = credential.provider.as_str()
            );
            tokio::spawn(
                async move {
                    let result = match factory.adapter_for(&credential) {
                        Ok(adapter) => adapter.list_pull_requests(&credential.username).await,
                        Err(err) => Err(err),
                    };
                    // The receiver only goes away if list_all itself was dropped
                    let _ = tx.send((index, credential, result)).await;
                }
                .instrument(span),
            );
        }
        drop(tx);

        let mut outcomes: Vec<(usize, Credential, Result<Vec<PullRequest>, ProviderError>)> =
            Vec::with_capacity(listed.len());
        for _ in 0..listed.len() {
            match rx.recv().await {
                Some(outcome) => outcomes.push(outcome),
                // Every sender is gone: a task panicked before reporting
                None => break,
            }
        }

        let mut aggregate = Aggregate::default();

        // Matched by position, so credentials sharing an id are still told apart
        let mut reported = vec![false; listed.len()];
        for (index, _, _) in &outcomes {
            reported[*index] = true;
        }
        for missing in listed
            .iter()
            .zip(&reported)
            .filter(|(_, done)| !**done)
            .map(|(credential, _)| credential)
        {
            warn!(credential = %missing.id, "listing task ended without a result");
            aggregate.failures.push(CredentialFailure {
                credential_id: missing.id.clone(),
                credential_name: missing.name.clone(),
                error: "listing task ended without a result".to_string(),
            });
        }

        for (_, credential, result) in outcomes {
            match result {
                Ok(prs) => {
                    debug!(credential = %credential.id, count = prs.len(), "credential listed");
                    aggregate.groups.push(group_for(&credential, prs));
                }
                Err(err) => {
                    warn!(credential = %credential.id, error = %err, "failed to list pull requests");
                    aggregate.failures.push(CredentialFailure {
                        credential_id: credential.id,
                        credential_name: credential.name,
                        error: err.to_string(),
                    });
                }
            }
        }

        aggregate.groups.sort_by(compare_groups);
        aggregate.pull_requests = aggregate
            .groups
            .iter()
            .flat_map(|g| g.pull_requests.iter().cloned())
            .collect();

        info!(
            pull_requests = aggregate.pull_requests.len(),
            groups = aggregate.groups.len(),
            failures = aggregate.failures.len(),
            "aggregated pull requests"
        );
        aggregate
    }
}

fn group_for(credential: &Credential, mut prs: Vec<PullRequest>) -> PrGroup {
    for pr in &mut prs {
        pr.credential_id = Some(credential.id.clone());
        pr.credential_name = Some(credential.name.clone());
    }
    PrGroup {
        credential_id: credential.id.clone(),
        credential_name: credential.name.clone(),
        provider: credential.provider,
        username: credential.username.clone(),
        primary: credential.primary,
        pull_requests: prs,
    }
}

/// Primary first, then provider, then username. Credential id breaks the
/// remaining ties so arrival order never shows through.
fn compare_groups(a: &PrGroup, b: &PrGroup) -> Ordering {
    b.primary
        .cmp(&a.primary)
        .then_with(|| a.provider.as_str().cmp(b.provider.as_str()))
        .then_with(|| a.username.cmp(&b.username))
        .then_with(|| a.credential_id.cmp(&b.credential_id))
}
