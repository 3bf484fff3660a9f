use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::provider::ProviderError;

/// Source of monotonic time for cache expiry.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A named backend entity (project or repository) and its opaque ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedId {
    pub id: String,
    pub name: String,
}

/// Name→ID listings needed to address an Azure DevOps repository.
#[async_trait]
pub trait RepositoryDirectory: Send + Sync {
    async fn list_projects(&self) -> Result<Vec<NamedId>, ProviderError>;

    async fn list_repositories(&self, project_id: &str) -> Result<Vec<NamedId>, ProviderError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRepository {
    pub project_id: String,
    pub repo_id: String,
    pub cached_at: Instant,
}

/// Cache-aside resolver from `project/repo` to `(project_id, repo_id)`.
///
/// Entries expire once `now - cached_at >= ttl` and are overwritten on the
/// next resolution. Concurrent misses on the same key each resolve live and
/// the last writer wins; results are identical per key so this only costs
/// extra requests. Failed resolutions are never cached.
pub struct RepositoryResolver<D> {
    directory: D,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    cache: RwLock<HashMap<String, ResolvedRepository>>,
}

impl<D: RepositoryDirectory> RepositoryResolver<D> {
    pub fn new(directory: D, ttl: Duration) -> Self {
        Self::with_clock(directory, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(directory: D, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            directory,
            ttl,
            clock,
            cache: RwLock::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    pub fn directory(&self) -> &D {
        &self.directory
    }

    /// Resolve `project/repo` into `(project_id, repo_id)`.
    #[instrument(skip(self))]
    pub async fn resolve(&self, repository_key: &str) -> Result<(String, String), ProviderError> {
        if let Some(hit) = self.cached(repository_key) {
            debug!("repository cache hit");
            return Ok((hit.project_id, hit.repo_id));
        }

        let (project_name, repo_name) = repository_key
            .split_once('/')
            .filter(|(p, r)| !p.is_empty() && !r.is_empty())
            .ok_or_else(|| ProviderError::NotFound {
                what: format!("repository key `{repository_key}` (expected project/repo)"),
            })?;

        debug!("repository cache miss, resolving live");
        let project_id = self
            .directory
            .list_projects()
            .await?
            .into_iter()
            .find(|p| p.name.eq_ignore_ascii_case(project_name))
            .map(|p| p.id)
            .ok_or_else(|| ProviderError::NotFound {
                what: format!("project `{project_name}`"),
            })?;

        let repo_id = self
            .directory
            .list_repositories(&project_id)
            .await?
            .into_iter()
            .find(|r| r.name.eq_ignore_ascii_case(repo_name))
            .map(|r| r.id)
            .ok_or_else(|| ProviderError::NotFound {
                what: format!("repository `{repo_name}` in project `{project_name}`"),
            })?;

        let entry = ResolvedRepository {
            project_id: project_id.clone(),
            repo_id: repo_id.clone(),
            cached_at: self.clock.now(),
        };
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(repository_key.to_string(), entry);
        debug!(%project_id, %repo_id, "repository resolved");

        Ok((project_id, repo_id))
    }

    fn cached(&self, repository_key: &str) -> Option<ResolvedRepository> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        let entry = cache.get(repository_key)?;
        let age = self.clock.now().saturating_duration_since(entry.cached_at);
        (age < self.ttl).then(|| entry.clone())
    }
}
