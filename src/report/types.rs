use crate::orchestrator::CredentialFailure;
use crate::pr::{PrCategory, PrGroup};

/// Counts per category over the flat pull request list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryCounts {
    pub authored: usize,
    pub assigned: usize,
    pub other: usize,
}

impl CategoryCounts {
    pub fn add(&mut self, category: PrCategory) {
        match category {
            PrCategory::Authored => self.authored += 1,
            PrCategory::Assigned => self.assigned += 1,
            PrCategory::Other => self.other += 1,
        }
    }
}

/// Everything the list view shows.
#[derive(Debug)]
pub struct ListReport {
    /// Total pull requests across all credentials
    pub total: usize,
    pub counts: CategoryCounts,
    pub groups: Vec<PrGroup>,
    /// Credentials that could not be listed
    pub failures: Vec<CredentialFailure>,
}
