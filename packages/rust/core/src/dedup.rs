//! Dedup gateway: the only path by which harvested data reaches storage.
//!
//! The in-process `exists` check is a fast path that saves an enrichment
//! pass. Correctness comes from the `UNIQUE` constraint on `listings.url`,
//! which holds even when several workers insert the same URL at once.

use std::sync::Arc;

use tracing::{debug, warn};

use jobharvest_shared::{EmployerPost, Listing, RelatedListing, Result};
use jobharvest_storage::Storage;

/// What one `persist` call actually wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    /// Row id of the new listing, `None` when the URL was already stored.
    pub listing_id: Option<String>,
    pub employer_posts: usize,
    pub related: usize,
    /// Child batches that failed to write. The listing itself still counts.
    pub child_failures: usize,
}

impl PersistOutcome {
    pub fn is_new(&self) -> bool {
        self.listing_id.is_some()
    }
}

/// Existence checks and writes keyed by canonical listing URL.
#[derive(Clone)]
pub struct DedupGateway {
    storage: Arc<Storage>,
}

impl DedupGateway {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Whether a listing with this canonical URL is already stored.
    pub async fn exists(&self, url: &str) -> Result<bool> {
        self.storage.listing_exists_by_url(url).await
    }

    /// Persist a listing and its enrichment. `Ok(false)` means the URL was
    /// already present and nothing was written.
    pub async fn persist(
        &self,
        listing: &Listing,
        posts: &[EmployerPost],
        related: &[RelatedListing],
    ) -> Result<bool> {
        Ok(self.persist_detailed(listing, posts, related).await?.is_new())
    }

    /// [`persist`](Self::persist), reporting per-table row counts.
    pub async fn persist_detailed(
        &self,
        listing: &Listing,
        posts: &[EmployerPost],
        related: &[RelatedListing],
    ) -> Result<PersistOutcome> {
        if self.exists(&listing.url).await? {
            debug!(url = %listing.url, "already stored");
            return Ok(PersistOutcome::default());
        }

        let Some(listing_id) = self.storage.insert_listing(listing).await? else {
            debug!(url = %listing.url, "lost insert race, already stored");
            return Ok(PersistOutcome::default());
        };

        let mut outcome = PersistOutcome {
            listing_id: Some(listing_id.clone()),
            ..Default::default()
        };

        if !posts.is_empty() {
            match self.storage.insert_employer_posts(&listing_id, posts).await {
                Ok(n) => outcome.employer_posts = n,
                Err(e) => {
                    warn!(url = %listing.url, error = %e, "failed to store employer posts");
                    outcome.child_failures += 1;
                }
            }
        }

        if !related.is_empty() {
            match self.storage.insert_related_listings(&listing_id, related).await {
                Ok(n) => outcome.related = n,
                Err(e) => {
                    warn!(url = %listing.url, error = %e, "failed to store related listings");
                    outcome.child_failures += 1;
                }
            }
        }

        Ok(outcome)
    }
}
