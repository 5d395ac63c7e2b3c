//! Core domain types for harvested job listings.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// One job posting observed on a search-results page.
///
/// `url` is the canonical (absolute) URL and the listing's identity: two
/// observations with the same URL are the same posting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    /// Job title as shown on the card. Never empty.
    pub title: String,
    /// Employer name from the search result, empty when unavailable.
    #[serde(default)]
    pub employer: String,
    /// Free-text location, empty when unavailable.
    #[serde(default)]
    pub location: String,
    /// Absolute posting date, `None` when the relative phrase was unparseable.
    #[serde(default)]
    pub posted_date: Option<NaiveDate>,
    /// Salary snippet, empty when unavailable.
    #[serde(default)]
    pub salary: String,
    /// Canonical absolute URL.
    pub url: String,
    /// Employer review count parsed from the card's rating text.
    #[serde(default)]
    pub review_count: u32,
}

impl Listing {
    /// Whether the listing carries an employer name usable for enrichment.
    pub fn has_employer(&self) -> bool {
        !self.employer.trim().is_empty()
    }
}

// ---------------------------------------------------------------------------
// EmployerPost
// ---------------------------------------------------------------------------

/// A posting found on an employer's own page, kept for posting-frequency analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployerPost {
    /// Employer name copied from the parent listing.
    pub employer: String,
    pub title: String,
    pub posted_date: Option<NaiveDate>,
    /// Absolute post URL, empty when the card had no link.
    pub url: String,
}

// ---------------------------------------------------------------------------
// RelatedListing
// ---------------------------------------------------------------------------

/// A listing surfaced in the "related jobs" section of a listing's detail page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedListing {
    pub title: String,
    /// Inherited from the parent listing.
    pub employer: String,
    /// Inherited from the parent listing.
    pub location: String,
    /// Absolute URL, empty when the entry had no link.
    pub url: String,
}

impl RelatedListing {
    /// Build a related entry that inherits employer and location from `parent`.
    pub fn for_parent(parent: &Listing, title: String, url: String) -> Self {
        Self {
            title,
            employer: parent.employer.clone(),
            location: parent.location.clone(),
            url,
        }
    }
}
