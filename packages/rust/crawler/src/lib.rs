//! Browsing sessions and page-level extraction.
//!
//! This crate provides:
//! - [`BrowsingSession`]: the single-focus page capability, with an
//!   [`HttpSession`] implementation over reqwest + scraper
//! - [`ListingExtractor`]: listing cards from a search-results page
//! - [`EnrichmentNavigator`]: employer postings and related listings
//! - [`urls`]: canonical URL helpers

pub mod enrich;
pub mod extract;
pub mod session;
pub mod urls;

pub use enrich::{EmployerPageStatus, Enrichment, EnrichmentNavigator, employer_slug};
pub use extract::{ExtractedPage, ListingExtractor};
pub use session::{BrowsingSession, ElementHandle, HttpSession, Pacing, await_content};
