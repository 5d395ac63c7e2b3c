//! Secondary-page enrichment: employer postings and related listings.
//!
//! Every step is best-effort. A failed navigation or an empty page degrades
//! that step to an empty result; it never fails the listing. The session
//! always ends on the listing's detail page, or on the fallback page when the
//! detail page cannot be reached.

use std::sync::LazyLock;

use chrono::{Local, NaiveDate};
use regex::Regex;
use tracing::{debug, instrument, warn};

use jobharvest_shared::{CrawlConfig, EmployerPost, Listing, RelatedListing};

use crate::extract::posted_date;
use crate::session::{BrowsingSession, ElementHandle, Pacing, await_content};
use crate::urls;

static NON_SLUG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s-]").expect("valid regex"));
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Derive the employer-page identifier from an employer name.
///
/// "Acme Mapping, Inc." becomes `acme-mapping-inc`. Whether the source site
/// actually uses this scheme is not guaranteed, so callers treat the
/// resulting page as optional.
pub fn employer_slug(name: &str) -> Option<String> {
    let stripped = NON_SLUG_RE.replace_all(name, "");
    let slug = WHITESPACE_RE
        .replace_all(stripped.trim(), "-")
        .to_lowercase();
    (!slug.is_empty()).then_some(slug)
}

/// What happened on the employer-page leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmployerPageStatus {
    /// No usable employer name.
    Skipped,
    /// Navigation landed somewhere that isn't an employer page.
    NotFound,
    /// Employer page reached and scanned.
    Visited,
    /// Navigation failed outright.
    Failed,
}

impl EmployerPageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::NotFound => "not_found",
            Self::Visited => "visited",
            Self::Failed => "failed",
        }
    }
}

/// Output of one enrichment pass.
#[derive(Debug, Clone)]
pub struct Enrichment {
    pub employer_posts: Vec<EmployerPost>,
    pub related: Vec<RelatedListing>,
    pub employer_page_status: EmployerPageStatus,
}

/// Drives a session through a listing's secondary pages.
pub struct EnrichmentNavigator<'a> {
    config: &'a CrawlConfig,
    pacing: Pacing,
}

impl<'a> EnrichmentNavigator<'a> {
    pub fn new(config: &'a CrawlConfig) -> Self {
        Self {
            config,
            pacing: Pacing::from(config),
        }
    }

    /// Enrich `listing`, normalizing post dates against today.
    ///
    /// `fallback_url` is where the session is parked if the detail page can't
    /// be reached (normally the originating search-results page).
    pub async fn enrich<S>(&self, listing: &Listing, session: &mut S, fallback_url: &str) -> Enrichment
    where
        S: BrowsingSession + ?Sized,
    {
        self.enrich_at(listing, session, fallback_url, Local::now().date_naive())
            .await
    }

    #[instrument(skip_all, fields(url = %listing.url, employer = %listing.employer))]
    pub async fn enrich_at<S>(
        &self,
        listing: &Listing,
        session: &mut S,
        fallback_url: &str,
        reference: NaiveDate,
    ) -> Enrichment
    where
        S: BrowsingSession + ?Sized,
    {
        let (employer_posts, employer_page_status) =
            self.employer_posts(listing, session, reference).await;

        let related = match session.navigate(&listing.url).await {
            Ok(()) => {
                await_content(&*session, &self.config.selectors.related_section, self.pacing).await;
                self.related_listings(listing, &*session)
            }
            Err(e) => {
                warn!(error = %e, "detail page unreachable, returning to fallback");
                if let Err(e) = session.navigate(fallback_url).await {
                    warn!(url = fallback_url, error = %e, "fallback page unreachable");
                }
                Vec::new()
            }
        };

        debug!(
            posts = employer_posts.len(),
            related = related.len(),
            employer_page = employer_page_status.as_str(),
            "enrichment finished"
        );

        Enrichment {
            employer_posts,
            related,
            employer_page_status,
        }
    }

    async fn employer_posts<S>(
        &self,
        listing: &Listing,
        session: &mut S,
        reference: NaiveDate,
    ) -> (Vec<EmployerPost>, EmployerPageStatus)
    where
        S: BrowsingSession + ?Sized,
    {
        // Punctuation-only names pass the first check but yield no slug.
        let slug = listing
            .has_employer()
            .then(|| employer_slug(&listing.employer))
            .flatten();
        let Some(slug) = slug else {
            return (Vec::new(), EmployerPageStatus::Skipped);
        };

        let employer_url = self.config.employer_url(&slug);
        if let Err(e) = session.navigate(&employer_url).await {
            debug!(url = %employer_url, error = %e, "employer page unreachable");
            return (Vec::new(), EmployerPageStatus::Failed);
        }

        let landed = session.current_url().unwrap_or_default();
        if !urls::has_marker(&landed, &self.config.employer_url_markers) {
            debug!(%landed, "not an employer page");
            return (Vec::new(), EmployerPageStatus::NotFound);
        }

        let sel = &self.config.selectors;
        await_content(&*session, &sel.employer_post, self.pacing).await;

        let posts = session
            .find_all(&sel.employer_post)
            .iter()
            .take(self.config.max_employer_posts)
            .filter_map(|card| self.employer_post(card, listing, landed.as_str(), reference))
            .collect();

        (posts, EmployerPageStatus::Visited)
    }

    /// One employer-page card. Cards without a title are dropped.
    fn employer_post(
        &self,
        card: &ElementHandle,
        parent: &Listing,
        page_url: &str,
        reference: NaiveDate,
    ) -> Option<EmployerPost> {
        let sel = &self.config.selectors;
        let link = card.find_first(&sel.employer_post_title)?;
        let title = link.text().to_string();
        if title.is_empty() {
            return None;
        }

        Some(EmployerPost {
            employer: parent.employer.clone(),
            title,
            posted_date: posted_date(card, &sel.employer_post_date, reference),
            url: self.absolute_or_empty(link.attribute("href"), page_url),
        })
    }

    fn related_listings<S>(&self, parent: &Listing, session: &S) -> Vec<RelatedListing>
    where
        S: BrowsingSession + ?Sized,
    {
        let sel = &self.config.selectors;
        let page_url = session.current_url().unwrap_or_else(|| parent.url.clone());

        session
            .find_all(&sel.related_section)
            .iter()
            .flat_map(|section| section.find_all(&sel.related_link))
            .take(self.config.max_related)
            .map(|link| {
                let url = self.absolute_or_empty(link.attribute("href"), &page_url);
                RelatedListing::for_parent(parent, link.text().to_string(), url)
            })
            .collect()
    }

    fn absolute_or_empty(&self, href: Option<&str>, page_url: &str) -> String {
        href.and_then(|h| urls::absolutize(&self.config.base_origin, Some(page_url), h))
            .unwrap_or_default()
    }
}
