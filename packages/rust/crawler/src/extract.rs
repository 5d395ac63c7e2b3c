//! Listing extraction from a rendered search-results page.
//!
//! Each optional field has its own small extractor returning `Option<T>`;
//! absence is data, not a fault. A card is only dropped when it has no usable
//! title link, and dropping one card never affects the rest of the page.

use std::sync::LazyLock;

use chrono::{Local, NaiveDate};
use regex::Regex;
use tracing::debug;

use jobharvest_shared::{CrawlConfig, Listing, normalize_posted_date};

use crate::session::{BrowsingSession, ElementHandle};
use crate::urls;

static FIRST_INT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d,]*").expect("valid regex"));

/// Candidates read from one search-results page.
#[derive(Debug, Clone, Default)]
pub struct ExtractedPage {
    /// Successfully parsed cards, in document order.
    pub candidates: Vec<Listing>,
    /// Number of cards present on the page.
    pub cards_seen: usize,
    /// Cards dropped for lacking a title or link.
    pub cards_skipped: usize,
}

impl ExtractedPage {
    /// Zero cards usually means the results ran out or the source is blocking us.
    pub fn is_empty(&self) -> bool {
        self.cards_seen == 0
    }
}

/// Why a card could not become a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CardSkip {
    NoTitleLink,
    EmptyTitle,
    NoUsableHref,
}

/// Reads listing cards from the session's current page.
pub struct ListingExtractor<'a> {
    config: &'a CrawlConfig,
}

impl<'a> ListingExtractor<'a> {
    pub fn new(config: &'a CrawlConfig) -> Self {
        Self { config }
    }

    /// Extract candidates, normalizing dates against today.
    pub fn extract<S>(&self, session: &S) -> ExtractedPage
    where
        S: BrowsingSession + ?Sized,
    {
        self.extract_at(session, Local::now().date_naive())
    }

    /// Extract candidates, normalizing dates against `reference`.
    pub fn extract_at<S>(&self, session: &S, reference: NaiveDate) -> ExtractedPage
    where
        S: BrowsingSession + ?Sized,
    {
        let page_url = session.current_url();
        let cards = session.find_all(&self.config.selectors.card);
        let mut page = ExtractedPage {
            cards_seen: cards.len(),
            ..Default::default()
        };

        for (index, card) in cards.iter().enumerate() {
            match self.parse_card(card, page_url.as_deref(), reference) {
                Ok(listing) => page.candidates.push(listing),
                Err(reason) => {
                    debug!(index, ?reason, "skipping card");
                    page.cards_skipped += 1;
                }
            }
        }

        page
    }

    fn parse_card(
        &self,
        card: &ElementHandle,
        page_url: Option<&str>,
        reference: NaiveDate,
    ) -> Result<Listing, CardSkip> {
        let sel = &self.config.selectors;

        let link = card
            .find_first(&sel.card_title_link)
            .ok_or(CardSkip::NoTitleLink)?;
        let title = link.text().to_string();
        if title.is_empty() {
            return Err(CardSkip::EmptyTitle);
        }
        let url = link
            .attribute("href")
            .and_then(|href| urls::absolutize(&self.config.base_origin, page_url, href))
            .ok_or(CardSkip::NoUsableHref)?;

        Ok(Listing {
            title,
            employer: field_text(card, &sel.card_employer).unwrap_or_default(),
            location: field_text(card, &sel.card_location).unwrap_or_default(),
            posted_date: posted_date(card, &sel.card_date, reference),
            salary: field_text(card, &sel.card_salary).unwrap_or_default(),
            url,
            review_count: review_count(card, &sel.card_rating).unwrap_or(0),
        })
    }
}

/// Non-empty text of the first element matching `selectors`.
pub fn field_text(scope: &ElementHandle, selectors: &str) -> Option<String> {
    scope
        .find_first(selectors)
        .map(|el| el.text().to_string())
        .filter(|t| !t.is_empty())
}

/// Posting date from a relative phrase under `selectors`.
pub fn posted_date(scope: &ElementHandle, selectors: &str, reference: NaiveDate) -> Option<NaiveDate> {
    field_text(scope, selectors).and_then(|text| normalize_posted_date(&text, reference))
}

/// First integer in the rating text under `selectors` ("1,234 reviews" → 1234).
pub fn review_count(scope: &ElementHandle, selectors: &str) -> Option<u32> {
    field_text(scope, selectors).and_then(|text| first_integer(&text))
}

fn first_integer(text: &str) -> Option<u32> {
    let m = FIRST_INT_RE.find(text)?;
    m.as_str().replace(',', "").parse().ok()
}
