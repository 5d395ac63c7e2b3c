//! Browsing Session capability and its HTTP implementation.
//!
//! A session is a single-focus, stateful resource: it has exactly one current
//! page. Callers own a session exclusively (`&mut self` for navigation) and
//! never drive it from two tasks at once.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use tokio::time::Instant;
use tracing::debug;

use jobharvest_shared::{CrawlConfig, HarvestError, Result};

/// User-Agent string for session requests.
const USER_AGENT: &str = concat!("jobharvest/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// ElementHandle
// ---------------------------------------------------------------------------

/// Owned snapshot of one element on the current page.
#[derive(Debug, Clone, Default)]
pub struct ElementHandle {
    inner_html: String,
    text: String,
    attrs: Vec<(String, String)>,
}

impl ElementHandle {
    /// Snapshot a parsed element.
    pub fn from_element(el: ElementRef<'_>) -> Self {
        let text = el
            .text()
            .flat_map(str::split_whitespace)
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            inner_html: el.inner_html(),
            text,
            attrs: el
                .value()
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Visible text, whitespace-collapsed and trimmed.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Attribute value, if present.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// All descendants matching a selector group, in document order.
    pub fn find_all(&self, selectors: &str) -> Vec<ElementHandle> {
        let Some(sel) = parse_selector(selectors) else {
            return Vec::new();
        };
        let fragment = Html::parse_fragment(&self.inner_html);
        fragment.select(&sel).map(ElementHandle::from_element).collect()
    }

    /// First descendant matching a selector group.
    pub fn find_first(&self, selectors: &str) -> Option<ElementHandle> {
        let sel = parse_selector(selectors)?;
        let fragment = Html::parse_fragment(&self.inner_html);
        fragment.select(&sel).next().map(ElementHandle::from_element)
    }
}

/// Parse a selector group, logging (not failing) on bad input.
pub(crate) fn parse_selector(group: &str) -> Option<Selector> {
    match Selector::parse(group) {
        Ok(sel) => Some(sel),
        Err(e) => {
            debug!(selector = group, error = %e, "unparseable selector");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// The rendering/automation capability the crawl is driven through.
#[async_trait]
pub trait BrowsingSession: Send + Sync {
    /// Load `url` as the current page. On failure the session is left on a
    /// page with no elements; callers must navigate somewhere known next.
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// URL of the current page after redirects, `None` before the first navigation.
    fn current_url(&self) -> Option<String>;

    /// All elements on the current page matching a selector group.
    fn find_all(&self, selectors: &str) -> Vec<ElementHandle>;

    /// Wait until an element matching `selectors` is present, polling every
    /// `poll` up to `timeout`. Returns whether a match appeared.
    async fn wait_for(&self, selectors: &str, timeout: Duration, poll: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.find_all(selectors).is_empty() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    }
}

/// Timing knobs for waiting on page content.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub wait_timeout: Duration,
    pub poll_interval: Duration,
    pub settle_delay: Duration,
}

impl From<&CrawlConfig> for Pacing {
    fn from(config: &CrawlConfig) -> Self {
        Self {
            wait_timeout: config.wait_timeout,
            poll_interval: config.poll_interval,
            settle_delay: config.settle_delay,
        }
    }
}

/// Wait for `selectors` on the current page. When the readiness signal never
/// shows up, fall back to the fixed settle delay.
pub async fn await_content<S>(session: &S, selectors: &str, pacing: Pacing) -> bool
where
    S: BrowsingSession + ?Sized,
{
    let ready = session
        .wait_for(selectors, pacing.wait_timeout, pacing.poll_interval)
        .await;
    if !ready && !pacing.settle_delay.is_zero() {
        tokio::time::sleep(pacing.settle_delay).await;
    }
    ready
}

// ---------------------------------------------------------------------------
// HttpSession
// ---------------------------------------------------------------------------

/// Current page of an [`HttpSession`].
#[derive(Debug)]
struct LoadedPage {
    url: String,
    /// `None` when the last navigation failed.
    body: Option<String>,
}

/// Browsing session backed by plain HTTP fetches and static HTML parsing.
///
/// Pages are complete once `navigate` returns, so waiting never polls.
pub struct HttpSession {
    client: Client,
    page: Option<LoadedPage>,
    navigation_delay: Duration,
    last_navigation: Option<Instant>,
}

impl HttpSession {
    /// Create a session with the configured timeouts and user agent.
    pub fn new(config: &CrawlConfig) -> Result<Self> {
        let user_agent = config.user_agent.as_deref().unwrap_or(USER_AGENT);
        let client = Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| HarvestError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            page: None,
            navigation_delay: config.navigation_delay,
            last_navigation: None,
        })
    }

    /// Enforce the minimum gap between navigations.
    async fn pace(&mut self) {
        if let Some(last) = self.last_navigation {
            let elapsed = last.elapsed();
            if elapsed < self.navigation_delay {
                tokio::time::sleep(self.navigation_delay - elapsed).await;
            }
        }
        self.last_navigation = Some(Instant::now());
    }

    fn fail(&mut self, url: String, err: HarvestError) -> Result<()> {
        self.page = Some(LoadedPage { url, body: None });
        Err(err)
    }
}

#[async_trait]
impl BrowsingSession for HttpSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.pace().await;
        debug!(url, "navigating");

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => return self.fail(url.to_string(), HarvestError::navigation(url, e)),
        };

        let final_url = response.url().to_string();
        let status = response.status();
        if !status.is_success() {
            return self.fail(final_url, HarvestError::navigation(url, format!("HTTP {status}")));
        }

        match response.text().await {
            Ok(body) => {
                self.page = Some(LoadedPage {
                    url: final_url,
                    body: Some(body),
                });
                Ok(())
            }
            Err(e) => self.fail(
                final_url,
                HarvestError::navigation(url, format!("body read failed: {e}")),
            ),
        }
    }

    fn current_url(&self) -> Option<String> {
        self.page.as_ref().map(|p| p.url.clone())
    }

    fn find_all(&self, selectors: &str) -> Vec<ElementHandle> {
        let Some(body) = self.page.as_ref().and_then(|p| p.body.as_deref()) else {
            return Vec::new();
        };
        let Some(sel) = parse_selector(selectors) else {
            return Vec::new();
        };
        let doc = Html::parse_document(body);
        doc.select(&sel).map(ElementHandle::from_element).collect()
    }

    async fn wait_for(&self, selectors: &str, _timeout: Duration, _poll: Duration) -> bool {
        !self.find_all(selectors).is_empty()
    }
}
