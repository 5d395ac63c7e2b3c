//! Crawl orchestration: search pages, candidates, enrichment, persistence.
//!
//! The crawl is a small state machine. At `AtSearchPage(n)` the page is
//! loaded and its candidates are walked in document order; each unseen
//! candidate is enriched and persisted (`AtDetailPage`) and the session is
//! sent back to the search page. A page with no cards ends the run, as does a
//! page past the first that yields nothing new.
//!
//! Nothing that happens to a single candidate aborts the run. Cancellation is
//! observed between candidates and between pages, never mid-enrichment.

use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use jobharvest_crawler::{
    BrowsingSession, EnrichmentNavigator, ListingExtractor, Pacing, await_content,
};
use jobharvest_shared::{CrawlConfig, Listing, Result};

use crate::dedup::DedupGateway;

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting crawl status.
pub trait ProgressReporter: Send + Sync {
    /// Called before a search page is requested.
    fn page_started(&self, page: u32);
    /// Called when a candidate is skipped as already stored.
    fn candidate_skipped(&self, url: &str);
    /// Called after a new listing is persisted. `total` counts this worker's harvest.
    fn listing_harvested(&self, listing: &Listing, total: usize);
    /// Called once with the final report.
    fn done(&self, report: &HarvestReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn page_started(&self, _page: u32) {}
    fn candidate_skipped(&self, _url: &str) {}
    fn listing_harvested(&self, _listing: &Listing, _total: usize) {}
    fn done(&self, _report: &HarvestReport) {}
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Why a crawl ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A search page had no listing cards (exhausted or blocked).
    EmptyPage,
    /// A page after the first produced no new listings.
    NoNewListings,
    /// The configured page limit was reached.
    MaxPages,
    Cancelled,
    /// A search page could not be loaded.
    SearchUnreachable,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmptyPage => "empty_page",
            Self::NoNewListings => "no_new_listings",
            Self::MaxPages => "max_pages",
            Self::Cancelled => "cancelled",
            Self::SearchUnreachable => "search_unreachable",
        }
    }
}

/// Result of one harvest run.
#[derive(Debug, Clone)]
pub struct HarvestReport {
    /// `crawl_runs` row for this run.
    pub run_id: String,
    /// Newly persisted listings, in page then document order.
    pub listings: Vec<Listing>,
    pub pages_visited: u32,
    pub candidates_seen: usize,
    pub duplicates_skipped: usize,
    /// Candidates dropped by a storage or navigation fault.
    pub failures: usize,
    pub stop_reason: StopReason,
    pub elapsed: Duration,
}

impl HarvestReport {
    fn stats_json(&self) -> String {
        serde_json::json!({
            "new_listings": self.listings.len(),
            "pages_visited": self.pages_visited,
            "candidates_seen": self.candidates_seen,
            "duplicates_skipped": self.duplicates_skipped,
            "failures": self.failures,
            "stop_reason": self.stop_reason,
            "elapsed_ms": self.elapsed.as_millis() as u64,
        })
        .to_string()
    }
}

/// Counters accumulated while walking a page range.
#[derive(Debug, Default)]
struct Tally {
    listings: Vec<Listing>,
    pages_visited: u32,
    candidates_seen: usize,
    duplicates_skipped: usize,
    failures: usize,
}

impl Tally {
    fn absorb(&mut self, other: Tally) {
        self.listings.extend(other.listings);
        self.pages_visited += other.pages_visited;
        self.candidates_seen += other.candidates_seen;
        self.duplicates_skipped += other.duplicates_skipped;
        self.failures += other.failures;
    }

    fn into_report(self, run_id: String, stop_reason: StopReason, elapsed: Duration) -> HarvestReport {
        HarvestReport {
            run_id,
            listings: self.listings,
            pages_visited: self.pages_visited,
            candidates_seen: self.candidates_seen,
            duplicates_skipped: self.duplicates_skipped,
            failures: self.failures,
            stop_reason,
            elapsed,
        }
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CrawlState {
    AtSearchPage(u32),
    Done(StopReason),
}

/// Result of the `AtDetailPage` step for one candidate.
enum CandidateOutcome {
    Harvested(Listing),
    AlreadyStored(String),
}

/// One worker's share of a pooled run.
struct WorkerResult {
    worker: usize,
    tally: Tally,
    stop_reason: StopReason,
}

/// Drives harvest runs over a [`BrowsingSession`].
#[derive(Clone)]
pub struct Harvester {
    config: Arc<CrawlConfig>,
    gateway: DedupGateway,
}

impl Harvester {
    pub fn new(config: CrawlConfig, gateway: DedupGateway) -> Self {
        Self {
            config: Arc::new(config),
            gateway,
        }
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    /// Run a sequential harvest over pages `0..max_pages` with one session.
    ///
    /// Only a store failure at startup is returned as an error; everything
    /// after that degrades into the report.
    #[instrument(skip_all, fields(query = %self.config.query, max_pages = self.config.max_pages))]
    pub async fn run<S>(
        &self,
        session: &mut S,
        cancel: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> Result<HarvestReport>
    where
        S: BrowsingSession + ?Sized,
    {
        let start = Instant::now();
        let run_id = self.gateway.storage().insert_crawl_run(&self.config.query).await?;
        info!(%run_id, "starting harvest");

        let mut tally = Tally::default();
        let stop_reason = self
            .crawl_pages(session, 0..self.config.max_pages, cancel, progress, &mut tally)
            .await;

        Ok(self.finish(run_id, tally, stop_reason, start, progress).await)
    }

    /// Run a harvest split across `workers` sessions, each owning a
    /// contiguous, disjoint page range.
    ///
    /// Sessions are created up front so a session that can't be built fails
    /// the run before any page is requested.
    #[instrument(skip_all, fields(query = %self.config.query, workers = self.config.workers))]
    pub async fn run_pool<S, F>(
        &self,
        mut session_factory: F,
        cancel: &CancellationToken,
        progress: Arc<dyn ProgressReporter>,
    ) -> Result<HarvestReport>
    where
        S: BrowsingSession + 'static,
        F: FnMut(usize) -> Result<S>,
    {
        let start = Instant::now();
        let ranges = split_pages(self.config.max_pages, self.config.workers);
        let sessions = (0..ranges.len())
            .map(&mut session_factory)
            .collect::<Result<Vec<_>>>()?;

        let run_id = self.gateway.storage().insert_crawl_run(&self.config.query).await?;
        info!(%run_id, ranges = ?ranges, "starting pooled harvest");

        let (tx, mut rx) = mpsc::channel::<WorkerResult>(ranges.len().max(1));
        let mut handles = Vec::with_capacity(ranges.len());

        for (worker, (range, mut session)) in ranges.into_iter().zip(sessions).enumerate() {
            let harvester = self.clone();
            let cancel = cancel.clone();
            let progress = Arc::clone(&progress);
            let tx = tx.clone();

            handles.push(tokio::spawn(async move {
                let mut tally = Tally::default();
                let stop_reason = harvester
                    .crawl_pages(&mut session, range, &cancel, progress.as_ref(), &mut tally)
                    .await;
                debug!(worker, stop = stop_reason.as_str(), "worker finished");
                // Receiver outlives every worker; a send error means the run was dropped.
                let _ = tx
                    .send(WorkerResult {
                        worker,
                        tally,
                        stop_reason,
                    })
                    .await;
            }));
        }
        drop(tx);

        let mut results = Vec::new();
        while let Some(result) = rx.recv().await {
            results.push(result);
        }

        let mut tally = Tally::default();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "harvest worker panicked");
                tally.failures += 1;
            }
        }

        results.sort_by_key(|r| r.worker);
        let mut stop_reason = StopReason::MaxPages;
        for result in results {
            stop_reason = result.stop_reason;
            tally.absorb(result.tally);
        }
        if cancel.is_cancelled() {
            stop_reason = StopReason::Cancelled;
        }

        Ok(self.finish(run_id, tally, stop_reason, start, progress.as_ref()).await)
    }

    async fn finish(
        &self,
        run_id: String,
        tally: Tally,
        stop_reason: StopReason,
        start: Instant,
        progress: &dyn ProgressReporter,
    ) -> HarvestReport {
        let report = tally.into_report(run_id, stop_reason, start.elapsed());

        if let Err(e) = self
            .gateway
            .storage()
            .finish_crawl_run(&report.run_id, &report.stats_json())
            .await
        {
            warn!(run_id = %report.run_id, error = %e, "failed to record run stats");
        }

        info!(
            new_listings = report.listings.len(),
            pages = report.pages_visited,
            duplicates = report.duplicates_skipped,
            failures = report.failures,
            stop = report.stop_reason.as_str(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "harvest finished"
        );
        progress.done(&report);
        report
    }

    /// Walk search pages in `pages` until a stop condition is reached.
    #[instrument(skip_all, fields(pages = ?pages))]
    async fn crawl_pages<S>(
        &self,
        session: &mut S,
        pages: Range<u32>,
        cancel: &CancellationToken,
        progress: &dyn ProgressReporter,
        tally: &mut Tally,
    ) -> StopReason
    where
        S: BrowsingSession + ?Sized,
    {
        let mut state = CrawlState::AtSearchPage(pages.start);
        loop {
            state = match state {
                CrawlState::Done(reason) => return reason,
                CrawlState::AtSearchPage(n) if n >= pages.end => CrawlState::Done(StopReason::MaxPages),
                CrawlState::AtSearchPage(_) if cancel.is_cancelled() => {
                    CrawlState::Done(StopReason::Cancelled)
                }
                CrawlState::AtSearchPage(n) => {
                    self.visit_search_page(n, session, cancel, progress, tally)
                        .await
                }
            };
        }
    }

    async fn visit_search_page<S>(
        &self,
        n: u32,
        session: &mut S,
        cancel: &CancellationToken,
        progress: &dyn ProgressReporter,
        tally: &mut Tally,
    ) -> CrawlState
    where
        S: BrowsingSession + ?Sized,
    {
        progress.page_started(n);

        let search_url = match self.config.search_url(n) {
            Ok(url) => url.to_string(),
            Err(e) => {
                warn!(page = n, error = %e, "cannot build search URL");
                return CrawlState::Done(StopReason::SearchUnreachable);
            }
        };
        if let Err(e) = session.navigate(&search_url).await {
            warn!(page = n, error = %e, "search page unreachable, stopping");
            return CrawlState::Done(StopReason::SearchUnreachable);
        }

        await_content(&*session, &self.config.selectors.card, Pacing::from(&*self.config)).await;
        let page = ListingExtractor::new(&self.config).extract(&*session);
        tally.pages_visited += 1;

        if page.is_empty() {
            info!(page = n, "no listing cards, stopping");
            return CrawlState::Done(StopReason::EmptyPage);
        }
        tally.candidates_seen += page.candidates.len();

        let navigator = EnrichmentNavigator::new(&self.config);
        let mut new_on_page = 0usize;

        for candidate in page.candidates {
            if cancel.is_cancelled() {
                return CrawlState::Done(StopReason::Cancelled);
            }

            match self.visit_candidate(candidate, session, &navigator, &search_url).await {
                Ok(CandidateOutcome::Harvested(listing)) => {
                    new_on_page += 1;
                    progress.listing_harvested(&listing, tally.listings.len() + 1);
                    tally.listings.push(listing);
                }
                Ok(CandidateOutcome::AlreadyStored(url)) => {
                    tally.duplicates_skipped += 1;
                    progress.candidate_skipped(&url);
                }
                Err(e) => {
                    tally.failures += 1;
                    warn!(page = n, error = %e, "candidate failed, skipping");
                }
            }
        }

        info!(
            page = n,
            cards = page.cards_seen,
            skipped_cards = page.cards_skipped,
            new = new_on_page,
            "search page done"
        );

        if n > 0 && new_on_page == 0 {
            CrawlState::Done(StopReason::NoNewListings)
        } else {
            CrawlState::AtSearchPage(n + 1)
        }
    }

    /// Enrich and persist one candidate, then return to the search page.
    async fn visit_candidate<S>(
        &self,
        candidate: Listing,
        session: &mut S,
        navigator: &EnrichmentNavigator<'_>,
        search_url: &str,
    ) -> Result<CandidateOutcome>
    where
        S: BrowsingSession + ?Sized,
    {
        if self.gateway.exists(&candidate.url).await? {
            debug!(url = %candidate.url, "already stored, skipping");
            return Ok(CandidateOutcome::AlreadyStored(candidate.url));
        }

        let enrichment = navigator.enrich(&candidate, session, search_url).await;
        let persisted = self
            .gateway
            .persist_detailed(&candidate, &enrichment.employer_posts, &enrichment.related)
            .await;

        if let Err(e) = session.navigate(search_url).await {
            warn!(url = search_url, error = %e, "could not return to search page");
        }

        let outcome = persisted?;
        if outcome.is_new() {
            debug!(
                url = %candidate.url,
                posts = outcome.employer_posts,
                related = outcome.related,
                employer_page = enrichment.employer_page_status.as_str(),
                "listing harvested"
            );
            Ok(CandidateOutcome::Harvested(candidate))
        } else {
            Ok(CandidateOutcome::AlreadyStored(candidate.url))
        }
    }
}

/// Split `0..max_pages` into at most `workers` contiguous, non-empty ranges.
pub fn split_pages(max_pages: u32, workers: u32) -> Vec<Range<u32>> {
    if max_pages == 0 {
        return Vec::new();
    }
    let workers = workers.clamp(1, max_pages);
    let base = max_pages / workers;
    let extra = max_pages % workers;

    let mut ranges = Vec::with_capacity(workers as usize);
    let mut start = 0;
    for i in 0..workers {
        let len = base + u32::from(i < extra);
        ranges.push(start..start + len);
        start += len;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use jobharvest_crawler::HttpSession;
    use jobharvest_shared::AppConfig;
    use jobharvest_storage::Storage;
    use crate::testing::{exec_sql, temp_db};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

    /// Matches the first search page, which carries no `start` offset.
    struct FirstPage;

    impl Match for FirstPage {
        fn matches(&self, request: &Request) -> bool {
            !request.url.query_pairs().any(|(k, _)| k == "start")
        }
    }

    async fn harvester(server: &MockServer, tweak: impl FnOnce(&mut AppConfig)) -> Harvester {
        harvester_at(server, &temp_db("jh_orch"), tweak).await
    }

    async fn harvester_at(
        server: &MockServer,
        db: &std::path::Path,
        tweak: impl FnOnce(&mut AppConfig),
    ) -> Harvester {
        let mut app = AppConfig::default();
        app.source.base_origin = server.uri();
        app.crawl.wait_timeout_ms = 10;
        app.crawl.poll_interval_ms = 5;
        tweak(&mut app);

        let storage = Storage::open(db).await.expect("open test db");
        Harvester::new(CrawlConfig::from(&app), DedupGateway::new(Arc::new(storage)))
    }

    fn card(jk: &str, employer: &str) -> String {
        format!(
            r#"<div class="job_seen_beacon">
                 <h2 class="jobTitle"><a href="/viewjob?jk={jk}">Job {jk}</a></h2>
                 <span data-testid="company-name">{employer}</span>
                 <span class="date">Just posted</span>
               </div>"#
        )
    }

    fn page(cards: &[String]) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .set_body_string(format!("<html><body>{}</body></html>", cards.concat()))
    }

    async fn mount_search(server: &MockServer, start: Option<&str>, response: ResponseTemplate) {
        let mock = Mock::given(method("GET")).and(path("/jobs"));
        let mock = match start {
            Some(s) => mock.and(query_param("start", s)),
            None => mock.and(FirstPage),
        };
        mock.respond_with(response).mount(server).await;
    }

    async fn forbid(server: &MockServer, at: &str, jk: Option<&str>) {
        let mock = Mock::given(method("GET")).and(path(at));
        let mock = match jk {
            Some(jk) => mock.and(query_param("jk", jk)),
            None => mock,
        };
        mock.respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(server)
            .await;
    }

    async fn mount_detail(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/viewjob"))
            .respond_with(page(&[]))
            .mount(server)
            .await;
    }

    fn listing_at(server: &MockServer, jk: &str) -> Listing {
        Listing {
            title: format!("Job {jk}"),
            url: format!("{}/viewjob?jk={jk}", server.uri()),
            ..Default::default()
        }
    }

    #[test]
    fn pages_split_into_contiguous_ranges() {
        assert_eq!(split_pages(5, 2), vec![0..3, 3..5]);
        assert_eq!(split_pages(2, 4), vec![0..1, 1..2]);
        assert_eq!(split_pages(3, 1), vec![0..3]);
        assert_eq!(split_pages(4, 0), vec![0..4]);
        assert!(split_pages(0, 3).is_empty());
    }

    #[tokio::test]
    async fn stored_candidate_is_neither_reinserted_nor_enriched() {
        let server = MockServer::start().await;
        forbid(&server, "/viewjob", Some("3")).await;
        forbid(&server, "/cmp/stored-co", None).await;
        mount_detail(&server).await;
        mount_search(
            &server,
            None,
            page(&[card("1", "Acme"), card("2", "Acme"), card("3", "Stored Co")]),
        )
        .await;
        mount_search(&server, Some("10"), page(&[])).await;

        let h = harvester(&server, |_| {}).await;
        assert!(h.gateway.persist(&listing_at(&server, "3"), &[], &[]).await.unwrap());

        let mut session = HttpSession::new(h.config()).unwrap();
        let report = h
            .run(&mut session, &CancellationToken::new(), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(report.listings.len(), 2);
        assert!(report.listings[0].url.ends_with("jk=1"));
        assert!(report.listings[1].url.ends_with("jk=2"));
        assert_eq!(report.listings[0].employer, "Acme");
        assert_eq!(report.duplicates_skipped, 1);
        assert_eq!(report.candidates_seen, 3);
        assert_eq!(report.pages_visited, 2);
        assert_eq!(report.failures, 0);
        assert_eq!(report.stop_reason, StopReason::EmptyPage);
        assert_eq!(h.gateway.storage().counts().await.unwrap().listings, 3);
    }

    #[tokio::test]
    async fn zero_cards_ends_run_without_error() {
        let server = MockServer::start().await;
        mount_search(
            &server,
            None,
            ResponseTemplate::new(200).set_body_string("<p>unusual traffic detected</p>"),
        )
        .await;
        forbid(&server, "/jobs", Some("10")).await;

        let h = harvester(&server, |_| {}).await;
        let mut session = HttpSession::new(h.config()).unwrap();
        let report = h
            .run(&mut session, &CancellationToken::new(), &SilentProgress)
            .await
            .unwrap();

        assert!(report.listings.is_empty());
        assert_eq!(report.pages_visited, 1);
        assert_eq!(report.stop_reason, StopReason::EmptyPage);
    }

    #[tokio::test]
    async fn second_page_without_new_listings_stops_before_third() {
        let server = MockServer::start().await;
        mount_detail(&server).await;
        mount_search(&server, None, page(&[card("1", "")])).await;
        mount_search(&server, Some("10"), page(&[card("1", "")])).await;
        forbid(&server, "/jobs", Some("20")).await;

        let h = harvester(&server, |app| app.crawl.max_pages = 5).await;
        let mut session = HttpSession::new(h.config()).unwrap();
        let report = h
            .run(&mut session, &CancellationToken::new(), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(report.listings.len(), 1);
        assert_eq!(report.pages_visited, 2);
        assert_eq!(report.duplicates_skipped, 1);
        assert_eq!(report.stop_reason, StopReason::NoNewListings);
    }

    #[tokio::test]
    async fn first_page_without_new_listings_keeps_going() {
        let server = MockServer::start().await;
        mount_detail(&server).await;
        mount_search(&server, None, page(&[card("1", "")])).await;
        mount_search(&server, Some("10"), page(&[card("2", "")])).await;
        mount_search(&server, Some("20"), page(&[])).await;

        let h = harvester(&server, |app| app.crawl.max_pages = 5).await;
        h.gateway.persist(&listing_at(&server, "1"), &[], &[]).await.unwrap();

        let mut session = HttpSession::new(h.config()).unwrap();
        let report = h
            .run(&mut session, &CancellationToken::new(), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(report.listings.len(), 1);
        assert!(report.listings[0].url.ends_with("jk=2"));
        assert_eq!(report.pages_visited, 3);
        assert_eq!(report.stop_reason, StopReason::EmptyPage);
    }

    #[tokio::test]
    async fn page_limit_is_respected() {
        let server = MockServer::start().await;
        mount_detail(&server).await;
        mount_search(&server, None, page(&[card("1", "")])).await;
        forbid(&server, "/jobs", Some("10")).await;

        let h = harvester(&server, |app| app.crawl.max_pages = 1).await;
        let mut session = HttpSession::new(h.config()).unwrap();
        let report = h
            .run(&mut session, &CancellationToken::new(), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(report.listings.len(), 1);
        assert_eq!(report.stop_reason, StopReason::MaxPages);
    }

    #[tokio::test]
    async fn unreachable_search_page_is_exhaustion() {
        let server = MockServer::start().await;
        mount_search(&server, None, ResponseTemplate::new(503)).await;

        let h = harvester(&server, |_| {}).await;
        let mut session = HttpSession::new(h.config()).unwrap();
        let report = h
            .run(&mut session, &CancellationToken::new(), &SilentProgress)
            .await
            .unwrap();

        assert!(report.listings.is_empty());
        assert_eq!(report.pages_visited, 0);
        assert_eq!(report.stop_reason, StopReason::SearchUnreachable);
    }

    #[tokio::test]
    async fn enrichment_failures_do_not_block_persistence() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cmp/acme"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/viewjob"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        mount_search(&server, None, page(&[card("1", "Acme")])).await;
        mount_search(&server, Some("10"), page(&[])).await;

        let h = harvester(&server, |_| {}).await;
        let mut session = HttpSession::new(h.config()).unwrap();
        let report = h
            .run(&mut session, &CancellationToken::new(), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(report.listings.len(), 1);
        assert_eq!(report.failures, 0);
        let counts = h.gateway.storage().counts().await.unwrap();
        assert_eq!(counts.listings, 1);
        assert_eq!(counts.employer_posts, 0);
        assert_eq!(counts.related_listings, 0);
    }

    #[tokio::test]
    async fn cancelled_before_start_requests_nothing() {
        let server = MockServer::start().await;
        forbid(&server, "/jobs", None).await;

        let h = harvester(&server, |_| {}).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut session = HttpSession::new(h.config()).unwrap();
        let report = h.run(&mut session, &cancel, &SilentProgress).await.unwrap();

        assert_eq!(report.stop_reason, StopReason::Cancelled);
        assert_eq!(report.pages_visited, 0);
    }

    /// Cancels the run as soon as the first listing lands.
    struct CancelAfterFirst(CancellationToken);

    impl ProgressReporter for CancelAfterFirst {
        fn page_started(&self, _page: u32) {}
        fn candidate_skipped(&self, _url: &str) {}
        fn listing_harvested(&self, _listing: &Listing, _total: usize) {
            self.0.cancel();
        }
        fn done(&self, _report: &HarvestReport) {}
    }

    #[tokio::test]
    async fn cancellation_takes_effect_between_candidates() {
        let server = MockServer::start().await;
        mount_detail(&server).await;
        mount_search(&server, None, page(&[card("1", ""), card("2", ""), card("3", "")])).await;

        let h = harvester(&server, |_| {}).await;
        let cancel = CancellationToken::new();
        let progress = CancelAfterFirst(cancel.clone());

        let mut session = HttpSession::new(h.config()).unwrap();
        let report = h.run(&mut session, &cancel, &progress).await.unwrap();

        assert_eq!(report.listings.len(), 1);
        assert_eq!(report.stop_reason, StopReason::Cancelled);
        assert_eq!(h.gateway.storage().counts().await.unwrap().listings, 1);
    }

    #[tokio::test]
    async fn run_stats_are_recorded() {
        let server = MockServer::start().await;
        mount_search(&server, None, page(&[])).await;

        let h = harvester(&server, |_| {}).await;
        let mut session = HttpSession::new(h.config()).unwrap();
        let report = h
            .run(&mut session, &CancellationToken::new(), &SilentProgress)
            .await
            .unwrap();

        let stats = h
            .gateway
            .storage()
            .crawl_run_stats(&report.run_id)
            .await
            .unwrap()
            .expect("stats recorded");
        let stats: serde_json::Value = serde_json::from_str(&stats).unwrap();
        assert_eq!(stats["stop_reason"], "empty_page");
        assert_eq!(stats["new_listings"], 0);
    }

    /// Records every harvested URL, from any worker.
    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl ProgressReporter for Recorder {
        fn page_started(&self, _page: u32) {}
        fn candidate_skipped(&self, _url: &str) {}
        fn listing_harvested(&self, listing: &Listing, _total: usize) {
            self.0.lock().unwrap().push(listing.url.clone());
        }
        fn done(&self, _report: &HarvestReport) {}
    }

    #[tokio::test]
    async fn pool_workers_share_one_dedup_store() {
        let server = MockServer::start().await;
        mount_detail(&server).await;
        mount_search(&server, None, page(&[card("1", ""), card("9", "")])).await;
        mount_search(&server, Some("10"), page(&[card("2", ""), card("9", "")])).await;
        forbid(&server, "/jobs", Some("20")).await;

        let h = harvester(&server, |app| {
            app.crawl.max_pages = 2;
            app.crawl.workers = 2;
        })
        .await;
        let config = h.config().clone();
        let recorder = Arc::new(Recorder::default());

        let report = h
            .run_pool(
                |_| HttpSession::new(&config),
                &CancellationToken::new(),
                recorder.clone(),
            )
            .await
            .unwrap();

        assert_eq!(report.listings.len(), 3);
        assert!(report.listings[0].url.ends_with("jk=1"));
        assert_eq!(report.duplicates_skipped, 1);
        assert_eq!(report.pages_visited, 2);
        assert_eq!(report.stop_reason, StopReason::MaxPages);
        assert_eq!(recorder.0.lock().unwrap().len(), 3);
        assert_eq!(h.gateway.storage().counts().await.unwrap().listings, 3);
    }

    #[tokio::test]
    async fn failed_insert_is_counted_and_retried_next_run() {
        let server = MockServer::start().await;
        mount_detail(&server).await;
        mount_search(&server, None, page(&[card("1", "Acme"), card("2", "Acme")])).await;
        mount_search(&server, Some("10"), page(&[])).await;

        let db = temp_db("jh_orch");
        let h = harvester_at(&server, &db, |_| {}).await;
        exec_sql(
            &db,
            "CREATE TRIGGER reject_jk1 BEFORE INSERT ON listings
             WHEN NEW.url LIKE '%jk=1'
             BEGIN SELECT RAISE(ABORT, 'listing writes disabled'); END;",
        )
        .await;

        let mut session = HttpSession::new(h.config()).unwrap();
        let report = h
            .run(&mut session, &CancellationToken::new(), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(report.failures, 1);
        assert_eq!(report.listings.len(), 1);
        assert!(report.listings[0].url.ends_with("jk=2"));
        assert!(!h.gateway.exists(&listing_at(&server, "1").url).await.unwrap());

        // The failed candidate's detail visit is followed by a return to page 0.
        let requests = server.received_requests().await.unwrap();
        let detail = requests
            .iter()
            .position(|r| r.url.path() == "/viewjob" && r.url.query() == Some("jk=1"))
            .expect("detail page visited");
        let next = &requests[detail + 1];
        assert_eq!(next.url.path(), "/jobs");
        assert!(FirstPage.matches(next));
        assert!(session.current_url().unwrap().contains("/jobs"));

        exec_sql(&db, "DROP TRIGGER reject_jk1;").await;
        let rerun = h
            .run(&mut session, &CancellationToken::new(), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(rerun.failures, 0);
        assert_eq!(rerun.listings.len(), 1);
        assert!(rerun.listings[0].url.ends_with("jk=1"));
        assert_eq!(rerun.duplicates_skipped, 1);
        assert_eq!(h.gateway.storage().counts().await.unwrap().listings, 2);
    }
}
