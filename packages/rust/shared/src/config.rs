//! Application configuration for jobharvest.
//!
//! User config lives at `~/.jobharvest/jobharvest.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{HarvestError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "jobharvest.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".jobharvest";

// ---------------------------------------------------------------------------
// Config structs (matching jobharvest.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Search source.
    #[serde(default)]
    pub source: SourceConfig,

    /// Crawl pacing and limits.
    #[serde(default)]
    pub crawl: CrawlPoliciesConfig,

    /// CSS selector sets for cards, detail pages and employer pages.
    #[serde(default)]
    pub selectors: SelectorConfig,

    /// Durable store.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Batch export.
    #[serde(default)]
    pub export: ExportConfig,
}

/// `[source]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Origin prefixed to root-relative hrefs, e.g. `https://www.indeed.com`.
    #[serde(default = "default_base_origin")]
    pub base_origin: String,

    /// Path of the search-results page.
    #[serde(default = "default_search_path")]
    pub search_path: String,

    /// Search query (`q=`).
    #[serde(default = "default_query")]
    pub query: String,

    /// Optional location filter (`l=`).
    #[serde(default)]
    pub location: String,

    /// Results per page; page `n` starts at `n * page_size`.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Path prefix of employer pages, followed by the employer slug.
    #[serde(default = "default_employer_path_prefix")]
    pub employer_path_prefix: String,

    /// Substrings one of which must appear in the URL after navigating to an
    /// employer page, otherwise the page is treated as unavailable.
    #[serde(default = "default_employer_url_markers")]
    pub employer_url_markers: Vec<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_origin: default_base_origin(),
            search_path: default_search_path(),
            query: default_query(),
            location: String::new(),
            page_size: default_page_size(),
            employer_path_prefix: default_employer_path_prefix(),
            employer_url_markers: default_employer_url_markers(),
        }
    }
}

fn default_base_origin() -> String {
    "https://www.indeed.com".into()
}
fn default_search_path() -> String {
    "/jobs".into()
}
fn default_query() -> String {
    "GIS".into()
}
fn default_page_size() -> u32 {
    10
}
fn default_employer_path_prefix() -> String {
    "/cmp/".into()
}
fn default_employer_url_markers() -> Vec<String> {
    vec!["company".into(), "cmp".into()]
}

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlPoliciesConfig {
    /// Maximum number of search pages per run.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Number of independent browsing sessions.
    #[serde(default = "default_workers")]
    pub workers: u32,

    /// Per-request timeout in ms.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Upper bound in ms for waiting on page content.
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_ms: u64,

    /// Poll interval in ms while waiting on page content.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Fixed delay in ms used only when a page kind has no readiness selector.
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,

    /// Minimum ms between navigations.
    #[serde(default)]
    pub navigation_delay_ms: u64,

    /// User-Agent header override.
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Maximum employer posts kept per listing.
    #[serde(default = "default_section_limit")]
    pub max_employer_posts: usize,

    /// Maximum related listings kept per listing.
    #[serde(default = "default_section_limit")]
    pub max_related: usize,
}

impl Default for CrawlPoliciesConfig {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            workers: default_workers(),
            request_timeout_ms: default_request_timeout(),
            wait_timeout_ms: default_wait_timeout(),
            poll_interval_ms: default_poll_interval(),
            settle_delay_ms: default_settle_delay(),
            navigation_delay_ms: 0,
            user_agent: None,
            max_employer_posts: default_section_limit(),
            max_related: default_section_limit(),
        }
    }
}

fn default_max_pages() -> u32 {
    2
}
fn default_workers() -> u32 {
    1
}
fn default_request_timeout() -> u64 {
    30_000
}
fn default_wait_timeout() -> u64 {
    5_000
}
fn default_poll_interval() -> u64 {
    250
}
fn default_settle_delay() -> u64 {
    0
}
fn default_section_limit() -> usize {
    5
}

/// `[selectors]` section. Each value is a comma-separated CSS selector group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub card: String,
    pub card_title_link: String,
    pub card_employer: String,
    pub card_location: String,
    pub card_date: String,
    pub card_salary: String,
    pub card_rating: String,
    pub employer_post: String,
    pub employer_post_title: String,
    pub employer_post_date: String,
    pub related_section: String,
    pub related_link: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            card: ".cardOutline, .job_seen_beacon".into(),
            card_title_link: "h2.jobTitle a, h2 a".into(),
            card_employer: r#"[data-testid="company-name"], .companyName"#.into(),
            card_location: r#"[data-testid="text-location"], .companyLocation"#.into(),
            card_date: r#".date, [data-testid="myJobsStateDate"]"#.into(),
            card_salary: ".salary-snippet-container, .salaryOnly, .estimated-salary".into(),
            card_rating: r#"[data-testid="reviews-count"], [data-testid="holistic-rating"], .ratingsDisplay, .reviews"#.into(),
            employer_post: r#".job, .jobCard, [data-testid="jobCard"]"#.into(),
            employer_post_title: r#"h2 a, .jobTitle a, [data-testid="jobTitle"]"#.into(),
            employer_post_date: r#".date, .datePosted, [data-testid="myJobsStateDate"]"#.into(),
            related_section: r#"[data-testid="relatedQuerySections"], .relatedJobs"#.into(),
            related_link: "a".into(),
        }
    }
}

impl SelectorConfig {
    /// All selector groups with their field names, for validation.
    fn entries(&self) -> [(&'static str, &str); 12] {
        [
            ("card", self.card.as_str()),
            ("card_title_link", self.card_title_link.as_str()),
            ("card_employer", self.card_employer.as_str()),
            ("card_location", self.card_location.as_str()),
            ("card_date", self.card_date.as_str()),
            ("card_salary", self.card_salary.as_str()),
            ("card_rating", self.card_rating.as_str()),
            ("employer_post", self.employer_post.as_str()),
            ("employer_post_title", self.employer_post_title.as_str()),
            ("employer_post_date", self.employer_post_date.as_str()),
            ("related_section", self.related_section.as_str()),
            ("related_link", self.related_link.as_str()),
        ]
    }
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the libSQL database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "var/jobharvest.db".into()
}

/// `[export]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// JSON file receiving the listings harvested by a run. Empty disables export.
    #[serde(default = "default_export_path")]
    pub output_path: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_path: default_export_path(),
        }
    }
}

fn default_export_path() -> String {
    "var/harvested.json".into()
}

impl ExportConfig {
    /// Export destination, `None` when export is disabled.
    pub fn target(&self) -> Option<&Path> {
        let path = self.output_path.trim();
        (!path.is_empty()).then(|| Path::new(path))
    }
}

impl AppConfig {
    /// Reject configurations that cannot drive a crawl.
    pub fn validate(&self) -> Result<()> {
        let origin = Url::parse(&self.source.base_origin).map_err(|e| {
            HarvestError::config(format!(
                "invalid base_origin '{}': {e}",
                self.source.base_origin
            ))
        })?;
        if origin.cannot_be_a_base() {
            return Err(HarvestError::config(format!(
                "base_origin '{}' cannot be used as a base URL",
                self.source.base_origin
            )));
        }
        if self.source.page_size == 0 {
            return Err(HarvestError::config("page_size must be at least 1"));
        }
        if self.crawl.max_pages == 0 {
            return Err(HarvestError::config("max_pages must be at least 1"));
        }
        if self.crawl.workers == 0 {
            return Err(HarvestError::config("workers must be at least 1"));
        }
        for (name, group) in self.selectors.entries() {
            if scraper::Selector::parse(group).is_err() {
                return Err(HarvestError::config(format!(
                    "selector '{name}' does not parse: {group}"
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Crawl config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime crawl configuration, merged from the config file and CLI flags.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub base_origin: String,
    pub search_path: String,
    pub query: String,
    pub location: String,
    pub page_size: u32,
    pub employer_path_prefix: String,
    pub employer_url_markers: Vec<String>,
    pub max_pages: u32,
    pub workers: u32,
    pub request_timeout: Duration,
    pub wait_timeout: Duration,
    pub poll_interval: Duration,
    pub settle_delay: Duration,
    pub navigation_delay: Duration,
    pub user_agent: Option<String>,
    pub max_employer_posts: usize,
    pub max_related: usize,
    pub selectors: SelectorConfig,
}

impl From<&AppConfig> for CrawlConfig {
    fn from(config: &AppConfig) -> Self {
        let crawl = &config.crawl;
        Self {
            base_origin: config.source.base_origin.trim_end_matches('/').to_string(),
            search_path: config.source.search_path.clone(),
            query: config.source.query.clone(),
            location: config.source.location.clone(),
            page_size: config.source.page_size,
            employer_path_prefix: config.source.employer_path_prefix.clone(),
            employer_url_markers: config.source.employer_url_markers.clone(),
            max_pages: crawl.max_pages,
            workers: crawl.workers,
            request_timeout: Duration::from_millis(crawl.request_timeout_ms),
            wait_timeout: Duration::from_millis(crawl.wait_timeout_ms),
            poll_interval: Duration::from_millis(crawl.poll_interval_ms),
            settle_delay: Duration::from_millis(crawl.settle_delay_ms),
            navigation_delay: Duration::from_millis(crawl.navigation_delay_ms),
            user_agent: crawl.user_agent.clone(),
            max_employer_posts: crawl.max_employer_posts,
            max_related: crawl.max_related,
            selectors: config.selectors.clone(),
        }
    }
}

impl CrawlConfig {
    /// URL of search-results page `page` (0-based).
    pub fn search_url(&self, page: u32) -> Result<Url> {
        let mut url = Url::parse(&format!("{}{}", self.base_origin, self.search_path))
            .map_err(|e| HarvestError::config(format!("invalid search URL: {e}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("q", &self.query);
            if !self.location.is_empty() {
                pairs.append_pair("l", &self.location);
            }
            if page > 0 {
                let start = u64::from(page) * u64::from(self.page_size);
                pairs.append_pair("start", &start.to_string());
            }
        }
        Ok(url)
    }

    /// URL of the employer page for an already-derived employer slug.
    pub fn employer_url(&self, slug: &str) -> String {
        format!("{}{}{slug}", self.base_origin, self.employer_path_prefix)
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.jobharvest/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| HarvestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.jobharvest/jobharvest.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| HarvestError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| HarvestError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| HarvestError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| HarvestError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
