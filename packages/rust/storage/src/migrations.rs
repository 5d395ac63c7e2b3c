//! SQL migration definitions for the jobharvest database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: listings, employer_posts, related_listings",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Harvested listings; the URL is the identity and is unique server-side
CREATE TABLE IF NOT EXISTS listings (
    id           TEXT PRIMARY KEY,
    title        TEXT NOT NULL,
    employer     TEXT NOT NULL DEFAULT '',
    location     TEXT NOT NULL DEFAULT '',
    posted_date  TEXT,
    salary       TEXT NOT NULL DEFAULT '',
    url          TEXT NOT NULL UNIQUE,
    review_count INTEGER NOT NULL DEFAULT 0,
    scraped_at   TEXT NOT NULL
);

-- Employer-page postings, for posting-frequency analysis
CREATE TABLE IF NOT EXISTS employer_posts (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    listing_id  TEXT REFERENCES listings(id) ON DELETE SET NULL,
    employer    TEXT NOT NULL,
    title       TEXT NOT NULL DEFAULT '',
    posted_date TEXT,
    url         TEXT NOT NULL DEFAULT '',
    scraped_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_employer_posts_employer ON employer_posts(employer);

-- Related listings owned by one parent listing
CREATE TABLE IF NOT EXISTS related_listings (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    listing_id TEXT NOT NULL REFERENCES listings(id) ON DELETE CASCADE,
    title      TEXT NOT NULL DEFAULT '',
    employer   TEXT NOT NULL DEFAULT '',
    location   TEXT NOT NULL DEFAULT '',
    url        TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_related_listing ON related_listings(listing_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Crawl run history",
            sql: r#"
CREATE TABLE IF NOT EXISTS crawl_runs (
    id          TEXT PRIMARY KEY,
    query       TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    stats_json  TEXT
);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
