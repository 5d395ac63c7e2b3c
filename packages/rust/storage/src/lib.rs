//! libSQL storage layer for harvested listings.
//!
//! The [`Storage`] struct wraps a local libSQL database holding listings,
//! employer posts, related listings, and crawl run history.
//!
//! **Identity rule:** the `listings.url` column is `UNIQUE`. Inserts use
//! `ON CONFLICT(url) DO NOTHING`, so a second insert of the same URL is a
//! no-op even when several writers race; [`Storage::insert_listing`] reports
//! it as `Ok(None)` rather than an error.

mod migrations;

use std::path::Path;

use chrono::Utc;
use jobharvest_shared::{EmployerPost, HarvestError, Listing, RelatedListing, Result};
use libsql::{Connection, Database, params};
use uuid::Uuid;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// Row counts across the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub listings: u64,
    pub employer_posts: u64,
    pub related_listings: u64,
}

fn storage_err(e: impl std::fmt::Display) -> HarvestError {
    HarvestError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| HarvestError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` for reporting only.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(HarvestError::Storage(format!(
                "database not found at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    HarvestError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(HarvestError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Listing operations
    // -----------------------------------------------------------------------

    /// Whether a listing with this canonical URL is already stored.
    pub async fn listing_exists_by_url(&self, url: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query("SELECT 1 FROM listings WHERE url = ?1 LIMIT 1", params![url])
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(_)) => Ok(true),
            Ok(None) => Ok(false),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Insert a listing. Returns the new row id, or `None` if the URL is
    /// already stored.
    pub async fn insert_listing(&self, listing: &Listing) -> Result<Option<String>> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn
            .execute(
                "INSERT INTO listings (id, title, employer, location, posted_date, salary, url, review_count, scraped_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(url) DO NOTHING",
                params![
                    id.as_str(),
                    listing.title.as_str(),
                    listing.employer.as_str(),
                    listing.location.as_str(),
                    listing.posted_date.map(|d| d.to_string()),
                    listing.salary.as_str(),
                    listing.url.as_str(),
                    i64::from(listing.review_count),
                    now.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;

        Ok((changed > 0).then_some(id))
    }

    // -----------------------------------------------------------------------
    // Secondary records
    // -----------------------------------------------------------------------

    /// Insert employer posts observed while enriching `listing_id`.
    /// Returns the number of rows written.
    pub async fn insert_employer_posts(
        &self,
        listing_id: &str,
        posts: &[EmployerPost],
    ) -> Result<usize> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        for post in posts {
            self.conn
                .execute(
                    "INSERT INTO employer_posts (listing_id, employer, title, posted_date, url, scraped_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        listing_id,
                        post.employer.as_str(),
                        post.title.as_str(),
                        post.posted_date.map(|d| d.to_string()),
                        post.url.as_str(),
                        now.as_str(),
                    ],
                )
                .await
                .map_err(storage_err)?;
        }
        Ok(posts.len())
    }

    /// Insert related listings owned by `listing_id`.
    /// Returns the number of rows written.
    pub async fn insert_related_listings(
        &self,
        listing_id: &str,
        related: &[RelatedListing],
    ) -> Result<usize> {
        self.check_writable()?;
        for entry in related {
            self.conn
                .execute(
                    "INSERT INTO related_listings (listing_id, title, employer, location, url)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        listing_id,
                        entry.title.as_str(),
                        entry.employer.as_str(),
                        entry.location.as_str(),
                        entry.url.as_str(),
                    ],
                )
                .await
                .map_err(storage_err)?;
        }
        Ok(related.len())
    }

    // -----------------------------------------------------------------------
    // Reporting
    // -----------------------------------------------------------------------

    /// Row counts of the three record tables.
    pub async fn counts(&self) -> Result<StoreCounts> {
        Ok(StoreCounts {
            listings: self.count("SELECT COUNT(*) FROM listings").await?,
            employer_posts: self.count("SELECT COUNT(*) FROM employer_posts").await?,
            related_listings: self.count("SELECT COUNT(*) FROM related_listings").await?,
        })
    }

    async fn count(&self, sql: &str) -> Result<u64> {
        let mut rows = self.conn.query(sql, params![]).await.map_err(storage_err)?;
        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).map_or(0, |v| v.max(0) as u64)),
            Ok(None) => Ok(0),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Employers ranked by number of distinct observed posts (by URL).
    /// Returns `Vec<(employer, post_count)>`.
    pub async fn employer_post_frequency(&self, limit: u32) -> Result<Vec<(String, u64)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT employer, COUNT(DISTINCT url) AS posts
                 FROM employer_posts
                 GROUP BY employer
                 ORDER BY posts DESC, employer ASC
                 LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let employer: String = row.get(0).map_err(storage_err)?;
            let posts = row.get::<i64>(1).map_or(0, |v| v.max(0) as u64);
            results.push((employer, posts));
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Crawl run operations
    // -----------------------------------------------------------------------

    /// Record the start of a crawl run. Returns the generated run ID.
    pub async fn insert_crawl_run(&self, query: &str) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO crawl_runs (id, query, started_at) VALUES (?1, ?2, ?3)",
                params![id.as_str(), query, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(id)
    }

    /// Mark a crawl run finished with its stats.
    pub async fn finish_crawl_run(&self, run_id: &str, stats_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE crawl_runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, run_id],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Stats JSON of a finished run.
    pub async fn crawl_run_stats(&self, run_id: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT stats_json FROM crawl_runs WHERE id = ?1",
                params![run_id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<String>(0).ok()),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }
}
