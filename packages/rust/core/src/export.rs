//! Batch export of a run's newly harvested listings.

use std::path::Path;

use tracing::{debug, instrument};

use jobharvest_shared::{HarvestError, Listing, Result};

/// Write `listings` to `path` as pretty-printed JSON, creating parent
/// directories as needed.
#[instrument(skip_all, fields(path = %path.display(), count = listings.len()))]
pub fn export_listings(path: &Path, listings: &[Listing]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| HarvestError::io(parent, e))?;
        }
    }

    let json = serde_json::to_string_pretty(listings)
        .map_err(|e| HarvestError::validation(format!("JSON serialization failed: {e}")))?;
    std::fs::write(path, json).map_err(|e| HarvestError::io(path, e))?;
    debug!("wrote export file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn writes_listings_as_json_array() {
        let dir = std::env::temp_dir().join(format!("jh-export-{}", uuid::Uuid::now_v7()));
        let path = dir.join("nested").join("out.json");
        let listings = vec![Listing {
            title: "GIS Analyst".into(),
            employer: "Acme".into(),
            posted_date: NaiveDate::from_ymd_opt(2024, 5, 17),
            url: "https://www.indeed.com/viewjob?jk=1".into(),
            review_count: 3,
            ..Default::default()
        }];

        export_listings(&path, &listings).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let back: Vec<Listing> = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, listings);
        assert!(raw.contains("\"posted_date\": \"2024-05-17\""));
    }

    #[test]
    fn empty_run_writes_empty_array() {
        let path = std::env::temp_dir().join(format!("jh-export-{}.json", uuid::Uuid::now_v7()));
        export_listings(&path, &[]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap().trim(), "[]");
    }
}
