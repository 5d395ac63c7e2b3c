//! Harvest orchestration for jobharvest.
//!
//! This crate ties the crawler and storage together into complete runs:
//! search pages are walked, unseen listings are enriched and persisted
//! through the [`DedupGateway`], and the new listings are reported back.

pub mod dedup;
pub mod export;
pub mod orchestrator;

#[cfg(test)]
mod testing;

pub use dedup::{DedupGateway, PersistOutcome};
pub use export::export_listings;
pub use orchestrator::{
    HarvestReport, Harvester, ProgressReporter, SilentProgress, StopReason, split_pages,
};
