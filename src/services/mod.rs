//! Core services: caching, upstream clients, matching, and assembly

pub mod cache;
pub mod matcher;
pub mod media_manager;
pub mod schedule;
pub mod text_utils;
pub mod tvss;

pub use cache::{CacheStats, CacheStore, CacheTier, FileTier, MemoryTier};
pub use matcher::{
    ContentMatcher, MatchMethod, MatchedListing, OnDemandMatch, ShowRecord, ShowRepository,
};
pub use media_manager::{
    Asset, CatalogApi, Episode, MediaManagerClient, Season, Show, ShowsFilter,
};
pub use schedule::{ScheduleArgs, ScheduleService, filter_by_hours, filter_by_time_period};
pub use tvss::{Feed, Listing, ScheduleApi, ScheduleDay, TvssClient};
