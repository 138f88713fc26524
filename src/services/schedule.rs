//! Schedule assembler
//!
//! Orchestrates the TVSS client and the content matcher for one request:
//! fetch raw listings, bake on-demand matches into every listing, and cache
//! the composed schedule under a (station, date, feed) key. On a cache hit
//! the composed schedule comes back verbatim — matching is never re-run.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::services::cache::{CacheStats, CacheStore};
use crate::services::matcher::{ContentMatcher, MatchedListing, OnDemandMatch};
use crate::services::media_manager::{CatalogApi, MediaManagerClient};
use crate::services::tvss::{Listing, ScheduleApi, ScheduleDay, TvssClient, parse_hhmm};

/// Arguments for one schedule request. Unset fields fall back to the
/// service configuration.
#[derive(Debug, Clone, Default)]
pub struct ScheduleArgs {
    /// Station callsign; defaults to the configured station
    pub callsign: Option<String>,
    /// Feed CID; empty means all feeds of the station
    pub feed: Option<String>,
    /// Date in YYYYMMDD; defaults to today
    pub date: Option<String>,
    /// Whether to request Gracenote images
    pub images: Option<bool>,
    /// Whether to match listings against on-demand content
    pub link_ondemand: Option<bool>,
}

/// Inclusive HHMM bands for [`filter_by_time_period`].
const TIME_PERIODS: [(&str, u32, u32); 4] = [
    ("early_morning", 0, 629),
    ("morning", 700, 1129),
    ("afternoon", 1200, 1829),
    ("evening", 1830, 2359),
];

/// The public surface of the schedule core.
pub struct ScheduleService {
    config: Config,
    schedule_client: Arc<dyn ScheduleApi>,
    matcher: Arc<ContentMatcher>,
    cache: Arc<CacheStore>,
}

impl ScheduleService {
    pub fn new(
        config: Config,
        schedule_client: Arc<dyn ScheduleApi>,
        matcher: Arc<ContentMatcher>,
        cache: Arc<CacheStore>,
    ) -> Self {
        Self {
            config,
            schedule_client,
            matcher,
            cache,
        }
    }

    /// Wire up the production clients from configuration.
    pub fn from_config(config: Config) -> Self {
        let cache = Arc::new(
            CacheStore::with_dir(&config.cache_path, config.cache_enabled)
                .with_ttls(config.cache_schedule_duration, config.cache_ondemand_duration),
        );

        let catalog: Option<Arc<dyn CatalogApi>> =
            match (&config.mm_client_id, &config.mm_client_secret) {
                (Some(id), Some(secret)) => Some(Arc::new(MediaManagerClient::new(
                    id,
                    secret,
                    &config.mm_endpoint,
                ))),
                _ => None,
            };

        let matcher = Arc::new(ContentMatcher::new(catalog, cache.clone()));
        let schedule_client: Arc<dyn ScheduleApi> =
            Arc::new(TvssClient::new(&config.tvss_api_key));

        Self::new(config, schedule_client, matcher, cache)
    }

    /// Fetch (or serve from cache) the composed schedule for a station and
    /// date. On a miss this fetches listings, matches every listing in
    /// every feed when matching is enabled, and caches the result for the
    /// configured schedule TTL.
    ///
    /// Time-window narrowing is deliberately not done here: pass the result
    /// through [`filter_by_hours`] / [`filter_by_time_period`], which are
    /// pure and never touch the cache.
    pub async fn get_schedule(&self, args: &ScheduleArgs) -> Result<ScheduleDay> {
        let callsign = args
            .callsign
            .clone()
            .or_else(|| self.config.station_callsign.clone())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::Configuration("No station callsign configured".to_string()))?;

        let date = args
            .date
            .clone()
            .unwrap_or_else(|| chrono::Local::now().format("%Y%m%d").to_string());
        let feed = args.feed.clone().unwrap_or_default();
        let images = args.images.unwrap_or(self.config.show_images);
        let link_ondemand = args.link_ondemand.unwrap_or(self.config.link_ondemand);

        if let Some(cached) = self
            .cache
            .get_schedule::<ScheduleDay>(&callsign, &date, &feed)
            .await
        {
            debug!(callsign = %callsign, date = %date, "Schedule served from cache");
            return Ok(cached);
        }

        info!(callsign = %callsign, date = %date, feed = %feed, "Assembling schedule");

        let feed_arg = (!feed.is_empty()).then_some(feed.as_str());
        let mut schedule = self
            .schedule_client
            .get_listings(&callsign, &date, feed_arg, images)
            .await?;

        if link_ondemand {
            self.match_schedule_content(&mut schedule).await;
        }

        self.cache
            .set_schedule(&callsign, &date, &feed, &schedule)
            .await;

        Ok(schedule)
    }

    /// Bake on-demand matches into every listing of every feed, in place.
    async fn match_schedule_content(&self, schedule: &mut ScheduleDay) {
        for feed in &mut schedule.feeds {
            for listing in &mut feed.listings {
                match self.matcher.match_listing(listing).await {
                    Some(found) => {
                        if let Some(record) =
                            self.matcher.ensure_show_record(&found, listing).await
                        {
                            listing.show_url = record.url;
                        }
                        listing.on_demand = Some(found);
                        listing.has_on_demand = Some(true);
                    }
                    None => {
                        listing.has_on_demand = Some(false);
                    }
                }
            }
        }
    }

    /// Match one listing. Exposed for callers that already hold listings.
    pub async fn match_listing(&self, listing: &Listing) -> Option<OnDemandMatch> {
        self.matcher.match_listing(listing).await
    }

    /// Batch-match listings. Independent per listing.
    pub async fn match_listings(&self, listings: &[Listing]) -> Vec<MatchedListing> {
        self.matcher.match_listings(listings).await
    }

    /// Drop every cache entry this core has written.
    pub async fn clear_all_cache(&self) {
        info!("Clearing all schedule cache");
        self.cache.clear_all().await;
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }
}

/// Keep only listings starting within `[now, now + hours]`, where `now` is
/// minutes since midnight. Pure; combinable with [`filter_by_time_period`].
pub fn filter_by_hours(schedule: &ScheduleDay, now_minutes: u32, hours: u32) -> ScheduleDay {
    let end_minutes = now_minutes + hours * 60;

    let mut filtered = schedule.clone();
    for feed in &mut filtered.feeds {
        feed.listings.retain(|listing| {
            let start = parse_hhmm(&listing.start_time);
            start >= now_minutes && start <= end_minutes
        });
    }
    filtered
}

/// Keep only listings whose start time falls in the named period's
/// inclusive HHMM band. Unknown periods and `all_day` filter nothing.
pub fn filter_by_time_period(schedule: &ScheduleDay, time_period: &str) -> ScheduleDay {
    let band = TIME_PERIODS
        .iter()
        .find(|(name, _, _)| *name == time_period);

    let (_, start, end) = match band {
        Some(band) => *band,
        None => return schedule.clone(),
    };

    let mut filtered = schedule.clone();
    for feed in &mut filtered.feeds {
        feed.listings.retain(|listing| {
            let hhmm: u32 = listing.start_time.parse().unwrap_or(0);
            hhmm >= start && hhmm <= end
        });
    }
    filtered
}
