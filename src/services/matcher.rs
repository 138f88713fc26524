//! Content matcher: joins broadcast listings to on-demand catalog content
//!
//! A listing rarely carries one clean identifier, so matching runs a strict,
//! ordered strategy chain — NOLA code, TMS ID, program-ID mapping, then
//! normalized title — and the first strategy that both applies and hits
//! wins. Every successful strategy result and every supporting catalog
//! lookup is cached (1 hour); misses are never cached so late-arriving
//! episodes and transient outages get retried on the next request.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::services::cache::CacheStore;
use crate::services::media_manager::{Asset, CatalogApi, Episode, Show, ShowsFilter};
use crate::services::text_utils::{normalize_title, titles_overlap};
use crate::services::tvss::Listing;

/// Asset filters applied to every catalog asset lookup: finished programs
/// visible to everyone.
const ASSET_TYPE_FILTER: &str = "full_length";
const ASSET_VISIBILITY_FILTER: &str = "all_members";

/// Which strategy produced a match. Retained for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Nola,
    TmsId,
    ProgramId,
    Title,
}

/// The ordered strategy chain. Adding a strategy means adding a variant
/// here, a predicate arm in `applies_to`, and a lookup arm in `lookup` —
/// existing strategies stay untouched.
const MATCH_CHAIN: [MatchMethod; 4] = [
    MatchMethod::Nola,
    MatchMethod::TmsId,
    MatchMethod::ProgramId,
    MatchMethod::Title,
];

/// A matched piece of on-demand content. Derived and cacheable; never
/// mutated after creation — re-derived on cache miss or expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnDemandMatch {
    pub show: Show,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<Episode>,
    #[serde(default)]
    pub assets: Vec<Asset>,
    pub match_method: MatchMethod,
}

/// Batch-matching result for one listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedListing {
    pub listing: Listing,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_demand: Option<OnDemandMatch>,
    pub has_on_demand: bool,
}

/// A locally persisted show record, kept by the external content repository
/// so matched listings can link to a stable local page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShowRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// External content repository. Creation is idempotent on the catalog show
/// id; the matcher only ever does find-then-create.
#[async_trait]
pub trait ShowRepository: Send + Sync {
    async fn find_by_external_id(&self, show_id: &str) -> Result<Option<ShowRecord>>;
    async fn create(&self, show: &Show, listing: &Listing) -> Result<ShowRecord>;
}

/// The matching engine.
pub struct ContentMatcher {
    catalog: Option<Arc<dyn CatalogApi>>,
    cache: Arc<CacheStore>,
    repository: Option<Arc<dyn ShowRepository>>,
    /// Read-only program_id -> catalog show id mapping, maintained
    /// externally.
    program_mapping: HashMap<u64, String>,
}

impl ContentMatcher {
    pub fn new(catalog: Option<Arc<dyn CatalogApi>>, cache: Arc<CacheStore>) -> Self {
        Self {
            catalog,
            cache,
            repository: None,
            program_mapping: HashMap::new(),
        }
    }

    pub fn with_repository(mut self, repository: Arc<dyn ShowRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_program_mapping(mut self, mapping: HashMap<u64, String>) -> Self {
        self.program_mapping = mapping;
        self
    }

    /// Match one listing against the on-demand catalog. Strategies run in
    /// chain order; the first hit wins and later strategies are never
    /// attempted. Lookup failures are swallowed into "try the next
    /// strategy" — no match is `None`, never an error.
    pub async fn match_listing(&self, listing: &Listing) -> Option<OnDemandMatch> {
        for method in MATCH_CHAIN {
            if !self.applies_to(method, listing) {
                continue;
            }
            match self.lookup(method, listing).await {
                Ok(Some(found)) => {
                    info!(
                        title = %listing.title,
                        method = ?method,
                        show_id = %found.show.id,
                        "Matched listing to on-demand content"
                    );
                    return Some(found);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        title = %listing.title,
                        method = ?method,
                        error = %e,
                        "Match strategy failed, trying next"
                    );
                }
            }
        }
        None
    }

    /// Batch form of [`match_listing`]: independent per listing, sharing
    /// only the underlying cache.
    ///
    /// [`match_listing`]: ContentMatcher::match_listing
    pub async fn match_listings(&self, listings: &[Listing]) -> Vec<MatchedListing> {
        let mut matched = Vec::with_capacity(listings.len());
        for listing in listings {
            let on_demand = self.match_listing(listing).await;
            matched.push(MatchedListing {
                listing: listing.clone(),
                has_on_demand: on_demand.is_some(),
                on_demand,
            });
        }
        matched
    }

    /// Whether a strategy has the listing fields it needs.
    fn applies_to(&self, method: MatchMethod, listing: &Listing) -> bool {
        match method {
            MatchMethod::Nola => {
                non_empty(&listing.nola_root) && non_empty(&listing.nola_episode)
            }
            MatchMethod::TmsId => non_empty(&listing.tms_id),
            MatchMethod::ProgramId => listing.program_id.is_some(),
            MatchMethod::Title => !listing.title.is_empty(),
        }
    }

    async fn lookup(&self, method: MatchMethod, listing: &Listing) -> Result<Option<OnDemandMatch>> {
        match method {
            MatchMethod::Nola => {
                // applies_to guarantees both are present and non-empty
                let root = listing.nola_root.as_deref().unwrap_or_default();
                let episode = listing.nola_episode.as_deref().unwrap_or_default();
                self.match_by_nola(root, episode).await
            }
            MatchMethod::TmsId => {
                let tms_id = listing.tms_id.as_deref().unwrap_or_default();
                self.match_by_tms_id(tms_id).await
            }
            MatchMethod::ProgramId => {
                let program_id = match listing.program_id {
                    Some(id) => id,
                    None => return Ok(None),
                };
                self.match_by_program_id(program_id).await
            }
            MatchMethod::Title => self.match_by_title(listing).await,
        }
    }

    /// Strategy 1: NOLA code — the most reliable join key for PBS content.
    async fn match_by_nola(&self, nola_root: &str, nola_episode: &str) -> Result<Option<OnDemandMatch>> {
        let cache_key = format!("nola_{nola_root}_{nola_episode}");
        if let Some(cached) = self.cache.get::<OnDemandMatch>(&cache_key).await {
            debug!(key = %cache_key, "NOLA match served from cache");
            return Ok(Some(cached));
        }

        let catalog = match &self.catalog {
            Some(catalog) => catalog,
            None => return Ok(None),
        };

        let shows = catalog
            .find_shows(&ShowsFilter::by_nola_root(nola_root))
            .await?;
        let show = match shows.into_iter().next() {
            Some(show) => show,
            None => return Ok(None),
        };

        let episodes = self.all_show_episodes(&show.id).await?;
        let episode = episodes
            .into_iter()
            .find(|e| e.attributes.nola_episode.as_deref() == Some(nola_episode));

        let episode = match episode {
            Some(episode) => episode,
            None => return Ok(None),
        };

        let assets = match self.episode_assets(&episode.id).await {
            Ok(assets) => assets,
            Err(e) => {
                warn!(episode_id = %episode.id, error = %e, "Asset lookup failed, matching without assets");
                Vec::new()
            }
        };

        let found = OnDemandMatch {
            show,
            episode: Some(episode),
            assets,
            match_method: MatchMethod::Nola,
        };
        self.cache
            .set(&cache_key, &found, self.cache.ondemand_ttl())
            .await;
        Ok(Some(found))
    }

    /// Strategy 2: Gracenote TMS ID. The catalog has no TMS index today, so
    /// this can only ever be served from a pre-warmed cache entry; the slot
    /// and key stay so an index can be wired in without reordering the
    /// chain.
    async fn match_by_tms_id(&self, tms_id: &str) -> Result<Option<OnDemandMatch>> {
        let cache_key = format!("tms_{tms_id}");
        if let Some(cached) = self.cache.get::<OnDemandMatch>(&cache_key).await {
            debug!(key = %cache_key, "TMS match served from cache");
            return Ok(Some(cached));
        }

        Ok(None)
    }

    /// Strategy 3: externally maintained program_id -> show id mapping.
    async fn match_by_program_id(&self, program_id: u64) -> Result<Option<OnDemandMatch>> {
        let cache_key = format!("program_{program_id}");
        if let Some(cached) = self.cache.get::<OnDemandMatch>(&cache_key).await {
            debug!(key = %cache_key, "Program-ID match served from cache");
            return Ok(Some(cached));
        }

        let show_id = match self.program_mapping.get(&program_id) {
            Some(show_id) => show_id.clone(),
            None => return Ok(None),
        };

        let found = match self.show_content(&show_id).await? {
            Some(found) => found,
            None => return Ok(None),
        };

        self.cache
            .set(&cache_key, &found, self.cache.ondemand_ttl())
            .await;
        Ok(Some(found))
    }

    /// Strategy 4: normalized title comparison, the least reliable fallback.
    /// Takes the first show the catalog returns for the title — multiple
    /// same-titled shows are not tie-broken.
    async fn match_by_title(&self, listing: &Listing) -> Result<Option<OnDemandMatch>> {
        let search_title = normalize_title(&listing.title);
        if search_title.is_empty() {
            return Ok(None);
        }
        let search_episode = listing
            .episode_title
            .as_deref()
            .map(normalize_title)
            .unwrap_or_default();

        // Cache probe before the catalog check, same as every other
        // strategy: a pre-warmed entry is served even with no catalog
        // client configured.
        let cache_key = format!("title_{search_title}_{search_episode}");
        if let Some(cached) = self.cache.get::<OnDemandMatch>(&cache_key).await {
            debug!(key = %cache_key, "Title match served from cache");
            return Ok(Some(cached));
        }

        let catalog = match &self.catalog {
            Some(catalog) => catalog,
            None => return Ok(None),
        };

        let shows = catalog
            .find_shows(&ShowsFilter::by_title(&search_title))
            .await?;
        let show = match shows.into_iter().next() {
            Some(show) => show,
            None => return Ok(None),
        };

        // With an episode title, try to pin down the exact episode by
        // substring overlap in either direction.
        if !search_episode.is_empty() {
            let episodes = self.all_show_episodes(&show.id).await?;
            for episode in episodes {
                let episode_title = match &episode.attributes.title {
                    Some(title) => normalize_title(title),
                    None => continue,
                };
                if titles_overlap(&episode_title, &search_episode) {
                    let assets = match self.episode_assets(&episode.id).await {
                        Ok(assets) => assets,
                        Err(e) => {
                            warn!(episode_id = %episode.id, error = %e, "Asset lookup failed, matching without assets");
                            Vec::new()
                        }
                    };
                    let found = OnDemandMatch {
                        show,
                        episode: Some(episode),
                        assets,
                        match_method: MatchMethod::Title,
                    };
                    self.cache
                        .set(&cache_key, &found, self.cache.ondemand_ttl())
                        .await;
                    return Ok(Some(found));
                }
            }
        }

        // No episode pinned down: return the show with its show-level
        // assets.
        let assets = match self.show_assets(&show.id).await {
            Ok(assets) => assets,
            Err(e) => {
                warn!(show_id = %show.id, error = %e, "Asset lookup failed, matching without assets");
                Vec::new()
            }
        };
        let found = OnDemandMatch {
            show,
            episode: None,
            assets,
            match_method: MatchMethod::Title,
        };
        self.cache
            .set(&cache_key, &found, self.cache.ondemand_ttl())
            .await;
        Ok(Some(found))
    }

    /// All episodes of a show: seasons ascending, episodes in season order,
    /// specials appended last. Cached as one sequence.
    async fn all_show_episodes(&self, show_id: &str) -> Result<Vec<Episode>> {
        let cache_key = format!("show_episodes_{show_id}");
        if let Some(cached) = self.cache.get::<Vec<Episode>>(&cache_key).await {
            debug!(key = %cache_key, "Show episodes served from cache");
            return Ok(cached);
        }

        let catalog = match &self.catalog {
            Some(catalog) => catalog,
            None => return Ok(Vec::new()),
        };

        let mut episodes = Vec::new();

        let mut seasons = catalog.get_show_seasons(show_id).await?;
        seasons.sort_by_key(|s| s.attributes.ordinal.unwrap_or(u32::MAX));

        for season in seasons {
            match catalog.get_season_episodes(&season.id).await {
                Ok(season_episodes) => episodes.extend(season_episodes),
                Err(e) => {
                    warn!(season_id = %season.id, error = %e, "Season episode lookup failed, skipping season");
                }
            }
        }

        match catalog.get_show_specials(show_id).await {
            Ok(specials) => episodes.extend(specials),
            Err(e) => {
                warn!(show_id = %show_id, error = %e, "Specials lookup failed, skipping");
            }
        }

        self.cache
            .set(&cache_key, &episodes, self.cache.ondemand_ttl())
            .await;
        Ok(episodes)
    }

    async fn episode_assets(&self, episode_id: &str) -> Result<Vec<Asset>> {
        let cache_key = format!("episode_assets_{episode_id}");
        if let Some(cached) = self.cache.get::<Vec<Asset>>(&cache_key).await {
            return Ok(cached);
        }

        let catalog = match &self.catalog {
            Some(catalog) => catalog,
            None => return Ok(Vec::new()),
        };

        let assets = catalog
            .get_episode_assets(episode_id, ASSET_TYPE_FILTER, ASSET_VISIBILITY_FILTER)
            .await?;
        self.cache
            .set(&cache_key, &assets, self.cache.ondemand_ttl())
            .await;
        Ok(assets)
    }

    async fn show_assets(&self, show_id: &str) -> Result<Vec<Asset>> {
        let cache_key = format!("show_assets_{show_id}");
        if let Some(cached) = self.cache.get::<Vec<Asset>>(&cache_key).await {
            return Ok(cached);
        }

        let catalog = match &self.catalog {
            Some(catalog) => catalog,
            None => return Ok(Vec::new()),
        };

        let assets = catalog
            .get_show_assets(show_id, ASSET_TYPE_FILTER, ASSET_VISIBILITY_FILTER)
            .await?;
        self.cache
            .set(&cache_key, &assets, self.cache.ondemand_ttl())
            .await;
        Ok(assets)
    }

    /// Resolve a show directly by catalog id (program-ID strategy path).
    async fn show_content(&self, show_id: &str) -> Result<Option<OnDemandMatch>> {
        let cache_key = format!("show_content_{show_id}");
        if let Some(cached) = self.cache.get::<OnDemandMatch>(&cache_key).await {
            return Ok(Some(cached));
        }

        let catalog = match &self.catalog {
            Some(catalog) => catalog,
            None => return Ok(None),
        };

        let show = match catalog.get_show(show_id).await? {
            Some(show) => show,
            None => return Ok(None),
        };

        let assets = match self.show_assets(show_id).await {
            Ok(assets) => assets,
            Err(e) => {
                warn!(show_id = %show_id, error = %e, "Asset lookup failed, matching without assets");
                Vec::new()
            }
        };

        let found = OnDemandMatch {
            show,
            episode: None,
            assets,
            match_method: MatchMethod::ProgramId,
        };
        self.cache
            .set(&cache_key, &found, self.cache.ondemand_ttl())
            .await;
        Ok(Some(found))
    }

    /// Ensure a persistent show record exists for a match so renders can
    /// link to a stable local page. Idempotent: checked by catalog show id
    /// before creating. Deliberately outside the match cache.
    pub async fn ensure_show_record(
        &self,
        found: &OnDemandMatch,
        listing: &Listing,
    ) -> Option<ShowRecord> {
        let repository = self.repository.as_ref()?;

        match repository.find_by_external_id(&found.show.id).await {
            Ok(Some(existing)) => return Some(existing),
            Ok(None) => {}
            Err(e) => {
                warn!(show_id = %found.show.id, error = %e, "Show record lookup failed");
                return None;
            }
        }

        match repository.create(&found.show, listing).await {
            Ok(created) => {
                info!(show_id = %found.show.id, record_id = %created.id, "Created show record");
                Some(created)
            }
            Err(e) => {
                warn!(show_id = %found.show.id, error = %e, "Show record creation failed");
                None
            }
        }
    }
}

fn non_empty(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|s| !s.is_empty())
}
