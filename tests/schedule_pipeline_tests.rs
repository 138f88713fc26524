//! Integration tests for the schedule matching pipeline
//!
//! These tests verify the complete flow with stubbed upstream services:
//! - Strategy chain ordering (NOLA beats title)
//! - Match caching and the no-negative-cache retry behavior
//! - Cache store properties (clear-all, disabled mode)
//! - End-to-end schedule assembly with baked-in matches

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use assert_matches::assert_matches;
use async_trait::async_trait;
use pretty_assertions::assert_eq;

use pbs_schedule::Result as CoreResult;
use pbs_schedule::services::cache::CacheStore;
use pbs_schedule::services::matcher::{
    ContentMatcher, MatchMethod, ShowRecord, ShowRepository,
};
use pbs_schedule::services::media_manager::{
    Asset, AssetAttributes, CatalogApi, Episode, EpisodeAttributes, Season, SeasonAttributes,
    Show, ShowAttributes, ShowsFilter,
};
use pbs_schedule::services::schedule::{ScheduleArgs, ScheduleService};
use pbs_schedule::services::tvss::{Feed, Listing, ScheduleApi, ScheduleDay};
use pbs_schedule::{Config, Error};

// ============================================================================
// Stub collaborators
// ============================================================================

fn show(id: &str, title: &str, nola_root: Option<&str>) -> Show {
    Show {
        id: id.to_string(),
        attributes: ShowAttributes {
            title: Some(title.to_string()),
            nola_root: nola_root.map(str::to_string),
            ..Default::default()
        },
    }
}

fn season(id: &str, ordinal: u32) -> Season {
    Season {
        id: id.to_string(),
        attributes: SeasonAttributes {
            ordinal: Some(ordinal),
        },
    }
}

fn episode(id: &str, title: &str, nola_episode: Option<&str>) -> Episode {
    Episode {
        id: id.to_string(),
        attributes: EpisodeAttributes {
            title: Some(title.to_string()),
            nola_episode: nola_episode.map(str::to_string),
            ordinal: None,
        },
    }
}

fn asset(id: &str) -> Asset {
    Asset {
        id: id.to_string(),
        attributes: AssetAttributes {
            title: None,
            duration: Some(3300),
            object_type: Some("full_length".to_string()),
            player_url: Some(format!("https://player.example.org/{id}")),
        },
    }
}

/// In-memory catalog with a per-call counter, so tests can assert how many
/// upstream calls a code path issued.
#[derive(Default)]
struct StubCatalog {
    shows: Vec<Show>,
    /// show id -> seasons
    seasons: HashMap<String, Vec<Season>>,
    /// season id -> episodes
    episodes: HashMap<String, Vec<Episode>>,
    /// show id -> specials
    specials: HashMap<String, Vec<Episode>>,
    /// episode id -> assets
    episode_assets: HashMap<String, Vec<Asset>>,
    /// show id -> assets
    show_assets: HashMap<String, Vec<Asset>>,
    calls: AtomicUsize,
}

impl StubCatalog {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CatalogApi for StubCatalog {
    async fn find_shows(&self, filter: &ShowsFilter) -> CoreResult<Vec<Show>> {
        self.bump();
        if let Some(root) = &filter.nola_root {
            return Ok(self
                .shows
                .iter()
                .filter(|s| s.attributes.nola_root.as_deref() == Some(root.as_str()))
                .cloned()
                .collect());
        }
        if let Some(title) = &filter.title {
            return Ok(self
                .shows
                .iter()
                .filter(|s| {
                    s.attributes
                        .title
                        .as_deref()
                        .is_some_and(|t| t.eq_ignore_ascii_case(title))
                })
                .cloned()
                .collect());
        }
        Ok(self.shows.clone())
    }

    async fn get_show(&self, show_id: &str) -> CoreResult<Option<Show>> {
        self.bump();
        Ok(self.shows.iter().find(|s| s.id == show_id).cloned())
    }

    async fn get_show_seasons(&self, show_id: &str) -> CoreResult<Vec<Season>> {
        self.bump();
        Ok(self.seasons.get(show_id).cloned().unwrap_or_default())
    }

    async fn get_season_episodes(&self, season_id: &str) -> CoreResult<Vec<Episode>> {
        self.bump();
        Ok(self.episodes.get(season_id).cloned().unwrap_or_default())
    }

    async fn get_show_specials(&self, show_id: &str) -> CoreResult<Vec<Episode>> {
        self.bump();
        Ok(self.specials.get(show_id).cloned().unwrap_or_default())
    }

    async fn get_episode_assets(
        &self,
        episode_id: &str,
        _type_filter: &str,
        _visibility_filter: &str,
    ) -> CoreResult<Vec<Asset>> {
        self.bump();
        Ok(self.episode_assets.get(episode_id).cloned().unwrap_or_default())
    }

    async fn get_show_assets(
        &self,
        show_id: &str,
        _type_filter: &str,
        _visibility_filter: &str,
    ) -> CoreResult<Vec<Asset>> {
        self.bump();
        Ok(self.show_assets.get(show_id).cloned().unwrap_or_default())
    }
}

/// Catalog whose every call fails, for exercising the degradation paths.
struct FailingCatalog;

#[async_trait]
impl CatalogApi for FailingCatalog {
    async fn find_shows(&self, _filter: &ShowsFilter) -> CoreResult<Vec<Show>> {
        Err(Error::Transport("catalog unreachable".to_string()))
    }
    async fn get_show(&self, _show_id: &str) -> CoreResult<Option<Show>> {
        Err(Error::Transport("catalog unreachable".to_string()))
    }
    async fn get_show_seasons(&self, _show_id: &str) -> CoreResult<Vec<Season>> {
        Err(Error::Transport("catalog unreachable".to_string()))
    }
    async fn get_season_episodes(&self, _season_id: &str) -> CoreResult<Vec<Episode>> {
        Err(Error::Transport("catalog unreachable".to_string()))
    }
    async fn get_show_specials(&self, _show_id: &str) -> CoreResult<Vec<Episode>> {
        Err(Error::Transport("catalog unreachable".to_string()))
    }
    async fn get_episode_assets(
        &self,
        _episode_id: &str,
        _type_filter: &str,
        _visibility_filter: &str,
    ) -> CoreResult<Vec<Asset>> {
        Err(Error::Transport("catalog unreachable".to_string()))
    }
    async fn get_show_assets(
        &self,
        _show_id: &str,
        _type_filter: &str,
        _visibility_filter: &str,
    ) -> CoreResult<Vec<Asset>> {
        Err(Error::Transport("catalog unreachable".to_string()))
    }
}

/// Canned TVSS responses with a call counter.
struct StubSchedule {
    day: ScheduleDay,
    calls: AtomicUsize,
}

impl StubSchedule {
    fn new(day: ScheduleDay) -> Self {
        Self {
            day,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScheduleApi for StubSchedule {
    async fn get_listings(
        &self,
        _callsign: &str,
        _date: &str,
        _feed: Option<&str>,
        _fetch_images: bool,
    ) -> CoreResult<ScheduleDay> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.day.clone())
    }
}

/// In-memory show repository with a creation counter.
#[derive(Default)]
struct StubRepository {
    records: Mutex<HashMap<String, ShowRecord>>,
    creates: AtomicUsize,
}

impl StubRepository {
    fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ShowRepository for StubRepository {
    async fn find_by_external_id(&self, show_id: &str) -> CoreResult<Option<ShowRecord>> {
        Ok(self.records.lock().unwrap().get(show_id).cloned())
    }

    async fn create(&self, show: &Show, _listing: &Listing) -> CoreResult<ShowRecord> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let record = ShowRecord {
            id: format!("record-{}", show.id),
            url: Some(format!("https://example.org/shows/{}", show.id)),
        };
        self.records
            .lock()
            .unwrap()
            .insert(show.id.clone(), record.clone());
        Ok(record)
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Catalog holding the show "Nature" (NOLA root NATR) with one season whose
/// episode 01 carries NOLA episode "01".
fn nature_catalog() -> StubCatalog {
    let mut catalog = StubCatalog {
        shows: vec![show("show-natr", "Nature", Some("NATR"))],
        ..Default::default()
    };
    catalog
        .seasons
        .insert("show-natr".to_string(), vec![season("season-1", 1)]);
    catalog.episodes.insert(
        "season-1".to_string(),
        vec![episode("ep-forger", "The Forger", Some("01"))],
    );
    catalog
        .episode_assets
        .insert("ep-forger".to_string(), vec![asset("asset-forger")]);
    catalog
        .show_assets
        .insert("show-natr".to_string(), vec![asset("asset-show")]);
    catalog
}

fn nature_listing() -> Listing {
    Listing {
        title: "Nature".to_string(),
        episode_title: Some("The Forger".to_string()),
        start_time: "2000".to_string(),
        minutes: 60,
        nola_root: Some("NATR".to_string()),
        nola_episode: Some("01".to_string()),
        ..Default::default()
    }
}

fn matcher_with(catalog: Arc<StubCatalog>) -> ContentMatcher {
    ContentMatcher::new(Some(catalog), Arc::new(CacheStore::in_memory(true)))
}

// ============================================================================
// Strategy chain tests
// ============================================================================

#[tokio::test]
async fn nola_match_takes_priority_over_title() {
    let catalog = Arc::new(nature_catalog());
    // "Nature" would also match by title; NOLA must win.
    let matcher = matcher_with(catalog);

    let found = matcher.match_listing(&nature_listing()).await.unwrap();
    assert_eq!(found.match_method, MatchMethod::Nola);
    assert_eq!(found.show.id, "show-natr");
    assert_eq!(found.episode.as_ref().unwrap().id, "ep-forger");
    assert_eq!(found.assets.len(), 1);
}

#[tokio::test]
async fn title_only_listing_with_no_matching_show_is_none() {
    let catalog = Arc::new(nature_catalog());
    let matcher = matcher_with(catalog);

    let listing = Listing {
        title: "Antiques Roadshow".to_string(),
        ..Default::default()
    };
    assert!(matcher.match_listing(&listing).await.is_none());
}

#[tokio::test]
async fn title_match_falls_back_to_show_level_assets() {
    let catalog = Arc::new(nature_catalog());
    let matcher = matcher_with(catalog);

    // No NOLA identifiers and no episode title: show-level match.
    let listing = Listing {
        title: "Nature".to_string(),
        ..Default::default()
    };
    let found = matcher.match_listing(&listing).await.unwrap();
    assert_eq!(found.match_method, MatchMethod::Title);
    assert!(found.episode.is_none());
    assert_eq!(found.assets[0].id, "asset-show");
}

#[tokio::test]
async fn title_match_pins_episode_by_substring_in_either_direction() {
    let catalog = Arc::new(nature_catalog());

    // Listing episode title is a superstring of the catalog's.
    let matcher = matcher_with(catalog.clone());
    let listing = Listing {
        title: "Nature".to_string(),
        episode_title: Some("The Forger (Part 1)".to_string()),
        ..Default::default()
    };
    let found = matcher.match_listing(&listing).await.unwrap();
    assert_eq!(found.episode.as_ref().unwrap().id, "ep-forger");

    // And the catalog's can be a superstring of the listing's.
    let matcher = matcher_with(catalog);
    let listing = Listing {
        title: "Nature".to_string(),
        episode_title: Some("Forger".to_string()),
        ..Default::default()
    };
    let found = matcher.match_listing(&listing).await.unwrap();
    assert_eq!(found.episode.as_ref().unwrap().id, "ep-forger");
}

/// Known ambiguity, preserved on purpose: when several shows share a title,
/// the first catalog result wins with no tie-break.
#[tokio::test]
async fn title_match_takes_first_show_of_many() {
    let catalog = Arc::new(StubCatalog {
        shows: vec![
            show("show-first", "Masterpiece", None),
            show("show-second", "Masterpiece", None),
        ],
        ..Default::default()
    });
    let matcher = matcher_with(catalog);

    let listing = Listing {
        title: "Masterpiece".to_string(),
        ..Default::default()
    };
    let found = matcher.match_listing(&listing).await.unwrap();
    assert_eq!(found.show.id, "show-first");
}

#[tokio::test]
async fn program_id_match_resolves_via_mapping() {
    let catalog = Arc::new(nature_catalog());
    let mapping = HashMap::from([(4242u64, "show-natr".to_string())]);
    let matcher = ContentMatcher::new(
        Some(catalog),
        Arc::new(CacheStore::in_memory(true)),
    )
    .with_program_mapping(mapping);

    let listing = Listing {
        program_id: Some(4242),
        ..Default::default()
    };
    let found = matcher.match_listing(&listing).await.unwrap();
    assert_eq!(found.match_method, MatchMethod::ProgramId);
    assert_eq!(found.show.id, "show-natr");
    assert!(found.episode.is_none());
}

#[tokio::test]
async fn unmapped_program_id_falls_through_to_title() {
    let catalog = Arc::new(nature_catalog());
    let matcher = matcher_with(catalog);

    let listing = Listing {
        title: "Nature".to_string(),
        program_id: Some(9999),
        ..Default::default()
    };
    let found = matcher.match_listing(&listing).await.unwrap();
    assert_eq!(found.match_method, MatchMethod::Title);
}

#[tokio::test]
async fn catalog_outage_yields_none_not_error() {
    let matcher = ContentMatcher::new(
        Some(Arc::new(FailingCatalog)),
        Arc::new(CacheStore::in_memory(true)),
    );

    // Both the NOLA and title strategies fail upstream; the listing just
    // doesn't match.
    assert!(matcher.match_listing(&nature_listing()).await.is_none());
}

// ============================================================================
// Match caching tests
// ============================================================================

#[tokio::test]
async fn second_match_within_ttl_issues_no_catalog_calls() {
    let catalog = Arc::new(nature_catalog());
    let matcher = matcher_with(catalog.clone());

    let first = matcher.match_listing(&nature_listing()).await.unwrap();
    let calls_after_first = catalog.calls();
    assert!(calls_after_first > 0);

    let second = matcher.match_listing(&nature_listing()).await.unwrap();
    assert_eq!(catalog.calls(), calls_after_first);
    assert_eq!(
        serde_json::to_value(&first).unwrap(),
        serde_json::to_value(&second).unwrap()
    );
}

/// Misses are never cached: a persistently absent NOLA episode re-traverses
/// the catalog on every request. Deliberate (allows late-arriving episodes
/// to match without waiting out a negative TTL).
#[tokio::test]
async fn nola_miss_is_not_cached_and_retries() {
    let mut listing = nature_listing();
    listing.nola_episode = Some("99".to_string());
    listing.title = String::new(); // keep the title strategy out of the way

    let catalog = Arc::new(nature_catalog());
    let matcher = matcher_with(catalog.clone());

    assert!(matcher.match_listing(&listing).await.is_none());
    let calls_after_first = catalog.calls();

    assert!(matcher.match_listing(&listing).await.is_none());
    // The show search runs again; only the episode traversal is served from
    // the supporting-lookup cache.
    assert!(catalog.calls() > calls_after_first);
}

// ============================================================================
// Show record creation
// ============================================================================

#[tokio::test]
async fn show_record_creation_is_idempotent() {
    let catalog = Arc::new(nature_catalog());
    let repository = Arc::new(StubRepository::default());
    let matcher = ContentMatcher::new(
        Some(catalog),
        Arc::new(CacheStore::in_memory(true)),
    )
    .with_repository(repository.clone());

    let listing = nature_listing();
    let found = matcher.match_listing(&listing).await.unwrap();

    let first = matcher.ensure_show_record(&found, &listing).await.unwrap();
    let second = matcher.ensure_show_record(&found, &listing).await.unwrap();

    assert_eq!(repository.creates(), 1);
    assert_eq!(first.id, second.id);
}

// ============================================================================
// Batch matching
// ============================================================================

#[tokio::test]
async fn batch_matching_flags_each_listing_independently() {
    let catalog = Arc::new(nature_catalog());
    let matcher = matcher_with(catalog);

    let listings = vec![
        nature_listing(),
        Listing {
            title: "Antiques Roadshow".to_string(),
            ..Default::default()
        },
    ];

    let matched = matcher.match_listings(&listings).await;
    assert_eq!(matched.len(), 2);
    assert!(matched[0].has_on_demand);
    assert_eq!(
        matched[0].on_demand.as_ref().unwrap().match_method,
        MatchMethod::Nola
    );
    assert!(!matched[1].has_on_demand);
    assert!(matched[1].on_demand.is_none());
}

// ============================================================================
// Cache store properties
// ============================================================================

#[tokio::test]
async fn clear_all_cache_forgets_previously_cached_keys() {
    let cache = Arc::new(CacheStore::in_memory(true));
    cache.set("nola_NATR_01", &"something".to_string(), 3600).await;
    cache.set("schedule_weta_20250307_", &"else".to_string(), 900).await;

    cache.clear_all().await;

    assert!(cache.get::<String>("nola_NATR_01").await.is_none());
    assert!(cache.get::<String>("schedule_weta_20250307_").await.is_none());
}

#[tokio::test]
async fn disabled_cache_is_inert_not_just_short_lived() {
    let cache = CacheStore::in_memory(false);
    cache.set("k", &"v".to_string(), 3600).await;
    assert!(cache.get::<String>("k").await.is_none());

    let stats = cache.stats().await;
    assert!(!stats.enabled);
}

#[tokio::test]
async fn matching_against_disabled_cache_still_works() {
    let catalog = Arc::new(nature_catalog());
    let matcher = ContentMatcher::new(
        Some(catalog.clone()),
        Arc::new(CacheStore::in_memory(false)),
    );

    let first_calls;
    {
        let found = matcher.match_listing(&nature_listing()).await.unwrap();
        assert_eq!(found.match_method, MatchMethod::Nola);
        first_calls = catalog.calls();
    }

    // Nothing was memoized, so the full chain runs again.
    matcher.match_listing(&nature_listing()).await.unwrap();
    assert!(catalog.calls() > first_calls);
}

// ============================================================================
// End-to-end schedule assembly
// ============================================================================

fn one_listing_day(listing: Listing) -> ScheduleDay {
    ScheduleDay {
        feeds: vec![Feed {
            cid: Some("weta-hd".to_string()),
            short_name: Some("WETA HD".to_string()),
            full_name: Some("WETA Television HD".to_string()),
            listings: vec![listing],
        }],
        timezone: Some("America/New_York".to_string()),
    }
}

fn test_config() -> Config {
    Config {
        station_callsign: Some("weta".to_string()),
        ..Config::default()
    }
}

#[tokio::test]
async fn end_to_end_schedule_bakes_in_matches_and_caches() {
    let catalog = Arc::new(nature_catalog());
    let repository = Arc::new(StubRepository::default());
    let cache = Arc::new(CacheStore::in_memory(true));
    let matcher = Arc::new(
        ContentMatcher::new(Some(catalog.clone()), cache.clone())
            .with_repository(repository.clone()),
    );
    let tvss = Arc::new(StubSchedule::new(one_listing_day(nature_listing())));

    let service = ScheduleService::new(test_config(), tvss.clone(), matcher, cache);

    let args = ScheduleArgs {
        date: Some("20250307".to_string()),
        ..Default::default()
    };

    let first = service.get_schedule(&args).await.unwrap();
    let listing = &first.feeds[0].listings[0];
    assert_eq!(listing.has_on_demand, Some(true));
    let found = listing.on_demand.as_ref().unwrap();
    assert_eq!(found.match_method, MatchMethod::Nola);
    assert_eq!(
        listing.show_url.as_deref(),
        Some("https://example.org/shows/show-natr")
    );

    let tvss_calls = tvss.calls();
    let catalog_calls = catalog.calls();

    // Second request is served verbatim from cache: no TVSS fetch, no
    // catalog calls, identical payload.
    let second = service.get_schedule(&args).await.unwrap();
    assert_eq!(tvss.calls(), tvss_calls);
    assert_eq!(catalog.calls(), catalog_calls);
    assert_eq!(
        serde_json::to_value(&first).unwrap(),
        serde_json::to_value(&second).unwrap()
    );
}

#[tokio::test]
async fn get_schedule_without_callsign_is_a_configuration_error() {
    let cache = Arc::new(CacheStore::in_memory(true));
    let matcher = Arc::new(ContentMatcher::new(None, cache.clone()));
    let tvss = Arc::new(StubSchedule::new(ScheduleDay::default()));

    let service = ScheduleService::new(Config::default(), tvss, matcher, cache);

    let err = service.get_schedule(&ScheduleArgs::default()).await.unwrap_err();
    assert_matches!(err, Error::Configuration(_));
}

#[tokio::test]
async fn get_schedule_surfaces_transport_errors() {
    struct DownSchedule;

    #[async_trait]
    impl ScheduleApi for DownSchedule {
        async fn get_listings(
            &self,
            _callsign: &str,
            _date: &str,
            _feed: Option<&str>,
            _fetch_images: bool,
        ) -> CoreResult<ScheduleDay> {
            Err(Error::Transport("TVSS unreachable".to_string()))
        }
    }

    let cache = Arc::new(CacheStore::in_memory(true));
    let matcher = Arc::new(ContentMatcher::new(None, cache.clone()));
    let service = ScheduleService::new(test_config(), Arc::new(DownSchedule), matcher, cache);

    let err = service.get_schedule(&ScheduleArgs::default()).await.unwrap_err();
    assert_matches!(err, Error::Transport(_));
}

#[tokio::test]
async fn matching_disabled_leaves_listings_untouched() {
    let catalog = Arc::new(nature_catalog());
    let cache = Arc::new(CacheStore::in_memory(true));
    let matcher = Arc::new(ContentMatcher::new(Some(catalog.clone()), cache.clone()));
    let tvss = Arc::new(StubSchedule::new(one_listing_day(nature_listing())));

    let service = ScheduleService::new(test_config(), tvss, matcher, cache);

    let args = ScheduleArgs {
        date: Some("20250307".to_string()),
        link_ondemand: Some(false),
        ..Default::default()
    };

    let day = service.get_schedule(&args).await.unwrap();
    assert_eq!(day.feeds[0].listings[0].has_on_demand, None);
    assert_eq!(catalog.calls(), 0);
}

#[tokio::test]
async fn specials_are_searched_after_seasons() {
    // Episode only exists in the specials collection.
    let mut catalog = StubCatalog {
        shows: vec![show("show-natr", "Nature", Some("NATR"))],
        ..Default::default()
    };
    catalog.specials.insert(
        "show-natr".to_string(),
        vec![episode("ep-special", "A Special", Some("S1"))],
    );
    let matcher = matcher_with(Arc::new(catalog));

    let mut listing = nature_listing();
    listing.nola_episode = Some("S1".to_string());

    let found = matcher.match_listing(&listing).await.unwrap();
    assert_eq!(found.match_method, MatchMethod::Nola);
    assert_eq!(found.episode.as_ref().unwrap().id, "ep-special");
}
