//! PBS Media Manager API client for on-demand catalog metadata
//!
//! Shows, seasons, episodes, and playable assets. Pure transport with HTTP
//! basic auth; the content matcher owns all caching of these lookups.
//!
//! Responses use a JSON:API-style envelope (`{"data": ...}`) with records
//! shaped `{id, attributes}`. Every attribute is optional on purpose: a
//! partially-populated record should degrade to "no match", never crash the
//! matcher.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// On-demand show container from Media Manager.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Show {
    pub id: String,
    #[serde(default)]
    pub attributes: ShowAttributes,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShowAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_long: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_short: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nola_root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
}

/// One season of a show.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Season {
    pub id: String,
    #[serde(default)]
    pub attributes: SeasonAttributes,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeasonAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ordinal: Option<u32>,
}

/// One episode, owned by exactly one show but addressed by its own id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    #[serde(default)]
    pub attributes: EpisodeAttributes,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpisodeAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nola_episode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ordinal: Option<u32>,
}

/// Playable media tied to a show or an episode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    #[serde(default)]
    pub attributes: AssetAttributes,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Duration in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    /// full_length | clip | preview | extra
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_url: Option<String>,
}

/// Filter for show search. Exactly one of the fields is normally set.
#[derive(Debug, Clone, Default)]
pub struct ShowsFilter {
    pub nola_root: Option<String>,
    pub title: Option<String>,
}

impl ShowsFilter {
    pub fn by_nola_root(nola_root: impl Into<String>) -> Self {
        Self {
            nola_root: Some(nola_root.into()),
            title: None,
        }
    }

    pub fn by_title(title: impl Into<String>) -> Self {
        Self {
            nola_root: None,
            title: Some(title.into()),
        }
    }

    /// Query pairs for the show search endpoint. NOLA root wins if both
    /// fields are somehow set.
    pub fn query(&self) -> Vec<(&'static str, &str)> {
        if let Some(nola_root) = &self.nola_root {
            vec![("nola-root", nola_root)]
        } else if let Some(title) = &self.title {
            vec![("title", title)]
        } else {
            Vec::new()
        }
    }
}

/// The catalog surface the content matcher depends on. `MediaManagerClient`
/// is the production implementation; tests inject counting stubs.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn find_shows(&self, filter: &ShowsFilter) -> Result<Vec<Show>>;
    async fn get_show(&self, show_id: &str) -> Result<Option<Show>>;
    async fn get_show_seasons(&self, show_id: &str) -> Result<Vec<Season>>;
    async fn get_season_episodes(&self, season_id: &str) -> Result<Vec<Episode>>;
    async fn get_show_specials(&self, show_id: &str) -> Result<Vec<Episode>>;
    async fn get_episode_assets(
        &self,
        episode_id: &str,
        type_filter: &str,
        visibility_filter: &str,
    ) -> Result<Vec<Asset>>;
    async fn get_show_assets(
        &self,
        show_id: &str,
        type_filter: &str,
        visibility_filter: &str,
    ) -> Result<Vec<Asset>>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    data: Option<T>,
}

/// Media Manager API client
pub struct MediaManagerClient {
    client: Client,
    base_url: String,
    client_id: String,
    client_secret: String,
}

impl MediaManagerClient {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// GET an endpoint and unwrap the `data` envelope. A 404 yields the
    /// default (empty list / None) instead of an error.
    async fn fetch<T: serde::de::DeserializeOwned + Default>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let url = format!("{}/{}", self.base_url, endpoint);

        let mut request = self
            .client
            .get(&url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header("Accept", "application/json");
        if !query.is_empty() {
            request = request.query(query);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::transport("Media Manager request failed", e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(T::default());
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!(
                "Media Manager request failed with status {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| Error::transport("Failed to decode Media Manager response", e))?;

        Ok(envelope.data.unwrap_or_default())
    }
}

#[async_trait]
impl CatalogApi for MediaManagerClient {
    async fn find_shows(&self, filter: &ShowsFilter) -> Result<Vec<Show>> {
        info!(
            nola_root = ?filter.nola_root,
            title = ?filter.title,
            "Searching Media Manager shows"
        );

        let shows: Vec<Show> = self.fetch("shows/", &filter.query()).await?;
        debug!(count = shows.len(), "Media Manager returned shows");
        Ok(shows)
    }

    async fn get_show(&self, show_id: &str) -> Result<Option<Show>> {
        info!(show_id = %show_id, "Fetching Media Manager show");
        self.fetch(&format!("shows/{show_id}/"), &[]).await
    }

    async fn get_show_seasons(&self, show_id: &str) -> Result<Vec<Season>> {
        info!(show_id = %show_id, "Fetching Media Manager seasons");
        self.fetch(&format!("shows/{show_id}/seasons/"), &[]).await
    }

    async fn get_season_episodes(&self, season_id: &str) -> Result<Vec<Episode>> {
        info!(season_id = %season_id, "Fetching Media Manager season episodes");
        self.fetch(&format!("seasons/{season_id}/episodes/"), &[])
            .await
    }

    async fn get_show_specials(&self, show_id: &str) -> Result<Vec<Episode>> {
        info!(show_id = %show_id, "Fetching Media Manager specials");
        self.fetch(&format!("shows/{show_id}/specials/"), &[]).await
    }

    async fn get_episode_assets(
        &self,
        episode_id: &str,
        type_filter: &str,
        visibility_filter: &str,
    ) -> Result<Vec<Asset>> {
        info!(episode_id = %episode_id, "Fetching Media Manager episode assets");
        self.fetch(
            &format!("episodes/{episode_id}/assets/"),
            &[("type", type_filter), ("available", visibility_filter)],
        )
        .await
    }

    async fn get_show_assets(
        &self,
        show_id: &str,
        type_filter: &str,
        visibility_filter: &str,
    ) -> Result<Vec<Asset>> {
        info!(show_id = %show_id, "Fetching Media Manager show assets");
        self.fetch(
            &format!("shows/{show_id}/assets/"),
            &[("type", type_filter), ("available", visibility_filter)],
        )
        .await
    }
}
