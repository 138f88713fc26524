//! PBS TV Schedules Service (TVSS) API client
//!
//! Fetches broadcast listings for a station/feed/date. Pure transport:
//! callers decide what to cache.
//!
//! Base URL: https://tvss.services.pbs.org/tvss/

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::services::matcher::OnDemandMatch;

const DEFAULT_ENDPOINT: &str = "https://tvss.services.pbs.org/tvss/";
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// A day of listings for one station, possibly across several feeds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleDay {
    #[serde(default)]
    pub feeds: Vec<Feed>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

/// One broadcast channel/stream belonging to a station.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Feed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default)]
    pub listings: Vec<Listing>,
}

/// One Gracenote image attached to a listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingImage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
}

/// One broadcast airing. Ephemeral: scoped to (station/feed, date), never a
/// stable identity across days.
///
/// The trailing `on_demand` / `has_on_demand` / `show_url` fields are not
/// part of the wire format; the schedule assembler writes them in before the
/// composed schedule is cached.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Listing {
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_description: Option<String>,
    /// HHMM, 24-hour ("0130" = 1:30 AM)
    #[serde(default)]
    pub start_time: String,
    /// Duration in minutes
    #[serde(default)]
    pub minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nola_root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nola_episode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tms_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Vec<ListingImage>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_demand: Option<OnDemandMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_on_demand: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_url: Option<String>,
}

/// The listings lookup the matcher/assembler core depends on. `TvssClient`
/// is the production implementation; tests inject stubs.
#[async_trait]
pub trait ScheduleApi: Send + Sync {
    async fn get_listings(
        &self,
        callsign: &str,
        date: &str,
        feed: Option<&str>,
        fetch_images: bool,
    ) -> Result<ScheduleDay>;
}

/// TVSS API client
pub struct TvssClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl TvssClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_ENDPOINT)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    async fn make_request<T: serde::de::DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        self.request_with_query(endpoint, &[]).await
    }

    async fn request_with_query<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, endpoint);

        let mut request = self.client.get(&url).header("Accept", "application/json");
        if !query.is_empty() {
            request = request.query(query);
        }
        if !self.api_key.is_empty() {
            request = request.header("X-PBSAUTH", &self.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::transport("TVSS request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!(
                "TVSS request failed with status {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::transport("Failed to decode TVSS response", e))
    }

    /// Get listings for a station on a date (YYYYMMDD), all feeds.
    pub async fn get_listings_by_date(
        &self,
        callsign: &str,
        date: &str,
        fetch_images: bool,
    ) -> Result<ScheduleDay> {
        info!(callsign = %callsign, date = %date, "Fetching TVSS listings");

        let mut endpoint = format!("{}/day/{}/", callsign.to_lowercase(), date);
        if fetch_images {
            endpoint.push_str("?fetch-images");
        }

        let day: ScheduleDay = self.make_request(&endpoint).await?;
        debug!(feeds = day.feeds.len(), "TVSS returned feeds");
        Ok(day)
    }

    /// Get listings for one feed of a station on a date.
    pub async fn get_feed_listings_by_date(
        &self,
        callsign: &str,
        date: &str,
        feed_cid: &str,
        fetch_images: bool,
    ) -> Result<ScheduleDay> {
        info!(callsign = %callsign, date = %date, feed = %feed_cid, "Fetching TVSS feed listings");

        let mut endpoint = format!("{}/day/{}/{}/", callsign.to_lowercase(), date, feed_cid);
        if fetch_images {
            endpoint.push_str("?fetch-images");
        }

        let day: ScheduleDay = self.make_request(&endpoint).await?;
        debug!(feeds = day.feeds.len(), "TVSS returned feeds");
        Ok(day)
    }

    /// Get today's listings for a station.
    pub async fn get_todays_listings(
        &self,
        callsign: &str,
        fetch_images: bool,
    ) -> Result<ScheduleDay> {
        info!(callsign = %callsign, "Fetching today's TVSS listings");

        let mut endpoint = format!("{}/today/", callsign.to_lowercase());
        if fetch_images {
            endpoint.push_str("?fetch-images");
        }

        self.make_request(&endpoint).await
    }

    /// Get KIDS listings for a station on a date.
    pub async fn get_kids_listings_by_date(
        &self,
        callsign: &str,
        date: &str,
        fetch_images: bool,
    ) -> Result<ScheduleDay> {
        info!(callsign = %callsign, date = %date, "Fetching TVSS kids listings");

        let mut endpoint = format!("{}/day/{}/kids/", callsign.to_lowercase(), date);
        if fetch_images {
            endpoint.push_str("?fetch-images");
        }

        self.make_request(&endpoint).await
    }

    /// Search programs and episodes by keyword. No auth required upstream;
    /// the payload shape is station-dependent, so callers get raw JSON.
    pub async fn search_programs(&self, callsign: &str, keyword: &str) -> Result<Value> {
        info!(callsign = %callsign, keyword = %keyword, "Searching TVSS programs");

        let endpoint = format!("{}/programs/search/", callsign.to_lowercase());
        self.request_with_query(&endpoint, &[("q", keyword)]).await
    }

    /// Channel/feed lookup for a callsign, optionally narrowed by ZIP code.
    pub async fn get_channel_lookup(&self, callsign: &str, zip_code: &str) -> Result<Value> {
        info!(callsign = %callsign, zip = %zip_code, "TVSS channel lookup");

        let endpoint = if zip_code.is_empty() {
            format!("{}/channelfeed/", callsign.to_lowercase())
        } else {
            format!("{}/channelfeed/{:0>5}/", callsign.to_lowercase(), zip_code)
        };
        self.make_request(&endpoint).await
    }
}

#[async_trait]
impl ScheduleApi for TvssClient {
    async fn get_listings(
        &self,
        callsign: &str,
        date: &str,
        feed: Option<&str>,
        fetch_images: bool,
    ) -> Result<ScheduleDay> {
        match feed {
            Some(feed_cid) if !feed_cid.is_empty() => {
                self.get_feed_listings_by_date(callsign, date, feed_cid, fetch_images)
                    .await
            }
            _ => self.get_listings_by_date(callsign, date, fetch_images).await,
        }
    }
}

/// Parse HHMM to minutes since midnight. Malformed input parses as 0.
pub fn parse_hhmm(hhmm: &str) -> u32 {
    let hours: u32 = hhmm.get(0..2).and_then(|s| s.parse().ok()).unwrap_or(0);
    let minutes: u32 = hhmm.get(2..4).and_then(|s| s.parse().ok()).unwrap_or(0);
    hours * 60 + minutes
}

/// Format HHMM as a 12-hour display time ("1330" -> "1:30 PM").
pub fn format_hhmm(hhmm: &str) -> String {
    let total = parse_hhmm(hhmm);
    let hours = total / 60;
    let minutes = total % 60;

    let meridiem = if hours < 12 { "AM" } else { "PM" };
    let display_hours = match hours % 12 {
        0 => 12,
        h => h,
    };
    format!("{display_hours}:{minutes:02} {meridiem}")
}

/// End time in HHMM given a start and a duration, wrapping past midnight.
pub fn calculate_end_time(start_hhmm: &str, duration_minutes: u32) -> String {
    let end = parse_hhmm(start_hhmm) + duration_minutes;
    format!("{:02}{:02}", (end / 60) % 24, end % 60)
}

/// Format a date as the YYYYMMDD string TVSS expects.
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}
