//! Application configuration management

use std::env;

use anyhow::{Context, Result};

/// Configuration for the schedule core, passed explicitly into the services
/// that need it (no ambient globals).
#[derive(Debug, Clone)]
pub struct Config {
    /// Station callsign (e.g. "weta")
    pub station_callsign: Option<String>,

    /// TV Schedules Service API key (X-PBSAUTH header)
    pub tvss_api_key: String,

    /// Media Manager API client ID
    pub mm_client_id: Option<String>,

    /// Media Manager API client secret
    pub mm_client_secret: Option<String>,

    /// Media Manager API endpoint
    pub mm_endpoint: String,

    /// Whether any caching happens at all
    pub cache_enabled: bool,

    /// How long composed schedules stay cached, in seconds
    pub cache_schedule_duration: u64,

    /// How long on-demand match data stays cached, in seconds
    pub cache_ondemand_duration: u64,

    /// Directory for the durable cache tier
    pub cache_path: String,

    /// Default schedule window in hours
    pub display_hours: u32,

    /// Whether to request Gracenote images with listings
    pub show_images: bool,

    /// Whether to match listings against on-demand content
    pub link_ondemand: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            station_callsign: None,
            tvss_api_key: String::new(),
            mm_client_id: None,
            mm_client_secret: None,
            mm_endpoint: "https://media.services.pbs.org/api/v1".to_string(),
            cache_enabled: true,
            cache_schedule_duration: 900,
            cache_ondemand_duration: 3600,
            cache_path: "./data/cache".to_string(),
            display_hours: 6,
            show_images: true,
            link_ondemand: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        Ok(Self {
            station_callsign: env::var("PBS_STATION_CALLSIGN").ok(),

            tvss_api_key: env::var("PBS_TVSS_API_KEY").unwrap_or_default(),

            mm_client_id: env::var("PBS_MM_CLIENT_ID").ok(),

            mm_client_secret: env::var("PBS_MM_CLIENT_SECRET").ok(),

            mm_endpoint: env::var("PBS_MM_ENDPOINT").unwrap_or(defaults.mm_endpoint),

            cache_enabled: env::var("PBS_CACHE_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),

            cache_schedule_duration: env::var("PBS_CACHE_SCHEDULE_DURATION")
                .unwrap_or_else(|_| "900".to_string())
                .parse()
                .context("Invalid PBS_CACHE_SCHEDULE_DURATION")?,

            cache_ondemand_duration: env::var("PBS_CACHE_ONDEMAND_DURATION")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .context("Invalid PBS_CACHE_ONDEMAND_DURATION")?,

            cache_path: env::var("PBS_CACHE_PATH").unwrap_or(defaults.cache_path),

            display_hours: env::var("PBS_DISPLAY_HOURS")
                .unwrap_or_else(|_| "6".to_string())
                .parse()
                .context("Invalid PBS_DISPLAY_HOURS")?,

            show_images: env::var("PBS_SHOW_IMAGES")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),

            link_ondemand: env::var("PBS_LINK_ONDEMAND")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
        })
    }
}
