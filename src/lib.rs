//! Content-matching and caching core for a PBS broadcast schedule viewer
//!
//! Aggregates TV Schedules Service (TVSS) broadcast listings with Media
//! Manager on-demand metadata, matches the two by program identity under
//! ambiguous and partial identifiers, and caches the merged result so
//! repeated renders don't re-hit upstream APIs.
//!
//! The rendering/admin layer on top of this crate talks to
//! [`services::ScheduleService`] (composed schedules, cache control) and
//! [`services::ContentMatcher`] (per-listing matching).

pub mod config;
pub mod error;
pub mod services;

pub use config::Config;
pub use error::{Error, Result};
