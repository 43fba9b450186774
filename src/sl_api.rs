//! Client for the SL Transport API with a TTL cache in front of each lookup.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::Cache;

pub const DEFAULT_BASE_URL: &str = "https://transport.integration.sl.se/v1";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const SITES_CACHE_KEY: &str = "sites";
const SITES_CACHE_TTL: Duration = Duration::from_secs(10);
const DEPARTURES_CACHE_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum SlApiError {
    #[error("could not parse transport {0:?}")]
    InvalidTransportMode(String),
    #[error("error calling SL API: {0}")]
    Request(#[source] Box<ureq::Error>),
    #[error("error reading SL API response: {0}")]
    Read(#[source] std::io::Error),
    #[error("error decoding SL API response: {0}")]
    Decode(#[source] serde_json::Error),
}

// FERRY, SHIP and TAXI exist upstream but are not offered here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Bus,
    Tram,
    Metro,
    Train,
}

impl TransportMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportMode::Bus => "BUS",
            TransportMode::Tram => "TRAM",
            TransportMode::Metro => "METRO",
            TransportMode::Train => "TRAIN",
        }
    }
}

impl FromStr for TransportMode {
    type Err = SlApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BUS" => Ok(TransportMode::Bus),
            "TRAM" => Ok(TransportMode::Tram),
            "METRO" => Ok(TransportMode::Metro),
            "TRAIN" => Ok(TransportMode::Train),
            _ => Err(SlApiError::InvalidTransportMode(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeparturesQuery {
    pub site_id: i64,
    pub line: Option<u32>,
    pub direction: Option<i32>,
    pub transport: Option<TransportMode>,
}

/// Site as served to our own clients. Field names follow the existing JSON
/// contract of the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Site {
    pub name: String,
    pub id: i64,
    pub alias: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Departure {
    pub destination: String,
    pub display: String,
    pub line_number: i64,
    pub transport_mode: String,
    pub group_of_lines: String,
    pub state: String,
}

// Raw SL API response types. Optional fields default so a sparse payload
// never fails decoding.

#[derive(Debug, Deserialize)]
pub struct ApiSite {
    pub id: i64,
    #[serde(default)]
    pub gid: i64,
    pub name: String,
    #[serde(default)]
    pub alias: Vec<String>,
    #[serde(default)]
    pub abbreviation: String,
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lon: f64,
    #[serde(default)]
    pub stop_areas: Vec<i64>,
    #[serde(default)]
    pub valid: ApiValidity,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiValidity {
    #[serde(default)]
    pub from: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiDeparturesResponse {
    #[serde(default)]
    pub departures: Vec<ApiDeparture>,
    #[serde(default)]
    pub stop_deviations: Vec<ApiStopDeviation>,
}

#[derive(Debug, Deserialize)]
pub struct ApiDeparture {
    pub destination: String,
    #[serde(default)]
    pub direction_code: i32,
    #[serde(default)]
    pub direction: String,
    pub state: String,
    pub display: String,
    #[serde(default)]
    pub scheduled: String,
    #[serde(default)]
    pub expected: String,
    #[serde(default)]
    pub journey: ApiJourney,
    #[serde(default)]
    pub stop_area: ApiStopArea,
    #[serde(default)]
    pub stop_point: ApiStopPoint,
    pub line: ApiLine,
    #[serde(default)]
    pub deviations: Vec<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiJourney {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub prediction_state: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiStopArea {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiStopPoint {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub designation: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiLine {
    pub id: i64,
    #[serde(default)]
    pub designation: String,
    #[serde(default)]
    pub transport_authority_id: i32,
    #[serde(default)]
    pub transport_mode: String,
    #[serde(default)]
    pub group_of_lines: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiStopDeviation {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub importance_level: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub scope: ApiDeviationScope,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiDeviationScope {
    #[serde(default)]
    pub stop_areas: Vec<ApiStopArea>,
    #[serde(default)]
    pub stop_points: Vec<ApiStopPoint>,
    #[serde(default)]
    pub lines: Vec<ApiLine>,
}

/// The seam the HTTP routes are programmed against, so handlers can be
/// tested with a stub client.
pub trait TransitClient: Send + Sync {
    fn get_departures(&self, query: &DeparturesQuery) -> Result<Vec<Departure>, SlApiError>;
    fn get_sites(&self, search_term: &str) -> Result<Vec<Site>, SlApiError>;
}

pub struct SlApi {
    agent: ureq::Agent,
    base_url: String,
    sites_cache: Cache<String, Vec<Site>>,
    departures_cache: Cache<String, Vec<Departure>>,
}

impl SlApi {
    pub fn new(agent: ureq::Agent, base_url: impl Into<String>) -> Self {
        SlApi {
            agent,
            base_url: base_url.into(),
            sites_cache: Cache::new(),
            departures_cache: Cache::new(),
        }
    }

    /// Production wiring: 10 s timeout against the public SL endpoint, with
    /// the sites cache warmed up front so the first search is served hot.
    pub fn with_default_agent() -> Self {
        let agent = ureq::AgentBuilder::new().timeout(DEFAULT_TIMEOUT).build();
        let api = SlApi::new(agent, DEFAULT_BASE_URL);

        tracing::info!("warming up sites cache");
        if let Err(err) = api.get_sites("") {
            tracing::warn!("error fetching sites for cache: {}", err);
        }

        api
    }

    fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        request: ureq::Request,
    ) -> Result<T, SlApiError> {
        let response = request
            .call()
            .map_err(|err| SlApiError::Request(Box::new(err)))?;
        let body = response.into_string().map_err(SlApiError::Read)?;
        serde_json::from_str(&body).map_err(SlApiError::Decode)
    }
}

impl TransitClient for SlApi {
    fn get_departures(&self, query: &DeparturesQuery) -> Result<Vec<Departure>, SlApiError> {
        let cache_key = departures_cache_key(query);
        if let Some(cached) = self.departures_cache.get(&cache_key) {
            tracing::debug!(key = %cache_key, "cache hit: departures");
            return Ok(cached);
        }
        tracing::debug!(key = %cache_key, "cache miss: departures");

        let url = format!("{}/sites/{}/departures", self.base_url, query.site_id);
        let mut request = self.agent.get(&url);
        if let Some(transport) = query.transport {
            request = request.query("transport", transport.as_str());
        }
        if let Some(line) = query.line {
            if line != 0 {
                request = request.query("line", &line.to_string());
            }
        }
        if let Some(direction) = query.direction {
            if (1..=2).contains(&direction) {
                request = request.query("direction", &direction.to_string());
            }
        }

        let response: ApiDeparturesResponse = self.fetch_json(request)?;
        let departures = map_departures(response.departures);
        self.departures_cache
            .set(cache_key, departures.clone(), DEPARTURES_CACHE_TTL);

        Ok(departures)
    }

    fn get_sites(&self, search_term: &str) -> Result<Vec<Site>, SlApiError> {
        if let Some(cached) = self.sites_cache.get(&SITES_CACHE_KEY.to_string()) {
            tracing::debug!("cache hit: sites");
            return Ok(filter_sites(&cached, search_term));
        }
        tracing::debug!("cache miss: sites");

        let url = format!("{}/sites", self.base_url);
        let raw: Vec<ApiSite> = self.fetch_json(self.agent.get(&url))?;
        let sites = map_sites(raw);
        self.sites_cache
            .set(SITES_CACHE_KEY.to_string(), sites.clone(), SITES_CACHE_TTL);

        Ok(filter_sites(&sites, search_term))
    }
}

fn departures_cache_key(query: &DeparturesQuery) -> String {
    format!(
        "sites-{}-{}-{}-{}",
        query.site_id,
        query.line.unwrap_or(0),
        query.direction.unwrap_or(0),
        query.transport.map(TransportMode::as_str).unwrap_or(""),
    )
}

fn map_sites(sites: Vec<ApiSite>) -> Vec<Site> {
    sites
        .into_iter()
        .map(|site| Site {
            name: site.name,
            id: site.id,
            alias: site.alias,
        })
        .collect()
}

/// Case-insensitive substring match on the site name or any of its aliases.
fn filter_sites(sites: &[Site], search_term: &str) -> Vec<Site> {
    let term = search_term.to_lowercase();
    sites
        .iter()
        .filter(|site| {
            site.name.to_lowercase().contains(&term)
                || site.alias.iter().any(|a| a.to_lowercase().contains(&term))
        })
        .cloned()
        .collect()
}

fn map_departures(departures: Vec<ApiDeparture>) -> Vec<Departure> {
    departures
        .into_iter()
        .map(|d| Departure {
            destination: d.destination,
            display: d.display,
            line_number: d.line.id,
            transport_mode: d.line.transport_mode,
            group_of_lines: d.line.group_of_lines,
            state: d.state,
        })
        .collect()
}
