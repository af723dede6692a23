use crate::config::PluginConfig;
use anyhow::{anyhow, Context, Result};
use futures_util::future::join_all;
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;

/// Canonical id that every place resolves to. `0` means "could not resolve".
pub type UniverseId = u64;

pub const UNRESOLVED_UNIVERSE: UniverseId = 0;

/// The remote lookups a refresh cycle depends on.
///
/// Implementations never fail outward: a broken request resolves to
/// [`UNRESOLVED_UNIVERSE`] or to a map with the affected entries missing.
pub trait GameApi: Send + Sync + 'static {
    fn resolve_universe(&self, place_id: u64) -> impl Future<Output = UniverseId> + Send;

    fn fetch_icons(
        &self,
        universe_ids: &BTreeSet<UniverseId>,
    ) -> impl Future<Output = HashMap<UniverseId, Vec<u8>>> + Send;

    fn fetch_counts(
        &self,
        universe_ids: &BTreeSet<UniverseId>,
    ) -> impl Future<Output = HashMap<UniverseId, u64>> + Send;
}

fn build_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(concat!("rbx-player-count/", env!("CARGO_PKG_VERSION"))),
    );
    headers
}

pub struct RobloxClient {
    http: reqwest::Client,
    universes_base_url: String,
    thumbnails_base_url: String,
    games_base_url: String,
}

impl RobloxClient {
    pub fn new(config: &PluginConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .default_headers(build_headers())
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            universes_base_url: config.universes_base_url.clone(),
            thumbnails_base_url: config.thumbnails_base_url.clone(),
            games_base_url: config.games_base_url.clone(),
        })
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| anyhow!("HTTP request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Request failed with status {}", status));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| anyhow!("Failed to parse response: {}", e))
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| anyhow!("HTTP request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Request failed with status {}", status));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| anyhow!("Failed to read response body: {}", e))?;
        if bytes.is_empty() {
            return Err(anyhow!("Empty image body"));
        }
        Ok(bytes.to_vec())
    }

    async fn try_resolve_universe(&self, place_id: u64) -> Result<UniverseId> {
        let url = format!(
            "{}/universes/v1/places/{}/universe",
            self.universes_base_url, place_id
        );
        debug!("Resolving universe for place {}: {}", place_id, url);

        let body = self.get_json(&url).await?;
        parse_universe_id(&body).ok_or_else(|| anyhow!("Response has no usable universeId"))
    }

    async fn try_fetch_icons(
        &self,
        universe_ids: &BTreeSet<UniverseId>,
    ) -> Result<HashMap<UniverseId, Vec<u8>>> {
        let url = format!(
            "{}/v1/games/icons?universeIds={}&returnPolicy=PlaceHolder&size=150x150&format=Png&isCircular=false",
            self.thumbnails_base_url,
            join_ids(universe_ids)
        );
        debug!("Fetching icons: {}", url);

        let body = self.get_json(&url).await?;
        let listing = parse_icon_listing(&body, universe_ids)?;

        // Each image is its own request; one failing only drops its own entry.
        let downloads = listing.into_iter().map(|(universe_id, image_url)| async move {
            match self.get_bytes(&image_url).await {
                Ok(bytes) => Some((universe_id, bytes)),
                Err(e) => {
                    warn!("Icon download for universe {} failed: {}", universe_id, e);
                    None
                }
            }
        });

        Ok(join_all(downloads).await.into_iter().flatten().collect())
    }

    async fn try_fetch_counts(
        &self,
        universe_ids: &BTreeSet<UniverseId>,
    ) -> Result<HashMap<UniverseId, u64>> {
        let url = format!(
            "{}/v1/games?universeIds={}",
            self.games_base_url,
            join_ids(universe_ids)
        );
        debug!("Fetching player counts: {}", url);

        let body = self.get_json(&url).await?;
        parse_player_counts(&body, universe_ids)
    }
}

impl GameApi for RobloxClient {
    async fn resolve_universe(&self, place_id: u64) -> UniverseId {
        if place_id == 0 {
            return UNRESOLVED_UNIVERSE;
        }
        match self.try_resolve_universe(place_id).await {
            Ok(universe_id) => universe_id,
            Err(e) => {
                warn!("Could not resolve place {}: {}", place_id, e);
                UNRESOLVED_UNIVERSE
            }
        }
    }

    async fn fetch_icons(&self, universe_ids: &BTreeSet<UniverseId>) -> HashMap<UniverseId, Vec<u8>> {
        if universe_ids.is_empty() {
            return HashMap::new();
        }
        self.try_fetch_icons(universe_ids).await.unwrap_or_else(|e| {
            warn!("Icon batch fetch failed: {}", e);
            HashMap::new()
        })
    }

    async fn fetch_counts(&self, universe_ids: &BTreeSet<UniverseId>) -> HashMap<UniverseId, u64> {
        if universe_ids.is_empty() {
            return HashMap::new();
        }
        self.try_fetch_counts(universe_ids).await.unwrap_or_else(|e| {
            warn!("Player count batch fetch failed: {}", e);
            HashMap::new()
        })
    }
}

fn join_ids(ids: &BTreeSet<UniverseId>) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Ids arrive as JSON numbers from most endpoints and as strings from a few.
fn id_from_value(value: &Value) -> Option<u64> {
    let id = match value {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    (id != 0).then_some(id)
}

fn count_from_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().replace(',', "").parse::<u64>().ok(),
        _ => None,
    }
}

fn data_entries(body: &Value) -> Result<&Vec<Value>> {
    body.get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Response has no data array"))
}

// { "universeId": 245662005 }
pub(crate) fn parse_universe_id(body: &Value) -> Option<UniverseId> {
    body.get("universeId").and_then(id_from_value)
}

// { "data": [{ "targetId": 245662005, "state": "Completed", "imageUrl": "https://..." }] }
pub(crate) fn parse_icon_listing(
    body: &Value,
    requested: &BTreeSet<UniverseId>,
) -> Result<Vec<(UniverseId, String)>> {
    let mut listing = Vec::new();
    for entry in data_entries(body)? {
        let Some(universe_id) = entry.get("targetId").and_then(id_from_value) else {
            continue;
        };
        if !requested.contains(&universe_id) {
            continue;
        }
        match entry.get("imageUrl").and_then(|u| u.as_str()) {
            Some(url) if !url.is_empty() => listing.push((universe_id, url.to_string())),
            _ => debug!("No icon url for universe {}", universe_id),
        }
    }
    Ok(listing)
}

// { "data": [{ "id": 245662005, "playing": 40123, ... }] }
pub(crate) fn parse_player_counts(
    body: &Value,
    requested: &BTreeSet<UniverseId>,
) -> Result<HashMap<UniverseId, u64>> {
    let mut counts = HashMap::new();
    for entry in data_entries(body)? {
        let Some(universe_id) = entry.get("id").and_then(id_from_value) else {
            continue;
        };
        if !requested.contains(&universe_id) {
            continue;
        }
        match entry.get("playing").and_then(count_from_value) {
            Some(playing) => {
                counts.insert(universe_id, playing);
            }
            None => debug!("No usable player count for universe {}", universe_id),
        }
    }
    Ok(counts)
}
