//! C7 (part 2): METAR Ingester — field-extraction parser plus a
//! multi-provider fallback chain.
//!
//! `MetarSource` mirrors the teacher's `geocoding` module's
//! `ForwardGeocoder`/`ReverseGeocoder` traits: several implementations,
//! tried in a fixed order, first success wins (`geocoding/mod.rs`).

use async_trait::async_trait;
use lru::LruCache;
use regex::Regex;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::LazyLock;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::error::RadarError;

/// Per-feed TTL cache capacity (spec.md §4.7 names a TTL but not a
/// bound on distinct ICAOs cached at once; an LRU cap keeps the cache
/// from growing unbounded under a long-running process).
const METAR_CACHE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Default, Serialize)]
pub struct Metar {
    pub icao: String,
    pub raw: String,
    pub wind_direction_deg: Option<u16>,
    pub wind_speed_kt: Option<u16>,
    pub wind_gust_kt: Option<u16>,
    pub wind_unit: Option<String>,
    pub visibility_m: Option<u32>,
    pub temperature_c: Option<i32>,
    pub dewpoint_c: Option<i32>,
    pub qnh_hpa: Option<u32>,
    pub cloud: Vec<CloudLayer>,
    pub weather: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CloudLayer {
    pub cover: String,
    pub height_ft: u32,
}

static WIND_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{3}|VRB)(\d{2,3})(?:G(\d{2,3}))?(KT|MPS)").unwrap());
static VIS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(\d{4})\b").unwrap());
static TEMP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(M?\d{2})/(M?\d{2})").unwrap());
static QNH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Q(\d{4})").unwrap());
static CLOUD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(FEW|SCT|BKN|OVC|VV)(\d{3})").unwrap());
static WX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b([-+]|VC)?(DZ|RA|SN|SG|IC|PL|GR|GS|UP|BR|FG|FU|VA|DU|SA|HZ|PY|PO|SQ|FC|SS|DS)\b").unwrap());

fn parse_temp_field(field: &str) -> i32 {
    if let Some(rest) = field.strip_prefix('M') {
        -rest.parse::<i32>().unwrap_or(0)
    } else {
        field.parse().unwrap_or(0)
    }
}

/// Best-effort field extraction per spec.md §4.7. Absent fields remain
/// `None` rather than aborting the parse.
pub fn parse_metar(icao: &str, raw: &str) -> Metar {
    let mut metar = Metar { icao: icao.to_string(), raw: raw.to_string(), ..Default::default() };

    if let Some(caps) = WIND_RE.captures(raw) {
        if caps[1] != *"VRB" {
            metar.wind_direction_deg = caps[1].parse().ok();
        }
        metar.wind_speed_kt = caps[2].parse().ok();
        metar.wind_gust_kt = caps.get(3).and_then(|m| m.as_str().parse().ok());
        metar.wind_unit = Some(caps[4].to_string());
    }

    for caps in VIS_RE.captures_iter(raw) {
        if let Ok(v) = caps[1].parse::<u32>() {
            if v <= 9999 {
                metar.visibility_m = Some(v);
                break;
            }
        }
    }

    if let Some(caps) = TEMP_RE.captures(raw) {
        metar.temperature_c = Some(parse_temp_field(&caps[1]));
        metar.dewpoint_c = Some(parse_temp_field(&caps[2]));
    }

    if let Some(caps) = QNH_RE.captures(raw) {
        metar.qnh_hpa = caps[1].parse().ok();
    }

    for caps in CLOUD_RE.captures_iter(raw) {
        if let Ok(height_hundreds) = caps[2].parse::<u32>() {
            metar.cloud.push(CloudLayer { cover: caps[1].to_string(), height_ft: height_hundreds * 100 });
        }
    }

    for caps in WX_RE.captures_iter(raw) {
        let intensity = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        metar.weather.push(format!("{intensity}{}", &caps[2]));
    }

    metar
}

/// A METAR feed provider. Mirrors the teacher's geocoder provider
/// trait shape for an external, potentially-unavailable data source.
#[async_trait]
pub trait MetarSource: Send + Sync {
    async fn fetch_raw(&self, icao: &str) -> Result<String, RadarError>;
    fn name(&self) -> &'static str;
}

pub struct HttpMetarSource {
    base_url: String,
    name: &'static str,
    client: reqwest::Client,
}

impl HttpMetarSource {
    pub fn noaa() -> Self {
        Self::new("https://aviationweather.gov/api/data/metar?ids=", "noaa")
    }

    pub fn alternate() -> Self {
        Self::new("https://metar.vatsim.net/", "alternate")
    }

    pub fn uk_regional() -> Self {
        Self::new("https://metar.api.uk-regional.example/", "uk_regional")
    }

    fn new(base_url: &str, name: &'static str) -> Self {
        Self {
            base_url: base_url.to_string(),
            name,
            client: reqwest::Client::builder().timeout(Duration::from_secs(5)).build().expect("reqwest client builds"),
        }
    }
}

#[async_trait]
impl MetarSource for HttpMetarSource {
    async fn fetch_raw(&self, icao: &str) -> Result<String, RadarError> {
        let url = format!("{}{}", self.base_url, icao);
        let response = self.client.get(&url).send().await?;
        Ok(response.text().await?)
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Tries each source in order; first success wins (spec.md §4.7). Results
/// are kept in a per-ICAO, TTL-bounded LRU cache — the same
/// fetch-on-miss-with-TTL shape as the NOTAM and weather ingesters, keyed
/// here by ICAO since, unlike a single regional feed, METARs are fetched
/// per-airport.
pub struct MetarIngester {
    sources: Vec<Box<dyn MetarSource>>,
    ttl: Duration,
    cache: Mutex<LruCache<String, (Instant, Metar)>>,
}

impl MetarIngester {
    pub fn new(sources: Vec<Box<dyn MetarSource>>, ttl: Duration) -> Self {
        Self {
            sources,
            ttl,
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(METAR_CACHE_CAPACITY).unwrap())),
        }
    }

    pub fn default_chain(ttl: Duration) -> Self {
        Self::new(
            vec![Box::new(HttpMetarSource::noaa()), Box::new(HttpMetarSource::alternate()), Box::new(HttpMetarSource::uk_regional())],
            ttl,
        )
    }

    pub async fn fetch(&self, icao: &str) -> Result<Metar, RadarError> {
        let icao = icao.trim().to_uppercase();

        if let Some((fetched_at, cached)) = self.cache.lock().expect("metar cache lock poisoned").get(&icao) {
            if fetched_at.elapsed() < self.ttl {
                return Ok(cached.clone());
            }
        }

        let mut last_error = None;
        for source in &self.sources {
            match source.fetch_raw(&icao).await {
                Ok(raw) => {
                    let metar = parse_metar(&icao, &raw);
                    self.cache.lock().expect("metar cache lock poisoned").put(icao.clone(), (Instant::now(), metar.clone()));
                    return Ok(metar);
                }
                Err(e) => {
                    warn!("METAR source {} failed for {icao}: {e}", source.name());
                    last_error = Some(e);
                }
            }
        }

        // All sources failed: serve a stale cache entry rather than
        // surfacing an error, matching the NOTAM/weather ingesters'
        // single-fallback policy (spec.md §7).
        if let Some((_, stale)) = self.cache.lock().expect("metar cache lock poisoned").get(&icao) {
            warn!("All METAR sources failed for {icao}; serving stale cache");
            return Ok(stale.clone());
        }

        Err(last_error.unwrap_or_else(|| RadarError::UpstreamUnavailable("no METAR sources configured".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_wind_visibility_temperature_qnh() {
        let metar = parse_metar("EGLL", "EGLL 281250Z 27015G25KT 9999 SCT035 15/10 Q1013");
        assert_eq!(metar.wind_direction_deg, Some(270));
        assert_eq!(metar.wind_speed_kt, Some(15));
        assert_eq!(metar.wind_gust_kt, Some(25));
        assert_eq!(metar.visibility_m, Some(9999));
        assert_eq!(metar.temperature_c, Some(15));
        assert_eq!(metar.dewpoint_c, Some(10));
        assert_eq!(metar.qnh_hpa, Some(1013));
        assert_eq!(metar.cloud.len(), 1);
        assert_eq!(metar.cloud[0].height_ft, 3500);
    }

    #[test]
    fn negative_temperature_uses_m_prefix() {
        let metar = parse_metar("ENGM", "ENGM 281250Z 09010KT 9999 M05/M10 Q0998");
        assert_eq!(metar.temperature_c, Some(-5));
        assert_eq!(metar.dewpoint_c, Some(-10));
    }

    #[test]
    fn round_trip_preserves_fields() {
        let raw = "EGLL 281250Z 27015G25KT 9999 SCT035 15/10 Q1013";
        let first = parse_metar("EGLL", raw);
        let second = parse_metar("EGLL", &first.raw);
        assert_eq!(first.wind_speed_kt, second.wind_speed_kt);
        assert_eq!(first.qnh_hpa, second.qnh_hpa);
        assert_eq!(first.cloud.len(), second.cloud.len());
    }

    struct CountingSource {
        calls: std::sync::atomic::AtomicU32,
        raw: &'static str,
    }

    #[async_trait]
    impl MetarSource for CountingSource {
        async fn fetch_raw(&self, _icao: &str) -> Result<String, RadarError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(self.raw.to_string())
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    #[tokio::test]
    async fn repeated_fetch_within_ttl_hits_cache_not_source() {
        let source = std::sync::Arc::new(CountingSource {
            calls: std::sync::atomic::AtomicU32::new(0),
            raw: "EGLL 281250Z 27015KT 9999 Q1013",
        });
        struct Wrapper(std::sync::Arc<CountingSource>);
        #[async_trait]
        impl MetarSource for Wrapper {
            async fn fetch_raw(&self, icao: &str) -> Result<String, RadarError> {
                self.0.fetch_raw(icao).await
            }
            fn name(&self) -> &'static str {
                "wrapper"
            }
        }

        let ingester = MetarIngester::new(vec![Box::new(Wrapper(source.clone()))], Duration::from_secs(600));
        ingester.fetch("EGLL").await.unwrap();
        ingester.fetch("EGLL").await.unwrap();
        assert_eq!(source.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
