//! C7 (part 1): NOTAM Ingester — fetch-on-miss with a per-feed TTL
//! cache, dual coordinate-format parsing, and keyword-derived
//! classification shared with the SSR classifier's mechanism.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use tracing::warn;
use uuid::Uuid;

use crate::ais::haversine_nm;
use crate::error::RadarError;
use crate::ssr::Priority;

#[derive(Debug, Clone, Serialize)]
pub struct Notam {
    pub id: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub valid_from: Option<String>,
    pub valid_to: Option<String>,
    pub category: String,
    pub priority: Priority,
    pub description: String,
}

static DDMM_COORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d{2})(\d{2})([NS])(\d{3})(\d{2})([EW])").unwrap()
});

static DDMMSS_COORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d{2})(\d{2})(\d{2})([NS])(\d{3})(\d{2})(\d{2})([EW])").unwrap()
});

static VALID_FROM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)B\)\s*(\d{10})").unwrap());
static VALID_TO_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)C\)\s*(\d{10})").unwrap());

/// Parses the ICAO `YYMMDDHHMM` validity timestamp format used in the
/// `B)`/`C)` fields of a NOTAM block (spec.md §4.7).
fn parse_yymmddhhmm(raw: &str) -> Option<String> {
    if raw.len() != 10 {
        return None;
    }
    let yy: i32 = raw[0..2].parse().ok()?;
    let mm: u32 = raw[2..4].parse().ok()?;
    let dd: u32 = raw[4..6].parse().ok()?;
    let hh: u32 = raw[6..8].parse().ok()?;
    let mi: u32 = raw[8..10].parse().ok()?;
    let date = chrono::NaiveDate::from_ymd_opt(2000 + yy, mm, dd)?;
    let time = chrono::NaiveTime::from_hms_opt(hh, mi, 0)?;
    Some(chrono::NaiveDateTime::new(date, time).and_utc().to_rfc3339())
}

fn extract_validity(block: &str, re: &Regex) -> Option<String> {
    let caps = re.captures(block)?;
    parse_yymmddhhmm(&caps[1])
}

/// Parse a NOTAM coordinate field in either `DDMMN/DDDMMW` or
/// `DDMMSSN/DDDMMSSW` form (spec.md §4.7).
pub fn parse_coordinate(text: &str) -> Option<(f64, f64)> {
    if let Some(caps) = DDMMSS_COORD.captures(text) {
        let lat_deg: f64 = caps[1].parse().ok()?;
        let lat_min: f64 = caps[2].parse().ok()?;
        let lat_sec: f64 = caps[3].parse().ok()?;
        let lat_sign = if caps[4].eq_ignore_ascii_case("s") { -1.0 } else { 1.0 };
        let lon_deg: f64 = caps[5].parse().ok()?;
        let lon_min: f64 = caps[6].parse().ok()?;
        let lon_sec: f64 = caps[7].parse().ok()?;
        let lon_sign = if caps[8].eq_ignore_ascii_case("w") { -1.0 } else { 1.0 };
        let lat = lat_sign * (lat_deg + lat_min / 60.0 + lat_sec / 3600.0);
        let lon = lon_sign * (lon_deg + lon_min / 60.0 + lon_sec / 3600.0);
        return Some((lat, lon));
    }
    if let Some(caps) = DDMM_COORD.captures(text) {
        let lat_deg: f64 = caps[1].parse().ok()?;
        let lat_min: f64 = caps[2].parse().ok()?;
        let lat_sign = if caps[3].eq_ignore_ascii_case("s") { -1.0 } else { 1.0 };
        let lon_deg: f64 = caps[4].parse().ok()?;
        let lon_min: f64 = caps[5].parse().ok()?;
        let lon_sign = if caps[6].eq_ignore_ascii_case("w") { -1.0 } else { 1.0 };
        let lat = lat_sign * (lat_deg + lat_min / 60.0);
        let lon = lon_sign * (lon_deg + lon_min / 60.0);
        return Some((lat, lon));
    }
    None
}

/// Same keyword-derived classification mechanism as the SSR classifier
/// (spec.md §4.7: "same mechanism as the SSR classifier"), specialized
/// to NOTAM category vocabulary.
fn classify_text(description: &str) -> (String, Priority) {
    let upper = description.to_uppercase();
    let table: &[(&str, &str, Priority)] = &[
        ("RWY CLSD", "RUNWAY", Priority::High),
        ("RUNWAY CLOSED", "RUNWAY", Priority::High),
        ("OBST", "OBSTACLE", Priority::Medium),
        ("DANGER", "DANGER_AREA", Priority::High),
        ("MILITARY EXERCISE", "MILITARY", Priority::Medium),
        ("AIRSPACE RESTRICTION", "AIRSPACE", Priority::High),
        ("NAVAID", "NAVAID", Priority::Medium),
        ("LIGHTING", "LIGHTING", Priority::Low),
    ];
    for (keyword, category, priority) in table {
        if upper.contains(keyword) {
            return (category.to_string(), *priority);
        }
    }
    ("GENERAL".to_string(), Priority::Low)
}

struct CacheEntry {
    fetched_at: Instant,
    items: Vec<Notam>,
}

pub struct NotamIngester {
    feed_url: String,
    ttl: Duration,
    cache: std::sync::Mutex<Option<CacheEntry>>,
    client: reqwest::Client,
}

impl NotamIngester {
    pub fn new(feed_url: String, ttl: Duration) -> Self {
        Self {
            feed_url,
            ttl,
            cache: std::sync::Mutex::new(None),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("reqwest client builds"),
        }
    }

    async fn refresh(&self) -> Result<Vec<Notam>, RadarError> {
        let response = self.client.get(&self.feed_url).send().await?;
        let raw_text = response.text().await?;
        Ok(parse_feed(&raw_text))
    }

    /// Fetch-on-miss: returns the cached set if fresh, otherwise fetches.
    /// On fetch failure, the stale cache (if any) is returned rather than
    /// surfacing an error, per spec.md §7's single-fallback policy.
    pub async fn all(&self) -> Result<Vec<Notam>, RadarError> {
        {
            let guard = self.cache.lock().expect("notam cache lock poisoned");
            if let Some(entry) = guard.as_ref() {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(entry.items.clone());
                }
            }
        }

        match self.refresh().await {
            Ok(items) => {
                let mut guard = self.cache.lock().expect("notam cache lock poisoned");
                *guard = Some(CacheEntry { fetched_at: Instant::now(), items: items.clone() });
                Ok(items)
            }
            Err(e) => {
                let guard = self.cache.lock().expect("notam cache lock poisoned");
                if let Some(entry) = guard.as_ref() {
                    warn!("NOTAM refresh failed ({e}); serving stale cache");
                    Ok(entry.items.clone())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Filtered, sorted by `(priority asc, distance asc)`; CRITICAL
    /// items are retained regardless of location, per spec.md §4.7.
    pub async fn within_radius(&self, lat: f64, lon: f64, radius_nm: f64) -> Result<Vec<Notam>, RadarError> {
        let all = self.all().await?;
        let mut filtered: Vec<Notam> = all
            .into_iter()
            .filter(|n| {
                if n.priority == Priority::Critical {
                    return true;
                }
                match (n.lat, n.lon) {
                    (Some(nlat), Some(nlon)) => haversine_nm(lat, lon, nlat, nlon) <= radius_nm,
                    _ => false,
                }
            })
            .collect();

        filtered.sort_by(|a, b| {
            let priority_order = priority_rank(a.priority).cmp(&priority_rank(b.priority));
            if priority_order != std::cmp::Ordering::Equal {
                return priority_order;
            }
            let da = distance_or_max(a, lat, lon);
            let db = distance_or_max(b, lat, lon);
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(filtered)
    }
}

fn priority_rank(p: Priority) -> u8 {
    match p {
        Priority::Critical => 0,
        Priority::High => 1,
        Priority::Medium => 2,
        Priority::Low => 3,
    }
}

fn distance_or_max(n: &Notam, lat: f64, lon: f64) -> f64 {
    match (n.lat, n.lon) {
        (Some(nlat), Some(nlon)) => haversine_nm(lat, lon, nlat, nlon),
        _ => f64::MAX,
    }
}

/// Parses a raw NOTAM feed into records. Real upstream feeds are
/// line-delimited free-text blocks; each block's first coordinate match
/// is taken as the NOTAM's location. Malformed blocks yield a record
/// with `lat`/`lon` absent rather than aborting the whole feed parse.
pub fn parse_feed(raw: &str) -> Vec<Notam> {
    raw.split("\n\n")
        .enumerate()
        .filter(|(_, block)| !block.trim().is_empty())
        .map(|(i, block)| {
            let coords = parse_coordinate(block);
            let (category, priority) = classify_text(block);
            Notam {
                id: format!("NOTAM-{i}"),
                lat: coords.map(|c| c.0),
                lon: coords.map(|c| c.1),
                valid_from: extract_validity(block, &VALID_FROM_RE),
                valid_to: extract_validity(block, &VALID_TO_RE),
                category,
                priority,
                description: block.trim().to_string(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ddmm_coordinate() {
        let coord = parse_coordinate("5530N00430W RWY CLSD").unwrap();
        assert!((coord.0 - 55.5).abs() < 0.01);
        assert!((coord.1 - (-4.5)).abs() < 0.01);
    }

    #[test]
    fn parses_ddmmss_coordinate() {
        let coord = parse_coordinate("553000N0043000W DANGER AREA ACTIVE").unwrap();
        assert!((coord.0 - 55.5).abs() < 0.01);
        assert!((coord.1 - (-4.5)).abs() < 0.01);
    }

    #[test]
    fn classifies_runway_closure_as_high_priority() {
        let (category, priority) = classify_text("RWY CLSD DUE TO MAINTENANCE");
        assert_eq!(category, "RUNWAY");
        assert_eq!(priority, Priority::High);
    }

    #[test]
    fn parses_validity_window_from_feed_block() {
        let notams = parse_feed("5530N00430W RWY CLSD\nB) 2401011200 C) 2401022359");
        assert_eq!(notams.len(), 1);
        assert!(notams[0].valid_from.as_deref().unwrap().starts_with("2024-01-01T12:00"));
        assert!(notams[0].valid_to.as_deref().unwrap().starts_with("2024-01-02T23:59"));
    }
}
