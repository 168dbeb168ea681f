//! Runtime configuration, loaded from the environment (§6 of the spec).
//!
//! Follows the teacher's `dotenvy` + `std::env::var` convention rather
//! than a CLI flag parser — flag parsing is an explicit Non-goal, left
//! to an external collaborator.

use std::env;
use std::time::Duration;

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub sw: LatLon,
    pub ne: LatLon,
}

#[derive(Debug, Clone)]
pub struct RadarConfig {
    pub poll_interval_s: u64,
    pub rebuild_interval_s: u64,
    pub embed_dim: usize,
    pub vessel_ttl_s: u64,
    pub notam_ttl_s: u64,
    pub metar_ttl_s: u64,
    pub weather_ttl_s: u64,
    pub ais_bounds: BoundingBox,
    pub ais_url: String,
    pub ais_api_key: String,
    pub retention_days: i64,
    pub airspace_dir: String,
    pub ssr_file: String,
    pub coastline_file: String,
    pub registry_path: String,
    pub upstream_adsb_url: String,
    pub upstream_adsb_file: String,
    pub notam_feed_url: String,
    pub weather_feed_url: String,
    pub history_db_path: String,
    pub semantic_index_path: String,
    pub semantic_metadata_path: String,
    /// Open Question (spec.md §9): whether the speed/status consistency
    /// repair in the enrichment poller is an upstream-bug workaround or
    /// authoritative policy. Kept as a flag, default on, preserving the
    /// observed behavior rather than silently dropping or hardening it.
    pub consistency_repair_enabled: bool,
    pub http_interface: String,
    pub http_port: u16,
    pub metrics_port: u16,
    pub cleanup_interval_s: u64,
}

impl RadarConfig {
    /// Load configuration from the environment, applying `.env` first if present.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            poll_interval_s: env_parse("POLL_INTERVAL_S", 2),
            rebuild_interval_s: env_parse("REBUILD_INTERVAL_S", 15),
            embed_dim: env_parse("EMBED_DIM", 256),
            vessel_ttl_s: env_parse("VESSEL_TTL_S", 600),
            notam_ttl_s: env_parse("NOTAM_TTL_S", 1800),
            metar_ttl_s: env_parse("METAR_TTL_S", 600),
            weather_ttl_s: env_parse("WEATHER_TTL_S", 600),
            ais_bounds: BoundingBox {
                sw: LatLon {
                    lat: env_parse("AIS_BOUNDS_SW_LAT", -90.0),
                    lon: env_parse("AIS_BOUNDS_SW_LON", -180.0),
                },
                ne: LatLon {
                    lat: env_parse("AIS_BOUNDS_NE_LAT", 90.0),
                    lon: env_parse("AIS_BOUNDS_NE_LON", 180.0),
                },
            },
            ais_url: env_or("AIS_URL", "wss://stream.aisstream.io/v0/stream"),
            ais_api_key: env_or("AIS_API_KEY", ""),
            retention_days: env_parse("RETENTION_DAYS", 30),
            airspace_dir: env_or("AIRSPACE_DIR", "data/airspace"),
            ssr_file: env_or("SSR_FILE", "data/ssr_codes.txt"),
            coastline_file: env_or("COASTLINE_FILE", "data/coastline.out"),
            registry_path: env_or("REGISTRY_PATH", "data/registry.csv"),
            upstream_adsb_url: env_or("UPSTREAM_ADSB_URL", "http://localhost:8080/data/aircraft.json"),
            upstream_adsb_file: env_or("UPSTREAM_ADSB_FILE", "/tmp/aircraft.json"),
            notam_feed_url: env_or("NOTAM_FEED_URL", "https://notams.aim.faa.gov/notamSearch/search"),
            weather_feed_url: env_or("WEATHER_FEED_URL", "https://api.weather.gov/alerts/active"),
            history_db_path: env_or("HISTORY_DB_PATH", "radar_history.db"),
            semantic_index_path: env_or("SEMANTIC_INDEX_PATH", "radar_index.bin"),
            semantic_metadata_path: env_or("SEMANTIC_METADATA_PATH", "radar_metadata.jsonl"),
            consistency_repair_enabled: env_parse("CONSISTENCY_REPAIR_ENABLED", true),
            http_interface: env_or("HTTP_INTERFACE", "0.0.0.0"),
            http_port: env_parse("HTTP_PORT", 8000),
            metrics_port: env_parse("METRICS_PORT", 9091),
            cleanup_interval_s: env_parse("CLEANUP_INTERVAL_S", 3600),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_s)
    }

    pub fn rebuild_interval(&self) -> Duration {
        Duration::from_secs(self.rebuild_interval_s)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        // SAFETY: test-only, single-threaded access to env vars for this key.
        unsafe {
            env::remove_var("POLL_INTERVAL_S");
        }
        let cfg = RadarConfig {
            poll_interval_s: env_parse("POLL_INTERVAL_S", 2),
            ..RadarConfig::from_env()
        };
        assert_eq!(cfg.poll_interval_s, 2);
        assert_eq!(cfg.poll_interval(), Duration::from_secs(2));
    }
}
