//! C5: Aircraft Enrichment Poller — periodic fetch of the upstream
//! ADS-B snapshot, sequential per-record enrichment through C1-C4, and
//! hand-off to C8, with a consistency-repair guardrail.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::airspace::AirspaceIndex;
use crate::config::RadarConfig;
use crate::flight_state::{self, AirspaceContext, Telemetry};
use crate::registry::AircraftRegistry;
use crate::ssr::SsrClassifier;
use crate::store::{ContactRecord, HistoricalStore};

#[derive(Debug, Clone, Deserialize)]
pub struct RawAircraft {
    pub hex: String,
    pub flight: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub alt_baro: Option<f64>,
    pub alt_geom: Option<f64>,
    pub gs: Option<f64>,
    pub track: Option<f64>,
    pub baro_rate: Option<f64>,
    pub squawk: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Snapshot {
    now: Option<f64>,
    aircraft: Vec<RawAircraft>,
}

pub struct EnrichmentPoller {
    config: Arc<RadarConfig>,
    airspace: Arc<AirspaceIndex>,
    ssr: Arc<SsrClassifier>,
    registry: Arc<AircraftRegistry>,
    store: Arc<HistoricalStore>,
    client: reqwest::Client,
    latest: std::sync::RwLock<String>,
}

impl EnrichmentPoller {
    pub fn new(
        config: Arc<RadarConfig>,
        airspace: Arc<AirspaceIndex>,
        ssr: Arc<SsrClassifier>,
        registry: Arc<AircraftRegistry>,
        store: Arc<HistoricalStore>,
    ) -> Self {
        Self {
            config,
            airspace,
            ssr,
            registry,
            store,
            client: reqwest::Client::builder().timeout(Duration::from_secs(5)).build().expect("reqwest client builds"),
            latest: std::sync::RwLock::new("{\"now\":0,\"aircraft\":[]}".to_string()),
        }
    }

    /// The most recently enriched snapshot, serialized for the
    /// `/tmp/aircraft.json` endpoint (spec.md §6). Served from memory
    /// rather than re-reading a file, since the enrichment is already
    /// computed once per tick.
    pub fn latest_snapshot_json(&self) -> String {
        self.latest.read().expect("poller snapshot lock poisoned").clone()
    }

    /// Fetch the upstream snapshot over HTTP, falling back to the local
    /// file cache on failure (spec.md §4.5).
    async fn fetch_snapshot(&self) -> Option<Snapshot> {
        match self.client.get(&self.config.upstream_adsb_url).send().await {
            Ok(response) => match response.json::<Snapshot>().await {
                Ok(snapshot) => return Some(snapshot),
                Err(e) => warn!("Failed to decode ADS-B snapshot: {e}"),
            },
            Err(e) => warn!("ADS-B upstream fetch failed: {e}"),
        }

        match tokio::fs::read_to_string(&self.config.upstream_adsb_file).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    warn!("Fallback ADS-B file unparseable: {e}");
                    None
                }
            },
            Err(e) => {
                warn!("Fallback ADS-B file unreadable: {e}");
                None
            }
        }
    }

    /// Run one tick: fetch, enrich each record in sequence, store.
    pub async fn tick(&self) -> usize {
        let start = std::time::Instant::now();
        let Some(snapshot) = self.fetch_snapshot().await else {
            metrics::counter!(crate::metrics::POLL_ERRORS_TOTAL).increment(1);
            return 0;
        };

        let now_t = snapshot.now.map(|f| f as i64).unwrap_or_else(|| chrono::Utc::now().timestamp());
        let mut processed = 0;
        let mut enriched = Vec::with_capacity(snapshot.aircraft.len());

        for raw in snapshot.aircraft {
            if raw.hex.trim().is_empty() {
                warn!("Skipping aircraft record with no hex (invariant violation)");
                continue;
            }
            enriched.push(self.enrich_and_store(raw, now_t));
            processed += 1;
        }

        let snapshot_json = serde_json::to_string(&serde_json::json!({ "now": now_t, "aircraft": enriched }))
            .unwrap_or_else(|_| "{\"now\":0,\"aircraft\":[]}".to_string());
        *self.latest.write().expect("poller snapshot lock poisoned") = snapshot_json;

        metrics::counter!(crate::metrics::POLL_CYCLES_TOTAL).increment(1);
        metrics::histogram!(crate::metrics::POLL_LATENCY_SECONDS).record(start.elapsed().as_secs_f64());
        processed
    }

    pub fn enrich_and_store(&self, raw: RawAircraft, t: i64) -> ContactRecord {
        let mut airspace_name: Option<String> = None;
        let mut airspace_count = 0usize;
        let mut primary_zone_kind = None;

        let airspace_ctx = if let (Some(lat), Some(lon)) = (raw.lat, raw.lon) {
            let hits = self.airspace.classify(lat, lon);
            airspace_count = hits.len();
            let primary = hits.first();
            airspace_name = primary.map(|z| z.name.clone());
            primary_zone_kind = primary.map(|z| z.kind);
            AirspaceContext {
                in_ctr: primary.map(|z| z.kind == crate::airspace::AirspaceKind::Ctr).unwrap_or(false),
                in_tma_or_cta: primary
                    .map(|z| matches!(z.kind, crate::airspace::AirspaceKind::Tma | crate::airspace::AirspaceKind::Cta))
                    .unwrap_or(false),
            }
        } else {
            AirspaceContext::default()
        };

        let ssr_record = raw.squawk.as_ref().map(|sq| self.ssr.lookup(sq));
        if let Some(ssr) = &ssr_record {
            if ssr.alert {
                warn!("ALERT: aircraft {} squawk {} category {:?}", raw.hex, ssr.code, ssr.categories);
            }
        }

        let registry_record = self.registry.get(&raw.hex);

        let telemetry = Telemetry {
            alt_baro: raw.alt_baro,
            ground_speed: raw.gs,
            vert_rate: raw.baro_rate,
            squawk: raw.squawk.as_deref(),
        };
        let state = flight_state::classify(&telemetry, &airspace_ctx, airspace_name.as_deref(), primary_zone_kind);
        let phase_label = format!("{:?}", state.phase);

        let repaired_phase = if self.config.consistency_repair_enabled {
            repair_phase(phase_label, raw.gs, raw.alt_baro)
        } else {
            phase_label
        };

        let raw_json = serde_json::to_string(&RawSnapshot {
            hex: &raw.hex,
            flight: raw.flight.as_deref(),
            category: raw.category.as_deref(),
        })
        .unwrap_or_else(|_| "{}".to_string());

        let record = ContactRecord {
            hex: raw.hex.clone(),
            callsign: raw.flight.map(|s| s.trim().to_string()),
            t,
            lat: raw.lat,
            lon: raw.lon,
            alt_baro: raw.alt_baro,
            alt_geom: raw.alt_geom,
            ground_speed: raw.gs,
            track: raw.track,
            vert_rate: raw.baro_rate,
            squawk: raw.squawk,
            category: raw.category,
            phase: Some(repaired_phase),
            airspace: airspace_name,
            airspace_zone_count: Some(airspace_count as i64),
            registration: registry_record.as_ref().and_then(|r| r.registration.clone()),
            icao_type: registry_record.as_ref().and_then(|r| r.icao_type.clone()),
            operator: registry_record.as_ref().and_then(|r| r.operator.clone()),
            raw: raw_json,
        };

        match self.store.store_contact(&record) {
            Ok(events) => {
                if !events.is_empty() {
                    metrics::counter!(crate::metrics::EVENTS_DETECTED_TOTAL).increment(events.len() as u64);
                }
            }
            Err(e) => warn!("Failed to store contact for {}: {e}", record.hex),
        }

        record
    }
}

#[derive(serde::Serialize)]
struct RawSnapshot<'a> {
    hex: &'a str,
    flight: Option<&'a str>,
    category: Option<&'a str>,
}

/// Consistency repair (spec.md §4.5): a guardrail against upstream
/// inconsistency between reported status and ground-speed/altitude, not
/// authoritative truth. Gated by `consistency_repair_enabled` (resolves
/// the Open Question in spec.md §9 — default on, preserving observed
/// behavior).
fn repair_phase(status: String, gs: Option<f64>, alt: Option<f64>) -> String {
    let gs = gs.unwrap_or(0.0);
    let alt = alt.unwrap_or(0.0);

    if gs > 10.0 && status == "Parked" {
        return if alt > 1000.0 { "Cruise".to_string() } else { "Taxiing".to_string() };
    }
    if gs < 5.0 && alt < 100.0 && status == "Cruise" {
        return if alt < 20.0 { "Parked".to_string() } else { "Taxiing".to_string() };
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consistency_repair_promotes_moving_parked_aircraft() {
        assert_eq!(repair_phase("Parked".to_string(), Some(20.0), Some(2000.0)), "Cruise");
        assert_eq!(repair_phase("Parked".to_string(), Some(20.0), Some(50.0)), "Taxiing");
    }

    #[test]
    fn consistency_repair_demotes_stationary_cruise() {
        assert_eq!(repair_phase("Cruise".to_string(), Some(1.0), Some(10.0)), "Parked");
    }

    #[test]
    fn unaffected_status_passes_through() {
        assert_eq!(repair_phase("InFlight".to_string(), Some(200.0), Some(20000.0)), "InFlight");
    }

    #[test]
    fn enrichment_carries_squawk_through_to_stored_contact_and_events() {
        let dir = tempfile::tempdir().unwrap();
        let airspace = Arc::new(AirspaceIndex::load(&dir.path().join("airspace")));
        let ssr_path = dir.path().join("ssr.txt");
        std::fs::write(&ssr_path, "").unwrap();
        let ssr = Arc::new(SsrClassifier::load(&ssr_path));
        let registry = Arc::new(
            AircraftRegistry::open(&dir.path().join("registry.sled"), &dir.path().join("registry.csv")).unwrap(),
        );
        let store = Arc::new(HistoricalStore::open(&dir.path().join("history.db")).unwrap());
        let mut config = RadarConfig::from_env();
        config.consistency_repair_enabled = true;
        let poller = EnrichmentPoller::new(Arc::new(config), airspace, ssr, registry, store.clone());

        let raw = RawAircraft {
            hex: "abc123".to_string(),
            flight: Some("TEST1".to_string()),
            lat: Some(55.5),
            lon: Some(-4.5),
            alt_baro: Some(3000.0),
            alt_geom: None,
            gs: Some(200.0),
            track: None,
            baro_rate: None,
            squawk: Some("7700".to_string()),
            category: None,
        };

        let record = poller.enrich_and_store(raw, 1000);
        assert_eq!(record.squawk.as_deref(), Some("7700"));

        let events = store.events(Some("abc123"), None, 24).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "EMERGENCY_SQUAWK");
    }
}
