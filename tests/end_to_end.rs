//! Cross-module integration tests exercising the six concrete flows an
//! operator would actually hit: an aircraft squawking an emergency code
//! while inside a control zone, a climb-then-descend cycle producing
//! takeoff/landing events, airspace containment driving the intent
//! label, the SSR/NOTAM keyword mechanisms agreeing on a shared
//! vocabulary, a semantic query preferring its inferred intent, and a
//! METAR fetch round-tripping through the cache.

use std::sync::Arc;
use std::time::Duration;

use radar_core::adsb_poller::{EnrichmentPoller, RawAircraft};
use radar_core::airspace::{AirspaceIndex, AirspaceKind};
use radar_core::config::RadarConfig;
use radar_core::error::RadarError;
use radar_core::facade::QueryFacade;
use radar_core::flight_state::{self, AirspaceContext, Telemetry};
use radar_core::metar::{Metar, MetarIngester, MetarSource};
use radar_core::notam;
use radar_core::registry::AircraftRegistry;
use radar_core::semantic::{HashingEmbedder, SemanticIndex, SourceKind};
use radar_core::ssr::SsrClassifier;
use radar_core::store::HistoricalStore;
use radar_core::weather::WeatherIngester;

fn write_ctr(dir: &std::path::Path) {
    std::fs::write(
        dir.join("UK_CTR_TEST.out"),
        "$TYPE=10\n{Test CTR}\n55.0+-5.0\n55.0+-4.0\n56.0+-4.0\n56.0+-5.0\n-1\n",
    )
    .unwrap();
}

#[test]
fn emergency_squawk_inside_ctr_produces_sector_and_event() {
    let dir = tempfile::tempdir().unwrap();
    write_ctr(dir.path());
    let airspace = Arc::new(AirspaceIndex::load(dir.path()));

    let ssr_path = dir.path().join("ssr.txt");
    std::fs::write(&ssr_path, "").unwrap();
    let ssr = Arc::new(SsrClassifier::load(&ssr_path));

    let registry = Arc::new(
        AircraftRegistry::open(&dir.path().join("registry.sled"), &dir.path().join("registry.csv")).unwrap(),
    );
    let store = Arc::new(HistoricalStore::open(&dir.path().join("history.db")).unwrap());
    let mut config = RadarConfig::from_env();
    config.consistency_repair_enabled = true;
    let poller = EnrichmentPoller::new(Arc::new(config), airspace.clone(), ssr, registry, store.clone());

    let raw = RawAircraft {
        hex: "abc999".to_string(),
        flight: Some("SPEEDBIRD1".to_string()),
        lat: Some(55.5),
        lon: Some(-4.5),
        alt_baro: Some(2500.0),
        alt_geom: None,
        gs: Some(180.0),
        track: None,
        baro_rate: None,
        squawk: Some("7500".to_string()),
        category: None,
    };

    let record = poller.enrich_and_store(raw, 5000);
    assert_eq!(record.airspace.as_deref(), Some("Test CTR"));

    let hits = airspace.classify(55.5, -4.5);
    assert_eq!(hits[0].kind, AirspaceKind::Ctr);

    let events = store.events(Some("abc999"), None, 24).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, "HIJACK_SQUAWK");
}

#[test]
fn climb_then_descend_emits_takeoff_and_landing() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoricalStore::open(&dir.path().join("history.db")).unwrap();

    let contact = |t: i64, alt: f64| radar_core::store::ContactRecord {
        hex: "xyz111".to_string(),
        callsign: Some("CLIMBER".to_string()),
        t,
        lat: Some(51.0),
        lon: Some(-1.0),
        alt_baro: Some(alt),
        alt_geom: None,
        ground_speed: Some(150.0),
        track: None,
        vert_rate: None,
        squawk: None,
        category: None,
        phase: None,
        airspace: None,
        airspace_zone_count: None,
        registration: None,
        icao_type: None,
        operator: None,
        raw: "{}".to_string(),
    };

    store.store_contact(&contact(0, 0.0)).unwrap();
    store.store_contact(&contact(10, 100.0)).unwrap();
    let takeoff_events = store.store_contact(&contact(20, 1500.0)).unwrap();
    assert!(takeoff_events.iter().any(|e| e.kind == "TAKEOFF"));

    store.store_contact(&contact(30, 3000.0)).unwrap();
    let landing_events = store.store_contact(&contact(40, 300.0)).unwrap();
    assert!(landing_events.iter().any(|e| e.kind == "LANDING"));

    let all = store.events(Some("xyz111"), None, 24).unwrap();
    assert_eq!(all.iter().filter(|e| e.kind == "TAKEOFF").count(), 1);
    assert_eq!(all.iter().filter(|e| e.kind == "LANDING").count(), 1);
}

#[test]
fn ctr_departure_containment_drives_intent_label() {
    let dir = tempfile::tempdir().unwrap();
    write_ctr(dir.path());
    let airspace = AirspaceIndex::load(dir.path());

    let hits = airspace.classify(55.5, -4.5);
    let primary = hits.first().expect("point lies inside the test CTR");

    let telemetry = Telemetry { alt_baro: Some(1500.0), vert_rate: Some(1200.0), ..Default::default() };
    let ctx = AirspaceContext { in_ctr: primary.kind == AirspaceKind::Ctr, in_tma_or_cta: false };
    let state = flight_state::classify(&telemetry, &ctx, Some(primary.name.as_str()), Some(primary.kind));

    assert_eq!(state.intent, "DEPARTING Test CTR");
}

#[test]
fn ssr_and_notam_keyword_mechanisms_agree_on_military_vocabulary() {
    let dir = tempfile::tempdir().unwrap();
    let ssr_path = dir.path().join("ssr.txt");
    std::fs::write(&ssr_path, "7001 MILITARY EXERCISE AREA\n").unwrap();
    let ssr = SsrClassifier::load(&ssr_path);
    let ssr_record = ssr.lookup("7001");
    assert!(ssr_record.categories.iter().any(|c| format!("{c:?}") == "Military"));

    let notams = notam::parse_feed("5530N00430W MILITARY EXERCISE IN PROGRESS");
    assert_eq!(notams[0].category, "MILITARY");
}

#[tokio::test]
async fn semantic_facade_prefers_inferred_aircraft_intent() {
    let dir = tempfile::tempdir().unwrap();
    let airspace = Arc::new(AirspaceIndex::load(dir.path()));
    let registry = Arc::new(
        AircraftRegistry::open(&dir.path().join("registry.sled"), &dir.path().join("registry.csv")).unwrap(),
    );
    let ais = Arc::new(radar_core::ais::AisConsumer::new());
    let store = Arc::new(HistoricalStore::open(&dir.path().join("history.db")).unwrap());
    let semantic = Arc::new(SemanticIndex::new(64));
    let embedder: Arc<dyn radar_core::semantic::Embedder> = Arc::new(HashingEmbedder::new(64));

    semantic
        .rebuild(
            embedder.as_ref(),
            vec![
                ("aircraft BAW123 squawking 7000 near Glasgow".to_string(), SourceKind::Aircraft),
                ("weather front moving in over Glasgow".to_string(), SourceKind::Weather),
            ],
        )
        .await;

    let notam_ingester = Arc::new(notam::NotamIngester::new("http://localhost:0/unused".to_string(), Duration::from_secs(60)));
    let metar_ingester = Arc::new(MetarIngester::new(vec![], Duration::from_secs(60)));
    let weather_ingester = Arc::new(WeatherIngester::new("http://localhost:0/unused".to_string(), Duration::from_secs(60)));
    let coastline = Arc::new(radar_core::coastline::CoastlineIndex::load(&dir.path().join("coastline.out")));
    let ssr_path = dir.path().join("ssr.txt");
    std::fs::write(&ssr_path, "").unwrap();
    let ssr = Arc::new(SsrClassifier::load(&ssr_path));

    let facade = QueryFacade {
        airspace,
        registry,
        ais,
        store,
        semantic,
        embedder,
        notam: notam_ingester,
        metar: metar_ingester,
        weather: weather_ingester,
        coastline,
        ssr,
    };

    let results = facade.ask("what aircraft are near Glasgow", 0.0, 1).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].source_kind, SourceKind::Aircraft);
}

struct FixedMetarSource(&'static str);

#[async_trait::async_trait]
impl MetarSource for FixedMetarSource {
    async fn fetch_raw(&self, _icao: &str) -> Result<String, RadarError> {
        Ok(self.0.to_string())
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

#[tokio::test]
async fn metar_fetch_parses_then_serves_from_cache() {
    let ingester = MetarIngester::new(
        vec![Box::new(FixedMetarSource("EGPH 281250Z 24012KT 9999 FEW025 12/08 Q1008"))],
        Duration::from_secs(600),
    );

    let first: Metar = ingester.fetch("egph").await.unwrap();
    assert_eq!(first.wind_direction_deg, Some(240));
    assert_eq!(first.qnh_hpa, Some(1008));

    let second = ingester.fetch("EGPH").await.unwrap();
    assert_eq!(second.wind_speed_kt, first.wind_speed_kt);
}
