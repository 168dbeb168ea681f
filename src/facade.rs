//! C10: Query Facade — routes structured and semantic queries to
//! C1-C9. Intent keyword scan per spec.md §4.10.

use std::sync::Arc;

use crate::ais::AisConsumer;
use crate::airspace::{AirspaceIndex, AirspaceView};
use crate::coastline::{CoastlineIndex, CoastlinePoint};
use crate::metar::{Metar, MetarIngester};
use crate::notam::{Notam, NotamIngester};
use crate::registry::{AircraftRegistry, RegistryRecord};
use crate::semantic::{Embedder, ScoredEntry, SemanticIndex, SourceKind};
use crate::ssr::{SsrClassifier, SsrCode};
use crate::store::{AircraftSummary, ActiveAircraft, ContactRecord, FlightEvent, HistoricalStore};
use crate::weather::{WeatherCell, WeatherIngester};
use crate::error::RadarError;

const HISTORY_KEYWORDS: &[&str] = &["history", "historical", "summary", "past", "events", "earlier"];
const WEATHER_KEYWORDS: &[&str] = &["weather", "metar", "wind", "cloud", "visibility", "notam"];
const AIRCRAFT_KEYWORDS: &[&str] = &["aircraft", "flight", "plane", "squawk", "callsign"];

/// Scan `q` for keywords and derive an intent hint, per spec.md §4.10.
fn infer_intent(q: &str) -> Option<SourceKind> {
    let lower = q.to_lowercase();
    if AIRCRAFT_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return Some(SourceKind::Aircraft);
    }
    if WEATHER_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return Some(SourceKind::Weather);
    }
    None
}

fn mentions_history(q: &str) -> bool {
    let lower = q.to_lowercase();
    HISTORY_KEYWORDS.iter().any(|k| lower.contains(k))
}

pub struct QueryFacade {
    pub airspace: Arc<AirspaceIndex>,
    pub registry: Arc<AircraftRegistry>,
    pub ais: Arc<AisConsumer>,
    pub store: Arc<HistoricalStore>,
    pub semantic: Arc<SemanticIndex>,
    pub embedder: Arc<dyn Embedder>,
    pub notam: Arc<NotamIngester>,
    pub metar: Arc<MetarIngester>,
    pub weather: Arc<WeatherIngester>,
    pub coastline: Arc<CoastlineIndex>,
    pub ssr: Arc<SsrClassifier>,
}

pub struct ChatResponse {
    pub context_messages: Vec<ScoredEntry>,
    pub historical_data: Option<Vec<FlightEvent>>,
}

impl QueryFacade {
    /// Pure semantic retrieval via C9 with an optional intent hint.
    pub async fn ask(&self, q: &str, threshold: f32, k: usize) -> Result<Vec<ScoredEntry>, RadarError> {
        let intent = infer_intent(q);
        self.semantic.ask(self.embedder.as_ref(), q, threshold, k, intent).await
    }

    /// Orchestrates retrieval: semantic context plus historical stats
    /// when `q` mentions history, per spec.md §4.10.
    pub async fn chat(&self, q: &str, threshold: f32, max_context: usize) -> Result<ChatResponse, RadarError> {
        let context_messages = self.ask(q, threshold, max_context).await?;

        let historical_data = if mentions_history(q) {
            Some(self.store.events(None, None, 24)?)
        } else {
            None
        };

        Ok(ChatResponse { context_messages, historical_data })
    }

    pub fn aircraft_history(&self, hex: &str, hours: i64) -> Result<Vec<ContactRecord>, RadarError> {
        self.store.history(hex, hours)
    }

    pub fn aircraft_summary(&self, hex: &str) -> Result<Option<AircraftSummary>, RadarError> {
        self.store.summary(hex)
    }

    pub fn aircraft_active(&self, minutes: i64) -> Result<Vec<ActiveAircraft>, RadarError> {
        self.store.active(minutes)
    }

    pub fn events(&self, hex: Option<&str>, kind: Option<&str>, hours: i64) -> Result<Vec<FlightEvent>, RadarError> {
        self.store.events(hex, kind, hours)
    }

    pub fn registry_lookup(&self, hex: &str) -> Option<RegistryRecord> {
        self.registry.get(hex)
    }

    pub fn registry_search_registration(&self, prefix: &str) -> Vec<RegistryRecord> {
        self.registry.search_registration(prefix)
    }

    pub fn registry_search_type(&self, type_code: &str) -> Vec<RegistryRecord> {
        self.registry.search_type(type_code)
    }

    pub fn airspace_identify(&self, lat: f64, lon: f64) -> Vec<String> {
        self.airspace.classify(lat, lon).into_iter().map(|z| z.description.clone()).collect()
    }

    pub fn airspace_view(&self, lat: f64, lon: f64, radius_nm: f64) -> AirspaceView {
        self.airspace.export_view(lat, lon, radius_nm)
    }

    pub fn vessels_in_range(&self, lat: f64, lon: f64, radius_nm: f64) -> Vec<(crate::ais::Vessel, f64)> {
        self.ais.in_range(lat, lon, radius_nm)
    }

    pub async fn notams(&self, lat: f64, lon: f64, radius_nm: f64) -> Result<Vec<Notam>, RadarError> {
        self.notam.within_radius(lat, lon, radius_nm).await
    }

    pub async fn metar(&self, icao: &str) -> Result<Metar, RadarError> {
        self.metar.fetch(icao).await
    }

    pub async fn weather(&self, lat: f64, lon: f64, radius_nm: f64) -> Result<Vec<WeatherCell>, RadarError> {
        self.weather.within_radius(lat, lon, radius_nm).await
    }

    pub fn coastline(&self, lat: f64, lon: f64, radius_nm: f64) -> Vec<CoastlinePoint> {
        self.coastline.within_radius(lat, lon, radius_nm)
    }

    pub fn ssr_lookup(&self, code: &str) -> SsrCode {
        self.ssr.lookup(code)
    }

    pub fn ssr_by_category(&self, category: &str) -> Vec<SsrCode> {
        self.ssr.by_category(category)
    }

    pub fn ssr_all(&self) -> Vec<SsrCode> {
        self.ssr.all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_aircraft_intent_from_keywords() {
        assert_eq!(infer_intent("how many aircraft are inbound"), Some(SourceKind::Aircraft));
    }

    #[test]
    fn infers_weather_intent_from_keywords() {
        assert_eq!(infer_intent("what's the wind at egll"), Some(SourceKind::Weather));
    }

    #[test]
    fn no_intent_when_no_keywords_match() {
        assert_eq!(infer_intent("hello there"), None);
    }

    #[test]
    fn detects_history_keyword() {
        assert!(mentions_history("show me the flight history"));
        assert!(!mentions_history("what's nearby"));
    }
}
