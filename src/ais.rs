//! C6: AIS Consumer — persistent WebSocket subscription to a vessel
//! message stream, per-vessel state merge, staleness eviction, and
//! spatial query.
//!
//! The concurrent per-vessel map is directly modeled on the teacher's
//! `flight_tracker` module's `AircraftStatesMap` (a `DashMap` keyed by
//! identity with per-key merge) — the same "many producers, one map,
//! per-key atomic update" shape, with MMSI standing in for ICAO hex.

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::config::BoundingBox;

const EARTH_RADIUS_NM: f64 = 3440.065;
const MAX_RECONNECT_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Default, Serialize)]
pub struct Vessel {
    pub mmsi: String,
    pub last_update: i64,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub sog: Option<f64>,
    pub cog: Option<f64>,
    pub heading: Option<f64>,
    pub nav_status: Option<String>,
    pub type_code: Option<String>,
    pub name: Option<String>,
    pub callsign: Option<String>,
    pub destination: Option<String>,
    pub length: Option<f64>,
    pub width: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct InboundMessage {
    #[serde(rename = "MMSI")]
    mmsi: Option<serde_json::Value>,
    #[serde(rename = "Latitude")]
    lat: Option<f64>,
    #[serde(rename = "Longitude")]
    lon: Option<f64>,
    #[serde(rename = "Sog")]
    sog: Option<f64>,
    #[serde(rename = "Cog")]
    cog: Option<f64>,
    #[serde(rename = "TrueHeading")]
    heading: Option<f64>,
    #[serde(rename = "NavigationalStatus")]
    nav_status: Option<String>,
    #[serde(rename = "ShipType")]
    type_code: Option<String>,
    #[serde(rename = "ShipName")]
    name: Option<String>,
    #[serde(rename = "CallSign")]
    callsign: Option<String>,
    #[serde(rename = "Destination")]
    destination: Option<String>,
    #[serde(rename = "Length")]
    length: Option<f64>,
    #[serde(rename = "Width")]
    width: Option<f64>,
}

#[derive(Debug, Serialize)]
struct SubscriptionRequest<'a> {
    #[serde(rename = "APIKey")]
    api_key: &'a str,
    #[serde(rename = "BoundingBoxes")]
    bounding_boxes: Vec<[[f64; 2]; 2]>,
    #[serde(rename = "FilterMessageTypes")]
    filter_message_types: Vec<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Halted,
}

pub struct AisConsumer {
    vessels: DashMap<String, Vessel>,
    status: std::sync::RwLock<ConnectionStatus>,
    reconnects: AtomicU32,
    messages_received: AtomicU64,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

impl AisConsumer {
    pub fn new() -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            vessels: DashMap::new(),
            status: std::sync::RwLock::new(ConnectionStatus::Disconnected),
            reconnects: AtomicU32::new(0),
            messages_received: AtomicU64::new(0),
            stop_tx,
            stop_rx,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.read().expect("ais status lock poisoned")
    }

    pub fn vessel_count(&self) -> usize {
        self.vessels.len()
    }

    pub fn request_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Runs the long-lived WebSocket loop until `request_stop` is called
    /// or the reconnect budget is exhausted (spec.md §4.6 reconnect policy).
    pub async fn run(&self, url: &str, api_key: &str, bounds: BoundingBox) {
        let mut attempt: u32 = 0;
        let mut stop_rx = self.stop_rx.clone();

        loop {
            if *stop_rx.borrow() {
                *self.status.write().expect("ais status lock poisoned") = ConnectionStatus::Disconnected;
                return;
            }

            *self.status.write().expect("ais status lock poisoned") = ConnectionStatus::Connecting;
            match self.connect_and_stream(url, api_key, bounds, &mut stop_rx).await {
                Ok(()) => {
                    attempt = 0;
                }
                Err(e) => {
                    warn!("AIS connection error: {e}");
                    attempt += 1;
                    self.reconnects.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!(crate::metrics::AIS_RECONNECTS_TOTAL).increment(1);

                    if attempt > MAX_RECONNECT_ATTEMPTS {
                        warn!("AIS consumer halted after {attempt} consecutive reconnect failures");
                        *self.status.write().expect("ais status lock poisoned") = ConnectionStatus::Halted;
                        return;
                    }

                    let backoff = Duration::from_secs(2u64.saturating_pow(attempt).min(60));
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = stop_rx.changed() => {
                            if *stop_rx.borrow() {
                                *self.status.write().expect("ais status lock poisoned") = ConnectionStatus::Disconnected;
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn connect_and_stream(
        &self,
        url: &str,
        api_key: &str,
        bounds: BoundingBox,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        let subscription = SubscriptionRequest {
            api_key,
            bounding_boxes: vec![[
                [bounds.sw.lat, bounds.sw.lon],
                [bounds.ne.lat, bounds.ne.lon],
            ]],
            filter_message_types: vec!["PositionReport"],
        };
        let payload = serde_json::to_string(&subscription).unwrap_or_default();
        write.send(Message::Text(payload.into())).await?;

        *self.status.write().expect("ais status lock poisoned") = ConnectionStatus::Connected;
        info!("AIS consumer connected to {url}");

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_message(&text);
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e),
                    }
                }
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn handle_message(&self, text: &str) {
        let inbound: InboundMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                warn!("Discarding malformed AIS message: {e}");
                return;
            }
        };

        let Some(mmsi_value) = inbound.mmsi else {
            return;
        };
        let mmsi = match mmsi_value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            _ => return,
        };

        self.messages_received.fetch_add(1, Ordering::Relaxed);

        self.vessels
            .entry(mmsi.clone())
            .and_modify(|v| merge_fields(v, &inbound))
            .or_insert_with(|| new_vessel(mmsi.clone(), &inbound));
    }

    /// Evict vessels whose `last_update` is older than `ttl_s`. Returns
    /// the number evicted so the janitor task can log/count it.
    pub fn evict_stale(&self, ttl_s: i64) -> usize {
        let cutoff = now() - ttl_s;
        let stale: Vec<String> = self
            .vessels
            .iter()
            .filter(|entry| entry.value().last_update < cutoff)
            .map(|entry| entry.key().clone())
            .collect();
        for mmsi in &stale {
            self.vessels.remove(mmsi);
        }
        stale.len()
    }

    /// `in_range` per spec.md §4.6: great-circle haversine distance,
    /// sorted ascending. Entries are cloned out from under the map lock
    /// before distance is computed, so no computation happens while
    /// holding a shard lock.
    pub fn in_range(&self, center_lat: f64, center_lon: f64, radius_nm: f64) -> Vec<(Vessel, f64)> {
        let snapshot: Vec<Vessel> = self.vessels.iter().map(|e| e.value().clone()).collect();
        let mut results: Vec<(Vessel, f64)> = snapshot
            .into_iter()
            .filter_map(|v| {
                let (lat, lon) = (v.lat?, v.lon?);
                let distance = haversine_nm(center_lat, center_lon, lat, lon);
                (distance <= radius_nm).then_some((v, distance))
            })
            .collect();
        results.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        results
    }
}

impl Default for AisConsumer {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_fields(vessel: &mut Vessel, inbound: &InboundMessage) {
    if inbound.lat.is_some() {
        vessel.lat = inbound.lat;
    }
    if inbound.lon.is_some() {
        vessel.lon = inbound.lon;
    }
    if inbound.sog.is_some() {
        vessel.sog = inbound.sog;
    }
    if inbound.cog.is_some() {
        vessel.cog = inbound.cog;
    }
    if inbound.heading.is_some() {
        vessel.heading = inbound.heading;
    }
    if inbound.nav_status.is_some() {
        vessel.nav_status = inbound.nav_status.clone();
    }
    if inbound.type_code.is_some() {
        vessel.type_code = inbound.type_code.clone();
    }
    if inbound.name.is_some() {
        vessel.name = inbound.name.clone();
    }
    if inbound.callsign.is_some() {
        vessel.callsign = inbound.callsign.clone();
    }
    if inbound.destination.is_some() {
        vessel.destination = inbound.destination.clone();
    }
    if inbound.length.is_some() {
        vessel.length = inbound.length;
    }
    if inbound.width.is_some() {
        vessel.width = inbound.width;
    }
    vessel.last_update = now();
}

fn new_vessel(mmsi: String, inbound: &InboundMessage) -> Vessel {
    Vessel {
        mmsi,
        last_update: now(),
        lat: inbound.lat,
        lon: inbound.lon,
        sog: inbound.sog,
        cog: inbound.cog,
        heading: inbound.heading,
        nav_status: inbound.nav_status.clone(),
        type_code: inbound.type_code.clone(),
        name: inbound.name.clone(),
        callsign: inbound.callsign.clone(),
        destination: inbound.destination.clone(),
        length: inbound.length,
        width: inbound.width,
    }
}

/// Great-circle distance in nautical miles (haversine, Earth radius
/// 3440.065 nm per spec.md §4.6).
pub fn haversine_nm(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (lat1.to_radians(), lon1.to_radians(), lat2.to_radians(), lon2.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_NM * c
}

/// Forward azimuth (bearing) in degrees from point 1 to point 2.
pub fn bearing_degrees(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (lat1.to_radians(), lon1.to_radians(), lat2.to_radians(), lon2.to_radians());
    let dlon = lon2 - lon1;
    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_never_overwrites_with_absent_fields() {
        let consumer = AisConsumer::new();
        consumer.handle_message(r#"{"MMSI": 123456789, "Latitude": 55.0, "Longitude": -4.0, "ShipName": "TESTSHIP"}"#);
        consumer.handle_message(r#"{"MMSI": 123456789, "Sog": 12.5}"#);

        let vessel = consumer.vessels.get("123456789").unwrap();
        assert_eq!(vessel.lat, Some(55.0));
        assert_eq!(vessel.name.as_deref(), Some("TESTSHIP"));
        assert_eq!(vessel.sog, Some(12.5));
    }

    #[test]
    fn stale_vessel_is_evicted() {
        let consumer = AisConsumer::new();
        consumer.vessels.insert(
            "999".to_string(),
            Vessel { mmsi: "999".to_string(), last_update: now() - 601, ..Default::default() },
        );
        let evicted = consumer.evict_stale(600);
        assert_eq!(evicted, 1);
        assert_eq!(consumer.vessel_count(), 0);
    }

    #[test]
    fn in_range_sorts_by_ascending_distance() {
        let consumer = AisConsumer::new();
        consumer.vessels.insert(
            "near".to_string(),
            Vessel { mmsi: "near".to_string(), last_update: now(), lat: Some(55.01), lon: Some(-4.0), ..Default::default() },
        );
        consumer.vessels.insert(
            "far".to_string(),
            Vessel { mmsi: "far".to_string(), last_update: now(), lat: Some(56.0), lon: Some(-4.0), ..Default::default() },
        );

        let results = consumer.in_range(55.0, -4.0, 200.0);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0.mmsi, "near");
        assert!(results[0].1 < results[1].1);
    }

    #[test]
    fn haversine_matches_known_distance() {
        let d = haversine_nm(0.0, 0.0, 0.0, 1.0);
        assert!((d - 60.04).abs() < 0.5);
    }
}
