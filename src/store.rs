//! C8: Historical Store — append-only contact log, rolling per-entity
//! summaries, and event detection, backed by `rusqlite`.
//!
//! The teacher persists everything in Postgres via diesel, which is out
//! of scope for a single-file, single-process history database (spec.md
//! §6 calls for "one history database file"). `rusqlite` with the
//! `bundled` feature gives the same "one file, no external service"
//! property `original_source/radar_database.py`'s `sqlite3` usage has,
//! so this module follows the original's schema shape instead of the
//! teacher's relational layer. Single-writer discipline (one `Mutex`
//! guarding the connection) mirrors spec.md §5's "exclusive writer,
//! shared readers" rule — reads open their own short-lived connection
//! against the same WAL-mode file.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::error::RadarError;

#[derive(Debug, Clone, Serialize)]
pub struct ContactRecord {
    pub hex: String,
    pub callsign: Option<String>,
    pub t: i64,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub alt_baro: Option<f64>,
    pub alt_geom: Option<f64>,
    pub ground_speed: Option<f64>,
    pub track: Option<f64>,
    pub vert_rate: Option<f64>,
    pub squawk: Option<String>,
    pub category: Option<String>,
    pub phase: Option<String>,
    pub airspace: Option<String>,
    pub airspace_zone_count: Option<i64>,
    pub registration: Option<String>,
    pub icao_type: Option<String>,
    pub operator: Option<String>,
    pub raw: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AircraftSummary {
    pub hex: String,
    pub first_seen: i64,
    pub last_seen: i64,
    pub contact_count: i64,
    pub callsigns: Vec<String>,
    pub phases: Vec<String>,
    pub squawks: Vec<String>,
    pub alt_max: Option<f64>,
    pub alt_min: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    Takeoff,
    Landing,
    EmergencySquawk,
    RadioFailure,
    HijackSquawk,
    LostContact,
}

impl EventKind {
    fn as_str(self) -> &'static str {
        match self {
            EventKind::Takeoff => "TAKEOFF",
            EventKind::Landing => "LANDING",
            EventKind::EmergencySquawk => "EMERGENCY_SQUAWK",
            EventKind::RadioFailure => "RADIO_FAILURE",
            EventKind::HijackSquawk => "HIJACK_SQUAWK",
            EventKind::LostContact => "LOST_CONTACT",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FlightEvent {
    pub hex: String,
    pub t: i64,
    pub kind: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub alt: Option<f64>,
    pub squawk: Option<String>,
    pub details: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveAircraft {
    pub hex: String,
    pub last_seen: i64,
    pub callsign: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub alt: Option<f64>,
}

/// Hands out pooled read-only connections against the same WAL-mode
/// file the writer holds, the same `r2d2::ManageConnection` shape the
/// teacher uses for its Postgres pool (`diesel::r2d2`), adapted to
/// `rusqlite` since there is no Postgres server here to pool against.
struct SqliteReaderManager {
    path: PathBuf,
}

impl r2d2::ManageConnection for SqliteReaderManager {
    type Connection = Connection;
    type Error = rusqlite::Error;

    fn connect(&self) -> Result<Connection, rusqlite::Error> {
        open_connection(&self.path)
    }

    fn is_valid(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch("SELECT 1")
    }

    fn has_broken(&self, _conn: &mut Connection) -> bool {
        false
    }
}

pub struct HistoricalStore {
    #[allow(dead_code)]
    path: PathBuf,
    writer: Mutex<Connection>,
    readers: r2d2::Pool<SqliteReaderManager>,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS aircraft_contacts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hex TEXT NOT NULL,
    callsign TEXT,
    t INTEGER NOT NULL,
    lat REAL,
    lon REAL,
    alt_baro REAL,
    alt_geom REAL,
    ground_speed REAL,
    track REAL,
    vert_rate REAL,
    squawk TEXT,
    category TEXT,
    phase TEXT,
    airspace TEXT,
    airspace_zone_count INTEGER,
    registration TEXT,
    icao_type TEXT,
    operator TEXT,
    raw_data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_contacts_hex_t ON aircraft_contacts(hex, t);
CREATE INDEX IF NOT EXISTS idx_contacts_t ON aircraft_contacts(t);
CREATE INDEX IF NOT EXISTS idx_contacts_callsign ON aircraft_contacts(callsign);

CREATE TABLE IF NOT EXISTS aircraft_summary (
    hex TEXT PRIMARY KEY,
    first_seen INTEGER NOT NULL,
    last_seen INTEGER NOT NULL,
    contact_count INTEGER NOT NULL,
    callsigns TEXT NOT NULL,
    phases TEXT NOT NULL,
    squawks TEXT NOT NULL,
    alt_max REAL,
    alt_min REAL
);

CREATE TABLE IF NOT EXISTS ship_contacts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    mmsi TEXT NOT NULL,
    t INTEGER NOT NULL,
    lat REAL,
    lon REAL,
    sog REAL,
    cog REAL,
    raw_data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ship_mmsi_t ON ship_contacts(mmsi, t);

CREATE TABLE IF NOT EXISTS ship_summary (
    mmsi TEXT PRIMARY KEY,
    first_seen INTEGER NOT NULL,
    last_seen INTEGER NOT NULL,
    contact_count INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS flight_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hex TEXT NOT NULL,
    t INTEGER NOT NULL,
    kind TEXT NOT NULL,
    lat REAL,
    lon REAL,
    alt REAL,
    squawk TEXT,
    details TEXT NOT NULL,
    UNIQUE(hex, t, kind)
);
CREATE INDEX IF NOT EXISTS idx_events_kind ON flight_events(kind);

CREATE TABLE IF NOT EXISTS performance_stats (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    recorded_at INTEGER NOT NULL,
    poll_duration_ms INTEGER,
    contacts_processed INTEGER,
    events_emitted INTEGER
);
"#;

fn open_connection(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(conn)
}

fn set_to_json(set: &[String]) -> String {
    serde_json::to_string(set).unwrap_or_else(|_| "[]".to_string())
}

fn json_to_set(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}

impl HistoricalStore {
    pub fn open(path: &Path) -> Result<Self, RadarError> {
        let conn = open_connection(path)?;
        conn.execute_batch(SCHEMA)?;

        let readers = r2d2::Pool::builder()
            .max_size(8)
            .build(SqliteReaderManager { path: path.to_path_buf() })
            .map_err(|e| RadarError::InternalInvariant(format!("reader pool: {e}")))?;

        info!("Historical store opened at {}", path.display());
        Ok(Self { path: path.to_path_buf(), writer: Mutex::new(conn), readers })
    }

    fn reader(&self) -> Result<r2d2::PooledConnection<SqliteReaderManager>, RadarError> {
        self.readers.get().map_err(|e| RadarError::InternalInvariant(format!("reader pool: {e}")))
    }

    /// Atomic append + summary upsert + event detection, all inside one
    /// transaction. Failure at any step aborts the whole write.
    pub fn store_contact(&self, rec: &ContactRecord) -> Result<Vec<FlightEvent>, RadarError> {
        let mut conn = self.writer.lock().expect("store writer mutex poisoned");
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO aircraft_contacts
             (hex, callsign, t, lat, lon, alt_baro, alt_geom, ground_speed, track, vert_rate, squawk, category, phase, airspace, airspace_zone_count, registration, icao_type, operator, raw_data)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)",
            params![
                rec.hex, rec.callsign, rec.t, rec.lat, rec.lon, rec.alt_baro, rec.alt_geom,
                rec.ground_speed, rec.track, rec.vert_rate, rec.squawk, rec.category, rec.phase,
                rec.airspace, rec.airspace_zone_count, rec.registration, rec.icao_type, rec.operator, rec.raw,
            ],
        )?;

        upsert_summary(&tx, rec)?;
        let events = detect_events(&tx, rec)?;

        tx.commit()?;

        // Infrequent, non-critical maintenance piggybacked on the write
        // path rather than its own scheduled task — same
        // roll-a-die-per-event trigger the teacher uses for its periodic
        // cleanup pass (`flight_tracker.rs`).
        if rand::random::<u16>().is_multiple_of(2000) {
            if let Err(e) = conn.execute_batch("PRAGMA optimize") {
                warn!("PRAGMA optimize failed: {e}");
            }
        }

        Ok(events)
    }

    pub fn history(&self, hex: &str, hours: i64) -> Result<Vec<ContactRecord>, RadarError> {
        let conn = self.reader()?;
        let cutoff = Utc::now().timestamp() - hours * 3600;
        let mut stmt = conn.prepare(
            "SELECT hex, callsign, t, lat, lon, alt_baro, alt_geom, ground_speed, track, vert_rate, squawk, category, phase, airspace, airspace_zone_count, registration, icao_type, operator, raw_data
             FROM aircraft_contacts WHERE hex = ?1 AND t >= ?2 ORDER BY t ASC",
        )?;
        let rows = stmt.query_map(params![hex, cutoff], row_to_contact)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn summary(&self, hex: &str) -> Result<Option<AircraftSummary>, RadarError> {
        let conn = self.reader()?;
        let result = conn
            .query_row(
                "SELECT hex, first_seen, last_seen, contact_count, callsigns, phases, squawks, alt_max, alt_min
                 FROM aircraft_summary WHERE hex = ?1",
                params![hex],
                |row| {
                    Ok(AircraftSummary {
                        hex: row.get(0)?,
                        first_seen: row.get(1)?,
                        last_seen: row.get(2)?,
                        contact_count: row.get(3)?,
                        callsigns: json_to_set(&row.get::<_, String>(4)?),
                        phases: json_to_set(&row.get::<_, String>(5)?),
                        squawks: json_to_set(&row.get::<_, String>(6)?),
                        alt_max: row.get(7)?,
                        alt_min: row.get(8)?,
                    })
                },
            )
            .optional()?;
        Ok(result)
    }

    pub fn events(&self, hex: Option<&str>, kind: Option<&str>, hours: i64) -> Result<Vec<FlightEvent>, RadarError> {
        let conn = self.reader()?;
        let cutoff = Utc::now().timestamp() - hours * 3600;

        let mut sql = String::from(
            "SELECT hex, t, kind, lat, lon, alt, squawk, details FROM flight_events WHERE t >= ?1",
        );
        if hex.is_some() {
            sql.push_str(" AND hex = ?2");
        }
        if kind.is_some() {
            sql.push_str(if hex.is_some() { " AND kind = ?3" } else { " AND kind = ?2" });
        }
        sql.push_str(" ORDER BY t DESC");

        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<FlightEvent> = match (hex, kind) {
            (Some(h), Some(k)) => stmt
                .query_map(params![cutoff, h, k], row_to_event)?
                .collect::<Result<_, _>>()?,
            (Some(h), None) => stmt.query_map(params![cutoff, h], row_to_event)?.collect::<Result<_, _>>()?,
            (None, Some(k)) => stmt.query_map(params![cutoff, k], row_to_event)?.collect::<Result<_, _>>()?,
            (None, None) => stmt.query_map(params![cutoff], row_to_event)?.collect::<Result<_, _>>()?,
        };
        Ok(rows)
    }

    pub fn active(&self, minutes: i64) -> Result<Vec<ActiveAircraft>, RadarError> {
        let conn = self.reader()?;
        let cutoff = Utc::now().timestamp() - minutes * 60;
        // Join each hex's latest timestamp back to its full contact row
        // so the returned callsign/lat/lon/alt are all from the same
        // observation, not a GROUP BY's arbitrarily-chosen row.
        let mut stmt = conn.prepare(
            "SELECT ac.hex, ac.t, ac.callsign, ac.lat, ac.lon, ac.alt_baro
             FROM aircraft_contacts ac
             JOIN (
                SELECT hex, MAX(t) AS last_seen
                FROM aircraft_contacts WHERE t >= ?1 GROUP BY hex
             ) latest ON latest.hex = ac.hex AND latest.last_seen = ac.t",
        )?;
        let rows = stmt.query_map(params![cutoff], |row| {
            Ok(ActiveAircraft {
                hex: row.get(0)?,
                last_seen: row.get(1)?,
                callsign: row.get(2)?,
                lat: row.get(3)?,
                lon: row.get(4)?,
                alt: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Deletes contacts older than `days`, recomputes `first_seen` for
    /// surviving summaries, drops summaries with no remaining contacts.
    pub fn cleanup(&self, days: i64) -> Result<usize, RadarError> {
        let conn = self.writer.lock().expect("store writer mutex poisoned");
        let cutoff = Utc::now().timestamp() - days * 86400;

        let deleted = conn.execute("DELETE FROM aircraft_contacts WHERE t < ?1", params![cutoff])?;

        conn.execute(
            "UPDATE aircraft_summary SET first_seen = (
                SELECT MIN(t) FROM aircraft_contacts WHERE aircraft_contacts.hex = aircraft_summary.hex
             ) WHERE EXISTS (
                SELECT 1 FROM aircraft_contacts WHERE aircraft_contacts.hex = aircraft_summary.hex
             )",
            [],
        )?;

        conn.execute(
            "DELETE FROM aircraft_summary WHERE NOT EXISTS (
                SELECT 1 FROM aircraft_contacts WHERE aircraft_contacts.hex = aircraft_summary.hex
             )",
            [],
        )?;

        info!("Cleanup removed {deleted} contacts older than {days} days");
        Ok(deleted)
    }
}

fn upsert_summary(tx: &rusqlite::Transaction, rec: &ContactRecord) -> rusqlite::Result<()> {
    let existing = tx
        .query_row(
            "SELECT first_seen, contact_count, callsigns, phases, squawks, alt_max, alt_min
             FROM aircraft_summary WHERE hex = ?1",
            params![rec.hex],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    json_to_set(&row.get::<_, String>(2)?),
                    json_to_set(&row.get::<_, String>(3)?),
                    json_to_set(&row.get::<_, String>(4)?),
                    row.get::<_, Option<f64>>(5)?,
                    row.get::<_, Option<f64>>(6)?,
                ))
            },
        )
        .optional()?;

    let alt = rec.alt_baro;

    match existing {
        Some((first_seen, count, mut callsigns, mut phases, mut squawks, alt_max, alt_min)) => {
            if let Some(cs) = &rec.callsign {
                if !callsigns.contains(cs) {
                    callsigns.push(cs.clone());
                }
            }
            if let Some(p) = &rec.phase {
                if !phases.contains(p) {
                    phases.push(p.clone());
                }
            }
            if let Some(sq) = &rec.squawk {
                if !squawks.contains(sq) {
                    squawks.push(sq.clone());
                }
            }
            let new_max = match (alt_max, alt) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, None) => a,
                (None, b) => b,
            };
            let new_min = match (alt_min, alt) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, None) => a,
                (None, b) => b,
            };

            tx.execute(
                "UPDATE aircraft_summary SET last_seen = ?2, contact_count = ?3, callsigns = ?4,
                 phases = ?5, squawks = ?6, alt_max = ?7, alt_min = ?8, first_seen = MIN(first_seen, ?9)
                 WHERE hex = ?1",
                params![
                    rec.hex, rec.t, count + 1, set_to_json(&callsigns), set_to_json(&phases),
                    set_to_json(&squawks), new_max, new_min, first_seen,
                ],
            )?;
        }
        None => {
            let callsigns = rec.callsign.iter().cloned().collect::<Vec<_>>();
            let phases = rec.phase.iter().cloned().collect::<Vec<_>>();
            let squawks = rec.squawk.iter().cloned().collect::<Vec<_>>();
            tx.execute(
                "INSERT INTO aircraft_summary (hex, first_seen, last_seen, contact_count, callsigns, phases, squawks, alt_max, alt_min)
                 VALUES (?1,?2,?2,1,?3,?4,?5,?6,?6)",
                params![rec.hex, rec.t, set_to_json(&callsigns), set_to_json(&phases), set_to_json(&squawks), alt],
            )?;
        }
    }
    Ok(())
}

/// Event detector: runs with access to the last five contacts for this
/// `hex` within the past 300 s, per spec.md §4.8.
fn detect_events(tx: &rusqlite::Transaction, rec: &ContactRecord) -> rusqlite::Result<Vec<FlightEvent>> {
    let mut events = Vec::new();
    let window_start = rec.t - 300;

    let mut stmt = tx.prepare(
        "SELECT alt_baro FROM aircraft_contacts WHERE hex = ?1 AND t >= ?2 AND t < ?3 ORDER BY t DESC LIMIT 5",
    )?;
    let recent_alts: Vec<Option<f64>> = stmt
        .query_map(params![rec.hex, window_start, rec.t], |row| row.get(0))?
        .collect::<Result<_, _>>()?;

    if let Some(squawk) = &rec.squawk {
        if matches!(squawk.as_str(), "7500" | "7600" | "7700") {
            let kind = match squawk.as_str() {
                "7500" => EventKind::HijackSquawk,
                "7600" => EventKind::RadioFailure,
                _ => EventKind::EmergencySquawk,
            };
            if let Some(event) = insert_event(tx, rec, kind, format!("squawk {squawk}"))? {
                events.push(event);
            }
        }
    }

    if let Some(current_alt) = rec.alt_baro {
        let recent_min = recent_alts.iter().flatten().cloned().fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |a| a.min(v)))
        });
        if let Some(recent_min) = recent_min {
            if recent_min < 500.0 && current_alt > 1000.0 && (current_alt - recent_min) > 800.0 {
                if let Some(event) = insert_event(tx, rec, EventKind::Takeoff, format!("climbed from {recent_min} to {current_alt} ft"))? {
                    events.push(event);
                }
            }
        }
        let recent_max = recent_alts.iter().flatten().cloned().fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |a| a.max(v)))
        });
        if let Some(recent_max) = recent_max {
            if recent_max > 2000.0 && current_alt < 500.0 {
                if let Some(event) = insert_event(tx, rec, EventKind::Landing, format!("descended from {recent_max} to {current_alt} ft"))? {
                    events.push(event);
                }
            }
        }
    }

    Ok(events)
}

fn insert_event(
    tx: &rusqlite::Transaction,
    rec: &ContactRecord,
    kind: EventKind,
    details: String,
) -> rusqlite::Result<Option<FlightEvent>> {
    let result = tx.execute(
        "INSERT OR IGNORE INTO flight_events (hex, t, kind, lat, lon, alt, squawk, details) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
        params![rec.hex, rec.t, kind.as_str(), rec.lat, rec.lon, rec.alt_baro, rec.squawk, details],
    )?;
    if result == 0 {
        return Ok(None);
    }
    Ok(Some(FlightEvent {
        hex: rec.hex.clone(),
        t: rec.t,
        kind: kind.as_str().to_string(),
        lat: rec.lat,
        lon: rec.lon,
        alt: rec.alt_baro,
        squawk: rec.squawk.clone(),
        details,
    }))
}

fn row_to_contact(row: &rusqlite::Row) -> rusqlite::Result<ContactRecord> {
    Ok(ContactRecord {
        hex: row.get(0)?,
        callsign: row.get(1)?,
        t: row.get(2)?,
        lat: row.get(3)?,
        lon: row.get(4)?,
        alt_baro: row.get(5)?,
        alt_geom: row.get(6)?,
        ground_speed: row.get(7)?,
        track: row.get(8)?,
        vert_rate: row.get(9)?,
        squawk: row.get(10)?,
        category: row.get(11)?,
        phase: row.get(12)?,
        airspace: row.get(13)?,
        airspace_zone_count: row.get(14)?,
        registration: row.get(15)?,
        icao_type: row.get(16)?,
        operator: row.get(17)?,
        raw: row.get(18)?,
    })
}

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<FlightEvent> {
    Ok(FlightEvent {
        hex: row.get(0)?,
        t: row.get(1)?,
        kind: row.get(2)?,
        lat: row.get(3)?,
        lon: row.get(4)?,
        alt: row.get(5)?,
        squawk: row.get(6)?,
        details: row.get(7)?,
    })
}

/// Janitor helper: aircraft whose `last_seen` exceeds `threshold_s` is
/// reported as LOST_CONTACT (idempotent, once per hex per loss episode
/// via the same `(hex, t, kind)` uniqueness as other events).
pub fn report_lost_contact(store: &HistoricalStore, threshold_s: i64) -> Result<Vec<FlightEvent>, RadarError> {
    let conn = store.reader()?;
    let now = Utc::now().timestamp();
    let mut stmt = conn.prepare(
        "SELECT hex, MAX(t) as last_seen FROM aircraft_contacts GROUP BY hex HAVING ?1 - last_seen > ?2",
    )?;
    let stale: Vec<(String, i64)> = stmt
        .query_map(params![now, threshold_s], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<_, _>>()?;
    drop(stmt);
    drop(conn);

    let mut emitted = Vec::new();
    let conn = store.writer.lock().expect("store writer mutex poisoned");
    for (hex, last_seen) in stale {
        let rec = ContactRecord {
            hex: hex.clone(),
            callsign: None,
            t: now,
            lat: None,
            lon: None,
            alt_baro: None,
            alt_geom: None,
            ground_speed: None,
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
        let result = conn.execute(
            "INSERT OR IGNORE INTO flight_events (hex, t, kind, details) VALUES (?1,?2,?3,?4)",
            params![hex, now, EventKind::LostContact.as_str(), format!("last seen {last_seen}")],
        );
        match result {
            Ok(n) if n > 0 => {
                warn!("LOST_CONTACT for {hex} (last seen {last_seen})");
                emitted.push(FlightEvent {
                    hex: rec.hex,
                    t: now,
                    kind: EventKind::LostContact.as_str().to_string(),
                    lat: None,
                    lon: None,
                    alt: None,
                    squawk: None,
                    details: format!("last seen {last_seen}"),
                });
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to record LOST_CONTACT for {hex}: {e}"),
        }
    }
    Ok(emitted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn contact(hex: &str, t: i64, alt: Option<f64>, squawk: Option<&str>) -> ContactRecord {
        ContactRecord {
            hex: hex.to_string(),
            callsign: Some("TEST1".to_string()),
            t,
            lat: Some(55.5),
            lon: Some(-4.5),
            alt_baro: alt,
            alt_geom: None,
            ground_speed: Some(200.0),
            track: None,
            vert_rate: None,
            squawk: squawk.map(|s| s.to_string()),
            category: None,
            phase: Some("CRUISE".to_string()),
            airspace: None,
            airspace_zone_count: None,
            registration: None,
            icao_type: None,
            operator: None,
            raw: "{}".to_string(),
        }
    }

    #[test]
    fn emergency_squawk_emits_event_and_sets_summary() {
        let dir = tempdir().unwrap();
        let store = HistoricalStore::open(&dir.path().join("history.db")).unwrap();

        let rec = contact("ABC123", 1000, Some(3000.0), Some("7700"));
        let events = store.store_contact(&rec).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "EMERGENCY_SQUAWK");

        let found = store.events(Some("ABC123"), None, 24).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].squawk.as_deref(), Some("7700"));
    }

    #[test]
    fn takeoff_detected_after_altitude_climb() {
        let dir = tempdir().unwrap();
        let store = HistoricalStore::open(&dir.path().join("history.db")).unwrap();

        store.store_contact(&contact("DEF456", 0, Some(0.0), None)).unwrap();
        store.store_contact(&contact("DEF456", 10, Some(100.0), None)).unwrap();
        store.store_contact(&contact("DEF456", 20, Some(400.0), None)).unwrap();
        let events = store.store_contact(&contact("DEF456", 40, Some(1500.0), None)).unwrap();

        let takeoffs: Vec<_> = events.iter().filter(|e| e.kind == "TAKEOFF").collect();
        assert_eq!(takeoffs.len(), 1);
        assert_eq!(takeoffs[0].alt, Some(1500.0));

        let all_events = store.events(Some("DEF456"), Some("TAKEOFF"), 24).unwrap();
        assert_eq!(all_events.len(), 1);
    }

    #[test]
    fn summary_bounds_match_history() {
        let dir = tempdir().unwrap();
        let store = HistoricalStore::open(&dir.path().join("history.db")).unwrap();

        store.store_contact(&contact("GHI789", 100, Some(1000.0), None)).unwrap();
        store.store_contact(&contact("GHI789", 200, Some(2000.0), None)).unwrap();

        let summary = store.summary("GHI789").unwrap().unwrap();
        let history = store.history("GHI789", 24).unwrap();
        assert_eq!(summary.first_seen, history.iter().map(|c| c.t).min().unwrap());
        assert_eq!(summary.last_seen, history.iter().map(|c| c.t).max().unwrap());
        assert_eq!(summary.contact_count, 2);
    }

    #[test]
    fn cleanup_removes_old_contacts_and_orphan_summaries() {
        let dir = tempdir().unwrap();
        let store = HistoricalStore::open(&dir.path().join("history.db")).unwrap();

        let old_t = Utc::now().timestamp() - 40 * 86400;
        store.store_contact(&contact("JKL000", old_t, Some(1000.0), None)).unwrap();

        let removed = store.cleanup(30).unwrap();
        assert_eq!(removed, 1);
        assert!(store.summary("JKL000").unwrap().is_none());
    }
}
