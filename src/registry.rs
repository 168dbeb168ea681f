//! C3: Aircraft Registry — static ICAO-hex to registration/type/operator
//! lookup, backed by `sled` and built once at startup.
//!
//! Grounded on the teacher's `ddb.rs` (a legacy in-memory glider/FLARM
//! device registry with the same read-only, keyed-lookup shape), with
//! the backing store swapped from a process-local `HashMap` to `sled`
//! so the registry can be built once and reused across process
//! restarts without re-parsing the source file every time — see
//! DESIGN.md for the substitution rationale.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub hex: String,
    pub registration: Option<String>,
    pub icao_type: Option<String>,
    pub manufacturer: Option<String>,
    pub operator: Option<String>,
    pub owner: Option<String>,
}

/// Read-only registry. `sled::Db` is cheaply cloneable and thread-safe,
/// so callers hold their own clone rather than sharing a pool.
#[derive(Clone)]
pub struct AircraftRegistry {
    by_hex: sled::Tree,
    by_registration: sled::Tree,
    by_type: sled::Tree,
}

fn encode(record: &RegistryRecord) -> Vec<u8> {
    bincode::serialize(record).expect("registry record encodes")
}

fn decode(bytes: &[u8]) -> Option<RegistryRecord> {
    bincode::deserialize(bytes).ok()
}

impl AircraftRegistry {
    /// Build (or reopen) the sled-backed registry at `db_path`, loading
    /// from `source_csv` only when the tree is empty — this spec does
    /// not require live registry updates, so re-ingestion is skipped
    /// once the database has been populated.
    pub fn open(db_path: &Path, source_csv: &Path) -> sled::Result<Self> {
        let db = sled::open(db_path)?;
        let by_hex = db.open_tree("by_hex")?;
        let by_registration = db.open_tree("by_registration")?;
        let by_type = db.open_tree("by_type")?;

        let registry = Self { by_hex, by_registration, by_type };
        if registry.by_hex.is_empty() {
            registry.load_csv(source_csv);
        }
        Ok(registry)
    }

    fn load_csv(&self, source_csv: &Path) {
        let content = match std::fs::read_to_string(source_csv) {
            Ok(c) => c,
            Err(e) => {
                warn!("Registry source {} unreadable: {}", source_csv.display(), e);
                return;
            }
        };

        let mut loaded = 0usize;
        for line in content.lines().skip(1) {
            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() < 5 {
                continue;
            }
            let hex = fields[0].trim().to_lowercase();
            if hex.is_empty() {
                continue;
            }
            let field = |s: &str| -> Option<String> {
                let t = s.trim();
                if t.is_empty() { None } else { Some(t.to_string()) }
            };
            let record = RegistryRecord {
                hex: hex.clone(),
                registration: field(fields[1]),
                icao_type: field(fields[2]),
                manufacturer: field(fields[3]),
                operator: field(fields[4]),
                owner: fields.get(5).and_then(|s| field(s)),
            };

            let _ = self.by_hex.insert(hex.as_bytes(), encode(&record));
            if let Some(reg) = &record.registration {
                let key = format!("{}:{}", reg.to_uppercase(), hex);
                let _ = self.by_registration.insert(key.as_bytes(), encode(&record));
            }
            if let Some(t) = &record.icao_type {
                let key = format!("{}:{}", t.to_uppercase(), hex);
                let _ = self.by_type.insert(key.as_bytes(), encode(&record));
            }
            loaded += 1;
        }
        let _ = self.by_hex.flush();
        let _ = self.by_registration.flush();
        let _ = self.by_type.flush();
        info!("Loaded {loaded} aircraft registry records from {}", source_csv.display());
    }

    /// Direct lookup. Returns `None` (not an error) when absent, per
    /// the spec's "absent records return not found without error".
    pub fn get(&self, hex: &str) -> Option<RegistryRecord> {
        let key = hex.trim().to_lowercase();
        self.by_hex.get(key.as_bytes()).ok().flatten().and_then(|v| decode(&v))
    }

    pub fn search_registration(&self, prefix: &str) -> Vec<RegistryRecord> {
        let prefix = prefix.trim().to_uppercase();
        self.by_registration
            .scan_prefix(prefix.as_bytes())
            .filter_map(|entry| entry.ok())
            .filter_map(|(_, v)| decode(&v))
            .collect()
    }

    pub fn search_type(&self, type_code: &str) -> Vec<RegistryRecord> {
        let prefix = type_code.trim().to_uppercase();
        self.by_type
            .scan_prefix(prefix.as_bytes())
            .filter_map(|entry| entry.ok())
            .filter_map(|(_, v)| decode(&v))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_hex.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hex.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn loads_and_looks_up_by_hex() {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("registry.csv");
        let mut f = std::fs::File::create(&csv_path).unwrap();
        writeln!(f, "hex,registration,icao_type,manufacturer,operator,owner").unwrap();
        writeln!(f, "ABC123,N12345,B738,Boeing,Acme Air,John Doe").unwrap();
        drop(f);

        let registry = AircraftRegistry::open(&dir.path().join("registry.sled"), &csv_path).unwrap();
        assert_eq!(registry.len(), 1);

        let rec = registry.get("abc123").unwrap();
        assert_eq!(rec.registration.as_deref(), Some("N12345"));

        assert!(registry.get("zzzzzz").is_none());

        let by_reg = registry.search_registration("N123");
        assert_eq!(by_reg.len(), 1);

        let by_type = registry.search_type("B738");
        assert_eq!(by_type.len(), 1);
    }
}
