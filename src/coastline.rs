//! Coastline feature server — `/api/coastline` in spec.md §6's interface
//! table. Loaded once from a static C15_COAST-format file and filtered
//! by radius per request; unlike C7's feeds this has no upstream to poll
//! and no TTL, so it's a plain read-only index in the shape of C1.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::ais::haversine_nm;

#[derive(Debug, Clone, Serialize)]
pub struct CoastlinePoint {
    pub lat: f64,
    pub lon: f64,
    pub feature_type: &'static str,
    pub distance_nm: f64,
}

static COORD_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(-?\d+\.\d+)\+(-?\d+\.\d+)$").unwrap());

pub struct CoastlineIndex {
    points: Vec<(f64, f64)>,
}

impl CoastlineIndex {
    /// Parse a C15_COAST-format file: `;`/`$`/`{` prefixed lines are
    /// comments, directives, or region overrides and are skipped;
    /// coordinate lines are `lat+lon`. A missing file yields an empty,
    /// still-usable index — coastline data is decorative, not load-bearing.
    pub fn load(path: &Path) -> Self {
        let mut points = Vec::new();
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!("Coastline file {} unreadable ({e}); serving an empty coastline layer", path.display());
                return Self { points };
            }
        };

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('$') || line.starts_with('{') {
                continue;
            }
            match COORD_LINE.captures(line) {
                Some(caps) => {
                    let lat: f64 = caps[1].parse().unwrap_or(f64::NAN);
                    let lon: f64 = caps[2].parse().unwrap_or(f64::NAN);
                    if lat.is_finite() && lon.is_finite() {
                        points.push((lat, lon));
                    }
                }
                None => warn!("Skipping malformed coastline line: {line}"),
            }
        }

        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Points within `radius_nm` of `(lat, lon)`, nearest first.
    pub fn within_radius(&self, lat: f64, lon: f64, radius_nm: f64) -> Vec<CoastlinePoint> {
        let mut hits: Vec<CoastlinePoint> = self
            .points
            .iter()
            .filter_map(|&(plat, plon)| {
                let distance = haversine_nm(lat, lon, plat, plon);
                (distance <= radius_nm).then_some(CoastlinePoint { lat: plat, lon: plon, feature_type: "coastline", distance_nm: distance })
            })
            .collect();
        hits.sort_by(|a, b| a.distance_nm.partial_cmp(&b.distance_nm).unwrap_or(std::cmp::Ordering::Equal));
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn parses_coordinate_lines_and_skips_directives() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("coast.out");
        let mut f = fs::File::create(&path).unwrap();
        writeln!(f, "; comment").unwrap();
        writeln!(f, "$REGION=N_EUROPE").unwrap();
        writeln!(f, "{{override}}").unwrap();
        writeln!(f, "55.5000+-4.5000").unwrap();
        writeln!(f, "70.0000+10.0000").unwrap();
        drop(f);

        let index = CoastlineIndex::load(&path);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn filters_and_sorts_by_distance() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("coast.out");
        let mut f = fs::File::create(&path).unwrap();
        writeln!(f, "55.1000+-4.0000").unwrap();
        writeln!(f, "55.0100+-4.0000").unwrap();
        writeln!(f, "70.0000+10.0000").unwrap();
        drop(f);

        let index = CoastlineIndex::load(&path);
        let hits = index.within_radius(55.0, -4.0, 50.0);
        assert_eq!(hits.len(), 2);
        assert!(hits[0].distance_nm <= hits[1].distance_nm);
    }

    #[test]
    fn missing_file_yields_empty_index() {
        let index = CoastlineIndex::load(Path::new("/nonexistent/coast.out"));
        assert!(index.is_empty());
    }
}
