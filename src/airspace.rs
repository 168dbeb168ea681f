//! C1: Airspace Index — polygon point-in-region lookups over a loaded
//! corpus of control zones, TMAs, ATZs, danger areas, etc.
//!
//! Grounded on `hut8-soar`'s `airspace.rs` (airspace type taxonomy) and
//! restored to an in-memory, file-corpus-backed index per the spec
//! (the teacher keeps its airspace data in Postgres/PostGIS, which is
//! out of scope for this narrower core — see DESIGN.md).

use geo::{Coord, Contains, LineString, Point, Polygon};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Airspace type classes, priority-ordered per spec.md §4.1 (`classify`
/// ordering: CTR > CTA/TMA > ATZ > MATZ > everything else).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AirspaceKind {
    Ctr,
    Cta,
    Tma,
    Atz,
    Matz,
    DangerArea,
    Fir,
    Lars,
    Aara,
    Aiaa,
    Mta,
    Ata,
    Atsda,
    Airway,
    Other,
}

impl AirspaceKind {
    /// Lower rank = higher priority in `classify`'s result ordering.
    fn priority_rank(self) -> u8 {
        match self {
            AirspaceKind::Ctr => 0,
            AirspaceKind::Cta | AirspaceKind::Tma => 1,
            AirspaceKind::Atz => 2,
            AirspaceKind::Matz => 3,
            _ => 4,
        }
    }

    /// Map a `$TYPE=<int>` directive code to a kind, per the restored
    /// `original_source/airspace_parser.py` type-code table. Unknown
    /// codes fall back to `Other` rather than failing the file load.
    fn from_type_code(code: u32) -> Self {
        match code {
            6 | 7 => AirspaceKind::Cta,
            8 => AirspaceKind::Atz,
            9 => AirspaceKind::Tma,
            10 => AirspaceKind::Ctr,
            11 => AirspaceKind::DangerArea,
            12 => AirspaceKind::Fir,
            17 => AirspaceKind::Lars,
            18 => AirspaceKind::Matz,
            20 => AirspaceKind::Aara,
            21 => AirspaceKind::Aiaa,
            22 => AirspaceKind::Mta,
            23 => AirspaceKind::Ata,
            24 => AirspaceKind::Atsda,
            _ => AirspaceKind::Other,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AirspaceZone {
    pub id: String,
    pub name: String,
    pub kind: AirspaceKind,
    #[serde(skip)]
    pub polygon: Polygon<f64>,
    pub altitude_min: Option<i32>,
    pub altitude_max: Option<i32>,
    pub description: String,
}

impl AirspaceZone {
    fn contains(&self, lat: f64, lon: f64) -> bool {
        self.polygon.contains(&Point::new(lon, lat))
    }
}

/// Signed area of a ring (shoelace formula); zero means the points are
/// colinear (or the ring is degenerate) and must be rejected.
fn signed_area(points: &[(f64, f64)]) -> f64 {
    let n = points.len();
    let mut area = 0.0;
    for i in 0..n {
        let (x0, y0) = points[i];
        let (x1, y1) = points[(i + 1) % n];
        area += x0 * y1 - x1 * y0;
    }
    area / 2.0
}

/// Build a valid, simply-wound polygon from raw (lon, lat) points,
/// repairing self-intersection the way `shapely`'s `buffer(0)` would in
/// the original: normalize winding order, and when the ring still
/// self-intersects under a simple O(n^2) segment-crossing check, fall
/// back to the convex hull. Documented simplification — see DESIGN.md.
fn repair_ring(points: Vec<(f64, f64)>) -> Option<Polygon<f64>> {
    if points.len() < 3 {
        return None;
    }
    let area = signed_area(&points);
    if area.abs() < f64::EPSILON {
        return None;
    }

    let mut pts = points;
    if area < 0.0 {
        pts.reverse();
    }

    if is_simple(&pts) {
        let mut closed = pts.clone();
        closed.push(closed[0]);
        let ring: Vec<Coord<f64>> = closed.into_iter().map(|(lon, lat)| Coord { x: lon, y: lat }).collect();
        return Some(Polygon::new(LineString::new(ring), vec![]));
    }

    let hull = convex_hull(&pts);
    if hull.len() < 3 {
        return None;
    }
    let mut closed = hull;
    closed.push(closed[0]);
    let ring: Vec<Coord<f64>> = closed.into_iter().map(|(lon, lat)| Coord { x: lon, y: lat }).collect();
    Some(Polygon::new(LineString::new(ring), vec![]))
}

fn segments_intersect(a: (f64, f64), b: (f64, f64), c: (f64, f64), d: (f64, f64)) -> bool {
    fn cross(o: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
        (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
    }
    let d1 = cross(c, d, a);
    let d2 = cross(c, d, b);
    let d3 = cross(a, b, c);
    let d4 = cross(a, b, d);
    ((d1 > 0.0) != (d2 > 0.0)) && ((d3 > 0.0) != (d4 > 0.0))
}

fn is_simple(points: &[(f64, f64)]) -> bool {
    let n = points.len();
    if n < 4 {
        return true;
    }
    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        for j in (i + 1)..n {
            // Skip edges adjacent to edge (i, i+1)
            if j == i || (j + 1) % n == i || j == (i + 1) % n {
                continue;
            }
            let c = points[j];
            let d = points[(j + 1) % n];
            if segments_intersect(a, b, c, d) {
                return false;
            }
        }
    }
    true
}

fn convex_hull(points: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let mut pts = points.to_vec();
    pts.sort_by(|a, b| a.partial_cmp(b).unwrap());
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }

    fn cross(o: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
        (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
    }

    let mut lower: Vec<(f64, f64)> = Vec::new();
    for &p in &pts {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }

    let mut upper: Vec<(f64, f64)> = Vec::new();
    for &p in pts.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }

    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Parse one airspace descriptor file into zero or more zones.
///
/// Grammar (restored from `original_source/airspace_parser.py`):
/// `;`-comment, `$KEY=VALUE` directive (only `$TYPE=<int>` consumed),
/// `{name}` zone-name override, bare `-1` ring-end marker, otherwise a
/// `<lat>+<lon>` coordinate line.
fn parse_file(path: &Path) -> Vec<AirspaceZone> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read airspace file {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    let filename = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut type_code: u32 = 0;
    let mut zone_name: Option<String> = None;
    let mut blocks: Vec<Vec<(f64, f64)>> = Vec::new();
    let mut current: Vec<(f64, f64)> = Vec::new();

    for raw_line in content.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }
        if let Some(rest) = line.strip_prefix('$') {
            if let Some((key, value)) = rest.split_once('=') {
                if key.eq_ignore_ascii_case("TYPE") {
                    type_code = value.trim().parse().unwrap_or(0);
                }
            }
            continue;
        }
        if let Some(name) = line.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            zone_name = Some(name.to_string());
            continue;
        }
        if line == "-1" {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
            continue;
        }
        if let Some((lat_s, lon_s)) = line.split_once('+') {
            if let (Ok(lat), Ok(lon)) = (lat_s.parse::<f64>(), lon_s.parse::<f64>()) {
                current.push((lon, lat));
            }
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }

    let kind = AirspaceKind::from_type_code(type_code);
    let base_name = zone_name.unwrap_or_else(|| filename.replace('_', " "));
    let description = describe(&filename, kind);

    let multi = blocks.len() > 1;
    let mut zones = Vec::new();
    for (i, block) in blocks.into_iter().enumerate() {
        let n = block.len();
        match repair_ring(block) {
            Some(polygon) => {
                let id = if multi {
                    format!("{base_name}_{}", i + 1)
                } else {
                    base_name.clone()
                };
                zones.push(AirspaceZone {
                    id: id.clone(),
                    name: id,
                    kind,
                    polygon,
                    altitude_min: None,
                    altitude_max: None,
                    description: description.clone(),
                });
            }
            None => warn!(
                "Skipping invalid ring ({} points) in {}",
                n,
                path.display()
            ),
        }
    }
    zones
}

fn describe(filename: &str, kind: AirspaceKind) -> String {
    let upper = filename.to_uppercase();
    let table: &[(&str, &str)] = &[
        ("CTR", "Control Zone - Controlled airspace around an airport"),
        ("CTA", "Control Area - Controlled airspace en-route"),
        ("TMA", "Terminal Control Area - Controlled airspace around major airports"),
        ("ATZ", "Aerodrome Traffic Zone - Airspace around smaller airports"),
        ("MATZ", "Military Aerodrome Traffic Zone"),
        ("DA", "Danger Area - Hazardous activities"),
        ("AIAA", "Area of Intense Aerial Activity"),
        ("AARA", "Air-to-Air Refuelling Area"),
        ("MTA", "Military Training Area"),
        ("ATA", "Aerial Tactics Area"),
        ("LARS", "Lower Airspace Radar Service"),
        ("FIR", "Flight Information Region"),
    ];
    for (key, desc) in table {
        if upper.contains(key) {
            return desc.to_string();
        }
    }
    format!("{kind:?} airspace")
}

#[derive(Debug, Serialize)]
pub struct AirspaceView {
    pub zones: Vec<AirspaceZone>,
    pub summary_by_type: HashMap<String, usize>,
}

/// Read-only, loaded-once index over the airspace corpus.
pub struct AirspaceIndex {
    zones: Vec<AirspaceZone>,
}

impl AirspaceIndex {
    /// Load every descriptor file in `dir`. Malformed files are logged
    /// and skipped; the load never aborts (spec.md §4.1 failure semantics).
    pub fn load(dir: &Path) -> Self {
        let mut zones = Vec::new();
        let entries = match fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) => {
                warn!("Airspace directory {} unreadable: {}", dir.display(), e);
                return Self { zones };
            }
        };

        let mut paths: Vec<_> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
        paths.sort();

        for path in paths {
            if path.is_file() {
                zones.extend(parse_file(&path));
            }
        }
        Self { zones }
    }

    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    /// Priority-first classification: zones are returned in declaration
    /// order within each priority tier; if the highest tier present at
    /// this point has any hits, lower tiers are not searched.
    pub fn classify(&self, lat: f64, lon: f64) -> Vec<&AirspaceZone> {
        let mut by_rank: HashMap<u8, Vec<&AirspaceZone>> = HashMap::new();
        for zone in &self.zones {
            if zone.contains(lat, lon) {
                by_rank.entry(zone.kind.priority_rank()).or_default().push(zone);
            }
        }
        for rank in 0..=4u8 {
            if let Some(hits) = by_rank.get(&rank) {
                if !hits.is_empty() {
                    return hits.clone();
                }
            }
        }
        Vec::new()
    }

    /// Zones whose boundary lies within `radius_nm` of `(lat, lon)`,
    /// using the coarse `1 deg ~= 60 nm` approximation the spec mandates
    /// for this call (distinct from the haversine calls elsewhere).
    pub fn zones_within(&self, lat: f64, lon: f64, radius_nm: f64) -> Vec<&AirspaceZone> {
        let radius_deg = radius_nm / 60.0;
        self.zones
            .iter()
            .filter(|z| {
                z.polygon
                    .exterior()
                    .coords()
                    .any(|c| ((c.x - lon).powi(2) + (c.y - lat).powi(2)).sqrt() <= radius_deg)
            })
            .collect()
    }

    pub fn export_view(&self, lat: f64, lon: f64, radius_nm: f64) -> AirspaceView {
        let zones: Vec<AirspaceZone> = self
            .zones_within(lat, lon, radius_nm)
            .into_iter()
            .cloned()
            .collect();
        let mut summary_by_type: HashMap<String, usize> = HashMap::new();
        for z in &zones {
            *summary_by_type.entry(format!("{:?}", z.kind)).or_insert(0) += 1;
        }
        AirspaceView { zones, summary_by_type }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_file(dir: &Path, name: &str, contents: &str) {
        let mut f = fs::File::create(dir.join(name)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn classifies_point_inside_ctr() {
        let dir = tempdir().unwrap();
        write_file(
            dir.path(),
            "UK_CTR_TEST.out",
            "$TYPE=10\n{Test CTR}\n55.0+-5.0\n55.0+-4.0\n56.0+-4.0\n56.0+-5.0\n-1\n",
        );
        let index = AirspaceIndex::load(dir.path());
        assert_eq!(index.zone_count(), 1);

        let hits = index.classify(55.5, -4.5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].kind, AirspaceKind::Ctr);

        let miss = index.classify(60.0, 0.0);
        assert!(miss.is_empty());
    }

    #[test]
    fn rejects_colinear_triangle() {
        let dir = tempdir().unwrap();
        write_file(
            dir.path(),
            "UK_DA_TEST.out",
            "$TYPE=11\n0.0+0.0\n1.0+1.0\n2.0+2.0\n-1\n",
        );
        let index = AirspaceIndex::load(dir.path());
        assert_eq!(index.zone_count(), 0);
    }

    #[test]
    fn ctr_priority_wins_over_danger_area() {
        let dir = tempdir().unwrap();
        write_file(
            dir.path(),
            "UK_CTR_A.out",
            "$TYPE=10\n{CTR A}\n0.0+0.0\n0.0+2.0\n2.0+2.0\n2.0+0.0\n-1\n",
        );
        write_file(
            dir.path(),
            "UK_DA_A.out",
            "$TYPE=11\n{DA A}\n0.5+0.5\n0.5+1.5\n1.5+1.5\n1.5+0.5\n-1\n",
        );
        let index = AirspaceIndex::load(dir.path());
        let hits = index.classify(1.0, 1.0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].kind, AirspaceKind::Ctr);
    }
}
