//! C2: SSR Classifier — squawk code catalog, range expansion, and
//! keyword-derived category/priority/alert tagging.
//!
//! Keyword lists and priority order restored verbatim from
//! `original_source/ssr_code_parser.py` to resolve the spec's informal
//! "keyword matching" description into an exact, ordered ruleset.

use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Category {
    Emergency,
    Sar,
    Medical,
    Police,
    Nato,
    Military,
    SpecialOps,
    Conspicuity,
    Transit,
    Approach,
    Monitoring,
    Unreliable,
}

impl Category {
    fn priority(self) -> Priority {
        match self {
            Category::Emergency => Priority::Critical,
            Category::Sar | Category::Medical | Category::Police | Category::Nato => Priority::High,
            Category::Military | Category::SpecialOps => Priority::Medium,
            _ => Priority::Low,
        }
    }
}

/// Ordered (first match wins per spec's keyword-priority rule, though
/// all matching categories are retained — only the emitted `priority`
/// takes the max) keyword table, transcribed from the Python reference.
static KEYWORD_TABLE: LazyLock<Vec<(Category, Vec<&'static str>)>> = LazyLock::new(|| {
    vec![
        (Category::Emergency, vec!["EMERGENCY", "HI-JACKING", "RADIO FAILURE", "MAYDAY", "PAN-PAN"]),
        (Category::Sar, vec!["SAR", "SEARCH AND RESCUE", "AIR AMBULANCE", "HELICOPTER EMERGENCY MEDIVAC", "HEMS", "MEDIVAC"]),
        (Category::Medical, vec!["AMBULANCE", "MEDIVAC", "MEDICAL", "HEMS"]),
        (Category::Police, vec!["POLICE", "ASU", "AIR SUPPORT"]),
        (Category::Nato, vec!["NATO", "CAOC", "EXERCISES", "AEW AIRCRAFT", "QUICK REACTION"]),
        (Category::Military, vec!["RAF", "RNAS", "MILITARY", "MOD", "SPECIAL TASKS", "ROYAL FLIGHTS"]),
        (Category::SpecialOps, vec!["SPECIAL", "PARADROPPING", "ANTENNA TRAILING", "TARGET TOWING", "HIGH-ENERGY MANOEUVRES", "RED ARROWS", "AEROBATICS", "DISPLAY"]),
        (Category::Conspicuity, vec!["CONSPICUITY"]),
        (Category::Transit, vec!["TRANSIT", "ORCAM"]),
        (Category::Approach, vec!["APPROACH"]),
        (Category::Monitoring, vec!["MONITORING"]),
        (Category::Unreliable, vec!["UNRELIABLE"]),
    ]
});

const ALERT_SUBTYPES: &[&str] = &["SPECIAL TASKS", "ROYAL FLIGHTS"];

static CATALOG_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{4})([-.]?\d*)\.?\s+(.+)$").unwrap());

#[derive(Debug, Clone, Serialize)]
pub struct SsrCode {
    pub code: String,
    pub description: String,
    pub categories: HashSet<Category>,
    pub priority: Priority,
    pub alert: bool,
}

pub struct SsrClassifier {
    codes: HashMap<String, SsrCode>,
}

fn categorize(description: &str) -> (HashSet<Category>, bool) {
    let upper = description.to_uppercase();
    let mut categories = HashSet::new();
    let mut alert = false;

    for (category, keywords) in KEYWORD_TABLE.iter() {
        for kw in keywords {
            if upper.contains(kw) {
                categories.insert(*category);
                if matches!(
                    category,
                    Category::Emergency | Category::Sar | Category::Medical | Category::Police | Category::Nato | Category::SpecialOps
                ) {
                    alert = true;
                }
                if *category == Category::Military && ALERT_SUBTYPES.iter().any(|s| upper.contains(s)) {
                    alert = true;
                }
                break;
            }
        }
    }
    (categories, alert)
}

fn build_record(code: &str, description: &str) -> SsrCode {
    let (categories, mut alert) = categorize(description);
    let priority = categories
        .iter()
        .map(|c| c.priority())
        .max()
        .unwrap_or(Priority::Low);

    let (priority, alert) = if matches!(code, "7500" | "7600" | "7700") {
        alert = true;
        (Priority::Critical, alert)
    } else {
        (priority, alert)
    };

    SsrCode {
        code: code.to_string(),
        description: description.to_string(),
        categories,
        priority,
        alert,
    }
}

impl SsrClassifier {
    /// Load the flat squawk catalog. Lines failing the catalog grammar
    /// are logged and skipped; the load never aborts.
    pub fn load(path: &Path) -> Self {
        let mut codes = HashMap::new();
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!("SSR catalog {} unreadable: {}", path.display(), e);
                return Self { codes };
            }
        };

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }
            let Some(caps) = CATALOG_LINE.captures(line) else {
                warn!("Skipping malformed SSR catalog line: {line}");
                continue;
            };
            let start: u32 = match caps[1].parse() {
                Ok(v) => v,
                Err(_) => continue,
            };
            let end_raw = caps[2].trim_start_matches(['-', '.']);
            let end: u32 = if end_raw.is_empty() {
                start
            } else {
                end_raw.parse().unwrap_or(start)
            };
            let description = caps[3].trim().to_string();

            let (lo, hi) = if start <= end { (start, end) } else { (end, start) };
            for code in lo..=hi {
                let code_str = format!("{code:04}");
                codes.insert(code_str.clone(), build_record(&code_str, &description));
            }
        }

        Self { codes }
    }

    /// Look up a code, always forcing CRITICAL/alert for the emergency
    /// triad even if absent from the catalog (spec.md boundary behavior).
    pub fn lookup(&self, code: &str) -> SsrCode {
        let normalized = format!("{:0>4}", code.trim());
        if let Some(existing) = self.codes.get(&normalized) {
            return existing.clone();
        }
        build_record(&normalized, "")
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn all(&self) -> Vec<SsrCode> {
        self.codes.values().cloned().collect()
    }

    /// Codes tagged with a category whose `Debug` name matches `category`
    /// case-insensitively, mirroring the priority-name matching already
    /// used for `/api/notams`'s `priority` filter.
    pub fn by_category(&self, category: &str) -> Vec<SsrCode> {
        self.codes
            .values()
            .filter(|c| c.categories.iter().any(|cat| format!("{cat:?}").eq_ignore_ascii_case(category)))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn range_expands_inclusive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ssr.txt");
        let mut f = fs::File::create(&path).unwrap();
        writeln!(f, "0100-0102. TRANSIT - LONDON").unwrap();
        drop(f);

        let classifier = SsrClassifier::load(&path);
        assert_eq!(classifier.len(), 3);
        let rec = classifier.lookup("0101");
        assert!(rec.description.contains("TRANSIT"));
        assert!(rec.categories.contains(&Category::Transit));
    }

    #[test]
    fn emergency_triad_always_critical() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ssr.txt");
        fs::File::create(&path).unwrap();
        let classifier = SsrClassifier::load(&path);
        let rec = classifier.lookup("7700");
        assert_eq!(rec.priority, Priority::Critical);
        assert!(rec.alert);
    }

    #[test]
    fn military_subtype_forces_alert() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ssr.txt");
        let mut f = fs::File::create(&path).unwrap();
        writeln!(f, "0200 MILITARY - SPECIAL TASKS").unwrap();
        drop(f);

        let classifier = SsrClassifier::load(&path);
        let rec = classifier.lookup("0200");
        assert!(rec.categories.contains(&Category::Military));
        assert!(rec.alert);
    }
}
