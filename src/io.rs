// Module for loading and validating the historical project dataset. It reads the csv file,
// checks the header against the expected schema, and skips rows it cannot use.
use std::fs::File;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Deserialize;

use crate::error::LayoutError;

mod count_format {
    use serde::{self, Deserialize, Deserializer};

    /// Unit counts come out of spreadsheets as "12", "12.0" or an empty cell.
    pub fn deserialize<'de, D>(d: D) -> Result<u32, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(d)?;
        let s = s.trim();
        if s.is_empty() {
            return Ok(0);
        }
        let v: f64 = s.parse().map_err(serde::de::Error::custom)?;
        if !v.is_finite() || v < 0.0 {
            return Err(serde::de::Error::custom(format!("invalid unit count: {s}")));
        }
        Ok(v.round() as u32)
    }
}

/// Canonical column name, accepted header aliases, and whether the column is required.
const COLUMNS: &[(&str, &[&str], bool)] = &[
    ("project_name", &["ชื่อโครงการ"], true),
    ("province", &["จังหวัด"], true),
    ("grade", &["เกรดโครงการ"], true),
    ("land_shape", &["รูปร่างที่ดิน"], true),
    ("project_area_sqm", &["พื้นที่โครงการ(ตรม)"], true),
    ("saleable_area_sqm", &["พื้นที่จัดจำหน่าย(ตรม)"], true),
    ("public_area_sqm", &["พื้นที่สาธารณะ(ตรม)"], true),
    ("green_area_sqm", &["พื้นที่สวน(ตรม)"], true),
    ("road_area_sqm", &["พื้นที่ถนน(ตรม)"], true),
    ("townhome", &["ทาวโฮม", "ทาวน์โฮม"], true),
    ("semi_detached", &["บ้านแฝด"], true),
    ("detached", &["บ้านเดี่ยว"], true),
    ("commercial", &["อาคารพาณิชย์"], true),
    ("total_units", &["จำนวนหลัง"], true),
    ("alley_count", &["จำนวนซอย"], true),
    ("latitude", &["lat", "ละติจูด"], false),
    ("longitude", &["lon", "lng", "ลองจิจูด"], false),
];

/// One historical development project.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectRecord {
    pub project_name: String,
    pub province: String,
    pub grade: String,
    pub land_shape: String,
    pub project_area_sqm: f64,
    pub saleable_area_sqm: f64,
    pub public_area_sqm: f64,
    pub green_area_sqm: f64,
    pub road_area_sqm: f64,
    #[serde(deserialize_with = "count_format::deserialize")]
    pub townhome: u32,
    #[serde(deserialize_with = "count_format::deserialize")]
    pub semi_detached: u32,
    #[serde(deserialize_with = "count_format::deserialize")]
    pub detached: u32,
    #[serde(deserialize_with = "count_format::deserialize")]
    pub commercial: u32,
    #[serde(deserialize_with = "count_format::deserialize")]
    pub total_units: u32,
    #[serde(deserialize_with = "count_format::deserialize")]
    pub alley_count: u32,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

impl ProjectRecord {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }
}

/// Maps a raw header cell to its canonical column name, if it is one we know.
fn canonical_column(raw: &str) -> Option<&'static str> {
    let raw = raw.trim();
    COLUMNS
        .iter()
        .find(|(name, aliases, _)| *name == raw || aliases.contains(&raw))
        .map(|(name, _, _)| *name)
}

/// Rewrites the header row to canonical names, failing on any missing required column.
fn validate_headers(raw: &StringRecord) -> Result<StringRecord, LayoutError> {
    let canonical: StringRecord = raw
        .iter()
        .map(|h| -> &str {
            match canonical_column(h) {
                Some(name) => name,
                None => h.trim(),
            }
        })
        .collect();

    let missing: Vec<String> = COLUMNS
        .iter()
        .filter(|(name, _, required)| *required && !canonical.iter().any(|h| h == *name))
        .map(|(name, _, _)| (*name).to_string())
        .collect();

    if missing.is_empty() {
        Ok(canonical)
    } else {
        Err(LayoutError::MissingColumns { missing })
    }
}

pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<ProjectRecord>, LayoutError> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut rdr = ReaderBuilder::new()
        .delimiter(b',')
        .flexible(true)
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(file);

    let headers = validate_headers(rdr.headers()?)?;
    let expected_len = headers.len();

    let mut out = Vec::new();
    let mut skipped = 0usize;
    for result in rdr.records() {
        let raw: StringRecord = match result {
            Ok(raw) => raw,
            Err(e) if matches!(e.kind(), csv::ErrorKind::Io(_)) => return Err(e.into()),
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                log::warn!("Skipping unreadable record at line {line}: {e}");
                skipped += 1;
                continue;
            }
        };
        let line = raw.position().map(|p| p.line()).unwrap_or(0);

        if raw.iter().all(|f| f.trim().is_empty()) {
            continue;
        }

        if raw.len() != expected_len {
            log::warn!(
                "Skipping line {line}: expected {expected_len} fields, found {}",
                raw.len()
            );
            skipped += 1;
            continue;
        }

        match raw.deserialize::<ProjectRecord>(Some(&headers)) {
            Ok(rec) => out.push(rec),
            Err(e) => {
                log::warn!("Skipping malformed record at line {line}: {e}");
                skipped += 1;
            }
        }
    }

    log::info!(
        "Loaded {} project records from {} ({skipped} skipped)",
        out.len(),
        path.display()
    );

    if out.is_empty() {
        return Err(LayoutError::EmptyDataset);
    }
    Ok(out)
}
