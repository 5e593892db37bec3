// Derived tables and training rows built from the historical project records.
use std::collections::BTreeMap;

use crate::encoder::PredictionInput;
use crate::error::LayoutError;
use crate::io::ProjectRecord;
use crate::units;

/// Fallback plot sizes in square wah for grades with no usable history:
/// townhome, semi-detached, detached.
pub const DEFAULT_PLOT_SIZE_WAH: [f64; 3] = [38.3, 53.19, 62.44];
pub const DEFAULT_UNITS_PER_ALLEY: f64 = 12.0;
pub const DEFAULT_ROAD_SHARE_OF_PUBLIC: f64 = 0.6;

/// Townhome, semi-detached, detached, commercial.
pub type Shares = [f64; 4];

pub const UNIFORM_SHARES: Shares = [0.25; 4];

/// House types a layout is broken down into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitType {
    Townhome,
    SemiDetached,
    Detached,
    Commercial,
}

impl UnitType {
    pub const ALL: [UnitType; 4] = [
        UnitType::Townhome,
        UnitType::SemiDetached,
        UnitType::Detached,
        UnitType::Commercial,
    ];
    /// The types that have a plot size.
    pub const RESIDENTIAL: [UnitType; 3] =
        [UnitType::Townhome, UnitType::SemiDetached, UnitType::Detached];

    pub fn index(self) -> usize {
        match self {
            UnitType::Townhome => 0,
            UnitType::SemiDetached => 1,
            UnitType::Detached => 2,
            UnitType::Commercial => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            UnitType::Townhome => "townhome",
            UnitType::SemiDetached => "semi-detached",
            UnitType::Detached => "detached",
            UnitType::Commercial => "commercial",
        }
    }

    pub fn count(self, r: &ProjectRecord) -> u32 {
        match self {
            UnitType::Townhome => r.townhome,
            UnitType::SemiDetached => r.semi_detached,
            UnitType::Detached => r.detached,
            UnitType::Commercial => r.commercial,
        }
    }
}

fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values
        .into_iter()
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// Plot size (m²) of one unit of `kind` in a record: the type's share of the
/// saleable area divided by its unit count. `None` when the record has no
/// units of that type.
pub fn plot_size(r: &ProjectRecord, kind: UnitType) -> Option<f64> {
    let count = kind.count(r);
    if count == 0 {
        return None;
    }
    let total = r.total_units.max(1) as f64;
    let share = count as f64 / total;
    Some(r.saleable_area_sqm * share / count as f64)
}

/// Per-grade mean plot size (m²) for each residential unit type.
#[derive(Debug, Clone, Default)]
pub struct GradeAverages {
    sizes: BTreeMap<String, [Option<f64>; 3]>,
}

impl GradeAverages {
    pub fn derive(records: &[ProjectRecord]) -> Self {
        let mut by_grade: BTreeMap<&str, Vec<&ProjectRecord>> = BTreeMap::new();
        for r in records {
            by_grade.entry(r.grade.as_str()).or_default().push(r);
        }

        let sizes = by_grade
            .into_iter()
            .map(|(grade, members)| {
                let per_type = UnitType::RESIDENTIAL
                    .map(|kind| mean(members.iter().filter_map(|r| plot_size(r, kind))));
                (grade.to_string(), per_type)
            })
            .collect();
        Self { sizes }
    }

    /// Mean plot size in m², or `None` when no record of the grade has units of that type.
    pub fn plot_size(&self, grade: &str, kind: UnitType) -> Option<f64> {
        if kind == UnitType::Commercial {
            return None;
        }
        self.sizes.get(grade).and_then(|s| s[kind.index()])
    }
}

/// Normalized 4-type unit mix of a record, `None` when it has no typed units.
fn record_shares(r: &ProjectRecord) -> Option<Shares> {
    let counts = UnitType::ALL.map(|kind| kind.count(r) as f64);
    let sum: f64 = counts.iter().sum();
    (sum > 0.0).then(|| counts.map(|c| c / sum))
}

fn mean_shares<'a>(shares: impl IntoIterator<Item = &'a Shares>) -> Option<Shares> {
    let mut acc = [0.0; 4];
    let mut n = 0usize;
    for s in shares {
        for (a, v) in acc.iter_mut().zip(s) {
            *a += v;
        }
        n += 1;
    }
    let sum: f64 = acc.iter().sum();
    (n > 0 && sum > 0.0).then(|| acc.map(|a| a / sum))
}

/// Historical unit mixes keyed by grade and project area bucket.
#[derive(Debug, Clone)]
pub struct HistoricalRatioLookup {
    bucket_sqm: f64,
    entries: BTreeMap<(String, i64), Shares>,
    grade_means: BTreeMap<String, Shares>,
}

impl HistoricalRatioLookup {
    /// `bucket_sqm` is the width of an area bucket; 1.0 matches on the area rounded to the meter.
    pub fn derive(records: &[ProjectRecord], bucket_sqm: f64) -> Result<Self, LayoutError> {
        if !(bucket_sqm.is_finite() && bucket_sqm > 0.0) {
            return Err(LayoutError::InvalidInput(format!(
                "lookup bucket must be a positive area, got {bucket_sqm}"
            )));
        }

        let mut by_key: BTreeMap<(String, i64), Vec<Shares>> = BTreeMap::new();
        let mut by_grade: BTreeMap<String, Vec<Shares>> = BTreeMap::new();
        for r in records {
            let Some(shares) = record_shares(r) else {
                continue;
            };
            let key = (r.grade.clone(), bucket_key(r.project_area_sqm, bucket_sqm));
            by_key.entry(key).or_default().push(shares);
            by_grade.entry(r.grade.clone()).or_default().push(shares);
        }

        let entries = by_key
            .into_iter()
            .filter_map(|(k, v)| mean_shares(&v).map(|s| (k, s)))
            .collect();
        let grade_means = by_grade
            .into_iter()
            .filter_map(|(k, v)| mean_shares(&v).map(|s| (k, s)))
            .collect();

        Ok(Self {
            bucket_sqm,
            entries,
            grade_means,
        })
    }

    pub fn get(&self, grade: &str, area_sqm: f64) -> Option<Shares> {
        self.entries
            .get(&(grade.to_string(), bucket_key(area_sqm, self.bucket_sqm)))
            .copied()
    }

    /// Mean unit mix over every record of the grade.
    pub fn grade_mean(&self, grade: &str) -> Option<Shares> {
        self.grade_means.get(grade).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

fn bucket_key(area_sqm: f64, bucket_sqm: f64) -> i64 {
    (area_sqm / bucket_sqm).round() as i64
}

/// Every table derived once from the loaded records and shared read-only by predictions.
#[derive(Debug, Clone)]
pub struct HistoricalTables {
    pub averages: GradeAverages,
    pub lookup: HistoricalRatioLookup,
    units_per_alley: BTreeMap<String, f64>,
    road_share_of_public: Option<f64>,
}

impl HistoricalTables {
    pub fn derive(records: &[ProjectRecord], bucket_sqm: f64) -> Result<Self, LayoutError> {
        let averages = GradeAverages::derive(records);
        let lookup = HistoricalRatioLookup::derive(records, bucket_sqm)?;

        let mut alleys: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for r in records.iter().filter(|r| r.alley_count > 0) {
            alleys
                .entry(r.grade.clone())
                .or_default()
                .push(r.total_units as f64 / r.alley_count as f64);
        }
        let units_per_alley = alleys
            .into_iter()
            .filter_map(|(g, v)| mean(v).map(|m| (g, m)))
            .collect();

        let road_share_of_public = mean(
            records
                .iter()
                .filter(|r| r.public_area_sqm > 0.0)
                .map(|r| r.road_area_sqm / r.public_area_sqm),
        );

        log::info!(
            "Derived tables: {} grades, {} ratio lookup entries, road/public ratio {:?}",
            averages.sizes.len(),
            lookup.len(),
            road_share_of_public
        );

        Ok(Self {
            averages,
            lookup,
            units_per_alley,
            road_share_of_public,
        })
    }

    /// Mean units served by one alley for the grade.
    pub fn units_per_alley(&self, grade: &str) -> Option<f64> {
        self.units_per_alley.get(grade).copied()
    }

    /// Mean road area as a fraction of public area across all records.
    pub fn road_share_of_public(&self) -> Option<f64> {
        self.road_share_of_public
    }
}

/// Number of regression outputs, in the order of [`targets`].
pub const N_TARGETS: usize = 8;

/// A project as seen by the regression model: its inputs and the eight targets.
#[derive(Debug, Clone)]
pub struct TrainingRow {
    pub input: PredictionInput,
    pub targets: [f64; N_TARGETS],
}

/// Targets for one record: public, saleable and green area ratios, units per
/// rai, then the four unit-type shares of the total unit count.
pub fn targets(r: &ProjectRecord) -> Option<[f64; N_TARGETS]> {
    if r.project_area_sqm <= 0.0 {
        return None;
    }
    let area = r.project_area_sqm;
    let total = r.total_units.max(1) as f64;
    let [th, f, d, c] = UnitType::ALL.map(|kind| kind.count(r) as f64 / total);
    Some([
        r.public_area_sqm / area,
        r.saleable_area_sqm / area,
        r.green_area_sqm / area,
        r.total_units as f64 / units::sqm_to_rai(area),
        th,
        f,
        d,
        c,
    ])
}

pub fn training_rows(records: &[ProjectRecord]) -> Vec<TrainingRow> {
    records
        .iter()
        .filter_map(|r| match targets(r) {
            Some(targets) => Some(TrainingRow {
                input: PredictionInput::from_record(r),
                targets,
            }),
            None => {
                log::warn!(
                    "Excluding project {:?} from training: non-positive project area",
                    r.project_name
                );
                None
            }
        })
        .collect()
}
