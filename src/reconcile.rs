//! Turns the model's raw unit-type shares into the final unit mix.
//!
//! A historical project of the same grade and area always wins. Otherwise the
//! model's shares are normalized and passed through the grade's policy. When
//! the model gives nothing to normalize, the grade's historical mean mix is
//! used, and failing that a uniform mix.

use crate::policy::PolicyTable;
use crate::preprocess::{HistoricalRatioLookup, Shares, UNIFORM_SHARES};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatioSource {
    /// Exact grade/area match in the historical lookup.
    Historical,
    /// Normalized model output, policy-adjusted.
    Model,
    /// Model shares summed to zero.
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reconciled {
    pub shares: Shares,
    pub source: RatioSource,
}

/// Scales shares to sum to 1. Negative values count as zero; `None` when nothing is left.
pub fn normalize_shares(raw: Shares) -> Option<Shares> {
    let clipped = raw.map(|v| if v.is_finite() { v.max(0.0) } else { 0.0 });
    let sum: f64 = clipped.iter().sum();
    (sum > 0.0).then(|| clipped.map(|v| v / sum))
}

pub fn reconcile_shares(
    grade: &str,
    area_sqm: f64,
    raw: Shares,
    lookup: &HistoricalRatioLookup,
    policy: &PolicyTable,
) -> Reconciled {
    if let Some(shares) = lookup.get(grade, area_sqm) {
        log::debug!("Historical ratio hit for grade {grade:?} at {area_sqm} m²");
        return Reconciled {
            shares,
            source: RatioSource::Historical,
        };
    }

    let (shares, source) = match normalize_shares(raw) {
        Some(shares) => (shares, RatioSource::Model),
        None => {
            let fallback = match lookup.grade_mean(grade) {
                Some(mean) => mean,
                None => UNIFORM_SHARES,
            };
            log::debug!("Model shares sum to zero for grade {grade:?}; using {fallback:?}");
            (fallback, RatioSource::Fallback)
        }
    };

    let shares = match policy.for_grade(grade) {
        Some(p) => p.apply(shares),
        None => shares,
    };
    Reconciled { shares, source }
}

pub fn unit_counts(total_units: f64, shares: &Shares) -> [f64; 4] {
    shares.map(|s| total_units * s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ProjectRecord;

    fn record(grade: &str, area: f64, counts: [u32; 4]) -> ProjectRecord {
        ProjectRecord {
            project_name: "p".into(),
            province: "Bangkok".into(),
            grade: grade.into(),
            land_shape: "square".into(),
            project_area_sqm: area,
            saleable_area_sqm: area * 0.6,
            public_area_sqm: area * 0.4,
            green_area_sqm: area * 0.05,
            road_area_sqm: area * 0.25,
            townhome: counts[0],
            semi_detached: counts[1],
            detached: counts[2],
            commercial: counts[3],
            total_units: counts.iter().sum(),
            alley_count: 2,
            latitude: None,
            longitude: None,
        }
    }

    fn lookup() -> HistoricalRatioLookup {
        HistoricalRatioLookup::derive(
            &[record("PRIMO", 32_000.0, [60, 20, 20, 0]), record("ELITE", 10_000.0, [0, 0, 10, 0])],
            1.0,
        )
        .unwrap()
    }

    #[test]
    fn positive_shares_normalize_to_one() {
        for raw in [[0.2, 0.3, 0.1, 0.05], [5.0, 0.0, 0.0, 0.0], [1e-9, 2e-9, 3e-9, 4e-9]] {
            let s = normalize_shares(raw).unwrap();
            assert!((s.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn zero_sum_falls_back_without_panicking() {
        let policy = PolicyTable::default();
        let out = reconcile_shares("NONE", 1.0, [0.0; 4], &lookup(), &policy);
        assert_eq!(out.source, RatioSource::Fallback);
        assert_eq!(out.shares, UNIFORM_SHARES);

        let out = reconcile_shares("ELITE", 1.0, [0.0; 4], &lookup(), &policy);
        assert_eq!(out.shares, [0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn historical_hit_ignores_model_shares() {
        let policy = PolicyTable::from_toml_str("[grades.PRIMO]\nmax = { townhome = 0.1 }\n").unwrap();
        let out = reconcile_shares("PRIMO", 32_000.0, [0.0, 0.0, 0.0, 1.0], &lookup(), &policy);
        assert_eq!(out.source, RatioSource::Historical);
        assert_eq!(Some(out.shares), lookup().get("PRIMO", 32_000.0));
        assert!((out.shares[0] - 0.6).abs() < 1e-12);
    }

    #[test]
    fn missing_grade_policy_is_identity() {
        let policy = PolicyTable::default();
        let out = reconcile_shares("PRIMO", 5_000.0, [1.0, 1.0, 2.0, 0.0], &lookup(), &policy);
        assert_eq!(out.source, RatioSource::Model);
        assert_eq!(out.shares, [0.25, 0.25, 0.5, 0.0]);
    }

    #[test]
    fn reconciling_twice_gives_the_same_answer() {
        let policy = PolicyTable::from_toml_str("[grades.PRIMO]\nmin = { detached = 0.4 }\n").unwrap();
        let table = lookup();
        let a = reconcile_shares("PRIMO", 7_000.0, [0.5, 0.3, 0.1, 0.1], &table, &policy);
        let b = reconcile_shares("PRIMO", 7_000.0, [0.5, 0.3, 0.1, 0.1], &table, &policy);
        assert_eq!(a, b);
    }

    #[test]
    fn counts_follow_shares() {
        assert_eq!(unit_counts(200.0, &[0.5, 0.25, 0.25, 0.0]), [100.0, 50.0, 50.0, 0.0]);
    }
}
