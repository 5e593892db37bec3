//! Grade policy: floors and ceilings on the unit mix of a grade.
//!
//! Policies are read from TOML:
//!
//! ```toml
//! [grades.PRIMO]
//! min = { townhome = 0.5 }
//! max = { commercial = 0.05 }
//! ```
//!
//! A grade without an entry is left as the model predicted it.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::LayoutError;
use crate::preprocess::{Shares, UnitType};

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ShareBounds {
    pub townhome: Option<f64>,
    pub semi_detached: Option<f64>,
    pub detached: Option<f64>,
    pub commercial: Option<f64>,
}

impl ShareBounds {
    pub fn get(&self, kind: UnitType) -> Option<f64> {
        match kind {
            UnitType::Townhome => self.townhome,
            UnitType::SemiDetached => self.semi_detached,
            UnitType::Detached => self.detached,
            UnitType::Commercial => self.commercial,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GradePolicy {
    #[serde(default)]
    pub min: ShareBounds,
    #[serde(default)]
    pub max: ShareBounds,
}

/// Smallest x in `[0, upper]` with `f(x) >= target`, for a non-decreasing `f`
/// that already reaches the target at `upper`.
fn bisect(f: impl Fn(f64) -> f64, upper: f64, target: f64) -> f64 {
    let (mut a, mut b) = (0.0, upper);
    for _ in 0..2048 {
        let mid = 0.5 * (a + b);
        if mid <= a || mid >= b {
            break;
        }
        if f(mid) < target {
            a = mid;
        } else {
            b = mid;
        }
    }
    b
}

impl GradePolicy {
    /// Projects the shares into the bounds: each type becomes
    /// `clamp(scale * share, min, max)` with one common scale chosen so the
    /// result sums to 1. Mass the predicted types cannot absorb goes evenly
    /// to the types predicted at zero. Bounds that cannot be met together
    /// leave the shares unchanged.
    pub fn apply(&self, shares: Shares) -> Shares {
        let bound = |b: &ShareBounds, k: UnitType| b.get(k).filter(|v| v.is_finite());
        let lo = UnitType::ALL.map(|k| bound(&self.min, k).unwrap_or(0.0).clamp(0.0, 1.0));
        let hi = UnitType::ALL.map(|k| bound(&self.max, k).unwrap_or(1.0).clamp(0.0, 1.0));
        if let Some(k) = UnitType::ALL.into_iter().find(|k| hi[k.index()] < lo[k.index()]) {
            log::warn!(
                "Grade policy max {} for {} is below its min {}; ignoring the policy",
                hi[k.index()],
                k.label(),
                lo[k.index()]
            );
            return shares;
        }
        if lo.iter().sum::<f64>() > 1.0 + 1e-12 || hi.iter().sum::<f64>() < 1.0 - 1e-12 {
            log::warn!("Grade policy bounds {lo:?}..{hi:?} are infeasible; ignoring them");
            return shares;
        }

        let w = shares.map(|v| if v.is_finite() { v.max(0.0) } else { 0.0 });
        let fill = |scale: f64, idx: &[usize], weights: &Shares| -> f64 {
            idx.iter().map(|&i| (scale * weights[i]).clamp(lo[i], hi[i])).sum()
        };

        let positive: Vec<usize> = (0..4).filter(|&i| w[i] > 0.0).collect();
        let zero: Vec<usize> = (0..4).filter(|&i| w[i] <= 0.0).collect();
        let zero_floor: f64 = zero.iter().map(|&i| lo[i]).sum();

        let mut out = lo;
        // highest scale that still changes a positive type
        let saturate = positive.iter().map(|&i| hi[i] / w[i]).fold(0.0, f64::max).min(f64::MAX);
        if fill(saturate, &positive, &w) + zero_floor >= 1.0 {
            let scale = bisect(|s| fill(s, &positive, &w), saturate, 1.0 - zero_floor);
            for &i in &positive {
                out[i] = (scale * w[i]).clamp(lo[i], hi[i]);
            }
        } else {
            for &i in &positive {
                out[i] = hi[i];
            }
            let left = 1.0 - positive.iter().map(|&i| hi[i]).sum::<f64>();
            let even = [1.0; 4];
            let level = bisect(|s| fill(s, &zero, &even), 1.0, left);
            for &i in &zero {
                out[i] = level.clamp(lo[i], hi[i]);
            }
        }
        out
    }
}

/// Policies keyed by grade.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PolicyTable {
    #[serde(default)]
    grades: BTreeMap<String, GradePolicy>,
}

impl PolicyTable {
    pub fn from_toml_str(s: &str) -> Result<Self, LayoutError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, LayoutError> {
        let table = Self::from_toml_str(&fs::read_to_string(path.as_ref())?)?;
        log::info!(
            "Loaded grade policy for {} grade(s) from {}",
            table.grades.len(),
            path.as_ref().display()
        );
        Ok(table)
    }

    pub fn for_grade(&self, grade: &str) -> Option<&GradePolicy> {
        self.grades.get(grade)
    }
}
