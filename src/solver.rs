// Unit counts whose combined plot footprint matches a target saleable area.
use crate::preprocess::{GradeAverages, UnitType, DEFAULT_PLOT_SIZE_WAH};
use crate::units;

/// Starting guess for townhome, semi-detached and detached counts.
pub const DEFAULT_START: [f64; 3] = [80.0, 25.0, 40.0];

#[derive(Debug, Clone, PartialEq)]
pub struct BalanceParams {
    pub start: [f64; 3],
    pub max_iter: usize,
    /// Residual (m²) at which the search stops as converged.
    pub tolerance: f64,
    pub min_step: f64,
}

impl Default for BalanceParams {
    fn default() -> Self {
        Self {
            start: DEFAULT_START,
            max_iter: 10_000,
            tolerance: 1e-6,
            min_step: 1e-9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalancedUnits {
    pub townhome: u64,
    pub semi_detached: u64,
    pub detached: u64,
    /// |footprint - target| in m² after rounding.
    pub residual_sqm: f64,
    pub converged: bool,
}

/// Footprint in m² of the given counts with plot sizes in square wah.
fn footprint_sqm(counts: &[f64; 3], sizes_wah: &[f64; 3]) -> f64 {
    let wah: f64 = counts.iter().zip(sizes_wah).map(|(c, s)| c * s).sum();
    units::wah_to_sqm(wah)
}

/// Finds non-negative counts minimizing |footprint - target| with a compass
/// search projected onto the non-negative orthant, then rounds them. The best
/// point found is returned even when the search does not converge.
pub fn balance_units_by_area(target_sqm: f64, sizes_wah: [f64; 3], params: &BalanceParams) -> BalancedUnits {
    let objective = |x: &[f64; 3]| (footprint_sqm(x, &sizes_wah) - target_sqm).abs();

    let mut best = params.start.map(|v| v.max(0.0));
    let mut best_f = objective(&best);
    let mut step = 1.0;
    let mut converged = best_f <= params.tolerance;

    for _ in 0..params.max_iter {
        if converged {
            break;
        }
        let mut improved = false;
        'axes: for axis in 0..3 {
            for dir in [1.0, -1.0] {
                let mut candidate = best;
                candidate[axis] = (candidate[axis] + dir * step).max(0.0);
                let f = objective(&candidate);
                if f < best_f {
                    best = candidate;
                    best_f = f;
                    improved = true;
                    break 'axes;
                }
            }
        }

        if improved {
            step *= 2.0;
        } else {
            step *= 0.5;
            if step < params.min_step {
                break;
            }
        }
        converged = best_f <= params.tolerance;
    }

    if !converged {
        log::warn!(
            "Area balancing stopped {best_f:.3} m² from target {target_sqm:.1} m²; using best counts found"
        );
    }

    let rounded = best.map(f64::round);
    BalancedUnits {
        townhome: rounded[0] as u64,
        semi_detached: rounded[1] as u64,
        detached: rounded[2] as u64,
        residual_sqm: objective(&rounded),
        converged,
    }
}

/// Balances against the grade's historical plot sizes, falling back to the
/// default size for any type the grade has no history for.
pub fn balance_for_grade(target_sqm: f64, grade: &str, averages: &GradeAverages) -> BalancedUnits {
    let sizes_wah = UnitType::RESIDENTIAL.map(|kind| match averages.plot_size(grade, kind) {
        Some(sqm) => units::sqm_to_wah(sqm),
        None => {
            log::debug!("No {} plot size for grade {grade:?}; using default", kind.label());
            DEFAULT_PLOT_SIZE_WAH[kind.index()]
        }
    });
    balance_units_by_area(target_sqm, sizes_wah, &BalanceParams::default())
}
