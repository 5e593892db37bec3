//! Thai land-area units.
//!
//! Areas are carried internally in square meters. The form and the display
//! use square wah, and unit density is expressed per rai.

pub const SQM_PER_WAH: f64 = 4.0;
pub const SQM_PER_RAI: f64 = 1600.0;

pub fn wah_to_sqm(wah: f64) -> f64 {
    wah * SQM_PER_WAH
}

pub fn sqm_to_wah(sqm: f64) -> f64 {
    sqm / SQM_PER_WAH
}

pub fn sqm_to_rai(sqm: f64) -> f64 {
    sqm / SQM_PER_RAI
}
