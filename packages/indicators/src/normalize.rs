//! Run-relative z-score normalization.

use crate::clean::Moments;

/// Mean of the normalized scale.
pub const NORMALIZED_MEAN: f64 = 100.0;

/// One standard deviation on the normalized scale.
pub const NORMALIZED_SD: f64 = 10.0;

/// Rescales values to `100 + 10 z` using the sample mean and standard
/// deviation of the non-null values.
///
/// With fewer than two values or no spread, every non-null value maps to
/// `100`. Nulls stay null.
#[must_use]
pub fn normalize(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let Some(m) = Moments::of(values) else {
        return values.to_vec();
    };
    let spread = m.count >= 2 && m.sd > 0.0;

    values
        .iter()
        .map(|value| {
            value.map(|x| {
                if spread {
                    NORMALIZED_SD.mul_add((x - m.mean) / m.sd, NORMALIZED_MEAN)
                } else {
                    NORMALIZED_MEAN
                }
            })
        })
        .collect()
}

/// Z-score recovered from a normalized value.
#[must_use]
pub fn z_score(normalized: f64) -> f64 {
    (normalized - NORMALIZED_MEAN) / NORMALIZED_SD
}
