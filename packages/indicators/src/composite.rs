//! Composite formulas over one point's component values.

use liveability_config::CompositeFormula;

use crate::normalize::z_score;

/// Combines a point's component values.
///
/// Any null component makes the composite null. `Sum` and `Max` read raw
/// access values; `SumOfZScores` and `PenalizedMean` read normalized
/// values.
#[must_use]
pub fn combine(formula: CompositeFormula, components: &[Option<f64>]) -> Option<f64> {
    let values = components.iter().copied().collect::<Option<Vec<f64>>>()?;
    if values.is_empty() {
        return None;
    }

    match formula {
        CompositeFormula::Sum => Some(values.iter().sum()),
        CompositeFormula::Max => values.iter().copied().reduce(f64::max),
        CompositeFormula::SumOfZScores => Some(values.iter().map(|v| z_score(*v)).sum()),
        CompositeFormula::PenalizedMean => penalized_mean(&values),
    }
}

/// Mean minus a dispersion penalty: `mean - sd² / mean`, where `sd` is the
/// population standard deviation across the components.
///
/// Two points with the same mean score lower the more unevenly their
/// components are distributed. Undefined for a zero mean.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn penalized_mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if mean.abs() < f64::EPSILON {
        return None;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some(mean - variance / mean)
}
