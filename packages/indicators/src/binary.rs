//! Distance-to-access conversions.

use liveability_indicator_models::AccessibilityResult;
use liveability_region_models::DestinationCategory;

/// Hard access: `1` if the `count_cutoff`-th nearest feature is within the
/// cutoff, otherwise `0`.
///
/// `None` only for a category with no features in the region. A feature
/// beyond the index bound counts as no access.
#[must_use]
pub fn hard_access(result: &AccessibilityResult, category: &DestinationCategory) -> Option<f64> {
    if !result.is_available() {
        return None;
    }
    Some(match result.kth_nearest(category.count_cutoff) {
        Some(d) if d <= category.cutoff_m => 1.0,
        _ => 0.0,
    })
}

/// Soft access: logistic decay `1 / (1 + exp(k (d - t) / t))` of the
/// `count_cutoff`-th nearest distance `d` around the cutoff `t`.
///
/// Non-increasing in distance; `0` when nothing is within the index bound.
#[must_use]
pub fn soft_access(
    result: &AccessibilityResult,
    category: &DestinationCategory,
    slope: f64,
) -> Option<f64> {
    if !result.is_available() {
        return None;
    }
    let Some(d) = result.kth_nearest(category.count_cutoff) else {
        return Some(0.0);
    };
    let t = category.cutoff_m;
    Some(1.0 / (1.0 + (slope * (d - t) / t).exp()))
}

#[cfg(test)]
mod tests {
    use liveability_region_models::{DestinationDomain, InclusionRule};

    use super::*;

    fn category(cutoff_m: f64, count_cutoff: u32) -> DestinationCategory {
        DestinationCategory {
            name: "shop".to_string(),
            domain: DestinationDomain::Convenience,
            cutoff_m,
            count_cutoff,
            include: InclusionRule::All,
        }
    }

    fn reached(d: f64) -> AccessibilityResult {
        AccessibilityResult::Reached(vec![d])
    }

    #[test]
    fn hard_access_is_monotonic() {
        let cat = category(500.0, 1);
        assert_eq!(hard_access(&reached(100.0), &cat), Some(1.0));
        assert_eq!(hard_access(&reached(499.0), &cat), Some(1.0));
        assert_eq!(hard_access(&reached(500.0), &cat), Some(1.0));
        assert_eq!(hard_access(&reached(500.1), &cat), Some(0.0));
        assert_eq!(hard_access(&AccessibilityResult::Reached(vec![]), &cat), Some(0.0));
        assert_eq!(hard_access(&AccessibilityResult::Unavailable, &cat), None);
    }

    #[test]
    fn count_cutoff_uses_kth_nearest() {
        let cat = category(500.0, 2);
        let one_close = AccessibilityResult::Reached(vec![100.0, 700.0]);
        let two_close = AccessibilityResult::Reached(vec![100.0, 450.0]);
        let only_one = AccessibilityResult::Reached(vec![100.0]);

        assert_eq!(hard_access(&one_close, &cat), Some(0.0));
        assert_eq!(hard_access(&two_close, &cat), Some(1.0));
        assert_eq!(hard_access(&only_one, &cat), Some(0.0));
    }

    #[test]
    fn soft_access_decays_with_distance() {
        let cat = category(400.0, 1);
        let mut previous = f64::INFINITY;
        for d in [0.0, 100.0, 300.0, 400.0, 500.0, 800.0, 1_600.0] {
            let value = soft_access(&reached(d), &cat, 5.0).unwrap();
            assert!(value > 0.0 && value < 1.0);
            assert!(value <= previous);
            previous = value;
        }
        assert!((soft_access(&reached(400.0), &cat, 5.0).unwrap() - 0.5).abs() < 1e-12);
        assert_eq!(
            soft_access(&AccessibilityResult::Reached(vec![]), &cat, 5.0),
            Some(0.0)
        );
    }
}
