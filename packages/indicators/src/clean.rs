//! Sample moments and the outlier-bounding transform.

/// Mean, sample standard deviation and range of the non-null values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Moments {
    pub count: usize,
    pub mean: f64,
    /// Sample (n - 1) standard deviation; `0` for fewer than two values.
    pub sd: f64,
    pub min: f64,
    pub max: f64,
}

impl Moments {
    /// Moments of the non-null values, `None` when all are null.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn of(values: &[Option<f64>]) -> Option<Self> {
        let present = values.iter().flatten().copied().collect::<Vec<_>>();
        if present.is_empty() {
            return None;
        }
        let n = present.len() as f64;
        let mean = present.iter().sum::<f64>() / n;
        let sd = if present.len() < 2 {
            0.0
        } else {
            (present.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        };

        Some(Self {
            count: present.len(),
            mean,
            sd,
            min: present.iter().copied().fold(f64::INFINITY, f64::min),
            max: present.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

/// Compresses values beyond two standard deviations of the mean.
///
/// With `ll = mean - 2sd`, `ul = mean + 2sd` and `c = sd`: when the minimum
/// lies below `ll - c`, values under `ll` are rescaled linearly from
/// `[min, ll]` onto `[ll - c, ll]`; symmetrically above `ul`. Everything
/// else is unchanged, and rank order is preserved. Nulls stay null.
#[must_use]
pub fn clean_outliers(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let Some(m) = Moments::of(values) else {
        return values.to_vec();
    };
    if m.sd <= 0.0 {
        return values.to_vec();
    }

    let c = m.sd;
    let ll = 2.0f64.mul_add(-m.sd, m.mean);
    let ul = 2.0f64.mul_add(m.sd, m.mean);
    let compress_low = m.min < ll - c;
    let compress_high = m.max > ul + c;

    values
        .iter()
        .map(|value| {
            value.map(|x| {
                if compress_low && x < ll {
                    ll - c + c * (x - m.min) / (ll - m.min)
                } else if compress_high && x > ul {
                    ul + c * (x - ul) / (m.max - ul)
                } else {
                    x
                }
            })
        })
        .collect()
}
