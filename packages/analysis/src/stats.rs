//! Small numeric helpers shared by the analysis stages.

/// Arithmetic mean, or `None` for an empty slice.
#[must_use]
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    Some(values.iter().sum::<f64>() / n)
}

/// The `q`-th percentile (`0..=100`) with linear interpolation between the
/// two closest ranks. `None` for an empty slice.
///
/// Non-decreasing in `q`, and exact between equal neighbours.
#[must_use]
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    #[allow(clippy::cast_precision_loss)]
    let rank = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let lower = rank.floor() as usize;
    let upper = (lower + 1).min(sorted.len() - 1);

    #[allow(clippy::cast_precision_loss)]
    let fraction = rank - lower as f64;
    Some((sorted[upper] - sorted[lower]).mul_add(fraction, sorted[lower]))
}

/// Rounds to `decimals` places.
#[must_use]
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

/// Least-squares fit of `ys` against their positions `0, 1, 2, ...`.
///
/// Returns `(slope, r)` where `r` is the Pearson correlation coefficient,
/// taken as 0 when either series has no variance. `None` with fewer than
/// two values.
#[must_use]
pub fn linear_regression(ys: &[f64]) -> Option<(f64, f64)> {
    if ys.len() < 2 {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let xs: Vec<f64> = (0..ys.len()).map(|x| x as f64).collect();
    let mean_x = mean(&xs)?;
    let mean_y = mean(ys)?;

    let mut ss_x = 0.0;
    let mut ss_y = 0.0;
    let mut ss_xy = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        ss_x += dx * dx;
        ss_y += dy * dy;
        ss_xy += dx * dy;
    }

    let slope = ss_xy / ss_x;
    let r = if ss_x == 0.0 || ss_y == 0.0 {
        0.0
    } else {
        (ss_xy / (ss_x * ss_y).sqrt()).clamp(-1.0, 1.0)
    };
    Some((slope, r))
}
