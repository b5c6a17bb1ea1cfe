//! Gaussian kernel densities and the within/between crossover search.

use log::debug;

/// Linear-interpolated quantile (the usual "type 7" definition) of sorted data.
fn quantile(sorted: &[f64], p: f64) -> f64 {
    let h = (sorted.len() - 1) as f64 * p;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

fn standard_deviation(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
}

/// Silverman's rule of thumb, `0.9 · min(sd, IQR/1.34) · n^(-1/5)`.
///
/// Falls back to the standard deviation, then to the magnitude of the first
/// value, then to 1, when the spread estimate is zero. Needs two values.
pub fn silverman_bandwidth(values: &[f64]) -> f64 {
    assert!(values.len() >= 2, "bandwidth needs at least two values");
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let sd = standard_deviation(values);
    let iqr = quantile(&sorted, 0.75) - quantile(&sorted, 0.25);
    let mut spread = sd.min(iqr / 1.34);
    if spread <= 0.0 {
        spread = if sd > 0.0 {
            sd
        } else if values[0] != 0.0 {
            values[0].abs()
        } else {
            1.0
        };
    }
    0.9 * spread * (values.len() as f64).powf(-0.2)
}

/// `points` equally spaced values from 0 to `max`, both ends included.
pub fn grid(max: f64, points: usize) -> Vec<f64> {
    let step = max / (points - 1) as f64;
    (0..points).map(|i| i as f64 * step).collect()
}

/// Gaussian kernel density of `values` evaluated on `grid`.
pub fn gaussian_density(values: &[f64], bandwidth: f64, grid: &[f64]) -> Vec<f64> {
    let norm = 1.0 / (values.len() as f64 * bandwidth * (2.0 * std::f64::consts::PI).sqrt());
    grid.iter()
        .map(|&x| {
            values
                .iter()
                .map(|&v| {
                    let z = (x - v) / bandwidth;
                    (-0.5 * z * z).exp()
                })
                .sum::<f64>()
                * norm
        })
        .collect()
}

/// First grid point over `[0, max distance]` at which the within-group
/// density drops below the between-group density.
///
/// `None` when either side has fewer than two distances, when all distances
/// are identical, or when the within density never drops below the between
/// density after having been at or above it.
pub fn crossover_threshold(within: &[f64], between: &[f64], points: usize) -> Option<f64> {
    if within.len() < 2 || between.len() < 2 || points < 2 {
        return None;
    }
    let first = within[0];
    if within.iter().chain(between).all(|&d| d == first) {
        debug!("All replicate distances equal {}; no crossover", first);
        return None;
    }
    let max = within.iter().chain(between).cloned().fold(0.0, f64::max);
    if max <= 0.0 {
        return None;
    }

    let grid = grid(max, points);
    let (within_density, between_density) = rayon::join(
        || gaussian_density(within, silverman_bandwidth(within), &grid),
        || gaussian_density(between, silverman_bandwidth(between), &grid),
    );

    (1..grid.len())
        .find(|&i| {
            within_density[i - 1] >= between_density[i - 1] && within_density[i] < between_density[i]
        })
        .map(|i| grid[i])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bandwidth_matches_rule_of_thumb() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        // sd = 1.5811, IQR = 2 → 2/1.34 = 1.4925 is smaller
        let expected = 0.9 * (2.0 / 1.34) * 5f64.powf(-0.2);
        assert!((silverman_bandwidth(&values) - expected).abs() < 1e-12);
    }

    #[test]
    fn bandwidth_falls_back_when_spread_is_zero() {
        let values = [2.0, 2.0, 2.0, 2.0, 10.0];
        // IQR is zero, so the standard deviation is used.
        let sd = standard_deviation(&values);
        let expected = 0.9 * sd * 5f64.powf(-0.2);
        assert!((silverman_bandwidth(&values) - expected).abs() < 1e-12);

        let constant = [3.0, 3.0];
        assert!((silverman_bandwidth(&constant) - 0.9 * 3.0 * 2f64.powf(-0.2)).abs() < 1e-12);
    }

    #[test]
    fn density_integrates_to_about_one() {
        let values = [0.0, 0.5, 1.0];
        let bw = silverman_bandwidth(&values);
        let points: Vec<f64> = (0..4001).map(|i| -5.0 + i as f64 * 0.0025).collect();
        let density = gaussian_density(&values, bw, &points);
        let area: f64 = density.iter().sum::<f64>() * 0.0025;
        assert!((area - 1.0).abs() < 1e-3);
    }

    #[test]
    fn crossover_sits_between_the_two_modes() {
        let within = [0.05, 0.1, 0.12, 0.08, 0.15, 0.11, 0.09, 0.13];
        let between = [0.9, 1.0, 1.1, 0.95, 1.05, 0.85, 1.2, 0.8, 1.15, 0.99];
        let threshold = crossover_threshold(&within, &between, 512).unwrap();
        assert!(threshold > 0.15 && threshold < 0.8, "threshold {}", threshold);
    }

    #[test]
    fn identical_distances_have_no_crossover() {
        assert_eq!(crossover_threshold(&[0.5, 0.5, 0.5], &[0.5, 0.5], 512), None);
        assert_eq!(crossover_threshold(&[0.0, 0.0], &[0.0, 0.0, 0.0], 512), None);
    }

    #[test]
    fn too_few_distances_have_no_crossover() {
        assert_eq!(crossover_threshold(&[0.1], &[0.9, 1.0, 1.1], 512), None);
        assert_eq!(crossover_threshold(&[0.1, 0.2], &[1.0], 512), None);
    }

    #[test]
    fn within_never_above_between_has_no_crossover() {
        // Replicates look less alike than non-replicates everywhere.
        let within = [0.9, 1.0, 1.1, 1.05];
        let between = [0.05, 0.1, 0.12, 0.08];
        assert_eq!(crossover_threshold(&within, &between, 512), None);
    }
}
