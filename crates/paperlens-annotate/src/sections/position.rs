//! Positional priors.
//!
//! For every label and position bin, `P(label | bin)` is
//! `(prior * curve[bin] + 1e-10) / (sum over labels of prior * curve[bin] + 1e-10)`.

use crate::sections::reference::SectionReference;

const EPSILON: f64 = 1e-10;

#[derive(Debug, Clone)]
pub struct PositionModel {
    /// Indexed `[label][bin]`, in reference label order.
    conditional: Vec<Vec<f64>>,
    bins: usize,
}

impl PositionModel {
    pub fn new(reference: &SectionReference) -> Self {
        let bins = reference.bins();
        let mut norm = vec![0f64; bins];
        let joint: Vec<Vec<f64>> = reference
            .labels
            .iter()
            .map(|def| def.position_curve.iter().map(|p| def.prior * p).collect())
            .collect();
        for row in &joint {
            for (z, p) in norm.iter_mut().zip(row) {
                *z += p;
            }
        }

        let conditional = joint
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .zip(&norm)
                    .map(|(p, z)| (p + EPSILON) / (z + EPSILON))
                    .collect()
            })
            .collect();
        Self { conditional, bins }
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Half-open bin range covered by a section spanning normalized
    /// positions `[start, end]`. An empty range falls back to the start
    /// bin, clamped to the last bin.
    pub fn bin_range(&self, start: f64, end: f64) -> (usize, usize) {
        let scale = |p: f64| (self.bins as f64 * p.clamp(0.0, 1.0)).floor() as usize;
        let (lo, hi) = (scale(start), scale(end).min(self.bins));
        if hi > lo {
            (lo, hi)
        } else {
            let lo = lo.min(self.bins.saturating_sub(1));
            (lo, lo + 1)
        }
    }

    pub fn conditional(&self, label: usize, bin: usize) -> f64 {
        self.conditional[label][bin]
    }

    /// Median of `P(label | bin)` over the bins a section spans.
    pub fn median_likelihood(&self, label: usize, start: f64, end: f64) -> f64 {
        let (lo, hi) = self.bin_range(start, end);
        median(&self.conditional[label][lo..hi])
    }
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    match n {
        0 => 0.0,
        _ if n % 2 == 1 => sorted[n / 2],
        _ => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sections::reference::LabelDefinition;

    fn two_labels() -> SectionReference {
        let def = |label: &str, prior: f64, curve: Vec<f64>| LabelDefinition {
            label: label.to_string(),
            keywords: vec![label.to_string()],
            prior,
            position_curve: curve,
        };
        SectionReference {
            labels: vec![
                def("front", 0.5, vec![0.8, 0.2, 0.0, 0.0]),
                def("back", 0.5, vec![0.0, 0.2, 0.4, 0.4]),
            ],
        }
    }

    #[test]
    fn test_conditionals_sum_to_one_per_bin() {
        let model = PositionModel::new(&SectionReference::default());
        for bin in 0..model.bins() {
            let total: f64 = (0..8).map(|l| model.conditional(l, bin)).sum();
            assert!((total - 1.0).abs() < 1e-6, "bin {} sums to {}", bin, total);
        }
    }

    #[test]
    fn test_zero_mass_stays_finite() {
        let model = PositionModel::new(&two_labels());
        assert!(model.conditional(1, 0) < 1e-9);
        assert!((model.conditional(0, 0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_bin_range() {
        let model = PositionModel::new(&two_labels());
        assert_eq!(model.bin_range(0.0, 0.5), (0, 2));
        assert_eq!(model.bin_range(0.3, 0.3), (1, 2));
        assert_eq!(model.bin_range(0.6, 1.0), (2, 4));
        assert_eq!(model.bin_range(1.0, 1.0), (3, 4));
        assert_eq!(model.bin_range(0.0, 0.0), (0, 1));
    }

    #[test]
    fn test_median_likelihood() {
        let model = PositionModel::new(&two_labels());
        // bins 0..4 for "front": [1.0, 0.5, ~0, ~0] -> median of middle pair
        let m = model.median_likelihood(0, 0.0, 1.0);
        assert!((m - 0.25).abs() < 1e-6);
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
    }
}
