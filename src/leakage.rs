//! Tag-switching correction.
//!
//! A MOTU leaks into unrelated reactions in proportion to its total
//! abundance. The correction removes the same flat amount,
//! `ceil(total × rate / reactions)`, from every reaction of that MOTU. The
//! rate itself is chosen by a person looking at a sweep over candidate rates
//! on the PCR-negative controls.

use crate::dataset::Dataset;
use crate::error::Result;
use crate::reaction::{Reaction, ReactionType, RowRecord};
use log::{info, warn};
use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;
use serde::Serialize;

/// Ceiling that ignores rounding noise just above an integer.
fn ceil_tolerant(value: f64) -> f64 {
    (value - 1e-9).ceil().max(0.0)
}

/// Reads removed from every reaction, one entry per MOTU.
pub fn deductions(motu_totals: &Array1<f64>, rate: f64, n_reactions: usize) -> Array1<f64> {
    if n_reactions == 0 {
        return Array1::zeros(motu_totals.len());
    }
    let values: Vec<f64> = motu_totals
        .to_vec()
        .into_par_iter()
        .map(|total| ceil_tolerant(total * rate / n_reactions as f64))
        .collect();
    Array1::from(values)
}

fn subtract_clamped(rows: &mut Array2<f64>, deduction: &Array1<f64>) {
    for mut row in rows.axis_iter_mut(Axis(0)) {
        row.zip_mut_with(deduction, |cell, &d| *cell = (*cell - d).max(0.0));
    }
}

/// Control statistics after simulating one candidate rate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepRow {
    pub rate: f64,
    pub n_controls: usize,
    pub total_reads: f64,
    pub mean_reads: f64,
    pub max_reads: f64,
    pub mean_richness: f64,
    pub max_richness: usize,
    /// Controls that still hold at least one read.
    pub positive_controls: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeakageSweep {
    pub rows: Vec<SweepRow>,
}

impl LeakageSweep {
    /// Smallest candidate that brings the mean reads per control down to
    /// `tolerance`. Advisory only.
    pub fn suggest(&self, tolerance: f64) -> Option<f64> {
        self.rows
            .iter()
            .find(|row| row.n_controls > 0 && row.mean_reads <= tolerance)
            .map(|row| row.rate)
    }
}

/// Simulate each candidate rate on the PCR-negative controls.
///
/// The deduction is computed from the whole matrix, as it would be when the
/// rate is applied, but only the controls are summarised.
pub fn sweep(dataset: &Dataset<Reaction>, candidates: &[f64]) -> LeakageSweep {
    let control_idx: Vec<usize> = dataset
        .rows()
        .iter()
        .enumerate()
        .filter(|(_, r)| r.kind == ReactionType::PcrNeg)
        .map(|(i, _)| i)
        .collect();
    if control_idx.is_empty() {
        warn!("No PCR-negative controls; the leakage sweep has nothing to measure");
    }

    let controls = dataset.counts().select(Axis(0), &control_idx);
    let totals = dataset.motu_totals();
    let n_controls = control_idx.len();

    let rows = candidates
        .iter()
        .map(|&rate| {
            let mut simulated = controls.clone();
            subtract_clamped(&mut simulated, &deductions(&totals, rate, dataset.n_rows()));

            let reads = simulated.sum_axis(Axis(1));
            let richness: Vec<usize> = simulated
                .axis_iter(Axis(0))
                .map(|row| row.iter().filter(|&&v| v > 0.0).count())
                .collect();
            let total_reads = reads.sum();
            let denominator = n_controls.max(1) as f64;

            SweepRow {
                rate,
                n_controls,
                total_reads,
                mean_reads: total_reads / denominator,
                max_reads: reads.iter().cloned().fold(0.0, f64::max),
                mean_richness: richness.iter().sum::<usize>() as f64 / denominator,
                max_richness: richness.iter().copied().max().unwrap_or(0),
                positive_controls: reads.iter().filter(|&&r| r > 0.0).count(),
            }
        })
        .collect::<Vec<_>>();

    for row in &rows {
        info!(
            "Leak rate {:.4}: {:.0} control reads (mean {:.1}, max {:.0}), mean richness {:.2}, {}/{} controls positive",
            row.rate, row.total_reads, row.mean_reads, row.max_reads, row.mean_richness, row.positive_controls, row.n_controls
        );
    }

    LeakageSweep { rows }
}

/// Remove the flat per-MOTU deduction from every reaction.
pub fn apply<R: RowRecord>(dataset: &Dataset<R>, rate: f64) -> Result<Dataset<R>> {
    let deduction = deductions(&dataset.motu_totals(), rate, dataset.n_rows());
    let mut counts = dataset.counts().clone();
    subtract_clamped(&mut counts, &deduction);

    let removed = dataset.counts().sum() - counts.sum();
    info!(
        "Leakage correction at rate {}: removed {:.0} reads ({:.2}% of total)",
        rate,
        removed,
        100.0 * removed / dataset.counts().sum().max(1.0)
    );
    dataset.with_counts(counts)
}
