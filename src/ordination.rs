//! Low-dimensional embedding of reaction profiles.
//!
//! Correspondence analysis on square-root transformed counts places
//! reactions with similar relative composition close together whatever their
//! sequencing depth. Only the resulting distances leave this module.

use crate::error::Result;
use log::debug;
use ndarray::{Array2, Axis};
use ndarray_linalg::{Eigh, UPLO};
use rayon::prelude::*;

const EIGEN_TOLERANCE: f64 = 1e-12;

/// Row principal coordinates of a correspondence analysis on `table`.
///
/// Columns summing to zero carry no information and are ignored. Rows
/// summing to zero sit at the origin. When the table has fewer than `n_axes`
/// non-trivial axes the remaining coordinates are zero.
pub fn correspondence_rows(table: &Array2<f64>, n_axes: usize) -> Result<Array2<f64>> {
    let n_rows = table.nrows();
    let mut coords = Array2::<f64>::zeros((n_rows, n_axes));

    let informative: Vec<usize> = table
        .sum_axis(Axis(0))
        .iter()
        .enumerate()
        .filter(|(_, &total)| total > 0.0)
        .map(|(j, _)| j)
        .collect();
    let table = table.select(Axis(1), &informative);
    let grand = table.sum();
    if n_rows == 0 || grand <= 0.0 {
        return Ok(coords);
    }

    let p = &table / grand;
    let row_mass = p.sum_axis(Axis(1));
    let col_mass = p.sum_axis(Axis(0));

    // Standardised residuals (p_ij - r_i c_j) / sqrt(r_i c_j).
    let mut residuals = Array2::<f64>::zeros(p.raw_dim());
    for ((i, j), value) in residuals.indexed_iter_mut() {
        let expected = row_mass[i] * col_mass[j];
        if expected > 0.0 {
            *value = (p[[i, j]] - expected) / expected.sqrt();
        }
    }

    // Left singular vectors of the residuals are the eigenvectors of the
    // reaction x reaction Gram matrix.
    let gram = residuals.dot(&residuals.t());
    let (eigenvalues, eigenvectors) = gram.eigh(UPLO::Lower)?;

    let mut order: Vec<usize> = (0..eigenvalues.len()).collect();
    order.sort_by(|&a, &b| {
        eigenvalues[b]
            .partial_cmp(&eigenvalues[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    for (axis, &k) in order.iter().take(n_axes).enumerate() {
        let lambda = eigenvalues[k];
        if lambda <= EIGEN_TOLERANCE {
            break;
        }
        debug!("CA axis {}: inertia {:.6}", axis + 1, lambda);
        let singular = lambda.sqrt();
        for i in 0..n_rows {
            if row_mass[i] > 0.0 {
                coords[[i, axis]] = eigenvectors[[i, k]] * singular / row_mass[i].sqrt();
            }
        }
    }

    Ok(coords)
}

/// Square-root transform followed by a two-axis correspondence analysis.
pub fn embed_profiles(counts: &Array2<f64>) -> Result<Array2<f64>> {
    correspondence_rows(&counts.mapv(f64::sqrt), 2)
}

/// Full symmetric matrix of Euclidean distances between rows of `coords`.
pub fn pairwise_distances(coords: &Array2<f64>) -> Array2<f64> {
    let n = coords.nrows();
    let rows: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|i| {
            let a = coords.row(i);
            (0..n)
                .map(|k| {
                    let b = coords.row(k);
                    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt()
                })
                .collect()
        })
        .collect();

    let mut distances = Array2::<f64>::zeros((n, n));
    for (i, row) in rows.into_iter().enumerate() {
        for (k, d) in row.into_iter().enumerate() {
            distances[[i, k]] = d;
        }
    }
    distances
}
