//! The count matrix together with its row and MOTU metadata.

use crate::error::{FilterError, Result};
use crate::motu::Motu;
use crate::reaction::RowRecord;
use ndarray::{Array1, Array2, Axis};
use std::collections::HashSet;

/// Immutable snapshot passed between pipeline stages.
///
/// Row `i` of `counts` belongs to `rows[i]` and column `j` to `motus[j]`;
/// every constructor checks this, so a `Dataset` can never hold misaligned
/// keys.
#[derive(Debug, Clone)]
pub struct Dataset<R: RowRecord> {
    counts: Array2<f64>,
    rows: Vec<R>,
    motus: Vec<Motu>,
}

fn check_unique<'a>(axis: &'static str, keys: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for key in keys {
        if !seen.insert(key) {
            return Err(FilterError::DuplicateKey {
                axis,
                key: key.to_string(),
            });
        }
    }
    Ok(())
}

fn check_keys_match<'a>(
    axis: &'static str,
    matrix: impl Iterator<Item = &'a str>,
    metadata: impl Iterator<Item = &'a str>,
) -> Result<()> {
    let mut matrix = matrix.fuse();
    let mut metadata = metadata.fuse();
    let mut position = 0;
    loop {
        match (matrix.next(), metadata.next()) {
            (None, None) => return Ok(()),
            (a, b) if a == b => position += 1,
            (a, b) => {
                return Err(FilterError::KeyMismatch {
                    axis,
                    position,
                    matrix: a.map(str::to_string),
                    metadata: b.map(str::to_string),
                })
            }
        }
    }
}

impl<R: RowRecord> Dataset<R> {
    pub fn new(counts: Array2<f64>, rows: Vec<R>, motus: Vec<Motu>) -> Result<Self> {
        if counts.nrows() != rows.len() || counts.ncols() != motus.len() {
            return Err(FilterError::ShapeMismatch {
                rows: counts.nrows(),
                cols: counts.ncols(),
                expected_rows: rows.len(),
                expected_cols: motus.len(),
            });
        }
        check_unique("row", rows.iter().map(|r| r.key()))?;
        check_unique("MOTU", motus.iter().map(|m| m.id.as_str()))?;
        Ok(Dataset { counts, rows, motus })
    }

    /// Build from a matrix that carries its own row and column keys, which
    /// must equal the metadata keys in membership and order.
    pub fn from_keyed(
        row_keys: &[String],
        motu_keys: &[String],
        counts: Array2<f64>,
        rows: Vec<R>,
        motus: Vec<Motu>,
    ) -> Result<Self> {
        check_keys_match("row", row_keys.iter().map(String::as_str), rows.iter().map(|r| r.key()))?;
        check_keys_match(
            "MOTU",
            motu_keys.iter().map(String::as_str),
            motus.iter().map(|m| m.id.as_str()),
        )?;
        Self::new(counts, rows, motus)
    }

    pub fn counts(&self) -> &Array2<f64> {
        &self.counts
    }

    pub fn rows(&self) -> &[R] {
        &self.rows
    }

    pub fn motus(&self) -> &[Motu] {
        &self.motus
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_motus(&self) -> usize {
        self.motus.len()
    }

    pub fn row_keys(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.key()).collect()
    }

    pub fn motu_ids(&self) -> Vec<&str> {
        self.motus.iter().map(|m| m.id.as_str()).collect()
    }

    pub fn row_totals(&self) -> Array1<f64> {
        self.counts.sum_axis(Axis(1))
    }

    pub fn motu_totals(&self) -> Array1<f64> {
        self.counts.sum_axis(Axis(0))
    }

    /// Same metadata, new counts of the same shape.
    pub fn with_counts(&self, counts: Array2<f64>) -> Result<Self> {
        Self::new(counts, self.rows.clone(), self.motus.clone())
    }

    /// Same counts and MOTUs, replacement row records (same keys, same order).
    pub fn with_rows(&self, rows: Vec<R>) -> Result<Self> {
        check_keys_match("row", self.rows.iter().map(|r| r.key()), rows.iter().map(|r| r.key()))?;
        Ok(Dataset {
            counts: self.counts.clone(),
            rows,
            motus: self.motus.clone(),
        })
    }

    /// Same counts and rows, replacement MOTU records (same ids, same order).
    pub fn with_motus(&self, motus: Vec<Motu>) -> Result<Self> {
        check_keys_match(
            "MOTU",
            self.motus.iter().map(|m| m.id.as_str()),
            motus.iter().map(|m| m.id.as_str()),
        )?;
        Ok(Dataset {
            counts: self.counts.clone(),
            rows: self.rows.clone(),
            motus,
        })
    }

    /// Keep the rows at `indices`, in the given order.
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        Dataset {
            counts: self.counts.select(Axis(0), indices),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
            motus: self.motus.clone(),
        }
    }

    /// Keep the MOTU columns at `indices`, in the given order.
    pub fn select_motus(&self, indices: &[usize]) -> Self {
        Dataset {
            counts: self.counts.select(Axis(1), indices),
            rows: self.rows.clone(),
            motus: indices.iter().map(|&j| self.motus[j].clone()).collect(),
        }
    }

    /// Drop MOTUs whose column sums to zero.
    pub fn drop_empty_motus(&self) -> Self {
        let keep: Vec<usize> = self
            .motu_totals()
            .iter()
            .enumerate()
            .filter(|(_, &total)| total > 0.0)
            .map(|(j, _)| j)
            .collect();
        self.select_motus(&keep)
    }

    /// Drop rows whose counts sum to zero.
    pub fn drop_empty_rows(&self) -> Self {
        let keep: Vec<usize> = self
            .row_totals()
            .iter()
            .enumerate()
            .filter(|(_, &total)| total > 0.0)
            .map(|(i, _)| i)
            .collect();
        self.select_rows(&keep)
    }
}
