//! Control-driven contaminant labelling and removal.

use crate::dataset::Dataset;
use crate::error::{FilterError, Result};
use crate::motu::Bias;
use crate::reaction::{Reaction, ReactionType};
use log::info;
use ndarray::Axis;
use rayon::prelude::*;

/// Per-type maxima of one MOTU column. `None` when the type has no rows.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TypeMaxima {
    extneg: Option<f64>,
    pcrneg: Option<f64>,
    sample: Option<f64>,
}

impl TypeMaxima {
    fn bias(&self) -> Bias {
        let overall = [self.extneg, self.pcrneg, self.sample]
            .iter()
            .flatten()
            .fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));

        // Order of the checks is the tie-break.
        if matches!(self.extneg, Some(v) if v == overall && v > 0.0) {
            Bias::Extneg
        } else if matches!(self.pcrneg, Some(v) if v == overall && v > 0.0) {
            Bias::Pcrneg
        } else {
            Bias::None
        }
    }
}

fn fold_max(current: Option<f64>, value: f64) -> Option<f64> {
    Some(current.map_or(value, |c| c.max(value)))
}

/// Label every MOTU with where its maximum abundance occurs.
///
/// Only the MOTU table changes. Running it again on its own output gives the
/// same labels.
pub fn classify(dataset: &Dataset<Reaction>) -> Result<Dataset<Reaction>> {
    let kinds: Vec<ReactionType> = dataset.rows().iter().map(|r| r.kind).collect();
    let counts = dataset.counts();

    let labels: Vec<Bias> = (0..dataset.n_motus())
        .into_par_iter()
        .map(|j| {
            let mut maxima = TypeMaxima {
                extneg: None,
                pcrneg: None,
                sample: None,
            };
            for (&value, kind) in counts.index_axis(Axis(1), j).iter().zip(&kinds) {
                match kind {
                    ReactionType::ExtNeg => maxima.extneg = fold_max(maxima.extneg, value),
                    ReactionType::PcrNeg => maxima.pcrneg = fold_max(maxima.pcrneg, value),
                    ReactionType::Sample => maxima.sample = fold_max(maxima.sample, value),
                }
            }
            maxima.bias()
        })
        .collect();

    let motus = dataset
        .motus()
        .iter()
        .zip(labels)
        .map(|(motu, bias)| {
            let mut motu = motu.clone();
            motu.bias = Some(bias);
            motu
        })
        .collect::<Vec<_>>();

    let extneg = motus.iter().filter(|m| m.bias == Some(Bias::Extneg)).count();
    let pcrneg = motus.iter().filter(|m| m.bias == Some(Bias::Pcrneg)).count();
    info!(
        "Contamination classes: {} extneg, {} pcrneg, {} clean out of {} MOTUs",
        extneg,
        pcrneg,
        motus.len() - extneg - pcrneg,
        motus.len()
    );

    dataset.with_motus(motus)
}

/// Zero every column of a contaminant MOTU or of a MOTU unsupported by both
/// reference databases.
pub fn remove_contaminants(dataset: &Dataset<Reaction>) -> Result<Dataset<Reaction>> {
    let mut doomed = Vec::with_capacity(dataset.n_motus());
    for motu in dataset.motus() {
        let bias = motu.bias.ok_or_else(|| FilterError::Unclassified { id: motu.id.clone() })?;
        doomed.push(bias != Bias::None || motu.is_unidentified());
    }

    let mut counts = dataset.counts().clone();
    for (mut column, &zero) in counts.axis_iter_mut(Axis(1)).zip(&doomed) {
        if zero {
            column.fill(0.0);
        }
    }

    info!(
        "Zeroed {} contaminant or unidentified MOTUs out of {}",
        doomed.iter().filter(|&&d| d).count(),
        doomed.len()
    );
    dataset.with_counts(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::{motus, reactions};
    use crate::motu::Motu;
    use ndarray::array;

    fn controls_and_samples() -> Dataset<Reaction> {
        let rows = reactions(&[
            "1_w_x_A1_99_2_a",
            "2_w_x_A2_99_2_a",
            "PCR1_NA_NA_NA_NA_NA_a",
            "En1_NA_NA_NA_NA_NA_a",
        ]);
        let counts = array![
            [10.0, 1.0, 0.0, 5.0, 7.0],
            [3.0, 0.0, 0.0, 2.0, 0.0],
            [1.0, 9.0, 0.0, 5.0, 0.0],
            [0.0, 2.0, 4.0, 5.0, 0.0],
        ];
        Dataset::new(counts, rows, motus(5)).unwrap()
    }

    #[test]
    fn labels_follow_the_maximum() {
        let ds = classify(&controls_and_samples()).unwrap();
        let labels: Vec<Bias> = ds.motus().iter().map(|m| m.bias.unwrap()).collect();
        assert_eq!(
            labels,
            vec![Bias::None, Bias::Pcrneg, Bias::Extneg, Bias::Extneg, Bias::None]
        );
    }

    #[test]
    fn missing_control_type_is_ignored() {
        let rows = reactions(&["1_w_x_A1_99_2_a", "PCR1_NA_NA_NA_NA_NA_a"]);
        let counts = array![[0.0, 3.0], [2.0, 3.0]];
        let ds = classify(&Dataset::new(counts, rows, motus(2)).unwrap()).unwrap();
        let labels: Vec<Bias> = ds.motus().iter().map(|m| m.bias.unwrap()).collect();
        assert_eq!(labels, vec![Bias::Pcrneg, Bias::Pcrneg]);
    }

    #[test]
    fn classification_is_idempotent() {
        let once = classify(&controls_and_samples()).unwrap();
        let twice = classify(&once).unwrap();
        assert_eq!(once.motus(), twice.motus());
    }

    #[test]
    fn removal_requires_classification() {
        let err = remove_contaminants(&controls_and_samples()).unwrap_err();
        assert!(matches!(err, FilterError::Unclassified { .. }));
    }

    #[test]
    fn removal_zeroes_contaminants_and_unidentified() {
        let classified = classify(&controls_and_samples()).unwrap();
        let mut table: Vec<Motu> = classified.motus().to_vec();
        // Supported by one database only: kept.
        table[0] = Motu { best_identity_mmhills: Some(0.5), ..table[0].clone() };
        table[0].annotate(0.95, 0.90);
        // Unsupported by both: removed even though it is not a contaminant.
        table[4] = Motu { best_identity_embl: Some(0.94), best_identity_mmhills: Some(0.90), ..table[4].clone() };
        table[4].annotate(0.95, 0.90);
        let classified = classified.with_motus(table).unwrap();

        let cleaned = remove_contaminants(&classified).unwrap();
        let counts = cleaned.counts();
        assert_eq!(counts.column(0), classified.counts().column(0));
        for j in 1..5 {
            assert!(counts.column(j).iter().all(|&v| v == 0.0));
        }
        assert!(counts.iter().zip(classified.counts().iter()).all(|(a, b)| a <= b));
    }
}
