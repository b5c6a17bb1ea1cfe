//! Collapse surviving PCR replicates into one profile per biological sample.

use crate::dataset::Dataset;
use crate::error::{FilterError, Result};
use crate::reaction::{MergedSample, Reaction};
use log::{info, warn};
use ndarray::{Array2, Axis};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DropReason {
    MissingAnimal,
    TooFewReplicates { found: usize, required: usize },
    NoReadsAfterRarity,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::MissingAnimal => write!(f, "no DNA-identified animal"),
            DropReason::TooFewReplicates { found, required } => {
                write!(f, "{} surviving replicates, {} required", found, required)
            }
            DropReason::NoReadsAfterRarity => write!(f, "no reads left after the rarity filter"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroppedSample {
    pub sample: String,
    #[serde(flatten)]
    pub reason: DropReason,
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub dataset: Dataset<MergedSample>,
    pub dropped: Vec<DroppedSample>,
}

fn shared<T: PartialEq + Clone>(
    sample: &str,
    field: &'static str,
    members: &[&Reaction],
    get: impl Fn(&Reaction) -> T,
) -> Result<T> {
    let first = get(members[0]);
    if members[1..].iter().any(|r| get(r) != first) {
        return Err(FilterError::InconsistentMerge {
            sample: sample.to_string(),
            field,
        });
    }
    Ok(first)
}

fn merged_record(sample: &str, members: &[&Reaction]) -> Result<MergedSample> {
    let mut letters: Vec<char> = members.iter().map(|r| r.replicate.letter()).collect();
    letters.sort_unstable();
    Ok(MergedSample {
        sample: sample.to_string(),
        number: shared(sample, "number", members, |r| r.number)?,
        origin: shared(sample, "group", members, |r| r.origin)?,
        label: shared(sample, "label", members, |r| r.label.clone())?,
        animal: shared(sample, "animal", members, |r| r.animal.clone())?,
        percent_identity: shared(sample, "percent identity", members, |r| r.percent_identity)?,
        primer_pairs: shared(sample, "primer pair count", members, |r| r.primer_pairs)?,
        replicates: members.len(),
        replicate_letters: letters.into_iter().collect(),
    })
}

/// Average the surviving replicates of every biological sample.
///
/// Survivors are sample reactions not flagged empty or non-replicating.
/// Samples without an identified animal, or with fewer than `min_replicates`
/// survivors, are dropped and reported. MOTUs left without reads are
/// dropped too.
pub fn merge_replicates(dataset: &Dataset<Reaction>, min_replicates: usize) -> Result<MergeOutcome> {
    let mut order: Vec<(&str, Vec<usize>)> = Vec::new();
    let mut position: HashMap<&str, usize> = HashMap::new();
    for (i, reaction) in dataset.rows().iter().enumerate() {
        if !reaction.is_active_sample() {
            continue;
        }
        let key = reaction.group_key();
        match position.get(key) {
            Some(&p) => order[p].1.push(i),
            None => {
                position.insert(key, order.len());
                order.push((key, vec![i]));
            }
        }
    }

    let mut records = Vec::new();
    let mut profiles: Vec<Vec<usize>> = Vec::new();
    let mut dropped = Vec::new();
    for (sample, indices) in order {
        let members: Vec<&Reaction> = indices.iter().map(|&i| &dataset.rows()[i]).collect();
        let record = merged_record(sample, &members)?;

        let reason = if record.animal.as_deref().map_or(true, |a| a.trim().is_empty()) {
            Some(DropReason::MissingAnimal)
        } else if members.len() < min_replicates {
            Some(DropReason::TooFewReplicates {
                found: members.len(),
                required: min_replicates,
            })
        } else {
            None
        };

        match reason {
            Some(reason) => {
                warn!("Dropping sample {}: {}", sample, reason);
                dropped.push(DroppedSample {
                    sample: sample.to_string(),
                    reason,
                });
            }
            None => {
                records.push(record);
                profiles.push(indices);
            }
        }
    }

    let mut counts = Array2::<f64>::zeros((records.len(), dataset.n_motus()));
    for (mut row, indices) in counts.axis_iter_mut(Axis(0)).zip(&profiles) {
        let replicates = dataset.counts().select(Axis(0), indices);
        if let Some(mean) = replicates.mean_axis(Axis(0)) {
            row.assign(&mean);
        }
    }

    let merged = Dataset::new(counts, records, dataset.motus().to_vec())?.drop_empty_motus();
    info!(
        "Merged replicates into {} samples ({} dropped), {} MOTUs remain",
        merged.n_rows(),
        dropped.len(),
        merged.n_motus()
    );
    Ok(MergeOutcome {
        dataset: merged,
        dropped,
    })
}
