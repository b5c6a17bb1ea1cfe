//! Replicate-consistency pruning.
//!
//! Each round embeds the surviving sample reactions, measures how far
//! replicates of the same biological sample sit from each other compared to
//! unrelated reactions, and drops the replicates that break their group
//! apart. Rounds repeat on the survivors until the distances stop
//! separating into a replicate and a non-replicate population, or until a
//! round finds nothing to drop.

use crate::dataset::Dataset;
use crate::density::crossover_threshold;
use crate::error::Result;
use crate::ordination::{embed_profiles, pairwise_distances};
use crate::reaction::Reaction;
use log::{debug, info, warn};
use ndarray::{Array2, Axis};
use serde::Serialize;
use std::collections::HashMap;

/// Maps a reaction × MOTU count table to low-dimensional coordinates, one
/// row per reaction.
pub trait ProfileEmbedding {
    fn embed(&self, counts: &Array2<f64>) -> Result<Array2<f64>>;
}

/// Square-root transform plus two-axis correspondence analysis.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrespondenceAnalysis;

impl ProfileEmbedding for CorrespondenceAnalysis {
    fn embed(&self, counts: &Array2<f64>) -> Result<Array2<f64>> {
        embed_profiles(counts)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PruneSettings {
    pub max_iterations: usize,
    pub density_points: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PruneIteration {
    pub iteration: usize,
    pub reactions: usize,
    pub threshold: Option<f64>,
    pub offenders: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PruneReport {
    pub iterations: Vec<PruneIteration>,
}

impl PruneReport {
    pub fn total_offenders(&self) -> usize {
        self.iterations.iter().map(|it| it.offenders.len()).sum()
    }
}

/// Split the upper triangle of `distances` into same-group and
/// different-group distances.
pub fn partition_distances(groups: &[&str], distances: &Array2<f64>) -> (Vec<f64>, Vec<f64>) {
    let mut within = Vec::new();
    let mut between = Vec::new();
    for i in 0..groups.len() {
        for k in (i + 1)..groups.len() {
            if groups[i] == groups[k] {
                within.push(distances[[i, k]]);
            } else {
                between.push(distances[[i, k]]);
            }
        }
    }
    (within, between)
}

/// Members of one replicate group that have to go for every remaining pair
/// to sit within `threshold`.
///
/// `members` indexes into `distances`, which is never modified. A pair over
/// the threshold loses both members, since nothing says which one is wrong.
/// Larger groups lose the member with the largest summed distance to the
/// others (the first one on ties) and are checked again.
pub fn non_replicating(distances: &Array2<f64>, members: &[usize], threshold: f64) -> Vec<usize> {
    let exceeds = members
        .iter()
        .enumerate()
        .any(|(n, &i)| members[n + 1..].iter().any(|&k| distances[[i, k]] > threshold));
    if !exceeds {
        return Vec::new();
    }
    if members.len() == 2 {
        return members.to_vec();
    }

    let row_sum = |i: usize| members.iter().map(|&k| distances[[i, k]]).sum::<f64>();
    let mut worst = members[0];
    let mut worst_sum = row_sum(worst);
    for &i in &members[1..] {
        let sum = row_sum(i);
        if sum > worst_sum {
            worst = i;
            worst_sum = sum;
        }
    }

    let rest: Vec<usize> = members.iter().copied().filter(|&i| i != worst).collect();
    let mut removed = vec![worst];
    removed.extend(non_replicating(distances, &rest, threshold));
    removed
}

/// Replicate groups in order of first appearance.
fn group_members<'a>(groups: &[&'a str]) -> Vec<(&'a str, Vec<usize>)> {
    let mut order: Vec<(&str, Vec<usize>)> = Vec::new();
    let mut position: HashMap<&str, usize> = HashMap::new();
    for (i, &key) in groups.iter().enumerate() {
        match position.get(key) {
            Some(&p) => order[p].1.push(i),
            None => {
                position.insert(key, order.len());
                order.push((key, vec![i]));
            }
        }
    }
    order
}

/// Run pruning rounds with `embedding` until a fixed point.
///
/// Only reactions of type sample that are not flagged empty or
/// non-replicating and that hold reads take part. Flags are only ever set.
pub fn prune<E: ProfileEmbedding>(
    dataset: &Dataset<Reaction>,
    embedding: &E,
    settings: &PruneSettings,
) -> Result<(Dataset<Reaction>, PruneReport)> {
    let mut rows: Vec<Reaction> = dataset.rows().to_vec();
    let totals = dataset.row_totals();
    let mut report = PruneReport { iterations: Vec::new() };

    for iteration in 1..=settings.max_iterations {
        let active: Vec<usize> = rows
            .iter()
            .enumerate()
            .filter(|(i, r)| r.is_active_sample() && totals[*i] > 0.0)
            .map(|(i, _)| i)
            .collect();
        if active.len() < 2 {
            info!("Pruning stops: {} reactions left to compare", active.len());
            break;
        }

        let subset = dataset.counts().select(Axis(0), &active);
        let distances = pairwise_distances(&embedding.embed(&subset)?);
        let groups: Vec<&str> = active.iter().map(|&i| rows[i].group_key()).collect();
        let (within, between) = partition_distances(&groups, &distances);

        let threshold = crossover_threshold(&within, &between, settings.density_points);
        let mut offenders: Vec<usize> = Vec::new();
        if let Some(threshold) = threshold {
            for (key, members) in group_members(&groups) {
                let bad = non_replicating(&distances, &members, threshold);
                if !bad.is_empty() {
                    debug!("Group {}: {} of {} replicates do not replicate", key, bad.len(), members.len());
                }
                offenders.extend(bad.into_iter().map(|local| active[local]));
            }
        }

        offenders.sort_unstable();
        let names: Vec<String> = offenders.iter().map(|&i| rows[i].name.clone()).collect();
        for &i in &offenders {
            rows[i].non_replicating = true;
        }

        match threshold {
            Some(t) => info!(
                "Pruning round {}: {} reactions, threshold {:.4}, {} non-replicating",
                iteration,
                active.len(),
                t,
                names.len()
            ),
            None => info!(
                "Pruning round {}: {} reactions, no within/between crossover",
                iteration,
                active.len()
            ),
        }

        let done = threshold.is_none() || offenders.is_empty();
        report.iterations.push(PruneIteration {
            iteration,
            reactions: active.len(),
            threshold,
            offenders: names,
        });
        if done {
            break;
        }
        if iteration == settings.max_iterations {
            warn!("Pruning stopped after {} rounds without reaching a fixed point", iteration);
        }
    }

    info!(
        "Replicate pruning flagged {} reactions over {} rounds",
        report.total_offenders(),
        report.iterations.len()
    );
    Ok((dataset.with_rows(rows)?, report))
}
