//! Stage ordering.
//!
//! Every stage takes a snapshot and returns a new one; nothing is shared or
//! mutated between stages.

use crate::config::FilterConfig;
use crate::contamination::{classify, remove_contaminants};
use crate::dataset::Dataset;
use crate::depth::flag_shallow;
use crate::error::Result;
use crate::leakage::{self, LeakageSweep};
use crate::merge::{merge_replicates, DropReason, DroppedSample};
use crate::pruner::{prune, CorrespondenceAnalysis, PruneReport, PruneSettings};
use crate::rarity::filter_rare;
use crate::reaction::{MergedSample, Reaction, RowRecord};
use indicatif::ProgressBar;
use log::info;
use serde::Serialize;

pub const STAGES: u64 = 7;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageSummary {
    pub stage: &'static str,
    pub rows: usize,
    pub motus: usize,
    pub reads: f64,
}

impl StageSummary {
    fn of<R: RowRecord>(stage: &'static str, dataset: &Dataset<R>) -> Self {
        let summary = StageSummary {
            stage,
            rows: dataset.n_rows(),
            motus: dataset.n_motus(),
            reads: dataset.counts().sum(),
        };
        info!(
            "[{}] {} rows x {} MOTUs, {:.0} reads",
            stage, summary.rows, summary.motus, summary.reads
        );
        summary
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub stages: Vec<StageSummary>,
    pub leak_rate: f64,
    pub suggested_leak_rate: Option<f64>,
    pub leakage_sweep: LeakageSweep,
    pub pruning: PruneReport,
    pub dropped_samples: Vec<DroppedSample>,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Reaction-level data after pruning, carrying every flag.
    pub reactions: Dataset<Reaction>,
    /// Merged, rarity-filtered samples.
    pub samples: Dataset<MergedSample>,
    pub summary: RunSummary,
}

/// Derive sequence type and degradation labels for every MOTU.
pub fn annotate_motus(dataset: &Dataset<Reaction>, config: &FilterConfig) -> Result<Dataset<Reaction>> {
    let motus = dataset
        .motus()
        .iter()
        .map(|m| {
            let mut m = m.clone();
            m.annotate(config.identity_cutoff, config.degraded_identity);
            m
        })
        .collect();
    dataset.with_motus(motus)
}

/// Run the calibration sweep on a freshly loaded, annotated dataset.
pub fn calibrate(dataset: &Dataset<Reaction>, config: &FilterConfig) -> (LeakageSweep, Option<f64>) {
    let sweep = leakage::sweep(dataset, &config.leak_candidates);
    let suggested = sweep.suggest(config.leak_tolerance);
    match suggested {
        Some(rate) => info!(
            "Smallest leak rate with at most {} mean control reads: {} (configured: {})",
            config.leak_tolerance, rate, config.leak_rate
        ),
        None => info!(
            "No candidate leak rate brings controls to {} mean reads (configured: {})",
            config.leak_tolerance, config.leak_rate
        ),
    }
    (sweep, suggested)
}

/// Run every stage in order.
pub fn run(input: &Dataset<Reaction>, config: &FilterConfig, progress: &ProgressBar) -> Result<PipelineOutput> {
    config.validate()?;
    let mut stages = vec![StageSummary::of("input", input)];

    progress.set_message("contamination classes");
    let classified = classify(&annotate_motus(input, config)?)?;
    progress.inc(1);

    progress.set_message("leakage correction");
    let (leakage_sweep, suggested_leak_rate) = calibrate(&classified, config);
    let corrected = leakage::apply(&classified, config.leak_rate)?;
    stages.push(StageSummary::of("leakage", &corrected));
    progress.inc(1);

    progress.set_message("contaminant removal");
    let cleaned = remove_contaminants(&corrected)?;
    stages.push(StageSummary::of("contaminants", &cleaned));
    progress.inc(1);

    progress.set_message("depth filter");
    let flagged = flag_shallow(&cleaned, config.min_depth)?;
    progress.inc(1);

    progress.set_message("replicate pruning");
    let settings = PruneSettings {
        max_iterations: config.max_prune_iterations,
        density_points: config.density_points,
    };
    let (pruned, pruning) = prune(&flagged, &CorrespondenceAnalysis, &settings)?;
    progress.inc(1);

    progress.set_message("replicate merge");
    let merged = merge_replicates(&pruned, config.min_replicates)?;
    stages.push(StageSummary::of("merge", &merged.dataset));
    progress.inc(1);

    progress.set_message("rarity filter");
    let (samples, emptied) = filter_rare(&merged.dataset, config.rare_cutoff, &config.deny_list)?;
    stages.push(StageSummary::of("rarity", &samples));
    progress.inc(1);

    let mut dropped_samples = merged.dropped;
    dropped_samples.extend(emptied.into_iter().map(|sample| DroppedSample {
        sample,
        reason: DropReason::NoReadsAfterRarity,
    }));

    Ok(PipelineOutput {
        reactions: pruned,
        samples,
        summary: RunSummary {
            stages,
            leak_rate: config.leak_rate,
            suggested_leak_rate,
            leakage_sweep,
            pruning,
            dropped_samples,
        },
    })
}
