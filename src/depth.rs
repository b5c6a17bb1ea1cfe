use crate::dataset::Dataset;
use crate::error::Result;
use crate::reaction::Reaction;
use log::info;

/// Flag reactions whose total reads fall below `min_depth`.
///
/// Nothing is removed here. Flagged reactions stay in the matrix and are
/// skipped by ordination and merging. An existing flag is never cleared.
pub fn flag_shallow(dataset: &Dataset<Reaction>, min_depth: f64) -> Result<Dataset<Reaction>> {
    let totals = dataset.row_totals();
    let rows: Vec<Reaction> = dataset
        .rows()
        .iter()
        .zip(totals.iter())
        .map(|(reaction, &total)| {
            let mut reaction = reaction.clone();
            reaction.empty_pcr = reaction.empty_pcr || total < min_depth;
            reaction
        })
        .collect();

    info!(
        "{} of {} reactions below {} reads",
        rows.iter().filter(|r| r.empty_pcr).count(),
        rows.len(),
        min_depth
    );
    dataset.with_rows(rows)
}
