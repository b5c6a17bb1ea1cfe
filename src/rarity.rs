use crate::dataset::Dataset;
use crate::error::Result;
use crate::reaction::RowRecord;
use log::{info, warn};
use ndarray::Axis;
use std::collections::HashSet;

/// Zero MOTUs below `cutoff` relative abundance within their row, and every
/// MOTU on the deny-list, then drop MOTUs and rows left empty.
///
/// The comparison is strict: a MOTU at exactly `cutoff` is kept. Returns the
/// filtered dataset and the keys of the rows it emptied.
pub fn filter_rare<R: RowRecord>(
    dataset: &Dataset<R>,
    cutoff: f64,
    deny_list: &[String],
) -> Result<(Dataset<R>, Vec<String>)> {
    let denied: HashSet<&str> = deny_list.iter().map(String::as_str).collect();
    let deny_mask: Vec<bool> = dataset.motus().iter().map(|m| denied.contains(m.id.as_str())).collect();

    let mut counts = dataset.counts().clone();
    let mut zeroed = 0usize;
    for mut row in counts.axis_iter_mut(Axis(0)) {
        let total = row.sum();
        for (cell, &deny) in row.iter_mut().zip(&deny_mask) {
            if *cell == 0.0 {
                continue;
            }
            if deny || *cell / total < cutoff {
                *cell = 0.0;
                zeroed += 1;
            }
        }
    }

    let trimmed = dataset.with_counts(counts)?.drop_empty_motus();
    let emptied: Vec<String> = trimmed
        .rows()
        .iter()
        .zip(trimmed.row_totals().iter())
        .filter(|(_, &total)| total <= 0.0)
        .map(|(row, _)| row.key().to_string())
        .collect();
    for key in &emptied {
        warn!("Sample {} has no reads left after the rarity filter", key);
    }

    let filtered = trimmed.drop_empty_rows();
    info!(
        "Rarity filter zeroed {} cells ({} deny-listed MOTUs present); {} samples x {} MOTUs remain",
        zeroed,
        deny_mask.iter().filter(|&&d| d).count(),
        filtered.n_rows(),
        filtered.n_motus()
    );
    Ok((filtered, emptied))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::motus;
    use crate::reaction::MergedSample;
    use ndarray::array;

    fn sample(name: &str) -> MergedSample {
        MergedSample {
            sample: name.to_string(),
            number: Some(1),
            origin: None,
            label: None,
            animal: Some("A1".to_string()),
            percent_identity: None,
            primer_pairs: None,
            replicates: 2,
            replicate_letters: "ab".to_string(),
        }
    }

    #[test]
    fn cutoff_is_strict() {
        let rows = vec![sample("s1"), sample("s2")];
        let counts = array![[1.0, 99.0, 0.0], [0.0, 9901.0, 99.0]];
        let ds = Dataset::new(counts, rows, motus(3)).unwrap();

        let (filtered, emptied) = filter_rare(&ds, 0.01, &[]).unwrap();
        assert!(emptied.is_empty());
        // Exactly 1% survives, 0.99% does not; motu2 ends up empty.
        assert_eq!(filtered.motu_ids(), vec!["motu0", "motu1"]);
        assert_eq!(filtered.counts(), &array![[1.0, 99.0], [0.0, 9901.0]]);
    }

    #[test]
    fn deny_list_wins_over_abundance() {
        let rows = vec![sample("s1"), sample("s2")];
        let counts = array![[500.0, 500.0, 0.0], [0.0, 10.0, 990.0]];
        let ds = Dataset::new(counts, rows, motus(3)).unwrap();

        let (filtered, _) = filter_rare(&ds, 0.01, &["motu1".to_string()]).unwrap();
        assert!(!filtered.motu_ids().contains(&"motu1"));
        assert_eq!(filtered.counts(), &array![[500.0, 0.0], [0.0, 990.0]]);
    }

    #[test]
    fn rows_left_empty_are_dropped() {
        let rows = vec![sample("s1"), sample("s2")];
        let counts = array![[0.0, 40.0], [5.0, 5.0]];
        let ds = Dataset::new(counts, rows, motus(2)).unwrap();

        let (filtered, emptied) = filter_rare(&ds, 0.01, &["motu1".to_string()]).unwrap();
        assert_eq!(filtered.row_keys(), vec!["s2"]);
        assert_eq!(emptied, vec!["s1".to_string()]);
        assert_eq!(filtered.counts(), &array![[5.0]]);
        assert!(filtered.counts().iter().all(|&v| v <= 5.0));
    }
}
