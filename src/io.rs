//! Reading the upstream MOTU table and writing the filtered tables.
//!
//! The upstream table has one row per MOTU. Known annotation columns form the
//! metadata block; every other column holds the counts of one reaction and is
//! headed by its encoded identifier.

use crate::dataset::Dataset;
use crate::error::{FilterError, Result};
use crate::leakage::LeakageSweep;
use crate::motu::Motu;
use crate::pipeline::RunSummary;
use crate::reaction::{MergedSample, Reaction, RowRecord};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use lazy_static::lazy_static;
use log::info;
use ndarray::Array2;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

lazy_static! {
    static ref ANNOTATION_COLUMNS: HashSet<&'static str> = [
        "id",
        "count",
        "best_identity_embl",
        "best_identity_mmhills",
        "family_name",
        "genus_name",
        "species_name",
        "scientific_name",
        "rank",
        "seq_length",
        "sequence",
        "match_count_embl",
        "match_count_mmhills",
        "species_list_embl",
        "species_list_mmhills",
    ]
    .into_iter()
    .collect();
}

fn table_error(path: &Path, reason: impl Into<String>) -> FilterError {
    FilterError::Table {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn is_missing(text: &str) -> bool {
    let text = text.trim();
    text.is_empty() || text.eq_ignore_ascii_case("na") || text.eq_ignore_ascii_case("nan")
}

struct AnnotationFields<'a> {
    columns: &'a HashMap<&'a str, usize>,
    record: &'a StringRecord,
}

impl<'a> AnnotationFields<'a> {
    fn text(&self, name: &str) -> String {
        self.columns
            .get(name)
            .and_then(|&i| self.record.get(i))
            .filter(|v| !is_missing(v))
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    }

    fn number<T: std::str::FromStr>(&self, path: &Path, id: &str, name: &str) -> Result<Option<T>> {
        let text = self.text(name);
        if text.is_empty() {
            return Ok(None);
        }
        text.parse()
            .map(Some)
            .map_err(|_| table_error(path, format!("MOTU {}: {} {:?} is not a number", id, name, text)))
    }

    fn list(&self, name: &str) -> Vec<String> {
        self.text(name)
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Read the upstream table and transpose it into a reaction × MOTU dataset.
///
/// MOTU records come back without derived labels; see
/// [`crate::pipeline::annotate_motus`].
pub fn read_motu_table<P: AsRef<Path>>(path: P, delimiter: u8) -> Result<Dataset<Reaction>> {
    let path = path.as_ref();
    let mut reader = ReaderBuilder::new().delimiter(delimiter).from_path(path)?;
    let headers = reader.headers()?.clone();

    let mut columns: HashMap<&str, usize> = HashMap::new();
    let mut reaction_columns: Vec<usize> = Vec::new();
    for (i, name) in headers.iter().enumerate() {
        if ANNOTATION_COLUMNS.contains(name) {
            if columns.insert(name, i).is_some() {
                return Err(table_error(path, format!("column {:?} appears twice", name)));
            }
        } else {
            reaction_columns.push(i);
        }
    }
    if !columns.contains_key("id") {
        return Err(table_error(path, "missing the 'id' column"));
    }
    if reaction_columns.is_empty() {
        return Err(table_error(path, "no reaction count columns"));
    }

    let reaction_keys: Vec<String> = reaction_columns.iter().map(|&i| headers[i].to_string()).collect();
    let reactions = reaction_keys
        .iter()
        .map(|name| Reaction::decode(name))
        .collect::<Result<Vec<_>>>()?;

    let mut motus = Vec::new();
    let mut columns_by_motu: Vec<Vec<f64>> = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let fields = AnnotationFields {
            columns: &columns,
            record: &record,
        };
        let id = fields.text("id");
        if id.is_empty() {
            return Err(table_error(path, format!("data row {} has no MOTU id", line + 1)));
        }

        let mut counts = Vec::with_capacity(reaction_columns.len());
        for (&i, name) in reaction_columns.iter().zip(&reaction_keys) {
            let text = record.get(i).unwrap_or("").trim();
            let value = if is_missing(text) {
                0.0
            } else {
                text.parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite() && *v >= 0.0)
                    .ok_or_else(|| table_error(path, format!("MOTU {} in {}: bad count {:?}", id, name, text)))?
            };
            counts.push(value);
        }

        let count = match fields.number::<u64>(path, &id, "count")? {
            Some(count) => count,
            None => counts.iter().sum::<f64>().round() as u64,
        };
        motus.push(Motu {
            count,
            best_identity_embl: fields.number(path, &id, "best_identity_embl")?,
            best_identity_mmhills: fields.number(path, &id, "best_identity_mmhills")?,
            family_name: fields.text("family_name"),
            genus_name: fields.text("genus_name"),
            species_name: fields.text("species_name"),
            scientific_name: fields.text("scientific_name"),
            rank: fields.text("rank"),
            seq_length: fields.number(path, &id, "seq_length")?,
            sequence: fields.text("sequence"),
            match_count_embl: fields.number(path, &id, "match_count_embl")?,
            match_count_mmhills: fields.number(path, &id, "match_count_mmhills")?,
            species_list_embl: fields.list("species_list_embl"),
            species_list_mmhills: fields.list("species_list_mmhills"),
            ..Motu::new(id, None, None)
        });
        columns_by_motu.push(counts);
    }

    let mut matrix = Array2::<f64>::zeros((reactions.len(), motus.len()));
    for (j, column) in columns_by_motu.iter().enumerate() {
        for (i, &value) in column.iter().enumerate() {
            matrix[[i, j]] = value;
        }
    }

    let motu_keys: Vec<String> = motus.iter().map(|m| m.id.clone()).collect();
    let dataset = Dataset::from_keyed(&reaction_keys, &motu_keys, matrix, reactions, motus)?;
    info!(
        "Read {} MOTUs across {} reactions from {}",
        dataset.n_motus(),
        dataset.n_rows(),
        path.display()
    );
    Ok(dataset)
}

fn optional<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

fn format_count(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

fn tsv_writer(path: &Path) -> Result<csv::Writer<BufWriter<File>>> {
    Ok(WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(BufWriter::new(File::create(path)?)))
}

/// MOTU annotations. `input_count` is the upstream read total, before any
/// correction or filtering.
pub fn write_motus<P: AsRef<Path>>(path: P, motus: &[Motu]) -> Result<()> {
    let mut writer = tsv_writer(path.as_ref())?;
    writer.write_record([
        "id",
        "input_count",
        "best_identity_embl",
        "best_identity_mmhills",
        "family_name",
        "genus_name",
        "species_name",
        "scientific_name",
        "rank",
        "seq_length",
        "sequence",
        "match_count_embl",
        "match_count_mmhills",
        "species_list_embl",
        "species_list_mmhills",
        "sequence_type",
        "bias",
        "degraded",
    ])?;
    for m in motus {
        writer.write_record([
            m.id.clone(),
            m.count.to_string(),
            optional(&m.best_identity_embl),
            optional(&m.best_identity_mmhills),
            m.family_name.clone(),
            m.genus_name.clone(),
            m.species_name.clone(),
            m.scientific_name.clone(),
            m.rank.clone(),
            optional(&m.seq_length),
            m.sequence.clone(),
            optional(&m.match_count_embl),
            optional(&m.match_count_mmhills),
            m.species_list_embl.join(";"),
            m.species_list_mmhills.join(";"),
            m.sequence_type.to_string(),
            m.bias.map(|b| b.to_string()).unwrap_or_default(),
            m.degraded.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Per-reaction flags, so every reaction left out of the merge has a recorded reason.
pub fn write_reactions<P: AsRef<Path>>(path: P, reactions: &[Reaction]) -> Result<()> {
    let mut writer = tsv_writer(path.as_ref())?;
    writer.write_record(["reaction", "type", "sample", "replicate", "empty_PCR", "nonReplicating"])?;
    for r in reactions {
        writer.write_record([
            r.name.clone(),
            r.kind.to_string(),
            r.group_key().to_string(),
            r.replicate.letter().to_string(),
            r.empty_pcr.to_string(),
            r.non_replicating.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_samples<P: AsRef<Path>>(path: P, samples: &[MergedSample]) -> Result<()> {
    let mut writer = tsv_writer(path.as_ref())?;
    writer.write_record([
        "sample",
        "number",
        "group",
        "label",
        "animal",
        "percent_identity",
        "primer_pairs",
        "replicates",
        "replicate_letters",
    ])?;
    for s in samples {
        writer.write_record([
            s.sample.clone(),
            optional(&s.number),
            s.origin.map(|o| o.as_str().to_string()).unwrap_or_default(),
            s.label.clone().unwrap_or_default(),
            s.animal.clone().unwrap_or_default(),
            optional(&s.percent_identity),
            optional(&s.primer_pairs),
            s.replicates.to_string(),
            s.replicate_letters.clone(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Count matrix with one row per sample and one column per MOTU id.
pub fn write_counts<P: AsRef<Path>, R: RowRecord>(path: P, dataset: &Dataset<R>) -> Result<()> {
    let mut writer = tsv_writer(path.as_ref())?;
    let mut header = vec!["sample".to_string()];
    header.extend(dataset.motu_ids().into_iter().map(str::to_string));
    writer.write_record(&header)?;
    for (row, values) in dataset.rows().iter().zip(dataset.counts().rows()) {
        let mut record = vec![row.key().to_string()];
        record.extend(values.iter().map(|&v| format_count(v)));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_sweep<P: AsRef<Path>>(path: P, sweep: &LeakageSweep) -> Result<()> {
    let mut writer = tsv_writer(path.as_ref())?;
    for row in &sweep.rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_summary<P: AsRef<Path>>(path: P, summary: &RunSummary) -> Result<()> {
    let file = BufWriter::new(File::create(path.as_ref())?);
    serde_json::to_writer_pretty(file, summary)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TABLE: &str = "\
id\tcount\tbest_identity_embl\tbest_identity_mmhills\tscientific_name\tspecies_list_embl\t1_w_deer_A1_99_2_a\t1_w_deer_A1_99_2_b\tPCR1_NA_NA_NA_NA_NA_a
m1\t30\t0.99\tNA\tCapreolus capreolus\tC. capreolus;C. pygargus\t10\t20\t0
m2\t\t0.80\t0.96\tSus scrofa\t\t3\t\t1
";

    #[test]
    fn reads_and_transposes_the_motu_table() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TABLE.as_bytes()).unwrap();

        let ds = read_motu_table(file.path(), b'\t').unwrap();
        assert_eq!(
            ds.row_keys(),
            vec!["1_w_deer_A1_99_2_a", "1_w_deer_A1_99_2_b", "PCR1_NA_NA_NA_NA_NA_a"]
        );
        assert_eq!(ds.motu_ids(), vec!["m1", "m2"]);
        assert_eq!(ds.counts(), &ndarray::array![[10.0, 3.0], [20.0, 0.0], [0.0, 1.0]]);

        let m1 = &ds.motus()[0];
        assert_eq!(m1.count, 30);
        assert_eq!(m1.best_identity_embl, Some(0.99));
        assert_eq!(m1.best_identity_mmhills, None);
        assert_eq!(m1.species_list_embl, vec!["C. capreolus", "C. pygargus"]);
        // Missing total falls back to the row sum.
        assert_eq!(ds.motus()[1].count, 4);
    }

    #[test]
    fn bad_counts_and_identifiers_are_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "id\t1_w_deer_A1_99_2_a\nm1\t-3\n").unwrap();
        assert!(matches!(
            read_motu_table(file.path(), b'\t').unwrap_err(),
            FilterError::Table { .. }
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "id\tnot_a_reaction\nm1\t3\n").unwrap();
        assert!(matches!(
            read_motu_table(file.path(), b'\t').unwrap_err(),
            FilterError::Decode { .. }
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "id\t1_w_deer_A1_99_2_a\nm1\t3\nm1\t4\n").unwrap();
        assert!(matches!(
            read_motu_table(file.path(), b'\t').unwrap_err(),
            FilterError::DuplicateKey { .. }
        ));
    }

    #[test]
    fn counts_table_round_trips_through_the_reader_shape() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TABLE.as_bytes()).unwrap();
        let ds = read_motu_table(file.path(), b'\t').unwrap();

        let out = dir.path().join("counts.tsv");
        write_counts(&out, &ds).unwrap();
        let written = std::fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines[0], "sample\tm1\tm2");
        assert_eq!(lines[1], "1_w_deer_A1_99_2_a\t10\t3");
        assert_eq!(lines.len(), 4);
    }

    fn header_and_first_row(path: &Path) -> (String, String) {
        let written = std::fs::read_to_string(path).unwrap();
        let mut lines = written.lines();
        (lines.next().unwrap().to_string(), lines.next().unwrap().to_string())
    }

    #[test]
    fn output_tables_carry_headers_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TABLE.as_bytes()).unwrap();
        let mut ds = read_motu_table(file.path(), b'\t').unwrap();
        let mut motus = ds.motus().to_vec();
        motus[0].annotate(0.95, 0.90);
        motus[0].bias = Some(crate::motu::Bias::Pcrneg);
        ds = ds.with_motus(motus).unwrap();

        let path = dir.path().join("motus.tsv");
        write_motus(&path, ds.motus()).unwrap();
        let (header, row) = header_and_first_row(&path);
        assert!(header.starts_with("id\tinput_count\tbest_identity_embl"));
        assert!(header.ends_with("sequence_type\tbias\tdegraded"));
        let fields: Vec<&str> = row.split('\t').collect();
        assert_eq!(fields[0], "m1");
        assert_eq!(fields[1], "30");
        assert_eq!(fields[13], "C. capreolus;C. pygargus");
        assert_eq!(fields[15..].to_vec(), vec!["embl", "pcrneg", "false"]);

        let mut reactions = ds.rows().to_vec();
        reactions[1].non_replicating = true;
        let path = dir.path().join("reactions.tsv");
        write_reactions(&path, &reactions).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines[0], "reaction\ttype\tsample\treplicate\tempty_PCR\tnonReplicating");
        assert_eq!(lines[2], "1_w_deer_A1_99_2_b\tsample\t1_w_deer_A1_99_2\tb\tfalse\ttrue");

        let sample = MergedSample {
            sample: "1_w_deer_A1_99_2".to_string(),
            number: Some(1),
            origin: Some(crate::reaction::Origin::Wild),
            label: Some("deer".to_string()),
            animal: Some("A1".to_string()),
            percent_identity: Some(99.0),
            primer_pairs: Some(2),
            replicates: 2,
            replicate_letters: "ab".to_string(),
        };
        let path = dir.path().join("samples.tsv");
        write_samples(&path, &[sample]).unwrap();
        let (header, row) = header_and_first_row(&path);
        assert_eq!(
            header,
            "sample\tnumber\tgroup\tlabel\tanimal\tpercent_identity\tprimer_pairs\treplicates\treplicate_letters"
        );
        assert_eq!(row, "1_w_deer_A1_99_2\t1\tw\tdeer\tA1\t99\t2\t2\tab");

        let sweep = crate::leakage::sweep(&ds, &[0.0, 0.5]);
        let path = dir.path().join("leakage_sweep.tsv");
        write_sweep(&path, &sweep).unwrap();
        let (header, row) = header_and_first_row(&path);
        assert_eq!(
            header,
            "rate\tn_controls\ttotal_reads\tmean_reads\tmax_reads\tmean_richness\tmax_richness\tpositive_controls"
        );
        assert!(row.starts_with("0.0\t1\t"));
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 3);
    }

    #[test]
    fn summary_json_lists_dropped_samples() {
        use crate::merge::{DropReason, DroppedSample};
        use crate::pruner::PruneReport;

        let summary = RunSummary {
            stages: Vec::new(),
            leak_rate: 0.01,
            suggested_leak_rate: None,
            leakage_sweep: LeakageSweep { rows: Vec::new() },
            pruning: PruneReport { iterations: Vec::new() },
            dropped_samples: vec![DroppedSample {
                sample: "2_w_boar_A2_98_2".to_string(),
                reason: DropReason::NoReadsAfterRarity,
            }],
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        write_summary(&path, &summary).unwrap();

        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["leak_rate"], serde_json::json!(0.01));
        assert!(value["suggested_leak_rate"].is_null());
        assert_eq!(value["dropped_samples"][0]["sample"], "2_w_boar_A2_98_2");
        assert_eq!(value["dropped_samples"][0]["reason"], "no_reads_after_rarity");
    }

    #[test]
    fn fractional_counts_keep_their_precision() {
        assert_eq!(format_count(8.0), "8");
        assert_eq!(format_count(2.5), "2.5");
    }
}
