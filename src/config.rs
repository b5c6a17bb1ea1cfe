//! Filtering parameters.
//!
//! Defaults match a typical vertebrate diet survey. A JSON file may override
//! any subset of them; command-line flags override the file.

use crate::error::{FilterError, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Identity a MOTU needs against a reference database to count as supported by it.
    pub identity_cutoff: f64,
    /// Best identity under which a MOTU is annotated as degraded.
    pub degraded_identity: f64,
    /// Leak rates tried during calibration, ascending.
    pub leak_candidates: Vec<f64>,
    /// Leak rate actually applied to the matrix.
    pub leak_rate: f64,
    /// Mean reads per PCR-negative control the calibration sweep tolerates
    /// when suggesting a rate.
    pub leak_tolerance: f64,
    /// Reactions with fewer reads after correction are flagged empty.
    pub min_depth: f64,
    /// Surviving replicates a biological sample needs to be kept.
    pub min_replicates: usize,
    pub max_prune_iterations: usize,
    /// Grid size for the replicate distance densities.
    pub density_points: usize,
    /// Relative abundance under which a MOTU is zeroed in a merged sample.
    pub rare_cutoff: f64,
    /// MOTUs removed regardless of abundance.
    pub deny_list: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            identity_cutoff: 0.95,
            degraded_identity: 0.90,
            leak_candidates: vec![0.0, 0.001, 0.005, 0.01, 0.02, 0.03, 0.05],
            leak_rate: 0.01,
            leak_tolerance: 1.0,
            min_depth: 5000.0,
            min_replicates: 1,
            max_prune_iterations: 100,
            density_points: 512,
            rare_cutoff: 0.01,
            deny_list: Vec::new(),
        }
    }
}

fn fraction(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(FilterError::InvalidConfig(format!(
            "{} must be between 0 and 1, got {}",
            name, value
        )));
    }
    Ok(())
}

impl FilterConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let config: FilterConfig = serde_json::from_reader(BufReader::new(file))?;
        info!("Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    /// Append MOTU ids from a file with one id per line. Blank lines and
    /// lines starting with `#` are skipped.
    pub fn extend_deny_list_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let before = self.deny_list.len();
        for line in reader.lines() {
            let line = line?;
            let id = line.trim();
            if id.is_empty() || id.starts_with('#') {
                continue;
            }
            if !self.deny_list.iter().any(|d| d == id) {
                self.deny_list.push(id.to_string());
            }
        }
        info!(
            "Added {} MOTU ids to the deny-list from {}",
            self.deny_list.len() - before,
            path.as_ref().display()
        );
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        fraction("identity_cutoff", self.identity_cutoff)?;
        fraction("degraded_identity", self.degraded_identity)?;
        fraction("leak_rate", self.leak_rate)?;
        fraction("rare_cutoff", self.rare_cutoff)?;
        for &candidate in &self.leak_candidates {
            fraction("leak_candidates", candidate)?;
        }
        if self.leak_candidates.windows(2).any(|w| w[0] >= w[1]) {
            return Err(FilterError::InvalidConfig(
                "leak_candidates must be strictly ascending".to_string(),
            ));
        }
        if self.min_depth < 0.0 || self.leak_tolerance < 0.0 {
            return Err(FilterError::InvalidConfig(
                "min_depth and leak_tolerance cannot be negative".to_string(),
            ));
        }
        if self.min_replicates == 0 {
            return Err(FilterError::InvalidConfig(
                "min_replicates must be at least 1".to_string(),
            ));
        }
        if self.density_points < 2 {
            return Err(FilterError::InvalidConfig(
                "density_points must be at least 2".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        FilterConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"leak_rate": 0.03, "min_replicates": 2, "deny_list": ["motu9"]}}"#).unwrap();

        let config = FilterConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.leak_rate, 0.03);
        assert_eq!(config.min_replicates, 2);
        assert_eq!(config.deny_list, vec!["motu9".to_string()]);
        assert_eq!(config.rare_cutoff, 0.01);
        assert_eq!(config.identity_cutoff, 0.95);
    }

    #[test]
    fn deny_list_file_skips_comments_and_duplicates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# flagged by review\nmotu1\n\nmotu2\nmotu1").unwrap();

        let mut config = FilterConfig {
            deny_list: vec!["motu2".to_string()],
            ..FilterConfig::default()
        };
        config.extend_deny_list_from_file(file.path()).unwrap();
        assert_eq!(config.deny_list, vec!["motu2".to_string(), "motu1".to_string()]);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let config = FilterConfig {
            rare_cutoff: 1.5,
            ..FilterConfig::default()
        };
        assert!(config.validate().is_err());

        let config = FilterConfig {
            leak_candidates: vec![0.01, 0.005],
            ..FilterConfig::default()
        };
        assert!(config.validate().is_err());

        let config = FilterConfig {
            min_replicates: 0,
            ..FilterConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
