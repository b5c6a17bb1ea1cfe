//! MOTU annotation records and the labels derived from them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which reference databases support a MOTU at the identity cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceType {
    Both,
    Embl,
    Mmhills,
    Unknown,
}

impl SequenceType {
    /// Classify from the two best identities. An absent identity never
    /// counts as support.
    pub fn from_identities(embl: Option<f64>, mmhills: Option<f64>, cutoff: f64) -> Self {
        let embl_ok = embl.map_or(false, |v| v >= cutoff);
        let mmhills_ok = mmhills.map_or(false, |v| v >= cutoff);
        match (embl_ok, mmhills_ok) {
            (true, true) => SequenceType::Both,
            (true, false) => SequenceType::Embl,
            (false, true) => SequenceType::Mmhills,
            (false, false) => SequenceType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SequenceType::Both => "both",
            SequenceType::Embl => "embl",
            SequenceType::Mmhills => "mmhills",
            SequenceType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SequenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a MOTU reaches its highest abundance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bias {
    Extneg,
    Pcrneg,
    None,
}

impl Bias {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bias::Extneg => "extneg",
            Bias::Pcrneg => "pcrneg",
            Bias::None => "none",
        }
    }
}

impl fmt::Display for Bias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Motu {
    pub id: String,
    pub count: u64,
    pub best_identity_embl: Option<f64>,
    pub best_identity_mmhills: Option<f64>,
    pub family_name: String,
    pub genus_name: String,
    pub species_name: String,
    pub scientific_name: String,
    pub rank: String,
    pub seq_length: Option<usize>,
    pub sequence: String,
    pub match_count_embl: Option<u32>,
    pub match_count_mmhills: Option<u32>,
    pub species_list_embl: Vec<String>,
    pub species_list_mmhills: Vec<String>,
    pub sequence_type: SequenceType,
    /// `None` until the contamination classifier has run.
    pub bias: Option<Bias>,
    pub degraded: bool,
}

impl Motu {
    /// A bare MOTU with no taxonomy, mostly useful for building tables by hand.
    pub fn new(id: impl Into<String>, best_identity_embl: Option<f64>, best_identity_mmhills: Option<f64>) -> Self {
        Motu {
            id: id.into(),
            count: 0,
            best_identity_embl,
            best_identity_mmhills,
            family_name: String::new(),
            genus_name: String::new(),
            species_name: String::new(),
            scientific_name: String::new(),
            rank: String::new(),
            seq_length: None,
            sequence: String::new(),
            match_count_embl: None,
            match_count_mmhills: None,
            species_list_embl: Vec::new(),
            species_list_mmhills: Vec::new(),
            sequence_type: SequenceType::Unknown,
            bias: None,
            degraded: false,
        }
    }

    /// Derive `sequence_type` and `degraded` from the identity scores.
    pub fn annotate(&mut self, identity_cutoff: f64, degraded_identity: f64) {
        self.sequence_type =
            SequenceType::from_identities(self.best_identity_embl, self.best_identity_mmhills, identity_cutoff);
        self.degraded = match self.best_identity() {
            Some(best) => best < degraded_identity,
            None => true,
        };
    }

    /// Highest identity against either database.
    pub fn best_identity(&self) -> Option<f64> {
        match (self.best_identity_embl, self.best_identity_mmhills) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Poorly identified against both databases at once.
    pub fn is_unidentified(&self) -> bool {
        self.sequence_type == SequenceType::Unknown
    }
}
