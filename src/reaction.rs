//! PCR reaction records and the identifier grammar they are decoded from.
//!
//! Identifiers look like `12_w_roedeer_A034_98_2_b`:
//! sample number, wild/domestic group, field label, DNA-identified animal,
//! percent identity, primer pair count and replicate letter. Controls replace
//! the sample number with a `PCR*` or `En*` prefix.

use crate::error::{FilterError, Result};
use log::warn;
use std::fmt;

const FIELD_COUNT: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReactionType {
    Sample,
    PcrNeg,
    ExtNeg,
}

impl ReactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReactionType::Sample => "sample",
            ReactionType::PcrNeg => "pcrneg",
            ReactionType::ExtNeg => "extneg",
        }
    }
}

impl fmt::Display for ReactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wild or domestic animal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Wild,
    Domestic,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Wild => "w",
            Origin::Domestic => "d",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Replicate {
    A,
    B,
    C,
}

impl Replicate {
    fn parse(field: &str) -> Option<Self> {
        match field {
            "a" => Some(Replicate::A),
            "b" => Some(Replicate::B),
            "c" => Some(Replicate::C),
            _ => None,
        }
    }

    pub fn letter(&self) -> char {
        match self {
            Replicate::A => 'a',
            Replicate::B => 'b',
            Replicate::C => 'c',
        }
    }
}

/// Anything that can key a row of a [`crate::dataset::Dataset`].
pub trait RowRecord: Clone {
    fn key(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reaction {
    pub name: String,
    pub number: Option<u32>,
    pub origin: Option<Origin>,
    pub label: Option<String>,
    pub animal: Option<String>,
    pub percent_identity: Option<f64>,
    pub primer_pairs: Option<u32>,
    pub replicate: Replicate,
    pub kind: ReactionType,
    /// Below the minimum read depth.
    pub empty_pcr: bool,
    /// Discarded by the replicate-consistency pruner.
    pub non_replicating: bool,
}

impl RowRecord for Reaction {
    fn key(&self) -> &str {
        &self.name
    }
}

fn decode_error(name: &str, reason: impl Into<String>) -> FilterError {
    FilterError::Decode {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn optional_text(field: &str) -> Option<String> {
    let trimmed = field.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("na") || trimmed.eq_ignore_ascii_case("nan") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn optional_number<T: std::str::FromStr>(name: &str, what: &str, field: &str) -> Option<T> {
    let text = optional_text(field)?;
    match text.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Reaction {}: unreadable {} {:?}, treating as missing", name, what, text);
            None
        }
    }
}

impl Reaction {
    /// Decode an encoded reaction identifier.
    ///
    /// Structural problems (field count, leading field, replicate letter) are
    /// fatal. Individual unreadable fields decode to `None`.
    pub fn decode(name: &str) -> Result<Reaction> {
        let fields: Vec<&str> = name.split('_').collect();
        if fields.len() != FIELD_COUNT {
            return Err(decode_error(
                name,
                format!("expected {} '_'-separated fields, found {}", FIELD_COUNT, fields.len()),
            ));
        }

        let (kind, number) = if fields[0].starts_with("PCR") {
            (ReactionType::PcrNeg, None)
        } else if fields[0].starts_with("En") {
            (ReactionType::ExtNeg, None)
        } else {
            let number = fields[0]
                .parse::<u32>()
                .map_err(|_| decode_error(name, format!("unrecognised leading field {:?}", fields[0])))?;
            (ReactionType::Sample, Some(number))
        };

        let origin = match fields[1] {
            "w" => Some(Origin::Wild),
            "d" => Some(Origin::Domestic),
            other => {
                if optional_text(other).is_some() {
                    warn!("Reaction {}: unknown group {:?}, treating as missing", name, other);
                }
                None
            }
        };

        let replicate = Replicate::parse(fields[6])
            .ok_or_else(|| decode_error(name, format!("replicate letter {:?} is not one of a, b, c", fields[6])))?;

        // DNA identification only exists for real samples.
        let (animal, percent_identity, primer_pairs) = if kind == ReactionType::Sample {
            (
                optional_text(fields[3]),
                optional_number::<f64>(name, "percent identity", fields[4]).filter(|v| v.is_finite()),
                optional_number(name, "primer pair count", fields[5]),
            )
        } else {
            (None, None, None)
        };

        Ok(Reaction {
            name: name.to_string(),
            number,
            origin,
            label: optional_text(fields[2]),
            animal,
            percent_identity,
            primer_pairs,
            replicate,
            kind,
            empty_pcr: false,
            non_replicating: false,
        })
    }

    /// Identifier with the trailing replicate letter removed.
    pub fn group_key(&self) -> &str {
        replicate_group_key(&self.name)
    }

    /// Eligible for ordination and merging.
    pub fn is_active_sample(&self) -> bool {
        self.kind == ReactionType::Sample && !self.empty_pcr && !self.non_replicating
    }
}

pub fn replicate_group_key(name: &str) -> &str {
    match name.rsplit_once('_') {
        Some((stem, _)) => stem,
        None => name,
    }
}

/// One biological sample after its replicates were merged.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedSample {
    pub sample: String,
    pub number: Option<u32>,
    pub origin: Option<Origin>,
    pub label: Option<String>,
    pub animal: Option<String>,
    pub percent_identity: Option<f64>,
    pub primer_pairs: Option<u32>,
    pub replicates: usize,
    pub replicate_letters: String,
}

impl RowRecord for MergedSample {
    fn key(&self) -> &str {
        &self.sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_sample() {
        let r = Reaction::decode("12_w_roedeer_A034_98.5_2_b").unwrap();
        assert_eq!(r.kind, ReactionType::Sample);
        assert_eq!(r.number, Some(12));
        assert_eq!(r.origin, Some(Origin::Wild));
        assert_eq!(r.label.as_deref(), Some("roedeer"));
        assert_eq!(r.animal.as_deref(), Some("A034"));
        assert_eq!(r.percent_identity, Some(98.5));
        assert_eq!(r.primer_pairs, Some(2));
        assert_eq!(r.replicate, Replicate::B);
        assert_eq!(r.group_key(), "12_w_roedeer_A034_98.5_2");
        assert!(r.is_active_sample());
    }

    #[test]
    fn controls_never_carry_identification() {
        let r = Reaction::decode("PCR3_d_blank_A001_99_1_a").unwrap();
        assert_eq!(r.kind, ReactionType::PcrNeg);
        assert_eq!(r.number, None);
        assert_eq!(r.animal, None);
        assert_eq!(r.percent_identity, None);
        assert_eq!(r.primer_pairs, None);
        assert!(!r.is_active_sample());

        let r = Reaction::decode("En1_NA_NA_NA_NA_NA_c").unwrap();
        assert_eq!(r.kind, ReactionType::ExtNeg);
        assert_eq!(r.origin, None);
        assert_eq!(r.label, None);
    }

    #[test]
    fn missing_fields_decode_to_none() {
        let r = Reaction::decode("7_x_NA__abc_NA_a").unwrap();
        assert_eq!(r.origin, None);
        assert_eq!(r.label, None);
        assert_eq!(r.animal, None);
        assert_eq!(r.percent_identity, None);
        assert_eq!(r.primer_pairs, None);
    }

    #[test]
    fn nan_and_infinite_identity_are_missing() {
        let r = Reaction::decode("1_w_deer_A1_NaN_2_a").unwrap();
        assert_eq!(r.percent_identity, None);
        assert_eq!(r.animal.as_deref(), Some("A1"));

        let r = Reaction::decode("1_w_deer_A1_inf_nan_b").unwrap();
        assert_eq!(r.percent_identity, None);
        assert_eq!(r.primer_pairs, None);
    }

    #[test]
    fn structural_errors_are_fatal() {
        assert!(Reaction::decode("12_w_roedeer_A034_98_b").is_err());
        assert!(Reaction::decode("X12_w_roedeer_A034_98_2_b").is_err());
        assert!(Reaction::decode("12_w_roedeer_A034_98_2_d").is_err());
    }
}
