//! Genotype code decoding and phase continuity.

use crate::storage::{SampleGenotype, SampleId};
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};

/// Rendering options for decoded genotypes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeOptions {
    pub unknown: String,
    pub unphased_separator: String,
    pub phased_separator: String,
    /// Write homozygous calls as every allele instead of a single one.
    pub expand_homozygotes: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            unknown: "-".to_string(),
            unphased_separator: "/".to_string(),
            phased_separator: "|".to_string(),
            expand_homozygotes: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedGenotype {
    Unknown,
    /// Every allele is identical and expansion is off.
    Collapsed(String),
    Alleles { alleles: Vec<String>, phased: bool },
}

/// Last phase-group tag seen for each sample during one export.
#[derive(Debug, Default)]
pub struct PhaseState {
    previous: HashMap<SampleId, Option<String>>,
}

impl PhaseState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `tag` continues the phase group of the sample's previous call.
    pub fn is_continued(&self, sample: SampleId, tag: Option<&str>) -> bool {
        match (tag, self.previous.get(&sample)) {
            (Some(tag), Some(Some(previous))) => tag == previous,
            _ => false,
        }
    }

    pub fn record(&mut self, sample: SampleId, tag: Option<&str>) {
        self.previous.insert(sample, tag.map(str::to_string));
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenotypeDecoder {
    options: DecodeOptions,
}

impl GenotypeDecoder {
    pub fn new(options: DecodeOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }

    /// Resolves `code` against the allele dictionary.
    ///
    /// Indices may be separated by `/` or `|`. A code referencing an index
    /// outside the dictionary is an error.
    pub fn decode(&self, code: &str, alleles: &[String], phased: bool) -> Result<DecodedGenotype> {
        let code = code.trim();
        if code.is_empty() {
            return Ok(DecodedGenotype::Unknown);
        }

        let resolved = code
            .split(['/', '|'])
            .map(|part| {
                part.trim()
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| alleles.get(index))
                    .cloned()
                    .ok_or_else(|| {
                        Error::Fatal(format!(
                            "genotype code {} does not match {} known alleles",
                            code,
                            alleles.len()
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let distinct: HashSet<&String> = resolved.iter().collect();
        if distinct.len() == 1 && !self.options.expand_homozygotes {
            return Ok(DecodedGenotype::Collapsed(resolved[0].clone()));
        }

        Ok(DecodedGenotype::Alleles {
            alleles: resolved,
            phased,
        })
    }

    pub fn render(&self, genotype: &DecodedGenotype) -> String {
        match genotype {
            DecodedGenotype::Unknown => self.options.unknown.clone(),
            DecodedGenotype::Collapsed(allele) => allele.clone(),
            DecodedGenotype::Alleles { alleles, phased } => {
                let separator = if *phased {
                    &self.options.phased_separator
                } else {
                    &self.options.unphased_separator
                };
                alleles.join(separator)
            }
        }
    }

    /// Decodes one sample's call in export order, updating the phase state.
    pub fn decode_call(
        &self,
        phase: &mut PhaseState,
        sample: SampleId,
        call: &SampleGenotype,
        alleles: &[String],
    ) -> Result<String> {
        let tag = call.phase_group.as_deref();
        let phased = phase.is_continued(sample, tag);
        phase.record(sample, tag);
        let decoded = self.decode(&call.code, alleles, phased)?;
        Ok(self.render(&decoded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict(alleles: &[&str]) -> Vec<String> {
        alleles.iter().map(|a| a.to_string()).collect()
    }

    fn call(code: &str, tag: Option<&str>) -> SampleGenotype {
        SampleGenotype {
            code: code.to_string(),
            phase_group: tag.map(str::to_string),
        }
    }

    #[test]
    fn test_empty_code_is_unknown() {
        let decoder = GenotypeDecoder::default();
        for alleles in [dict(&[]), dict(&["A", "T"])] {
            let decoded = decoder.decode("", &alleles, false).unwrap();
            assert_eq!(decoded, DecodedGenotype::Unknown);
            assert_eq!(decoder.render(&decoded), "-");
        }
    }

    #[test]
    fn test_custom_unknown_token() {
        let decoder = GenotypeDecoder::new(DecodeOptions {
            unknown: "NA".to_string(),
            ..Default::default()
        });
        let decoded = decoder.decode("", &dict(&["A"]), false).unwrap();
        assert_eq!(decoder.render(&decoded), "NA");
    }

    #[test]
    fn test_homozygote_collapsed() {
        let decoder = GenotypeDecoder::default();
        let decoded = decoder.decode("1/1", &dict(&["A", "T"]), false).unwrap();
        assert_eq!(decoded, DecodedGenotype::Collapsed("T".to_string()));
        assert_eq!(decoder.render(&decoded), "T");
    }

    #[test]
    fn test_homozygote_expanded() {
        let decoder = GenotypeDecoder::new(DecodeOptions {
            expand_homozygotes: true,
            ..Default::default()
        });
        let decoded = decoder.decode("1/1", &dict(&["A", "T"]), false).unwrap();
        assert_eq!(decoder.render(&decoded), "T/T");
        let phased = decoder.decode("1/1", &dict(&["A", "T"]), true).unwrap();
        assert_eq!(decoder.render(&phased), "T|T");
    }

    #[test]
    fn test_heterozygote_uses_separator() {
        let decoder = GenotypeDecoder::default();
        let unphased = decoder.decode("0/1", &dict(&["A", "T"]), false).unwrap();
        assert_eq!(decoder.render(&unphased), "A/T");
        let phased = decoder.decode("0|1", &dict(&["A", "T"]), true).unwrap();
        assert_eq!(decoder.render(&phased), "A|T");
    }

    #[test]
    fn test_polyploid_code() {
        let decoder = GenotypeDecoder::default();
        let decoded = decoder
            .decode("0/0/2/1", &dict(&["A", "C", "G"]), false)
            .unwrap();
        assert_eq!(decoder.render(&decoded), "A/A/G/C");
    }

    #[test]
    fn test_out_of_range_index_is_fatal() {
        let decoder = GenotypeDecoder::default();
        assert!(matches!(
            decoder.decode("0/5", &dict(&["A", "T"]), false),
            Err(Error::Fatal(_))
        ));
        assert!(matches!(
            decoder.decode("x/1", &dict(&["A", "T"]), false),
            Err(Error::Fatal(_))
        ));
    }

    #[test]
    fn test_phase_continuity_across_markers() {
        let decoder = GenotypeDecoder::default();
        let alleles = dict(&["A", "T"]);
        let mut phase = PhaseState::new();

        let m1 = decoder
            .decode_call(&mut phase, 1, &call("0/1", Some("a")), &alleles)
            .unwrap();
        let m2 = decoder
            .decode_call(&mut phase, 1, &call("0/1", Some("a")), &alleles)
            .unwrap();
        let m3 = decoder
            .decode_call(&mut phase, 1, &call("0/1", Some("b")), &alleles)
            .unwrap();

        assert_eq!(m1, "A/T");
        assert_eq!(m2, "A|T");
        assert_eq!(m3, "A/T");
    }

    #[test]
    fn test_phase_state_is_per_sample() {
        let decoder = GenotypeDecoder::default();
        let alleles = dict(&["A", "T"]);
        let mut phase = PhaseState::new();

        decoder
            .decode_call(&mut phase, 1, &call("0/1", Some("a")), &alleles)
            .unwrap();
        let other_sample = decoder
            .decode_call(&mut phase, 2, &call("0/1", Some("a")), &alleles)
            .unwrap();
        assert_eq!(other_sample, "A/T");
    }

    #[test]
    fn test_unknown_call_keeps_tag() {
        let decoder = GenotypeDecoder::default();
        let alleles = dict(&["A", "T"]);
        let mut phase = PhaseState::new();

        decoder
            .decode_call(&mut phase, 1, &call("0/1", Some("a")), &alleles)
            .unwrap();
        let missing = decoder
            .decode_call(&mut phase, 1, &call("", Some("a")), &alleles)
            .unwrap();
        let next = decoder
            .decode_call(&mut phase, 1, &call("1/0", Some("a")), &alleles)
            .unwrap();
        assert_eq!(missing, "-");
        assert_eq!(next, "T|A");
    }

    #[test]
    fn test_untagged_call_breaks_phase() {
        let decoder = GenotypeDecoder::default();
        let alleles = dict(&["A", "T"]);
        let mut phase = PhaseState::new();

        decoder
            .decode_call(&mut phase, 1, &call("0/1", Some("a")), &alleles)
            .unwrap();
        decoder
            .decode_call(&mut phase, 1, &call("0/1", None), &alleles)
            .unwrap();
        let after = decoder
            .decode_call(&mut phase, 1, &call("0/1", Some("a")), &alleles)
            .unwrap();
        assert_eq!(after, "A/T");
    }
}
