//! Sequence modalities supported by the encoder.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::UmeError;

/// A category of biological/chemical sequence data.
///
/// The set is closed and defined once; `Coordinates3d` is reserved for
/// future structure inputs and has no tokenizer, so it never reaches a
/// loss path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    /// Protein sequences (one letter per residue).
    AminoAcid,
    /// DNA/RNA sequences.
    Nucleotide,
    /// SMILES strings for small molecules.
    #[serde(rename = "SMILES")]
    Smiles,
    /// 3D coordinate tokens. Reserved, unused in loss paths.
    #[serde(rename = "3d_coordinates")]
    Coordinates3d,
}

impl Modality {
    /// All modalities, including reserved ones.
    pub const ALL: [Modality; 4] = [
        Modality::AminoAcid,
        Modality::Nucleotide,
        Modality::Smiles,
        Modality::Coordinates3d,
    ];

    /// Modalities with a tokenizer, in registry order.
    ///
    /// This order is load-bearing: vocabulary id ranges are assigned in
    /// this order and duplicate ids merge last-writer-wins in this order.
    pub const TOKENIZED: [Modality; 3] =
        [Modality::AminoAcid, Modality::Smiles, Modality::Nucleotide];

    /// Canonical string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::AminoAcid => "amino_acid",
            Modality::Nucleotide => "nucleotide",
            Modality::Smiles => "SMILES",
            Modality::Coordinates3d => "3d_coordinates",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modality {
    type Err = UmeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "amino_acid" => Ok(Modality::AminoAcid),
            "nucleotide" => Ok(Modality::Nucleotide),
            "SMILES" => Ok(Modality::Smiles),
            "3d_coordinates" => Ok(Modality::Coordinates3d),
            other => Err(UmeError::UnknownModality(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_canonical_strings() {
        for modality in Modality::ALL {
            let parsed: Modality = modality.as_str().parse().unwrap();
            assert_eq!(parsed, modality);
        }
    }

    #[test]
    fn rejects_unknown_modality() {
        let err = "protein".parse::<Modality>().unwrap_err();
        assert!(matches!(err, UmeError::UnknownModality(_)));
    }

    #[test]
    fn tokenized_excludes_coordinates() {
        assert!(!Modality::TOKENIZED.contains(&Modality::Coordinates3d));
    }
}
