//! Per-modality tokenizer transforms.
//!
//! Each transform wraps a character-level `tokenizers` WordLevel tokenizer
//! defined entirely in code (no vocabulary files): shared special tokens,
//! a reserved filler region, and a per-modality character range. The
//! tokenizer definition is assembled as tokenizer JSON and loaded through
//! `Tokenizer::from_bytes`, which keeps the definition in the format the
//! `tokenizers` crate itself persists.
//!
//! # Vocabulary layout
//!
//! | ids | content |
//! |---|---|
//! | 0..=4 | `<cls>`, `<eos>`, `<pad>`, `<unk>`, `<mask>` (shared) |
//! | 5..=24 | `<reserved_special_token_N>` filler (shared) |
//! | 25.. | per-modality characters, disjoint ranges in registry order |
//!
//! Token strings repeat across modalities at different ids (amino acid
//! `A` vs nucleotide `A`); reversing a merged id→token map therefore
//! loses information.

use std::collections::BTreeMap;

use candle_core::{Device, Tensor};
use serde_json::json;
use tokenizers::Tokenizer;

use crate::batch::EncodedBatch;
use crate::error::{UmeError, UmeResult};
use crate::modality::Modality;

/// Classification token, prepended to every sequence.
pub const CLS_TOKEN: &str = "<cls>";
/// End-of-sequence token, appended to every sequence.
pub const EOS_TOKEN: &str = "<eos>";
/// Padding token.
pub const PAD_TOKEN: &str = "<pad>";
/// Unknown-character token.
pub const UNK_TOKEN: &str = "<unk>";
/// Mask token used by the MLM objective.
pub const MASK_TOKEN: &str = "<mask>";

/// Substring marking reserved filler tokens, excluded from merged vocabs.
pub const RESERVED_TOKEN_MARKER: &str = "reserved";

/// Number of reserved filler tokens between specials and modality ranges.
const NUM_RESERVED_TOKENS: u32 = 20;

/// First id available to modality-specific tokens.
pub const FIRST_MODALITY_TOKEN_ID: u32 = 5 + NUM_RESERVED_TOKENS;

const CLS_TOKEN_ID: u32 = 0;
const EOS_TOKEN_ID: u32 = 1;
const PAD_TOKEN_ID: u32 = 2;
const UNK_TOKEN_ID: u32 = 3;
const MASK_TOKEN_ID: u32 = 4;

const SPECIAL_TOKENS: [(&str, u32); 5] = [
    (CLS_TOKEN, CLS_TOKEN_ID),
    (EOS_TOKEN, EOS_TOKEN_ID),
    (PAD_TOKEN, PAD_TOKEN_ID),
    (UNK_TOKEN, UNK_TOKEN_ID),
    (MASK_TOKEN, MASK_TOKEN_ID),
];

/// Character alphabet for a tokenized modality.
fn alphabet(modality: Modality) -> Option<&'static str> {
    match modality {
        // 20 canonical residues plus ambiguity codes and stop.
        Modality::AminoAcid => Some("ACDEFGHIKLMNPQRSTVWYBXZJUO*"),
        // Organic subset elements, aromatics, ring/bond/branch syntax.
        Modality::Smiles => Some("CNOPSFIBHcnops()[]=#+-./\\@%0123456789lr"),
        Modality::Nucleotide => Some("ACGTUN"),
        Modality::Coordinates3d => None,
    }
}

/// Start id of a modality's character range (registry order).
fn range_start(modality: Modality) -> UmeResult<u32> {
    let mut start = FIRST_MODALITY_TOKEN_ID;
    for candidate in Modality::TOKENIZED {
        if candidate == modality {
            return Ok(start);
        }
        let chars = alphabet(candidate).ok_or_else(|| {
            UmeError::Tokenization(format!("modality {candidate} has no tokenizer"))
        })?;
        start += chars.chars().count() as u32;
    }
    Err(UmeError::Tokenization(format!("modality {modality} has no tokenizer")))
}

/// Full token→id vocabulary for a modality's tokenizer.
fn build_vocab(modality: Modality) -> UmeResult<BTreeMap<String, u32>> {
    let chars = alphabet(modality)
        .ok_or_else(|| UmeError::Tokenization(format!("modality {modality} has no tokenizer")))?;
    let start = range_start(modality)?;

    let mut vocab = BTreeMap::new();
    for (token, id) in SPECIAL_TOKENS {
        vocab.insert(token.to_string(), id);
    }
    for i in 0..NUM_RESERVED_TOKENS {
        vocab.insert(format!("<reserved_special_token_{i}>"), 5 + i);
    }
    for (i, ch) in chars.chars().enumerate() {
        vocab.insert(ch.to_string(), start + i as u32);
    }
    Ok(vocab)
}

/// Tokenizer transform for one modality.
///
/// `transform` produces single-view [`EncodedBatch`]es padded to the
/// longest sequence in the batch (special tokens included) and truncated
/// to `max_length`.
pub struct ModalityTokenizer {
    modality: Modality,
    tokenizer: Tokenizer,
    vocab: BTreeMap<String, u32>,
    max_length: usize,
}

impl ModalityTokenizer {
    /// Build the transform for a modality.
    pub fn new(modality: Modality, max_length: usize) -> UmeResult<Self> {
        let vocab = build_vocab(modality)?;
        let definition = tokenizer_definition(&vocab, max_length);
        let bytes = serde_json::to_vec(&definition)
            .map_err(|e| UmeError::Tokenization(format!("tokenizer definition: {e}")))?;
        let tokenizer = Tokenizer::from_bytes(&bytes)
            .map_err(|e| UmeError::Tokenization(format!("tokenizer construction: {e}")))?;

        Ok(Self { modality, tokenizer, vocab, max_length })
    }

    /// The modality this transform encodes.
    pub fn modality(&self) -> Modality {
        self.modality
    }

    /// Maximum sequence length, special tokens included.
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Token→id vocabulary of this tokenizer.
    pub fn vocab(&self) -> &BTreeMap<String, u32> {
        &self.vocab
    }

    /// Id of the padding token.
    pub fn pad_token_id(&self) -> u32 {
        PAD_TOKEN_ID
    }

    /// Id of the mask token.
    pub fn mask_token_id(&self) -> u32 {
        MASK_TOKEN_ID
    }

    /// Id of the classification token.
    pub fn cls_token_id(&self) -> u32 {
        CLS_TOKEN_ID
    }

    /// Id of the end-of-sequence token.
    pub fn eos_token_id(&self) -> u32 {
        EOS_TOKEN_ID
    }

    /// Tokenize raw sequences into a single-view batch on `device`.
    pub fn transform(&self, sequences: &[&str], device: &Device) -> UmeResult<EncodedBatch> {
        if sequences.is_empty() {
            return Err(UmeError::InvalidInput("cannot tokenize an empty sequence list".into()));
        }

        let encodings = self
            .tokenizer
            .encode_batch(sequences.to_vec(), true)
            .map_err(|e| UmeError::Tokenization(e.to_string()))?;

        let batch_size = encodings.len();
        let seq_len = encodings.iter().map(|e| e.get_ids().len()).max().unwrap_or(0);
        if seq_len == 0 {
            return Err(UmeError::Tokenization("tokenizer produced empty encodings".into()));
        }

        let mut ids = Vec::with_capacity(batch_size * seq_len);
        let mut mask = Vec::with_capacity(batch_size * seq_len);
        for encoding in &encodings {
            if encoding.get_ids().len() != seq_len {
                return Err(UmeError::ShapeMismatch {
                    expected: format!("padded length {seq_len}"),
                    actual: format!("{}", encoding.get_ids().len()),
                });
            }
            ids.extend_from_slice(encoding.get_ids());
            mask.extend_from_slice(encoding.get_attention_mask());
        }

        let input_ids = Tensor::from_slice(&ids, (batch_size, 1, seq_len), device)?;
        let attention_mask = Tensor::from_slice(&mask, (batch_size, 1, seq_len), device)?;
        let modalities = vec![vec![self.modality]; batch_size];

        EncodedBatch::new(input_ids, attention_mask, modalities)
    }
}

/// Tokenizer JSON definition: WordLevel over single characters, `<cls>
/// … <eos>` template, batch-longest padding, truncation to `max_length`.
fn tokenizer_definition(vocab: &BTreeMap<String, u32>, max_length: usize) -> serde_json::Value {
    let added_tokens: Vec<serde_json::Value> = SPECIAL_TOKENS
        .iter()
        .map(|(token, id)| {
            json!({
                "id": id,
                "content": token,
                "single_word": false,
                "lstrip": false,
                "rstrip": false,
                "normalized": false,
                "special": true,
            })
        })
        .collect();

    json!({
        "version": "1.0",
        "truncation": {
            "direction": "Right",
            "max_length": max_length,
            "strategy": "LongestFirst",
            "stride": 0,
        },
        "padding": {
            "strategy": "BatchLongest",
            "direction": "Right",
            "pad_to_multiple_of": null,
            "pad_id": PAD_TOKEN_ID,
            "pad_type_id": 0,
            "pad_token": PAD_TOKEN,
        },
        "added_tokens": added_tokens,
        "normalizer": null,
        "pre_tokenizer": {
            "type": "Split",
            "pattern": { "Regex": "." },
            "behavior": "Isolated",
            "invert": false,
        },
        "post_processor": {
            "type": "TemplateProcessing",
            "single": [
                { "SpecialToken": { "id": CLS_TOKEN, "type_id": 0 } },
                { "Sequence": { "id": "A", "type_id": 0 } },
                { "SpecialToken": { "id": EOS_TOKEN, "type_id": 0 } },
            ],
            "pair": [
                { "SpecialToken": { "id": CLS_TOKEN, "type_id": 0 } },
                { "Sequence": { "id": "A", "type_id": 0 } },
                { "SpecialToken": { "id": EOS_TOKEN, "type_id": 0 } },
                { "Sequence": { "id": "B", "type_id": 1 } },
                { "SpecialToken": { "id": EOS_TOKEN, "type_id": 1 } },
            ],
            "special_tokens": {
                CLS_TOKEN: { "id": CLS_TOKEN, "ids": [CLS_TOKEN_ID], "tokens": [CLS_TOKEN] },
                EOS_TOKEN: { "id": EOS_TOKEN, "ids": [EOS_TOKEN_ID], "tokens": [EOS_TOKEN] },
            },
        },
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": vocab,
            "unk_token": UNK_TOKEN,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modality_ranges_are_disjoint() {
        let aa = range_start(Modality::AminoAcid).unwrap();
        let smiles = range_start(Modality::Smiles).unwrap();
        let nt = range_start(Modality::Nucleotide).unwrap();

        assert_eq!(aa, FIRST_MODALITY_TOKEN_ID);
        let aa_len = alphabet(Modality::AminoAcid).unwrap().chars().count() as u32;
        assert_eq!(smiles, aa + aa_len);
        let smiles_len = alphabet(Modality::Smiles).unwrap().chars().count() as u32;
        assert_eq!(nt, smiles + smiles_len);
    }

    #[test]
    fn coordinates_have_no_tokenizer() {
        assert!(ModalityTokenizer::new(Modality::Coordinates3d, 16).is_err());
    }

    #[test]
    fn encodes_with_special_tokens_and_padding() {
        let tokenizer = ModalityTokenizer::new(Modality::AminoAcid, 32).unwrap();
        let batch = tokenizer.transform(&["MKT", "A"], &Device::Cpu).unwrap();

        // Longest sequence (3 residues) plus <cls> and <eos>.
        assert_eq!(batch.input_ids().dims(), &[2, 1, 5]);

        let ids: Vec<Vec<Vec<u32>>> = batch.input_ids().to_vec3().unwrap();
        assert_eq!(ids[0][0][0], CLS_TOKEN_ID);
        assert_eq!(ids[0][0][4], EOS_TOKEN_ID);
        // "A" row: <cls> A <eos> <pad> <pad>
        assert_eq!(ids[1][0][3], PAD_TOKEN_ID);
        assert_eq!(ids[1][0][4], PAD_TOKEN_ID);

        let mask: Vec<Vec<Vec<u32>>> = batch.attention_mask().to_vec3().unwrap();
        assert_eq!(mask[0][0], vec![1, 1, 1, 1, 1]);
        assert_eq!(mask[1][0], vec![1, 1, 1, 0, 0]);
    }

    #[test]
    fn unknown_characters_map_to_unk() {
        let tokenizer = ModalityTokenizer::new(Modality::Nucleotide, 16).unwrap();
        let batch = tokenizer.transform(&["AQG"], &Device::Cpu).unwrap();

        let ids: Vec<Vec<Vec<u32>>> = batch.input_ids().to_vec3().unwrap();
        // Q is not a nucleotide.
        assert_eq!(ids[0][0][2], UNK_TOKEN_ID);
    }

    #[test]
    fn truncates_to_max_length() {
        let tokenizer = ModalityTokenizer::new(Modality::AminoAcid, 6).unwrap();
        let batch = tokenizer.transform(&["MKTVRQERLK"], &Device::Cpu).unwrap();
        assert_eq!(batch.seq_len(), 6);
    }

    #[test]
    fn same_character_has_different_ids_across_modalities() {
        let aa = ModalityTokenizer::new(Modality::AminoAcid, 16).unwrap();
        let nt = ModalityTokenizer::new(Modality::Nucleotide, 16).unwrap();
        assert_ne!(aa.vocab().get("A"), nt.vocab().get("A"));
    }

    #[test]
    fn rejects_empty_sequence_list() {
        let tokenizer = ModalityTokenizer::new(Modality::Smiles, 16).unwrap();
        assert!(tokenizer.transform(&[], &Device::Cpu).is_err());
    }
}
