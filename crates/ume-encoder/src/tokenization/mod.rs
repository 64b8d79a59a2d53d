//! Tokenization: per-modality transforms and the registry.
//!
//! The registry is built once at encoder construction and immutable
//! afterwards. Merging vocabularies across modalities is last-writer-wins
//! on duplicate ids in registry order — a documented sharp edge kept from
//! the vocabulary design, not an accident: the shared special and
//! reserved tokens occupy the same ids in every tokenizer, while modality
//! ranges are disjoint.

mod transform;

pub use transform::{
    ModalityTokenizer, CLS_TOKEN, EOS_TOKEN, FIRST_MODALITY_TOKEN_ID, MASK_TOKEN, PAD_TOKEN,
    RESERVED_TOKEN_MARKER, UNK_TOKEN,
};

use std::collections::BTreeMap;

use crate::error::{UmeError, UmeResult};
use crate::modality::Modality;

/// Fixed mapping from modality to its tokenizer transform.
pub struct TokenizerRegistry {
    transforms: Vec<ModalityTokenizer>,
}

impl TokenizerRegistry {
    /// Build tokenizers for every tokenized modality.
    pub fn new(max_length: usize) -> UmeResult<Self> {
        let transforms = Modality::TOKENIZED
            .iter()
            .map(|&modality| ModalityTokenizer::new(modality, max_length))
            .collect::<UmeResult<Vec<_>>>()?;
        Ok(Self { transforms })
    }

    /// The transform for a modality.
    ///
    /// Reserved modalities without a tokenizer are an error.
    pub fn get(&self, modality: Modality) -> UmeResult<&ModalityTokenizer> {
        self.transforms
            .iter()
            .find(|t| t.modality() == modality)
            .ok_or_else(|| UmeError::UnknownModality(format!("no tokenizer for {modality}")))
    }

    /// Supported modality names, including reserved ones.
    pub fn modalities(&self) -> Vec<&'static str> {
        Modality::ALL.iter().map(|m| m.as_str()).collect()
    }

    /// Consolidated id→token vocabulary across all tokenizers.
    ///
    /// Sorted by token id; tokens containing the reserved marker are
    /// excluded. Duplicate ids are last-writer-wins in registry order,
    /// and the same token string may appear under several ids.
    pub fn merged_vocab(&self) -> BTreeMap<u32, String> {
        let mut merged = BTreeMap::new();
        for transform in &self.transforms {
            for (token, &id) in transform.vocab() {
                if token.contains(RESERVED_TOKEN_MARKER) {
                    continue;
                }
                merged.insert(id, token.clone());
            }
        }
        merged
    }

    /// Embedding-table size covering every id any tokenizer can emit.
    pub fn vocab_size(&self) -> usize {
        self.transforms
            .iter()
            .flat_map(|t| t.vocab().values().copied())
            .max()
            .map(|max_id| max_id as usize + 1)
            .unwrap_or(0)
    }

    /// Padding token id (shared across tokenizers).
    pub fn pad_token_id(&self) -> u32 {
        self.transforms[0].pad_token_id()
    }

    /// Mask token id (shared across tokenizers).
    pub fn mask_token_id(&self) -> u32 {
        self.transforms[0].mask_token_id()
    }
}
