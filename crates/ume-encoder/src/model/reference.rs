//! Deterministic reference backbone.
//!
//! An embedding-table model with a tied decoder: latents are embedding
//! rows, logits are similarities against the same table. Deterministic
//! given a seed, differentiable through candle's autograd, and cheap
//! enough for tests — a stand-in for the real transformer backbone
//! behind the same [`MaskedLmBackbone`] seam.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use candle_core::{Device, Tensor, Var};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::PaddingMode;
use crate::error::{UmeError, UmeResult};
use crate::model::MaskedLmBackbone;
use crate::training::MLM_IGNORE_INDEX;

const EMBEDDINGS_TENSOR_NAME: &str = "embeddings";

/// Construction parameters for [`ReferenceBackbone`].
#[derive(Debug, Clone)]
pub struct ReferenceBackboneConfig {
    /// Embedding-table rows; must cover every id a tokenizer can emit.
    pub vocab_size: usize,
    /// Latent dimension.
    pub hidden_size: usize,
    /// Token stream layout.
    pub padding: PaddingMode,
    /// Fraction of maskable tokens replaced by the mask token.
    pub mask_percentage: f64,
    /// Id the masking strategy substitutes.
    pub mask_token_id: u32,
    /// Ids below this are special/reserved and never masked.
    pub first_maskable_id: u32,
    /// Seed for the masking RNG.
    pub seed: u64,
}

/// Embedding-table backbone with tied decoder.
#[derive(Debug)]
pub struct ReferenceBackbone {
    config: ReferenceBackboneConfig,
    embeddings: Var,
    device: Device,
    rng: Mutex<StdRng>,
}

impl ReferenceBackbone {
    /// Create with a deterministic Xavier-scaled initialization.
    pub fn new(config: ReferenceBackboneConfig, device: &Device) -> UmeResult<Self> {
        if config.vocab_size == 0 || config.hidden_size == 0 {
            return Err(UmeError::InvalidInput(
                "backbone dimensions must be positive".into(),
            ));
        }

        let std = (2.0 / (config.vocab_size + config.hidden_size) as f64).sqrt() as f32;
        let data: Vec<f32> = (0..config.vocab_size * config.hidden_size)
            .map(|i| ((i as f32 * 0.618_034 + 0.5) % 1.0 * 2.0 - 1.0) * std)
            .collect();
        let table =
            Tensor::from_slice(&data, (config.vocab_size, config.hidden_size), device)?;
        let embeddings = Var::from_tensor(&table)?;
        let rng = Mutex::new(StdRng::seed_from_u64(config.seed));

        Ok(Self { config, embeddings, device: device.clone(), rng })
    }

    /// Load the embedding table from a safetensors checkpoint.
    ///
    /// A missing or mis-shaped tensor is reported as checkpoint
    /// corruption.
    pub fn from_safetensors(
        config: ReferenceBackboneConfig,
        device: &Device,
        path: &Path,
    ) -> UmeResult<Self> {
        let tensors = candle_core::safetensors::load(path, device)
            .map_err(|e| UmeError::Checkpoint(format!("{}: {e}", path.display())))?;
        let table = tensors.get(EMBEDDINGS_TENSOR_NAME).ok_or_else(|| {
            UmeError::Checkpoint(format!(
                "{}: missing tensor '{EMBEDDINGS_TENSOR_NAME}'",
                path.display()
            ))
        })?;

        let expected = (config.vocab_size, config.hidden_size);
        let actual = table.dims2().map_err(|e| {
            UmeError::Checkpoint(format!("{}: {e}", path.display()))
        })?;
        if actual != expected {
            return Err(UmeError::Checkpoint(format!(
                "{}: embedding table is {actual:?}, expected {expected:?}",
                path.display()
            )));
        }

        let embeddings = Var::from_tensor(table)?;
        let rng = Mutex::new(StdRng::seed_from_u64(config.seed));
        Ok(Self { config, embeddings, device: device.clone(), rng })
    }

    /// Persist the embedding table as safetensors.
    pub fn save(&self, path: &Path) -> UmeResult<()> {
        let mut tensors = HashMap::new();
        tensors
            .insert(EMBEDDINGS_TENSOR_NAME.to_string(), self.embeddings.as_tensor().clone());
        candle_core::safetensors::save(&tensors, path)?;
        Ok(())
    }

    /// The embedding-table parameter.
    pub fn embedding_weights(&self) -> &Var {
        &self.embeddings
    }

    fn lookup(&self, input_ids: &Tensor) -> UmeResult<Tensor> {
        let flat_ids = input_ids.flatten_all()?;
        let latents = self.embeddings.index_select(&flat_ids, 0)?;

        match self.config.padding {
            PaddingMode::Unpadded => Ok(latents),
            PaddingMode::Padded => {
                let dims = input_ids.dims();
                let seq_len = *dims.last().ok_or_else(|| {
                    UmeError::InvalidInput("input_ids has no dimensions".into())
                })?;
                let batch_size = flat_ids.dims1()? / seq_len.max(1);
                Ok(latents.reshape((batch_size, seq_len, self.config.hidden_size))?)
            }
        }
    }
}

impl MaskedLmBackbone for ReferenceBackbone {
    fn hidden_size(&self) -> usize {
        self.config.hidden_size
    }

    fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn padding_mode(&self) -> PaddingMode {
        self.config.padding
    }

    fn parameters(&self) -> Vec<Var> {
        vec![self.embeddings.clone()]
    }

    fn tokens_to_latents(
        &self,
        input_ids: &Tensor,
        _attention_mask: &Tensor,
    ) -> UmeResult<Tensor> {
        self.lookup(input_ids)
    }

    fn mask_inputs(&self, input_ids: &Tensor) -> UmeResult<(Tensor, Tensor)> {
        let dims = input_ids.dims().to_vec();
        let ids: Vec<u32> = input_ids.flatten_all()?.to_vec1()?;

        let mut rng = self
            .rng
            .lock()
            .map_err(|_| UmeError::InvalidInput("masking RNG lock poisoned".into()))?;

        let mut masked = Vec::with_capacity(ids.len());
        let mut labels = Vec::with_capacity(ids.len());
        for &id in &ids {
            let maskable = id >= self.config.first_maskable_id;
            if maskable && rng.gen::<f64>() < self.config.mask_percentage {
                masked.push(self.config.mask_token_id);
                labels.push(id as i64);
            } else {
                masked.push(id);
                labels.push(MLM_IGNORE_INDEX);
            }
        }
        drop(rng);

        let masked = Tensor::from_slice(&masked, dims.as_slice(), &self.device)?;
        let labels = Tensor::from_slice(&labels, dims.as_slice(), &self.device)?;
        Ok((masked, labels))
    }

    fn forward_masked(
        &self,
        masked_input_ids: &Tensor,
        _attention_mask: &Tensor,
    ) -> UmeResult<Tensor> {
        self.lookup(masked_input_ids)
    }

    fn decode(&self, hidden_states: &Tensor) -> UmeResult<Tensor> {
        let hidden = self.config.hidden_size;
        let flat = hidden_states.reshape(((), hidden))?;
        // Tied decoder: similarity against the embedding table.
        Ok(flat.matmul(&self.embeddings.t()?)?)
    }
}
