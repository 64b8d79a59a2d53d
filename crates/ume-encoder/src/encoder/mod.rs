//! Universal Molecular Encoder.
//!
//! A light wrapper around a [`MaskedLmBackbone`] with high-level
//! functions for molecular encoding across modalities: tokenize-and-embed
//! helpers, freeze/unfreeze state, the merged vocabulary, and the
//! training/validation step dispatch.
//!
//! # Concurrency
//!
//! Steps mutate the per-(stage, modality) perplexity accumulators, so the
//! step API takes `&mut self`; the caller serializes access. Embedding
//! extraction is read-only.
//!
//! # Example
//!
//! ```rust,no_run
//! use ume_encoder::{EncoderConfig, Modality, UmeEncoder};
//!
//! let encoder = UmeEncoder::new(EncoderConfig::default())?;
//! let embeddings = encoder.embed_sequences(
//!     &["MKTVRQERLKSIVRILERSKEPVSGAQLAEELSVSRQVIVQDIAYLRSLGYNIVATPRGYVLAGG"],
//!     Modality::AminoAcid,
//!     true,
//! )?;
//! assert_eq!(embeddings.dims(), &[1, encoder.embedding_dim()]);
//! # Ok::<(), ume_encoder::UmeError>(())
//! ```

mod step;

use std::collections::BTreeMap;
use std::path::Path;

use candle_core::{Device, Tensor};

use crate::batch::EncodedBatch;
use crate::checkpoint::{
    self, load_checkpoint_with_retry, DEFAULT_CACHE_DIR, MAX_LOAD_ATTEMPTS,
};
use crate::config::{
    resolve_architecture, resolve_device, ArchitectureConfig, EncoderConfig, PaddingMode,
};
use crate::error::{UmeError, UmeResult};
use crate::modality::Modality;
use crate::model::{MaskedLmBackbone, ReferenceBackbone, ReferenceBackboneConfig};
use crate::tokenization::{ModalityTokenizer, TokenizerRegistry, FIRST_MODALITY_TOKEN_ID};
use crate::training::{
    ContrastiveObjective, InfoNceLoss, MetricLogger, PerplexityBank, Stage, SymileLoss,
    TracingMetricLogger,
};

/// Multi-modal masked-language-model encoder.
pub struct UmeEncoder {
    config: EncoderConfig,
    architecture: ArchitectureConfig,
    tokenizers: TokenizerRegistry,
    backbone: Box<dyn MaskedLmBackbone>,
    infonce: InfoNceLoss,
    symile: SymileLoss,
    perplexity: PerplexityBank,
    logger: Box<dyn MetricLogger>,
    frozen: bool,
}

impl std::fmt::Debug for UmeEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UmeEncoder")
            .field("config", &self.config)
            .field("architecture", &self.architecture)
            .field("frozen", &self.frozen)
            .finish_non_exhaustive()
    }
}

impl UmeEncoder {
    /// Create a fresh encoder on an auto-detected device.
    pub fn new(config: EncoderConfig) -> UmeResult<Self> {
        Self::with_device(config, None)
    }

    /// Create a fresh encoder on a named device (`"cpu"` or `"cuda"`).
    pub fn with_device(config: EncoderConfig, device: Option<&str>) -> UmeResult<Self> {
        config.validate()?;
        let device = resolve_device(device)?;
        let tokenizers = TokenizerRegistry::new(config.max_length)?;
        let architecture = resolve_architecture(&device, config.use_flash_attn, false);

        let backbone = ReferenceBackbone::new(
            Self::backbone_config(&config, &tokenizers, architecture.padding),
            &device,
        )?;
        Self::assemble(config, architecture, tokenizers, Box::new(backbone))
    }

    /// Create an encoder around an existing backbone.
    ///
    /// The architecture reflects the backbone's own layout rather than a
    /// fresh resolution.
    pub fn with_backbone(
        config: EncoderConfig,
        backbone: Box<dyn MaskedLmBackbone>,
    ) -> UmeResult<Self> {
        config.validate()?;
        let tokenizers = TokenizerRegistry::new(config.max_length)?;
        let use_flash_attn =
            config.use_flash_attn.unwrap_or_else(|| backbone.device().is_cuda());
        let architecture = ArchitectureConfig {
            padding: backbone.padding_mode(),
            use_flash_attn,
            use_sdpa_attn_mask: !use_flash_attn,
        };
        Self::assemble(config, architecture, tokenizers, backbone)
    }

    /// Load a pretrained encoder from the checkpoint registry.
    ///
    /// The artifact is staged into `cache_dir` (default `models/ume`) and
    /// loading retries transparently on corruption.
    pub fn from_pretrained(
        model_name: &str,
        device: Option<&str>,
        cache_dir: Option<&Path>,
    ) -> UmeResult<Self> {
        let (file_name, model_size) = checkpoint::resolve_checkpoint(model_name)?;
        let device = resolve_device(device)?;
        let source = checkpoint::source_path(file_name)?;
        let cache_dir = cache_dir.unwrap_or_else(|| Path::new(DEFAULT_CACHE_DIR));
        let local_path = cache_dir.join(file_name);

        let config = EncoderConfig { model_size, ..EncoderConfig::default() };
        config.validate()?;

        load_checkpoint_with_retry(&source, &local_path, MAX_LOAD_ATTEMPTS, |path| {
            let tokenizers = TokenizerRegistry::new(config.max_length)?;
            let architecture = resolve_architecture(&device, config.use_flash_attn, true);
            let backbone = ReferenceBackbone::from_safetensors(
                Self::backbone_config(&config, &tokenizers, architecture.padding),
                &device,
                path,
            )?;
            Self::assemble(config.clone(), architecture, tokenizers, Box::new(backbone))
        })
    }

    /// Replace the metric sink (the default logs through `tracing`).
    pub fn with_metric_logger(mut self, logger: Box<dyn MetricLogger>) -> Self {
        self.logger = logger;
        self
    }

    fn backbone_config(
        config: &EncoderConfig,
        tokenizers: &TokenizerRegistry,
        padding: PaddingMode,
    ) -> ReferenceBackboneConfig {
        ReferenceBackboneConfig {
            vocab_size: tokenizers.vocab_size(),
            hidden_size: config.model_size.hidden_size(),
            padding,
            mask_percentage: config.mask_percentage,
            mask_token_id: tokenizers.mask_token_id(),
            first_maskable_id: FIRST_MODALITY_TOKEN_ID,
            seed: config.seed,
        }
    }

    fn assemble(
        config: EncoderConfig,
        architecture: ArchitectureConfig,
        tokenizers: TokenizerRegistry,
        backbone: Box<dyn MaskedLmBackbone>,
    ) -> UmeResult<Self> {
        let infonce = InfoNceLoss::new(config.contrastive_temperature).with_disco(matches!(
            config.contrastive_loss_type,
            ContrastiveObjective::DiscoClip
        ));
        let symile = SymileLoss::new(config.contrastive_temperature);

        tracing::debug!(
            model_size = %config.model_size,
            hidden = backbone.hidden_size(),
            vocab = backbone.vocab_size(),
            objective = %config.contrastive_loss_type,
            "encoder constructed"
        );

        Ok(Self {
            config,
            architecture,
            tokenizers,
            backbone,
            infonce,
            symile,
            perplexity: PerplexityBank::new(),
            logger: Box::new(TracingMetricLogger),
            frozen: false,
        })
    }

    /// Dimension of aggregated embeddings.
    pub fn embedding_dim(&self) -> usize {
        self.backbone.hidden_size()
    }

    /// Maximum tokenized sequence length.
    pub fn max_length(&self) -> usize {
        self.config.max_length
    }

    /// Resolved architecture configuration.
    pub fn architecture(&self) -> ArchitectureConfig {
        self.architecture
    }

    /// Whether embedding extraction runs gradient-free.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// The backbone behind the encoder.
    pub fn backbone(&self) -> &dyn MaskedLmBackbone {
        self.backbone.as_ref()
    }

    /// Device the encoder computes on.
    pub fn device(&self) -> &Device {
        self.backbone.device()
    }

    /// Supported modality names.
    pub fn modalities(&self) -> Vec<&'static str> {
        self.tokenizers.modalities()
    }

    /// The tokenizer transform for a modality.
    pub fn get_tokenizer(&self, modality: Modality) -> UmeResult<&ModalityTokenizer> {
        self.tokenizers.get(modality)
    }

    /// Running perplexity accumulators.
    pub fn perplexity(&self) -> &PerplexityBank {
        &self.perplexity
    }

    /// Reset a stage's perplexity accumulators (between epochs).
    pub fn reset_metrics(&mut self, stage: Stage) {
        self.perplexity.reset(stage);
    }

    /// Consolidated vocabulary from all tokenizers.
    ///
    /// Sorted by token id, reserved tokens excluded. Token strings are
    /// not unique across modalities: reversing the map loses information,
    /// and duplicate ids merge last-writer-wins.
    pub fn get_vocab(&self) -> BTreeMap<u32, String> {
        self.tokenizers.merged_vocab()
    }

    /// Stop gradient tracking for embedding extraction.
    pub fn freeze(&mut self) {
        self.frozen = true;
        tracing::debug!("encoder frozen");
    }

    /// Restore gradient flow.
    pub fn unfreeze(&mut self) {
        self.frozen = false;
        tracing::debug!("encoder unfrozen");
    }

    /// Embeddings for an encoded single-view batch.
    ///
    /// Multi-view batches must go through
    /// [`EncodedBatch::split_views`] first. With `aggregate` the result
    /// is mean-pooled over the sequence to `[batch, hidden]`; otherwise
    /// `[batch, seq_len, hidden]`, or whatever the backbone supplies when
    /// it has no per-token granularity.
    pub fn embed(&self, batch: &EncodedBatch, aggregate: bool) -> UmeResult<Tensor> {
        let input_ids = batch.input_ids();
        if input_ids.dim(1)? != 1 {
            return Err(UmeError::InvalidInput(format!(
                "input ids must have shape (batch, 1, length), got {:?}",
                input_ids.dims()
            )));
        }

        let latents = self.backbone.tokens_to_latents(input_ids, batch.attention_mask())?;
        let latents = if self.frozen { latents.detach() } else { latents };

        let (batch_size, _, seq_len) = input_ids.dims3()?;
        let latents = match self.backbone.padding_mode() {
            PaddingMode::Unpadded => latents.reshape((batch_size, seq_len, ()))?,
            PaddingMode::Padded => latents,
        };

        if aggregate && latents.rank() == 3 {
            Ok(latents.mean(1)?)
        } else {
            Ok(latents)
        }
    }

    /// Tokenize raw sequences and embed them.
    pub fn embed_sequences(
        &self,
        sequences: &[&str],
        modality: Modality,
        aggregate: bool,
    ) -> UmeResult<Tensor> {
        let transform = self.tokenizers.get(modality)?;
        let batch = transform.transform(sequences, self.backbone.device())?;
        self.embed(&batch, aggregate)
    }

    /// One training step: dispatch, loss composition, metric logging.
    pub fn training_step(&mut self, batch: &EncodedBatch, batch_idx: usize) -> UmeResult<Tensor> {
        let loss = self.delegate_step(batch, Stage::Train)?;
        self.log_scalar("train_loss", &loss)?;
        tracing::trace!(batch_idx, "training step complete");
        Ok(loss)
    }

    /// One validation step.
    pub fn validation_step(
        &mut self,
        batch: &EncodedBatch,
        batch_idx: usize,
    ) -> UmeResult<Tensor> {
        let loss = self.delegate_step(batch, Stage::Val)?;
        self.log_scalar("val_loss", &loss)?;
        tracing::trace!(batch_idx, "validation step complete");
        Ok(loss)
    }
}
