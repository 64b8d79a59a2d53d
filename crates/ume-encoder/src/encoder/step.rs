//! Step dispatch and loss composition.
//!
//! One step routes a batch through the table below, computes the losses
//! the configuration asks for, blends them under the contrastive weight,
//! and updates per-modality perplexity exactly once per present modality.
//!
//! | objective | views | action |
//! |---|---|---|
//! | none | 1 | MLM loss |
//! | none | >1 | error |
//! | symile / clip / disco_clip | 1 | error |
//! | symile | >=2 | split, Symile step |
//! | clip / disco_clip | 2 | split, InfoNCE step |
//! | clip / disco_clip | !=2 | error |
//!
//! Every invalid combination fails immediately; there is no fallback
//! averaging across mismatched view counts.

use candle_core::{DType, Tensor};

use crate::batch::EncodedBatch;
use crate::encoder::UmeEncoder;
use crate::error::{UmeError, UmeResult};
use crate::modality::Modality;
use crate::training::{masked_cross_entropy, ContrastiveObjective, Stage};

impl UmeEncoder {
    /// Route one batch to the loss computation its shape and the
    /// configured objective select.
    pub(crate) fn delegate_step(
        &mut self,
        batch: &EncodedBatch,
        stage: Stage,
    ) -> UmeResult<Tensor> {
        if batch.input_ids().rank() != 3 {
            return Err(UmeError::InvalidInput(format!(
                "batch must have shape (batch, views, seq_len), got {:?}",
                batch.input_ids().dims()
            )));
        }
        let num_views = batch.num_views();
        if num_views == 0 {
            return Err(UmeError::InvalidInput("number of views must be positive".into()));
        }

        match (self.config.contrastive_loss_type, num_views) {
            (ContrastiveObjective::None, 1) => self.compute_mlm_loss(batch, stage),
            (ContrastiveObjective::None, views) => Err(UmeError::InvalidInput(format!(
                "contrastive loss type is none but batch has {views} views"
            ))),
            (objective, 1) => Err(UmeError::InvalidInput(format!(
                "contrastive loss type is {objective} but batch has a single view"
            ))),
            (ContrastiveObjective::Symile, views) => {
                let split = batch.split_views()?;
                // Unreachable behind the single-view arm; kept as a guard
                // so this arm stands alone.
                if views < 2 {
                    return Err(UmeError::InvalidInput(
                        "symile loss requires at least 2 views".into(),
                    ));
                }
                self.symile_step(&split, stage)
            }
            (ContrastiveObjective::Clip | ContrastiveObjective::DiscoClip, 2) => {
                let split = batch.split_views()?;
                self.infonce_step(&split[0], &split[1], stage)
            }
            (ContrastiveObjective::Clip | ContrastiveObjective::DiscoClip, views) => {
                Err(UmeError::InvalidInput(format!(
                    "InfoNCE loss requires exactly 2 views, got {views}"
                )))
            }
        }
    }

    /// InfoNCE step with optional MLM mixing.
    fn infonce_step(
        &mut self,
        batch_a: &EncodedBatch,
        batch_b: &EncodedBatch,
        stage: Stage,
    ) -> UmeResult<Tensor> {
        let weight = self.config.contrastive_loss_weight;

        let contrastive_loss = if weight > 0.0 {
            self.compute_infonce_loss(batch_a, batch_b)?
        } else {
            self.zero_scalar()?
        };

        let mlm_loss = if weight != 1.0 {
            self.compute_mlm_loss(batch_a, stage)?
        } else {
            self.zero_scalar()?
        };

        self.compose_weighted(mlm_loss, contrastive_loss, stage)
    }

    /// Symile step over all split views with optional MLM mixing.
    fn symile_step(&mut self, views: &[EncodedBatch], stage: Stage) -> UmeResult<Tensor> {
        let weight = self.config.contrastive_loss_weight;

        let contrastive_loss = if weight > 0.0 {
            self.compute_symile_loss(views, stage)?
        } else {
            self.zero_scalar()?
        };

        let mlm_loss = if weight != 1.0 {
            self.compute_mlm_loss(&views[0], stage)?
        } else {
            self.zero_scalar()?
        };

        self.compose_weighted(mlm_loss, contrastive_loss, stage)
    }

    /// Contrastive loss between two single-view batches.
    fn compute_infonce_loss(
        &self,
        batch_a: &EncodedBatch,
        batch_b: &EncodedBatch,
    ) -> UmeResult<Tensor> {
        let embeddings_a = self.embed(batch_a, true)?;
        let embeddings_b = self.embed(batch_b, true)?;

        let expected = (batch_a.batch_size(), self.backbone.hidden_size());
        if embeddings_a.dims() != embeddings_b.dims()
            || embeddings_a.dtype() != embeddings_b.dtype()
            || embeddings_a.dims2()? != expected
        {
            return Err(UmeError::ShapeMismatch {
                expected: format!("{expected:?} for both views"),
                actual: format!(
                    "{:?} ({:?}) vs {:?} ({:?})",
                    embeddings_a.dims(),
                    embeddings_a.dtype(),
                    embeddings_b.dims(),
                    embeddings_b.dtype()
                ),
            });
        }

        self.infonce.forward(&embeddings_a, &embeddings_b)
    }

    /// Symile loss over N single-view batches.
    fn compute_symile_loss(
        &mut self,
        views: &[EncodedBatch],
        stage: Stage,
    ) -> UmeResult<Tensor> {
        let embeddings = views
            .iter()
            .map(|view| self.embed(view, true))
            .collect::<UmeResult<Vec<_>>>()?;

        let loss = self.symile.forward(&embeddings)?;
        self.log_named(&format!("symile_{}_loss", stage.as_str()), &loss)?;
        Ok(loss)
    }

    /// Masked-language-model loss for a single-view batch, updating the
    /// overall and per-modality perplexity metrics.
    fn compute_mlm_loss(&mut self, batch: &EncodedBatch, stage: Stage) -> UmeResult<Tensor> {
        let (masked_input_ids, labels) = self.backbone.mask_inputs(batch.input_ids())?;
        let hidden_states =
            self.backbone.forward_masked(&masked_input_ids, batch.attention_mask())?;
        let logits = self.backbone.decode(&hidden_states)?;
        let labels = labels.flatten_all()?;

        let loss = masked_cross_entropy(&logits, &labels)?;

        let perplexity = loss.exp()?;
        self.log_named(&format!("{}_perplexity", stage.as_str()), &perplexity)?;

        let modalities = batch.view_modalities()?;
        self.update_modality_metrics(&logits, &labels, &modalities, stage)?;

        Ok(loss)
    }

    /// Weighted blend of the two loss families.
    ///
    /// Both component losses are always logged, a skipped branch as its
    /// neutral zero.
    fn compose_weighted(
        &mut self,
        mlm_loss: Tensor,
        contrastive_loss: Tensor,
        stage: Stage,
    ) -> UmeResult<Tensor> {
        let weight = self.config.contrastive_loss_weight;

        self.log_named(&format!("mlm_{}_loss", stage.as_str()), &mlm_loss)?;
        self.log_named(&format!("contrastive_{}_loss", stage.as_str()), &contrastive_loss)?;

        let total = mlm_loss
            .affine(1.0 - weight, 0.0)?
            .add(&contrastive_loss.affine(weight, 0.0)?)?;
        self.log_named(&format!("{}_loss", stage.as_str()), &total)?;

        Ok(total)
    }

    /// Update the running perplexity of each modality present in the
    /// batch over only its rows, and emit `{stage}_perplexity/{modality}`.
    fn update_modality_metrics(
        &mut self,
        logits: &Tensor,
        labels: &Tensor,
        modalities: &[Modality],
        stage: Stage,
    ) -> UmeResult<()> {
        let batch_size = modalities.len();
        if batch_size == 0 {
            return Ok(());
        }

        // Metric bookkeeping must not extend the autograd graph.
        let logits = logits.detach();

        let (total_tokens, vocab) = logits.dims2()?;
        if total_tokens % batch_size != 0 {
            return Err(UmeError::ShapeMismatch {
                expected: format!("a multiple of {batch_size} token rows"),
                actual: format!("{total_tokens}"),
            });
        }
        let seq_len = total_tokens / batch_size;
        let logits_by_example = logits.reshape((batch_size, seq_len, vocab))?;
        let labels_by_example = labels.reshape((batch_size, seq_len))?;

        let mut present: Vec<Modality> = Vec::new();
        for modality in modalities {
            if !present.contains(modality) {
                present.push(*modality);
            }
        }

        for modality in present {
            let rows: Vec<u32> = modalities
                .iter()
                .enumerate()
                .filter(|(_, m)| **m == modality)
                .map(|(i, _)| i as u32)
                .collect();
            if rows.is_empty() {
                continue;
            }

            let row_idx = Tensor::from_slice(&rows, (rows.len(),), logits.device())?;
            let modality_logits =
                logits_by_example.index_select(&row_idx, 0)?.reshape(((), vocab))?;
            let modality_labels = labels_by_example.index_select(&row_idx, 0)?.flatten_all()?;

            let metric = self.perplexity.get_mut(stage, modality);
            metric.update(&modality_logits, &modality_labels)?;
            let value = metric.compute();

            let name = format!("{}_perplexity/{}", stage.as_str(), modality.as_str());
            self.logger.log(&name, value);
        }

        Ok(())
    }

    /// Zero scalar standing in for a skipped loss branch.
    fn zero_scalar(&self) -> UmeResult<Tensor> {
        Ok(Tensor::zeros((), DType::F32, self.backbone.device())?)
    }

    /// Log a scalar tensor under a metric name.
    pub(crate) fn log_scalar(&self, name: &str, value: &Tensor) -> UmeResult<()> {
        self.log_named(name, value)
    }

    fn log_named(&self, name: &str, value: &Tensor) -> UmeResult<()> {
        let scalar = value
            .flatten_all()?
            .to_vec1::<f32>()?
            .first()
            .copied()
            .ok_or_else(|| UmeError::InvalidInput(format!("metric {name} has no value")))?;
        self.logger.log(name, scalar);
        Ok(())
    }
}
