//! Tokenized batches and the multi-view splitter.
//!
//! A combined batch carries `[batch, views, seq_len]` token tensors plus a
//! per-example, per-view modality tag. Contrastive paths split it into
//! independent single-view batches; `combine` is the exact inverse, so
//! splitting then recombining reconstructs the original tensors.

use candle_core::Tensor;

use crate::error::{UmeError, UmeResult};
use crate::modality::Modality;

/// A tokenized batch of one or more views per example.
///
/// Invariants (enforced at construction): `input_ids` and
/// `attention_mask` are rank-3 with identical shape, the view count is at
/// least 1, and `modalities` has one tag per `[example][view]`.
#[derive(Debug, Clone)]
pub struct EncodedBatch {
    input_ids: Tensor,
    attention_mask: Tensor,
    modalities: Vec<Vec<Modality>>,
}

impl EncodedBatch {
    /// Build a batch, normalizing rank-2 tensors to rank-3 by inserting a
    /// singleton view dimension.
    pub fn new(
        input_ids: Tensor,
        attention_mask: Tensor,
        modalities: Vec<Vec<Modality>>,
    ) -> UmeResult<Self> {
        let input_ids = normalize_rank(input_ids, "input_ids")?;
        let attention_mask = normalize_rank(attention_mask, "attention_mask")?;

        if input_ids.dims() != attention_mask.dims() {
            return Err(UmeError::ShapeMismatch {
                expected: format!("{:?}", input_ids.dims()),
                actual: format!("{:?}", attention_mask.dims()),
            });
        }

        let (batch_size, num_views, _) = input_ids.dims3()?;
        if num_views == 0 {
            return Err(UmeError::InvalidInput("number of views must be positive".into()));
        }
        if modalities.len() != batch_size {
            return Err(UmeError::InvalidInput(format!(
                "modality tags for {} examples but batch size is {batch_size}",
                modalities.len()
            )));
        }
        for (i, tags) in modalities.iter().enumerate() {
            if tags.len() != num_views {
                return Err(UmeError::InvalidInput(format!(
                    "example {i} has {} modality tags but batch has {num_views} views",
                    tags.len()
                )));
            }
        }

        Ok(Self { input_ids, attention_mask, modalities })
    }

    /// Token ids, `[batch, views, seq_len]`.
    pub fn input_ids(&self) -> &Tensor {
        &self.input_ids
    }

    /// Attention mask, `[batch, views, seq_len]`.
    pub fn attention_mask(&self) -> &Tensor {
        &self.attention_mask
    }

    /// Per-example, per-view modality tags.
    pub fn modalities(&self) -> &[Vec<Modality>] {
        &self.modalities
    }

    /// Number of examples.
    pub fn batch_size(&self) -> usize {
        self.modalities.len()
    }

    /// Number of views per example.
    pub fn num_views(&self) -> usize {
        self.input_ids.dims().get(1).copied().unwrap_or(0)
    }

    /// Sequence length.
    pub fn seq_len(&self) -> usize {
        self.input_ids.dims().last().copied().unwrap_or(0)
    }

    /// Per-example modality tags of a single-view batch.
    pub fn view_modalities(&self) -> UmeResult<Vec<Modality>> {
        if self.num_views() != 1 {
            return Err(UmeError::InvalidInput(format!(
                "expected a single-view batch, got {} views",
                self.num_views()
            )));
        }
        Ok(self.modalities.iter().map(|tags| tags[0]).collect())
    }

    /// Extract the single-view batch at `view`.
    ///
    /// The returned tensors are contiguous copies, independently usable as
    /// forward-pass inputs.
    fn extract_view(&self, view: usize) -> UmeResult<EncodedBatch> {
        let input_ids = self.input_ids.narrow(1, view, 1)?.contiguous()?;
        let attention_mask = self.attention_mask.narrow(1, view, 1)?.contiguous()?;
        let modalities: Vec<Vec<Modality>> =
            self.modalities.iter().map(|tags| vec![tags[view]]).collect();

        EncodedBatch::new(input_ids, attention_mask, modalities)
    }

    /// Split a combined batch of N views into N single-view batches.
    pub fn split_views(&self) -> UmeResult<Vec<EncodedBatch>> {
        if self.input_ids.rank() != 3 {
            return Err(UmeError::ShapeMismatch {
                expected: "[batch, views, seq_len]".into(),
                actual: format!("{:?}", self.input_ids.dims()),
            });
        }
        let num_views = self.num_views();
        if num_views == 0 {
            return Err(UmeError::ShapeMismatch {
                expected: "at least one view".into(),
                actual: "0 views".into(),
            });
        }

        (0..num_views).map(|view| self.extract_view(view)).collect()
    }

    /// Concatenate single-view batches along the view axis.
    ///
    /// Inverse of [`split_views`](Self::split_views): every input must be
    /// single-view with matching batch size and sequence length.
    pub fn combine(views: &[EncodedBatch]) -> UmeResult<EncodedBatch> {
        let first = views
            .first()
            .ok_or_else(|| UmeError::InvalidInput("cannot combine zero view batches".into()))?;

        for batch in views {
            if batch.num_views() != 1 {
                return Err(UmeError::InvalidInput(format!(
                    "combine expects single-view batches, got {} views",
                    batch.num_views()
                )));
            }
            if batch.batch_size() != first.batch_size() || batch.seq_len() != first.seq_len() {
                return Err(UmeError::ShapeMismatch {
                    expected: format!("[{}, 1, {}]", first.batch_size(), first.seq_len()),
                    actual: format!("{:?}", batch.input_ids.dims()),
                });
            }
        }

        let ids: Vec<&Tensor> = views.iter().map(|b| &b.input_ids).collect();
        let masks: Vec<&Tensor> = views.iter().map(|b| &b.attention_mask).collect();
        let input_ids = Tensor::cat(&ids, 1)?;
        let attention_mask = Tensor::cat(&masks, 1)?;

        let modalities: Vec<Vec<Modality>> = (0..first.batch_size())
            .map(|i| views.iter().map(|b| b.modalities[i][0]).collect())
            .collect();

        EncodedBatch::new(input_ids, attention_mask, modalities)
    }
}

fn normalize_rank(tensor: Tensor, name: &str) -> UmeResult<Tensor> {
    match tensor.rank() {
        2 => Ok(tensor.unsqueeze(1)?),
        3 => Ok(tensor),
        rank => Err(UmeError::InvalidInput(format!(
            "{name} must be rank 2 or 3, got rank {rank} with shape {:?}",
            tensor.dims()
        ))),
    }
}
