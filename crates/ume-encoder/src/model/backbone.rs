//! The narrow interface the encoder consumes from its backbone.

use candle_core::{Device, Tensor, Var};

use crate::config::PaddingMode;
use crate::error::UmeResult;

/// Token-to-latent transform with masked-language-model support.
///
/// Implementations own their parameters and their memory layout. The
/// unpadded layout flattens the token stream to `[batch * seq_len,
/// hidden]`; callers reshape using the sequence length they already know.
pub trait MaskedLmBackbone: Send {
    /// Latent dimension.
    fn hidden_size(&self) -> usize;

    /// Vocabulary size of the decoder head.
    fn vocab_size(&self) -> usize;

    /// Device the parameters live on.
    fn device(&self) -> &Device;

    /// Token stream layout.
    fn padding_mode(&self) -> PaddingMode;

    /// Trainable parameters, for the external optimizer driver.
    fn parameters(&self) -> Vec<Var>;

    /// Latents for a single-view batch.
    ///
    /// `input_ids`/`attention_mask` are `[batch, 1, seq_len]`. Returns
    /// `[batch * seq_len, hidden]` in the unpadded layout, `[batch,
    /// seq_len, hidden]` otherwise.
    fn tokens_to_latents(&self, input_ids: &Tensor, attention_mask: &Tensor)
        -> UmeResult<Tensor>;

    /// Apply the masking strategy to `input_ids`.
    ///
    /// Returns `(masked_input_ids, labels)` with the original shape;
    /// labels carry the original id at masked positions and the ignore
    /// sentinel everywhere else. Special tokens are never masked.
    fn mask_inputs(&self, input_ids: &Tensor) -> UmeResult<(Tensor, Tensor)>;

    /// Hidden states for masked inputs, same layout as
    /// [`tokens_to_latents`](Self::tokens_to_latents).
    fn forward_masked(
        &self,
        masked_input_ids: &Tensor,
        attention_mask: &Tensor,
    ) -> UmeResult<Tensor>;

    /// Project hidden states to vocabulary logits.
    ///
    /// Accepts any leading shape ending in `hidden`; returns `[n,
    /// vocab]` with `n` the product of the leading dimensions.
    fn decode(&self, hidden_states: &Tensor) -> UmeResult<Tensor>;
}
