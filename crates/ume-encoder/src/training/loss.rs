//! Loss functions for multi-modal masked-language-model training.
//!
//! Three loss families share this module:
//! 1. Masked cross-entropy for MLM reconstruction (ignore index -100)
//! 2. Symmetric InfoNCE for two-view contrastive alignment (CLIP-style)
//! 3. Symile for N-view contrastive alignment (N >= 2)
//!
//! The contrastive objective set is closed: [`ContrastiveObjective`] is an
//! exhaustive enum, and parsing an unknown string fails instead of falling
//! back to a default.

use std::fmt;
use std::str::FromStr;

use candle_core::{DType, Tensor};
use candle_nn::ops::log_softmax;
use serde::{Deserialize, Serialize};

use crate::error::{UmeError, UmeResult};

/// Label value excluded from loss and perplexity.
pub const MLM_IGNORE_INDEX: i64 = -100;

/// Contrastive objective selected at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContrastiveObjective {
    /// MLM only; multi-view batches are rejected.
    #[default]
    None,
    /// Symile loss over N >= 2 modality views of the same input.
    Symile,
    /// CLIP-style InfoNCE over exactly 2 views.
    Clip,
    /// InfoNCE with cross-process negative sharding, exactly 2 views.
    DiscoClip,
}

impl ContrastiveObjective {
    /// Canonical string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContrastiveObjective::None => "none",
            ContrastiveObjective::Symile => "symile",
            ContrastiveObjective::Clip => "clip",
            ContrastiveObjective::DiscoClip => "disco_clip",
        }
    }
}

impl fmt::Display for ContrastiveObjective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContrastiveObjective {
    type Err = UmeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(ContrastiveObjective::None),
            "symile" => Ok(ContrastiveObjective::Symile),
            "clip" => Ok(ContrastiveObjective::Clip),
            "disco_clip" => Ok(ContrastiveObjective::DiscoClip),
            other => Err(UmeError::UnknownLossType(other.to_string())),
        }
    }
}

/// Sum of negative log-likelihoods over labeled positions.
///
/// `logits` is `[N, vocab]`, `labels` is `[N]` with `MLM_IGNORE_INDEX`
/// marking positions excluded from the loss. Returns the scalar NLL sum
/// and the number of counted positions (zero tokens yields a zero scalar).
pub(crate) fn masked_nll_sum(logits: &Tensor, labels: &Tensor) -> UmeResult<(Tensor, usize)> {
    let (n, vocab) = logits.dims2()?;
    let n_labels = labels.dims1()?;
    if n != n_labels {
        return Err(UmeError::ShapeMismatch {
            expected: format!("[{n}] labels for [{n}, {vocab}] logits"),
            actual: format!("[{n_labels}]"),
        });
    }

    let label_vec: Vec<i64> = labels.to_vec1()?;
    let mut rows: Vec<u32> = Vec::new();
    let mut targets: Vec<u32> = Vec::new();
    for (i, &label) in label_vec.iter().enumerate() {
        if label == MLM_IGNORE_INDEX {
            continue;
        }
        if label < 0 || label >= vocab as i64 {
            return Err(UmeError::InvalidInput(format!(
                "label {label} at position {i} outside vocabulary of size {vocab}"
            )));
        }
        rows.push(i as u32);
        targets.push(label as u32);
    }

    if rows.is_empty() {
        let zero = Tensor::zeros((), DType::F32, logits.device())?;
        return Ok((zero, 0));
    }

    let count = rows.len();
    let row_idx = Tensor::from_slice(&rows, (count,), logits.device())?;
    let picked = logits.index_select(&row_idx, 0)?;
    let log_probs = log_softmax(&picked, 1)?;

    let target_idx = Tensor::from_slice(&targets, (count, 1), logits.device())?;
    let gathered = log_probs.gather(&target_idx, 1)?;
    let nll_sum = gathered.sum_all()?.neg()?;

    Ok((nll_sum, count))
}

/// Mean cross-entropy over labeled positions, ignoring `MLM_IGNORE_INDEX`.
///
/// Returns a zero scalar when no position carries a label (a batch where
/// masking selected nothing), so callers never divide by zero.
pub fn masked_cross_entropy(logits: &Tensor, labels: &Tensor) -> UmeResult<Tensor> {
    let (nll_sum, count) = masked_nll_sum(logits, labels)?;
    if count == 0 {
        return Ok(nll_sum);
    }
    Ok(nll_sum.affine(1.0 / count as f64, 0.0)?)
}

/// Symmetric InfoNCE contrastive loss over two embedding views.
///
/// `L = (CE(sim/τ, diag) + CE(simᵀ/τ, diag)) / 2` where `sim[i, j] =
/// <a_i, b_j>`. The `disco` variant computes the same objective; negative
/// sharding across processes is handled by the distributed training
/// driver, which is outside this crate.
#[derive(Debug, Clone)]
pub struct InfoNceLoss {
    temperature: f64,
    use_disco: bool,
}

impl InfoNceLoss {
    /// Create with the given temperature.
    pub fn new(temperature: f64) -> Self {
        Self { temperature, use_disco: false }
    }

    /// Enable the distributed negative-sharding variant.
    pub fn with_disco(mut self, use_disco: bool) -> Self {
        self.use_disco = use_disco;
        self
    }

    /// Whether the distributed variant is selected.
    pub fn is_disco(&self) -> bool {
        self.use_disco
    }

    /// Compute the loss over two `[N, D]` embedding sets.
    pub fn forward(&self, a: &Tensor, b: &Tensor) -> UmeResult<Tensor> {
        let dims_a = a.dims2()?;
        let dims_b = b.dims2()?;
        if dims_a != dims_b || a.dtype() != b.dtype() {
            return Err(UmeError::ShapeMismatch {
                expected: format!("{:?} ({:?})", dims_a, a.dtype()),
                actual: format!("{:?} ({:?})", dims_b, b.dtype()),
            });
        }
        let (n, _) = dims_a;
        if n == 0 {
            return Err(UmeError::InvalidInput("InfoNCE loss over an empty batch".into()));
        }

        let logits = a.matmul(&b.t()?)?.affine(1.0 / self.temperature, 0.0)?;
        let labels = diagonal_labels(n, a)?;

        let row_loss = masked_cross_entropy(&logits, &labels)?;
        let col_loss = masked_cross_entropy(&logits.t()?.contiguous()?, &labels)?;

        Ok(row_loss.add(&col_loss)?.affine(0.5, 0.0)?)
    }
}

/// Symile contrastive loss generalizing InfoNCE to N views.
///
/// For each anchor view, the positives are scored by the anchor against
/// the elementwise product of all other views; cross-entropy to the
/// diagonal is averaged over anchors. N-way agreement is rewarded only
/// when every view of example `i` lines up.
#[derive(Debug, Clone)]
pub struct SymileLoss {
    temperature: f64,
}

impl SymileLoss {
    /// Create with the given temperature.
    pub fn new(temperature: f64) -> Self {
        Self { temperature }
    }

    /// Compute the loss over N `[batch, D]` embedding sets.
    pub fn forward(&self, views: &[Tensor]) -> UmeResult<Tensor> {
        if views.len() < 2 {
            return Err(UmeError::InvalidInput(format!(
                "Symile loss requires at least 2 views, got {}",
                views.len()
            )));
        }

        let dims = views[0].dims2()?;
        for view in &views[1..] {
            let other = view.dims2()?;
            if other != dims || view.dtype() != views[0].dtype() {
                return Err(UmeError::ShapeMismatch {
                    expected: format!("{:?} ({:?})", dims, views[0].dtype()),
                    actual: format!("{:?} ({:?})", other, view.dtype()),
                });
            }
        }
        let (n, _) = dims;
        if n == 0 {
            return Err(UmeError::InvalidInput("Symile loss over an empty batch".into()));
        }

        let labels = diagonal_labels(n, &views[0])?;
        let mut total: Option<Tensor> = None;

        for anchor_idx in 0..views.len() {
            let mut product: Option<Tensor> = None;
            for (j, view) in views.iter().enumerate() {
                if j == anchor_idx {
                    continue;
                }
                product = Some(match product {
                    None => view.clone(),
                    Some(prod) => prod.mul(view)?,
                });
            }
            let others = product.ok_or_else(|| {
                UmeError::InvalidInput("Symile anchor has no counterpart views".into())
            })?;

            let logits =
                views[anchor_idx].matmul(&others.t()?)?.affine(1.0 / self.temperature, 0.0)?;
            let anchor_loss = masked_cross_entropy(&logits, &labels)?;

            total = Some(match total {
                None => anchor_loss,
                Some(acc) => acc.add(&anchor_loss)?,
            });
        }

        let total = total.ok_or_else(|| {
            UmeError::InvalidInput("Symile loss accumulated no anchor terms".into())
        })?;
        Ok(total.affine(1.0 / views.len() as f64, 0.0)?)
    }
}

/// `[0, 1, ..., n-1]` labels pairing each example with its own view.
fn diagonal_labels(n: usize, like: &Tensor) -> UmeResult<Tensor> {
    let labels: Vec<i64> = (0..n as i64).collect();
    Ok(Tensor::from_slice(&labels, (n,), like.device())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn make_test_vecs(n: usize, d: usize, phase: f32) -> Tensor {
        let device = Device::Cpu;
        let data: Vec<f32> = (0..n * d).map(|i| (i as f32 * 0.1 + phase).sin()).collect();
        let raw = Tensor::from_slice(&data, (n, d), &device).unwrap();

        // L2 normalize rows
        let norm = raw.sqr().unwrap().sum_keepdim(1).unwrap().sqrt().unwrap();
        raw.broadcast_div(&norm).unwrap()
    }

    #[test]
    fn parses_all_objectives() {
        for objective in ["none", "symile", "clip", "disco_clip"] {
            let parsed: ContrastiveObjective = objective.parse().unwrap();
            assert_eq!(parsed.as_str(), objective);
        }
    }

    #[test]
    fn rejects_unknown_objective_string() {
        let err = "simclr".parse::<ContrastiveObjective>().unwrap_err();
        assert!(matches!(err, UmeError::UnknownLossType(_)));
    }

    #[test]
    fn masked_cross_entropy_ignores_sentinel() {
        let device = Device::Cpu;
        // Two rows; second row is ignored, so only row 0 contributes.
        let logits =
            Tensor::from_slice(&[2.0f32, 0.0, 0.0, 5.0, 5.0, 5.0], (2, 3), &device).unwrap();
        let labels = Tensor::from_slice(&[0i64, MLM_IGNORE_INDEX], (2,), &device).unwrap();

        let loss = masked_cross_entropy(&logits, &labels).unwrap();
        let val: f32 = loss.to_scalar().unwrap();

        // -log_softmax(2, 0, 0)[0] = log(e^2 + 2) - 2
        let expected = ((2.0f32).exp() + 2.0).ln() - 2.0;
        assert!((val - expected).abs() < 1e-5, "got {val}, expected {expected}");
    }

    #[test]
    fn masked_cross_entropy_all_ignored_is_zero() {
        let device = Device::Cpu;
        let logits = Tensor::from_slice(&[1.0f32, 2.0, 3.0, 4.0], (2, 2), &device).unwrap();
        let labels =
            Tensor::from_slice(&[MLM_IGNORE_INDEX, MLM_IGNORE_INDEX], (2,), &device).unwrap();

        let loss = masked_cross_entropy(&logits, &labels).unwrap();
        assert_eq!(loss.to_scalar::<f32>().unwrap(), 0.0);
    }

    #[test]
    fn masked_cross_entropy_rejects_out_of_vocab_label() {
        let device = Device::Cpu;
        let logits = Tensor::from_slice(&[1.0f32, 2.0], (1, 2), &device).unwrap();
        let labels = Tensor::from_slice(&[7i64], (1,), &device).unwrap();
        assert!(masked_cross_entropy(&logits, &labels).is_err());
    }

    #[test]
    fn infonce_loss_is_positive() {
        let loss_fn = InfoNceLoss::new(0.07);
        let a = make_test_vecs(4, 16, 0.0);
        let b = make_test_vecs(4, 16, 1.0);

        let loss = loss_fn.forward(&a, &b).unwrap();
        let val: f32 = loss.to_scalar().unwrap();
        assert!(val > 0.0, "InfoNCE loss should be positive, got {val}");
    }

    #[test]
    fn infonce_prefers_aligned_views() {
        let loss_fn = InfoNceLoss::new(0.07);
        let a = make_test_vecs(4, 16, 0.0);
        let misaligned = make_test_vecs(4, 16, 2.5);

        let aligned: f32 = loss_fn.forward(&a, &a).unwrap().to_scalar().unwrap();
        let shifted: f32 = loss_fn.forward(&a, &misaligned).unwrap().to_scalar().unwrap();
        assert!(
            aligned < shifted,
            "identical views should score lower: {aligned} vs {shifted}"
        );
    }

    #[test]
    fn infonce_rejects_shape_mismatch() {
        let loss_fn = InfoNceLoss::new(0.07);
        let a = make_test_vecs(4, 16, 0.0);
        let b = make_test_vecs(4, 8, 0.0);

        let err = loss_fn.forward(&a, &b).unwrap_err();
        assert!(matches!(err, UmeError::ShapeMismatch { .. }));
    }

    #[test]
    fn disco_variant_matches_infonce_in_process() {
        let plain = InfoNceLoss::new(0.07);
        let disco = InfoNceLoss::new(0.07).with_disco(true);
        let a = make_test_vecs(4, 16, 0.0);
        let b = make_test_vecs(4, 16, 1.0);

        let lhs: f32 = plain.forward(&a, &b).unwrap().to_scalar().unwrap();
        let rhs: f32 = disco.forward(&a, &b).unwrap().to_scalar().unwrap();
        assert!((lhs - rhs).abs() < 1e-6);
        assert!(disco.is_disco());
    }

    #[test]
    fn symile_handles_three_views() {
        let loss_fn = SymileLoss::new(0.07);
        let views = vec![
            make_test_vecs(4, 16, 0.0),
            make_test_vecs(4, 16, 1.0),
            make_test_vecs(4, 16, 2.0),
        ];

        let loss = loss_fn.forward(&views).unwrap();
        let val: f32 = loss.to_scalar().unwrap();
        assert!(val > 0.0, "Symile loss should be positive, got {val}");
    }

    #[test]
    fn symile_rejects_single_view() {
        let loss_fn = SymileLoss::new(0.07);
        let views = vec![make_test_vecs(4, 16, 0.0)];
        assert!(loss_fn.forward(&views).is_err());
    }

    #[test]
    fn symile_rejects_mismatched_views() {
        let loss_fn = SymileLoss::new(0.07);
        let views = vec![make_test_vecs(4, 16, 0.0), make_test_vecs(3, 16, 1.0)];
        let err = loss_fn.forward(&views).unwrap_err();
        assert!(matches!(err, UmeError::ShapeMismatch { .. }));
    }
}
