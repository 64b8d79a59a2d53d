//! Architecture variant resolution.
//!
//! A checkpoint trained with the unpadded (variable-length) layout cannot
//! be reshaped into padded layers after the fact, so the layout choice
//! depends on whether weights are being loaded and on the attention
//! implementation available on the target device. The decision is made
//! once, here, before model construction.

use candle_core::Device;
use serde::{Deserialize, Serialize};

use crate::error::{UmeError, UmeResult};

/// Memory layout of the backbone's token stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaddingMode {
    /// Fixed-length `[batch, seq_len, hidden]` layout.
    Padded,
    /// Variable-length `[batch * seq_len, hidden]` layout.
    Unpadded,
}

/// Fully-specified architecture configuration.
///
/// Immutable after resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchitectureConfig {
    /// Token stream layout.
    pub padding: PaddingMode,
    /// Whether attention layers use flash-attention kernels.
    pub use_flash_attn: bool,
    /// Whether SDPA attention receives an explicit padding mask.
    pub use_sdpa_attn_mask: bool,
}

/// Resolve the architecture for a target device.
///
/// Rules:
/// - Loading from a checkpoint forces the unpadded layout (the layout the
///   checkpoints were trained with); flash-attention may still be disabled
///   at the layer level, in which case SDPA needs the explicit mask.
/// - A fresh model uses unpadded layout with flash-attention, or padded
///   layout with SDPA masking without it.
/// - When `requested_flash_attn` is `None`, flash-attention is enabled iff
///   the device is CUDA.
pub fn resolve_architecture(
    device: &Device,
    requested_flash_attn: Option<bool>,
    loading_from_checkpoint: bool,
) -> ArchitectureConfig {
    let use_flash_attn = requested_flash_attn.unwrap_or_else(|| device.is_cuda());

    if loading_from_checkpoint {
        ArchitectureConfig {
            padding: PaddingMode::Unpadded,
            use_flash_attn,
            use_sdpa_attn_mask: !use_flash_attn,
        }
    } else if use_flash_attn {
        ArchitectureConfig {
            padding: PaddingMode::Unpadded,
            use_flash_attn: true,
            use_sdpa_attn_mask: false,
        }
    } else {
        ArchitectureConfig {
            padding: PaddingMode::Padded,
            use_flash_attn: false,
            use_sdpa_attn_mask: true,
        }
    }
}

/// Resolve and validate a device request.
///
/// Accepts `"cpu"`, `"cuda"`, or `None` for auto-detection. Requesting
/// CUDA on a machine without it is an error, not a fallback.
pub fn resolve_device(requested: Option<&str>) -> UmeResult<Device> {
    match requested {
        Some("cpu") => Ok(Device::Cpu),
        Some("cuda") => {
            if !candle_core::utils::cuda_is_available() {
                return Err(UmeError::Device("CUDA device requested but not available".into()));
            }
            Device::new_cuda(0).map_err(UmeError::from)
        }
        Some(other) => Err(UmeError::Device(format!(
            "Invalid device: {other}. Must be one of [\"cpu\", \"cuda\"]"
        ))),
        None => {
            if candle_core::utils::cuda_is_available() {
                Device::new_cuda(0).map_err(UmeError::from)
            } else {
                Ok(Device::Cpu)
            }
        }
    }
}
