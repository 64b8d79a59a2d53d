//! Encoder configuration.
//!
//! `EncoderConfig` is the single construction-time input for
//! [`UmeEncoder`](crate::encoder::UmeEncoder). Invalid configuration
//! returns an error, never a silent default.
//!
//! [`ArchitectureConfig`] is resolved once from (device, requested
//! flash-attn, checkpoint presence) before model construction and never
//! mutated afterwards.

mod architecture;

pub use architecture::{resolve_architecture, resolve_device, ArchitectureConfig, PaddingMode};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{UmeError, UmeResult};
use crate::training::ContrastiveObjective;

/// Model size variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSize {
    /// ~12M parameters.
    Mini,
    /// ~90M parameters.
    Small,
    /// ~480M parameters.
    Medium,
    /// ~740M parameters.
    Large,
}

impl ModelSize {
    /// Hidden dimension of the backbone for this size.
    pub fn hidden_size(&self) -> usize {
        match self {
            ModelSize::Mini => 384,
            ModelSize::Small => 768,
            ModelSize::Medium => 1024,
            ModelSize::Large => 1280,
        }
    }

    /// Transformer depth for this size.
    pub fn num_layers(&self) -> usize {
        match self {
            ModelSize::Mini => 6,
            ModelSize::Small => 12,
            ModelSize::Medium => 24,
            ModelSize::Large => 32,
        }
    }

    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelSize::Mini => "UME_mini",
            ModelSize::Small => "UME_small",
            ModelSize::Medium => "UME_medium",
            ModelSize::Large => "UME_large",
        }
    }
}

impl fmt::Display for ModelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelSize {
    type Err = UmeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UME_mini" => Ok(ModelSize::Mini),
            "UME_small" => Ok(ModelSize::Small),
            "UME_medium" => Ok(ModelSize::Medium),
            "UME_large" => Ok(ModelSize::Large),
            other => Err(UmeError::InvalidInput(format!("unknown model size: {other}"))),
        }
    }
}

/// Construction-time configuration for the encoder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Model size variant (default: `Mini`).
    pub model_size: ModelSize,
    /// Maximum sequence length for tokenization (default: 512).
    pub max_length: usize,
    /// Fraction of non-special tokens masked during training (default: 0.25).
    pub mask_percentage: f64,
    /// Contrastive objective (default: `None` — MLM only).
    pub contrastive_loss_type: ContrastiveObjective,
    /// Blend weight in `[0, 1]` between MLM and contrastive losses
    /// (default: 0.0). `total = (1-w)*mlm + w*contrastive`.
    pub contrastive_loss_weight: f64,
    /// Temperature for the contrastive losses (default: 0.07).
    pub contrastive_temperature: f64,
    /// Flash-attention request. `None` resolves from the device.
    pub use_flash_attn: Option<bool>,
    /// Seed for the masking RNG (default: 0).
    pub seed: u64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            model_size: ModelSize::Mini,
            max_length: 512,
            mask_percentage: 0.25,
            contrastive_loss_type: ContrastiveObjective::None,
            contrastive_loss_weight: 0.0,
            contrastive_temperature: 0.07,
            use_flash_attn: None,
            seed: 0,
        }
    }
}

impl EncoderConfig {
    /// Validate all fields together. Fail fast, no clamping.
    pub fn validate(&self) -> UmeResult<()> {
        if self.max_length < 4 {
            return Err(UmeError::InvalidInput(format!(
                "max_length must be at least 4 (two special tokens plus payload), got {}",
                self.max_length
            )));
        }
        if !(0.0..1.0).contains(&self.mask_percentage) {
            return Err(UmeError::InvalidInput(format!(
                "mask_percentage must be in [0, 1), got {}",
                self.mask_percentage
            )));
        }
        if !(0.0..=1.0).contains(&self.contrastive_loss_weight) {
            return Err(UmeError::InvalidInput(format!(
                "contrastive_loss_weight must be in [0, 1], got {}",
                self.contrastive_loss_weight
            )));
        }
        if self.contrastive_temperature <= 0.0 {
            return Err(UmeError::InvalidInput(format!(
                "contrastive_temperature must be positive, got {}",
                self.contrastive_temperature
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        EncoderConfig::default().validate().expect("default config should be valid");
    }

    #[test]
    fn rejects_out_of_range_weight() {
        let config = EncoderConfig { contrastive_loss_weight: 1.5, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_positive_temperature() {
        let config = EncoderConfig { contrastive_temperature: 0.0, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn model_size_round_trips() {
        for size in [ModelSize::Mini, ModelSize::Small, ModelSize::Medium, ModelSize::Large] {
            assert_eq!(size.as_str().parse::<ModelSize>().unwrap(), size);
        }
        assert!("UME_huge".parse::<ModelSize>().is_err());
    }
}
