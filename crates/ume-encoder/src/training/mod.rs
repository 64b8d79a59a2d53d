//! Loss functions and running metrics for the training core.
//!
//! # Modules
//!
//! - [`loss`]: masked cross-entropy, InfoNCE (CLIP/disco) and Symile
//!   contrastive losses, and the closed [`ContrastiveObjective`] set
//! - [`metrics`]: per-(stage, modality) perplexity accumulators and the
//!   fire-and-forget [`MetricLogger`] sink

pub mod loss;
pub mod metrics;

pub use loss::{
    masked_cross_entropy, ContrastiveObjective, InfoNceLoss, SymileLoss, MLM_IGNORE_INDEX,
};
pub use metrics::{
    MetricLogger, Perplexity, PerplexityBank, RecordingMetricLogger, Stage, TracingMetricLogger,
};
