//! Universal Molecular Encoder.
//!
//! A multi-modal masked-language-model encoder that jointly trains on
//! amino acid, nucleotide, and SMILES sequences with a shared backbone,
//! blending masked-token reconstruction with optional contrastive
//! alignment across modality views.
//!
//! # Architecture
//!
//! ```text
//! raw sequences ──> TokenizerRegistry ──> EncodedBatch [batch, views, len]
//!                                              │
//!                               multi-view ────┤──── single-view
//!                                    │         │          │
//!                              split_views     │     MLM path
//!                                    │         │          │
//!                              UmeEncoder::embed     masked CE
//!                                    │                    │
//!                        InfoNCE / Symile loss            │
//!                                    └───── compose ──────┘
//!                                (1-w)*mlm + w*contrastive
//! ```
//!
//! The transformer backbone lives behind [`MaskedLmBackbone`]; the crate
//! ships a deterministic [`ReferenceBackbone`] for development and tests.
//!
//! Metric emission goes through [`MetricLogger`]; diagnostics use
//! `tracing`. The crate never installs a global subscriber — the hosting
//! application configures that explicitly.

pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod encoder;
pub mod error;
pub mod modality;
pub mod model;
pub mod tokenization;
pub mod training;

pub use batch::EncodedBatch;
pub use config::{
    resolve_architecture, resolve_device, ArchitectureConfig, EncoderConfig, ModelSize,
    PaddingMode,
};
pub use encoder::UmeEncoder;
pub use error::{UmeError, UmeResult};
pub use modality::Modality;
pub use model::{MaskedLmBackbone, ReferenceBackbone, ReferenceBackboneConfig};
pub use tokenization::{ModalityTokenizer, TokenizerRegistry};
pub use training::{
    masked_cross_entropy, ContrastiveObjective, InfoNceLoss, MetricLogger, Perplexity,
    PerplexityBank, RecordingMetricLogger, Stage, SymileLoss, TracingMetricLogger,
    MLM_IGNORE_INDEX,
};
