//! Backbone seam: the token-to-latent transform consumed by the encoder.
//!
//! The transformer architecture itself (attention layers, positional
//! encoding) lives behind [`MaskedLmBackbone`]; this crate ships a
//! deterministic [`ReferenceBackbone`] for development and tests.

mod backbone;
mod reference;

pub use backbone::MaskedLmBackbone;
pub use reference::{ReferenceBackbone, ReferenceBackboneConfig};
