//! Running metrics and metric emission.
//!
//! Perplexity accumulators live for the whole training run, one per
//! `(stage, modality)` pair in a fixed mapping built at construction.
//! Resetting between epochs is the training-loop driver's responsibility
//! via [`PerplexityBank::reset`].
//!
//! Metric emission is fire-and-forget through [`MetricLogger`]; the crate
//! never installs a global `tracing` subscriber — the hosting application
//! configures that.

use std::collections::BTreeMap;
use std::sync::Mutex;

use candle_core::Tensor;

use crate::error::UmeResult;
use crate::modality::Modality;
use crate::training::loss::masked_nll_sum;

/// Training or validation stage, used to key metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Train,
    Val,
}

impl Stage {
    /// All stages.
    pub const ALL: [Stage; 2] = [Stage::Train, Stage::Val];

    /// Metric-name prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Train => "train",
            Stage::Val => "val",
        }
    }
}

/// Running perplexity over masked-token cross-entropy.
///
/// Accumulates total NLL and token count across `update` calls; positions
/// labeled with the ignore sentinel are excluded from both.
#[derive(Debug, Default, Clone)]
pub struct Perplexity {
    total_nll: f64,
    total_tokens: usize,
}

impl Perplexity {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate NLL from `[N, vocab]` logits and `[N]` labels.
    ///
    /// An update where every label is ignored is a no-op.
    pub fn update(&mut self, logits: &Tensor, labels: &Tensor) -> UmeResult<()> {
        let (nll_sum, count) = masked_nll_sum(logits, labels)?;
        if count == 0 {
            return Ok(());
        }
        self.total_nll += nll_sum.to_scalar::<f32>()? as f64;
        self.total_tokens += count;
        Ok(())
    }

    /// Current perplexity: `exp(total_nll / total_tokens)`.
    ///
    /// NaN before the first counted token.
    pub fn compute(&self) -> f32 {
        if self.total_tokens == 0 {
            return f32::NAN;
        }
        (self.total_nll / self.total_tokens as f64).exp() as f32
    }

    /// Number of tokens counted so far.
    pub fn token_count(&self) -> usize {
        self.total_tokens
    }

    /// Clear accumulated state.
    pub fn reset(&mut self) {
        self.total_nll = 0.0;
        self.total_tokens = 0;
    }
}

/// Fixed mapping from `(stage, modality)` to its running perplexity.
///
/// Built once at encoder construction with an entry for every pair, so
/// lookups are typed and total (no stringly-keyed attribute access).
#[derive(Debug)]
pub struct PerplexityBank {
    metrics: BTreeMap<(Stage, Modality), Perplexity>,
}

impl PerplexityBank {
    /// Create a bank covering every stage/modality pair.
    pub fn new() -> Self {
        let mut metrics = BTreeMap::new();
        for stage in Stage::ALL {
            for modality in Modality::ALL {
                metrics.insert((stage, modality), Perplexity::new());
            }
        }
        Self { metrics }
    }

    /// Mutable accumulator for a pair.
    pub fn get_mut(&mut self, stage: Stage, modality: Modality) -> &mut Perplexity {
        self.metrics.entry((stage, modality)).or_default()
    }

    /// Read-only accumulator for a pair, if it has been created.
    pub fn get(&self, stage: Stage, modality: Modality) -> Option<&Perplexity> {
        self.metrics.get(&(stage, modality))
    }

    /// Reset every accumulator for a stage (between epochs).
    pub fn reset(&mut self, stage: Stage) {
        for ((s, _), metric) in self.metrics.iter_mut() {
            if *s == stage {
                metric.reset();
            }
        }
    }
}

impl Default for PerplexityBank {
    fn default() -> Self {
        Self::new()
    }
}

/// Fire-and-forget metric sink.
///
/// No return value is consumed by the training path; failures to record
/// must not fail a step.
pub trait MetricLogger: Send + Sync {
    /// Record a named scalar.
    fn log(&self, name: &str, value: f32);
}

impl<T: MetricLogger + ?Sized> MetricLogger for std::sync::Arc<T> {
    fn log(&self, name: &str, value: f32) {
        (**self).log(name, value);
    }
}

/// Default logger emitting metrics as `tracing` events.
#[derive(Debug, Default, Clone)]
pub struct TracingMetricLogger;

impl MetricLogger for TracingMetricLogger {
    fn log(&self, name: &str, value: f32) {
        tracing::info!(target: "ume_encoder::metrics", metric = name, value, "metric");
    }
}

/// Logger capturing metrics in memory, for tests and offline inspection.
#[derive(Debug, Default)]
pub struct RecordingMetricLogger {
    records: Mutex<Vec<(String, f32)>>,
}

impl RecordingMetricLogger {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All `(name, value)` records in emission order.
    pub fn records(&self) -> Vec<(String, f32)> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Last recorded value for a metric name.
    pub fn last(&self, name: &str) -> Option<f32> {
        self.records
            .lock()
            .ok()?
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    /// Number of records for a metric name.
    pub fn count(&self, name: &str) -> usize {
        self.records
            .lock()
            .map(|r| r.iter().filter(|(n, _)| n == name).count())
            .unwrap_or(0)
    }
}

impl MetricLogger for RecordingMetricLogger {
    fn log(&self, name: &str, value: f32) {
        if let Ok(mut records) = self.records.lock() {
            records.push((name.to_string(), value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::loss::MLM_IGNORE_INDEX;
    use candle_core::Device;

    #[test]
    fn perplexity_of_uniform_logits_is_vocab_size() {
        let device = Device::Cpu;
        let logits = Tensor::zeros((4, 8), candle_core::DType::F32, &device).unwrap();
        let labels = Tensor::from_slice(&[0i64, 1, 2, 3], (4,), &device).unwrap();

        let mut metric = Perplexity::new();
        metric.update(&logits, &labels).unwrap();

        // Uniform over 8 classes: ppl = 8
        assert!((metric.compute() - 8.0).abs() < 1e-4);
        assert_eq!(metric.token_count(), 4);
    }

    #[test]
    fn perplexity_skips_ignored_labels() {
        let device = Device::Cpu;
        let logits = Tensor::zeros((2, 4), candle_core::DType::F32, &device).unwrap();
        let labels =
            Tensor::from_slice(&[MLM_IGNORE_INDEX, MLM_IGNORE_INDEX], (2,), &device).unwrap();

        let mut metric = Perplexity::new();
        metric.update(&logits, &labels).unwrap();
        assert_eq!(metric.token_count(), 0);
        assert!(metric.compute().is_nan());
    }

    #[test]
    fn perplexity_accumulates_across_updates() {
        let device = Device::Cpu;
        let logits = Tensor::zeros((2, 4), candle_core::DType::F32, &device).unwrap();
        let labels = Tensor::from_slice(&[0i64, 1], (2,), &device).unwrap();

        let mut metric = Perplexity::new();
        metric.update(&logits, &labels).unwrap();
        metric.update(&logits, &labels).unwrap();
        assert_eq!(metric.token_count(), 4);
        assert!((metric.compute() - 4.0).abs() < 1e-4);

        metric.reset();
        assert_eq!(metric.token_count(), 0);
    }

    #[test]
    fn bank_covers_every_pair_and_resets_per_stage() {
        let mut bank = PerplexityBank::new();
        for stage in Stage::ALL {
            for modality in Modality::ALL {
                assert!(bank.get(stage, modality).is_some());
            }
        }

        let device = Device::Cpu;
        let logits = Tensor::zeros((1, 4), candle_core::DType::F32, &device).unwrap();
        let labels = Tensor::from_slice(&[0i64], (1,), &device).unwrap();
        bank.get_mut(Stage::Train, Modality::AminoAcid).update(&logits, &labels).unwrap();
        bank.get_mut(Stage::Val, Modality::AminoAcid).update(&logits, &labels).unwrap();

        bank.reset(Stage::Train);
        assert_eq!(bank.get(Stage::Train, Modality::AminoAcid).unwrap().token_count(), 0);
        assert_eq!(bank.get(Stage::Val, Modality::AminoAcid).unwrap().token_count(), 1);
    }

    #[test]
    fn recording_logger_tracks_order_and_counts() {
        let logger = RecordingMetricLogger::new();
        logger.log("train_loss", 1.0);
        logger.log("train_loss", 0.5);
        logger.log("val_loss", 2.0);

        assert_eq!(logger.count("train_loss"), 2);
        assert_eq!(logger.last("train_loss"), Some(0.5));
        assert_eq!(logger.records().len(), 3);
    }
}
