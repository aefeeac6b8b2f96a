//! Configuration builders controlling vocabulary extraction and the model pipeline.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::counter::{ExactCounter, FrequencyCounter, SketchCounter};
use crate::error::{LmPrepError, Result};
use serde::{Deserialize, Serialize};

/// Default number of words kept in the vocabulary.
pub const DEFAULT_TOP_K: usize = 500_000;
/// Default location of the KenLM binaries.
pub const DEFAULT_KENLM_BINS: &str = "/opt/kenlm/bin/";
/// Default n-gram order.
pub const DEFAULT_ARPA_ORDER: usize = 3;
/// Default memory budget handed to the estimator.
pub const DEFAULT_ARPA_MEMORY: &str = "85%";

/// Strategy used to count token frequencies.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    /// Exact in-memory counting of every distinct token.
    #[default]
    Exact,
    /// Approximate counting with a count-min sketch and bounded candidate table.
    Sketch {
        /// Cells per sketch row.
        width: usize,
        /// Number of sketch rows.
        depth: usize,
        /// Maximum heavy-hitter candidates retained.
        capacity: usize,
    },
}

impl CounterKind {
    /// Instantiates a fresh counter of this kind.
    #[must_use]
    pub fn build(&self) -> Box<dyn FrequencyCounter> {
        match *self {
            Self::Exact => Box::new(ExactCounter::new()),
            Self::Sketch {
                width,
                depth,
                capacity,
            } => Box::new(SketchCounter::new(width, depth, capacity)),
        }
    }

    /// Stable label folded into cache fingerprints.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Exact => "exact".into(),
            Self::Sketch {
                width,
                depth,
                capacity,
            } => format!("sketch:{width}x{depth}:{capacity}"),
        }
    }
}

/// Configuration for normalization and top-k vocabulary selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VocabConfig {
    /// Directory receiving all derived artifacts.
    pub output_dir: PathBuf,
    /// Number of most frequent words kept in the vocabulary.
    pub top_k: usize,
    /// Counting strategy used during the corpus pass.
    pub counter: CounterKind,
    /// Enables the progress bar during the corpus pass.
    pub show_progress: bool,
}

impl VocabConfig {
    /// Returns a builder initialised with [`VocabConfig::default`].
    #[must_use]
    pub fn builder() -> VocabBuilder {
        VocabBuilder::default()
    }

    /// Validates the invariants required for vocabulary extraction.
    pub fn validate(&self) -> Result<()> {
        if let CounterKind::Sketch {
            width,
            depth,
            capacity,
        } = self.counter
        {
            if width == 0 || depth == 0 {
                return Err(LmPrepError::InvalidConfig(
                    "sketch width and depth must be greater than zero".into(),
                ));
            }
            if capacity < self.top_k {
                return Err(LmPrepError::InvalidConfig(format!(
                    "sketch capacity ({capacity}) must be at least top_k ({})",
                    self.top_k
                )));
            }
        }
        Ok(())
    }
}

impl Default for VocabConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            top_k: DEFAULT_TOP_K,
            counter: CounterKind::Exact,
            show_progress: true,
        }
    }
}

/// Builder for [`VocabConfig`].
#[derive(Debug, Default, Clone)]
pub struct VocabBuilder {
    cfg: VocabConfig,
}

impl VocabBuilder {
    /// Creates a builder with [`VocabConfig::default`] settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the artifact output directory.
    #[must_use]
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cfg.output_dir = dir.into();
        self
    }

    /// Sets the vocabulary size.
    #[must_use]
    pub fn top_k(mut self, value: usize) -> Self {
        self.cfg.top_k = value;
        self
    }

    /// Selects the counting strategy.
    #[must_use]
    pub fn counter(mut self, kind: CounterKind) -> Self {
        self.cfg.counter = kind;
        self
    }

    /// Enables or disables the progress bar.
    #[must_use]
    pub fn show_progress(mut self, enabled: bool) -> Self {
        self.cfg.show_progress = enabled;
        self
    }

    /// Finalises the builder, returning a validated [`VocabConfig`].
    pub fn build(self) -> Result<VocabConfig> {
        self.cfg.validate()?;
        Ok(self.cfg)
    }
}

/// Per-order pruning thresholds, written as a pipe-delimited list such as `0|0|1`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "String", into = "String")]
pub struct PruneThresholds {
    raw: String,
    values: Vec<u64>,
}

impl PruneThresholds {
    /// Threshold values, one per n-gram order starting at unigrams.
    #[must_use]
    pub fn values(&self) -> &[u64] {
        &self.values
    }

    /// The thresholds exactly as configured, used in artifact names.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for PruneThresholds {
    type Err = LmPrepError;

    fn from_str(s: &str) -> Result<Self> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(LmPrepError::InvalidConfig(
                "arpa_prune must list at least one threshold".into(),
            ));
        }
        let values = raw
            .split('|')
            .map(|part| {
                part.trim().parse::<u64>().map_err(|err| {
                    LmPrepError::InvalidConfig(format!(
                        "invalid pruning threshold `{part}` in `{raw}`: {err}"
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            raw: raw.to_owned(),
            values,
        })
    }
}

impl TryFrom<String> for PruneThresholds {
    type Error = LmPrepError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<PruneThresholds> for String {
    fn from(value: PruneThresholds) -> Self {
        value.raw
    }
}

impl fmt::Display for PruneThresholds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Configuration for the external estimator, filter and binarizer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Directory containing `lmplz`, `filter` and `build_binary`.
    pub kenlm_bins: PathBuf,
    /// N-gram order passed to the estimator.
    pub arpa_order: usize,
    /// Memory budget for the estimator, e.g. `85%` or `8G`.
    pub max_arpa_memory: String,
    /// Pruning thresholds, one per order.
    pub arpa_prune: PruneThresholds,
    /// Quantization bits for backoff weights; tool default when unset.
    pub binary_a_bits: Option<u32>,
    /// Quantization bits for probabilities; tool default when unset.
    pub binary_q_bits: Option<u32>,
    /// Binary data structure, e.g. `trie` or `probing`; tool default when unset.
    pub binary_type: Option<String>,
    /// Enables fallback discounting for small or sparse corpora.
    pub discount_fallback: bool,
}

impl PipelineConfig {
    /// Returns a builder for the given pruning thresholds with all other settings defaulted.
    #[must_use]
    pub fn builder(arpa_prune: PruneThresholds) -> PipelineBuilder {
        PipelineBuilder::new(arpa_prune)
    }

    /// Validates the invariants required by the external toolchain.
    pub fn validate(&self) -> Result<()> {
        if self.arpa_order == 0 {
            return Err(LmPrepError::InvalidConfig(
                "arpa_order must be greater than zero".into(),
            ));
        }
        if self.arpa_prune.values().len() > self.arpa_order {
            return Err(LmPrepError::InvalidConfig(format!(
                "arpa_prune lists {} thresholds but arpa_order is {}",
                self.arpa_prune.values().len(),
                self.arpa_order
            )));
        }
        if self.max_arpa_memory.trim().is_empty() {
            return Err(LmPrepError::InvalidConfig(
                "max_arpa_memory must not be empty".into(),
            ));
        }
        if self
            .binary_type
            .as_deref()
            .is_some_and(|kind| kind.trim().is_empty())
        {
            return Err(LmPrepError::InvalidConfig(
                "binary_type must not be empty when set".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    cfg: PipelineConfig,
}

impl PipelineBuilder {
    /// Creates a builder with default settings and the supplied pruning thresholds.
    #[must_use]
    pub fn new(arpa_prune: PruneThresholds) -> Self {
        Self {
            cfg: PipelineConfig {
                kenlm_bins: PathBuf::from(DEFAULT_KENLM_BINS),
                arpa_order: DEFAULT_ARPA_ORDER,
                max_arpa_memory: DEFAULT_ARPA_MEMORY.into(),
                arpa_prune,
                binary_a_bits: None,
                binary_q_bits: None,
                binary_type: None,
                discount_fallback: false,
            },
        }
    }

    /// Sets the directory holding the KenLM binaries.
    #[must_use]
    pub fn kenlm_bins(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cfg.kenlm_bins = dir.into();
        self
    }

    /// Sets the n-gram order.
    #[must_use]
    pub fn arpa_order(mut self, order: usize) -> Self {
        self.cfg.arpa_order = order;
        self
    }

    /// Sets the estimator memory budget.
    #[must_use]
    pub fn max_arpa_memory(mut self, memory: impl Into<String>) -> Self {
        self.cfg.max_arpa_memory = memory.into();
        self
    }

    /// Sets the binary quantization bit widths.
    #[must_use]
    pub fn quantization(mut self, a_bits: Option<u32>, q_bits: Option<u32>) -> Self {
        self.cfg.binary_a_bits = a_bits;
        self.cfg.binary_q_bits = q_bits;
        self
    }

    /// Sets the binary data structure type.
    #[must_use]
    pub fn binary_type(mut self, kind: Option<String>) -> Self {
        self.cfg.binary_type = kind;
        self
    }

    /// Enables or disables fallback discounting.
    #[must_use]
    pub fn discount_fallback(mut self, enabled: bool) -> Self {
        self.cfg.discount_fallback = enabled;
        self
    }

    /// Finalises the builder, returning a validated [`PipelineConfig`].
    pub fn build(self) -> Result<PipelineConfig> {
        self.cfg.validate()?;
        Ok(self.cfg)
    }
}
