//! Corpus preparation for KenLM n-gram language models.
//!
//! The crate streams a (optionally gzip-compressed) text corpus once, writing a case-folded
//! copy while counting whitespace-delimited tokens, selects the `k` most frequent tokens as
//! the vocabulary, and then drives the external `lmplz`, `filter` and `build_binary` tools to
//! produce a vocabulary-restricted binary model.  Every derived artifact is cached in the
//! output directory and reused on later runs with the same inputs and settings.
//!
//! ```no_run
//! use lmprep::{Extractor, ModelPipeline, PipelineConfig, VocabConfig};
//!
//! # fn main() -> lmprep::Result<()> {
//! let vocab_cfg = VocabConfig::builder()
//!     .output_dir("/data/lm")
//!     .top_k(50_000)
//!     .show_progress(false)
//!     .build()?;
//! let extracted = Extractor::new(vocab_cfg).run("/data/corpus.txt.gz")?;
//!
//! let pipeline_cfg = PipelineConfig::builder("0|0|1".parse()?)
//!     .kenlm_bins("/opt/kenlm/bin")
//!     .build()?;
//! let model = ModelPipeline::new(pipeline_cfg).run(
//!     &extracted.paths,
//!     &extracted.normalized_corpus,
//!     &extracted.vocabulary,
//!     50_000,
//! )?;
//! println!("binary model at {}", model.binary.display());
//! # Ok(())
//! # }
//! ```
//!
//! The CLI is enabled by default through the `cli` feature.  Library users can disable default
//! features to avoid the CLI dependencies: `lmprep = { version = "...", default-features = false }`.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    clippy::all,
    rust_2018_idioms,
    future_incompatible,
    unused_lifetimes,
    unreachable_pub
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::doc_markdown,
    clippy::multiple_crate_versions
)]

pub mod cache;
pub mod config;
pub mod corpus;
pub mod counter;
pub mod error;
pub mod extractor;
pub mod normalize;
pub mod pipeline;
pub mod stats;
pub mod vocab;

pub use config::{
    CounterKind, PipelineBuilder, PipelineConfig, PruneThresholds, VocabBuilder, VocabConfig,
};
pub use counter::{ExactCounter, FrequencyCounter, SketchCounter, TokenCount};
pub use error::{LmPrepError, Result};
pub use extractor::{Extractor, ExtractorArtifacts};
pub use pipeline::{ModelArtifacts, ModelPipeline, ProcessRunner, ToolInvocation, ToolRunner};
pub use stats::CoverageStats;
pub use vocab::Vocabulary;
