//! Normalization plus vocabulary extraction for a single corpus.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::info;

use crate::cache::ArtifactCache;
use crate::config::{VocabBuilder, VocabConfig};
use crate::corpus::ArtifactPaths;
use crate::counter::FrequencyCounter;
use crate::error::{LmPrepError, Result};
use crate::normalize::{count_normalized_corpus, normalize_and_count, Normalized};
use crate::stats::CoverageStats;
use crate::vocab::{select_top_k, vocabulary_fingerprint, Selection, Vocabulary};

/// High-level façade running the corpus pass and top-k selection.
#[derive(Debug, Clone)]
pub struct Extractor {
    cfg: VocabConfig,
}

/// Artifacts produced (or reused) by [`Extractor::run`].
#[must_use]
#[derive(Debug, Clone)]
pub struct ExtractorArtifacts {
    /// Derived artifact locations.
    pub paths: ArtifactPaths,
    /// Gzip-compressed, case-folded corpus.
    pub normalized_corpus: PathBuf,
    /// True when the normalized corpus was rebuilt during this run.
    pub normalized_fresh: bool,
    /// Vocabulary file location.
    pub vocabulary_path: PathBuf,
    /// Selected or reloaded vocabulary.
    pub vocabulary: Vocabulary,
    /// Statistics, present only when the vocabulary was freshly selected.
    pub stats: Option<CoverageStats>,
    /// Wall time spent.
    pub duration: Duration,
}

impl Extractor {
    /// Creates a new extractor for the supplied configuration.
    #[must_use]
    pub fn new(cfg: VocabConfig) -> Self {
        Self { cfg }
    }

    /// Returns a [`VocabBuilder`] with default settings.
    #[must_use]
    pub fn builder() -> VocabBuilder {
        VocabConfig::builder()
    }

    /// Returns an immutable reference to the underlying configuration.
    #[must_use]
    pub fn config(&self) -> &VocabConfig {
        &self.cfg
    }

    /// Normalizes `input` and selects its top-k vocabulary inside the configured output directory.
    ///
    /// Each artifact is reused independently when the cache allows it.  If the normalized corpus
    /// is reused but the vocabulary has to be built, token counts are recomputed from the
    /// normalized corpus instead of the raw input.
    pub fn run<P: AsRef<Path>>(&self, input: P) -> Result<ExtractorArtifacts> {
        let input = input.as_ref();
        self.cfg.validate()?;
        let start = Instant::now();

        let output_dir = &self.cfg.output_dir;
        fs::create_dir_all(output_dir)
            .map_err(|err| LmPrepError::io(err, Some(output_dir.clone())))?;
        let paths = ArtifactPaths::new(input, output_dir)?;
        let mut cache = ArtifactCache::open(output_dir)?;

        let normalized = normalize_and_count(
            input,
            &paths.normalized_corpus(),
            &mut cache,
            self.cfg.counter.build(),
            self.cfg.show_progress,
        )?;
        let normalized_corpus = normalized.path().to_path_buf();
        let normalized_fresh = matches!(normalized, Normalized::Fresh { .. });
        let mut counter: Option<Box<dyn FrequencyCounter>> = normalized.into_counter();

        let vocabulary_path = paths.vocabulary(self.cfg.top_k);
        let fingerprint =
            vocabulary_fingerprint(input, self.cfg.top_k, &self.cfg.counter.label())?;
        if counter.is_none() && !cache.state(&vocabulary_path, &fingerprint).is_reusable() {
            counter = Some(count_normalized_corpus(
                &normalized_corpus,
                self.cfg.counter.build(),
                self.cfg.show_progress,
            )?);
        }

        let selection = select_top_k(
            counter.as_deref(),
            self.cfg.top_k,
            &vocabulary_path,
            fingerprint,
            &mut cache,
            input,
        )?;
        let stats = selection.stats().cloned();
        if let Some(stats) = &stats {
            for line in stats.to_string().lines() {
                info!("  {line}");
            }
        }
        let vocabulary = match selection {
            Selection::Fresh { vocabulary, .. } | Selection::Reused { vocabulary, .. } => {
                vocabulary
            }
        };

        Ok(ExtractorArtifacts {
            paths,
            normalized_corpus,
            normalized_fresh,
            vocabulary_path,
            vocabulary,
            stats,
            duration: start.elapsed(),
        })
    }
}

impl fmt::Display for ExtractorArtifacts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Normalized corpus: {}{}",
            self.normalized_corpus.display(),
            if self.normalized_fresh { "" } else { " (reused)" }
        )?;
        writeln!(
            f,
            "Vocabulary: {} ({} words{})",
            self.vocabulary_path.display(),
            self.vocabulary.len(),
            if self.stats.is_some() { "" } else { ", reused" }
        )?;
        if let Some(stats) = &self.stats {
            write!(f, "{stats}")?;
        }
        writeln!(f, "Total duration: {:.2?}", self.duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CounterKind;
    use std::io::Write;
    use tempfile::tempdir;

    fn extractor(out: &Path, top_k: usize) -> Extractor {
        let cfg = VocabConfig::builder()
            .output_dir(out)
            .top_k(top_k)
            .show_progress(false)
            .build()
            .unwrap();
        Extractor::new(cfg)
    }

    #[test]
    fn run_produces_both_artifacts() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("corpus.txt");
        fs::write(&input, "The cat sat.\nTHE DOG SAT.\n").unwrap();
        let out = dir.path().join("out");

        let artifacts = extractor(&out, 3).run(&input).unwrap();
        assert!(artifacts.normalized_fresh);
        assert_eq!(artifacts.normalized_corpus, out.join("corpus.txt_lower.txt.gz"));
        assert_eq!(artifacts.vocabulary_path, out.join("corpus.txt_vocab-3.txt"));
        assert_eq!(artifacts.vocabulary.len(), 3);
        let stats = artifacts.stats.expect("fresh stats");
        assert_eq!(stats.total_tokens, 6);
        assert_eq!(stats.distinct_tokens, 4);
    }

    #[test]
    fn second_run_reuses_everything() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("corpus.txt");
        fs::write(&input, "a b b\n").unwrap();
        let out = dir.path().join("out");
        let first = extractor(&out, 2).run(&input).unwrap();
        let second = extractor(&out, 2).run(&input).unwrap();
        assert!(!second.normalized_fresh);
        assert!(second.stats.is_none());
        assert_eq!(first.vocabulary, second.vocabulary);
        assert!(second.to_string().contains("reused"));
    }

    #[test]
    fn new_k_recounts_from_normalized_corpus() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("corpus.txt");
        fs::write(&input, "A b B c C C\n").unwrap();
        let out = dir.path().join("out");
        let first = extractor(&out, 1).run(&input).unwrap();
        assert_eq!(first.vocabulary.tokens(), ["c"]);

        let artifacts = extractor(&out, 2).run(&input).unwrap();
        assert!(!artifacts.normalized_fresh);
        assert_eq!(artifacts.vocabulary.tokens(), ["c", "b"]);
        assert_eq!(artifacts.stats.expect("recounted").total_tokens, 6);
    }

    #[test]
    fn blank_corpus_is_an_empty_corpus_error() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("blank.txt");
        fs::write(&input, "\n   \n\t\n").unwrap();
        let out = dir.path().join("out");
        let err = extractor(&out, 5).run(&input).expect_err("zero tokens");
        assert!(err.is_empty_corpus());
        assert!(!out.join("blank.txt_vocab-5.txt").exists());
    }

    #[test]
    fn compressed_input_is_decompressed() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("corpus.txt.gz");
        let mut encoder = crate::corpus::gzip_writer(fs::File::create(&input).unwrap());
        encoder.write_all(b"Hello World\nhello again\n").unwrap();
        encoder.finish().unwrap().flush().unwrap();
        let out = dir.path().join("out");

        let artifacts = extractor(&out, 10).run(&input).unwrap();
        assert_eq!(
            artifacts.normalized_corpus,
            out.join("corpus.txt.gz_lower.txt.gz")
        );
        assert_eq!(artifacts.vocabulary.tokens()[0], "hello");
        assert_eq!(artifacts.stats.unwrap().total_tokens, 4);
    }

    #[test]
    fn sketch_counter_selects_heavy_hitters() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("corpus.txt");
        fs::write(&input, "x x x y y z\nX Y w\n").unwrap();
        let out = dir.path().join("out");
        let cfg = VocabConfig::builder()
            .output_dir(&out)
            .top_k(2)
            .counter(CounterKind::Sketch {
                width: 256,
                depth: 4,
                capacity: 8,
            })
            .show_progress(false)
            .build()
            .unwrap();
        let artifacts = Extractor::new(cfg).run(&input).unwrap();
        assert_eq!(artifacts.vocabulary.tokens(), ["x", "y"]);
    }
}
