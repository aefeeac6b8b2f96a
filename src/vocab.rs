//! Top-k vocabulary selection and persistence.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::cache::{write_atomic, ArtifactCache, CacheState, Fingerprint};
use crate::counter::{FrequencyCounter, TokenCount};
use crate::error::{LmPrepError, Result};
use crate::stats::CoverageStats;

/// Ordered list of vocabulary tokens, most frequent first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vocabulary {
    tokens: Vec<String>,
}

impl Vocabulary {
    /// Wraps an already ordered token list.
    #[must_use]
    pub fn new(tokens: Vec<String>) -> Self {
        Self { tokens }
    }

    /// Parses newline-separated vocabulary text as written by [`Vocabulary::to_text`].
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        if text.is_empty() {
            return Self::default();
        }
        Self {
            tokens: text.split('\n').map(str::to_owned).collect(),
        }
    }

    /// Reads a persisted vocabulary file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text =
            fs::read_to_string(path).map_err(|err| LmPrepError::io(err, Some(path.into())))?;
        Ok(Self::from_text(&text))
    }

    /// Tokens in vocabulary order.
    #[must_use]
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Number of tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns true when the vocabulary has no tokens.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Newline-joined tokens without a trailing newline.
    #[must_use]
    pub fn to_text(&self) -> String {
        self.tokens.join("\n")
    }
}

/// Result of [`select_top_k`].
#[derive(Debug, Clone)]
pub enum Selection {
    /// The vocabulary was selected from a frequency table and written to disk.
    Fresh {
        /// Location of the vocabulary file.
        path: PathBuf,
        /// Selected tokens.
        vocabulary: Vocabulary,
        /// Coverage statistics of the selection.
        stats: CoverageStats,
    },
    /// An existing vocabulary file was read back; no statistics are available.
    Reused {
        /// Location of the vocabulary file.
        path: PathBuf,
        /// Tokens read from the file.
        vocabulary: Vocabulary,
    },
}

impl Selection {
    /// Location of the vocabulary file.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Fresh { path, .. } | Self::Reused { path, .. } => path,
        }
    }

    /// The selected or reloaded vocabulary.
    #[must_use]
    pub fn vocabulary(&self) -> &Vocabulary {
        match self {
            Self::Fresh { vocabulary, .. } | Self::Reused { vocabulary, .. } => vocabulary,
        }
    }

    /// Statistics, present only for a fresh selection.
    #[must_use]
    pub fn stats(&self) -> Option<&CoverageStats> {
        match self {
            Self::Fresh { stats, .. } => Some(stats),
            Self::Reused { .. } => None,
        }
    }
}

/// Projects the `top_k` most frequent tokens out of `counter`.
///
/// Fails with [`LmPrepError::EmptyCorpus`] when the counter saw no tokens at all.
pub fn rank_tokens(
    counter: &dyn FrequencyCounter,
    top_k: usize,
    corpus: &Path,
) -> Result<(Vec<TokenCount>, CoverageStats)> {
    let total = counter.total();
    if total == 0 {
        return Err(LmPrepError::EmptyCorpus {
            path: corpus.to_path_buf(),
        });
    }
    let top = counter.top_k(top_k);
    let stats = CoverageStats::compute(total, counter.distinct(), &top);
    Ok((top, stats))
}

/// Fingerprint of the vocabulary derived from `input` with the given parameters.
pub fn vocabulary_fingerprint(input: &Path, top_k: usize, counter_label: &str) -> Result<Fingerprint> {
    Ok(Fingerprint::for_input(input)?
        .param("artifact", "vocabulary")
        .param("top_k", top_k)
        .param("counter", counter_label)
        .finish())
}

/// Writes the `top_k` most frequent tokens of `counter` to `output`, or reuses an existing file.
///
/// When `output` is reusable its contents are returned verbatim and `counter` is not consulted.
/// Otherwise the counter must be present and non-empty; nothing is written for an empty
/// corpus.
pub fn select_top_k(
    counter: Option<&dyn FrequencyCounter>,
    top_k: usize,
    output: &Path,
    fingerprint: Fingerprint,
    cache: &mut ArtifactCache,
    corpus: &Path,
) -> Result<Selection> {
    let state = cache.state(output, &fingerprint);
    match state {
        CacheState::Valid | CacheState::Untracked => {
            if state == CacheState::Untracked {
                warn!(
                    "reusing {} which has no recorded fingerprint",
                    output.display()
                );
            }
            info!("skipping as {} already exists; reading vocabulary", output.display());
            return Ok(Selection::Reused {
                path: output.to_path_buf(),
                vocabulary: Vocabulary::load(output)?,
            });
        }
        CacheState::Stale => warn!(
            "{} was produced under different settings; rebuilding",
            output.display()
        ),
        CacheState::Absent => {}
    }

    let counter = counter.ok_or_else(|| {
        LmPrepError::Internal(format!(
            "no frequency table available to select {}",
            output.display()
        ))
    })?;
    info!("saving top {top_k} words to {}", output.display());
    let (top, stats) = rank_tokens(counter, top_k, corpus)?;
    let vocabulary = Vocabulary::new(top.into_iter().map(|tc| tc.token).collect());
    let text = vocabulary.to_text();
    write_atomic(output, |writer| {
        writer
            .write_all(text.as_bytes())
            .map_err(|err| LmPrepError::io(err, Some(output.to_path_buf())))
    })?;
    cache.record(output, fingerprint)?;

    Ok(Selection::Fresh {
        path: output.to_path_buf(),
        vocabulary,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::ExactCounter;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        dir: TempDir,
        input: PathBuf,
        cache: ArtifactCache,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().expect("tempdir");
            let input = dir.path().join("corpus.txt");
            fs::write(&input, "The cat sat.\nTHE DOG SAT.\n").unwrap();
            let cache = ArtifactCache::open(dir.path()).unwrap();
            Self { dir, input, cache }
        }

        fn output(&self, k: usize) -> PathBuf {
            self.dir.path().join(format!("corpus.txt_vocab-{k}.txt"))
        }

        fn select(&mut self, counter: Option<&dyn FrequencyCounter>, k: usize) -> Result<Selection> {
            let output = self.output(k);
            let fingerprint = vocabulary_fingerprint(&self.input, k, "exact")?;
            select_top_k(counter, k, &output, fingerprint, &mut self.cache, &self.input)
        }
    }

    fn example_counter() -> ExactCounter {
        let mut counter = ExactCounter::new();
        for token in ["the", "cat", "sat.", "the", "dog", "sat."] {
            counter.observe(token);
        }
        counter
    }

    #[test]
    fn selects_top_three_of_example_corpus() {
        let mut fx = Fixture::new();
        let counter = example_counter();
        let selection = fx.select(Some(&counter), 3).unwrap();
        let tokens = selection.vocabulary().tokens();
        assert_eq!(tokens.len(), 3);
        assert!(tokens[..2].contains(&"the".to_string()));
        assert!(tokens[..2].contains(&"sat.".to_string()));
        assert!(tokens[2] == "cat" || tokens[2] == "dog");
        assert_eq!(selection.stats().unwrap().total_tokens, 6);
        assert_eq!(
            fs::read_to_string(selection.path()).unwrap(),
            tokens.join("\n")
        );
    }

    #[test]
    fn k_beyond_distinct_returns_full_set() {
        let mut fx = Fixture::new();
        let counter = example_counter();
        let selection = fx.select(Some(&counter), 100).unwrap();
        let mut tokens = selection.vocabulary().tokens().to_vec();
        tokens.sort();
        assert_eq!(tokens, vec!["cat", "dog", "sat.", "the"]);
    }

    #[test]
    fn k_zero_writes_empty_vocabulary_without_most_frequent() {
        let mut fx = Fixture::new();
        let counter = example_counter();
        let selection = fx.select(Some(&counter), 0).unwrap();
        assert!(selection.vocabulary().is_empty());
        let stats = selection.stats().unwrap();
        assert!(stats.most_frequent.is_none());
        assert_eq!(fs::read_to_string(selection.path()).unwrap(), "");
    }

    #[test]
    fn empty_corpus_aborts_before_writing() {
        let mut fx = Fixture::new();
        let counter = ExactCounter::new();
        let err = fx.select(Some(&counter), 3).expect_err("zero tokens");
        assert!(err.is_empty_corpus());
        assert!(!fx.output(3).exists());
    }

    #[test]
    fn existing_vocabulary_is_returned_verbatim_without_stats() {
        let mut fx = Fixture::new();
        fs::write(fx.output(3), "zebra\napple").unwrap();
        let selection = fx.select(None, 3).unwrap();
        assert!(selection.stats().is_none());
        assert_eq!(selection.vocabulary().tokens(), ["zebra", "apple"]);
        assert_eq!(selection.vocabulary().to_text(), "zebra\napple");
    }

    #[test]
    fn recorded_vocabulary_is_reused_on_second_call() {
        let mut fx = Fixture::new();
        let counter = example_counter();
        let first = fx.select(Some(&counter), 2).unwrap();
        let second = fx.select(Some(&counter), 2).unwrap();
        assert!(matches!(second, Selection::Reused { .. }));
        assert_eq!(first.vocabulary(), second.vocabulary());
    }

    #[test]
    fn missing_counter_for_absent_vocabulary_is_an_error() {
        let mut fx = Fixture::new();
        let err = fx.select(None, 3).expect_err("no counts");
        assert!(matches!(err, LmPrepError::Internal(_)));
    }

    #[test]
    fn vocabulary_text_round_trip() {
        let vocab = Vocabulary::from_text("a\nb\nc");
        assert_eq!(vocab.len(), 3);
        assert_eq!(vocab.to_text(), "a\nb\nc");
        assert!(Vocabulary::from_text("").is_empty());
    }
}
