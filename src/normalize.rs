//! Streaming case-folding pass that writes the normalized corpus and counts tokens.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use bstr::io::BufReadExt;
use bstr::ByteSlice;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};

use crate::cache::{write_atomic, ArtifactCache, CacheState, Fingerprint};
use crate::corpus::{gzip_writer, open_corpus};
use crate::counter::FrequencyCounter;
use crate::error::{LmPrepError, Result};

const PROGRESS_STRIDE: u64 = 4096;

/// Result of [`normalize_and_count`].
pub enum Normalized {
    /// The corpus was streamed and the normalized artifact written.
    Fresh {
        /// Location of the normalized corpus.
        path: PathBuf,
        /// Number of lines written.
        lines: u64,
        /// Frequencies gathered during the pass.
        counter: Box<dyn FrequencyCounter>,
    },
    /// An existing artifact was reused; no frequency table was computed.
    Reused {
        /// Location of the normalized corpus.
        path: PathBuf,
        /// Cache state that allowed the reuse.
        state: CacheState,
    },
}

impl Normalized {
    /// Location of the normalized corpus.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Fresh { path, .. } | Self::Reused { path, .. } => path,
        }
    }

    /// Frequencies from the pass, or `None` when the artifact was reused.
    #[must_use]
    pub fn counter(&self) -> Option<&dyn FrequencyCounter> {
        match self {
            Self::Fresh { counter, .. } => Some(counter.as_ref()),
            Self::Reused { .. } => None,
        }
    }

    /// Consumes the outcome, returning the frequency table if one was computed.
    #[must_use]
    pub fn into_counter(self) -> Option<Box<dyn FrequencyCounter>> {
        match self {
            Self::Fresh { counter, .. } => Some(counter),
            Self::Reused { .. } => None,
        }
    }
}

/// Case-folds every line of `reader` into `writer`, feeding each whitespace-delimited token of
/// the folded line to `counter`.
///
/// Line terminators are preserved, so the output has exactly as many lines as the input.
/// Returns the number of lines processed.
pub fn normalize_stream<R, W>(
    mut reader: R,
    mut writer: W,
    counter: &mut dyn FrequencyCounter,
    progress: &ProgressBar,
) -> io::Result<u64>
where
    R: BufRead,
    W: Write,
{
    let mut lines = 0u64;
    reader.for_byte_line_with_terminator(|raw| {
        let line = decode_line(raw, lines + 1)?;
        let folded = line.to_lowercase();
        for token in folded.split_whitespace() {
            counter.observe(token);
        }
        writer.write_all(folded.as_bytes())?;
        lines += 1;
        tick(progress, lines);
        Ok(true)
    })?;
    writer.flush()?;
    progress.set_position(lines);
    Ok(lines)
}

/// Counts whitespace-delimited tokens of `reader` without writing anything.
///
/// Used on an already-normalized corpus, so lines are not folded again.
pub fn count_stream<R: BufRead>(
    mut reader: R,
    counter: &mut dyn FrequencyCounter,
    progress: &ProgressBar,
) -> io::Result<u64> {
    let mut lines = 0u64;
    reader.for_byte_line_with_terminator(|raw| {
        let line = decode_line(raw, lines + 1)?;
        for token in line.split_whitespace() {
            counter.observe(token);
        }
        lines += 1;
        tick(progress, lines);
        Ok(true)
    })?;
    progress.set_position(lines);
    Ok(lines)
}

/// Streams `input` into the normalized corpus at `output`, counting tokens along the way.
///
/// When the cache reports `output` as reusable the pass is skipped entirely and the outcome
/// carries no frequency table.  A stale artifact is rebuilt.
pub fn normalize_and_count(
    input: &Path,
    output: &Path,
    cache: &mut ArtifactCache,
    mut counter: Box<dyn FrequencyCounter>,
    show_progress: bool,
) -> Result<Normalized> {
    let fingerprint = Fingerprint::for_input(input)?
        .param("artifact", "normalized_corpus")
        .finish();
    let state = cache.state(output, &fingerprint);
    match state {
        CacheState::Valid | CacheState::Untracked => {
            if state == CacheState::Untracked {
                warn!(
                    "reusing {} which has no recorded fingerprint",
                    output.display()
                );
            }
            info!("skipping as {} already exists", output.display());
            return Ok(Normalized::Reused {
                path: output.to_path_buf(),
                state,
            });
        }
        CacheState::Stale => warn!(
            "{} was produced from a different input; rebuilding",
            output.display()
        ),
        CacheState::Absent => {}
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| LmPrepError::io(err, Some(parent.into())))?;
    }

    info!(
        "converting {} to lowercase and counting word occurrences",
        input.display()
    );
    let start = Instant::now();
    let reader = open_corpus(input)?;
    let progress = line_progress(show_progress, "normalizing");
    let lines = write_atomic(output, |file| {
        let mut encoder = gzip_writer(file);
        normalize_stream(reader, &mut encoder, counter.as_mut(), &progress)
            .and_then(|lines| encoder.finish()?.flush().map(|()| lines))
            .map_err(|err| LmPrepError::io(err, Some(input.to_path_buf())))
    })?;
    progress.finish_and_clear();
    cache.record(output, fingerprint)?;

    info!(
        "normalized {lines} lines ({} tokens, {} distinct, {} counter) in {:.2?}",
        counter.total(),
        counter.distinct(),
        counter.kind(),
        start.elapsed()
    );
    Ok(Normalized::Fresh {
        path: output.to_path_buf(),
        lines,
        counter,
    })
}

/// Rebuilds a frequency table from an existing normalized corpus.
pub fn count_normalized_corpus(
    path: &Path,
    mut counter: Box<dyn FrequencyCounter>,
    show_progress: bool,
) -> Result<Box<dyn FrequencyCounter>> {
    info!("counting word occurrences in {}", path.display());
    let reader = open_corpus(path)?;
    let progress = line_progress(show_progress, "counting");
    let lines = count_stream(reader, counter.as_mut(), &progress)
        .map_err(|err| LmPrepError::io(err, Some(path.to_path_buf())))?;
    progress.finish_and_clear();
    info!("counted {} tokens over {lines} lines", counter.total());
    Ok(counter)
}

fn decode_line(raw: &[u8], line_number: u64) -> io::Result<&str> {
    raw.to_str().map_err(|err| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line {line_number} is not valid UTF-8: {err}"),
        )
    })
}

fn tick(progress: &ProgressBar, lines: u64) {
    if lines % PROGRESS_STRIDE == 0 {
        progress.set_position(lines);
    }
}

fn line_progress(enabled: bool, action: &str) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template(&format!(
        "{{spinner}} {action} {{human_pos}} lines {{elapsed}} ({{per_sec}})"
    ))
    .unwrap_or_else(|_| ProgressStyle::default_spinner())
    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ");
    pb.set_style(style);
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}
