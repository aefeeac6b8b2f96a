//! Facilities for opening plain or gzip-compressed corpora and naming derived artifacts.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{LmPrepError, Result};

/// Returns true when the path's extension marks it as gzip-compressed.
#[must_use]
pub fn is_compressed<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref()
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

/// Opens a corpus for buffered line reading, decompressing `.gz` inputs on the fly.
pub fn open_corpus<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|err| LmPrepError::io(err, Some(path.to_path_buf())))?;
    if is_compressed(path) {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Wraps a writer in a gzip encoder using the default compression level.
///
/// The encoder already batches its compressed output, so `inner` is used as-is.
pub fn gzip_writer<W: Write>(inner: W) -> GzEncoder<W> {
    GzEncoder::new(inner, Compression::default())
}

/// Returns the file name of the input corpus, which prefixes every derived artifact.
pub fn corpus_name<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            LmPrepError::InvalidConfig(format!("input path {path:?} does not name a file"))
        })
}

/// Deterministic artifact locations derived from the input name and configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    output_dir: PathBuf,
    corpus_name: String,
}

impl ArtifactPaths {
    /// Derives artifact paths for `input` inside `output_dir`.
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(input: P, output_dir: Q) -> Result<Self> {
        Ok(Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            corpus_name: corpus_name(input)?,
        })
    }

    /// Directory all artifacts are written to.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// `<input_name>_lower.txt.gz`
    #[must_use]
    pub fn normalized_corpus(&self) -> PathBuf {
        self.join(format!("{}_lower.txt.gz", self.corpus_name))
    }

    /// `<input_name>_vocab-<k>.txt`
    #[must_use]
    pub fn vocabulary(&self, top_k: usize) -> PathBuf {
        self.join(format!("{}_vocab-{top_k}.txt", self.corpus_name))
    }

    /// `<input_name>_lm_<order>_<prune>.arpa`
    #[must_use]
    pub fn arpa(&self, order: usize, prune: &str) -> PathBuf {
        self.join(format!("{}.arpa", self.lm_stem(order, prune)))
    }

    /// `<input_name>_lm_<order>_<prune>_filtered_<k>.arpa`
    #[must_use]
    pub fn filtered_arpa(&self, order: usize, prune: &str, top_k: usize) -> PathBuf {
        self.join(format!(
            "{}_filtered_{top_k}.arpa",
            self.lm_stem(order, prune)
        ))
    }

    /// `<input_name>_lm_<order>_<prune>_filtered_<k>.binary`
    #[must_use]
    pub fn binary(&self, order: usize, prune: &str, top_k: usize) -> PathBuf {
        self.join(format!(
            "{}_filtered_{top_k}.binary",
            self.lm_stem(order, prune)
        ))
    }

    fn lm_stem(&self, order: usize, prune: &str) -> String {
        format!("{}_lm_{order}_{prune}", self.corpus_name)
    }

    fn join(&self, file_name: String) -> PathBuf {
        self.output_dir.join(file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn detects_gzip_by_extension() {
        assert!(is_compressed("corpus.txt.gz"));
        assert!(is_compressed("CORPUS.GZ"));
        assert!(!is_compressed("corpus.txt"));
        assert!(!is_compressed("gz"));
    }

    #[test]
    fn gzip_writer_hands_back_the_inner_writer() {
        let mut encoder = gzip_writer(Vec::new());
        encoder.write_all(b"one line\n").expect("write");
        let bytes: Vec<u8> = encoder.finish().expect("finish");
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);

        let mut text = String::new();
        MultiGzDecoder::new(bytes.as_slice())
            .read_to_string(&mut text)
            .expect("decode");
        assert_eq!(text, "one line\n");
    }

    #[test]
    fn open_corpus_reads_compressed_input() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("input.txt.gz");
        let file = File::create(&path).expect("create");
        let mut encoder = gzip_writer(file);
        encoder.write_all(b"alpha beta\ngamma\n").expect("write");
        encoder
            .finish()
            .expect("finish")
            .flush()
            .expect("flush");

        let mut text = String::new();
        open_corpus(&path)
            .expect("open")
            .read_to_string(&mut text)
            .expect("read");
        assert_eq!(text, "alpha beta\ngamma\n");
    }

    #[test]
    fn open_corpus_reports_missing_path() {
        let dir = tempdir().expect("tempdir");
        let missing = dir.path().join("missing.txt");
        let err = open_corpus(&missing).err().expect("missing input should fail");
        assert!(matches!(err, LmPrepError::Io { path: Some(p), .. } if p == missing));
    }

    #[test]
    fn artifact_paths_follow_naming_scheme() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("news.txt");
        fs::write(&input, "x").expect("write");
        let paths = ArtifactPaths::new(&input, "out").expect("paths");
        assert_eq!(
            paths.normalized_corpus(),
            Path::new("out/news.txt_lower.txt.gz")
        );
        assert_eq!(paths.vocabulary(500), Path::new("out/news.txt_vocab-500.txt"));
        assert_eq!(
            paths.arpa(3, "0|0|1"),
            Path::new("out/news.txt_lm_3_0|0|1.arpa")
        );
        assert_eq!(
            paths.filtered_arpa(3, "0|0|1", 500),
            Path::new("out/news.txt_lm_3_0|0|1_filtered_500.arpa")
        );
        assert_eq!(
            paths.binary(3, "0|0|1", 500),
            Path::new("out/news.txt_lm_3_0|0|1_filtered_500.binary")
        );
    }

    #[test]
    fn corpus_name_rejects_root() {
        assert!(matches!(
            corpus_name("/"),
            Err(LmPrepError::InvalidConfig(_))
        ));
    }
}
