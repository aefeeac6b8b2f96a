//! Driver for the external KenLM toolchain: estimate, filter, binarize.
//!
//! Every stage is described as a [`ToolInvocation`] and executed by a [`ToolRunner`], so the
//! sequencing can be exercised without the real binaries.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Instant;

use log::{debug, info};

use crate::config::PipelineConfig;
use crate::corpus::ArtifactPaths;
use crate::error::{LmPrepError, Result};
use crate::vocab::Vocabulary;

/// Stage of the model pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// ARPA estimation with `lmplz`.
    Estimate,
    /// Vocabulary filtering with `filter`.
    Filter,
    /// Quantized binary conversion with `build_binary`.
    Binarize,
}

impl Stage {
    /// Name of the KenLM executable implementing the stage.
    #[must_use]
    pub fn program(self) -> &'static str {
        match self {
            Self::Estimate => "lmplz",
            Self::Filter => "filter",
            Self::Binarize => "build_binary",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

/// A fully specified external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    /// Stage the command implements.
    pub stage: Stage,
    /// Executable path.
    pub program: PathBuf,
    /// Command-line arguments.
    pub args: Vec<OsString>,
    /// Bytes streamed to the process's standard input, if any.
    pub stdin: Option<Vec<u8>>,
    /// Artifact the command is expected to produce.
    pub output: PathBuf,
}

impl ToolInvocation {
    fn new(stage: Stage, bins: &Path, output: PathBuf) -> Self {
        Self {
            stage,
            program: bins.join(stage.program()),
            args: Vec::new(),
            stdin: None,
            output,
        }
    }

    fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));
        self
    }

    /// Renders the command line for logging.
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(|part| part.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Executes tool invocations.
pub trait ToolRunner {
    /// Runs `invocation` to completion, failing on a non-zero exit.
    fn run(&self, invocation: &ToolInvocation) -> Result<()>;
}

/// Runs invocations as blocking child processes that inherit stdout and stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ToolRunner for ProcessRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<()> {
        let tool = invocation.stage.to_string();
        let launch = |source| LmPrepError::ToolLaunch {
            tool: tool.clone(),
            source,
        };
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args);
        if invocation.stdin.is_some() {
            command.stdin(Stdio::piped());
        }
        let mut child = command.spawn().map_err(launch)?;

        // Feed stdin from a separate thread so a child producing output early cannot deadlock.
        let feeder = match (invocation.stdin.clone(), child.stdin.take()) {
            (Some(bytes), Some(mut pipe)) => {
                Some(thread::spawn(move || pipe.write_all(&bytes)))
            }
            _ => None,
        };
        let status = child.wait().map_err(launch)?;
        if let Some(handle) = feeder {
            let fed = handle
                .join()
                .map_err(|_| LmPrepError::Internal(format!("stdin writer for {tool} panicked")))?;
            // A tool may stop reading and close its end of the pipe; its status is what matters.
            match fed {
                Err(err) if status.success() && err.kind() != ErrorKind::BrokenPipe => {
                    return Err(launch(err));
                }
                _ => {}
            }
        }
        if !status.success() {
            return Err(LmPrepError::ToolFailed { tool, status });
        }
        Ok(())
    }
}

/// Paths of the model artifacts produced by [`ModelPipeline::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtifacts {
    /// Unfiltered ARPA model.
    pub arpa: PathBuf,
    /// ARPA model restricted to the vocabulary.
    pub filtered_arpa: PathBuf,
    /// Quantized binary model.
    pub binary: PathBuf,
}

/// Sequences the estimator, filter and binarizer for one corpus.
#[derive(Debug, Clone)]
pub struct ModelPipeline<R: ToolRunner = ProcessRunner> {
    cfg: PipelineConfig,
    runner: R,
}

impl ModelPipeline<ProcessRunner> {
    /// Creates a pipeline that launches the real KenLM binaries.
    #[must_use]
    pub fn new(cfg: PipelineConfig) -> Self {
        Self::with_runner(cfg, ProcessRunner)
    }
}

impl<R: ToolRunner> ModelPipeline<R> {
    /// Creates a pipeline executing tools through `runner`.
    #[must_use]
    pub fn with_runner(cfg: PipelineConfig, runner: R) -> Self {
        Self { cfg, runner }
    }

    /// Returns an immutable reference to the underlying configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    /// Builds the `lmplz` invocation producing the ARPA model from the normalized corpus.
    #[must_use]
    pub fn estimate_invocation(&self, paths: &ArtifactPaths, normalized: &Path) -> ToolInvocation {
        let cfg = &self.cfg;
        let arpa = paths.arpa(cfg.arpa_order, cfg.arpa_prune.as_str());
        let invocation = ToolInvocation::new(Stage::Estimate, &cfg.kenlm_bins, arpa.clone())
            .arg("--order")
            .arg(cfg.arpa_order.to_string())
            .arg("--temp_prefix")
            .arg(paths.output_dir())
            .arg("--memory")
            .arg(&cfg.max_arpa_memory)
            .arg("--text")
            .arg(normalized)
            .arg("--arpa")
            .arg(&arpa)
            .arg("--prune")
            .args(cfg.arpa_prune.values().iter().map(u64::to_string));
        if cfg.discount_fallback {
            invocation.arg("--discount_fallback")
        } else {
            invocation
        }
    }

    /// Builds the `filter` invocation that restricts the ARPA model to `vocabulary`.
    #[must_use]
    pub fn filter_invocation(
        &self,
        paths: &ArtifactPaths,
        arpa: &Path,
        vocabulary: &Vocabulary,
        top_k: usize,
    ) -> ToolInvocation {
        let cfg = &self.cfg;
        let filtered = paths.filtered_arpa(cfg.arpa_order, cfg.arpa_prune.as_str(), top_k);
        let mut model = OsString::from("model:");
        model.push(arpa);
        let mut invocation =
            ToolInvocation::new(Stage::Filter, &cfg.kenlm_bins, filtered.clone())
                .arg("single")
                .arg(model)
                .arg(&filtered);
        invocation.stdin = Some(vocabulary.to_text().into_bytes());
        invocation
    }

    /// Builds the `build_binary` invocation quantizing the filtered model.
    #[must_use]
    pub fn binarize_invocation(
        &self,
        paths: &ArtifactPaths,
        filtered: &Path,
        top_k: usize,
    ) -> ToolInvocation {
        let cfg = &self.cfg;
        let binary = paths.binary(cfg.arpa_order, cfg.arpa_prune.as_str(), top_k);
        let mut invocation = ToolInvocation::new(Stage::Binarize, &cfg.kenlm_bins, binary.clone());
        if let Some(bits) = cfg.binary_a_bits {
            invocation = invocation.arg("-a").arg(bits.to_string());
        }
        if let Some(bits) = cfg.binary_q_bits {
            invocation = invocation.arg("-q").arg(bits.to_string());
        }
        invocation = invocation.arg("-v");
        if let Some(kind) = &cfg.binary_type {
            invocation = invocation.arg(kind);
        }
        invocation.arg(filtered).arg(&binary)
    }

    /// Runs all three stages in order, stopping at the first failure.
    pub fn run(
        &self,
        paths: &ArtifactPaths,
        normalized: &Path,
        vocabulary: &Vocabulary,
        top_k: usize,
    ) -> Result<ModelArtifacts> {
        self.cfg.validate()?;

        let estimate = self.estimate_invocation(paths, normalized);
        self.execute("creating ARPA file", &estimate)?;

        let filter = self.filter_invocation(paths, &estimate.output, vocabulary, top_k);
        self.execute(
            "filtering ARPA file using vocabulary of top-k words",
            &filter,
        )?;

        let binarize = self.binarize_invocation(paths, &filter.output, top_k);
        self.execute("building binary model", &binarize)?;

        Ok(ModelArtifacts {
            arpa: estimate.output,
            filtered_arpa: filter.output,
            binary: binarize.output,
        })
    }

    fn execute(&self, action: &str, invocation: &ToolInvocation) -> Result<()> {
        info!("{action} -> {}", invocation.output.display());
        debug!("running {}", invocation.command_line());
        let start = Instant::now();
        self.runner.run(invocation)?;
        info!("{} finished in {:.2?}", invocation.stage, start.elapsed());
        Ok(())
    }
}
