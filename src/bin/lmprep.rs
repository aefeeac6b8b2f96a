use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use env_logger::Env;
use log::info;
use lmprep::config::{DEFAULT_ARPA_MEMORY, DEFAULT_ARPA_ORDER, DEFAULT_KENLM_BINS, DEFAULT_TOP_K};
use lmprep::{
    CounterKind, Extractor, ExtractorArtifacts, ModelArtifacts, ModelPipeline, PipelineConfig,
    PruneThresholds, VocabConfig,
};
use serde_json::{json, Value};

const DEFAULT_SKETCH_WIDTH: usize = 1 << 20;
const DEFAULT_SKETCH_DEPTH: usize = 4;

#[derive(Parser, Debug)]
#[command(author, version, about = "KenLM corpus preparation toolkit", long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity (-q, -qq)
    #[arg(short = 'q', long, global = true, action = ArgAction::Count)]
    quiet: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Normalize a corpus and extract its top-k vocabulary
    Vocab(VocabArgs),
    /// Normalize, extract the vocabulary and build a filtered binary KenLM model
    Build(BuildArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum CounterArg {
    /// Exact hash-map counting
    Exact,
    /// Count-min sketch with a bounded candidate table
    Sketch,
}

#[derive(Args, Debug)]
struct VocabArgs {
    /// Corpus to process (plain text or .gz)
    #[arg(long, value_name = "PATH")]
    input: PathBuf,

    /// Directory receiving all artifacts
    #[arg(long, value_name = "DIR", default_value = ".")]
    output_dir: PathBuf,

    /// Number of most frequent words to keep
    #[arg(long, value_name = "K", default_value_t = DEFAULT_TOP_K)]
    top_k: usize,

    /// Counting strategy
    #[arg(long, value_enum, default_value_t = CounterArg::Exact)]
    counter: CounterArg,

    /// Cells per sketch row
    #[arg(long, value_name = "N", default_value_t = DEFAULT_SKETCH_WIDTH)]
    sketch_width: usize,

    /// Number of sketch rows
    #[arg(long, value_name = "N", default_value_t = DEFAULT_SKETCH_DEPTH)]
    sketch_depth: usize,

    /// Heavy-hitter candidates kept by the sketch (defaults to twice --top-k)
    #[arg(long, value_name = "N")]
    sketch_capacity: Option<usize>,

    /// Disable the progress spinner
    #[arg(long)]
    no_progress: bool,

    /// Emit a JSON summary on stdout
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct BuildArgs {
    #[command(flatten)]
    vocab: VocabArgs,

    /// Directory containing lmplz, filter and build_binary
    #[arg(long, value_name = "DIR", default_value = DEFAULT_KENLM_BINS)]
    kenlm_bins: PathBuf,

    /// N-gram order
    #[arg(long, value_name = "N", default_value_t = DEFAULT_ARPA_ORDER)]
    arpa_order: usize,

    /// Memory budget for lmplz (e.g. 85% or 8G)
    #[arg(long, value_name = "MEM", default_value = DEFAULT_ARPA_MEMORY)]
    max_arpa_memory: String,

    /// Pipe-delimited pruning thresholds, one per order (e.g. 0|0|1)
    #[arg(long, value_name = "THRESHOLDS")]
    arpa_prune: PruneThresholds,

    /// Backoff quantization bits for build_binary
    #[arg(long, value_name = "BITS")]
    binary_a_bits: Option<u32>,

    /// Probability quantization bits for build_binary
    #[arg(long, value_name = "BITS")]
    binary_q_bits: Option<u32>,

    /// Binary data structure (e.g. trie)
    #[arg(long, value_name = "TYPE")]
    binary_type: Option<String>,

    /// Pass --discount_fallback to lmplz
    #[arg(long)]
    discount_fallback: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Vocab(args) => run_vocab(args),
        Commands::Build(args) => run_build(args),
    }
}

fn init_logging(verbose: u8, quiet: u8) {
    use log::LevelFilter;

    let level = match (quiet, verbose) {
        (0, 0) => LevelFilter::Info,
        (0, 1) => LevelFilter::Debug,
        (0, _) => LevelFilter::Trace,
        (1, _) => LevelFilter::Warn,
        _ => LevelFilter::Error,
    };

    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    builder.format_timestamp_millis();
    builder.filter_level(level);
    let _ = builder.try_init();
}

fn vocab_config(args: &VocabArgs) -> Result<VocabConfig> {
    let counter = match args.counter {
        CounterArg::Exact => CounterKind::Exact,
        CounterArg::Sketch => CounterKind::Sketch {
            width: args.sketch_width,
            depth: args.sketch_depth,
            capacity: args
                .sketch_capacity
                .unwrap_or_else(|| args.top_k.saturating_mul(2)),
        },
    };
    VocabConfig::builder()
        .output_dir(&args.output_dir)
        .top_k(args.top_k)
        .counter(counter)
        .show_progress(!args.no_progress)
        .build()
        .context("invalid vocabulary settings")
}

fn extract(args: &VocabArgs) -> Result<ExtractorArtifacts> {
    let extractor = Extractor::new(vocab_config(args)?);
    extractor
        .run(&args.input)
        .with_context(|| format!("failed to extract vocabulary from {}", args.input.display()))
}

fn run_vocab(args: VocabArgs) -> Result<()> {
    let artifacts = extract(&args)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary(&artifacts, None))?);
    } else {
        print!("{artifacts}");
    }
    Ok(())
}

fn run_build(args: BuildArgs) -> Result<()> {
    let start = Instant::now();
    let pipeline_cfg = PipelineConfig::builder(args.arpa_prune.clone())
        .kenlm_bins(&args.kenlm_bins)
        .arpa_order(args.arpa_order)
        .max_arpa_memory(args.max_arpa_memory.clone())
        .quantization(args.binary_a_bits, args.binary_q_bits)
        .binary_type(args.binary_type.clone())
        .discount_fallback(args.discount_fallback)
        .build()
        .context("invalid model pipeline settings")?;

    let artifacts = extract(&args.vocab)?;
    let model = ModelPipeline::new(pipeline_cfg)
        .run(
            &artifacts.paths,
            &artifacts.normalized_corpus,
            &artifacts.vocabulary,
            args.vocab.top_k,
        )
        .context("KenLM pipeline failed")?;
    info!("pipeline finished in {:.2?}", start.elapsed());

    if args.vocab.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary(&artifacts, Some(&model)))?
        );
    } else {
        print!("{artifacts}");
        println!("ARPA model: {}", model.arpa.display());
        println!("Filtered ARPA model: {}", model.filtered_arpa.display());
        println!("Binary model: {}", model.binary.display());
    }
    Ok(())
}

fn summary(artifacts: &ExtractorArtifacts, model: Option<&ModelArtifacts>) -> Value {
    let mut value = json!({
        "normalized_corpus": artifacts.normalized_corpus,
        "normalized_reused": !artifacts.normalized_fresh,
        "vocabulary": artifacts.vocabulary_path,
        "vocabulary_size": artifacts.vocabulary.len(),
        "stats": artifacts.stats,
        "duration_seconds": artifacts.duration.as_secs_f64(),
    });
    if let Some(model) = model {
        value["arpa"] = json!(model.arpa);
        value["filtered_arpa"] = json!(model.filtered_arpa);
        value["binary"] = json!(model.binary);
    }
    value
}
