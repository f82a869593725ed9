use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::process::exit;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use wavemap_core::index::IndexError;
use wavemap_core::pipeline::{self, Inputs, PipelineError};
use wavemap_core::store::StoreError;
use wavemap_core::{
    AlignConfig, DualPenalties, FilterMode, HgFilter, MapConfig, MinmerIndex, Penalties,
    PipelineContext,
};

#[derive(Parser)]
#[command(name = "wavemap")]
#[command(about = "wavemap - base-accurate DNA homology mapper and aligner")]
#[command(version)]
struct Cli {
    /// Target sequences (FASTA, optionally gzipped)
    target: PathBuf,

    /// Query sequences; omitted means all-vs-all self mapping
    queries: Vec<PathBuf>,

    // --- Indexing ---
    /// Build and save the minmer index to FILE
    #[arg(short = 'W', long, value_name = "FILE")]
    write_index: Option<PathBuf>,

    /// Use a pre-built minmer index from FILE
    #[arg(short = 'I', long, value_name = "FILE")]
    read_index: Option<PathBuf>,

    /// Target batch size for indexing (suffixes k/M/G accepted)
    #[arg(short = 'b', long = "batch", default_value = "4G", value_name = "SIZE")]
    index_by_size: String,

    /// Sketch size for minmer sampling [auto from identity]
    #[arg(short = 'w', long, value_name = "INT")]
    sketch_size: Option<u64>,

    /// k-mer size
    #[arg(short = 'k', long, default_value_t = 15, value_name = "INT")]
    kmer_size: usize,

    // --- Mapping ---
    /// Output approximate mappings, skip alignment
    #[arg(short = 'm', long)]
    approx_mapping: bool,

    /// Minimum mapping identity in percent
    #[arg(short = 'p', long = "map-pct-id", default_value_t = 70.0, value_name = "FLOAT")]
    map_pct_id: f64,

    /// Mappings to keep per query/target pair
    #[arg(short = 'n', long = "mappings", default_value_t = 1, value_name = "INT")]
    num_mappings: usize,

    /// Segment length for mapping (suffixes accepted)
    #[arg(short = 's', long, default_value = "1k", value_name = "INT")]
    segment_length: String,

    /// Minimum block length [3 * segment length]
    #[arg(short = 'l', long, value_name = "INT")]
    block_length: Option<String>,

    /// Keep top mappings per query and per target
    #[arg(short = 'o', long)]
    one_to_one: bool,

    /// Disable mapping filtering
    #[arg(short = 'f', long)]
    no_filter: bool,

    /// Emit each unordered pair once in all-vs-all mode
    #[arg(short = 'L', long)]
    lower_triangular: bool,

    /// Skip query/target pairs with identical names
    #[arg(long)]
    skip_self: bool,

    /// Group-prefix delimiter for name-space filtering
    #[arg(short = 'Y', long = "group-prefix", default_value_t = '#', value_name = "C")]
    prefix_delim: char,

    /// Use only targets whose names start with this prefix
    #[arg(short = 'T', long, value_name = "PFX")]
    target_prefix: Option<String>,

    /// Comma-separated query name prefixes
    #[arg(short = 'Q', long, value_name = "PFXS")]
    query_prefix: Option<String>,

    /// Map each query in one piece
    #[arg(short = 'N', long)]
    no_split: bool,

    /// Max gap to chain mappings (suffixes accepted)
    #[arg(short = 'c', long, default_value = "2k", value_name = "INT")]
    chain_gap: String,

    /// Split chains longer than this (suffixes accepted)
    #[arg(short = 'P', long = "max-length", default_value = "50k", value_name = "INT")]
    max_mapping_length: String,

    /// Plane-sweep overlap threshold
    #[arg(short = 'O', long = "overlap", default_value_t = 0.5, value_name = "FLOAT")]
    overlap_threshold: f64,

    /// Disable merging of chained mappings
    #[arg(short = 'M', long)]
    no_merge: bool,

    /// Minimum k-mer 2-mer entropy
    #[arg(short = 'J', long = "kmer-cmplx", default_value_t = 0.0, value_name = "FLOAT")]
    kmer_complexity: f64,

    /// Hypergeometric filter: numerator,ani-diff,confidence
    #[arg(long = "hg-filter", default_value = "1.0,0.0,99.9", value_name = "N,D,C")]
    hg_filter: String,

    /// Minimum L1 hits [auto from the hypergeometric model]
    #[arg(long, value_name = "INT")]
    min_hits: Option<u32>,

    /// Keep mappings below the identity floor
    #[arg(long)]
    keep_low_pct_id: bool,

    /// Hash sparsification factor in (0, 1]
    #[arg(long, default_value_t = 1.0, value_name = "FLOAT")]
    sparsification: f64,

    // --- Alignment ---
    /// Align a prior mapping run instead of mapping first
    #[arg(short = 'i', long = "input-mapping", value_name = "FILE")]
    input_mapping: Option<PathBuf>,

    /// WFA penalties: mismatch,gap-open,gap-extend (3 values) or the
    /// dual-cost patching set (5 values)
    #[arg(short = 'g', long = "wfa-params", value_name = "VALS")]
    wfa_params: Option<String>,

    /// Fragment tile length for long mappings
    #[arg(long = "wflambda-segment", default_value_t = 256, value_name = "N")]
    wflambda_segment_length: u64,

    /// Junction erosion length; negative derives it from divergence
    #[arg(long, default_value_t = -1, value_name = "INT")]
    erode_k: i64,

    /// Patch score cap; 0 derives it from penalties and length
    #[arg(long, default_value_t = 0, value_name = "INT")]
    max_patching_score: u32,

    /// Minimum stitched identity to emit an alignment
    #[arg(long, default_value_t = 0.0, value_name = "FLOAT")]
    min_identity: f64,

    // --- Output ---
    /// Output SAM instead of PAF
    #[arg(short = 'a', long = "sam")]
    sam_format: bool,

    /// Emit the MD tag
    #[arg(short = 'd', long = "md-tag")]
    emit_md_tag: bool,

    /// Omit the sequence field in SAM output
    #[arg(short = 'q', long = "no-seq-sam")]
    no_seq_in_sam: bool,

    // --- System ---
    /// Worker threads
    #[arg(short = 't', long, default_value_t = 1, value_name = "INT")]
    threads: usize,

    #[arg(short = 'v', long)]
    verbose: bool,
}

/// Parse a size with optional k/M/G suffix, as accepted on the original
/// command line.
fn handy_parameter(value: &str) -> Option<u64> {
    let value = value.trim();
    let (digits, exp) = match value.chars().last()? {
        'k' | 'K' => (&value[..value.len() - 1], 1_000f64),
        'm' | 'M' => (&value[..value.len() - 1], 1_000_000f64),
        'g' | 'G' => (&value[..value.len() - 1], 1_000_000_000f64),
        _ => (value, 1f64),
    };
    let base: f64 = digits.parse().ok()?;
    if base < 0.0 {
        return None;
    }
    Some((base * exp) as u64)
}

fn fatal_usage(msg: &str) -> ! {
    eprintln!("[wavemap] ERROR: {msg}");
    exit(1);
}

/// Resolve CLI options into the stage configs, enforcing the documented
/// bounds. Violations are usage errors.
fn resolve_configs(cli: &Cli) -> (MapConfig, AlignConfig) {
    let approx = cli.approx_mapping;

    let segment_length = handy_parameter(&cli.segment_length)
        .unwrap_or_else(|| fatal_usage("segment length must be a positive number"));
    if segment_length < 100 {
        fatal_usage("minimum segment length is 100 bp; shorter local alignments are out of scope");
    }
    if !approx && segment_length > 10_000 {
        fatal_usage("segment length must be <= 10 kb when aligning; use -m for approximate mapping");
    }

    let block_length = match &cli.block_length {
        Some(value) => handy_parameter(value)
            .unwrap_or_else(|| fatal_usage("block length must be a non-negative number")),
        None => 3 * segment_length,
    };
    if !approx && block_length > 30_000 {
        fatal_usage("block length must be <= 30 kb when aligning; use -m for approximate mapping");
    }

    if cli.map_pct_id < 50.0 {
        fatal_usage("minimum mapping identity must be >= 50%");
    }

    let chain_gap = handy_parameter(&cli.chain_gap)
        .unwrap_or_else(|| fatal_usage("chain gap must be a non-negative number"));
    let max_mapping_length = handy_parameter(&cli.max_mapping_length)
        .unwrap_or_else(|| fatal_usage("max mapping length must be a positive number"));
    if max_mapping_length == 0 {
        fatal_usage("max mapping length must be greater than 0");
    }
    if !approx && max_mapping_length > 100_000 {
        fatal_usage("max mapping length must be <= 100 kb when aligning; use -m");
    }
    if segment_length >= max_mapping_length {
        fatal_usage("segment length must be smaller than the max mapping length");
    }

    let index_by_size = handy_parameter(&cli.index_by_size)
        .filter(|&v| v > 0)
        .unwrap_or_else(|| fatal_usage("batch size must be a positive number"));

    let hg = parse_hg_filter(&cli.hg_filter);
    if hg.numerator < 1.0 {
        fatal_usage("hypergeometric filter numerator must be >= 1.0");
    }

    if cli.sparsification <= 0.0 || cli.sparsification > 1.0 {
        fatal_usage("sparsification factor must be in (0, 1]");
    }
    let sparsity_hash_threshold = if (cli.sparsification - 1.0).abs() < f64::EPSILON {
        u64::MAX
    } else {
        (cli.sparsification * u64::MAX as f64) as u64
    };

    let filter_mode = if cli.no_filter {
        FilterMode::None
    } else if cli.one_to_one {
        FilterMode::OneToOne
    } else {
        FilterMode::Map
    };

    let map = MapConfig {
        k: cli.kmer_size,
        segment_length,
        block_length,
        pct_identity: cli.map_pct_id / 100.0,
        sketch_size: cli.sketch_size,
        num_mappings: cli.num_mappings.max(1),
        chain_gap,
        max_mapping_length,
        overlap_threshold: cli.overlap_threshold,
        filter_mode,
        hg,
        min_hits: cli.min_hits,
        kmer_complexity: cli.kmer_complexity,
        threads: cli.threads.max(1),
        index_by_size,
        sparsity_hash_threshold,
        prefix_delim: cli.prefix_delim,
        target_prefix: cli.target_prefix.clone(),
        query_prefix: cli
            .query_prefix
            .as_deref()
            .map(|s| s.split(',').map(str::to_string).collect())
            .unwrap_or_default(),
        skip_self: cli.skip_self,
        skip_prefix: cli.prefix_delim != '\0',
        lower_triangular: cli.lower_triangular,
        no_split: cli.no_split,
        merge_mappings: !cli.no_merge,
        keep_low_pct_id: cli.keep_low_pct_id,
        filter_length_mismatches: true,
    };

    let mut align = AlignConfig::for_segment_length(segment_length);
    align.wflambda_segment_length = cli.wflambda_segment_length;
    align.min_identity = cli.min_identity;
    align.erode_k = cli.erode_k;
    align.chain_gap = chain_gap;
    align.max_patching_score = cli.max_patching_score;
    align.sam_format = cli.sam_format;
    align.emit_md_tag = cli.emit_md_tag;
    align.no_seq_in_sam = cli.no_seq_in_sam;
    align.threads = cli.threads.max(1);

    if let Some(params) = &cli.wfa_params {
        let values: Vec<u32> = params
            .split(',')
            .map(|v| {
                v.trim()
                    .parse()
                    .unwrap_or_else(|_| fatal_usage("wfa-params values must be integers"))
            })
            .collect();
        match values.as_slice() {
            // Base end-to-end penalties.
            [mismatch, gap_open, gap_extend] => {
                align.penalties = Penalties {
                    mismatch: *mismatch,
                    gap_open: *gap_open,
                    gap_extend: *gap_extend,
                };
            }
            // Dual-cost patching penalty set.
            [mismatch, o1, e1, o2, e2] => {
                align.patch_penalties = DualPenalties {
                    mismatch: *mismatch,
                    gap_open1: *o1,
                    gap_extend1: *e1,
                    gap_open2: *o2,
                    gap_extend2: *e2,
                };
            }
            _ => fatal_usage("--wfa-params takes 3 (base) or 5 (patching) comma-separated values"),
        }
    }

    (map, align)
}

fn parse_hg_filter(spec: &str) -> HgFilter {
    let parts: Vec<f64> = spec
        .split(',')
        .map(|v| {
            v.trim()
                .parse()
                .unwrap_or_else(|_| fatal_usage("hg-filter values must be numbers"))
        })
        .collect();
    if parts.len() != 3 {
        fatal_usage("--hg-filter takes numerator,ani-diff,confidence");
    }
    HgFilter {
        numerator: parts[0],
        ani_diff: parts[1] / 100.0,
        confidence: parts[2] / 100.0,
    }
}

fn run(cli: &Cli, ctx: &PipelineContext) -> Result<()> {
    let query_files = if cli.queries.is_empty() {
        log::info!("no queries given; performing all-vs-all mapping including self mappings");
        vec![cli.target.clone()]
    } else {
        cli.queries.clone()
    };
    let inputs = Inputs {
        target_files: vec![cli.target.clone()],
        query_files,
    };
    let (ids, store) = pipeline::load_inputs(&inputs, ctx)?;

    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::new(stdout.lock());

    // Alignment of an existing mapping file skips the mapping stage.
    if let Some(mapping_file) = &cli.input_mapping {
        let aligned = pipeline::run_alignment(ctx, &ids, &store, mapping_file, &mut out)?;
        log::info!("aligned {aligned} mappings");
        return Ok(());
    }

    // A pre-built or to-be-saved index replaces batched building.
    let prebuilt = match (&cli.read_index, &cli.write_index) {
        (Some(path), _) => {
            let index = MinmerIndex::load(path, ctx.map.k as u32, ctx.map.density())
                .map_err(PipelineError::Index)?;
            log::info!("loaded index from {}: {} hashes", path.display(), index.num_hashes());
            Some(Arc::new(index))
        }
        (None, Some(path)) => {
            let all_targets = ids.target_ids();
            let index = pipeline::build_index(ctx, &ids, &store.handle(), &all_targets)?;
            index.save(path).map_err(PipelineError::Index)?;
            log::info!("wrote index to {}", path.display());
            Some(Arc::new(index))
        }
        (None, None) => None,
    };

    if cli.approx_mapping {
        let records = match prebuilt {
            Some(index) => {
                let chain_counter = AtomicU32::new(0);
                pipeline::run_mapping_with_index(ctx, &ids, &store, &index, &chain_counter, &mut out)?
            }
            None => pipeline::run_mapping(ctx, &ids, &store, &mut out)?,
        };
        out.flush().context("flushing output")?;
        log::info!("wrote {records} mapping records");
        return Ok(());
    }

    // Full two-stage run: map into a temporary file, then align it.
    let mut mapping_file = tempfile::NamedTempFile::new().context("creating temp mapping file")?;
    {
        let mut mapping_out = std::io::BufWriter::new(mapping_file.as_file_mut());
        let records = match prebuilt {
            Some(index) => {
                let chain_counter = AtomicU32::new(0);
                pipeline::run_mapping_with_index(
                    ctx,
                    &ids,
                    &store,
                    &index,
                    &chain_counter,
                    &mut mapping_out,
                )?
            }
            None => pipeline::run_mapping(ctx, &ids, &store, &mut mapping_out)?,
        };
        mapping_out.flush().context("flushing mapping file")?;
        log::info!("mapped: {records} records");
    }
    let aligned = pipeline::run_alignment(ctx, &ids, &store, mapping_file.path(), &mut out)?;
    log::info!("aligned {aligned} mappings");
    Ok(())
}

/// Map errors to the documented exit codes: 2 input validation, 3
/// incompatible index, 4 I/O, 5 internal.
fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(pe) = err.downcast_ref::<PipelineError>() {
        return match pe {
            PipelineError::Store(StoreError::Io(_)) => 4,
            PipelineError::Store(_) => 2,
            PipelineError::Paf(wavemap_core::PafError::Io(_)) => 4,
            PipelineError::Paf(_) => 2,
            PipelineError::UnknownSequence(_) => 2,
            PipelineError::Index(IndexError::Incompatible(_)) => 3,
            PipelineError::Index(IndexError::Corrupt(_)) => 3,
            PipelineError::Index(IndexError::Io(_)) => 4,
            PipelineError::Index(IndexError::Invariant(_)) => 5,
            PipelineError::Io(_) => 4,
            PipelineError::Internal(_) => 5,
        };
    }
    if err.downcast_ref::<std::io::Error>().is_some() {
        return 4;
    }
    5
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            exit(code);
        }
    };

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let (map_config, align_config) = resolve_configs(&cli);
    log::info!(
        "parameters: k={}, s={}, l={}, c={}, P={}, n={}, p={:.0}%, t={}",
        map_config.k,
        map_config.segment_length,
        map_config.block_length,
        map_config.chain_gap,
        map_config.max_mapping_length,
        map_config.num_mappings,
        map_config.pct_identity * 100.0,
        map_config.threads,
    );
    let ctx = PipelineContext::new(map_config, align_config);

    if let Err(e) = run(&cli, &ctx) {
        eprintln!("[wavemap] ERROR: {e:#}");
        exit(exit_code(&e));
    }
}
