//! Run configuration for the mapping and alignment stages.
//!
//! The CLI resolves user options into these structs once; everything
//! downstream receives them by reference through the `PipelineContext`.

use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Plane-sweep filtering discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterMode {
    /// Keep everything that passed L2.
    None,
    /// Keep the top-n mappings per query position.
    Map,
    /// Keep the top-n mappings per query position and per target position.
    OneToOne,
}

/// Hypergeometric admission parameters for the L1 stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HgFilter {
    /// Numerator scaling of the index frequency cap; must be >= 1.0.
    pub numerator: f64,
    /// Identity slack below the mapping floor, in [0,1].
    pub ani_diff: f64,
    /// Admission confidence, in (0,1).
    pub confidence: f64,
}

impl Default for HgFilter {
    fn default() -> Self {
        Self {
            numerator: 1.0,
            ani_diff: 0.0,
            confidence: 0.999,
        }
    }
}

/// Configuration of the sketch-and-map stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapConfig {
    /// k-mer size.
    pub k: usize,
    /// Query segment length in bp; queries shorter than this map whole.
    pub segment_length: u64,
    /// Minimum reported block length.
    pub block_length: u64,
    /// Target identity floor in [0,1].
    pub pct_identity: f64,
    /// Explicit sketch size per segment; `None` derives it from identity.
    pub sketch_size: Option<u64>,
    /// Mappings retained per query/target pair.
    pub num_mappings: usize,
    /// Maximum gap for chaining colinear mappings, both axes.
    pub chain_gap: u64,
    /// Chains longer than this are split.
    pub max_mapping_length: u64,
    /// Plane-sweep overlap cap as a fraction of the candidate's length.
    pub overlap_threshold: f64,
    pub filter_mode: FilterMode,
    pub hg: HgFilter,
    /// L1 admission override; `None` derives it from the hypergeometric model.
    pub min_hits: Option<u32>,
    /// Minimum 2-mer entropy for a k-mer to enter a sketch, in [0,1].
    pub kmer_complexity: f64,
    pub threads: usize,
    /// Resident target byte budget per index batch.
    pub index_by_size: u64,
    /// Hashes at or above this value are never sampled.
    pub sparsity_hash_threshold: u64,
    /// Delimiter splitting sequence names into group prefixes.
    pub prefix_delim: char,
    /// When set, only targets with this name prefix are indexed.
    pub target_prefix: Option<String>,
    /// When non-empty, only queries matching one of these prefixes map.
    pub query_prefix: Vec<String>,
    /// Skip query/target pairs with identical names.
    pub skip_self: bool,
    /// Skip pairs sharing the same prefix group.
    pub skip_prefix: bool,
    /// Emit each unordered pair once.
    pub lower_triangular: bool,
    /// Map each query in one piece instead of tiling segments.
    pub no_split: bool,
    /// Replace each chain by its hull mapping.
    pub merge_mappings: bool,
    /// Keep mappings below the identity floor.
    pub keep_low_pct_id: bool,
    /// Drop mappings whose axis lengths differ by more than `chain_gap`.
    pub filter_length_mismatches: bool,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            k: 15,
            segment_length: 1000,
            block_length: 3000,
            pct_identity: 0.70,
            sketch_size: None,
            num_mappings: 1,
            chain_gap: 2000,
            max_mapping_length: 50_000,
            overlap_threshold: 0.5,
            filter_mode: FilterMode::Map,
            hg: HgFilter::default(),
            min_hits: None,
            kmer_complexity: 0.0,
            threads: 1,
            index_by_size: 4 * 1024 * 1024 * 1024,
            sparsity_hash_threshold: u64::MAX,
            prefix_delim: '#',
            target_prefix: None,
            query_prefix: Vec::new(),
            skip_self: false,
            skip_prefix: false,
            lower_triangular: false,
            no_split: false,
            merge_mappings: true,
            keep_low_pct_id: false,
            filter_length_mismatches: true,
        }
    }
}

impl MapConfig {
    /// Minmer sampling density. User sketch sizes override the
    /// identity-derived density.
    pub fn density(&self) -> f64 {
        let window = (self.segment_length.saturating_sub(self.k as u64)).max(1) as f64;
        match self.sketch_size {
            Some(s) => (s as f64 / window).min(1.0),
            None => {
                let divergence = 1.0 - self.pct_identity;
                (0.02 * (1.0 + divergence / 0.05)).min(1.0)
            }
        }
    }

    /// Sketch size targeted per full-length segment.
    pub fn effective_sketch_size(&self) -> u64 {
        let window = (self.segment_length.saturating_sub(self.k as u64)).max(1) as f64;
        (self.density() * window).round().max(1.0) as u64
    }
}

/// Gap-affine penalty set (match cost 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Penalties {
    pub mismatch: u32,
    pub gap_open: u32,
    pub gap_extend: u32,
}

impl Default for Penalties {
    fn default() -> Self {
        Self {
            mismatch: 2,
            gap_open: 3,
            gap_extend: 1,
        }
    }
}

/// Two-piece gap-affine penalty set for patching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DualPenalties {
    pub mismatch: u32,
    pub gap_open1: u32,
    pub gap_extend1: u32,
    pub gap_open2: u32,
    pub gap_extend2: u32,
}

impl Default for DualPenalties {
    fn default() -> Self {
        Self {
            mismatch: 3,
            gap_open1: 4,
            gap_extend1: 2,
            gap_open2: 24,
            gap_extend2: 1,
        }
    }
}

/// Configuration of the wavefront alignment stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignConfig {
    /// Base penalties for end-to-end fragment alignment.
    pub penalties: Penalties,
    /// Dual-cost penalties for patch alignment.
    pub patch_penalties: DualPenalties,
    /// Fragment tile size for long mappings.
    pub wflambda_segment_length: u64,
    /// Minimum stitched identity; below it a mapping-only record is emitted.
    pub min_identity: f64,
    /// Junction erosion length; negative derives it from divergence.
    pub erode_k: i64,
    pub chain_gap: u64,
    /// Padding budget for boundary correction.
    pub max_len_minor: u64,
    /// Upper bound on a single alignment problem.
    pub max_len_major: u64,
    /// Patch score cap; 0 derives it from penalties and region length.
    pub max_patching_score: u32,
    pub sam_format: bool,
    pub emit_md_tag: bool,
    pub no_seq_in_sam: bool,
    pub threads: usize,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self::for_segment_length(1000)
    }
}

impl AlignConfig {
    /// Derive the alignment-stage bounds from the mapping segment length.
    pub fn for_segment_length(segment_length: u64) -> Self {
        Self {
            penalties: Penalties::default(),
            patch_penalties: DualPenalties::default(),
            wflambda_segment_length: 256,
            min_identity: 0.0,
            erode_k: -1,
            chain_gap: 2000,
            max_len_minor: segment_length * 128,
            max_len_major: segment_length * 512,
            max_patching_score: 0,
            sam_format: false,
            emit_md_tag: false,
            no_seq_in_sam: false,
            threads: 1,
        }
    }
}

/// Shared state threaded through the pipeline stages.
///
/// Replaces what the mapping and alignment stages would otherwise reach for
/// as process-global state: the cooperative stop flag and both configs.
#[derive(Clone)]
pub struct PipelineContext {
    pub map: Arc<MapConfig>,
    pub align: Arc<AlignConfig>,
    pub stop: Arc<AtomicBool>,
}

impl PipelineContext {
    pub fn new(map: MapConfig, align: AlignConfig) -> Self {
        Self {
            map: Arc::new(map),
            align: Arc::new(align),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }
}
