//! The sketch-and-map stage.
//!
//! `Mapper` ties the per-segment L1/L2 passes together with chaining and
//! per-query filtering. The target-axis half of one-to-one filtering needs
//! every query's mappings at once, so the pipeline driver runs
//! `filter::filter_mappings` over the whole batch instead.

pub mod chain;
pub mod filter;
pub mod l1;
pub mod l2;

use crate::config::{FilterMode, MapConfig};
use crate::ids::SequenceIdManager;
use crate::index::MinmerIndex;
use crate::sketch::{sketch_window, SketchParams};
use crate::types::{Mapping, QuerySegment, SeqId};

/// Maps one query at a time against a finalized index.
pub struct Mapper<'a> {
    config: &'a MapConfig,
    index: &'a MinmerIndex,
    ids: &'a SequenceIdManager,
    min_hits: u32,
    sketch_params: SketchParams,
}

impl<'a> Mapper<'a> {
    pub fn new(config: &'a MapConfig, index: &'a MinmerIndex, ids: &'a SequenceIdManager) -> Self {
        let min_hits = config.min_hits.unwrap_or_else(|| {
            l1::minimum_hits(
                config.effective_sketch_size(),
                config.k,
                (config.pct_identity - config.hg.ani_diff).max(0.0),
                config.hg.confidence,
            )
        });
        let mut sketch_params =
            SketchParams::new(config.k, config.density(), config.kmer_complexity);
        sketch_params.sparsity_threshold = config.sparsity_hash_threshold;
        Self {
            config,
            index,
            ids,
            min_hits,
            sketch_params,
        }
    }

    pub fn min_hits(&self) -> u32 {
        self.min_hits
    }

    /// Tile a query into segments. Queries at or below the segment length
    /// (or with splitting disabled) map whole.
    fn segments(&self, query_id: SeqId, len: u64) -> Vec<QuerySegment> {
        let seg_len = self.config.segment_length;
        if self.config.no_split || len <= seg_len {
            return vec![QuerySegment {
                seq_id: query_id,
                start: 0,
                end: len,
            }];
        }
        let mut segments = Vec::with_capacity((len / seg_len + 1) as usize);
        let mut start = 0;
        while start < len {
            let end = (start + seg_len).min(len);
            segments.push(QuerySegment {
                seq_id: query_id,
                start,
                end,
            });
            start = end;
        }
        segments
    }

    /// Map one query sequence. Returns chained, per-query-filtered mappings.
    pub fn map_query(
        &self,
        query_id: SeqId,
        query_seq: &[u8],
        next_chain_id: &mut u32,
    ) -> Vec<Mapping> {
        let mut raw = Vec::new();
        for segment in self.segments(query_id, query_seq.len() as u64) {
            let minmers = sketch_window(
                query_seq,
                query_id,
                segment.start as usize,
                segment.len() as usize,
                &self.sketch_params,
            );
            if minmers.is_empty() {
                continue;
            }
            let window_length = segment.len().max(self.config.segment_length);
            let candidates = l1::collect_candidates(
                &minmers,
                self.index,
                window_length,
                self.min_hits,
                |target_id| self.ids.pair_eligible(query_id, target_id, self.config),
            );
            for candidate in &candidates {
                if let Some(mapping) =
                    l2::refine_candidate(&minmers, segment, candidate, self.index, self.config)
                {
                    raw.push(mapping);
                }
            }
        }

        let chained = chain::chain_mappings(raw, self.config, next_chain_id);

        // The minimum block length applies to chained spans; a query that is
        // itself shorter than the floor is exempt so short sequences still
        // map whole.
        let query_len = query_seq.len() as u64;
        let chained: Vec<Mapping> = chained
            .into_iter()
            .filter(|m| {
                m.block_length >= self.config.block_length || query_len < self.config.block_length
            })
            .collect();

        // The target-axis sweep of one-to-one filtering is global; here we
        // only run the per-query part.
        match self.config.filter_mode {
            FilterMode::None => filter::filter_mappings(chained, &no_sweep(self.config)),
            _ => filter::filter_mappings(chained, &query_sweep(self.config)),
        }
    }
}

fn no_sweep(config: &MapConfig) -> MapConfig {
    MapConfig {
        filter_mode: FilterMode::None,
        ..config.clone()
    }
}

fn query_sweep(config: &MapConfig) -> MapConfig {
    MapConfig {
        filter_mode: FilterMode::Map,
        ..config.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Strand;

    fn test_seq(n: usize, seed: u32) -> Vec<u8> {
        (0..n as u32)
            .map(|i| {
                b"ACGT"[(i.wrapping_mul(2654435761).wrapping_add(seed.wrapping_mul(7919)) >> 9)
                    as usize
                    % 4]
            })
            .collect()
    }

    fn build_fixture(seq: &[u8], config: &MapConfig) -> (MinmerIndex, SequenceIdManager) {
        let mut ids = SequenceIdManager::new();
        let target_id = ids.register("target", seq.len() as u64, true, false).unwrap();
        let mut index = MinmerIndex::new(config.k as u32, config.density());
        index.add_sequence("target", seq.len() as u64);
        let params = SketchParams::new(config.k, config.density(), config.kmer_complexity);
        index.insert(&sketch_window(seq, target_id, 0, seq.len(), &params));
        index.finalize(MinmerIndex::compute_freq_cap(
            seq.len() as u64,
            config.density(),
            config.hg.numerator,
            config.k as u32,
        ));
        (index, ids)
    }

    #[test]
    fn self_mapping_covers_the_query() {
        let config = MapConfig::default();
        let seq = test_seq(8000, 5);
        let (index, mut ids) = build_fixture(&seq, &config);
        let query_id = ids.register("query", seq.len() as u64, false, true).unwrap();

        let mapper = Mapper::new(&config, &index, &ids);
        let mut chain_id = 0;
        let mappings = mapper.map_query(query_id, &seq, &mut chain_id);
        assert!(!mappings.is_empty());

        let covered: u64 = mappings.iter().map(|m| m.query_len()).sum();
        assert!(
            covered as f64 >= 0.99 * seq.len() as f64,
            "covered {covered} of {}",
            seq.len()
        );
        for m in &mappings {
            assert!(m.est_identity > 0.95);
            assert_eq!(m.strand, Strand::Forward);
            assert!(m.query_end <= seq.len() as u64);
            assert!(m.target_end <= seq.len() as u64);
        }
    }

    #[test]
    fn single_segment_self_map_reaches_full_identity() {
        // One whole-query segment against an identical target: the minmer
        // sets coincide, so the Mash estimate must come out at exactly 1.0.
        let config = MapConfig::default();
        let seq = test_seq(800, 9);
        let (index, mut ids) = build_fixture(&seq, &config);
        let query_id = ids.register("query", seq.len() as u64, false, true).unwrap();

        let mapper = Mapper::new(&config, &index, &ids);
        let mut chain_id = 0;
        let mappings = mapper.map_query(query_id, &seq, &mut chain_id);
        assert_eq!(mappings.len(), 1);
        let m = &mappings[0];
        assert!(m.est_identity > 0.999, "ani {}", m.est_identity);
        assert!((m.jaccard - 1.0).abs() < 1e-9);
        assert_eq!(m.query_start, 0);
        assert_eq!(m.query_end, 800);
        assert!(m.query_len() as f64 >= 0.99 * seq.len() as f64);
    }

    #[test]
    fn short_query_maps_whole() {
        let config = MapConfig::default();
        let target = test_seq(4000, 6);
        let (index, mut ids) = build_fixture(&target, &config);
        let query = target[800..1400].to_vec();
        let query_id = ids.register("query", query.len() as u64, false, true).unwrap();

        let mapper = Mapper::new(&config, &index, &ids);
        let mut chain_id = 0;
        let mappings = mapper.map_query(query_id, &query, &mut chain_id);
        assert!(!mappings.is_empty());
        // One whole-query mapping, not split into segments.
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].query_start, 0);
        assert_eq!(mappings[0].query_end, 600);
    }

    #[test]
    fn homopolymer_target_produces_no_mappings() {
        let config = MapConfig {
            kmer_complexity: 0.2,
            ..MapConfig::default()
        };
        let target = vec![b'A'; 5000];
        let (index, mut ids) = build_fixture(&target, &config);
        assert_eq!(index.num_hashes(), 0, "complexity gate empties the index");

        let query = test_seq(3000, 7);
        let query_id = ids.register("query", query.len() as u64, false, true).unwrap();
        let mapper = Mapper::new(&config, &index, &ids);
        let mut chain_id = 0;
        assert!(mapper.map_query(query_id, &query, &mut chain_id).is_empty());
    }

    #[test]
    fn substituted_query_estimates_identity() {
        let config = MapConfig {
            block_length: 1000,
            ..MapConfig::default()
        };
        let target = test_seq(10_000, 8);
        let (index, mut ids) = build_fixture(&target, &config);

        // 3% uniform substitutions.
        let mut query = target.clone();
        let mut state = 0x9e3779b97f4a7c15u64;
        let mut substituted = 0usize;
        for i in 0..query.len() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            if state >> 40 < (0.03 * (1u64 << 24) as f64) as u64 {
                let old = query[i];
                let mut replacement = b"ACGT"[(state >> 13) as usize % 4];
                if replacement == old {
                    replacement = match old {
                        b'A' => b'C',
                        b'C' => b'G',
                        b'G' => b'T',
                        _ => b'A',
                    };
                }
                query[i] = replacement;
                substituted += 1;
            }
        }
        assert!(substituted > 150, "substitution count {substituted}");

        let query_id = ids.register("query", query.len() as u64, false, true).unwrap();
        let mapper = Mapper::new(&config, &index, &ids);
        let mut chain_id = 0;
        let mappings = mapper.map_query(query_id, &query, &mut chain_id);
        assert!(!mappings.is_empty());
        // One chain whose estimated identity lands near 97%.
        let ids_seen: std::collections::HashSet<u32> =
            mappings.iter().map(|m| m.chain_id).collect();
        assert_eq!(ids_seen.len(), 1);
        for m in &mappings {
            assert!(
                (m.est_identity - 0.97).abs() < 0.015,
                "identity {} not within 1.5% of 0.97",
                m.est_identity
            );
        }
    }
}
