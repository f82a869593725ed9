//! L2 refinement: exact shared-minmer recount, ANI estimation, and
//! boundary refinement of L1 candidate windows.

use crate::config::MapConfig;
use crate::index::MinmerIndex;
use crate::types::{L1Candidate, Mapping, Minmer, Offset, QuerySegment};
use std::collections::HashSet;

/// Mash distance from a Jaccard estimate: `-ln(2J/(1+J)) / k`.
pub fn mash_distance(jaccard: f64, k: usize) -> f64 {
    if jaccard <= 0.0 {
        return 1.0;
    }
    if jaccard >= 1.0 {
        return 0.0;
    }
    (-(2.0 * jaccard / (1.0 + jaccard)).ln() / k as f64).clamp(0.0, 1.0)
}

/// Refine one candidate into a Mapping, or reject it.
pub fn refine_candidate(
    query_minmers: &[Minmer],
    segment: QuerySegment,
    candidate: &L1Candidate,
    index: &MinmerIndex,
    config: &MapConfig,
) -> Option<Mapping> {
    let query_hashes: HashSet<u64> = query_minmers.iter().map(|m| m.hash).collect();
    if query_hashes.is_empty() {
        return None;
    }

    let window = index.target_window(
        candidate.target_id,
        candidate.window_start,
        candidate.window_end,
    );
    let target_hashes: HashSet<u64> = window.iter().map(|&(_, hash)| hash).collect();
    if target_hashes.is_empty() {
        return None;
    }

    let shared = query_hashes.intersection(&target_hashes).count() as f64;
    let union = (query_hashes.len() + target_hashes.len()) as f64 - shared;
    let jaccard = if union > 0.0 { shared / union } else { 0.0 };
    let ani = 1.0 - mash_distance(jaccard, config.k);

    let floor = config.pct_identity - config.hg.ani_diff;
    if ani < floor && !config.keep_low_pct_id {
        return None;
    }

    let (target_start, target_end) =
        refine_boundary(window, &query_hashes, candidate, config.k as Offset)?;

    let query_len = segment.len();
    let target_len = target_end - target_start;
    Some(Mapping {
        query_id: segment.seq_id,
        query_start: segment.start,
        query_end: segment.end,
        strand: candidate.strand,
        target_id: candidate.target_id,
        target_start,
        target_end,
        est_identity: ani.clamp(0.0, 1.0),
        jaccard,
        block_length: query_len.min(target_len),
        chain_id: 0,
        n_merged: 1,
    })
}

/// Snap the candidate window to the span actually supported by shared
/// minmers: bucketed rolling density is computed over the window, buckets
/// below half the peak are trimmed from both ends, and the boundary snaps
/// to the outermost shared minmers that remain.
fn refine_boundary(
    window: &[(u32, u64)],
    query_hashes: &HashSet<u64>,
    candidate: &L1Candidate,
    k: Offset,
) -> Option<(Offset, Offset)> {
    let shared_positions: Vec<Offset> = window
        .iter()
        .filter(|&&(_, hash)| query_hashes.contains(&hash))
        .map(|&(pos, _)| pos as Offset)
        .collect();
    if shared_positions.is_empty() {
        return None;
    }

    let span = candidate.window_end - candidate.window_start;
    let bucket_width = (span / 8).max(1);
    let n_buckets = ((span + bucket_width - 1) / bucket_width) as usize;
    let mut buckets = vec![0u32; n_buckets];
    for &pos in &shared_positions {
        let i = ((pos.saturating_sub(candidate.window_start)) / bucket_width) as usize;
        buckets[i.min(n_buckets - 1)] += 1;
    }
    let peak = *buckets.iter().max().unwrap_or(&0);
    if peak == 0 {
        return None;
    }
    let threshold = (peak + 1) / 2;

    let mut lo_bucket = 0;
    while lo_bucket < n_buckets && buckets[lo_bucket] < threshold {
        lo_bucket += 1;
    }
    let mut hi_bucket = n_buckets;
    while hi_bucket > lo_bucket && buckets[hi_bucket - 1] < threshold {
        hi_bucket -= 1;
    }
    let lo_pos = candidate.window_start + lo_bucket as Offset * bucket_width;
    let hi_pos = candidate.window_start + hi_bucket as Offset * bucket_width;

    let retained: Vec<Offset> = shared_positions
        .iter()
        .copied()
        .filter(|&p| p >= lo_pos && p < hi_pos)
        .collect();
    let (first, last) = match (retained.first(), retained.last()) {
        (Some(&f), Some(&l)) => (f, l),
        // Density trimming removed everything; fall back to the full span.
        _ => (shared_positions[0], *shared_positions.last().unwrap()),
    };
    Some((first, last + k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::l1::{collect_candidates, jaccard_at_identity};
    use crate::sketch::{sketch_window, SketchParams};
    use crate::types::Strand;

    #[test]
    fn mash_distance_extremes() {
        assert_eq!(mash_distance(1.0, 15), 0.0);
        assert_eq!(mash_distance(0.0, 15), 1.0);
        let d = mash_distance(0.5, 15);
        assert!(d > 0.0 && d < 0.05);
    }

    #[test]
    fn mash_inverts_jaccard_at_identity() {
        for &identity in &[0.8, 0.9, 0.95, 0.99] {
            let j = jaccard_at_identity(identity, 15);
            let ani = 1.0 - mash_distance(j, 15);
            assert!(
                (ani - identity).abs() < 1e-9,
                "identity {identity} round-tripped to {ani}"
            );
        }
    }

    fn test_seq(n: usize, seed: u32) -> Vec<u8> {
        (0..n as u32)
            .map(|i| {
                b"ACGT"[(i.wrapping_mul(2654435761).wrapping_add(seed.wrapping_mul(1013)) >> 7)
                    as usize
                    % 4]
            })
            .collect()
    }

    #[test]
    fn self_candidate_refines_to_full_identity() {
        let seq = test_seq(4000, 11);
        let params = SketchParams::new(15, 0.2, 0.0);
        let mut index = MinmerIndex::new(15, 0.2);
        index.add_sequence("t", seq.len() as u64);
        index.insert(&sketch_window(&seq, 0, 0, seq.len(), &params));
        index.finalize(u64::MAX);

        let segment = QuerySegment {
            seq_id: 1,
            start: 1000,
            end: 2000,
        };
        let query_minmers = sketch_window(&seq, 1, 1000, 1000, &params);
        let candidates = collect_candidates(&query_minmers, &index, 1000, 3, |_| true);
        assert!(!candidates.is_empty());

        let config = MapConfig::default();
        let best = candidates
            .iter()
            .max_by_key(|c| c.shared_minmers)
            .unwrap();
        let mapping =
            refine_candidate(&query_minmers, segment, best, &index, &config).unwrap();
        assert_eq!(mapping.strand, Strand::Forward);
        assert!(mapping.est_identity > 0.99, "ani {}", mapping.est_identity);
        // Refined target window lands on the homologous interval.
        assert!(mapping.target_start >= 900 && mapping.target_start <= 1100);
        assert!(mapping.target_end >= 1900 && mapping.target_end <= 2100);
        assert!(mapping.block_length <= 1000);
    }

    #[test]
    fn low_identity_rejected_unless_kept() {
        let target = test_seq(4000, 12);
        let query = test_seq(1000, 888);
        let params = SketchParams::new(15, 0.3, 0.0);
        let mut index = MinmerIndex::new(15, 0.3);
        index.add_sequence("t", target.len() as u64);
        index.insert(&sketch_window(&target, 0, 0, target.len(), &params));
        index.finalize(u64::MAX);

        let segment = QuerySegment {
            seq_id: 1,
            start: 0,
            end: 1000,
        };
        let query_minmers = sketch_window(&query, 1, 0, 1000, &params);
        let candidate = L1Candidate {
            target_id: 0,
            strand: Strand::Forward,
            window_start: 0,
            window_end: 1000,
            shared_minmers: 1,
        };

        let strict = MapConfig::default();
        assert!(
            refine_candidate(&query_minmers, segment, &candidate, &index, &strict).is_none()
        );

        let keep = MapConfig {
            keep_low_pct_id: true,
            ..MapConfig::default()
        };
        let mapping = refine_candidate(&query_minmers, segment, &candidate, &index, &keep);
        // Unrelated sequences may share nothing at all; when they do share,
        // the mapping must carry its (low) identity through.
        if let Some(m) = mapping {
            assert!(m.est_identity < strict.pct_identity);
        }
    }
}
