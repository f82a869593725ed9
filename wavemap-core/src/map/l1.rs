//! L1 candidate discovery.
//!
//! For a sketched query segment, finds target windows that share enough
//! distinct minmers to pass the hypergeometric admissibility test, and
//! merges overlapping admissible windows into candidates.

use crate::index::MinmerIndex;
use crate::types::{L1Candidate, Minmer, Offset, SeqId, Strand};
use std::collections::HashMap;

/// One query-minmer hit on a target.
#[derive(Debug, Clone, Copy)]
struct Hit {
    target_id: SeqId,
    strand: Strand,
    target_pos: u32,
    query_hash: u64,
}

/// Jaccard expected between two sketches at a given identity, by inverting
/// the Mash distance estimator.
pub fn jaccard_at_identity(identity: f64, k: usize) -> f64 {
    let d = (1.0 - identity).max(0.0);
    1.0 / (2.0 * (k as f64 * d).exp() - 1.0)
}

/// Upper-tail probability `P(X >= m)` of a Binomial(n, p).
///
/// Computed by iterating the pmf in linear space; the regimes this is
/// called in (n a few hundred, p well away from the underflow range) keep
/// the recurrence stable.
fn binomial_sf(m: u32, n: u64, p: f64) -> f64 {
    if m == 0 {
        return 1.0;
    }
    if p <= 0.0 {
        return 0.0;
    }
    if p >= 1.0 {
        return 1.0;
    }
    let n_f = n as f64;
    let mut pmf = (1.0 - p).powf(n_f);
    let mut cdf_below = 0.0;
    for i in 0..(m as u64).min(n) {
        cdf_below += pmf;
        let i_f = i as f64;
        pmf *= (n_f - i_f) / (i_f + 1.0) * (p / (1.0 - p));
    }
    (1.0 - cdf_below).clamp(0.0, 1.0)
}

/// Smallest shared-minmer count whose upper-tail probability under the
/// i.i.d. null at the relaxed identity floor drops to `1 - confidence`.
pub fn minimum_hits(sketch_size: u64, k: usize, identity_floor: f64, confidence: f64) -> u32 {
    let p = jaccard_at_identity(identity_floor, k);
    let alpha = (1.0 - confidence).max(f64::EPSILON);
    for m in 1..=sketch_size as u32 {
        if binomial_sf(m, sketch_size, p) <= alpha {
            return m;
        }
    }
    sketch_size.max(1) as u32
}

/// Find candidate target windows for one sketched query segment.
///
/// `window_length` is the target window span (the segment length);
/// `eligible` filters targets by the configured name-space rules.
pub fn collect_candidates(
    query_minmers: &[Minmer],
    index: &MinmerIndex,
    window_length: Offset,
    min_hits: u32,
    eligible: impl Fn(SeqId) -> bool,
) -> Vec<L1Candidate> {
    let mut hits = Vec::new();
    for qm in query_minmers {
        if let Some(pos_list) = index.lookup(qm.hash) {
            for hit in pos_list {
                if !eligible(hit.seq_id) {
                    continue;
                }
                // Relative orientation of the mapping this hit supports.
                let strand = if qm.strand == hit.strand {
                    Strand::Forward
                } else {
                    Strand::Reverse
                };
                hits.push(Hit {
                    target_id: hit.seq_id,
                    strand,
                    target_pos: hit.pos,
                    query_hash: qm.hash,
                });
            }
        }
    }
    if hits.is_empty() {
        return Vec::new();
    }

    hits.sort_unstable_by_key(|h| (h.target_id, h.strand as u8, h.target_pos));

    let mut candidates = Vec::new();
    let mut group_start = 0;
    while group_start < hits.len() {
        let key = (hits[group_start].target_id, hits[group_start].strand);
        let mut group_end = group_start + 1;
        while group_end < hits.len()
            && (hits[group_end].target_id, hits[group_end].strand) == key
        {
            group_end += 1;
        }
        sweep_group(
            &hits[group_start..group_end],
            window_length,
            min_hits,
            &mut candidates,
        );
        group_start = group_end;
    }
    candidates
}

/// Slide a window of `window_length` over one (target, strand) hit stream,
/// counting distinct query minmers, and merge admissible windows.
fn sweep_group(
    hits: &[Hit],
    window_length: Offset,
    min_hits: u32,
    candidates: &mut Vec<L1Candidate>,
) {
    let target_id = hits[0].target_id;
    let strand = hits[0].strand;
    let mut distinct: HashMap<u64, u32> = HashMap::new();
    let mut head = 0;
    let mut open: Option<L1Candidate> = None;

    // One window per anchor hit: [pos(anchor), pos(anchor) + window_length).
    for anchor in 0..hits.len() {
        let window_start = hits[anchor].target_pos as Offset;
        let window_end = window_start + window_length;

        while head < hits.len() && (hits[head].target_pos as Offset) < window_end {
            *distinct.entry(hits[head].query_hash).or_insert(0) += 1;
            head += 1;
        }

        let count = distinct.len() as u32;
        if count >= min_hits {
            match open.as_mut() {
                Some(c) if window_start <= c.window_end => {
                    c.window_end = c.window_end.max(window_end);
                    c.shared_minmers = c.shared_minmers.max(count);
                }
                _ => {
                    if let Some(done) = open.take() {
                        candidates.push(done);
                    }
                    open = Some(L1Candidate {
                        target_id,
                        strand,
                        window_start,
                        window_end,
                        shared_minmers: count,
                    });
                }
            }
        }

        // The anchor leaves the window before the next, later-starting one.
        let entry = distinct
            .get_mut(&hits[anchor].query_hash)
            .expect("anchor hash is in the window");
        *entry -= 1;
        if *entry == 0 {
            distinct.remove(&hits[anchor].query_hash);
        }
    }
    if let Some(done) = open.take() {
        candidates.push(done);
    }
}
