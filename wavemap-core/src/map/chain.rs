//! Chaining of colinear mappings.
//!
//! Mappings sharing (query, target, strand) are linked when the gap on both
//! axes stays within `chain_gap` and the joint coordinate slope stays in
//! [0.5, 2.0]. Chains may be merged into their hull mapping and are split
//! when they exceed the maximum mapping length.

use crate::config::MapConfig;
use crate::types::{Mapping, Offset, Strand};

const SLOPE_MIN: f64 = 0.5;
const SLOPE_MAX: f64 = 2.0;

/// Gap between two query-sorted neighbors on both axes, or `None` when the
/// pair cannot be linked (wrong order or target overlap running backwards).
fn link_gaps(cur: &Mapping, next: &Mapping) -> Option<(Offset, Offset)> {
    let q_gap = next.query_start.saturating_sub(cur.query_end);
    let r_gap = match cur.strand {
        Strand::Forward => {
            if next.target_start < cur.target_start {
                return None;
            }
            next.target_start.saturating_sub(cur.target_end)
        }
        Strand::Reverse => {
            // On the reverse strand the target runs backwards as the query
            // advances.
            if next.target_end > cur.target_end {
                return None;
            }
            cur.target_start.saturating_sub(next.target_end)
        }
    };
    Some((q_gap, r_gap))
}

fn slope_ok(cur: &Mapping, next: &Mapping) -> bool {
    let dq = (next.query_end.max(cur.query_end) - cur.query_start) as f64;
    let hull_t_start = cur.target_start.min(next.target_start);
    let hull_t_end = cur.target_end.max(next.target_end);
    let dr = (hull_t_end - hull_t_start) as f64;
    if dq <= 0.0 || dr <= 0.0 {
        return false;
    }
    let slope = dr / dq;
    (SLOPE_MIN..=SLOPE_MAX).contains(&slope)
}

/// Chain, optionally merge, and split mappings. Consumes the raw mapping
/// set of one query and returns the final per-query records.
pub fn chain_mappings(
    mut mappings: Vec<Mapping>,
    config: &MapConfig,
    next_chain_id: &mut u32,
) -> Vec<Mapping> {
    if mappings.is_empty() {
        return mappings;
    }
    mappings.sort_by_key(|m| {
        (
            m.query_id,
            m.target_id,
            m.strand as u8,
            m.query_start,
            m.target_start,
        )
    });

    // Partition into chains of linked neighbors.
    let mut chains: Vec<Vec<Mapping>> = Vec::new();
    let mut current: Vec<Mapping> = Vec::new();
    for mapping in mappings {
        let linkable = current.last().is_some_and(|last| {
            last.query_id == mapping.query_id
                && last.target_id == mapping.target_id
                && last.strand == mapping.strand
                && link_gaps(last, &mapping).is_some_and(|(q_gap, r_gap)| {
                    q_gap <= config.chain_gap && r_gap <= config.chain_gap
                })
                && slope_ok(last, &mapping)
        });
        if linkable {
            current.push(mapping);
        } else {
            if !current.is_empty() {
                chains.push(std::mem::take(&mut current));
            }
            current.push(mapping);
        }
    }
    if !current.is_empty() {
        chains.push(current);
    }

    let mut out = Vec::new();
    for chain in chains {
        let chain_id = *next_chain_id;
        *next_chain_id += 1;
        if config.merge_mappings {
            let merged = merge_chain(&chain, chain_id);
            split_mapping(merged, config.max_mapping_length, next_chain_id, &mut out);
        } else {
            emit_unmerged(chain, chain_id, config.max_mapping_length, next_chain_id, &mut out);
        }
    }
    out
}

/// Hull of a chain with block-length-weighted mean identity.
fn merge_chain(chain: &[Mapping], chain_id: u32) -> Mapping {
    let first = &chain[0];
    let mut merged = first.clone();
    merged.chain_id = chain_id;
    merged.n_merged = chain.len() as u32;

    let mut weighted_identity = 0.0;
    let mut weighted_jaccard = 0.0;
    let mut total_block = 0u64;
    for m in chain {
        merged.query_start = merged.query_start.min(m.query_start);
        merged.query_end = merged.query_end.max(m.query_end);
        merged.target_start = merged.target_start.min(m.target_start);
        merged.target_end = merged.target_end.max(m.target_end);
        weighted_identity += m.est_identity * m.block_length as f64;
        weighted_jaccard += m.jaccard * m.block_length as f64;
        total_block += m.block_length;
    }
    if total_block > 0 {
        merged.est_identity = weighted_identity / total_block as f64;
        merged.jaccard = weighted_jaccard / total_block as f64;
    }
    merged.block_length = merged.query_len().min(merged.target_len());
    merged
}

/// Split one merged mapping into pieces no longer than `max_len`, with
/// proportional target coordinates and no gaps between pieces.
fn split_mapping(mapping: Mapping, max_len: Offset, next_chain_id: &mut u32, out: &mut Vec<Mapping>) {
    let q_len = mapping.query_len();
    if q_len <= max_len {
        out.push(mapping);
        return;
    }
    let n_pieces = (q_len + max_len - 1) / max_len;
    let t_len = mapping.target_len();
    for i in 0..n_pieces {
        let qs = mapping.query_start + i * q_len / n_pieces;
        let qe = mapping.query_start + (i + 1) * q_len / n_pieces;
        // Proportional cut on the target axis, reversed for reverse strand.
        let (frac_lo, frac_hi) = (i * t_len / n_pieces, (i + 1) * t_len / n_pieces);
        let (ts, te) = match mapping.strand {
            Strand::Forward => (mapping.target_start + frac_lo, mapping.target_start + frac_hi),
            Strand::Reverse => (mapping.target_end - frac_hi, mapping.target_end - frac_lo),
        };
        let mut piece = mapping.clone();
        piece.query_start = qs;
        piece.query_end = qe;
        piece.target_start = ts;
        piece.target_end = te;
        piece.block_length = piece.query_len().min(piece.target_len());
        piece.chain_id = *next_chain_id;
        out.push(piece);
    }
    *next_chain_id += 1;
}

/// Without merging, the chain id is still shared, but runs whose query span
/// exceeds `max_len` start a fresh id so no chain outgrows the bound.
fn emit_unmerged(
    chain: Vec<Mapping>,
    first_chain_id: u32,
    max_len: Offset,
    next_chain_id: &mut u32,
    out: &mut Vec<Mapping>,
) {
    let mut chain_id = first_chain_id;
    let mut span_start: Option<Offset> = None;
    for mut m in chain {
        let start = *span_start.get_or_insert(m.query_start);
        if m.query_end - start > max_len {
            chain_id = *next_chain_id;
            *next_chain_id += 1;
            span_start = Some(m.query_start);
        }
        m.chain_id = chain_id;
        out.push(m);
    }
}
