//! Plane-sweep mapping filters.
//!
//! Candidates are visited in descending score order; a candidate is
//! rejected once `n` already-accepted mappings cover it past the overlap
//! threshold on the swept axis. `OneToOne` repeats the sweep with the
//! query and target roles swapped.

use crate::config::{FilterMode, MapConfig};
use crate::types::{Mapping, Offset};
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Query,
    Target,
}

fn interval(m: &Mapping, axis: Axis) -> (u32, Offset, Offset) {
    match axis {
        Axis::Query => (m.query_id, m.query_start, m.query_end),
        Axis::Target => (m.target_id, m.target_start, m.target_end),
    }
}

fn overlap(a: (Offset, Offset), b: (Offset, Offset)) -> Offset {
    let lo = a.0.max(b.0);
    let hi = a.1.min(b.1);
    hi.saturating_sub(lo)
}

/// One plane sweep along the given axis, keeping at most `n` mappings per
/// covered position (approximated by the overlap-count rule).
fn sweep(mut mappings: Vec<Mapping>, axis: Axis, n: usize, threshold: f64) -> Vec<Mapping> {
    mappings.sort_by(|a, b| {
        b.score()
            .partial_cmp(&a.score())
            .unwrap_or(Ordering::Equal)
            .then(interval(a, axis).cmp(&interval(b, axis)))
    });

    let mut accepted: HashMap<u32, Vec<(Offset, Offset)>> = HashMap::new();
    let mut kept = Vec::new();
    for mapping in mappings {
        let (seq, start, end) = interval(&mapping, axis);
        let own_len = (end - start).max(1);
        let max_overlap = (threshold * own_len as f64) as Offset;
        let covering = accepted
            .get(&seq)
            .map(|ivals| {
                ivals
                    .iter()
                    .filter(|&&ival| overlap(ival, (start, end)) > max_overlap)
                    .count()
            })
            .unwrap_or(0);
        if covering >= n {
            continue;
        }
        accepted.entry(seq).or_default().push((start, end));
        kept.push(mapping);
    }
    kept
}

/// Apply the configured filter discipline to one batch of mappings.
pub fn filter_mappings(mappings: Vec<Mapping>, config: &MapConfig) -> Vec<Mapping> {
    let mappings = if config.filter_length_mismatches {
        mappings
            .into_iter()
            .filter(|m| {
                let q = m.query_len();
                let r = m.target_len();
                q.abs_diff(r) <= config.chain_gap
            })
            .collect()
    } else {
        mappings
    };

    match config.filter_mode {
        FilterMode::None => mappings,
        FilterMode::Map => sweep(
            mappings,
            Axis::Query,
            config.num_mappings,
            config.overlap_threshold,
        ),
        FilterMode::OneToOne => {
            let by_query = sweep(
                mappings,
                Axis::Query,
                config.num_mappings,
                config.overlap_threshold,
            );
            sweep(
                by_query,
                Axis::Target,
                config.num_mappings,
                config.overlap_threshold,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Strand;

    fn mapping(
        query_id: u32,
        qs: Offset,
        qe: Offset,
        target_id: u32,
        ts: Offset,
        te: Offset,
        identity: f64,
    ) -> Mapping {
        Mapping {
            query_id,
            query_start: qs,
            query_end: qe,
            strand: Strand::Forward,
            target_id,
            target_start: ts,
            target_end: te,
            est_identity: identity,
            jaccard: 0.5,
            block_length: (qe - qs).min(te - ts),
            chain_id: 0,
            n_merged: 1,
        }
    }

    #[test]
    fn none_mode_keeps_everything() {
        let config = MapConfig {
            filter_mode: FilterMode::None,
            filter_length_mismatches: false,
            ..MapConfig::default()
        };
        let mappings = vec![
            mapping(0, 0, 1000, 0, 0, 1000, 0.9),
            mapping(0, 0, 1000, 0, 2000, 3000, 0.8),
        ];
        assert_eq!(filter_mappings(mappings, &config).len(), 2);
    }

    #[test]
    fn map_mode_keeps_best_per_query_region() {
        let config = MapConfig::default(); // Map, n = 1
        let mappings = vec![
            mapping(0, 0, 1000, 0, 0, 1000, 0.99),
            mapping(0, 0, 1000, 0, 5000, 6000, 0.80),
            mapping(0, 3000, 4000, 0, 3000, 4000, 0.90),
        ];
        let kept = filter_mappings(mappings, &config);
        // Overlapping pair collapses to its best; the distant region stays.
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().any(|m| (m.est_identity - 0.99).abs() < 1e-12));
        assert!(kept.iter().any(|m| m.query_start == 3000));
        assert!(!kept.iter().any(|m| (m.est_identity - 0.80).abs() < 1e-12));
    }

    #[test]
    fn identical_queries_map_vs_one_to_one() {
        // Two distinct queries, both matching the same target interval.
        let a = mapping(0, 0, 1000, 7, 0, 1000, 0.99);
        let b = mapping(1, 0, 1000, 7, 0, 1000, 0.98);

        let map_config = MapConfig::default();
        let kept = filter_mappings(vec![a.clone(), b.clone()], &map_config);
        assert_eq!(kept.len(), 2, "MAP retains one mapping per query");

        let oto_config = MapConfig {
            filter_mode: FilterMode::OneToOne,
            ..MapConfig::default()
        };
        let kept = filter_mappings(vec![a, b], &oto_config);
        assert_eq!(kept.len(), 1, "ONE_TO_ONE collapses the shared target");
        assert_eq!(kept[0].query_id, 0);
    }

    #[test]
    fn n_mappings_raises_the_cap() {
        let config = MapConfig {
            num_mappings: 2,
            ..MapConfig::default()
        };
        let mappings = vec![
            mapping(0, 0, 1000, 0, 0, 1000, 0.99),
            mapping(0, 0, 1000, 1, 0, 1000, 0.95),
            mapping(0, 0, 1000, 2, 0, 1000, 0.90),
        ];
        assert_eq!(filter_mappings(mappings, &config).len(), 2);
    }

    #[test]
    fn length_mismatch_pruned() {
        let config = MapConfig::default(); // chain_gap 2000
        let mappings = vec![
            mapping(0, 0, 1000, 0, 0, 1000, 0.9),
            mapping(0, 0, 1000, 1, 0, 4000, 0.9),
        ];
        let kept = filter_mappings(mappings, &config);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].target_id, 0);
    }

    #[test]
    fn small_overlap_is_tolerated() {
        let config = MapConfig::default(); // overlap threshold 0.5
        let mappings = vec![
            mapping(0, 0, 1000, 0, 0, 1000, 0.99),
            // 30% query overlap with the first: below the threshold.
            mapping(0, 700, 1700, 0, 5000, 6000, 0.90),
        ];
        assert_eq!(filter_mappings(mappings, &config).len(), 2);
    }
}
