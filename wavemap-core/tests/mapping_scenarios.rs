//! End-to-end mapping scenarios through the public API.

use std::io::Write;
use std::sync::Arc;
use wavemap_core::config::{FilterMode, MapConfig};
use wavemap_core::pipeline::{load_inputs, run_mapping, Inputs};
use wavemap_core::{AlignConfig, PafRecord, PipelineContext, Strand};

fn test_seq(n: usize, seed: u32) -> String {
    (0..n as u32)
        .map(|i| {
            b"ACGT"[(i.wrapping_mul(2654435761).wrapping_add(seed.wrapping_mul(613)) >> 10)
                as usize
                % 4] as char
        })
        .collect()
}

fn write_fasta(records: &[(&str, &str)]) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".fa").tempfile().unwrap();
    for (name, seq) in records {
        writeln!(file, ">{name}").unwrap();
        writeln!(file, "{seq}").unwrap();
    }
    file.flush().unwrap();
    file
}

fn context(map: MapConfig) -> PipelineContext {
    let align = AlignConfig::for_segment_length(map.segment_length);
    PipelineContext::new(map, align)
}

fn map_records(ctx: &PipelineContext, inputs: &Inputs) -> Vec<PafRecord> {
    let (ids, store) = load_inputs(inputs, ctx).unwrap();
    let mut out = Vec::new();
    run_mapping(ctx, &ids, &store, &mut out).unwrap();
    String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|l| PafRecord::parse_line(l).unwrap())
        .collect()
}

#[test]
fn self_mapping_covers_every_sequence() {
    let s1 = test_seq(6000, 1);
    let s2 = test_seq(4000, 2);
    let fasta = write_fasta(&[("s1", &s1), ("s2", &s2)]);
    let ctx = context(MapConfig {
        pct_identity: 0.80,
        num_mappings: 5,
        threads: 4,
        ..MapConfig::default()
    });
    let inputs = Inputs {
        target_files: vec![fasta.path().to_path_buf()],
        query_files: vec![fasta.path().to_path_buf()],
    };
    let records = map_records(&ctx, &inputs);

    for name in ["s1", "s2"] {
        let self_maps: Vec<&PafRecord> = records
            .iter()
            .filter(|r| r.query_name == name && r.target_name == name)
            .collect();
        assert!(!self_maps.is_empty(), "no self mapping for {name}");
        let covered: u64 = self_maps.iter().map(|r| r.query_end - r.query_start).sum();
        let len = self_maps[0].query_len;
        assert!(
            covered as f64 >= 0.99 * len as f64,
            "{name}: covered {covered} of {len}"
        );
    }
    for r in &records {
        assert!(r.est_identity >= 0.80, "identity {} below floor", r.est_identity);
        assert!(r.query_start < r.query_end && r.query_end <= r.query_len);
        assert!(r.target_start < r.target_end && r.target_end <= r.target_len);
    }
}

#[test]
fn single_segment_self_map_has_exact_identity() {
    // A sequence no longer than one segment self-maps in a single piece
    // with the identity estimate at 1.0, not merely above the floor.
    let seq = test_seq(900, 9);
    let fasta = write_fasta(&[("short", &seq)]);
    let ctx = context(MapConfig::default());
    let inputs = Inputs {
        target_files: vec![fasta.path().to_path_buf()],
        query_files: vec![fasta.path().to_path_buf()],
    };
    let records = map_records(&ctx, &inputs);
    assert_eq!(records.len(), 1);
    let r = &records[0];
    assert!(r.est_identity > 0.999, "ani {}", r.est_identity);
    assert_eq!((r.query_start, r.query_end), (0, 900));
    assert!((r.query_end - r.query_start) as f64 >= 0.99 * seq.len() as f64);
}

#[test]
fn reverse_complement_query_flips_strand() {
    let target = test_seq(5000, 3);
    let revcomp: String = target
        .bytes()
        .rev()
        .map(|b| match b {
            b'A' => 'T',
            b'T' => 'A',
            b'C' => 'G',
            _ => 'C',
        })
        .collect();
    let targets = write_fasta(&[("t1", &target)]);
    let queries = write_fasta(&[("q1", &revcomp)]);
    let ctx = context(MapConfig::default());
    let inputs = Inputs {
        target_files: vec![targets.path().to_path_buf()],
        query_files: vec![queries.path().to_path_buf()],
    };
    let records = map_records(&ctx, &inputs);
    assert!(!records.is_empty());
    for r in &records {
        assert_eq!(r.strand, Strand::Reverse);
        assert!(r.est_identity > 0.95);
    }
    let covered: u64 = records.iter().map(|r| r.query_end - r.query_start).sum();
    assert!(covered as f64 >= 0.95 * target.len() as f64);
}

#[test]
fn homopolymer_target_fails_complexity_gate() {
    let poly_a = "A".repeat(5000);
    let query = test_seq(3000, 4);
    let targets = write_fasta(&[("polyA", &poly_a)]);
    let queries = write_fasta(&[("q1", &query)]);
    let ctx = context(MapConfig {
        kmer_complexity: 0.2,
        ..MapConfig::default()
    });
    let inputs = Inputs {
        target_files: vec![targets.path().to_path_buf()],
        query_files: vec![queries.path().to_path_buf()],
    };
    let records = map_records(&ctx, &inputs);
    assert!(records.is_empty(), "low-complexity target must not map");
}

#[test]
fn identical_queries_one_to_one_vs_map() {
    let target = test_seq(4000, 5);
    let query = &target[500..3500];
    let targets = write_fasta(&[("t1", &target)]);
    let queries = write_fasta(&[("qA", query), ("qB", query)]);

    let inputs = Inputs {
        target_files: vec![targets.path().to_path_buf()],
        query_files: vec![queries.path().to_path_buf()],
    };

    let map_ctx = context(MapConfig::default());
    let map_records_all = map_records(&map_ctx, &inputs);
    let map_queries: std::collections::HashSet<&str> = map_records_all
        .iter()
        .map(|r| r.query_name.as_str())
        .collect();
    assert!(map_queries.contains("qA") && map_queries.contains("qB"));

    let oto_ctx = context(MapConfig {
        filter_mode: FilterMode::OneToOne,
        ..MapConfig::default()
    });
    let oto_records = map_records(&oto_ctx, &inputs);
    assert_eq!(
        oto_records.len(),
        1,
        "one-to-one retains a single mapping for the shared target"
    );
}

#[test]
fn long_chains_split_at_max_mapping_length() {
    let seq = test_seq(300_000, 6);
    let fasta = write_fasta(&[("big", &seq)]);
    let ctx = context(MapConfig {
        max_mapping_length: 50_000,
        num_mappings: 5,
        threads: 2,
        ..MapConfig::default()
    });
    let inputs = Inputs {
        target_files: vec![fasta.path().to_path_buf()],
        query_files: vec![fasta.path().to_path_buf()],
    };
    let mut records = map_records(&ctx, &inputs);
    assert!(records.len() >= 6, "expected splits, got {}", records.len());
    records.sort_by_key(|r| r.query_start);
    for r in &records {
        assert!(r.query_end - r.query_start <= 50_000);
    }
    for pair in records.windows(2) {
        let gap = pair[1].query_start.saturating_sub(pair[0].query_end);
        assert!(gap <= ctx.map.chain_gap, "gap {gap} exceeds the chain gap");
    }
}

#[test]
fn lower_triangular_emits_each_pair_once() {
    let s1 = test_seq(3000, 7);
    let s2 = s1.clone();
    let fasta = write_fasta(&[("a", &s1), ("b", &s2)]);
    let ctx = context(MapConfig {
        lower_triangular: true,
        skip_self: true,
        ..MapConfig::default()
    });
    let inputs = Inputs {
        target_files: vec![fasta.path().to_path_buf()],
        query_files: vec![fasta.path().to_path_buf()],
    };
    let records = map_records(&ctx, &inputs);
    assert!(!records.is_empty());
    for r in &records {
        // Only the higher-id query maps against the lower-id target.
        assert_eq!(r.query_name, "b");
        assert_eq!(r.target_name, "a");
    }
}

#[test]
fn skip_prefix_separates_groups() {
    let s1 = test_seq(3000, 8);
    let fasta = write_fasta(&[("g1#chrA", &s1), ("g1#chrB", &s1), ("g2#chrA", &s1)]);
    let mut map = MapConfig::default();
    map.skip_prefix = true;
    map.skip_self = true;
    let ctx = context(map);
    let inputs = Inputs {
        target_files: vec![fasta.path().to_path_buf()],
        query_files: vec![fasta.path().to_path_buf()],
    };
    let records = map_records(&ctx, &inputs);
    assert!(!records.is_empty());
    for r in &records {
        let qp = r.query_name.split('#').next().unwrap();
        let tp = r.target_name.split('#').next().unwrap();
        assert_ne!(qp, tp, "same-group pair leaked: {} vs {}", r.query_name, r.target_name);
    }
}

#[test]
fn config_is_shareable_across_threads() {
    // PipelineContext clones share the same config and stop flag.
    let ctx = context(MapConfig::default());
    let clone = ctx.clone();
    assert!(Arc::ptr_eq(&ctx.map, &clone.map));
    assert!(Arc::ptr_eq(&ctx.stop, &clone.stop));
}
