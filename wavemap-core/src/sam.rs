//! SAM output: header and alignment records with soft-clipped ends.

use crate::ids::SequenceIdManager;
use crate::paf::float2phred;
use crate::types::{Cigar, CigarStats, Strand};
use std::fmt::Write;

/// `@HD`/`@SQ`/`@PG` header covering every target sequence.
pub fn header(ids: &SequenceIdManager, program: &str, version: &str) -> String {
    let mut out = String::from("@HD\tVN:1.6\tSO:unsorted\n");
    for id in ids.target_ids() {
        let name = ids.name(id).unwrap_or("*");
        let len = ids.length(id).unwrap_or(0);
        writeln!(out, "@SQ\tSN:{name}\tLN:{len}").expect("string write");
    }
    writeln!(out, "@PG\tID:{program}\tPN:{program}\tVN:{version}").expect("string write");
    out
}

/// Parameters of one SAM alignment row.
#[derive(Debug)]
pub struct SamRow<'a> {
    pub query_name: &'a str,
    /// Oriented query region (reverse-complemented for reverse mappings),
    /// covering exactly the aligned span plus the clipped flanks.
    pub query_seq: &'a [u8],
    pub strand: Strand,
    pub target_name: &'a str,
    /// 0-based target start of the aligned span.
    pub target_start: u64,
    /// Soft-clipped bases before and after the aligned query span.
    pub clip_head: u64,
    pub clip_tail: u64,
    pub cigar: &'a Cigar,
    pub stats: &'a CigarStats,
    pub md_tag: Option<&'a str>,
    pub no_seq: bool,
}

pub fn record(row: &SamRow<'_>) -> String {
    let flag = match row.strand {
        Strand::Forward => 0,
        Strand::Reverse => 16,
    };
    let mapq = float2phred(1.0 - row.stats.identity()).min(254);

    let mut cigar_str = String::new();
    if row.clip_head > 0 {
        write!(cigar_str, "{}S", row.clip_head).expect("string write");
    }
    write!(cigar_str, "{}", row.cigar).expect("string write");
    if row.clip_tail > 0 {
        write!(cigar_str, "{}S", row.clip_tail).expect("string write");
    }

    let seq = if row.no_seq {
        "*".to_string()
    } else {
        String::from_utf8_lossy(row.query_seq).to_string()
    };

    let edit_distance =
        row.stats.mismatches + row.stats.inserted_bases + row.stats.deleted_bases;
    let mut line = format!(
        "{}\t{}\t{}\t{}\t{}\t{}\t*\t0\t0\t{}\t*\tNM:i:{}",
        row.query_name,
        flag,
        row.target_name,
        row.target_start + 1,
        mapq,
        cigar_str,
        seq,
        edit_distance,
    );
    if let Some(md) = row.md_tag {
        line.push_str("\tMD:Z:");
        line.push_str(md);
    }
    line.push('\n');
    line
}
