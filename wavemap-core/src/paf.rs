//! PAF records: formatting for the writer thread and parsing for
//! re-alignment of a prior mapping run (`-i`).

use crate::types::{Cigar, CigarStats, Strand};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use thiserror::Error;

/// Identity assumed when a parsed row carries no usable estimate.
const FALLBACK_IDENTITY: f64 = 0.85;

#[derive(Debug, Error)]
pub enum PafError {
    #[error("PAF row has {0} columns, need at least 9")]
    TooFewColumns(usize),

    #[error("invalid {field}: {value}")]
    InvalidField { field: &'static str, value: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One parsed mapping row, as consumed by the alignment stage.
#[derive(Debug, Clone, PartialEq)]
pub struct PafRecord {
    pub query_name: String,
    pub query_len: u64,
    pub query_start: u64,
    pub query_end: u64,
    pub strand: Strand,
    pub target_name: String,
    pub target_len: u64,
    pub target_start: u64,
    pub target_end: u64,
    pub est_identity: f64,
}

impl PafRecord {
    /// Parse one whitespace-separated mapping row. At least the 9 leading
    /// positional columns are required; the identity is recovered from a
    /// `gi:f:` tag when present.
    pub fn parse_line(line: &str) -> Result<Self, PafError> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 9 {
            return Err(PafError::TooFewColumns(fields.len()));
        }

        fn num(field: &'static str, value: &str) -> Result<u64, PafError> {
            value.parse::<u64>().map_err(|_| PafError::InvalidField {
                field,
                value: value.to_string(),
            })
        }

        let strand = match fields[4] {
            "+" => Strand::Forward,
            "-" => Strand::Reverse,
            other => {
                return Err(PafError::InvalidField {
                    field: "strand",
                    value: other.to_string(),
                })
            }
        };

        let mut est_identity = FALLBACK_IDENTITY;
        for tag in fields.iter().skip(9) {
            if let Some(value) = tag.strip_prefix("gi:f:") {
                if let Ok(v) = value.parse::<f64>() {
                    est_identity = if v > 1.0 { v / 100.0 } else { v };
                }
            }
        }

        Ok(Self {
            query_name: fields[0].to_string(),
            query_len: num("query length", fields[1])?,
            query_start: num("query start", fields[2])?,
            query_end: num("query end", fields[3])?,
            strand,
            target_name: fields[5].to_string(),
            target_len: num("target length", fields[6])?,
            target_start: num("target start", fields[7])?,
            target_end: num("target end", fields[8])?,
            est_identity: est_identity.clamp(0.0, 1.0),
        })
    }

    /// Iterate the rows of a PAF file (gzip transparently).
    pub fn read_file<P: AsRef<Path>>(
        path: P,
    ) -> Result<impl Iterator<Item = Result<PafRecord, PafError>>, PafError> {
        let file = File::open(&path)?;
        let reader: Box<dyn Read> = if path.as_ref().extension().is_some_and(|e| e == "gz") {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        let lines = BufReader::new(reader).lines();
        Ok(lines.filter_map(|line| match line {
            Err(e) => Some(Err(PafError::Io(e))),
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    None
                } else {
                    Some(PafRecord::parse_line(trimmed))
                }
            }
        }))
    }
}

/// Phred-scaled mapping quality from an error probability.
pub fn float2phred(prob: f64) -> u32 {
    if prob <= 0.0 {
        return 255;
    }
    let p = -10.0 * prob.log10();
    if !(0.0..=255.0).contains(&p) {
        255
    } else {
        p.round() as u32
    }
}

/// Fields shared by mapping-only and aligned rows.
#[derive(Debug, Clone)]
pub struct RowCoords<'a> {
    pub query_name: &'a str,
    pub query_len: u64,
    pub query_start: u64,
    pub query_end: u64,
    pub strand: Strand,
    pub target_name: &'a str,
    pub target_len: u64,
    pub target_start: u64,
    pub target_end: u64,
}

/// Format an approximate mapping row.
pub fn mapping_line(
    c: &RowCoords<'_>,
    est_identity: f64,
    jaccard: f64,
    block_length: u64,
    chain_id: u32,
    aborted_alignment: bool,
) -> String {
    let matches = (est_identity * block_length as f64).round() as u64;
    let mut line = format!(
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\tgi:f:{:.6}\tmd:f:{:.6}\tjc:f:{:.6}\tid:i:{}",
        c.query_name,
        c.query_len,
        c.query_start,
        c.query_end,
        char::from(c.strand),
        c.target_name,
        c.target_len,
        c.target_start,
        c.target_end,
        matches,
        block_length,
        float2phred(1.0 - est_identity),
        est_identity,
        est_identity,
        jaccard,
        chain_id,
    );
    if aborted_alignment {
        line.push_str("\tzd:i:1");
    }
    line.push('\n');
    line
}

/// Format a base-level alignment row.
pub fn alignment_line(
    c: &RowCoords<'_>,
    stats: &CigarStats,
    cigar: &Cigar,
    est_identity: f64,
    jaccard: f64,
    md_tag: Option<&str>,
) -> String {
    let identity = stats.identity();
    let mut line = format!(
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\tgi:f:{:.6}\tmd:f:{:.6}\tjc:f:{:.6}\tcg:Z:{}",
        c.query_name,
        c.query_len,
        c.query_start,
        c.query_end,
        char::from(c.strand),
        c.target_name,
        c.target_len,
        c.target_start,
        c.target_end,
        stats.matches,
        stats.block_len(),
        float2phred(1.0 - identity),
        identity,
        est_identity,
        jaccard,
        cigar,
    );
    if let Some(md) = md_tag {
        line.push_str("\tMD:Z:");
        line.push_str(md);
    }
    line.push('\n');
    line
}

/// MD tag over the target slice an alignment consumed.
pub fn md_tag(cigar: &Cigar, target: &[u8]) -> String {
    use crate::types::CigarOp;
    let mut md = String::new();
    let mut match_run = 0u64;
    let mut t_pos = 0usize;
    for op in cigar.ops() {
        match *op {
            CigarOp::Match(n) => {
                match_run += n as u64;
                t_pos += n as usize;
            }
            CigarOp::Mismatch(n) => {
                for _ in 0..n {
                    md.push_str(&match_run.to_string());
                    match_run = 0;
                    md.push(target[t_pos] as char);
                    t_pos += 1;
                }
            }
            CigarOp::Del(n) => {
                md.push_str(&match_run.to_string());
                match_run = 0;
                md.push('^');
                for _ in 0..n {
                    md.push(target[t_pos] as char);
                    t_pos += 1;
                }
            }
            CigarOp::Ins(_) => {}
        }
    }
    md.push_str(&match_run.to_string());
    md
}
