//! Wflign: tiled wavefront alignment of one accepted mapping.
//!
//! A long mapping is tiled into overlapping fragments, each fragment pair
//! is screened by sketch similarity and aligned end-to-end, the fragment
//! scripts are stitched in query order, holes are patched with the
//! dual-cost aligner under a score cap, and junction artifacts are eroded.
//!
//! Target coordinates run over the padded window the job carries; the
//! padding lets head and tail patches extend past noisy mapping boundaries.

use crate::config::AlignConfig;
use crate::map::l2::mash_distance;
use crate::sketch::{sketch_window, SketchParams};
use crate::types::{Cigar, CigarOp, CigarStats};
use crate::wfa::{WavefrontAligner, WfaError};
use std::collections::HashSet;

/// Fragment sketch k-mer size.
const FRAGMENT_K: usize = 17;
/// Minmers targeted per fragment sketch.
const FRAGMENT_SKETCH_SIZE: f64 = 256.0;
/// Tolerated drop of fragment sketch ANI below the mapping estimate.
const ANI_SLACK: f64 = 0.05;

/// Lifecycle of one mapping through the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WflignState {
    New,
    Tiled,
    AlignedFragments,
    Stitched,
    Patched,
    Emitted,
    Failed,
}

/// One mapping's alignment problem.
#[derive(Debug)]
pub struct WflignJob<'a> {
    /// Query region, already oriented to the mapping strand.
    pub query: &'a [u8],
    /// Padded target window.
    pub target: &'a [u8],
    /// Bytes of `target` before the mapped window.
    pub head_pad: usize,
    /// Bytes of `target` after the mapped window.
    pub tail_pad: usize,
    /// The mapping's estimated identity.
    pub est_identity: f64,
}

impl WflignJob<'_> {
    fn window_start(&self) -> usize {
        self.head_pad
    }

    fn window_end(&self) -> usize {
        self.target.len() - self.tail_pad
    }

    fn window_len(&self) -> usize {
        self.window_end() - self.window_start()
    }
}

/// The stitched result. Spans are relative to the job's query region and
/// padded target window.
#[derive(Debug)]
pub struct WflignOutcome {
    pub state: WflignState,
    pub cigar: Cigar,
    pub stats: CigarStats,
    pub query_span: (usize, usize),
    pub target_span: (usize, usize),
}

impl WflignOutcome {
    fn failed() -> Self {
        Self {
            state: WflignState::Failed,
            cigar: Cigar::new(),
            stats: CigarStats::default(),
            query_span: (0, 0),
            target_span: (0, 0),
        }
    }
}

/// An accepted fragment alignment.
#[derive(Debug)]
struct Fragment {
    q_start: usize,
    q_end: usize,
    t_start: usize,
    t_end: usize,
    cigar: Cigar,
}

pub struct Wflign<'a> {
    config: &'a AlignConfig,
    base: WavefrontAligner,
}

impl<'a> Wflign<'a> {
    pub fn new(config: &'a AlignConfig) -> Self {
        Self {
            config,
            base: WavefrontAligner::affine(config.penalties),
        }
    }

    /// Junction erosion length, derived from divergence when unset.
    fn erode_k(&self, est_identity: f64) -> usize {
        if self.config.erode_k >= 0 {
            return self.config.erode_k as usize;
        }
        let derived = (2.5 * (1.0 - est_identity) * FRAGMENT_K as f64).round() as usize;
        derived.clamp(7, 23)
    }

    /// Patch score cap, derived from penalties and region length when unset.
    fn patching_cap(&self, region_len: usize) -> u32 {
        if self.config.max_patching_score > 0 {
            return self.config.max_patching_score;
        }
        let p = &self.config.patch_penalties;
        p.gap_open2 + (region_len as u32 / 2) * p.gap_extend2 + 256 * p.mismatch
    }

    pub fn align(&self, job: &WflignJob<'_>) -> WflignOutcome {
        let state = WflignState::New;
        let qlen = job.query.len();
        let tlen = job.window_len();
        if qlen == 0 || tlen == 0 {
            return WflignOutcome::failed();
        }
        log::trace!("wflign {state:?}: {qlen} bp query, {tlen} bp window");

        let seg = self.config.wflambda_segment_length as usize;

        // Short mappings skip the tiling machinery entirely.
        if qlen <= seg {
            let target = &job.target[job.window_start()..job.window_end()];
            return match self.base.align(job.query, target) {
                Ok(aln) => self.emit(
                    aln.cigar,
                    (0, qlen),
                    (job.window_start(), job.window_end()),
                    job.est_identity,
                ),
                Err(_) => WflignOutcome::failed(),
            };
        }

        let fragments = self.tile_and_align(job, seg);
        log::trace!(
            "wflign {:?}: {} fragments accepted",
            WflignState::AlignedFragments,
            fragments.len()
        );
        if fragments.is_empty() {
            // Nothing passed the sketch screen; one capped dual-cost try.
            return match self.patch(job.query, &job.target[job.window_start()..job.window_end()])
            {
                Some(cigar) => self.emit(
                    cigar,
                    (0, qlen),
                    (job.window_start(), job.window_end()),
                    job.est_identity,
                ),
                None => WflignOutcome::failed(),
            };
        }

        let mut state = WflignState::Tiled;
        let (cigar, query_span, target_span) = self.stitch(job, fragments, &mut state);
        debug_assert!(matches!(state, WflignState::Patched));
        self.emit(cigar, query_span, target_span, job.est_identity)
    }

    /// Tile the mapping and align every fragment pair that passes the
    /// sketch screen. Fragments overlap by half a tile.
    fn tile_and_align(&self, job: &WflignJob<'_>, seg: usize) -> Vec<Fragment> {
        let qlen = job.query.len();
        let tlen = job.window_len();
        let scale = tlen as f64 / qlen as f64;
        let step = (seg / 2).max(1);

        let mut fragments = Vec::new();
        let mut q_pos = 0;
        while q_pos < qlen {
            let q_end = (q_pos + seg).min(qlen);
            let t_start = job.window_start() + (q_pos as f64 * scale).round() as usize;
            let t_end = (job.window_start() + (q_end as f64 * scale).round() as usize)
                .min(job.window_end());
            if t_start >= t_end {
                break;
            }

            let query_frag = &job.query[q_pos..q_end];
            let target_frag = &job.target[t_start..t_end];
            if self.fragment_similar(query_frag, target_frag, job.est_identity) {
                if let Ok(aln) = self.base.align(query_frag, target_frag) {
                    fragments.push(Fragment {
                        q_start: q_pos,
                        q_end,
                        t_start,
                        t_end,
                        cigar: aln.cigar,
                    });
                }
            }

            if q_end == qlen {
                break;
            }
            q_pos += step;
        }
        fragments
    }

    /// Sketch screen: fragment pair ANI must not fall more than the slack
    /// below the mapping's estimate.
    fn fragment_similar(&self, query: &[u8], target: &[u8], est_identity: f64) -> bool {
        if query.len() < FRAGMENT_K || target.len() < FRAGMENT_K {
            return true;
        }
        let density =
            (FRAGMENT_SKETCH_SIZE / (query.len().min(target.len()) - FRAGMENT_K) as f64).min(1.0);
        let params = SketchParams::new(FRAGMENT_K, density, 0.0);
        let qh: HashSet<u64> = sketch_window(query, 0, 0, query.len(), &params)
            .iter()
            .map(|m| m.hash)
            .collect();
        let th: HashSet<u64> = sketch_window(target, 0, 0, target.len(), &params)
            .iter()
            .map(|m| m.hash)
            .collect();
        if qh.is_empty() || th.is_empty() {
            return true;
        }
        let shared = qh.intersection(&th).count() as f64;
        let union = (qh.len() + th.len()) as f64 - shared;
        let jaccard = if union > 0.0 { shared / union } else { 0.0 };
        let ani = 1.0 - mash_distance(jaccard, FRAGMENT_K);
        ani >= est_identity - ANI_SLACK
    }

    /// Stitch the accepted fragments into one script, patching holes.
    fn stitch(
        &self,
        job: &WflignJob<'_>,
        fragments: Vec<Fragment>,
        state: &mut WflignState,
    ) -> (Cigar, (usize, usize), (usize, usize)) {
        // Keep a non-overlapping subset in query order; the half-tile
        // overlap means every other fragment suffices when all survived.
        let mut kept: Vec<Fragment> = Vec::new();
        for frag in fragments {
            match kept.last() {
                Some(last) if frag.q_start < last.q_end => {}
                _ => kept.push(frag),
            }
        }
        *state = WflignState::Stitched;

        let mut cigar = Cigar::new();
        let first = kept.first().expect("at least one fragment kept");

        // Head hole: align leading query against the window head, borrowing
        // padding when the proportional interval collapsed.
        let (mut q_aln_start, mut t_aln_start) = (first.q_start, first.t_start);
        if first.q_start > 0 {
            let q_hole = first.q_start;
            let mut t_lo = job.window_start().min(first.t_start);
            if t_lo == first.t_start {
                t_lo = first.t_start.saturating_sub(q_hole.min(job.head_pad) * 2);
            }
            match self.patch(&job.query[..q_hole], &job.target[t_lo..first.t_start]) {
                Some(head) => {
                    q_aln_start = 0;
                    t_aln_start = t_lo;
                    cigar.extend(&head);
                }
                // Unpatchable head is clipped.
                None => {}
            }
        }

        let mut prev_q_end = first.q_start;
        let mut prev_t_end = first.t_start;
        for frag in &kept {
            if frag.q_start > prev_q_end || frag.t_start > prev_t_end {
                // Hole between fragments.
                let q_hole = &job.query[prev_q_end..frag.q_start];
                let t_hole = &job.target[prev_t_end..frag.t_start];
                match self.patch(q_hole, t_hole) {
                    Some(patched) => cigar.extend(&patched),
                    None => {
                        // Patch gave up: express the hole as pure indels,
                        // deletions first.
                        cigar.push(CigarOp::Del(t_hole.len() as u32));
                        cigar.push(CigarOp::Ins(q_hole.len() as u32));
                    }
                }
            }
            cigar.extend(&frag.cigar);
            prev_q_end = frag.q_end;
            prev_t_end = frag.t_end;
        }

        // Tail hole, mirroring the head.
        let qlen = job.query.len();
        let mut q_aln_end = prev_q_end;
        let mut t_aln_end = prev_t_end;
        if prev_q_end < qlen {
            let q_hole = qlen - prev_q_end;
            let mut t_hi = job.window_end().max(prev_t_end);
            if t_hi == prev_t_end {
                t_hi = (prev_t_end + q_hole.min(job.tail_pad) * 2).min(job.target.len());
            }
            match self.patch(&job.query[prev_q_end..], &job.target[prev_t_end..t_hi]) {
                Some(tail) => {
                    q_aln_end = qlen;
                    t_aln_end = t_hi;
                    cigar.extend(&tail);
                }
                None => {}
            }
        }
        *state = WflignState::Patched;

        (cigar, (q_aln_start, q_aln_end), (t_aln_start, t_aln_end))
    }

    /// Capped dual-cost alignment of one hole. `None` when the region is
    /// hopeless (too long or over the score cap).
    fn patch(&self, query: &[u8], target: &[u8]) -> Option<Cigar> {
        if query.is_empty() && target.is_empty() {
            return Some(Cigar::new());
        }
        let longest = query.len().max(target.len());
        if longest as u64 > self.config.max_len_minor {
            return None;
        }
        let aligner = WavefrontAligner::affine_2p(self.config.patch_penalties)
            .with_max_score(self.patching_cap(longest));
        match aligner.align(query, target) {
            Ok(aln) => Some(aln.cigar),
            Err(WfaError::ScoreCapExceeded { .. }) | Err(WfaError::NoConvergence) => None,
        }
    }

    /// Erode junction artifacts, compute stats, and decide the final state.
    fn emit(
        &self,
        cigar: Cigar,
        query_span: (usize, usize),
        target_span: (usize, usize),
        est_identity: f64,
    ) -> WflignOutcome {
        let eroded = erode(&cigar, self.erode_k(est_identity));
        let stats = eroded.stats();
        let identity = stats.identity();
        let state = if identity >= self.config.min_identity && stats.block_len() > 0 {
            WflignState::Emitted
        } else {
            WflignState::Failed
        };
        WflignOutcome {
            state,
            cigar: eroded,
            stats,
            query_span,
            target_span,
        }
    }
}

/// Re-express short match runs flanked by indels as mismatches, removing
/// artifactual micro-indel staircases at fragment junctions.
fn erode(cigar: &Cigar, erode_k: usize) -> Cigar {
    let ops = cigar.ops();
    let mut out = Cigar::new();
    for (i, op) in ops.iter().enumerate() {
        let eroded = match *op {
            CigarOp::Match(n) if (n as usize) < erode_k => {
                let indel_before = i > 0
                    && matches!(ops[i - 1], CigarOp::Ins(_) | CigarOp::Del(_));
                let indel_after = i + 1 < ops.len()
                    && matches!(ops[i + 1], CigarOp::Ins(_) | CigarOp::Del(_));
                if indel_before && indel_after {
                    CigarOp::Mismatch(n)
                } else {
                    *op
                }
            }
            other => other,
        };
        out.push(eroded);
    }
    out
}
