//! Wavefront alignment for gap-affine and dual-cost gap-affine penalties.
//!
//! Works in penalty space: matches cost 0, so the wavefront at score `s`
//! holds, per diagonal, the furthest query offset reachable with total
//! penalty `s`. Runtime is proportional to sequence length times edit
//! distance rather than to the product of the lengths.
//!
//! Convention: diagonal `k = i - j` with `i` indexing the query and `j` the
//! target; the stored offset is `i`. An insertion consumes query only, a
//! deletion consumes target only.
//!
//! Reference: Marco-Sola et al., "Fast gap-affine pairwise alignment using
//! the wavefront algorithm", Bioinformatics, 2021.

use crate::config::{DualPenalties, Penalties};
use crate::types::{Cigar, CigarOp};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WfaError {
    #[error("alignment score cap {cap} exceeded")]
    ScoreCapExceeded { cap: u32 },

    #[error("wavefront failed to converge")]
    NoConvergence,
}

pub type WfaResult<T> = Result<T, WfaError>;

/// A finished alignment: total penalty and the edit script.
#[derive(Debug, Clone)]
pub struct WfaAlignment {
    pub score: u32,
    pub cigar: Cigar,
}

/// One gap cost family.
#[derive(Debug, Clone, Copy)]
struct GapCost {
    open: u32,
    extend: u32,
}

/// Gap-affine wavefront aligner over one or two gap cost families.
#[derive(Debug, Clone)]
pub struct WavefrontAligner {
    mismatch: u32,
    gaps: Vec<GapCost>,
    max_score: Option<u32>,
}

impl WavefrontAligner {
    /// Single gap-affine cost model.
    pub fn affine(p: Penalties) -> Self {
        Self {
            mismatch: p.mismatch.max(1),
            gaps: vec![GapCost {
                open: p.gap_open,
                extend: p.gap_extend.max(1),
            }],
            max_score: None,
        }
    }

    /// Dual-cost (two-piece) gap-affine model.
    pub fn affine_2p(p: DualPenalties) -> Self {
        Self {
            mismatch: p.mismatch.max(1),
            gaps: vec![
                GapCost {
                    open: p.gap_open1,
                    extend: p.gap_extend1.max(1),
                },
                GapCost {
                    open: p.gap_open2,
                    extend: p.gap_extend2.max(1),
                },
            ],
            max_score: None,
        }
    }

    pub fn with_max_score(mut self, cap: u32) -> Self {
        self.max_score = Some(cap);
        self
    }

    /// Globally align `query` against `target`.
    pub fn align(&self, query: &[u8], target: &[u8]) -> WfaResult<WfaAlignment> {
        if query.is_empty() || target.is_empty() {
            return self.degenerate(query.len() as u32, target.len() as u32);
        }
        Wip::new(self, query, target).run()
    }

    /// One side empty: the alignment is a single gap (or nothing).
    fn degenerate(&self, n: u32, m: u32) -> WfaResult<WfaAlignment> {
        let mut cigar = Cigar::new();
        let len = n.max(m);
        if len == 0 {
            return Ok(WfaAlignment { score: 0, cigar });
        }
        let score = self
            .gaps
            .iter()
            .map(|g| g.open + g.extend * len)
            .min()
            .expect("at least one gap family");
        if let Some(cap) = self.max_score {
            if score > cap {
                return Err(WfaError::ScoreCapExceeded { cap });
            }
        }
        if n > 0 {
            cigar.push(CigarOp::Ins(n));
        } else {
            cigar.push(CigarOp::Del(m));
        }
        Ok(WfaAlignment { score, cigar })
    }
}

/// Offsets along diagonals `lo..=hi`; -1 marks unreached.
#[derive(Debug, Clone)]
struct Wavefront {
    lo: i32,
    hi: i32,
    offsets: Vec<i32>,
}

impl Wavefront {
    fn new(lo: i32, hi: i32) -> Self {
        let len = (hi - lo + 1).max(0) as usize;
        Self {
            lo,
            hi,
            offsets: vec![-1; len],
        }
    }

    #[inline]
    fn get(&self, k: i32) -> i32 {
        if k < self.lo || k > self.hi {
            return -1;
        }
        self.offsets[(k - self.lo) as usize]
    }

    #[inline]
    fn set(&mut self, k: i32, val: i32) {
        if k >= self.lo && k <= self.hi {
            self.offsets[(k - self.lo) as usize] = val;
        }
    }
}

/// Wavefronts at one score: M plus per-family I and D.
#[derive(Debug, Clone)]
struct WavefrontSet {
    m: Option<Wavefront>,
    ins: Vec<Option<Wavefront>>,
    del: Vec<Option<Wavefront>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MSource {
    Mismatch,
    FromIns(usize),
    FromDel(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GapSource {
    Open,
    Extend,
}

/// Backtrace sources for one score level.
#[derive(Debug, Clone)]
struct TraceLevel {
    lo: i32,
    m: Vec<Option<MSource>>,
    ins: Vec<Vec<Option<GapSource>>>,
    del: Vec<Vec<Option<GapSource>>>,
}

impl TraceLevel {
    fn new(lo: i32, len: usize, families: usize) -> Self {
        Self {
            lo,
            m: vec![None; len],
            ins: vec![vec![None; len]; families],
            del: vec![vec![None; len]; families],
        }
    }

    #[inline]
    fn idx(&self, k: i32) -> usize {
        (k - self.lo) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WfKind {
    M,
    Ins(usize),
    Del(usize),
}

/// Alignment in progress.
struct Wip<'a> {
    aligner: &'a WavefrontAligner,
    query: &'a [u8],
    target: &'a [u8],
    wavefronts: Vec<Option<WavefrontSet>>,
    trace: Vec<Option<TraceLevel>>,
    final_k: i32,
    final_offset: i32,
}

impl<'a> Wip<'a> {
    fn new(aligner: &'a WavefrontAligner, query: &'a [u8], target: &'a [u8]) -> Self {
        Self {
            aligner,
            query,
            target,
            wavefronts: Vec::new(),
            trace: Vec::new(),
            final_k: query.len() as i32 - target.len() as i32,
            final_offset: query.len() as i32,
        }
    }

    fn run(mut self) -> WfaResult<WfaAlignment> {
        let families = self.aligner.gaps.len();

        let worst = self.worst_case_score();
        let cap = self.aligner.max_score.unwrap_or(worst).min(worst);

        let mut m0 = Wavefront::new(0, 0);
        m0.set(0, 0);
        self.extend(&mut m0);
        let done0 = m0.get(self.final_k) >= self.final_offset;
        self.wavefronts.push(Some(WavefrontSet {
            m: Some(m0),
            ins: vec![None; families],
            del: vec![None; families],
        }));
        self.trace.push(Some(TraceLevel::new(0, 1, families)));
        if done0 {
            return self.backtrace(0);
        }

        for s in 1..=cap as usize {
            if self.compute_score(s, families) {
                return self.backtrace(s as u32);
            }
        }

        match self.aligner.max_score {
            Some(user_cap) if user_cap <= worst => {
                Err(WfaError::ScoreCapExceeded { cap: user_cap })
            }
            _ => Err(WfaError::NoConvergence),
        }
    }

    /// Every cell mismatched plus the length difference gapped once.
    fn worst_case_score(&self) -> u32 {
        let n = self.query.len() as u32;
        let m = self.target.len() as u32;
        let diagonal = n.min(m);
        let slack = n.abs_diff(m);
        let gap = self
            .aligner
            .gaps
            .iter()
            .map(|g| g.open + g.extend * slack.max(1))
            .min()
            .unwrap_or(0);
        self.aligner.mismatch * diagonal + gap + 1
    }

    /// Compute all wavefronts for score `s`; true when the end is reached.
    fn compute_score(&mut self, s: usize, families: usize) -> bool {
        let (lo, hi) = self.diagonal_range(s);
        if lo > hi {
            self.wavefronts.push(None);
            self.trace.push(None);
            return false;
        }
        let len = (hi - lo + 1) as usize;
        let mut tl = TraceLevel::new(lo, len, families);
        let x = self.aligner.mismatch;

        let mut ins_fronts: Vec<Option<Wavefront>> = Vec::with_capacity(families);
        let mut del_fronts: Vec<Option<Wavefront>> = Vec::with_capacity(families);

        let n = self.query.len() as i32;
        let m = self.target.len() as i32;

        for (g, gap) in self.aligner.gaps.iter().enumerate() {
            let oe = (gap.open + gap.extend) as usize;
            let e = gap.extend as usize;

            let mut i_wf = Wavefront::new(lo, hi);
            for k in lo..=hi {
                let idx = (k - lo) as usize;
                let mut best = -1;
                let mut src = None;
                // An insertion consumes a query base; the parent must not
                // have exhausted the query.
                if s >= oe {
                    let v = self.get(s - oe, WfKind::M, k - 1);
                    if v >= 0 && v < n && v + 1 > best {
                        best = v + 1;
                        src = Some(GapSource::Open);
                    }
                }
                if s >= e {
                    let v = self.get(s - e, WfKind::Ins(g), k - 1);
                    if v >= 0 && v < n && v + 1 > best {
                        best = v + 1;
                        src = Some(GapSource::Extend);
                    }
                }
                if best >= 0 {
                    i_wf.set(k, best);
                    tl.ins[g][idx] = src;
                }
            }

            let mut d_wf = Wavefront::new(lo, hi);
            for k in lo..=hi {
                let idx = (k - lo) as usize;
                let mut best = -1;
                let mut src = None;
                // A deletion consumes a target base at j = v - (k + 1).
                if s >= oe {
                    let v = self.get(s - oe, WfKind::M, k + 1);
                    if v >= 0 && v - (k + 1) < m && v > best {
                        best = v;
                        src = Some(GapSource::Open);
                    }
                }
                if s >= e {
                    let v = self.get(s - e, WfKind::Del(g), k + 1);
                    if v >= 0 && v - (k + 1) < m && v > best {
                        best = v;
                        src = Some(GapSource::Extend);
                    }
                }
                if best >= 0 {
                    d_wf.set(k, best);
                    tl.del[g][idx] = src;
                }
            }

            ins_fronts.push(Some(i_wf));
            del_fronts.push(Some(d_wf));
        }

        let mut m_wf = Wavefront::new(lo, hi);
        for k in lo..=hi {
            let idx = (k - lo) as usize;
            let mut best = -1;
            let mut src = None;
            if s >= x as usize {
                let v = self.get(s - x as usize, WfKind::M, k);
                // A mismatch consumes one diagonal cell; stay in bounds.
                if v >= 0 && v < n && v - k < m {
                    best = v + 1;
                    src = Some(MSource::Mismatch);
                }
            }
            for g in 0..families {
                if let Some(w) = &ins_fronts[g] {
                    let v = w.get(k);
                    if v > best {
                        best = v;
                        src = Some(MSource::FromIns(g));
                    }
                }
                if let Some(w) = &del_fronts[g] {
                    let v = w.get(k);
                    if v > best {
                        best = v;
                        src = Some(MSource::FromDel(g));
                    }
                }
            }
            if best >= 0 {
                m_wf.set(k, best);
                tl.m[idx] = src;
            }
        }
        self.extend(&mut m_wf);
        let done = m_wf.get(self.final_k) >= self.final_offset;

        self.wavefronts.push(Some(WavefrontSet {
            m: Some(m_wf),
            ins: ins_fronts,
            del: del_fronts,
        }));
        self.trace.push(Some(tl));
        done
    }

    /// Diagonal range contributing to score `s`.
    fn diagonal_range(&self, s: usize) -> (i32, i32) {
        let mut lo = i32::MAX;
        let mut hi = i32::MIN;
        let mut expand = |score: usize, delta_lo: i32, delta_hi: i32, this: &Self| {
            if let Some(Some(ws)) = this.wavefronts.get(score) {
                let mut fronts: Vec<&Option<Wavefront>> = vec![&ws.m];
                fronts.extend(ws.ins.iter());
                fronts.extend(ws.del.iter());
                for wf in fronts.into_iter().flatten() {
                    lo = lo.min(wf.lo + delta_lo);
                    hi = hi.max(wf.hi + delta_hi);
                }
            }
        };
        let x = self.aligner.mismatch as usize;
        if s >= x {
            expand(s - x, 0, 0, self);
        }
        for gap in &self.aligner.gaps {
            let oe = (gap.open + gap.extend) as usize;
            let e = gap.extend as usize;
            if s >= oe {
                expand(s - oe, -1, 1, self);
            }
            if s >= e {
                expand(s - e, -1, 1, self);
            }
        }
        // Clamp to the reachable band.
        let n = self.query.len() as i32;
        let m = self.target.len() as i32;
        (lo.max(-m), hi.min(n))
    }

    /// Extend every diagonal through runs of equal characters.
    fn extend(&self, wf: &mut Wavefront) {
        let n = self.query.len() as i32;
        let m = self.target.len() as i32;
        for k in wf.lo..=wf.hi {
            let idx = (k - wf.lo) as usize;
            let mut h = wf.offsets[idx];
            if h < 0 {
                continue;
            }
            loop {
                let j = h - k;
                if h >= n || j < 0 || j >= m {
                    break;
                }
                if self.query[h as usize] != self.target[j as usize] {
                    break;
                }
                h += 1;
            }
            wf.offsets[idx] = h;
        }
    }

    #[inline]
    fn get(&self, s: usize, kind: WfKind, k: i32) -> i32 {
        match self.wavefronts.get(s) {
            Some(Some(ws)) => match kind {
                WfKind::M => ws.m.as_ref().map_or(-1, |w| w.get(k)),
                WfKind::Ins(g) => ws.ins[g].as_ref().map_or(-1, |w| w.get(k)),
                WfKind::Del(g) => ws.del[g].as_ref().map_or(-1, |w| w.get(k)),
            },
            _ => -1,
        }
    }

    fn backtrace(&self, final_score: u32) -> WfaResult<WfaAlignment> {
        let x = self.aligner.mismatch as usize;
        let mut ops_rev: Vec<CigarOp> = Vec::new();
        let mut s = final_score as usize;
        let mut k = self.final_k;
        let mut kind = WfKind::M;

        loop {
            if s == 0 && kind == WfKind::M {
                let h = self.get(0, WfKind::M, k);
                if h > 0 {
                    ops_rev.push(CigarOp::Match(h as u32));
                }
                break;
            }
            let tl = match self.trace.get(s).and_then(|t| t.as_ref()) {
                Some(tl) => tl,
                None => return Err(WfaError::NoConvergence),
            };
            match kind {
                WfKind::M => {
                    let idx = tl.idx(k);
                    let src = match tl.m.get(idx).copied().flatten() {
                        Some(src) => src,
                        None => return Err(WfaError::NoConvergence),
                    };
                    let h_post = self.get(s, WfKind::M, k);
                    let h_pre = match src {
                        MSource::Mismatch => self.get(s - x, WfKind::M, k) + 1,
                        MSource::FromIns(g) => self.get(s, WfKind::Ins(g), k),
                        MSource::FromDel(g) => self.get(s, WfKind::Del(g), k),
                    };
                    let run = h_post - h_pre;
                    if run > 0 {
                        ops_rev.push(CigarOp::Match(run as u32));
                    }
                    match src {
                        MSource::Mismatch => {
                            ops_rev.push(CigarOp::Mismatch(1));
                            s -= x;
                        }
                        MSource::FromIns(g) => kind = WfKind::Ins(g),
                        MSource::FromDel(g) => kind = WfKind::Del(g),
                    }
                }
                WfKind::Ins(g) => {
                    let idx = tl.idx(k);
                    let src = match tl.ins[g].get(idx).copied().flatten() {
                        Some(src) => src,
                        None => return Err(WfaError::NoConvergence),
                    };
                    ops_rev.push(CigarOp::Ins(1));
                    let gap = self.aligner.gaps[g];
                    match src {
                        GapSource::Open => {
                            s -= (gap.open + gap.extend) as usize;
                            k -= 1;
                            kind = WfKind::M;
                        }
                        GapSource::Extend => {
                            s -= gap.extend as usize;
                            k -= 1;
                        }
                    }
                }
                WfKind::Del(g) => {
                    let idx = tl.idx(k);
                    let src = match tl.del[g].get(idx).copied().flatten() {
                        Some(src) => src,
                        None => return Err(WfaError::NoConvergence),
                    };
                    ops_rev.push(CigarOp::Del(1));
                    let gap = self.aligner.gaps[g];
                    match src {
                        GapSource::Open => {
                            s -= (gap.open + gap.extend) as usize;
                            k += 1;
                            kind = WfKind::M;
                        }
                        GapSource::Extend => {
                            s -= gap.extend as usize;
                            k += 1;
                        }
                    }
                }
            }
        }

        let mut cigar = Cigar::new();
        for op in ops_rev.into_iter().rev() {
            cigar.push(op);
        }
        debug_assert_eq!(cigar.query_len(), self.query.len() as u64);
        debug_assert_eq!(cigar.target_len(), self.target.len() as u64);
        Ok(WfaAlignment {
            score: final_score,
            cigar,
        })
    }
}
