//! Analysis of intracellular phenotype (and phenotype activation) screens:
//! per-gene Fisher test and mutational index between the low and high
//! channel.

use rayon::prelude::*;
use serde::Serialize;

use crate::common::Direction;
use crate::insertions::Insertions;
use crate::stats::{fdr::adjust_fdr_bh, fisher::fisher_test_2x2};
use crate::transcripts::Transcript;

/// Per-gene result of an IP/PA analysis.
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct IpDataPoint {
    pub gene: String,
    pub pv: f64,
    pub fcpv: f64,
    pub mi: f64,
    pub low: u32,
    pub high: u32,
}

/// Mutational index: ratio of hit proportions between the channels, with
/// the one-count fallback for empty sides.
fn mutational_index(low: u64, high: u64, low_total: u64, high_total: u64) -> f64 {
    let mut mi_l = low as f64;
    let mut mi_h = high as f64;
    let mut mi_lt = (low_total - low) as f64;
    let mut mi_ht = (high_total - high) as f64;

    if low == 0 {
        mi_l = 1.0;
        mi_lt -= 1.0;
    }
    if high == 0 {
        mi_h = 1.0;
        mi_ht -= 1.0;
    }

    (mi_h / mi_ht) / (mi_l / mi_lt)
}

/// Compare the two channels of a screen per transcript.
///
/// `low` and `high` must be index-aligned with `transcripts` as produced by
/// the assigner; `direction` picks which side(s) of each transcript count.
pub fn analyze(
    transcripts: &[Transcript],
    low: &[Insertions],
    high: &[Insertions],
    direction: Direction,
) -> Vec<IpDataPoint> {
    assert_eq!(transcripts.len(), low.len());
    assert_eq!(transcripts.len(), high.len());

    let counts: Vec<(u64, u64)> = (0..transcripts.len())
        .map(|i| (low[i].count(direction), high[i].count(direction)))
        .collect();

    let low_total: u64 = counts.iter().map(|(l, _)| l).sum();
    let high_total: u64 = counts.iter().map(|(_, h)| h).sum();

    let mut result: Vec<IpDataPoint> = counts
        .par_iter()
        .enumerate()
        .map(|(i, &(l, h))| {
            let pv = fisher_test_2x2([[l, h], [low_total - l, high_total - h]]);

            IpDataPoint {
                gene: transcripts[i].gene_name.clone(),
                pv,
                fcpv: 0.0,
                mi: mutational_index(l, h, low_total, high_total),
                low: l as u32,
                high: h as u32,
            }
        })
        .collect();

    let pvalues: Vec<f64> = result.iter().map(|p| p.pv).collect();
    let fcpv = adjust_fdr_bh(&pvalues);
    for (point, fcpv) in result.iter_mut().zip(fcpv) {
        point.fcpv = fcpv;
    }

    result
}
