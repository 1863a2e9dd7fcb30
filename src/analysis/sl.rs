//! Analysis of synthetic lethal screens: per-replicate binomial and Fisher
//! tests against a four-replicate control screen, after group-wise median
//! ratio normalization.

use std::collections::BTreeSet;

use rayon::prelude::*;
use serde::Serialize;

use crate::insertions::InsertionCount;
use crate::stats::{binom::binom_test, fdr::adjust_fdr_bh, fisher::fisher_test_2x2};
use crate::transcripts::Transcript;

/// Number of control replicates a control screen must carry.
pub const CONTROL_REPLICATES: usize = 4;

/// Counts below this total are left out of the normalization.
const MIN_NORMALIZATION_READS: u32 = 20;

/// Tunables of the SL pipeline.
#[derive(Clone, Copy, Debug)]
pub struct SlOptions {
    /// Expected number of genes per normalization group.
    pub group_size: u32,
    /// Per-control Fisher p-value cutoff of the significance gate.
    pub pv_cut_off: f64,
    /// Per-replicate binomial FDR cutoff of the significance gate.
    pub binom_cut_off: f64,
    /// Minimal control-to-screen odds ratio.
    pub effect_size: f64,
}

impl Default for SlOptions {
    fn default() -> Self {
        Self {
            group_size: 200,
            pv_cut_off: 0.05,
            binom_cut_off: 0.05,
            effect_size: 0.2,
        }
    }
}

/// Per-replicate, per-gene result.
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct SlReplicateDataPoint {
    pub binom_fdr: f64,
    pub ref_pv: [f64; 4],
    pub ref_fcpv: [f64; 4],
    pub sense: u32,
    pub antisense: u32,
    pub sense_normalized: u32,
    pub antisense_normalized: u32,
}

/// One analysed replicate.
#[derive(Serialize, Clone, Debug, Default)]
pub struct SlReplicate {
    pub name: String,
    pub data: Vec<SlReplicateDataPoint>,
}

/// Per-gene summary over all replicates.
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct SlGenePoint {
    /// Control-to-screen odds ratio on aggregated normalized counts.
    pub odds_ratio: f64,
    /// Two-sided binomial test of the aggregated control counts.
    pub control_binom: f64,
}

/// Full result of one SL screen analysis, index-aligned with the
/// transcript list.
#[derive(Serialize, Clone, Debug, Default)]
pub struct SlScreenAnalysis {
    pub replicates: Vec<SlReplicate>,
    pub genes: Vec<SlGenePoint>,
    /// Normalized control counts the screen was compared against.
    #[serde(skip)]
    pub normalized_controls: Vec<Vec<InsertionCount>>,
    pub significant: BTreeSet<String>,
}

/// Split `[0, n)` into spans of roughly `group_size` entries.
///
/// `k = round(n / group_size)` spans are produced; the last one is extended
/// to `n` to absorb rounding.  Too few entries for even one group yields no
/// spans at all, leaving the counts unadjusted.
pub fn divide(n: usize, group_size: u32) -> Vec<(usize, usize)> {
    if n == 0 || group_size == 0 {
        return Vec::new();
    }

    let k = (n as f64 / group_size as f64).round() as usize;
    if k == 0 {
        return Vec::new();
    }

    let width = n as f64 / k as f64;
    let mut result = Vec::with_capacity(k);
    let mut begin = 0usize;
    for g in 1..=k {
        let end = if g == k {
            n
        } else {
            (g as f64 * width).floor() as usize
        };
        result.push((begin, end));
        begin = end;
    }

    result
}

fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

fn smoothed_ratio(sense: u32, total: u32) -> f64 {
    (sense as f64 + 1.0) / (total as f64 + 2.0)
}

/// Group-wise median normalization of one replicate against the summed
/// reference replicates.
///
/// Only genes with at least [`MIN_NORMALIZATION_READS`] in the replicate
/// and in every reference replicate take part; everything else keeps its
/// raw counts.  Totals are preserved: only the sense/antisense split moves.
pub fn normalize(
    counts: &[InsertionCount],
    reference: &[Vec<InsertionCount>],
    group_size: u32,
) -> Vec<InsertionCount> {
    let n = counts.len();
    let mut sample_ratio = vec![0.0f64; n];
    let mut ref_ratio = vec![0.0f64; n];

    for i in 0..n {
        let qualified = counts[i].total() >= MIN_NORMALIZATION_READS
            && reference
                .iter()
                .all(|r| r[i].total() >= MIN_NORMALIZATION_READS);
        if !qualified {
            continue;
        }

        let ref_sense: u32 = reference.iter().map(|r| r[i].sense).sum();
        let ref_total: u32 = reference.iter().map(|r| r[i].total()).sum();

        sample_ratio[i] = smoothed_ratio(counts[i].sense, counts[i].total());
        ref_ratio[i] = smoothed_ratio(ref_sense, ref_total);
    }

    let mut index: Vec<usize> = (0..n)
        .filter(|&i| sample_ratio[i] > 0.0 && ref_ratio[i] > 0.0)
        .collect();
    index.sort_by(|&a, &b| {
        ref_ratio[a]
            .partial_cmp(&ref_ratio[b])
            .expect("NaN reference ratio")
    });

    let groups = divide(index.len(), group_size);

    let mut result = counts.to_vec();

    let adjusted: Vec<(usize, InsertionCount)> = groups
        .par_iter()
        .flat_map(|&(begin, end)| {
            let members = &index[begin..end];

            let mut refs: Vec<f64> = members.iter().map(|&i| ref_ratio[i]).collect();
            refs.sort_by(|a, b| a.partial_cmp(b).expect("NaN"));
            let ref_median = median(&refs);

            let mut samples: Vec<f64> = members.iter().map(|&i| sample_ratio[i]).collect();
            samples.sort_by(|a, b| a.partial_cmp(b).expect("NaN"));
            let sample_median = median(&samples);

            members
                .iter()
                .map(|&i| {
                    let r = sample_ratio[i];
                    let f = if r < sample_median {
                        ref_median * r / sample_median
                    } else {
                        1.0 - (1.0 - ref_median) * (1.0 - r) / (1.0 - sample_median)
                    };
                    let f = f.min(1.0);

                    let total = counts[i].total();
                    let sense = (f * total as f64).round() as u32;
                    (
                        i,
                        InsertionCount {
                            sense,
                            anti_sense: total - sense,
                        },
                    )
                })
                .collect::<Vec<_>>()
        })
        .collect();

    for (i, count) in adjusted {
        result[i] = count;
    }

    result
}

/// Per-replicate tests: binomial FDR on the normalized split plus one
/// Fisher p-value against each normalized control replicate.
///
/// P-values are computed and BH-adjusted only over genes with at least one
/// raw read; an empty control at a gene yields the `-1` sentinel.
fn replicate_data_points(
    counts: &[InsertionCount],
    normalized: &[InsertionCount],
    normalized_controls: &[Vec<InsertionCount>],
    index: &[usize],
) -> Result<Vec<SlReplicateDataPoint>, anyhow::Error> {
    let n = counts.len();
    let m = index.len();

    let mut data = vec![SlReplicateDataPoint::default(); n];
    let mut pvalues = vec![vec![0.0f64; m]; 1 + CONTROL_REPLICATES];

    let points: Vec<(f64, [f64; 4])> = index
        .par_iter()
        .map(|&i| {
            let binom = binom_test(
                normalized[i].sense as i64,
                normalized[i].total() as i64,
                0.5,
            )
            .expect("p = 0.5 is valid");

            let mut ref_pv = [0.0f64; CONTROL_REPLICATES];
            for (j, control) in normalized_controls.iter().enumerate() {
                let c = control[i];
                if normalized[i].total() == 0 || c.total() == 0 {
                    ref_pv[j] = -1.0;
                } else {
                    ref_pv[j] = fisher_test_2x2([
                        [normalized[i].sense as u64, normalized[i].anti_sense as u64],
                        [c.sense as u64, c.anti_sense as u64],
                    ]);
                }
            }

            (binom, ref_pv)
        })
        .collect();

    for (ix, &(binom, ref_pv)) in points.iter().enumerate() {
        pvalues[0][ix] = binom;
        for j in 0..CONTROL_REPLICATES {
            pvalues[j + 1][ix] = ref_pv[j];
        }
    }

    let fcpv: Vec<Vec<f64>> = pvalues.par_iter().map(|pv| adjust_fdr_bh(pv)).collect();

    for (ix, &i) in index.iter().enumerate() {
        let dp = &mut data[i];
        dp.sense = counts[i].sense;
        dp.antisense = counts[i].anti_sense;
        dp.sense_normalized = normalized[i].sense;
        dp.antisense_normalized = normalized[i].anti_sense;
        dp.binom_fdr = fcpv[0][ix];
        for j in 0..CONTROL_REPLICATES {
            dp.ref_pv[j] = pvalues[j + 1][ix];
            dp.ref_fcpv[j] = fcpv[j + 1][ix];
        }
    }

    Ok(data)
}

/// Analyse one SL screen against its control screen.
///
/// `replicates` carries `(name, raw counts)` per screen replicate; the
/// control must have exactly [`CONTROL_REPLICATES`] count vectors, all
/// index-aligned with `transcripts`.
#[tracing::instrument(skip_all, fields(replicates = replicates.len()))]
pub fn analyze(
    transcripts: &[Transcript],
    replicates: &[(String, Vec<InsertionCount>)],
    control: &[Vec<InsertionCount>],
    options: &SlOptions,
) -> Result<SlScreenAnalysis, anyhow::Error> {
    if control.len() != CONTROL_REPLICATES {
        anyhow::bail!(
            "control screen must have exactly {} replicates, found {}",
            CONTROL_REPLICATES,
            control.len()
        );
    }
    let n = transcripts.len();
    for (_, counts) in replicates {
        assert_eq!(n, counts.len());
    }
    for counts in control {
        assert_eq!(n, counts.len());
    }

    // controls are normalized against their own raw counts, the screen
    // replicates against the normalized controls
    let normalized_controls: Vec<Vec<InsertionCount>> = control
        .par_iter()
        .map(|c| normalize(c, control, options.group_size))
        .collect();

    let mut result = SlScreenAnalysis {
        replicates: Vec::with_capacity(replicates.len()),
        genes: vec![SlGenePoint::default(); n],
        normalized_controls,
        significant: BTreeSet::new(),
    };

    for (name, counts) in replicates {
        let normalized = normalize(counts, &result.normalized_controls, options.group_size);
        let index: Vec<usize> = (0..n).filter(|&i| counts[i].total() > 0).collect();
        let data =
            replicate_data_points(counts, &normalized, &result.normalized_controls, &index)?;
        result.replicates.push(SlReplicate {
            name: name.clone(),
            data,
        });
    }

    // aggregate counts and the significance gate
    for i in 0..n {
        let s_g: u64 = result
            .replicates
            .iter()
            .map(|r| r.data[i].sense_normalized as u64)
            .sum();
        let a_g: u64 = result
            .replicates
            .iter()
            .map(|r| r.data[i].antisense_normalized as u64)
            .sum();
        let s_wt: u64 = result
            .normalized_controls
            .iter()
            .map(|c| c[i].sense as u64)
            .sum();
        let a_wt: u64 = result
            .normalized_controls
            .iter()
            .map(|c| c[i].anti_sense as u64)
            .sum();

        result.genes[i] = SlGenePoint {
            // +1 smoothing keeps the ratio finite for fully depleted genes
            odds_ratio: ((s_wt as f64 + 1.0) / (a_wt as f64 + 1.0))
                / ((s_g as f64 + 1.0) / (a_g as f64 + 1.0)),
            control_binom: binom_test(s_wt as i64, (s_wt + a_wt) as i64, 0.5)
                .expect("p = 0.5 is valid"),
        };

        let passing = result
            .replicates
            .iter()
            .filter(|r| {
                let dp = &r.data[i];
                dp.binom_fdr <= options.binom_cut_off
                    && dp.ref_pv.iter().all(|&pv| pv <= options.pv_cut_off)
                    && smoothed_ratio(dp.sense, dp.sense + dp.antisense) < 0.5
            })
            .count();

        if !result.replicates.is_empty() && passing == result.replicates.len() {
            let lhs = s_wt as f64 / a_wt as f64;
            let rhs = options.effect_size * s_g as f64 / a_g as f64;
            if lhs >= rhs {
                result.significant.insert(transcripts[i].gene_name.clone());
            }
        }
    }

    Ok(result)
}

#[cfg(test)]
mod test {
    use float_cmp::approx_eq;
    use pretty_assertions::assert_eq;

    use crate::common::{Chrom, Strand};
    use crate::insertions::InsertionCount;
    use crate::transcripts::test_transcript;

    use super::*;

    fn count(sense: u32, anti_sense: u32) -> InsertionCount {
        InsertionCount { sense, anti_sense }
    }

    #[rstest::rstest]
    #[case(0, 200, 0)]
    #[case(400, 200, 2)]
    #[case(1000, 200, 5)]
    #[case(1001, 200, 5)]
    #[case(50, 200, 0)]
    #[case(150, 200, 1)]
    fn divide_group_counts(#[case] n: usize, #[case] group_size: u32, #[case] expected: usize) {
        let groups = divide(n, group_size);
        assert_eq!(expected, groups.len());
        if let (Some(first), Some(last)) = (groups.first(), groups.last()) {
            assert_eq!(0, first.0);
            assert_eq!(n, last.1);
        }
        for w in groups.windows(2) {
            assert_eq!(w[0].1, w[1].0);
        }
    }

    #[test]
    fn normalize_preserves_totals() {
        let n = 50usize;
        let counts: Vec<InsertionCount> =
            (0..n).map(|i| count(20 + i as u32, 40 - (i as u32 % 20))).collect();
        let reference: Vec<Vec<InsertionCount>> = (0..4)
            .map(|j| {
                (0..n)
                    .map(|i| count(25 + ((i + j) as u32 % 10), 35))
                    .collect()
            })
            .collect();

        let normalized = normalize(&counts, &reference, 10);
        for (raw, norm) in counts.iter().zip(normalized.iter()) {
            assert_eq!(raw.total(), norm.total());
        }
    }

    #[test]
    fn normalize_is_identity_for_uniform_identical_data() {
        let n = 40usize;
        let counts: Vec<InsertionCount> = (0..n).map(|_| count(20, 20)).collect();
        let reference: Vec<Vec<InsertionCount>> = (0..4).map(|_| counts.clone()).collect();

        let normalized = normalize(&counts, &reference, 10);
        assert_eq!(counts, normalized);
    }

    #[test]
    fn normalize_skips_low_count_genes() {
        let mut counts = vec![count(5, 5); 30];
        counts.extend(std::iter::repeat(count(30, 10)).take(30));
        let reference: Vec<Vec<InsertionCount>> = (0..4).map(|_| counts.clone()).collect();

        let normalized = normalize(&counts, &reference, 10);
        // genes under the read threshold keep their raw counts
        for i in 0..30 {
            assert_eq!(counts[i], normalized[i]);
        }
    }

    fn test_transcripts(n: usize) -> Vec<crate::transcripts::Transcript> {
        (0..n)
            .map(|i| {
                test_transcript(
                    &format!("G{}", i),
                    Chrom::Chr1,
                    Strand::Plus,
                    (i * 1000) as u32,
                    (i * 1000 + 500) as u32,
                )
            })
            .collect()
    }

    #[test]
    fn identical_screen_and_control_is_never_significant() {
        let n = 30usize;
        let counts: Vec<InsertionCount> = (0..n).map(|i| count(20 + i as u32, 20)).collect();
        let control: Vec<Vec<InsertionCount>> = (0..4).map(|_| counts.clone()).collect();
        let replicates: Vec<(String, Vec<InsertionCount>)> = (1..=4)
            .map(|i| (format!("replicate-{}", i), counts.clone()))
            .collect();

        let result = analyze(
            &test_transcripts(n),
            &replicates,
            &control,
            &SlOptions::default(),
        )
        .unwrap();

        assert!(result.significant.is_empty(), "{:?}", result.significant);
    }

    #[test]
    fn depleted_sense_gene_is_significant() {
        let n = 30usize;
        // neutral background with one gene (index 3) fully depleted of
        // sense insertions in the screen
        let mut screen_counts: Vec<InsertionCount> =
            (0..n).map(|_| count(50, 50)).collect();
        screen_counts[3] = count(0, 100);
        let control_counts: Vec<InsertionCount> = (0..n).map(|_| count(50, 50)).collect();

        let control: Vec<Vec<InsertionCount>> = (0..4).map(|_| control_counts.clone()).collect();
        let replicates: Vec<(String, Vec<InsertionCount>)> = (1..=4)
            .map(|i| (format!("replicate-{}", i), screen_counts.clone()))
            .collect();

        let result = analyze(
            &test_transcripts(n),
            &replicates,
            &control,
            &SlOptions::default(),
        )
        .unwrap();

        assert!(result.significant.contains("G3"), "{:?}", result.significant);
        assert_eq!(1, result.significant.len());

        let dp = &result.replicates[0].data[3];
        assert!(dp.binom_fdr < 0.05);
        assert!(dp.ref_pv.iter().all(|&pv| pv < 0.05), "{:?}", dp.ref_pv);
    }

    #[test]
    fn empty_control_yields_sentinel_pv() {
        let n = 25usize;
        let mut control_counts: Vec<InsertionCount> = (0..n).map(|_| count(30, 30)).collect();
        control_counts[7] = count(0, 0);
        let screen_counts: Vec<InsertionCount> = (0..n).map(|_| count(30, 30)).collect();

        let control: Vec<Vec<InsertionCount>> = (0..4).map(|_| control_counts.clone()).collect();
        let replicates = vec![("replicate-1".to_string(), screen_counts)];

        let result = analyze(
            &test_transcripts(n),
            &replicates,
            &control,
            &SlOptions::default(),
        )
        .unwrap();

        let dp = &result.replicates[0].data[7];
        assert!(dp.ref_pv.iter().all(|&pv| pv == -1.0), "{:?}", dp.ref_pv);
        // sentinel entries are excluded from the FDR
        assert!(dp.ref_fcpv.iter().all(|&pv| pv == 0.0), "{:?}", dp.ref_fcpv);
    }

    #[test]
    fn control_must_have_four_replicates() {
        let counts = vec![count(1, 1)];
        let control = vec![counts.clone(); 3];
        let replicates = vec![("replicate-1".to_string(), counts)];
        assert!(analyze(&test_transcripts(1), &replicates, &control, &SlOptions::default())
            .is_err());
    }

    #[test]
    fn odds_ratio_reflects_depletion() {
        let n = 25usize;
        let mut screen_counts: Vec<InsertionCount> = (0..n).map(|_| count(40, 40)).collect();
        screen_counts[2] = count(10, 90);
        let control_counts: Vec<InsertionCount> = (0..n).map(|_| count(40, 40)).collect();

        let control: Vec<Vec<InsertionCount>> = (0..4).map(|_| control_counts.clone()).collect();
        let replicates = vec![("replicate-1".to_string(), screen_counts)];

        let result = analyze(
            &test_transcripts(n),
            &replicates,
            &control,
            &SlOptions::default(),
        )
        .unwrap();

        // control ratio 1.0 against a depleted screen ratio
        assert!(result.genes[2].odds_ratio > 1.0, "{:?}", result.genes[2]);
        // balanced control counts test as null
        assert!(approx_eq!(
            f64,
            1.0,
            result.genes[2].control_binom,
            epsilon = 1e-9
        ));
    }
}
