//! Scoring region selection: start/end expressions, gene disambiguation,
//! reduction modes, overlap marking and the cut-overlap policy.

use std::cmp::Ordering;
use std::path::Path;

use itertools::Itertools;

use crate::common::{Range, Strand};
use crate::err::Error;

use super::{annotation::load_annotation, Mode, Transcript};

/// Anchor point within a transcript that a bounds expression refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Anchor {
    TxStart,
    CdsStart,
    CdsEnd,
    TxEnd,
}

/// Parsed pair of start/end expressions, e.g. `cds-100` / `tx+500`.
///
/// Grammar: `(cds|tx)(Start|End)? ([+-]digits)?`.  A missing `Start`/`End`
/// defaults to `Start` for the start expression and `End` for the end
/// expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bounds {
    start: Anchor,
    start_offset: i64,
    end: Anchor,
    end_offset: i64,
}

fn parse_expr(expr: &str, is_start: bool) -> Result<(Anchor, i64), Error> {
    let re = regex::Regex::new(r"^(cds|tx)(Start|End)?((?:\+|-)[0-9]+)?$").expect("invalid regex");
    let caps = re
        .captures(expr)
        .ok_or_else(|| Error::InvalidInput(format!("invalid position specification {:?}", expr)))?;

    let side_is_start = match caps.get(2).map(|m| m.as_str()) {
        Some("Start") => true,
        Some(_) => false,
        None => is_start,
    };

    let anchor = match (&caps[1], side_is_start) {
        ("cds", true) => Anchor::CdsStart,
        ("cds", false) => Anchor::CdsEnd,
        (_, true) => Anchor::TxStart,
        (_, false) => Anchor::TxEnd,
    };

    let offset = caps
        .get(3)
        .map(|m| {
            m.as_str()
                .parse::<i64>()
                .map_err(|e| Error::InvalidInput(format!("invalid offset in {:?}: {}", expr, e)))
        })
        .transpose()?
        .unwrap_or(0);

    Ok((anchor, offset))
}

impl Bounds {
    pub fn parse(start: &str, end: &str) -> Result<Self, Error> {
        let (start, start_offset) = parse_expr(start, true)?;
        let (end, end_offset) = parse_expr(end, false)?;
        Ok(Self {
            start,
            start_offset,
            end,
            end_offset,
        })
    }

    /// Assign the scoring range of one transcript.
    ///
    /// On the `-` strand the roles of the two expressions are mirrored so
    /// that the start expression always anchors the 5' side of the gene;
    /// the offsets flip sign with it.
    pub fn apply(&self, t: &mut Transcript) {
        let pick = |anchor: Anchor| -> u32 {
            match anchor {
                Anchor::TxStart => t.tx.start,
                Anchor::CdsStart => t.cds.range.start,
                Anchor::CdsEnd => t.cds.range.end,
                Anchor::TxEnd => t.tx.end,
            }
        };
        let mirror = |anchor: Anchor| -> Anchor {
            match anchor {
                Anchor::TxStart => Anchor::TxEnd,
                Anchor::CdsStart => Anchor::CdsEnd,
                Anchor::CdsEnd => Anchor::CdsStart,
                Anchor::TxEnd => Anchor::TxStart,
            }
        };
        let clamp = |v: i64| -> u32 { v.clamp(0, u32::MAX as i64) as u32 };

        let range = match t.strand {
            Strand::Plus => Range::new(
                clamp(pick(self.start) as i64 + self.start_offset),
                clamp(pick(self.end) as i64 + self.end_offset),
            ),
            Strand::Minus => Range::new(
                clamp(pick(mirror(self.end)) as i64 - self.end_offset),
                clamp(pick(mirror(self.start)) as i64 - self.start_offset),
            ),
        };

        t.ranges = vec![range];
    }
}

fn range_of(t: &Transcript) -> Range {
    t.ranges.first().copied().unwrap_or_default()
}

/// Rename genes that occur on multiple chromosomes or on both strands so
/// that gene names become unique keys: `PTEN` -> `PTEN@chr10+`.
fn disambiguate_gene_names(transcripts: &mut [Transcript]) {
    let mut index: Vec<usize> = (0..transcripts.len()).collect();
    index.sort_by(|&a, &b| {
        let (a, b) = (&transcripts[a], &transcripts[b]);
        a.gene_name
            .cmp(&b.gene_name)
            .then(a.chrom.cmp(&b.chrom))
            .then(range_of(a).start.cmp(&range_of(b).start))
    });

    let mut i = 0;
    while i < index.len() {
        let mut j = i + 1;
        let mut rename = false;
        while j < index.len() {
            let a = &transcripts[index[i]];
            let b = &transcripts[index[j]];
            if b.gene_name != a.gene_name {
                break;
            }
            rename = rename || a.chrom != b.chrom || a.strand != b.strand;
            j += 1;
        }

        if rename {
            for &ix in &index[i..j] {
                let t = &mut transcripts[ix];
                t.gene_name = format!("{}@{}{}", t.gene_name, t.chrom, t.strand);
                t.unique = false;
            }
        }

        i = j;
    }
}

/// Reduce each `(gene, chrom, strand)` run to a single transcript according
/// to `mode`.
fn apply_mode(transcripts: &mut Vec<Transcript>, mode: Mode) {
    let mut index: Vec<usize> = (0..transcripts.len()).collect();
    index.sort_by(|&a, &b| {
        let (a, b) = (&transcripts[a], &transcripts[b]);
        a.gene_name
            .cmp(&b.gene_name)
            .then(a.chrom.cmp(&b.chrom))
            .then(range_of(a).start.cmp(&range_of(b).start))
    });

    let groups: Vec<Vec<usize>> = index
        .into_iter()
        .group_by(|&ix| {
            let t = &transcripts[ix];
            (t.gene_name.clone(), t.chrom, t.strand)
        })
        .into_iter()
        .map(|(_, group)| group.collect())
        .collect();

    for group in groups {
        match mode {
            Mode::Longest => {
                // ties go to the first encountered
                let keep = group
                    .iter()
                    .copied()
                    .rev()
                    .max_by_key(|&ix| range_of(&transcripts[ix]).len())
                    .expect("empty group");
                transcripts[keep].longest = true;
            }
            Mode::LongestExon => {
                // ties go to the first encountered
                let keep = group
                    .iter()
                    .copied()
                    .rev()
                    .max_by_key(|&ix| transcripts[ix].length_exons())
                    .expect("empty group");
                transcripts[keep].longest = true;
            }
            Mode::Collapse => {
                let start = group
                    .iter()
                    .map(|&ix| range_of(&transcripts[ix]).start)
                    .min()
                    .expect("empty group");
                let end = group
                    .iter()
                    .map(|&ix| range_of(&transcripts[ix]).end)
                    .max()
                    .expect("empty group");
                let first = group[0];
                transcripts[first].ranges = vec![Range::new(start, end)];
                transcripts[first].longest = true;
            }
        }
    }

    transcripts.retain(|t| t.longest);
}

/// Mark transcripts whose scoring range is fully contained in another
/// transcript's range on the same chromosome.
fn mark_overlaps(transcripts: &mut [Transcript]) {
    let mut index: Vec<usize> = (0..transcripts.len()).collect();
    index.sort_by(|&a, &b| cmp_by_position(&transcripts[a], &transcripts[b]));

    for i in 0..index.len() {
        for j in (i + 1)..index.len() {
            let a = range_of(&transcripts[index[i]]);
            let b = range_of(&transcripts[index[j]]);
            if transcripts[index[j]].chrom != transcripts[index[i]].chrom || b.start > a.end {
                break;
            }

            if a.start <= b.start && a.end >= b.end {
                tracing::debug!(
                    "gene {} overlaps {}",
                    transcripts[index[i]].gene_name,
                    transcripts[index[j]].gene_name
                );
                transcripts[index[j]].overlapped = true;
            } else if b.start <= a.start && b.end >= a.end {
                tracing::debug!(
                    "gene {} overlaps {}",
                    transcripts[index[j]].gene_name,
                    transcripts[index[i]].gene_name
                );
                transcripts[index[i]].overlapped = true;
            }
        }
    }
}

fn cmp_by_position(a: &Transcript, b: &Transcript) -> Ordering {
    a.chrom
        .cmp(&b.chrom)
        .then(range_of(a).start.cmp(&range_of(b).start))
}

/// Shorten or split ranges so that on each chromosome every base belongs to
/// at most one transcript.  Requires `transcripts` sorted by position; keeps
/// it sorted.
fn cut_overlapping(transcripts: &mut Vec<Transcript>) {
    let mut i = 0;
    while i + 1 < transcripts.len() {
        let j = i + 1;

        if transcripts[i].chrom != transcripts[j].chrom {
            i += 1;
            continue;
        }

        let a = range_of(&transcripts[i]);
        let b = range_of(&transcripts[j]);
        if a.end <= b.start {
            i += 1;
            continue;
        }

        let original_end = a.end;
        transcripts[i].ranges = vec![Range::new(a.start, b.start)];

        // a transcript reaching past its neighbour keeps its tail as a
        // separate record, re-inserted in position order
        if original_end > b.end {
            let mut tail = transcripts[i].clone();
            tail.ranges = vec![Range::new(b.end, original_end)];

            let at = transcripts
                .partition_point(|t| cmp_by_position(t, &tail) != Ordering::Greater);
            transcripts.insert(at, tail);
        }

        i += 1;
    }

    transcripts.retain(|t| !range_of(t).is_empty());
}

/// Run the full selection pipeline on already-loaded transcripts.
pub fn select_transcripts(
    transcripts: &mut Vec<Transcript>,
    bounds: &Bounds,
    mode: Mode,
    cut_overlap: bool,
) {
    for t in transcripts.iter_mut() {
        bounds.apply(t);
    }

    // some combinations of bounds produce inverted ranges, drop those early
    transcripts.retain(|t| !range_of(t).is_empty());

    disambiguate_gene_names(transcripts);
    apply_mode(transcripts, mode);
    mark_overlaps(transcripts);

    transcripts.sort_by(cmp_by_position);

    if cut_overlap {
        cut_overlapping(transcripts);
    }

    transcripts.retain(|t| !range_of(t).is_empty());
}

/// Load the annotation table and derive the canonical per-gene scoring
/// regions.
#[tracing::instrument(skip(start, end))]
pub fn load_transcripts<P>(
    path: P,
    mode: Mode,
    start: &str,
    end: &str,
    cut_overlap: bool,
) -> Result<Vec<Transcript>, anyhow::Error>
where
    P: AsRef<Path> + std::fmt::Debug,
{
    let bounds = Bounds::parse(start, end)?;
    let mut transcripts = load_annotation(path, true)?;
    tracing::debug!("loaded {} transcripts", transcripts.len());

    select_transcripts(&mut transcripts, &bounds, mode, cut_overlap);
    tracing::debug!("{} scoring regions after selection", transcripts.len());

    Ok(transcripts)
}

/// Replace each transcript's scoring ranges with their exon complement, so
/// only intronic and untranslated stretches score.  Used by the synthetic
/// lethal pipeline.
pub fn filter_out_exons(transcripts: &mut [Transcript]) {
    for t in transcripts.iter_mut() {
        let mut exons: Vec<Range> = t.exons.iter().map(|e| e.range).collect();
        exons.sort_by_key(|r| (r.start, r.end));

        let mut result = Vec::new();
        for r in &t.ranges {
            let mut cursor = r.start;
            for e in &exons {
                if e.end <= cursor || e.start >= r.end {
                    continue;
                }
                if e.start > cursor {
                    result.push(Range::new(cursor, e.start));
                }
                cursor = cursor.max(e.end);
                if cursor >= r.end {
                    break;
                }
            }
            if cursor < r.end {
                result.push(Range::new(cursor, r.end));
            }
        }

        t.ranges = result;
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::common::{Chrom, Range, Strand};
    use crate::transcripts::{test_transcript, Cds, CdsStat, Exon, Mode, Transcript};

    use super::*;

    fn with_cds(mut t: Transcript, cds_start: u32, cds_end: u32) -> Transcript {
        t.cds = Cds {
            range: Range::new(cds_start, cds_end),
            start_stat: CdsStat::Complete,
            end_stat: CdsStat::Complete,
        };
        t
    }

    #[test]
    fn bounds_grammar() {
        assert!(Bounds::parse("cds-100", "cds").is_ok());
        assert!(Bounds::parse("txStart", "txEnd+500").is_ok());
        assert!(Bounds::parse("cdsEnd", "tx").is_ok());
        assert!(Bounds::parse("cds+", "tx").is_err());
        assert!(Bounds::parse("gene", "tx").is_err());
        assert!(Bounds::parse("cds100", "tx").is_err());
    }

    #[test]
    fn bounds_plus_strand() {
        let bounds = Bounds::parse("cds-100", "cds").unwrap();
        let mut t = with_cds(
            test_transcript("A", Chrom::Chr1, Strand::Plus, 500, 2500),
            1000,
            2000,
        );
        bounds.apply(&mut t);
        assert_eq!(vec![Range::new(900, 2000)], t.ranges);
    }

    #[test]
    fn bounds_minus_strand_mirrors() {
        let bounds = Bounds::parse("cds-100", "cds").unwrap();
        let mut t = with_cds(
            test_transcript("A", Chrom::Chr1, Strand::Minus, 500, 2500),
            1000,
            2000,
        );
        bounds.apply(&mut t);
        // 5' extension lands on the high-coordinate side of a minus gene
        assert_eq!(vec![Range::new(1000, 2100)], t.ranges);
    }

    #[test]
    fn bounds_tx_with_end_offset() {
        let bounds = Bounds::parse("tx", "tx+1000").unwrap();
        let mut t = test_transcript("A", Chrom::Chr1, Strand::Plus, 500, 2500);
        bounds.apply(&mut t);
        assert_eq!(vec![Range::new(500, 3500)], t.ranges);
    }

    fn run_selection(
        mut transcripts: Vec<Transcript>,
        mode: Mode,
        cut_overlap: bool,
    ) -> Vec<Transcript> {
        let bounds = Bounds::parse("tx", "tx").unwrap();
        select_transcripts(&mut transcripts, &bounds, mode, cut_overlap);
        transcripts
    }

    #[test]
    fn collapse_merges_to_min_max() {
        let ts = run_selection(
            vec![
                test_transcript("X", Chrom::Chr1, Strand::Plus, 100, 200),
                test_transcript("X", Chrom::Chr1, Strand::Plus, 150, 300),
            ],
            Mode::Collapse,
            false,
        );
        assert_eq!(1, ts.len());
        assert_eq!(vec![Range::new(100, 300)], ts[0].ranges);
    }

    #[test]
    fn longest_keeps_one_per_gene() {
        let ts = run_selection(
            vec![
                test_transcript("X", Chrom::Chr1, Strand::Plus, 100, 200),
                test_transcript("X", Chrom::Chr1, Strand::Plus, 150, 400),
                test_transcript("Y", Chrom::Chr1, Strand::Plus, 1000, 1100),
            ],
            Mode::Longest,
            false,
        );
        assert_eq!(2, ts.len());
        assert_eq!(vec![Range::new(150, 400)], ts[0].ranges);
        assert_eq!("Y", ts[1].gene_name);
    }

    #[test]
    fn longest_exon_selects_by_summed_exon_length() {
        let mut a = test_transcript("X", Chrom::Chr1, Strand::Plus, 100, 500);
        a.exons = vec![Exon {
            range: Range::new(100, 150),
            frame: 0,
        }];
        let mut b = test_transcript("X", Chrom::Chr1, Strand::Plus, 100, 300);
        b.exons = vec![
            Exon {
                range: Range::new(100, 180),
                frame: 0,
            },
            Exon {
                range: Range::new(200, 280),
                frame: 0,
            },
        ];
        let ts = run_selection(vec![a, b], Mode::LongestExon, false);
        assert_eq!(1, ts.len());
        // b has 160 bases of exon against a's 50
        assert_eq!(vec![Range::new(100, 300)], ts[0].ranges);
    }

    #[test]
    fn ambiguous_gene_names_are_disambiguated() {
        let ts = run_selection(
            vec![
                test_transcript("X", Chrom::Chr1, Strand::Plus, 100, 200),
                test_transcript("X", Chrom::Chr2, Strand::Plus, 300, 400),
            ],
            Mode::Longest,
            false,
        );
        assert_eq!(2, ts.len());
        assert_eq!("X@chr1+", ts[0].gene_name);
        assert_eq!("X@chr2+", ts[1].gene_name);
    }

    #[test]
    fn both_strand_gene_is_disambiguated() {
        let ts = run_selection(
            vec![
                test_transcript("X", Chrom::Chr1, Strand::Plus, 100, 200),
                test_transcript("X", Chrom::Chr1, Strand::Minus, 300, 400),
            ],
            Mode::Longest,
            false,
        );
        assert_eq!(2, ts.len());
        assert_eq!("X@chr1+", ts[0].gene_name);
        assert_eq!("X@chr1-", ts[1].gene_name);
    }

    #[test]
    fn contained_transcript_is_marked_overlapped() {
        let ts = run_selection(
            vec![
                test_transcript("A", Chrom::Chr1, Strand::Plus, 100, 500),
                test_transcript("B", Chrom::Chr1, Strand::Plus, 200, 300),
            ],
            Mode::Longest,
            false,
        );
        assert!(!ts[0].overlapped);
        assert!(ts[1].overlapped);
    }

    #[test]
    fn cut_overlap_splits_containing_transcript() {
        let ts = run_selection(
            vec![
                test_transcript("A", Chrom::Chr1, Strand::Plus, 100, 500),
                test_transcript("B", Chrom::Chr1, Strand::Plus, 200, 300),
            ],
            Mode::Longest,
            true,
        );
        assert_eq!(3, ts.len());
        assert_eq!(("A", Range::new(100, 200)), (&*ts[0].gene_name, ts[0].ranges[0]));
        assert_eq!(("B", Range::new(200, 300)), (&*ts[1].gene_name, ts[1].ranges[0]));
        assert_eq!(("A", Range::new(300, 500)), (&*ts[2].gene_name, ts[2].ranges[0]));
    }

    #[test]
    fn cut_overlap_shortens_partial_overlap() {
        let ts = run_selection(
            vec![
                test_transcript("A", Chrom::Chr1, Strand::Plus, 100, 250),
                test_transcript("B", Chrom::Chr1, Strand::Plus, 200, 300),
            ],
            Mode::Longest,
            true,
        );
        assert_eq!(2, ts.len());
        assert_eq!(Range::new(100, 200), ts[0].ranges[0]);
        assert_eq!(Range::new(200, 300), ts[1].ranges[0]);
    }

    #[test]
    fn cut_overlap_leaves_no_overlaps() {
        let input = vec![
            test_transcript("A", Chrom::Chr1, Strand::Plus, 100, 500),
            test_transcript("B", Chrom::Chr1, Strand::Plus, 200, 600),
            test_transcript("C", Chrom::Chr1, Strand::Plus, 250, 320),
            test_transcript("D", Chrom::Chr2, Strand::Plus, 100, 500),
            test_transcript("E", Chrom::Chr2, Strand::Minus, 400, 900),
        ];
        let ts = run_selection(input, Mode::Longest, true);
        for w in ts.windows(2) {
            if w[0].chrom == w[1].chrom {
                assert!(
                    w[0].ranges[0].end <= w[1].ranges[0].start,
                    "{:?} overlaps {:?}",
                    w[0].gene_name,
                    w[1].gene_name
                );
            }
        }
    }

    #[test]
    fn selection_is_stable() {
        let input = vec![
            test_transcript("A", Chrom::Chr1, Strand::Plus, 100, 500),
            test_transcript("B", Chrom::Chr1, Strand::Plus, 200, 600),
            test_transcript("B", Chrom::Chr1, Strand::Plus, 250, 320),
            test_transcript("C", Chrom::Chr2, Strand::Minus, 400, 900),
        ];
        let first = run_selection(input.clone(), Mode::Longest, true);
        let second = run_selection(input, Mode::Longest, true);
        assert_eq!(first, second);
    }

    #[test]
    fn empty_ranges_are_dropped() {
        // cds bounds on a non-coding transcript produce an empty range
        let bounds = Bounds::parse("cds", "cds").unwrap();
        let mut t = test_transcript("A", Chrom::Chr1, Strand::Plus, 100, 500);
        t.cds.range = Range::new(500, 500);
        let mut ts = vec![t];
        select_transcripts(&mut ts, &bounds, Mode::Longest, false);
        assert!(ts.is_empty());
    }

    #[test]
    fn filter_out_exons_keeps_introns_and_utrs() {
        let mut t = test_transcript("A", Chrom::Chr1, Strand::Plus, 100, 500);
        t.exons = vec![
            Exon {
                range: Range::new(150, 200),
                frame: 0,
            },
            Exon {
                range: Range::new(300, 350),
                frame: 1,
            },
        ];
        let mut ts = vec![t];
        filter_out_exons(&mut ts);
        assert_eq!(
            vec![
                Range::new(100, 150),
                Range::new(200, 300),
                Range::new(350, 500)
            ],
            ts[0].ranges
        );
    }

    #[test]
    fn filter_out_exons_may_empty_a_transcript() {
        let mut t = test_transcript("A", Chrom::Chr1, Strand::Plus, 100, 200);
        t.exons = vec![Exon {
            range: Range::new(100, 200),
            frame: 0,
        }];
        let mut ts = vec![t];
        filter_out_exons(&mut ts);
        assert!(ts[0].ranges.is_empty());
    }
}
