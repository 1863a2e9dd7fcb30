//! Assignment of aligned reads to transcript scoring regions.

use std::io::BufRead;

use crate::common::{Chrom, Strand};
use crate::err::Error;
use crate::transcripts::Transcript;

use super::{Insertion, InsertionCount, Insertions};

/// Parse one aligner output line: `<name> TAB strand TAB chrom TAB pos ...`.
///
/// Returns `Ok(None)` for hits on scaffolds and patch chromosomes, which
/// are skipped; structural violations are hard errors.
pub fn parse_alignment(line: &str) -> Result<Option<Insertion>, anyhow::Error> {
    let mut fields = line.split('\t');

    fields
        .next()
        .ok_or_else(|| Error::InvalidInput("empty alignment record".into()))?;

    let strand = fields
        .next()
        .and_then(|f| {
            let mut chars = f.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Strand::from_char(c),
                _ => None,
            }
        })
        .ok_or_else(|| Error::InvalidInput(format!("invalid strand in {:?}", line)))?;

    let chrom_field = fields
        .next()
        .ok_or_else(|| Error::InvalidInput(format!("missing chromosome in {:?}", line)))?;

    let pos = fields
        .next()
        .filter(|f| !f.is_empty())
        .ok_or_else(|| Error::InvalidInput(format!("missing position in {:?}", line)))?
        .parse::<u32>()
        .map_err(|e| Error::InvalidInput(format!("invalid position in {:?}: {}", line, e)))?;

    match chrom_field.parse::<Chrom>() {
        Ok(chrom) => Ok(Some(Insertion::new(chrom, strand, pos))),
        Err(_) => Ok(None),
    }
}

/// Index of the first transcript whose scoring region may still cover
/// `pos`: the binary-search partition point, stepped back one entry.
fn search_start(transcripts: &[Transcript], chrom: Chrom, pos: u32) -> usize {
    let at = transcripts.partition_point(|t| (t.chrom, t.start()) < (chrom, pos));
    at.saturating_sub(1)
}

fn assign_one(transcripts: &[Transcript], result: &mut [Insertions], hit: Insertion) {
    let mut i = search_start(transcripts, hit.chrom, hit.pos);
    while i < transcripts.len() {
        let t = &transcripts[i];
        if t.chrom != hit.chrom || t.start() > hit.pos {
            if t.chrom >= hit.chrom {
                break;
            }
            i += 1;
            continue;
        }

        if t.ranges.iter().any(|r| r.contains(hit.pos)) {
            if hit.strand == t.strand {
                result[i].sense.insert(hit.pos);
            } else {
                result[i].anti_sense.insert(hit.pos);
            }
        }

        i += 1;
    }
}

/// Stream aligner output and collect the distinct insertion positions per
/// transcript, split into sense and antisense.
///
/// `transcripts` must be sorted by `(chrom, start)` as the selector leaves
/// them.  Results depend only on the transcript list and the multiset of
/// alignments; sets make replayed reads idempotent.
pub fn assign_insertions(
    reader: impl BufRead,
    transcripts: &[Transcript],
) -> Result<Vec<Insertions>, anyhow::Error> {
    let mut result = vec![Insertions::default(); transcripts.len()];

    for line in reader.lines() {
        let line = line?;
        if let Some(hit) = parse_alignment(&line)? {
            assign_one(transcripts, &mut result, hit);
        }
    }

    Ok(result)
}

/// Like [`assign_insertions`] but for already-decoded insertion lists.
pub fn assign_insertion_list(
    insertions: &[Insertion],
    transcripts: &[Transcript],
) -> Vec<Insertions> {
    let mut result = vec![Insertions::default(); transcripts.len()];
    for &hit in insertions {
        assign_one(transcripts, &mut result, hit);
    }
    result
}

/// Tally reads per transcript for the synthetic lethal pipeline, where
/// every read counts.
///
/// Both inputs must be sorted: `insertions` in canonical order and
/// `transcripts` by `(chrom, start)`; the tally is a single merge pass.
pub fn count_insertions(
    insertions: &[Insertion],
    transcripts: &[Transcript],
) -> Vec<InsertionCount> {
    let mut result = vec![InsertionCount::default(); transcripts.len()];

    let mut ts = 0;
    for hit in insertions {
        // transcripts entirely before the current position are done for good
        while ts < transcripts.len()
            && (transcripts[ts].chrom < hit.chrom
                || (transcripts[ts].chrom == hit.chrom && transcripts[ts].end() <= hit.pos))
        {
            ts += 1;
        }

        let mut i = ts;
        while i < transcripts.len()
            && transcripts[i].chrom == hit.chrom
            && transcripts[i].start() <= hit.pos
        {
            let t = &transcripts[i];
            if t.ranges.iter().any(|r| r.contains(hit.pos)) {
                if hit.strand == t.strand {
                    result[i].sense += 1;
                } else {
                    result[i].anti_sense += 1;
                }
            }
            i += 1;
        }
    }

    result
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::common::{Chrom, Strand};
    use crate::transcripts::test_transcript;

    use super::*;

    #[test]
    fn parse_regular_line() {
        let hit = parse_alignment("read-17\t+\tchr3\t123456\tACGT\tIIII").unwrap();
        assert_eq!(
            Some(Insertion::new(Chrom::Chr3, Strand::Plus, 123456)),
            hit
        );
    }

    #[test]
    fn parse_minimal_line() {
        let hit = parse_alignment("x\t-\tchrX\t9").unwrap();
        assert_eq!(Some(Insertion::new(Chrom::ChrX, Strand::Minus, 9)), hit);
    }

    #[test]
    fn scaffold_hit_is_skipped() {
        let hit = parse_alignment("x\t+\tchr1_gl000191_random\t500").unwrap();
        assert_eq!(None, hit);
    }

    #[rstest::rstest]
    #[case("")]
    #[case("no-tabs-at-all")]
    #[case("x\t*\tchr1\t100")]
    #[case("x\t++\tchr1\t100")]
    #[case("x\t+\tchr1\tnot-a-number")]
    #[case("x\t+\tchr1\t")]
    fn malformed_lines_are_hard_errors(#[case] line: &str) {
        assert!(parse_alignment(line).is_err(), "{:?}", line);
    }

    #[test]
    fn assigns_by_range_and_side() {
        let transcripts = vec![
            test_transcript("A", Chrom::Chr1, Strand::Plus, 100, 200),
            test_transcript("B", Chrom::Chr1, Strand::Minus, 150, 250),
        ];

        let input = "r1\t+\tchr1\t150\nr2\t-\tchr1\t150\nr3\t+\tchr1\t250\n";
        let result = assign_insertions(std::io::Cursor::new(input), &transcripts).unwrap();

        // 150 falls in both transcripts, once per side; 250 is outside of
        // both half-open ranges
        assert_eq!(vec![150], result[0].sense.iter().copied().collect::<Vec<_>>());
        assert_eq!(
            vec![150],
            result[0].anti_sense.iter().copied().collect::<Vec<_>>()
        );
        assert_eq!(vec![150], result[1].sense.iter().copied().collect::<Vec<_>>());
        assert_eq!(
            vec![150],
            result[1].anti_sense.iter().copied().collect::<Vec<_>>()
        );
    }

    #[test]
    fn duplicate_positions_collapse_in_sets() {
        let transcripts = vec![test_transcript("A", Chrom::Chr1, Strand::Plus, 100, 200)];
        let input = "r1\t+\tchr1\t150\nr2\t+\tchr1\t150\n";
        let result = assign_insertions(std::io::Cursor::new(input), &transcripts).unwrap();
        assert_eq!(1, result[0].sense.len());
    }

    #[test]
    fn respects_chromosome_boundaries() {
        let transcripts = vec![
            test_transcript("A", Chrom::Chr1, Strand::Plus, 100, 200),
            test_transcript("B", Chrom::Chr2, Strand::Plus, 100, 200),
        ];
        let input = "r1\t+\tchr2\t150\n";
        let result = assign_insertions(std::io::Cursor::new(input), &transcripts).unwrap();
        assert!(result[0].sense.is_empty());
        assert_eq!(1, result[1].sense.len());
    }

    #[test]
    fn multi_range_transcript_scores_only_inside_ranges() {
        let mut t = test_transcript("A", Chrom::Chr1, Strand::Plus, 100, 500);
        t.ranges = vec![
            crate::common::Range::new(100, 150),
            crate::common::Range::new(300, 400),
        ];
        let transcripts = vec![t];

        let input = "r1\t+\tchr1\t120\nr2\t+\tchr1\t200\nr3\t+\tchr1\t350\n";
        let result = assign_insertions(std::io::Cursor::new(input), &transcripts).unwrap();
        assert_eq!(
            vec![120, 350],
            result[0].sense.iter().copied().collect::<Vec<_>>()
        );
    }

    #[test]
    fn count_insertions_counts_every_read() {
        let transcripts = vec![test_transcript("A", Chrom::Chr1, Strand::Plus, 100, 200)];
        let mut hits = vec![
            Insertion::new(Chrom::Chr1, Strand::Plus, 150),
            Insertion::new(Chrom::Chr1, Strand::Plus, 150),
            Insertion::new(Chrom::Chr1, Strand::Minus, 160),
        ];
        hits.sort();
        let counts = count_insertions(&hits, &transcripts);
        assert_eq!(2, counts[0].sense);
        assert_eq!(1, counts[0].anti_sense);
    }

    #[test]
    fn count_insertions_streams_over_many_transcripts() {
        let transcripts = vec![
            test_transcript("A", Chrom::Chr1, Strand::Plus, 100, 200),
            test_transcript("B", Chrom::Chr1, Strand::Plus, 300, 400),
            test_transcript("C", Chrom::Chr2, Strand::Plus, 100, 200),
        ];
        let mut hits = vec![
            Insertion::new(Chrom::Chr1, Strand::Plus, 150),
            Insertion::new(Chrom::Chr1, Strand::Plus, 350),
            Insertion::new(Chrom::Chr2, Strand::Plus, 150),
            Insertion::new(Chrom::Chr2, Strand::Plus, 500),
        ];
        hits.sort();
        let counts = count_insertions(&hits, &transcripts);
        assert_eq!(
            vec![(1, 0), (1, 0), (1, 0)],
            counts
                .iter()
                .map(|c| (c.sense, c.anti_sense))
                .collect::<Vec<_>>()
        );
    }
}
