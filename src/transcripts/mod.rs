//! Transcript model: annotation parsing and scoring region selection.

use crate::common::{Chrom, Range, Strand};

pub mod annotation;
pub mod select;

pub use annotation::load_annotation;
pub use select::{filter_out_exons, load_transcripts, Bounds};

/// How to reduce multiple transcripts of one gene to one scoring region.
#[derive(
    clap::ValueEnum,
    serde::Serialize,
    serde::Deserialize,
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Mode {
    /// Widen a gene's first transcript to the min start / max end of all of
    /// its transcripts.
    Collapse,
    /// Keep the transcript with the widest scoring range.
    #[default]
    Longest,
    /// Keep the transcript with the greatest summed exon length (used by
    /// the synthetic lethal pipeline).
    LongestExon,
}

/// Completeness annotation of one end of a coding sequence.
#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CdsStat {
    #[default]
    None,
    Unknown,
    Incomplete,
    Complete,
}

/// Coding sequence interval with per-end completeness.
#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cds {
    pub range: Range,
    pub start_stat: CdsStat,
    pub end_stat: CdsStat,
}

impl Cds {
    pub fn is_complete(&self) -> bool {
        self.start_stat == CdsStat::Complete && self.end_stat == CdsStat::Complete
    }
}

/// Exon interval with reading frame (`-1` when there is none).
#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Exon {
    pub range: Range,
    pub frame: i8,
}

/// One transcript of the annotation table.
///
/// After selection (see [`select`]) `ranges` holds the ascending,
/// non-overlapping scoring intervals; before selection it is just `[tx]`.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Transcript {
    pub name: String,
    pub gene_name: String,
    pub chrom: Chrom,
    pub strand: Strand,
    pub score: f32,
    pub tx: Range,
    pub cds: Cds,
    pub exons: Vec<Exon>,

    /// Scoring ranges, ascending and non-overlapping.
    pub ranges: Vec<Range>,

    // transient flags used during selection
    #[serde(skip)]
    pub longest: bool,
    #[serde(skip)]
    pub overlapped: bool,
    #[serde(skip)]
    pub unique: bool,
}

impl Transcript {
    /// Start of the first scoring range, falling back to the transcription
    /// start before ranges are assigned.
    pub fn start(&self) -> u32 {
        self.ranges.first().map_or(self.tx.start, |r| r.start)
    }

    /// End of the last scoring range.
    pub fn end(&self) -> u32 {
        self.ranges.last().map_or(self.tx.end, |r| r.end)
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.iter().all(|r| r.is_empty())
    }

    /// Summed length of all exons.
    pub fn length_exons(&self) -> u32 {
        self.exons.iter().map(|e| e.range.len()).sum()
    }

    /// Whether `pos` falls into any scoring range.
    pub fn contains(&self, chrom: Chrom, pos: u32) -> bool {
        self.chrom == chrom && self.ranges.iter().any(|r| r.contains(pos))
    }
}

#[cfg(test)]
pub(crate) fn test_transcript(
    gene: &str,
    chrom: Chrom,
    strand: Strand,
    start: u32,
    end: u32,
) -> Transcript {
    Transcript {
        name: format!("{}-001", gene),
        gene_name: gene.to_string(),
        chrom,
        strand,
        tx: Range::new(start, end),
        cds: Cds {
            range: Range::new(start, end),
            start_stat: CdsStat::Complete,
            end_stat: CdsStat::Complete,
        },
        ranges: vec![Range::new(start, end)],
        ..Default::default()
    }
}
