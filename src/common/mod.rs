//! Common functionality.

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};

pub mod io;

/// Commonly used command line arguments.
#[derive(Parser, Debug)]
pub struct Args {
    /// Verbosity of the program
    #[clap(flatten)]
    pub verbose: Verbosity<InfoLevel>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            verbose: Verbosity::new(0, 0),
        }
    }
}

/// Chromosome identifier.
///
/// The declaration order is load-bearing: binary searches over transcript
/// and insertion lists rely on `Invalid < chr1 < ... < chr23 < chrX < chrY`.
#[derive(
    serde::Serialize,
    serde::Deserialize,
    enum_map::Enum,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Clone,
    Copy,
    Debug,
    Default,
    Hash,
    strum::Display,
)]
pub enum Chrom {
    #[default]
    #[strum(serialize = "invalid")]
    Invalid,
    #[strum(serialize = "chr1")]
    Chr1,
    #[strum(serialize = "chr2")]
    Chr2,
    #[strum(serialize = "chr3")]
    Chr3,
    #[strum(serialize = "chr4")]
    Chr4,
    #[strum(serialize = "chr5")]
    Chr5,
    #[strum(serialize = "chr6")]
    Chr6,
    #[strum(serialize = "chr7")]
    Chr7,
    #[strum(serialize = "chr8")]
    Chr8,
    #[strum(serialize = "chr9")]
    Chr9,
    #[strum(serialize = "chr10")]
    Chr10,
    #[strum(serialize = "chr11")]
    Chr11,
    #[strum(serialize = "chr12")]
    Chr12,
    #[strum(serialize = "chr13")]
    Chr13,
    #[strum(serialize = "chr14")]
    Chr14,
    #[strum(serialize = "chr15")]
    Chr15,
    #[strum(serialize = "chr16")]
    Chr16,
    #[strum(serialize = "chr17")]
    Chr17,
    #[strum(serialize = "chr18")]
    Chr18,
    #[strum(serialize = "chr19")]
    Chr19,
    #[strum(serialize = "chr20")]
    Chr20,
    #[strum(serialize = "chr21")]
    Chr21,
    #[strum(serialize = "chr22")]
    Chr22,
    #[strum(serialize = "chr23")]
    Chr23,
    #[strum(serialize = "chrX")]
    ChrX,
    #[strum(serialize = "chrY")]
    ChrY,
}

impl Chrom {
    /// All real chromosomes, in on-disk order.
    pub const ALL: [Chrom; 25] = [
        Chrom::Chr1,
        Chrom::Chr2,
        Chrom::Chr3,
        Chrom::Chr4,
        Chrom::Chr5,
        Chrom::Chr6,
        Chrom::Chr7,
        Chrom::Chr8,
        Chrom::Chr9,
        Chrom::Chr10,
        Chrom::Chr11,
        Chrom::Chr12,
        Chrom::Chr13,
        Chrom::Chr14,
        Chrom::Chr15,
        Chrom::Chr16,
        Chrom::Chr17,
        Chrom::Chr18,
        Chrom::Chr19,
        Chrom::Chr20,
        Chrom::Chr21,
        Chrom::Chr22,
        Chrom::Chr23,
        Chrom::ChrX,
        Chrom::ChrY,
    ];

    /// Numeric code used by the legacy flat insertion files.
    pub fn code(&self) -> i8 {
        *self as i8
    }

    /// Inverse of [`Chrom::code`].
    pub fn from_code(code: i8) -> Option<Chrom> {
        match code {
            0 => Some(Chrom::Invalid),
            1..=25 => Some(Chrom::ALL[(code - 1) as usize]),
            _ => None,
        }
    }
}

impl std::str::FromStr for Chrom {
    type Err = anyhow::Error;

    /// Accepts `chr1` through `chr23`, `chrX` and `chrY`; anything else is
    /// an error so callers can decide whether to skip or fail.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let suffix = s
            .strip_prefix("chr")
            .ok_or_else(|| anyhow::anyhow!("not a chromosome: {:?}", s))?;
        match suffix {
            "X" => Ok(Chrom::ChrX),
            "Y" => Ok(Chrom::ChrY),
            _ => match suffix.parse::<u8>() {
                Ok(n) if (1..=23).contains(&n) => Ok(Chrom::ALL[(n - 1) as usize]),
                _ => Err(anyhow::anyhow!("not a chromosome: {:?}", s)),
            },
        }
    }
}

/// Strand of a transcript or an aligned read.
///
/// `+` sorts before `-`, which the insertion codec relies on when merging
/// the per-strand position streams back into one list.
#[derive(
    serde::Serialize,
    serde::Deserialize,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Clone,
    Copy,
    Debug,
    Default,
    Hash,
    strum::Display,
)]
pub enum Strand {
    #[default]
    #[strum(serialize = "+")]
    Plus,
    #[strum(serialize = "-")]
    Minus,
}

impl Strand {
    pub fn from_char(c: char) -> Option<Strand> {
        match c {
            '+' => Some(Strand::Plus),
            '-' => Some(Strand::Minus),
            _ => None,
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            Strand::Plus => '+',
            Strand::Minus => '-',
        }
    }
}

/// Which side(s) of a transcript to count insertions on.
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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    #[default]
    Sense,
    AntiSense,
    Both,
}

/// Half-open genomic interval `[start, end)`.
#[derive(
    serde::Serialize, serde::Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash,
)]
pub struct Range {
    pub start: u32,
    pub end: u32,
}

impl Range {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn contains(&self, pos: u32) -> bool {
        pos >= self.start && pos < self.end
    }

    pub fn overlaps(&self, other: &Range) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// The version of the `screen-worker` package.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Return the version of the `screen-worker` crate and `x.y.z` in tests.
pub fn worker_version() -> &'static str {
    if cfg!(test) {
        "x.y.z"
    } else {
        env!("CARGO_PKG_VERSION")
    }
}
