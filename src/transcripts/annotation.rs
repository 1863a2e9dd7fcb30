//! Parsing of UCSC-style tab separated annotation tables.

use std::io::BufRead;
use std::path::Path;

use crate::common::io::open_reader;
use crate::common::{Chrom, Range, Strand};

use super::{Cds, CdsStat, Exon, Transcript};

/// Positions of the columns we know, resolved against the header line.
/// Unknown headers are silently ignored.
#[derive(Debug, Default)]
struct Columns {
    name: Option<usize>,
    chrom: Option<usize>,
    strand: Option<usize>,
    tx_start: Option<usize>,
    tx_end: Option<usize>,
    cds_start: Option<usize>,
    cds_end: Option<usize>,
    exon_count: Option<usize>,
    exon_starts: Option<usize>,
    exon_ends: Option<usize>,
    score: Option<usize>,
    name2: Option<usize>,
    cds_start_stat: Option<usize>,
    cds_end_stat: Option<usize>,
    exon_frames: Option<usize>,
}

impl Columns {
    fn resolve(header: &csv::StringRecord) -> Self {
        let mut columns = Columns::default();
        for (i, field) in header.iter().enumerate() {
            match field {
                "name" => columns.name = Some(i),
                "chrom" => columns.chrom = Some(i),
                "strand" => columns.strand = Some(i),
                "txStart" => columns.tx_start = Some(i),
                "txEnd" => columns.tx_end = Some(i),
                "cdsStart" => columns.cds_start = Some(i),
                "cdsEnd" => columns.cds_end = Some(i),
                "exonCount" => columns.exon_count = Some(i),
                "exonStarts" => columns.exon_starts = Some(i),
                "exonEnds" => columns.exon_ends = Some(i),
                "score" => columns.score = Some(i),
                "name2" => columns.name2 = Some(i),
                "cdsStartStat" => columns.cds_start_stat = Some(i),
                "cdsEndStat" => columns.cds_end_stat = Some(i),
                "exonFrames" => columns.exon_frames = Some(i),
                _ => (),
            }
        }
        columns
    }
}

fn parse_cds_stat(s: &str) -> CdsStat {
    match s {
        "cmpl" => CdsStat::Complete,
        "incmpl" => CdsStat::Incomplete,
        "unk" => CdsStat::Unknown,
        _ => CdsStat::None,
    }
}

/// Parse one comma separated list column (the lists carry a trailing comma).
fn parse_list<T: std::str::FromStr>(s: &str) -> Result<Vec<T>, anyhow::Error>
where
    <T as std::str::FromStr>::Err: std::fmt::Display,
{
    s.split(',')
        .filter(|f| !f.is_empty())
        .map(|f| {
            f.parse::<T>()
                .map_err(|e| anyhow::anyhow!("invalid list entry {:?}: {}", f, e))
        })
        .collect()
}

fn field<'a>(record: &'a csv::StringRecord, ix: Option<usize>) -> Option<&'a str> {
    ix.and_then(|i| record.get(i))
}

fn parse_record(
    record: &csv::StringRecord,
    columns: &Columns,
) -> Result<Option<Transcript>, anyhow::Error> {
    // rows for scaffolds and patch chromosomes are skipped without error
    let chrom = match field(record, columns.chrom) {
        Some(s) => match s.parse::<Chrom>() {
            Ok(chrom) => chrom,
            Err(_) => return Ok(None),
        },
        None => return Ok(None),
    };

    let strand = field(record, columns.strand)
        .and_then(|s| s.chars().next())
        .and_then(Strand::from_char)
        .ok_or_else(|| anyhow::anyhow!("missing or invalid strand"))?;

    let parse_u32 = |ix: Option<usize>, what: &str| -> Result<u32, anyhow::Error> {
        field(record, ix)
            .ok_or_else(|| anyhow::anyhow!("missing column {}", what))?
            .parse::<u32>()
            .map_err(|e| anyhow::anyhow!("invalid {}: {}", what, e))
    };

    let tx = Range::new(
        parse_u32(columns.tx_start, "txStart")?,
        parse_u32(columns.tx_end, "txEnd")?,
    );
    let cds_range = Range::new(
        parse_u32(columns.cds_start, "cdsStart")?,
        parse_u32(columns.cds_end, "cdsEnd")?,
    );

    let exon_starts: Vec<u32> = field(record, columns.exon_starts)
        .map(parse_list)
        .transpose()?
        .unwrap_or_default();
    let exon_ends: Vec<u32> = field(record, columns.exon_ends)
        .map(parse_list)
        .transpose()?
        .unwrap_or_default();
    let exon_frames: Vec<i8> = field(record, columns.exon_frames)
        .map(parse_list)
        .transpose()?
        .unwrap_or_default();
    if exon_starts.len() != exon_ends.len() {
        anyhow::bail!(
            "exonStarts and exonEnds differ in length ({} vs {})",
            exon_starts.len(),
            exon_ends.len()
        );
    }

    let exons = exon_starts
        .iter()
        .zip(exon_ends.iter())
        .enumerate()
        .map(|(i, (&start, &end))| Exon {
            range: Range::new(start, end),
            frame: exon_frames.get(i).copied().unwrap_or(-1),
        })
        .collect::<Vec<_>>();

    let gene_name = {
        let raw = field(record, columns.name2).unwrap_or_default();
        let stripped: String = raw.chars().filter(|&c| c != '_').collect();
        if stripped != raw {
            tracing::debug!("replacing gene name {} with {}", raw, stripped);
        }
        stripped
    };

    let score = field(record, columns.score)
        .and_then(|s| s.parse::<f32>().ok())
        .unwrap_or(0.0);

    Ok(Some(Transcript {
        name: field(record, columns.name).unwrap_or_default().to_string(),
        gene_name,
        chrom,
        strand,
        score,
        tx,
        cds: Cds {
            range: cds_range,
            start_stat: field(record, columns.cds_start_stat)
                .map(parse_cds_stat)
                .unwrap_or_default(),
            end_stat: field(record, columns.cds_end_stat)
                .map(parse_cds_stat)
                .unwrap_or_default(),
        },
        exons,
        // initially the whole transcription region scores
        ranges: vec![tx],
        longest: false,
        overlapped: false,
        unique: true,
    }))
}

/// Load the annotation table from `reader`.
///
/// Per-line parse failures are logged as diagnostics and the line dropped;
/// only a missing or empty header is fatal.  With `complete_only`,
/// transcripts whose CDS is not complete on both ends are skipped.
pub fn load_annotation_from(
    reader: impl BufRead,
    complete_only: bool,
) -> Result<Vec<Transcript>, anyhow::Error> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let header = csv_reader
        .headers()
        .map_err(|e| anyhow::anyhow!("invalid annotation file: {}", e))?
        .clone();
    if header.is_empty() {
        anyhow::bail!("invalid annotation file: empty header");
    }
    let columns = Columns::resolve(&header);

    let mut transcripts = Vec::new();
    for (line_no, record) in csv_reader.records().enumerate() {
        let record = record.map_err(|e| anyhow::anyhow!("error reading record: {}", e))?;
        match parse_record(&record, &columns) {
            Ok(Some(ts)) => {
                if complete_only && !ts.cds.is_complete() {
                    continue;
                }
                transcripts.push(ts);
            }
            Ok(None) => (),
            Err(e) => {
                tracing::warn!("parse error at line {}: {}", line_no + 2, e);
            }
        }
    }

    Ok(transcripts)
}

/// Load the annotation table from a (possibly gzipped) file.
#[tracing::instrument]
pub fn load_annotation<P>(path: P, complete_only: bool) -> Result<Vec<Transcript>, anyhow::Error>
where
    P: AsRef<Path> + std::fmt::Debug,
{
    let reader = open_reader(path.as_ref())?;
    let transcripts = load_annotation_from(reader, complete_only)?;
    tracing::debug!("loaded {} transcripts", transcripts.len());
    Ok(transcripts)
}
