//! Insertion sites: value types, the packed on-disk codec and the
//! alignment-to-transcript assigner.

use std::collections::BTreeSet;
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::common::{Chrom, Direction, Strand};

pub mod assign;
pub mod bits;
pub mod codec;

/// One mapped insertion site.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Insertion {
    pub chrom: Chrom,
    pub strand: Strand,
    pub pos: u32,
}

impl Insertion {
    pub fn new(chrom: Chrom, strand: Strand, pos: u32) -> Self {
        Self { chrom, strand, pos }
    }
}

/// Canonical order: chromosome, position, strand (`+` before `-`).
impl Ord for Insertion {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.chrom
            .cmp(&other.chrom)
            .then(self.pos.cmp(&other.pos))
            .then(self.strand.cmp(&other.strand))
    }
}

impl PartialOrd for Insertion {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Distinct insertion positions of one transcript, split by side.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Insertions {
    pub sense: BTreeSet<u32>,
    pub anti_sense: BTreeSet<u32>,
}

impl Insertions {
    /// Number of distinct positions on the requested side(s).
    pub fn count(&self, direction: Direction) -> u64 {
        match direction {
            Direction::Sense => self.sense.len() as u64,
            Direction::AntiSense => self.anti_sense.len() as u64,
            Direction::Both => (self.sense.len() + self.anti_sense.len()) as u64,
        }
    }
}

/// Per-transcript read counts for the synthetic lethal pipeline, where
/// every read counts rather than every distinct position.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InsertionCount {
    pub sense: u32,
    pub anti_sense: u32,
}

impl InsertionCount {
    pub fn total(&self) -> u32 {
        self.sense + self.anti_sense
    }
}

/// Sort into canonical order and drop duplicate sites, e.g. after merging
/// the two passes of the external aligner.
pub fn sort_and_dedup(insertions: &mut Vec<Insertion>) {
    insertions.sort();
    insertions.dedup();
}

fn read_legacy(path: &Path) -> Result<Vec<Insertion>, anyhow::Error> {
    let bytes = std::fs::read(path)
        .map_err(|e| anyhow::anyhow!("error reading {:?}: {}", path, e))?;
    if bytes.len() % 8 != 0 {
        anyhow::bail!("legacy insertion file {:?} has a truncated record", path);
    }

    let mut cursor = std::io::Cursor::new(bytes);
    let mut result = Vec::with_capacity(cursor.get_ref().len() / 8);
    while (cursor.position() as usize) < cursor.get_ref().len() {
        let chrom_code = cursor.read_i8()?;
        let strand_byte = cursor.read_u8()?;
        cursor.read_u16::<LittleEndian>()?; // alignment padding
        let pos = cursor.read_u32::<LittleEndian>()?;

        let chrom = Chrom::from_code(chrom_code)
            .ok_or_else(|| anyhow::anyhow!("invalid chromosome code {}", chrom_code))?;
        let strand = Strand::from_char(strand_byte as char)
            .ok_or_else(|| anyhow::anyhow!("invalid strand byte {}", strand_byte))?;
        result.push(Insertion::new(chrom, strand, pos));
    }

    // legacy files were written grouped by strand; queries expect the
    // canonical position order
    result.sort();

    Ok(result)
}

fn write_legacy(path: &Path, insertions: &[Insertion]) -> Result<(), anyhow::Error> {
    let mut bytes = Vec::with_capacity(insertions.len() * 8);
    for ins in insertions {
        bytes.write_i8(ins.chrom.code())?;
        bytes.write_u8(ins.strand.as_char() as u8)?;
        bytes.write_u16::<LittleEndian>(0)?;
        bytes.write_u32::<LittleEndian>(ins.pos)?;
    }
    std::fs::write(path, bytes).map_err(|e| anyhow::anyhow!("error writing {:?}: {}", path, e))
}

fn is_sq(path: &Path) -> bool {
    path.extension().map(|s| s.to_str()) == Some(Some("sq"))
}

/// Read an insertion file, preferring the packed `.sq` representation.
///
/// A path without the `.sq` extension is resolved to its packed sibling if
/// one exists and read as a legacy flat file otherwise.  The result is in
/// canonical `(chrom, pos, strand)` order either way.
pub fn read_insertions<P>(path: P) -> Result<Vec<Insertion>, anyhow::Error>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();

    let (path, compressed) = if is_sq(path) {
        (path.to_path_buf(), true)
    } else {
        let sibling = path.with_file_name(format!(
            "{}.sq",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        ));
        if sibling.exists() {
            (sibling, true)
        } else {
            (path.to_path_buf(), false)
        }
    };

    if !path.exists() {
        return Err(crate::err::Error::MissingResource(format!(
            "insertion file {:?} does not exist",
            path
        ))
        .into());
    }

    if compressed {
        let bytes = std::fs::read(&path)
            .map_err(|e| anyhow::anyhow!("error reading {:?}: {}", path, e))?;
        codec::decode_insertions(&bytes)
    } else {
        read_legacy(&path)
    }
}

/// Sort and write an insertion list; the format follows the extension
/// (`.sq` packed, anything else the legacy flat records).
pub fn write_insertions<P>(path: P, insertions: &mut Vec<Insertion>) -> Result<(), anyhow::Error>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    sort_and_dedup(insertions);

    if is_sq(path) {
        let bytes = codec::encode_insertions(insertions);
        std::fs::write(path, bytes)
            .map_err(|e| anyhow::anyhow!("error writing {:?}: {}", path, e))
    } else {
        write_legacy(path, insertions)
    }
}
