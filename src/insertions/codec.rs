//! Packed `.sq` representation of a sorted insertion list.
//!
//! Layout: gamma-coded total count, then for every chromosome in fixed
//! order and for each strand (`+` then `-`) one presence bit followed, when
//! set, by a gamma-coded length and the delta-coded ascending positions.
//! The stream is byte-packed MSB-first and endianness-agnostic.

use crate::common::{Chrom, Strand};

use super::bits::{BitReader, BitWriter};
use super::Insertion;

fn write_array(writer: &mut BitWriter, positions: &[u32]) {
    writer.write_gamma(positions.len() as u64);
    let mut prev = 0u64;
    for &pos in positions {
        let pos = pos as u64;
        writer.write_gamma(pos - prev);
        prev = pos;
    }
}

fn read_array(reader: &mut BitReader) -> Result<Vec<u32>, anyhow::Error> {
    let len = reader.read_gamma()? as usize;
    let mut positions = Vec::with_capacity(len);
    let mut prev = 0u64;
    for _ in 0..len {
        prev += reader.read_gamma()?;
        if prev > u32::MAX as u64 {
            anyhow::bail!("position overflow in packed insertion stream");
        }
        positions.push(prev as u32);
    }
    Ok(positions)
}

/// Encode a list sorted in canonical `(chrom, pos, strand)` order.
pub fn encode_insertions(insertions: &[Insertion]) -> Vec<u8> {
    let mut writer = BitWriter::new();
    writer.write_gamma(insertions.len() as u64);

    let mut by_chrom: enum_map::EnumMap<Chrom, (Vec<u32>, Vec<u32>)> =
        enum_map::EnumMap::default();
    for ins in insertions {
        let (plus, minus) = &mut by_chrom[ins.chrom];
        match ins.strand {
            Strand::Plus => plus.push(ins.pos),
            Strand::Minus => minus.push(ins.pos),
        }
    }

    for chrom in Chrom::ALL {
        let (plus, minus) = &by_chrom[chrom];
        for positions in [plus, minus] {
            writer.write_bit(!positions.is_empty());
            if !positions.is_empty() {
                write_array(&mut writer, positions);
            }
        }
    }

    writer.into_bytes()
}

/// Decode a packed stream, merging the per-strand arrays back into the
/// canonical sort order (`+` wins position ties).
pub fn decode_insertions(bytes: &[u8]) -> Result<Vec<Insertion>, anyhow::Error> {
    let mut reader = BitReader::new(bytes);
    let n = reader.read_gamma()? as usize;

    let mut result = Vec::with_capacity(n);

    for chrom in Chrom::ALL {
        let pos_plus = if reader.read_bit()? {
            read_array(&mut reader)?
        } else {
            Vec::new()
        };
        let pos_minus = if reader.read_bit()? {
            read_array(&mut reader)?
        } else {
            Vec::new()
        };

        let (mut pi, mut ni) = (0, 0);
        while pi < pos_plus.len() || ni < pos_minus.len() {
            let take_plus = match (pos_plus.get(pi), pos_minus.get(ni)) {
                (Some(&p), Some(&n)) => p <= n,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if take_plus {
                result.push(Insertion::new(chrom, Strand::Plus, pos_plus[pi]));
                pi += 1;
            } else {
                result.push(Insertion::new(chrom, Strand::Minus, pos_minus[ni]));
                ni += 1;
            }
        }
    }

    if result.len() != n {
        anyhow::bail!(
            "packed insertion stream announces {} sites but contains {}",
            n,
            result.len()
        );
    }

    Ok(result)
}
