//! File helpers shared by the annotation and alignment readers.
//!
//! Aligner output and annotation tables routinely arrive gzipped; the
//! helpers here pick plain or gzip IO from the file name so callers never
//! have to care.

use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

use flate2::{bufread::MultiGzDecoder, write::GzEncoder, Compression};

fn is_gzipped(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("gz")
}

/// Open `path` for buffered line reading, decompressing on the fly when
/// the name ends in `.gz`.
pub fn open_reader<P>(path: P) -> Result<Box<dyn BufRead>, anyhow::Error>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let file = BufReader::new(File::open(path)?);

    if is_gzipped(path) {
        tracing::trace!("reading {:?} through a gzip decoder", path);
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        tracing::trace!("reading {:?} as-is", path);
        Ok(Box::new(file))
    }
}

/// Create `path` for writing, compressing when the name ends in `.gz`.
pub fn open_writer<P>(path: P) -> Result<Box<dyn Write>, anyhow::Error>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let file = File::create(path)?;

    if is_gzipped(path) {
        tracing::trace!("writing {:?} through a gzip encoder", path);
        Ok(Box::new(GzEncoder::new(
            BufWriter::new(file),
            Compression::default(),
        )))
    } else {
        tracing::trace!("writing {:?} as-is", path);
        Ok(Box::new(BufWriter::new(file)))
    }
}
