//! On-disk screen store: manifest, raw channel files and the per-assembly
//! mapped insertion files.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::common::Chrom;
use crate::err::Error;
use crate::insertions::{self, assign::parse_alignment, Insertion};
use crate::jobs::JobStatus;

/// The kind of experiment a screen records.
#[derive(
    clap::ValueEnum,
    Serialize,
    Deserialize,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ScreenType {
    /// Intracellular phenotype: low against high channel.
    Ip,
    /// Phenotype activation, analysed exactly like IP.
    Pa,
    /// Synthetic lethal: up to four replicates against a control screen.
    Sl,
}

/// A raw input file registered with a screen.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ScreenFile {
    pub name: String,
    pub source: String,
}

/// Bookkeeping for one mapping run of a screen.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct MappedInfo {
    pub assembly: String,
    pub trim_length: u32,
    pub aligner_version: String,
    pub aligner_params: String,
    pub aligner_index: String,
}

fn default_created() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

/// The screen manifest, persisted as `manifest.json`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ScreenInfo {
    pub name: String,
    #[serde(default)]
    pub scientist: String,
    #[serde(rename = "type")]
    pub screen_type: ScreenType,
    #[serde(default)]
    pub cell_line: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub ignore: bool,
    #[serde(default = "default_created")]
    pub created: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub files: Vec<ScreenFile>,
    #[serde(default, rename = "mapped")]
    pub mapped_info: Vec<MappedInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
}

impl ScreenInfo {
    pub fn new(name: &str, screen_type: ScreenType) -> Self {
        Self {
            name: name.to_string(),
            scientist: String::new(),
            screen_type,
            cell_line: String::new(),
            description: None,
            ignore: false,
            created: chrono::Utc::now(),
            groups: Vec::new(),
            files: Vec::new(),
            mapped_info: Vec::new(),
            status: None,
        }
    }
}

/// Aligner metadata recorded when a channel is mapped.
#[derive(Clone, Debug, Default)]
pub struct MapParams {
    pub aligner_version: String,
    pub aligner_params: String,
    pub aligner_index: String,
}

/// Handle on one screen directory.
#[derive(Debug)]
pub struct ScreenData {
    dir: PathBuf,
    info: ScreenInfo,
}

pub const MANIFEST: &str = "manifest.json";

/// Maximum number of replicate channels in an SL screen.
pub const MAX_SL_REPLICATES: usize = 4;

impl ScreenData {
    /// Materialize a new screen directory with its manifest.
    pub fn create<P>(dir: P, info: ScreenInfo) -> Result<Self, anyhow::Error>
    where
        P: AsRef<Path>,
    {
        let dir = dir.as_ref().to_path_buf();
        if dir.exists() {
            anyhow::bail!("screen already exists: {:?}", dir);
        }
        std::fs::create_dir_all(&dir)?;

        let data = Self { dir, info };
        data.write_manifest()?;
        Ok(data)
    }

    /// Load an existing screen.
    pub fn load<P>(dir: P) -> Result<Self, anyhow::Error>
    where
        P: AsRef<Path>,
    {
        let dir = dir.as_ref().to_path_buf();
        let manifest = dir.join(MANIFEST);
        if !manifest.exists() {
            return Err(Error::MissingResource(format!(
                "no manifest file, this is not a valid screen ({:?})",
                dir
            ))
            .into());
        }

        let contents = std::fs::read_to_string(&manifest)?;
        let info: ScreenInfo = serde_json::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("invalid manifest {:?}: {}", manifest, e))?;

        Ok(Self { dir, info })
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn screen_type(&self) -> ScreenType {
        self.info.screen_type
    }

    pub fn info(&self) -> &ScreenInfo {
        &self.info
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Replace the manifest contents.
    pub fn update_info(&mut self, info: ScreenInfo) -> Result<(), anyhow::Error> {
        self.info = info;
        self.write_manifest()
    }

    fn write_manifest(&self) -> Result<(), anyhow::Error> {
        let manifest = self.dir.join(MANIFEST);
        let mut file = std::fs::File::create(&manifest)
            .map_err(|e| anyhow::anyhow!("could not create manifest file {:?}: {}", manifest, e))?;
        file.write_all(serde_json::to_string_pretty(&self.info)?.as_bytes())?;
        Ok(())
    }

    /// Register a raw input file: symlink it under its logical channel name
    /// and record it in the manifest.
    pub fn add_file<P>(&mut self, name: &str, source: P) -> Result<(), anyhow::Error>
    where
        P: AsRef<Path>,
    {
        if self.info.screen_type == ScreenType::Sl && self.info.files.len() >= MAX_SL_REPLICATES {
            anyhow::bail!("screen already contains {} files", MAX_SL_REPLICATES);
        }

        // resolve links so the stored symlink points at the real file
        let source = std::fs::canonicalize(source.as_ref())
            .map_err(|e| anyhow::anyhow!("cannot resolve {:?}: {}", source.as_ref(), e))?;

        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let link_name = match file_name.split_once('.') {
            Some((_, ext)) => format!("{}.{}", name, ext),
            None => name.to_string(),
        };

        #[cfg(unix)]
        std::os::unix::fs::symlink(&source, self.dir.join(&link_name))?;
        #[cfg(not(unix))]
        std::fs::copy(&source, self.dir.join(&link_name))?;

        self.info.files.push(ScreenFile {
            name: name.to_string(),
            source: source.to_string_lossy().into_owned(),
        });

        self.write_manifest()
    }

    /// Logical channel names in manifest order.
    pub fn channel_names(&self) -> Vec<String> {
        self.info.files.iter().map(|f| f.name.clone()).collect()
    }

    fn mapped_dir(&self, assembly: &str, trim_length: u32) -> PathBuf {
        self.dir.join(assembly).join(trim_length.to_string())
    }

    /// Read the packed (or legacy) insertions of one channel.
    pub fn read_channel(
        &self,
        assembly: &str,
        trim_length: u32,
        channel: &str,
    ) -> Result<Vec<Insertion>, anyhow::Error> {
        insertions::read_insertions(self.mapped_dir(assembly, trim_length).join(channel))
    }

    /// Sort and persist the insertions of one channel as a packed file.
    pub fn write_channel(
        &self,
        assembly: &str,
        trim_length: u32,
        channel: &str,
        insertions: &mut Vec<Insertion>,
    ) -> Result<(), anyhow::Error> {
        let dir = self.mapped_dir(assembly, trim_length);
        std::fs::create_dir_all(&dir)?;
        insertions::write_insertions(dir.join(format!("{}.sq", channel)), insertions)
    }

    /// Promote a channel from a stream of aligner records into a packed
    /// insertion file, record the mapping in the manifest and drop any
    /// cache slabs for this assembly/trim combination.
    ///
    /// Returns the number of unique insertion sites.
    #[tracing::instrument(skip(self, alignments, params))]
    pub fn map_channel(
        &mut self,
        assembly: &str,
        trim_length: u32,
        channel: &str,
        alignments: impl std::io::BufRead,
        params: &MapParams,
    ) -> Result<usize, anyhow::Error> {
        let mut hits = Vec::new();
        for line in alignments.lines() {
            let line = line?;
            if let Some(hit) = parse_alignment(&line)? {
                hits.push(hit);
            }
        }
        insertions::sort_and_dedup(&mut hits);

        use thousands::Separable;
        tracing::info!(
            "unique hits in {} channel: {}",
            channel,
            hits.len().separate_with_commas()
        );

        self.write_channel(assembly, trim_length, channel, &mut hits)?;
        self.remove_cache_slabs(assembly, trim_length)?;

        let entry = self
            .info
            .mapped_info
            .iter_mut()
            .find(|mi| mi.assembly == assembly && mi.trim_length == trim_length);
        match entry {
            Some(mi) => {
                mi.aligner_version = params.aligner_version.clone();
                mi.aligner_params = params.aligner_params.clone();
                mi.aligner_index = params.aligner_index.clone();
            }
            None => self.info.mapped_info.push(MappedInfo {
                assembly: assembly.to_string(),
                trim_length,
                aligner_version: params.aligner_version.clone(),
                aligner_params: params.aligner_params.clone(),
                aligner_index: params.aligner_index.clone(),
            }),
        }
        self.write_manifest()?;

        Ok(hits.len())
    }

    /// Remove the persisted cache slabs for one assembly/trim combination;
    /// they are stale once the channel data changes.
    pub fn remove_cache_slabs(
        &self,
        assembly: &str,
        trim_length: u32,
    ) -> Result<(), anyhow::Error> {
        let dir = self.mapped_dir(assembly, trim_length);
        if !dir.exists() {
            return Ok(());
        }
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry
                .file_name()
                .to_string_lossy()
                .starts_with("cache-")
            {
                tracing::debug!("removing stale cache slab {:?}", entry.path());
                std::fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    /// Path of the cache slab for one parameter key, used by the query
    /// cache.
    pub fn cache_slab_path(&self, assembly: &str, trim_length: u32, key: &str) -> PathBuf {
        self.mapped_dir(assembly, trim_length).join(key)
    }

    /// Dump a channel as tab separated `chrom strand pos` text.
    pub fn dump_channel(
        &self,
        assembly: &str,
        trim_length: u32,
        channel: &str,
        mut out: impl Write,
    ) -> Result<(), anyhow::Error> {
        for ins in self.read_channel(assembly, trim_length, channel)? {
            writeln!(out, "{}\t{}\t{}", ins.chrom, ins.strand, ins.pos)?;
        }
        Ok(())
    }

    /// Re-encode a legacy flat channel file into the packed representation.
    pub fn compress_channel(
        &self,
        assembly: &str,
        trim_length: u32,
        channel: &str,
    ) -> Result<(), anyhow::Error> {
        let dir = self.mapped_dir(assembly, trim_length);
        let legacy = dir.join(channel);
        if !legacy.exists() {
            return Err(Error::MissingResource(format!(
                "file does not exist: {:?}",
                legacy
            ))
            .into());
        }

        let mut ins = insertions::read_insertions(&legacy)?;
        insertions::write_insertions(dir.join(format!("{}.sq", channel)), &mut ins)
    }

    /// The `+` and `-` strand positions of one channel restricted to a
    /// genomic window, for browser views.
    pub fn insertions_in_window(
        &self,
        assembly: &str,
        trim_length: u32,
        channel: &str,
        chrom: Chrom,
        start: u32,
        end: u32,
    ) -> Result<(Vec<u32>, Vec<u32>), anyhow::Error> {
        let mut plus = Vec::new();
        let mut minus = Vec::new();

        for ins in self.read_channel(assembly, trim_length, channel)? {
            if ins.chrom == chrom && ins.pos >= start && ins.pos < end {
                match ins.strand {
                    crate::common::Strand::Plus => plus.push(ins.pos),
                    crate::common::Strand::Minus => minus.push(ins.pos),
                }
            }
        }

        Ok((plus, minus))
    }

    /// Remove the entire screen directory.
    pub fn delete(self) -> Result<(), anyhow::Error> {
        std::fs::remove_dir_all(&self.dir)?;
        Ok(())
    }
}

/// All screens found in a data directory, in directory order.
pub fn list_screens<P>(data_dir: P) -> Result<Vec<ScreenInfo>, anyhow::Error>
where
    P: AsRef<Path>,
{
    let mut result = Vec::new();
    for entry in std::fs::read_dir(data_dir.as_ref())? {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        match ScreenData::load(entry.path()) {
            Ok(screen) => result.push(screen.info.clone()),
            Err(e) => tracing::debug!("skipping {:?}: {}", entry.path(), e),
        }
    }
    result.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(result)
}

/// All screens of one type, the ordered base set of a query cache.
pub fn screens_of_type<P>(data_dir: P, screen_type: ScreenType) -> Result<Vec<ScreenInfo>, anyhow::Error>
where
    P: AsRef<Path>,
{
    Ok(list_screens(data_dir)?
        .into_iter()
        .filter(|info| info.screen_type == screen_type)
        .collect())
}
