//! The synthetic lethal query cache: per-screen gene summaries plus
//! per-replicate test results, compared against the control screen's row.

use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::path::PathBuf;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;

use crate::analysis::sl::{self as sl_analysis, SlOptions, CONTROL_REPLICATES};
use crate::err::Error;
use crate::insertions::assign::count_insertions;
use crate::insertions::InsertionCount;
use crate::screens::{screens_of_type, ScreenData, ScreenType};
use crate::transcripts::{filter_out_exons, load_transcripts, Transcript};

use super::{screens_unchanged, CacheConfig, CachedScreen, SelectorParams};

/// Gene-level cache entry, the 8-byte slab record.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SlDataEntry {
    pub odds_ratio: f32,
    pub control_binom: f32,
}

/// Replicate-level cache entry, the 28-byte slab record.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SlReplicateEntry {
    pub binom_fdr: f32,
    /// Normalized counts.
    pub sense: u32,
    pub antisense: u32,
    pub pv: [f32; 4],
}

pub(crate) const SL_ENTRY_SIZE: u64 = 8;
pub(crate) const SL_REPLICATE_ENTRY_SIZE: u64 = 28;

fn write_slab(
    mut out: impl Write,
    entries: &[SlDataEntry],
    replicate_entries: &[SlReplicateEntry],
) -> Result<(), anyhow::Error> {
    for e in entries {
        out.write_f32::<LittleEndian>(e.odds_ratio)?;
        out.write_f32::<LittleEndian>(e.control_binom)?;
    }
    for e in replicate_entries {
        out.write_f32::<LittleEndian>(e.binom_fdr)?;
        out.write_u32::<LittleEndian>(e.sense)?;
        out.write_u32::<LittleEndian>(e.antisense)?;
        for pv in e.pv {
            out.write_f32::<LittleEndian>(pv)?;
        }
    }
    Ok(())
}

fn read_slab(
    mut input: impl Read,
    entries: &mut [SlDataEntry],
    replicate_entries: &mut [SlReplicateEntry],
) -> Result<(), anyhow::Error> {
    for e in entries.iter_mut() {
        e.odds_ratio = input.read_f32::<LittleEndian>()?;
        e.control_binom = input.read_f32::<LittleEndian>()?;
    }
    for e in replicate_entries.iter_mut() {
        e.binom_fdr = input.read_f32::<LittleEndian>()?;
        e.sense = input.read_u32::<LittleEndian>()?;
        e.antisense = input.read_u32::<LittleEndian>()?;
        for pv in e.pv.iter_mut() {
            *pv = input.read_f32::<LittleEndian>()?;
        }
    }
    Ok(())
}

/// Replicate values as returned to query callers.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct SlCachedReplicate {
    pub binom_fdr: f32,
    pub ref_pv: [f32; 4],
    pub sense: u32,
    pub antisense: u32,
}

/// A cached SL data point.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct SlCachedDataPoint {
    pub gene: String,
    pub odds_ratio: f32,
    pub sense_ratio: f32,
    pub control_binom: f32,
    pub control_sense_ratio: f32,
    pub consistent: bool,
    pub replicates: Vec<SlCachedReplicate>,
}

/// One screen's values for a fixed gene.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct SlGeneFinderPoint {
    pub screen: String,
    pub sense_ratio: f32,
    pub sense_ratio_per_replicate: Vec<f32>,
    pub consistent: bool,
    pub odds_ratio: f32,
}

/// In-memory cache of all SL screens for one parameter tuple.
pub struct SlScreenDataCache {
    selector: SelectorParams,
    screen_dir: PathBuf,
    control_screen: String,
    transcripts: Vec<Transcript>,
    screens: Vec<CachedScreen>,
    /// Row-major screens-by-transcripts gene entries.
    data: Vec<SlDataEntry>,
    /// Per screen: replicate-major `file_count * N` entries.
    replicate_data: Vec<Vec<SlReplicateEntry>>,
}

impl SlScreenDataCache {
    #[tracing::instrument(skip(config), fields(assembly = %selector.assembly))]
    pub(crate) fn build(
        config: &CacheConfig,
        selector: SelectorParams,
    ) -> Result<Self, anyhow::Error> {
        let mut transcripts = load_transcripts(
            config.annotation_path(&selector.assembly)?,
            selector.mode,
            &selector.start,
            &selector.end,
            selector.cut_overlap,
        )?;

        // the SL pipeline scores only outside of exons; re-sort afterwards
        // since the surviving ranges shift
        filter_out_exons(&mut transcripts);
        transcripts.sort_by(|a, b| a.chrom.cmp(&b.chrom).then(a.start().cmp(&b.start())));

        let n = transcripts.len();

        let control_data = ScreenData::load(config.screen_dir.join(&config.control_screen))
            .map_err(|e| {
                anyhow::anyhow!("control screen {:?}: {}", config.control_screen, e)
            })?;
        let control_counts: Vec<Vec<InsertionCount>> = (1..=CONTROL_REPLICATES)
            .map(|i| {
                let ins = control_data.read_channel(
                    &selector.assembly,
                    selector.trim_length,
                    &format!("replicate-{}", i),
                )?;
                Ok(count_insertions(&ins, &transcripts))
            })
            .collect::<Result<_, anyhow::Error>>()?;

        let infos = screens_of_type(&config.screen_dir, ScreenType::Sl)?;
        let mut cache = Self {
            selector,
            screen_dir: config.screen_dir.clone(),
            control_screen: config.control_screen.clone(),
            transcripts,
            screens: infos
                .iter()
                .map(|info| CachedScreen {
                    name: info.name.clone(),
                    filled: false,
                    ignore: info.ignore,
                    file_count: info.files.len() as u8,
                })
                .collect(),
            data: vec![SlDataEntry::default(); n * infos.len()],
            replicate_data: infos
                .iter()
                .map(|info| vec![SlReplicateEntry::default(); info.files.len() * n])
                .collect(),
        };

        for si in 0..cache.screens.len() {
            match cache.fill_row(si, &control_counts) {
                Ok(()) => cache.screens[si].filled = true,
                Err(e) => {
                    tracing::error!("screen {}: {}", cache.screens[si].name, e);
                }
            }
        }

        Ok(cache)
    }

    fn slab_path(&self, screen: &ScreenData) -> PathBuf {
        screen.cache_slab_path(
            &self.selector.assembly,
            self.selector.trim_length,
            &self.selector.slab_key(None),
        )
    }

    fn fill_row(
        &mut self,
        si: usize,
        control_counts: &[Vec<InsertionCount>],
    ) -> Result<(), anyhow::Error> {
        let n = self.transcripts.len();
        let name = self.screens[si].name.clone();
        let file_count = self.screens[si].file_count as usize;
        let screen = ScreenData::load(self.screen_dir.join(&name))?;

        let slab = self.slab_path(&screen);
        let expected_size =
            n as u64 * SL_ENTRY_SIZE + (n * file_count) as u64 * SL_REPLICATE_ENTRY_SIZE;

        if slab.exists() && std::fs::metadata(&slab)?.len() == expected_size {
            tracing::debug!("reading cache slab {:?}", slab);
            let file = std::fs::File::open(&slab).map(std::io::BufReader::new)?;
            let row = &mut self.data[si * n..(si + 1) * n];
            read_slab(file, row, &mut self.replicate_data[si])?;
            return Ok(());
        }

        let replicates: Vec<(String, Vec<InsertionCount>)> = screen
            .channel_names()
            .into_iter()
            .map(|channel| {
                let ins = screen.read_channel(
                    &self.selector.assembly,
                    self.selector.trim_length,
                    &channel,
                )?;
                Ok((channel, count_insertions(&ins, &self.transcripts)))
            })
            .collect::<Result<_, anyhow::Error>>()?;

        let analysis = sl_analysis::analyze(
            &self.transcripts,
            &replicates,
            control_counts,
            &SlOptions::default(),
        )?;

        let row = &mut self.data[si * n..(si + 1) * n];
        for (ti, gene) in analysis.genes.iter().enumerate() {
            row[ti] = SlDataEntry {
                odds_ratio: gene.odds_ratio as f32,
                control_binom: gene.control_binom as f32,
            };
        }

        for (j, replicate) in analysis.replicates.iter().enumerate() {
            for (ti, dp) in replicate.data.iter().enumerate() {
                self.replicate_data[si][j * n + ti] = SlReplicateEntry {
                    binom_fdr: dp.binom_fdr as f32,
                    sense: dp.sense_normalized,
                    antisense: dp.antisense_normalized,
                    pv: [
                        dp.ref_pv[0] as f32,
                        dp.ref_pv[1] as f32,
                        dp.ref_pv[2] as f32,
                        dp.ref_pv[3] as f32,
                    ],
                };
            }
        }

        let file = std::fs::File::create(&slab).map(std::io::BufWriter::new)?;
        write_slab(file, row, &self.replicate_data[si])?;

        Ok(())
    }

    pub fn is_for(&self, selector: &SelectorParams) -> bool {
        &self.selector == selector
    }

    pub fn is_up_to_date(&self) -> bool {
        screens_unchanged(&self.screen_dir, ScreenType::Sl, &self.screens)
    }

    pub fn contains_screen(&self, name: &str) -> bool {
        self.screens.iter().any(|s| s.name == name)
    }

    pub fn screen_names(&self) -> Vec<String> {
        self.screens.iter().map(|s| s.name.clone()).collect()
    }

    pub fn transcripts(&self) -> &[Transcript] {
        &self.transcripts
    }

    fn screen_index(&self, screen: &str) -> Option<usize> {
        self.screens
            .iter()
            .position(|s| s.name == screen && s.filled)
    }

    fn replicate_entry(&self, si: usize, replicate: usize, ti: usize) -> &SlReplicateEntry {
        let n = self.transcripts.len();
        &self.replicate_data[si][replicate * n + ti]
    }

    fn control_index(&self) -> Result<usize, anyhow::Error> {
        self.screen_index(&self.control_screen)
            .ok_or_else(|| Error::MissingResource("missing control data".to_string()).into())
    }

    fn smoothed(sense: u32, antisense: u32) -> f32 {
        (1.0 + sense as f32) / (2.0 + sense as f32 + antisense as f32)
    }

    /// Classify a gene's replicates against every control replicate; the
    /// gene is consistent when all pairs shift the sense ratio the same
    /// way.
    fn consistency(&self, si: usize, ci: usize, ti: usize, file_count: usize) -> bool {
        #[derive(PartialEq, Clone, Copy)]
        enum Check {
            Undefined,
            Up,
            Down,
        }

        let mut check = Check::Undefined;
        for j in 0..file_count {
            let nc = self.replicate_entry(si, j, ti);
            for k in 0..CONTROL_REPLICATES {
                let ncc = self.replicate_entry(ci, k, ti);
                let up = Self::smoothed(nc.sense, nc.antisense)
                    < Self::smoothed(ncc.sense, ncc.antisense);
                let next = if up { Check::Up } else { Check::Down };
                if check == Check::Undefined {
                    check = next;
                } else if check != next {
                    return false;
                }
            }
        }

        true
    }

    /// Project one screen's row; genes without any insertion in any
    /// replicate are dropped.  An unknown or unfilled screen yields an
    /// empty result; a missing control row is an error.
    pub fn data_points(&self, screen: &str) -> Result<Vec<SlCachedDataPoint>, anyhow::Error> {
        let Some(si) = self.screen_index(screen) else {
            return Ok(Vec::new());
        };
        let ci = self.control_index()?;

        let n = self.transcripts.len();
        let file_count = self.screens[si].file_count as usize;

        let mut result = Vec::new();
        for ti in 0..n {
            let dp = &self.data[si * n + ti];

            let mut replicates = Vec::with_capacity(file_count);
            let mut s_g = 0u64;
            let mut a_g = 0u64;
            for j in 0..file_count {
                let nc = self.replicate_entry(si, j, ti);
                s_g += nc.sense as u64;
                a_g += nc.antisense as u64;
                replicates.push(SlCachedReplicate {
                    binom_fdr: nc.binom_fdr,
                    ref_pv: nc.pv,
                    sense: nc.sense,
                    antisense: nc.antisense,
                });
            }

            if s_g + a_g == 0 {
                continue;
            }

            let mut s_wt = 0u64;
            let mut a_wt = 0u64;
            for k in 0..CONTROL_REPLICATES {
                let ncc = self.replicate_entry(ci, k, ti);
                s_wt += ncc.sense as u64;
                a_wt += ncc.antisense as u64;
            }

            result.push(SlCachedDataPoint {
                gene: self.transcripts[ti].gene_name.clone(),
                odds_ratio: dp.odds_ratio,
                sense_ratio: (1.0 + s_g as f32) / (2.0 + (s_g + a_g) as f32),
                control_binom: dp.control_binom,
                control_sense_ratio: (1.0 + s_wt as f32) / (2.0 + (s_wt + a_wt) as f32),
                consistent: self.consistency(si, ci, ti, file_count),
                replicates,
            });
        }

        Ok(result)
    }

    /// One row per readable screen with the cached values of `gene`.
    pub fn find_gene(
        &self,
        gene: &str,
        allowed_screens: &BTreeSet<String>,
    ) -> Result<Vec<SlGeneFinderPoint>, anyhow::Error> {
        let Some(ti) = self.transcripts.iter().position(|t| t.gene_name == gene) else {
            return Ok(Vec::new());
        };
        let ci = self.control_index()?;

        let n = self.transcripts.len();
        let mut result = Vec::new();

        for (si, screen) in self.screens.iter().enumerate() {
            if !screen.filled || !allowed_screens.contains(&screen.name) {
                continue;
            }

            let file_count = screen.file_count as usize;
            let mut per_replicate = Vec::with_capacity(file_count);
            let mut s_g = 0u64;
            let mut a_g = 0u64;
            for j in 0..file_count {
                let nc = self.replicate_entry(si, j, ti);
                per_replicate.push(Self::smoothed(nc.sense, nc.antisense));
                s_g += nc.sense as u64;
                a_g += nc.antisense as u64;
            }

            result.push(SlGeneFinderPoint {
                screen: screen.name.clone(),
                sense_ratio: (1.0 + s_g as f32) / (2.0 + (s_g + a_g) as f32),
                sense_ratio_per_replicate: per_replicate,
                consistent: self.consistency(si, ci, ti, file_count),
                odds_ratio: self.data[si * n + ti].odds_ratio,
            });
        }

        Ok(result)
    }
}
