//! The IP/PA query cache: a screens-by-transcripts matrix of analysed data
//! points plus the queries that run on it.

use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use indexmap::IndexMap;
use serde::Serialize;

use crate::analysis::ip as ip_analysis;
use crate::common::Direction;
use crate::insertions::assign::assign_insertion_list;
use crate::screens::{screens_of_type, ScreenData, ScreenType};
use crate::transcripts::{load_transcripts, Transcript};

use super::{screens_unchanged, CacheConfig, CachedScreen, SelectorParams};

/// One cache matrix entry, also the 20-byte slab record.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct IpDataEntry {
    pub pv: f32,
    pub fcpv: f32,
    pub mi: f32,
    pub low: u32,
    pub high: u32,
}

pub(crate) const IP_ENTRY_SIZE: u64 = 20;

fn write_entries(mut out: impl Write, entries: &[IpDataEntry]) -> Result<(), anyhow::Error> {
    for e in entries {
        out.write_f32::<LittleEndian>(e.pv)?;
        out.write_f32::<LittleEndian>(e.fcpv)?;
        out.write_f32::<LittleEndian>(e.mi)?;
        out.write_u32::<LittleEndian>(e.low)?;
        out.write_u32::<LittleEndian>(e.high)?;
    }
    Ok(())
}

fn read_entries(mut input: impl Read, entries: &mut [IpDataEntry]) -> Result<(), anyhow::Error> {
    for e in entries.iter_mut() {
        e.pv = input.read_f32::<LittleEndian>()?;
        e.fcpv = input.read_f32::<LittleEndian>()?;
        e.mi = input.read_f32::<LittleEndian>()?;
        e.low = input.read_u32::<LittleEndian>()?;
        e.high = input.read_u32::<LittleEndian>()?;
    }
    Ok(())
}

/// A cached data point as returned to query callers.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct IpCachedDataPoint {
    pub gene: String,
    pub pv: f32,
    pub fcpv: f32,
    pub mi: f32,
    pub low: u32,
    pub high: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<usize>,
}

/// How often a significant gene recurs across the other screens.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct GeneUniqueness {
    pub gene: String,
    pub colour: i32,
    pub count: usize,
}

/// One screen's values for a fixed gene.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct IpGeneFinderPoint {
    pub screen: String,
    pub mi: f32,
    pub fcpv: f32,
    pub insertions: u32,
}

/// A gene with a mutational-index profile close to the query gene.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct SimilarDataPoint {
    pub gene: String,
    pub distance: f32,
    pub zscore: f32,
    /// True when the profile mirrors the query instead of following it.
    pub anti: bool,
}

/// In-memory cache of all IP (or PA) screens for one parameter tuple.
pub struct IpScreenDataCache {
    screen_type: ScreenType,
    selector: SelectorParams,
    direction: Direction,
    screen_dir: PathBuf,
    transcripts: Vec<Transcript>,
    screens: Vec<CachedScreen>,
    /// Row-major screens-by-transcripts matrix.
    data: Vec<IpDataEntry>,
    rank: Arc<IndexMap<String, usize>>,
}

impl IpScreenDataCache {
    /// Build the matrix, reusing size-correct slab files and analysing the
    /// rest.  A screen whose analysis fails keeps a zeroed, unfilled row.
    #[tracing::instrument(skip(config, rank), fields(assembly = %selector.assembly))]
    pub(crate) fn build(
        config: &CacheConfig,
        rank: Arc<IndexMap<String, usize>>,
        screen_type: ScreenType,
        selector: SelectorParams,
        direction: Direction,
    ) -> Result<Self, anyhow::Error> {
        let transcripts = load_transcripts(
            config.annotation_path(&selector.assembly)?,
            selector.mode,
            &selector.start,
            &selector.end,
            selector.cut_overlap,
        )?;
        let n = transcripts.len();

        let infos = screens_of_type(&config.screen_dir, screen_type)?;
        let mut cache = Self {
            screen_type,
            selector,
            direction,
            screen_dir: config.screen_dir.clone(),
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
            data: vec![IpDataEntry::default(); n * infos.len()],
            rank,
        };

        for si in 0..cache.screens.len() {
            match cache.fill_row(si) {
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
            &self.selector.slab_key(Some(self.direction)),
        )
    }

    fn fill_row(&mut self, si: usize) -> Result<(), anyhow::Error> {
        let n = self.transcripts.len();
        let name = self.screens[si].name.clone();
        let screen = ScreenData::load(self.screen_dir.join(&name))?;

        let slab = self.slab_path(&screen);
        let row = &mut self.data[si * n..(si + 1) * n];

        if slab.exists() && std::fs::metadata(&slab)?.len() == n as u64 * IP_ENTRY_SIZE {
            tracing::debug!("reading cache slab {:?}", slab);
            let file = std::fs::File::open(&slab).map(std::io::BufReader::new)?;
            read_entries(file, row)?;
            return Ok(());
        }

        let low = screen.read_channel(&self.selector.assembly, self.selector.trim_length, "low")?;
        let high =
            screen.read_channel(&self.selector.assembly, self.selector.trim_length, "high")?;

        let low = assign_insertion_list(&low, &self.transcripts);
        let high = assign_insertion_list(&high, &self.transcripts);

        let points = ip_analysis::analyze(&self.transcripts, &low, &high, self.direction);
        for (entry, point) in row.iter_mut().zip(points) {
            *entry = IpDataEntry {
                pv: point.pv as f32,
                fcpv: point.fcpv as f32,
                mi: point.mi as f32,
                low: point.low,
                high: point.high,
            };
        }

        let file = std::fs::File::create(&slab).map(std::io::BufWriter::new)?;
        write_entries(file, row)?;

        Ok(())
    }

    pub fn is_for(
        &self,
        screen_type: ScreenType,
        selector: &SelectorParams,
        direction: Direction,
    ) -> bool {
        self.screen_type == screen_type
            && &self.selector == selector
            && self.direction == direction
    }

    /// True while the current screen set of this type matches the one the
    /// cache was built from.
    pub fn is_up_to_date(&self) -> bool {
        screens_unchanged(&self.screen_dir, self.screen_type, &self.screens)
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

    fn row(&self, si: usize) -> &[IpDataEntry] {
        let n = self.transcripts.len();
        &self.data[si * n..(si + 1) * n]
    }

    /// Project one screen's row, dropping genes without any insertions.
    /// An unknown or unfilled screen yields an empty result, not an error.
    pub fn data_points(&self, screen: &str) -> Vec<IpCachedDataPoint> {
        let Some(si) = self.screen_index(screen) else {
            return Vec::new();
        };

        self.row(si)
            .iter()
            .enumerate()
            .filter(|(_, dp)| dp.low != 0 || dp.high != 0)
            .map(|(ti, dp)| {
                let gene = self.transcripts[ti].gene_name.clone();
                let rank = self.rank.get(&gene).copied();
                IpCachedDataPoint {
                    gene,
                    pv: dp.pv,
                    fcpv: dp.fcpv,
                    mi: dp.mi,
                    low: dp.low,
                    high: dp.high,
                    rank,
                }
            })
            .collect()
    }

    /// For each significant gene of `screen`, count the non-ignored screens
    /// that also call it significant and derive the 0..10 colour bucket.
    pub fn uniqueness(
        &self,
        screen: &str,
        pv_cut_off: f32,
        singlesided: bool,
    ) -> Vec<GeneUniqueness> {
        let Some(si) = self.screen_index(screen) else {
            return Vec::new();
        };

        let n = self.transcripts.len();
        let row = self.row(si);

        let screen_count = self.screens.iter().filter(|s| !s.ignore).count();
        let mut min_count = screen_count;
        let mut max_count = 0usize;

        let mut result = Vec::new();
        for (ti, dp) in row.iter().enumerate() {
            if dp.fcpv > pv_cut_off {
                continue;
            }

            let mut gene_count = 0usize;
            for (sj, other) in self.screens.iter().enumerate() {
                if other.ignore {
                    continue;
                }
                let sp = &self.data[sj * n + ti];
                if sp.fcpv > pv_cut_off {
                    continue;
                }
                if singlesided && (dp.mi < 1.0) != (sp.mi < 1.0) {
                    continue;
                }
                gene_count += 1;
            }

            min_count = min_count.min(gene_count);
            max_count = max_count.max(gene_count);

            result.push(GeneUniqueness {
                gene: self.transcripts[ti].gene_name.clone(),
                colour: 0,
                count: gene_count,
            });
        }

        if result.is_empty() {
            return result;
        }

        let r = ((max_count - min_count) as f64).powf(0.001) - 1.0;
        for unique in result.iter_mut() {
            let c = (unique.count - min_count) as f64;
            let cd = c.powf(0.001) - 1.0;
            unique.colour = (10.0 * cd / r).ceil().clamp(0.0, 10.0) as i32;
        }

        result
    }

    /// One row per readable screen with the cached values of `gene`.
    pub fn find_gene(
        &self,
        gene: &str,
        allowed_screens: &BTreeSet<String>,
    ) -> Vec<IpGeneFinderPoint> {
        let n = self.transcripts.len();
        let Some(ti) = self.transcripts.iter().position(|t| t.gene_name == gene) else {
            return Vec::new();
        };

        self.screens
            .iter()
            .enumerate()
            .filter(|(_, s)| s.filled && allowed_screens.contains(&s.name))
            .map(|(si, s)| {
                let dp = &self.data[si * n + ti];
                IpGeneFinderPoint {
                    screen: s.name.clone(),
                    mi: dp.mi,
                    fcpv: dp.fcpv,
                    insertions: dp.low + dp.high,
                }
            })
            .collect()
    }

    fn log2_mi(&self, si: usize, ti: usize) -> f32 {
        let n = self.transcripts.len();
        let mi = self.data[si * n + ti].mi;
        if mi != 0.0 {
            mi.log2()
        } else {
            0.0
        }
    }

    /// Genes whose mutational-index profile across screens is unusually
    /// close to (or mirrors, `anti`) the query gene's.
    pub fn find_similar(
        &self,
        gene: &str,
        _pv_cut_off: f32,
        zscore_cut_off: f32,
    ) -> Vec<SimilarDataPoint> {
        let gene_count = self.transcripts.len();
        let screen_count = self.screens.len();

        let Some(qg_ix) = self.transcripts.iter().position(|t| t.gene_name == gene) else {
            return Vec::new();
        };
        if gene_count < 2 || screen_count == 0 {
            return Vec::new();
        }

        let mut result = Vec::new();

        for anti in [false, true] {
            let mut hits = Vec::with_capacity(gene_count);
            let mut distance_sum = 0.0f64;

            for tg_ix in 0..gene_count {
                let mut sum = 0.0f64;
                for s_ix in 0..screen_count {
                    let mi_q = self.log2_mi(s_ix, tg_ix) as f64;
                    let mi_t = self.log2_mi(s_ix, qg_ix) as f64;
                    let d = if anti { mi_q + mi_t } else { mi_q - mi_t };
                    sum += d * d;
                }

                let d = sum.sqrt();
                hits.push(SimilarDataPoint {
                    gene: self.transcripts[tg_ix].gene_name.clone(),
                    distance: d as f32,
                    zscore: 0.0,
                    anti,
                });
                distance_sum += d;
            }

            let average = distance_sum / gene_count as f64;
            let sum_sq: f64 = hits
                .iter()
                .map(|h| (h.distance as f64 - average) * (h.distance as f64 - average))
                .sum();
            let stddev = (sum_sq / (gene_count - 1) as f64).sqrt();

            for hit in hits.iter_mut() {
                hit.zscore = ((average - hit.distance as f64) / stddev) as f32;
            }

            hits.retain(|hit| {
                (hit.distance as f64) <= average && hit.zscore >= zscore_cut_off
            });
            hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).expect("NaN distance"));

            result.extend(hits);
        }

        result
    }

    /// DBSCAN clusters over the shared-nearest-neighbour distance of the
    /// mutational-index profiles.
    pub fn find_clusters(
        &self,
        _pv_cut_off: f32,
        min_pts: usize,
        eps: f32,
        nns: usize,
    ) -> Vec<super::Cluster> {
        let gene_count = self.transcripts.len();
        let screen_count = self.screens.len();

        // gene-major profile matrix in log2 space
        let mut data = vec![0.0f32; gene_count * screen_count];
        for g_ix in 0..gene_count {
            for s_ix in 0..screen_count {
                data[g_ix * screen_count + s_ix] = self.log2_mi(s_ix, g_ix);
            }
        }

        let gene_names: Vec<String> = self
            .transcripts
            .iter()
            .map(|t| t.gene_name.clone())
            .collect();

        super::cluster::find_clusters(&data, &gene_names, screen_count, min_pts, eps, nns)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn entry_io_round_trip() {
        let entries = vec![
            IpDataEntry {
                pv: 0.25,
                fcpv: 0.5,
                mi: 1.5,
                low: 7,
                high: 11,
            },
            IpDataEntry::default(),
        ];

        let mut bytes = Vec::new();
        write_entries(&mut bytes, &entries).unwrap();
        assert_eq!(IP_ENTRY_SIZE as usize * entries.len(), bytes.len());

        let mut read_back = vec![IpDataEntry::default(); entries.len()];
        read_entries(std::io::Cursor::new(&bytes), &mut read_back).unwrap();
        assert_eq!(entries, read_back);
    }
}
