//! Persistent, versioned query cache over analysed screens.
//!
//! A cache holds one dense screens-by-transcripts matrix for a parameter
//! tuple; rows are persisted per screen as slab files next to the packed
//! insertion data and reloaded when size-correct.  The manager serializes
//! creation and invalidation under one lock; readers share `Arc`s and run
//! their queries without further locking.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;

use crate::common::Direction;
use crate::err::Error;
use crate::screens::{screens_of_type, ScreenType};
use crate::transcripts::Mode;

pub mod cluster;
pub mod ip;
pub mod sl;

pub use cluster::Cluster;
pub use ip::IpScreenDataCache;
pub use sl::SlScreenDataCache;

/// Transcript selector parameters, the shared part of every cache key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectorParams {
    pub assembly: String,
    pub trim_length: u32,
    pub mode: Mode,
    pub cut_overlap: bool,
    pub start: String,
    pub end: String,
}

impl SelectorParams {
    /// Base name of the per-screen slab file for this key.
    pub fn slab_key(&self, direction: Option<Direction>) -> String {
        let mut key = format!(
            "cache-{}-{}-{}-{}",
            self.mode,
            if self.cut_overlap { "cut" } else { "no-cut" },
            self.start,
            self.end
        );
        if let Some(direction) = direction {
            key.push('-');
            key.push_str(&direction.to_string());
        }
        key
    }
}

/// Per-screen bookkeeping inside a cache.
#[derive(Clone, Debug, Default)]
pub(crate) struct CachedScreen {
    pub name: String,
    /// False when the analysis failed; queries skip this row.
    pub filled: bool,
    pub ignore: bool,
    /// Number of replicate channels (SL only).
    pub file_count: u8,
}

/// Compare the captured screen-name set against the current one.
pub(crate) fn screens_unchanged(
    screen_dir: &Path,
    screen_type: ScreenType,
    cached: &[CachedScreen],
) -> bool {
    let current = match screens_of_type(screen_dir, screen_type) {
        Ok(screens) => screens,
        Err(_) => return false,
    };

    let mut current: std::collections::BTreeSet<String> =
        current.into_iter().map(|info| info.name).collect();

    for screen in cached {
        if !current.remove(&screen.name) {
            return false;
        }
    }

    current.is_empty()
}

/// Everything a cache build needs to find its inputs.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Directory holding one subdirectory per screen.
    pub screen_dir: PathBuf,
    /// Directory holding one annotation table per assembly
    /// (`<assembly>.txt`, optionally gzipped).
    pub transcripts_dir: PathBuf,
    /// Name of the SL control screen.
    pub control_screen: String,
    /// Optional ranked gene list attached to IP data points.
    pub rank_table: Option<PathBuf>,
}

impl CacheConfig {
    pub fn annotation_path(&self, assembly: &str) -> Result<PathBuf, anyhow::Error> {
        for candidate in [
            self.transcripts_dir.join(format!("{}.txt", assembly)),
            self.transcripts_dir.join(format!("{}.txt.gz", assembly)),
        ] {
            if candidate.exists() {
                return Ok(candidate);
            }
        }
        Err(Error::MissingResource(format!(
            "no annotation table for assembly {:?} in {:?}",
            assembly, self.transcripts_dir
        ))
        .into())
    }
}

fn load_rank_table(path: &Path) -> Result<IndexMap<String, usize>, anyhow::Error> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("error reading rank table {:?}: {}", path, e))?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(rank, gene)| (gene.to_string(), rank))
        .collect())
}

/// Owner of all live caches.
pub struct CacheManager {
    config: CacheConfig,
    rank: Arc<IndexMap<String, usize>>,
    ip_caches: Mutex<Vec<Arc<IpScreenDataCache>>>,
    sl_caches: Mutex<Vec<Arc<SlScreenDataCache>>>,
}

impl CacheManager {
    pub fn new(config: CacheConfig) -> Result<Self, anyhow::Error> {
        let rank = match &config.rank_table {
            Some(path) => Arc::new(load_rank_table(path)?),
            None => Arc::new(IndexMap::new()),
        };

        Ok(Self {
            config,
            rank,
            ip_caches: Mutex::new(Vec::new()),
            sl_caches: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Fetch or build the IP/PA cache for a parameter tuple.
    pub fn ip_cache(
        &self,
        screen_type: ScreenType,
        selector: &SelectorParams,
        direction: Direction,
    ) -> Result<Arc<IpScreenDataCache>, anyhow::Error> {
        if screen_type == ScreenType::Sl {
            return Err(Error::InvalidInput(
                "SL screens are cached by sl_cache".to_string(),
            )
            .into());
        }

        let mut caches = self.ip_caches.lock().expect("poisoned");

        if let Some(at) = caches
            .iter()
            .position(|c| c.is_for(screen_type, selector, direction))
        {
            if caches[at].is_up_to_date() {
                return Ok(Arc::clone(&caches[at]));
            }
            caches.remove(at);
        }

        let cache = Arc::new(IpScreenDataCache::build(
            &self.config,
            Arc::clone(&self.rank),
            screen_type,
            selector.clone(),
            direction,
        )?);
        caches.push(Arc::clone(&cache));
        Ok(cache)
    }

    /// Fetch or build the SL cache for a parameter tuple.
    pub fn sl_cache(
        &self,
        selector: &SelectorParams,
    ) -> Result<Arc<SlScreenDataCache>, anyhow::Error> {
        let mut caches = self.sl_caches.lock().expect("poisoned");

        if let Some(at) = caches.iter().position(|c| c.is_for(selector)) {
            if caches[at].is_up_to_date() {
                return Ok(Arc::clone(&caches[at]));
            }
            caches.remove(at);
        }

        let cache = Arc::new(SlScreenDataCache::build(&self.config, selector.clone())?);
        caches.push(Arc::clone(&cache));
        Ok(cache)
    }

    /// Drop every cache whose screen set contains `name`; called after a
    /// screen has been (re)mapped or deleted.
    pub fn screen_mapped(&self, name: &str) {
        self.ip_caches
            .lock()
            .expect("poisoned")
            .retain(|cache| !cache.contains_screen(name));
        self.sl_caches
            .lock()
            .expect("poisoned")
            .retain(|cache| !cache.contains_screen(name));
    }

    #[cfg(test)]
    pub(crate) fn live_cache_count(&self) -> usize {
        self.ip_caches.lock().expect("poisoned").len()
            + self.sl_caches.lock().expect("poisoned").len()
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn slab_key_formats() {
        let selector = SelectorParams {
            assembly: "hg38".to_string(),
            trim_length: 50,
            mode: Mode::Collapse,
            cut_overlap: true,
            start: "tx".to_string(),
            end: "cds+100".to_string(),
        };
        assert_eq!(
            "cache-collapse-cut-tx-cds+100-sense",
            selector.slab_key(Some(Direction::Sense))
        );
        assert_eq!("cache-collapse-cut-tx-cds+100", selector.slab_key(None));

        let no_cut = SelectorParams {
            cut_overlap: false,
            ..selector
        };
        assert_eq!(
            "cache-collapse-no-cut-tx-cds+100-both",
            no_cut.slab_key(Some(Direction::Both))
        );
    }

    #[test]
    fn rank_table_orders_by_line() {
        let tmp_dir = temp_testdir::TempDir::default();
        let path = tmp_dir.join("ranked.txt");
        std::fs::write(&path, "TP53\nPTEN\n\nKRAS\n").unwrap();

        let table = load_rank_table(&path).unwrap();
        assert_eq!(Some(&0), table.get("TP53"));
        assert_eq!(Some(&1), table.get("PTEN"));
        assert_eq!(Some(&2), table.get("KRAS"));
        assert_eq!(None, table.get("MYC"));
    }

    mod end_to_end {
        use std::path::Path;

        use pretty_assertions::assert_eq;

        use crate::common::Direction;
        use crate::screens::{MapParams, ScreenData, ScreenInfo, ScreenType};
        use crate::transcripts::Mode;

        use super::super::*;

        const ANNOTATION: &str = "\
name\tchrom\tstrand\ttxStart\ttxEnd\tcdsStart\tcdsEnd\texonCount\texonStarts\texonEnds\tscore\tname2\tcdsStartStat\tcdsEndStat\texonFrames
A-001\tchr1\t+\t1000\t2000\t1000\t2000\t1\t1000,\t1100,\t0\tGENEA\tcmpl\tcmpl\t0,
B-001\tchr1\t+\t5000\t6000\t5000\t6000\t1\t5000,\t5100,\t0\tGENEB\tcmpl\tcmpl\t0,
C-001\tchr1\t+\t9000\t10000\t9000\t10000\t1\t9000,\t9100,\t0\tGENEC\tcmpl\tcmpl\t0,
";

        fn alignment_lines(positions: &[(u32, char)]) -> String {
            positions
                .iter()
                .enumerate()
                .map(|(i, (pos, strand))| format!("r{}\t{}\tchr1\t{}\n", i, strand, pos))
                .collect()
        }

        fn map_channel(screen: &mut ScreenData, channel: &str, positions: &[(u32, char)]) {
            screen
                .map_channel(
                    "hg38",
                    50,
                    channel,
                    std::io::Cursor::new(alignment_lines(positions)),
                    &MapParams::default(),
                )
                .unwrap();
        }

        fn spread(base: u32, n: u32) -> Vec<(u32, char)> {
            (0..n).map(|i| (base + i * 3, '+')).collect()
        }

        fn build_world(root: &Path) -> CacheConfig {
            let screen_dir = root.join("screens");
            let transcripts_dir = root.join("transcripts");
            std::fs::create_dir_all(&screen_dir).unwrap();
            std::fs::create_dir_all(&transcripts_dir).unwrap();
            std::fs::write(transcripts_dir.join("hg38.txt"), ANNOTATION).unwrap();

            // two IP screens; GENEA is depleted in high in ip-1 only
            let mut ip1 = ScreenData::create(
                screen_dir.join("ip-1"),
                ScreenInfo::new("ip-1", ScreenType::Ip),
            )
            .unwrap();
            let mut low = spread(1200, 40);
            low.extend(spread(5200, 30));
            low.extend(spread(9200, 30));
            map_channel(&mut ip1, "low", &low);
            let mut high = spread(5200, 30);
            high.extend(spread(9200, 30));
            map_channel(&mut ip1, "high", &high);

            let mut ip2 = ScreenData::create(
                screen_dir.join("ip-2"),
                ScreenInfo::new("ip-2", ScreenType::Ip),
            )
            .unwrap();
            let mut both = spread(1200, 30);
            both.extend(spread(5200, 30));
            both.extend(spread(9200, 30));
            map_channel(&mut ip2, "low", &both);
            map_channel(&mut ip2, "high", &both);

            // SL control with four replicates plus one screen with two,
            // where GENEB loses its sense insertions
            let mut control = ScreenData::create(
                screen_dir.join("control"),
                ScreenInfo::new("control", ScreenType::Sl),
            )
            .unwrap();
            for i in 1..=4 {
                let src = root.join(format!("c{}.fastq", i));
                std::fs::write(&src, b"@r\nACGT\n+\nIIII\n").unwrap();
                control.add_file(&format!("replicate-{}", i), &src).unwrap();
                let mut reads: Vec<(u32, char)> = (0..30)
                    .flat_map(|k| [(1200 + k, '+'), (1200 + k, '-')])
                    .collect();
                reads.extend((0..30).flat_map(|k| [(5200 + k, '+'), (5200 + k, '-')]));
                map_channel(&mut control, &format!("replicate-{}", i), &reads);
            }

            let mut sl1 = ScreenData::create(
                screen_dir.join("sl-1"),
                ScreenInfo::new("sl-1", ScreenType::Sl),
            )
            .unwrap();
            for i in 1..=2 {
                let src = root.join(format!("s{}.fastq", i));
                std::fs::write(&src, b"@r\nACGT\n+\nIIII\n").unwrap();
                sl1.add_file(&format!("replicate-{}", i), &src).unwrap();
                let mut reads: Vec<(u32, char)> = (0..30)
                    .flat_map(|k| [(1200 + k, '+'), (1200 + k, '-')])
                    .collect();
                reads.extend((0..60).map(|k| (5200 + k, '-')));
                map_channel(&mut sl1, &format!("replicate-{}", i), &reads);
            }

            CacheConfig {
                screen_dir,
                transcripts_dir,
                control_screen: "control".to_string(),
                rank_table: None,
            }
        }

        fn ip_selector() -> SelectorParams {
            SelectorParams {
                assembly: "hg38".to_string(),
                trim_length: 50,
                mode: Mode::Longest,
                cut_overlap: true,
                start: "tx".to_string(),
                end: "tx".to_string(),
            }
        }

        fn sl_selector() -> SelectorParams {
            SelectorParams {
                assembly: "hg38".to_string(),
                trim_length: 50,
                mode: Mode::LongestExon,
                cut_overlap: true,
                start: "tx".to_string(),
                end: "tx".to_string(),
            }
        }

        #[test]
        fn ip_cache_builds_and_queries() {
            let tmp_dir = temp_testdir::TempDir::default();
            let config = build_world(&tmp_dir);
            let manager = CacheManager::new(config).unwrap();

            let cache = manager
                .ip_cache(ScreenType::Ip, &ip_selector(), Direction::Both)
                .unwrap();
            assert!(cache.is_up_to_date());
            assert_eq!(
                vec!["ip-1".to_string(), "ip-2".to_string()],
                cache.screen_names()
            );

            let points = cache.data_points("ip-1");
            assert_eq!(3, points.len());
            let gene_a = points.iter().find(|p| p.gene == "GENEA").unwrap();
            assert_eq!(40, gene_a.low);
            assert_eq!(0, gene_a.high);
            assert!(gene_a.mi < 1.0);
            assert!(gene_a.pv < 0.05);

            // unknown screens yield empty results, not errors
            assert!(cache.data_points("no-such-screen").is_empty());

            let allowed: std::collections::BTreeSet<String> =
                ["ip-1".to_string(), "ip-2".to_string()].into_iter().collect();
            let found = cache.find_gene("GENEA", &allowed);
            assert_eq!(2, found.len());
            assert_eq!("ip-1", found[0].screen);
            assert_eq!(40, found[0].insertions);

            let similar = cache.find_similar("GENEB", 1.0, 0.0);
            assert!(similar.iter().any(|s| s.gene == "GENEC" && !s.anti));
        }

        #[test]
        fn ip_cache_slabs_are_reused() {
            let tmp_dir = temp_testdir::TempDir::default();
            let config = build_world(&tmp_dir);

            let first = {
                let manager = CacheManager::new(config.clone()).unwrap();
                let cache = manager
                    .ip_cache(ScreenType::Ip, &ip_selector(), Direction::Both)
                    .unwrap();
                cache.data_points("ip-1")
            };

            let slab = config
                .screen_dir
                .join("ip-1")
                .join("hg38")
                .join("50")
                .join(ip_selector().slab_key(Some(Direction::Both)));
            assert!(slab.exists());

            // a fresh manager reloads the persisted rows
            let manager = CacheManager::new(config).unwrap();
            let cache = manager
                .ip_cache(ScreenType::Ip, &ip_selector(), Direction::Both)
                .unwrap();
            assert_eq!(first, cache.data_points("ip-1"));
        }

        #[test]
        fn cache_is_invalidated_by_mapping_and_new_screens() {
            let tmp_dir = temp_testdir::TempDir::default();
            let config = build_world(&tmp_dir);
            let manager = CacheManager::new(config.clone()).unwrap();

            let cache = manager
                .ip_cache(ScreenType::Ip, &ip_selector(), Direction::Both)
                .unwrap();
            assert_eq!(1, manager.live_cache_count());

            manager.screen_mapped("ip-1");
            assert_eq!(0, manager.live_cache_count());

            // a new screen of the same type makes the captured set stale
            assert!(cache.is_up_to_date());
            ScreenData::create(
                config.screen_dir.join("ip-3"),
                ScreenInfo::new("ip-3", ScreenType::Ip),
            )
            .unwrap();
            assert!(!cache.is_up_to_date());
        }

        #[test]
        fn sl_cache_builds_and_queries() {
            let tmp_dir = temp_testdir::TempDir::default();
            let config = build_world(&tmp_dir);
            let manager = CacheManager::new(config).unwrap();

            let cache = manager.sl_cache(&sl_selector()).unwrap();
            assert!(cache.is_up_to_date());
            assert!(cache.contains_screen("control"));
            assert!(cache.contains_screen("sl-1"));

            let points = cache.data_points("sl-1").unwrap();
            // GENEC has no SL insertions at all and is dropped
            assert_eq!(2, points.len());

            let gene_b = points.iter().find(|p| p.gene == "GENEB").unwrap();
            assert_eq!(2, gene_b.replicates.len());
            // all insertions antisense: the sense ratio collapses
            assert!(gene_b.sense_ratio < 0.1, "{:?}", gene_b);
            assert!(gene_b.consistent);
            assert!(gene_b.odds_ratio > 1.0);

            let gene_a = points.iter().find(|p| p.gene == "GENEA").unwrap();
            assert!((gene_a.sense_ratio - 0.5).abs() < 0.05, "{:?}", gene_a);

            let allowed: std::collections::BTreeSet<String> =
                ["sl-1".to_string(), "control".to_string()].into_iter().collect();
            let found = cache.find_gene("GENEB", &allowed).unwrap();
            assert_eq!(2, found.len());
            let sl1 = found.iter().find(|p| p.screen == "sl-1").unwrap();
            assert_eq!(2, sl1.sense_ratio_per_replicate.len());
            assert!(sl1.sense_ratio < 0.1);
        }
    }
}
