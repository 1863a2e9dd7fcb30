//! Screen worker main executable.

use std::collections::BTreeSet;
use std::io::Write;

use clap::{Args, Parser, Subcommand};
use console::{Emoji, Term};

use screen_worker::analysis::{ip as ip_analysis, sl as sl_analysis};
use screen_worker::cache::{CacheConfig, CacheManager, SelectorParams};
use screen_worker::common::{self, Direction};
use screen_worker::insertions::assign::{assign_insertions, count_insertions};
use screen_worker::screens::{MapParams, ScreenData, ScreenInfo, ScreenType};
use screen_worker::transcripts::{load_transcripts, Mode};

/// CLI parser based on clap.
#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Insertional mutagenesis screen analysis",
    long_about = "This tool maps and analyses genome-wide insertional mutagenesis screens"
)]
struct Cli {
    /// Commonly used arguments
    #[command(flatten)]
    common: common::Args,

    /// The sub command to run
    #[command(subcommand)]
    command: Commands,
}

/// Enum supporting the parsing of top-level commands.
#[derive(Debug, Subcommand)]
enum Commands {
    /// Screen store related commands.
    Screen(Screen),
    /// One-shot analysis commands.
    Analyze(Analyze),
    /// Cached query commands.
    Query(Query),
}

/// Parsing of "screen *" sub commands.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
struct Screen {
    /// The sub command to run
    #[command(subcommand)]
    command: ScreenCommands,
}

/// Enum supporting the parsing of "screen *" sub commands.
#[derive(Debug, Subcommand)]
enum ScreenCommands {
    Create(ScreenCreateArgs),
    AddFile(ScreenAddFileArgs),
    Map(ScreenMapArgs),
    Dump(ScreenChannelArgs),
    Compress(ScreenChannelArgs),
    Delete(ScreenDeleteArgs),
}

/// Parsing of "analyze *" sub commands.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
struct Analyze {
    /// The sub command to run
    #[command(subcommand)]
    command: AnalyzeCommands,
}

/// Enum supporting the parsing of "analyze *" sub commands.
#[derive(Debug, Subcommand)]
enum AnalyzeCommands {
    Ip(AnalyzeIpArgs),
    Sl(AnalyzeSlArgs),
}

/// Parsing of "query *" sub commands.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
struct Query {
    /// The sub command to run
    #[command(subcommand)]
    command: QueryCommands,
}

/// Enum supporting the parsing of "query *" sub commands.
#[derive(Debug, Subcommand)]
enum QueryCommands {
    DataPoints(QueryDataPointsArgs),
    Uniqueness(QueryUniquenessArgs),
    FindGene(QueryFindGeneArgs),
    FindSimilar(QueryFindSimilarArgs),
    FindClusters(QueryFindClustersArgs),
}

/// Command line arguments for `screen create`.
#[derive(Debug, Args)]
#[command(about = "Create a new screen directory", long_about = None)]
struct ScreenCreateArgs {
    /// Directory holding all screens.
    #[arg(long)]
    data_dir: std::path::PathBuf,
    /// Name of the new screen.
    #[arg(long)]
    name: String,
    /// Type of the screen.
    #[arg(long, value_enum)]
    screen_type: ScreenType,
    /// Scientist running the screen.
    #[arg(long, default_value = "")]
    scientist: String,
    /// Cell line the screen was run in.
    #[arg(long, default_value = "")]
    cell_line: String,
    /// Free-form description.
    #[arg(long)]
    description: Option<String>,
    /// Access control groups.
    #[arg(long)]
    group: Vec<String>,
}

/// Command line arguments for `screen add-file`.
#[derive(Debug, Args)]
#[command(about = "Register a raw reads file with a screen", long_about = None)]
struct ScreenAddFileArgs {
    /// Directory holding all screens.
    #[arg(long)]
    data_dir: std::path::PathBuf,
    /// Name of the screen.
    #[arg(long)]
    name: String,
    /// Logical channel name (low/high or replicate-N).
    #[arg(long)]
    channel: String,
    /// The file to register.
    #[arg(long)]
    file: std::path::PathBuf,
}

/// Command line arguments for `screen map`.
#[derive(Debug, Args)]
#[command(about = "Promote aligner output into a packed insertion file", long_about = None)]
struct ScreenMapArgs {
    /// Directory holding all screens.
    #[arg(long)]
    data_dir: std::path::PathBuf,
    /// Name of the screen.
    #[arg(long)]
    name: String,
    /// Logical channel name.
    #[arg(long)]
    channel: String,
    /// Assembly the reads were aligned against.
    #[arg(long)]
    assembly: String,
    /// Read trim length used for the alignment.
    #[arg(long, default_value_t = 50)]
    trim_length: u32,
    /// File with one alignment record per line.
    #[arg(long)]
    alignments: std::path::PathBuf,
    /// Version of the aligner that produced the records.
    #[arg(long, default_value = "")]
    aligner_version: String,
    /// Parameters the aligner ran with.
    #[arg(long, default_value = "")]
    aligner_params: String,
    /// Index the aligner ran against.
    #[arg(long, default_value = "")]
    aligner_index: String,
}

/// Command line arguments for `screen dump` and `screen compress`.
#[derive(Debug, Args)]
#[command(about = "Operate on one mapped channel", long_about = None)]
struct ScreenChannelArgs {
    /// Directory holding all screens.
    #[arg(long)]
    data_dir: std::path::PathBuf,
    /// Name of the screen.
    #[arg(long)]
    name: String,
    /// Logical channel name.
    #[arg(long)]
    channel: String,
    /// Assembly the channel was mapped against.
    #[arg(long)]
    assembly: String,
    /// Read trim length used for the alignment.
    #[arg(long, default_value_t = 50)]
    trim_length: u32,
}

/// Command line arguments for `screen delete`.
#[derive(Debug, Args)]
#[command(about = "Remove a screen and all of its data", long_about = None)]
struct ScreenDeleteArgs {
    /// Directory holding all screens.
    #[arg(long)]
    data_dir: std::path::PathBuf,
    /// Name of the screen.
    #[arg(long)]
    name: String,
}

/// Command line arguments for `analyze ip`.
#[derive(Debug, Args)]
#[command(about = "Analyse a low/high screen from aligner output", long_about = None)]
struct AnalyzeIpArgs {
    /// Reference gene annotation table.
    #[arg(long)]
    reference: std::path::PathBuf,
    /// Aligner output for the low channel.
    #[arg(long)]
    low: std::path::PathBuf,
    /// Aligner output for the high channel.
    #[arg(long)]
    high: std::path::PathBuf,
    /// Transcript reduction mode.
    #[arg(long, value_enum, default_value_t = Mode::Longest)]
    mode: Mode,
    /// Start of the scoring region, cds or tx with optional offset.
    #[arg(long, default_value = "tx")]
    start: String,
    /// End of the scoring region, cds or tx with optional offset.
    #[arg(long, default_value = "tx")]
    end: String,
    /// Keep overlapping regions (both) or cut them away (neither).
    #[arg(long, default_value = "neither")]
    overlap: String,
    /// Which side of a transcript counts.
    #[arg(long, value_enum, default_value_t = Direction::Sense)]
    direction: Direction,
    /// Output file; stdout if absent.
    #[arg(long)]
    output: Option<std::path::PathBuf>,
}

/// Command line arguments for `analyze sl`.
#[derive(Debug, Args)]
#[command(about = "Analyse a synthetic lethal screen against its control", long_about = None)]
struct AnalyzeSlArgs {
    /// Directory holding all screens.
    #[arg(long)]
    data_dir: std::path::PathBuf,
    /// Reference gene annotation table.
    #[arg(long)]
    reference: std::path::PathBuf,
    /// Name of the screen to analyse.
    #[arg(long)]
    screen: String,
    /// Name of the control screen.
    #[arg(long)]
    control: String,
    /// Assembly the channels were mapped against.
    #[arg(long)]
    assembly: String,
    /// Read trim length used for the alignment.
    #[arg(long, default_value_t = 50)]
    trim_length: u32,
    /// Start of the scoring region.
    #[arg(long, default_value = "tx")]
    start: String,
    /// End of the scoring region.
    #[arg(long, default_value = "tx")]
    end: String,
    /// Expected number of genes per normalization group.
    #[arg(long, default_value_t = 200)]
    group_size: u32,
    /// Replicate to print, 1-based.
    #[arg(long, default_value_t = 1)]
    replicate: usize,
    /// Only print genes passing the significance gate.
    #[arg(long)]
    significant: bool,
    /// Output file; stdout if absent.
    #[arg(long)]
    output: Option<std::path::PathBuf>,
}

/// Cache parameters shared by all `query *` sub commands.
#[derive(Debug, Args)]
struct QueryCacheArgs {
    /// Directory holding all screens.
    #[arg(long)]
    data_dir: std::path::PathBuf,
    /// Directory holding one annotation table per assembly.
    #[arg(long)]
    transcripts_dir: std::path::PathBuf,
    /// Name of the SL control screen.
    #[arg(long, default_value = "ControlData-HAP1")]
    control: String,
    /// Optional ranked gene list.
    #[arg(long)]
    rank_table: Option<std::path::PathBuf>,
    /// Type of screens to query.
    #[arg(long, value_enum, default_value_t = ScreenType::Ip)]
    screen_type: ScreenType,
    /// Assembly to use.
    #[arg(long)]
    assembly: String,
    /// Read trim length used for the alignment.
    #[arg(long, default_value_t = 50)]
    trim_length: u32,
    /// Transcript reduction mode.
    #[arg(long, value_enum, default_value_t = Mode::Collapse)]
    mode: Mode,
    /// Keep overlapping regions (both) or cut them away (neither).
    #[arg(long, default_value = "neither")]
    overlap: String,
    /// Start of the scoring region.
    #[arg(long, default_value = "tx")]
    start: String,
    /// End of the scoring region.
    #[arg(long, default_value = "tx")]
    end: String,
    /// Which side of a transcript counts (IP/PA only).
    #[arg(long, value_enum, default_value_t = Direction::Sense)]
    direction: Direction,
}

/// Command line arguments for `query data-points`.
#[derive(Debug, Args)]
#[command(about = "Print the cached data points of one screen", long_about = None)]
struct QueryDataPointsArgs {
    #[command(flatten)]
    cache: QueryCacheArgs,
    /// Screen to project.
    #[arg(long)]
    screen: String,
}

/// Command line arguments for `query uniqueness`.
#[derive(Debug, Args)]
#[command(about = "Score how unique each significant gene is to a screen", long_about = None)]
struct QueryUniquenessArgs {
    #[command(flatten)]
    cache: QueryCacheArgs,
    /// Screen to score.
    #[arg(long)]
    screen: String,
    /// FDR-corrected p-value cutoff.
    #[arg(long, default_value_t = 0.05)]
    pv_cut_off: f32,
    /// Only count screens shifting in the same direction.
    #[arg(long)]
    singlesided: bool,
}

/// Command line arguments for `query find-gene`.
#[derive(Debug, Args)]
#[command(about = "Find a gene across all readable screens", long_about = None)]
struct QueryFindGeneArgs {
    #[command(flatten)]
    cache: QueryCacheArgs,
    /// Gene to look up.
    #[arg(long)]
    gene: String,
    /// Screens the caller may read; all screens if absent.
    #[arg(long)]
    allowed_screen: Vec<String>,
}

/// Command line arguments for `query find-similar`.
#[derive(Debug, Args)]
#[command(about = "Find genes with a profile similar to the query gene", long_about = None)]
struct QueryFindSimilarArgs {
    #[command(flatten)]
    cache: QueryCacheArgs,
    /// Gene to compare against.
    #[arg(long)]
    gene: String,
    /// FDR-corrected p-value cutoff.
    #[arg(long, default_value_t = 0.05)]
    pv_cut_off: f32,
    /// Minimal z-score of the distance.
    #[arg(long, default_value_t = 1.0)]
    zscore_cut_off: f32,
}

/// Command line arguments for `query find-clusters`.
#[derive(Debug, Args)]
#[command(about = "Cluster gene profiles across all screens", long_about = None)]
struct QueryFindClustersArgs {
    #[command(flatten)]
    cache: QueryCacheArgs,
    /// FDR-corrected p-value cutoff.
    #[arg(long, default_value_t = 0.05)]
    pv_cut_off: f32,
    /// Minimal number of neighbours of a cluster core point.
    #[arg(long, default_value_t = 4)]
    min_pts: usize,
    /// Neighbourhood radius in secondary-distance space.
    #[arg(long, default_value_t = 0.5)]
    eps: f32,
    /// Shared-nearest-neighbour list size; 0 uses the primary distance.
    #[arg(long, default_value_t = 10)]
    nns: usize,
}

fn open_output(path: &Option<std::path::PathBuf>) -> Result<Box<dyn Write>, anyhow::Error> {
    match path {
        Some(path) => Ok(Box::new(std::fs::File::create(path)?)),
        None => Ok(Box::new(std::io::stdout())),
    }
}

fn parse_cut_overlap(overlap: &str) -> Result<bool, anyhow::Error> {
    match overlap {
        "both" => Ok(false),
        "neither" => Ok(true),
        _ => anyhow::bail!("overlap must be either 'both' or 'neither', got {:?}", overlap),
    }
}

fn run_screen_create(args: &ScreenCreateArgs) -> Result<(), anyhow::Error> {
    let mut info = ScreenInfo::new(&args.name, args.screen_type);
    info.scientist = args.scientist.clone();
    info.cell_line = args.cell_line.clone();
    info.description = args.description.clone();
    info.groups = args.group.clone();

    ScreenData::create(args.data_dir.join(&args.name), info)?;
    tracing::info!("created screen {}", args.name);
    Ok(())
}

fn run_screen_add_file(args: &ScreenAddFileArgs) -> Result<(), anyhow::Error> {
    let mut screen = ScreenData::load(args.data_dir.join(&args.name))?;
    screen.add_file(&args.channel, &args.file)
}

fn run_screen_map(args: &ScreenMapArgs) -> Result<(), anyhow::Error> {
    let mut screen = ScreenData::load(args.data_dir.join(&args.name))?;
    let alignments = common::io::open_reader(&args.alignments)?;
    screen.map_channel(
        &args.assembly,
        args.trim_length,
        &args.channel,
        alignments,
        &MapParams {
            aligner_version: args.aligner_version.clone(),
            aligner_params: args.aligner_params.clone(),
            aligner_index: args.aligner_index.clone(),
        },
    )?;
    Ok(())
}

fn run_screen_dump(args: &ScreenChannelArgs) -> Result<(), anyhow::Error> {
    let screen = ScreenData::load(args.data_dir.join(&args.name))?;
    screen.dump_channel(
        &args.assembly,
        args.trim_length,
        &args.channel,
        std::io::stdout(),
    )
}

fn run_screen_compress(args: &ScreenChannelArgs) -> Result<(), anyhow::Error> {
    let screen = ScreenData::load(args.data_dir.join(&args.name))?;
    screen.compress_channel(&args.assembly, args.trim_length, &args.channel)
}

fn run_screen_delete(args: &ScreenDeleteArgs) -> Result<(), anyhow::Error> {
    let screen = ScreenData::load(args.data_dir.join(&args.name))?;
    screen.delete()?;
    tracing::info!("deleted screen {}", args.name);
    Ok(())
}

fn run_analyze_ip(args: &AnalyzeIpArgs) -> Result<(), anyhow::Error> {
    let cut_overlap = parse_cut_overlap(&args.overlap)?;
    let transcripts =
        load_transcripts(&args.reference, args.mode, &args.start, &args.end, cut_overlap)?;

    let low = assign_insertions(common::io::open_reader(&args.low)?, &transcripts)?;
    let high = assign_insertions(common::io::open_reader(&args.high)?, &transcripts)?;

    use thousands::Separable;
    for (name, insertions) in [("low", &low), ("high", &high)] {
        let sense: usize = insertions.iter().map(|i| i.sense.len()).sum();
        let anti: usize = insertions.iter().map(|i| i.anti_sense.len()).sum();
        tracing::info!(
            "{}: sense {}, anti sense {}",
            name,
            sense.separate_with_commas(),
            anti.separate_with_commas()
        );
    }

    let points = ip_analysis::analyze(&transcripts, &low, &high, args.direction);

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(csv::QuoteStyle::Never)
        .from_writer(open_output(&args.output)?);
    writer.write_record(["gene", "low", "high", "pv", "fcpv", "log2mi"])?;
    for p in &points {
        writer.write_record([
            p.gene.clone(),
            p.low.to_string(),
            p.high.to_string(),
            p.pv.to_string(),
            p.fcpv.to_string(),
            p.mi.log2().to_string(),
        ])?;
    }
    writer.flush()?;

    Ok(())
}

fn run_analyze_sl(args: &AnalyzeSlArgs) -> Result<(), anyhow::Error> {
    let mut transcripts = load_transcripts(
        &args.reference,
        Mode::LongestExon,
        &args.start,
        &args.end,
        true,
    )?;
    screen_worker::transcripts::filter_out_exons(&mut transcripts);
    transcripts.sort_by(|a, b| a.chrom.cmp(&b.chrom).then(a.start().cmp(&b.start())));

    let screen = ScreenData::load(args.data_dir.join(&args.screen))?;
    let control = ScreenData::load(args.data_dir.join(&args.control))?;

    let control_counts: Vec<Vec<_>> = (1..=sl_analysis::CONTROL_REPLICATES)
        .map(|i| {
            let ins = control.read_channel(
                &args.assembly,
                args.trim_length,
                &format!("replicate-{}", i),
            )?;
            Ok(count_insertions(&ins, &transcripts))
        })
        .collect::<Result<_, anyhow::Error>>()?;

    let replicates: Vec<(String, Vec<_>)> = screen
        .channel_names()
        .into_iter()
        .map(|channel| {
            let ins = screen.read_channel(&args.assembly, args.trim_length, &channel)?;
            Ok((channel, count_insertions(&ins, &transcripts)))
        })
        .collect::<Result<_, anyhow::Error>>()?;

    let options = sl_analysis::SlOptions {
        group_size: args.group_size,
        ..Default::default()
    };
    let result = sl_analysis::analyze(&transcripts, &replicates, &control_counts, &options)?;

    if args.replicate == 0 || args.replicate > result.replicates.len() {
        anyhow::bail!(
            "replicate number {} out of range 1..{}",
            args.replicate,
            result.replicates.len()
        );
    }
    let replicate = &result.replicates[args.replicate - 1];

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(csv::QuoteStyle::Never)
        .from_writer(open_output(&args.output)?);
    writer.write_record([
        "gene",
        "sense",
        "antisense",
        "binom_fdr",
        "sense_normalized",
        "antisense_normalized",
        "pv_control_1",
        "pv_control_2",
        "pv_control_3",
        "pv_control_4",
        "sense_ratio",
    ])?;

    for (ti, dp) in replicate.data.iter().enumerate() {
        if dp.sense + dp.antisense == 0 {
            continue;
        }
        let gene = &transcripts[ti].gene_name;
        if args.significant && !result.significant.contains(gene) {
            continue;
        }

        let sense_ratio = (dp.sense_normalized as f64 + 1.0)
            / ((dp.sense_normalized + dp.antisense_normalized) as f64 + 2.0);
        writer.write_record([
            gene.clone(),
            dp.sense.to_string(),
            dp.antisense.to_string(),
            dp.binom_fdr.to_string(),
            dp.sense_normalized.to_string(),
            dp.antisense_normalized.to_string(),
            dp.ref_pv[0].to_string(),
            dp.ref_pv[1].to_string(),
            dp.ref_pv[2].to_string(),
            dp.ref_pv[3].to_string(),
            sense_ratio.to_string(),
        ])?;
    }
    writer.flush()?;

    Ok(())
}

fn cache_manager(args: &QueryCacheArgs) -> Result<CacheManager, anyhow::Error> {
    CacheManager::new(CacheConfig {
        screen_dir: args.data_dir.clone(),
        transcripts_dir: args.transcripts_dir.clone(),
        control_screen: args.control.clone(),
        rank_table: args.rank_table.clone(),
    })
}

fn selector(args: &QueryCacheArgs) -> Result<SelectorParams, anyhow::Error> {
    Ok(SelectorParams {
        assembly: args.assembly.clone(),
        trim_length: args.trim_length,
        mode: args.mode,
        cut_overlap: parse_cut_overlap(&args.overlap)?,
        start: args.start.clone(),
        end: args.end.clone(),
    })
}

fn print_json<T: serde::Serialize>(values: &[T]) -> Result<(), anyhow::Error> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for value in values {
        serde_json::to_writer(&mut out, value)?;
        out.write_all(b"\n")?;
    }
    Ok(())
}

fn run_query_data_points(args: &QueryDataPointsArgs) -> Result<(), anyhow::Error> {
    let manager = cache_manager(&args.cache)?;
    let selector = selector(&args.cache)?;

    match args.cache.screen_type {
        ScreenType::Sl => {
            let cache = manager.sl_cache(&selector)?;
            print_json(&cache.data_points(&args.screen)?)
        }
        screen_type => {
            let cache = manager.ip_cache(screen_type, &selector, args.cache.direction)?;
            print_json(&cache.data_points(&args.screen))
        }
    }
}

fn run_query_uniqueness(args: &QueryUniquenessArgs) -> Result<(), anyhow::Error> {
    let manager = cache_manager(&args.cache)?;
    let cache = manager.ip_cache(
        args.cache.screen_type,
        &selector(&args.cache)?,
        args.cache.direction,
    )?;
    print_json(&cache.uniqueness(&args.screen, args.pv_cut_off, args.singlesided))
}

fn run_query_find_gene(args: &QueryFindGeneArgs) -> Result<(), anyhow::Error> {
    let manager = cache_manager(&args.cache)?;
    let selector = selector(&args.cache)?;

    match args.cache.screen_type {
        ScreenType::Sl => {
            let cache = manager.sl_cache(&selector)?;
            let allowed = allowed_screens(&args.allowed_screen, &cache.screen_names());
            print_json(&cache.find_gene(&args.gene, &allowed)?)
        }
        screen_type => {
            let cache = manager.ip_cache(screen_type, &selector, args.cache.direction)?;
            let allowed = allowed_screens(&args.allowed_screen, &cache.screen_names());
            print_json(&cache.find_gene(&args.gene, &allowed))
        }
    }
}

fn allowed_screens(requested: &[String], all: &[String]) -> BTreeSet<String> {
    if requested.is_empty() {
        all.iter().cloned().collect()
    } else {
        requested.iter().cloned().collect()
    }
}

fn run_query_find_similar(args: &QueryFindSimilarArgs) -> Result<(), anyhow::Error> {
    let manager = cache_manager(&args.cache)?;
    let cache = manager.ip_cache(
        args.cache.screen_type,
        &selector(&args.cache)?,
        args.cache.direction,
    )?;
    print_json(&cache.find_similar(&args.gene, args.pv_cut_off, args.zscore_cut_off))
}

fn run_query_find_clusters(args: &QueryFindClustersArgs) -> Result<(), anyhow::Error> {
    let manager = cache_manager(&args.cache)?;
    let cache = manager.ip_cache(
        args.cache.screen_type,
        &selector(&args.cache)?,
        args.cache.direction,
    )?;
    print_json(&cache.find_clusters(args.pv_cut_off, args.min_pts, args.eps, args.nns))
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    // Build a tracing subscriber according to the configuration in `cli.common`.
    let collector = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(match cli.common.verbose.log_level() {
            Some(level) => match level {
                log::Level::Error => tracing::Level::ERROR,
                log::Level::Warn => tracing::Level::WARN,
                log::Level::Info => tracing::Level::INFO,
                log::Level::Debug => tracing::Level::DEBUG,
                log::Level::Trace => tracing::Level::TRACE,
            },
            None => tracing::Level::INFO,
        })
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    // Install collector and go into sub commands.
    let term = Term::stderr();
    tracing::subscriber::with_default(collector, || {
        match &cli.command {
            Commands::Screen(screen) => match &screen.command {
                ScreenCommands::Create(args) => run_screen_create(args)?,
                ScreenCommands::AddFile(args) => run_screen_add_file(args)?,
                ScreenCommands::Map(args) => run_screen_map(args)?,
                ScreenCommands::Dump(args) => run_screen_dump(args)?,
                ScreenCommands::Compress(args) => run_screen_compress(args)?,
                ScreenCommands::Delete(args) => run_screen_delete(args)?,
            },
            Commands::Analyze(analyze) => match &analyze.command {
                AnalyzeCommands::Ip(args) => run_analyze_ip(args)?,
                AnalyzeCommands::Sl(args) => run_analyze_sl(args)?,
            },
            Commands::Query(query) => match &query.command {
                QueryCommands::DataPoints(args) => run_query_data_points(args)?,
                QueryCommands::Uniqueness(args) => run_query_uniqueness(args)?,
                QueryCommands::FindGene(args) => run_query_find_gene(args)?,
                QueryCommands::FindSimilar(args) => run_query_find_similar(args)?,
                QueryCommands::FindClusters(args) => run_query_find_clusters(args)?,
            },
        }

        Ok::<(), anyhow::Error>(())
    })?;
    term.write_line(&format!("All done. Have a nice day!{}", Emoji(" 😃", "")))?;

    Ok(())
}
