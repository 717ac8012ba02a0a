use gepris_harvester_lib::analysis::{self, aggregate_institutions, program_stats, Datasets, ProjectAnalyzer};
use gepris_harvester_lib::prepare::ProgramPreparer;
use gepris_harvester_lib::scoring::{ai_taxonomy, wearables_taxonomy, KeywordScorer};
use gepris_harvester_lib::{input_loader, logger};
use gepris_harvester_lib::{
    FileCheckpointStore, HarvestConfig, Harvester, HttpFetcher, JsonDirSink,
};

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "gepris-harvester", about = "Resumable GEPRIS priority-programme harvester", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON config file; missing keys keep their defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides `data_dir` from the config
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enumerate programmes, enrich their details and write the catalogue
    Discover {
        /// Keep programmes starting in or after this year
        #[arg(long)]
        min_start_year: Option<i32>,
        /// Keep every programme regardless of start year
        #[arg(long, conflicts_with = "min_start_year")]
        all_years: bool,
    },
    /// Harvest the projects of every catalogued programme, resuming from the checkpoint
    Harvest {
        /// Only these programme ids, e.g. `--only "SPP 2100"`
        #[arg(long)]
        only: Vec<String>,
    },
    /// Score harvested projects and write the relevance datasets
    Score,
    /// Normalize the catalogue and estimate programme-level relevance
    Prepare,
}

/// Sentinel file that asks a running harvest to stop at the next safe point.
const STOP_FILE: &str = "STOP";

fn watch_stop_file(path: PathBuf, flag: Arc<AtomicBool>) {
    thread::spawn(move || loop {
        if path.exists() {
            warn!("Found {:?}; stopping after the current project.", path);
            flag.store(true, Ordering::SeqCst);
            return;
        }
        thread::sleep(Duration::from_secs(1));
    });
}

fn discover(config: &HarvestConfig, min_start_year: Option<i32>) -> Result<(), Box<dyn Error>> {
    let fetcher = HttpFetcher::new(Duration::from_secs(config.request_timeout_secs))?;
    let store = FileCheckpointStore::new(config.checkpoint_path());
    let sink = JsonDirSink::new(config.projects_dir());
    let mut harvester = Harvester::new(config, fetcher, store, sink)?;

    let programs = harvester.catalogue(min_start_year)?;
    input_loader::save_programs(config.programs_path(), &programs)?;
    info!("Catalogue complete: {} programs", programs.len());
    Ok(())
}

fn harvest(config: &HarvestConfig, only: &[String]) -> Result<(), Box<dyn Error>> {
    let mut programs = input_loader::load_programs(config.programs_path())?;
    if !only.is_empty() {
        programs.retain(|p| only.contains(&p.id));
        info!("Restricted to {} of the requested programs", programs.len());
    }

    let fetcher = HttpFetcher::new(Duration::from_secs(config.request_timeout_secs))?;
    let store = FileCheckpointStore::new(config.checkpoint_path());
    let sink = JsonDirSink::new(config.projects_dir());
    let mut harvester = Harvester::new(config, fetcher, store, sink)?;

    let stop_file = config.data_dir.join(STOP_FILE);
    if stop_file.exists() {
        warn!("Removing stale {:?}", stop_file);
        std::fs::remove_file(&stop_file)?;
    }
    watch_stop_file(stop_file, harvester.interrupt_handle());

    harvester.resume(&programs)?;
    Ok(())
}

fn score(config: &HarvestConfig) -> Result<(), Box<dyn Error>> {
    let harvests = input_loader::load_harvests(config.projects_dir())?;
    let analyzer = ProjectAnalyzer::new(
        KeywordScorer::new(&ai_taxonomy())?,
        KeywordScorer::new(&wearables_taxonomy())?,
    );
    let scored = analyzer.score_all(&harvests);
    let out_dir = config.processed_dir();

    let stats = program_stats(&scored, config.high_threshold);
    analysis::write_json(&out_dir.join("program_relevance.json"), &stats)?;

    let datasets = Datasets::build(scored, config.broad_threshold);
    datasets.write(&out_dir)?;
    info!(
        "Relevant projects: {} topic A, {} topic B, {} both",
        datasets.topic_a.len(),
        datasets.topic_b.len(),
        datasets.combined.len()
    );

    let institutions: Vec<_> = harvests.iter().map(aggregate_institutions).collect();
    analysis::write_json(&config.data_dir.join("spp_institutional_analysis.json"), &institutions)?;
    Ok(())
}

fn prepare(config: &HarvestConfig) -> Result<(), Box<dyn Error>> {
    let programs = input_loader::load_programs(config.programs_path())?;
    let prepared = ProgramPreparer::new()?.prepare(&programs);
    let path = config.data_dir.join("spp_programs_analyzed.json");
    analysis::write_json(&path, &prepared)?;
    info!("Wrote {} programs to {:?}", prepared.len(), path);
    Ok(())
}

fn load_config(path: Option<&Path>, data_dir: Option<PathBuf>) -> Result<HarvestConfig, Box<dyn Error>> {
    let mut config = match path {
        Some(path) => HarvestConfig::load(path)?,
        None => HarvestConfig::default(),
    };
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }
    Ok(config)
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    logger::init(logger::level(cli.verbose));

    let config = load_config(cli.config.as_deref(), cli.data_dir)?;
    info!("Starting GEPRIS harvester (data dir {:?})", config.data_dir);

    match cli.command {
        Command::Discover { min_start_year, all_years } => {
            let year = if all_years { None } else { min_start_year.or(config.min_start_year) };
            discover(&config, year)
        }
        Command::Harvest { only } => harvest(&config, &only),
        Command::Score => score(&config),
        Command::Prepare => prepare(&config),
    }
}
