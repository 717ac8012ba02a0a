//! Checkpointed, sequential harvest of every programme's projects.
//!
//! Per programme the orchestrator walks
//! `Pending -> InDiscovery -> InExtraction -> Done`, or ends in `Failed`.
//! A programme is marked done only after its output file is written, and the
//! checkpoint is saved after every programme, so the last saved checkpoint is
//! always a valid resume point.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::config::HarvestConfig;
use crate::delay_manager::PacingPolicy;
use crate::discovery::{filter_recent, RecordDiscoverer};
use crate::error::{HarvestError, Result};
use crate::extractor::Extractor;
use crate::fetcher::PageFetcher;
use crate::models::{Program, ProgramHarvest};
use crate::resume_manager::{write_atomically, CheckpointState, CheckpointStore};

/// Destination for per-programme output.
pub trait RecordSink {
    /// Replaces any earlier output for the same programme.
    fn write(&mut self, harvest: &ProgramHarvest) -> Result<()>;
}

/// One pretty-printed JSON file per programme, e.g. `projects/SPP_2100.json`.
pub struct JsonDirSink {
    dir: PathBuf,
}

impl JsonDirSink {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        JsonDirSink { dir: dir.into() }
    }

    pub fn path_for(&self, entity_id: &str) -> PathBuf {
        let stem = Program::new(entity_id, "", "").file_stem();
        self.dir.join(format!("{}.json", stem))
    }
}

impl RecordSink for JsonDirSink {
    fn write(&mut self, harvest: &ProgramHarvest) -> Result<()> {
        let path = self.path_for(&harvest.entity_id);
        let temp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(harvest)?;
        write_atomically(&path, &temp, json.as_bytes())?;
        info!("Saved {} projects to {:?}", harvest.children_count, path);
        Ok(())
    }
}

/// Keeps outputs in memory, keyed by programme id.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub records: BTreeMap<String, ProgramHarvest>,
    pub writes: usize,
}

impl RecordSink for MemorySink {
    fn write(&mut self, harvest: &ProgramHarvest) -> Result<()> {
        self.records.insert(harvest.entity_id.clone(), harvest.clone());
        self.writes += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityPhase {
    Pending,
    InDiscovery,
    InExtraction,
    Done,
    Failed,
}

impl fmt::Display for EntityPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityPhase::Pending => "pending",
            EntityPhase::InDiscovery => "in_discovery",
            EntityPhase::InExtraction => "in_extraction",
            EntityPhase::Done => "done",
            EntityPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What one run achieved.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct HarvestReport {
    pub total: usize,
    pub skipped: usize,
    pub done: Vec<String>,
    pub failed: Vec<String>,
    pub children: usize,
    pub child_errors: usize,
    pub interrupted: bool,
}

impl HarvestReport {
    pub fn log_summary(&self) {
        info!("{}", "=".repeat(70));
        info!(
            "Harvest finished: {} done, {} skipped (already completed), {} failed of {} programs",
            self.done.len(),
            self.skipped,
            self.failed.len(),
            self.total
        );
        info!(
            "Projects collected this run: {} ({} with errors)",
            self.children, self.child_errors
        );
        if !self.failed.is_empty() {
            warn!("Failed programs (re-run to retry): {}", self.failed.join(", "));
        }
        if self.interrupted {
            warn!("Interrupted; resume by running the harvest again.");
        }
        info!("{}", "=".repeat(70));
    }
}

pub struct Harvester<F: PageFetcher, S: CheckpointStore, W: RecordSink> {
    fetcher: F,
    store: S,
    sink: W,
    discoverer: RecordDiscoverer,
    extractor: Extractor,
    pacing: PacingPolicy,
    interrupt: Arc<AtomicBool>,
}

impl<F: PageFetcher, S: CheckpointStore, W: RecordSink> Harvester<F, S, W> {
    pub fn new(config: &HarvestConfig, fetcher: F, store: S, sink: W) -> Result<Self> {
        let interrupt = Arc::new(AtomicBool::new(false));
        let discoverer = RecordDiscoverer::new(config)?.with_interrupt(Arc::clone(&interrupt));
        let extractor = Extractor::new(discoverer.base_url().clone(), config.min_paragraph_chars);
        Ok(Harvester {
            fetcher,
            store,
            sink,
            discoverer,
            extractor,
            pacing: config.pacing(),
            interrupt,
        })
    }

    /// Replaces the pacing of both the harvest loop and discovery.
    pub fn with_pacing(mut self, pacing: PacingPolicy) -> Self {
        self.discoverer = self.discoverer.with_pacing(pacing.clone());
        self.pacing = pacing;
        self
    }

    /// Setting the returned flag stops the run at the next safe point.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn sink(&self) -> &W {
        &self.sink
    }

    fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    /// Enumerates programmes from the master listing, drops old ones and
    /// enriches the rest from their detail pages.
    pub fn catalogue(&mut self, min_start_year: Option<i32>) -> Result<Vec<Program>> {
        let programs = self.discoverer.discover_programs(&mut self.fetcher)?;
        info!("Found {} SPP programs total", programs.len());
        let mut programs = filter_recent(programs, min_start_year);

        let total = programs.len();
        for (i, program) in programs.iter_mut().enumerate() {
            if self.interrupted() {
                return Err(HarvestError::Interrupted);
            }
            if i > 0 {
                self.pacing.child_delay();
            }
            info!("[{}/{}] Scraping detail page of {}...", i + 1, total, program.id);
            self.extractor.enrich_program(&mut self.fetcher, program);
        }
        Ok(programs)
    }

    /// Loads the checkpoint from the store, runs, and returns the report.
    pub fn resume(&mut self, programs: &[Program]) -> Result<HarvestReport> {
        let state = self.store.load();
        let (_, report) = self.run(programs, state)?;
        Ok(report)
    }

    /// Processes every programme not yet completed in `state`, in order.
    /// Previously failed programmes are attempted again.
    ///
    /// Fails only when the checkpoint cannot be saved.
    pub fn run(
        &mut self,
        programs: &[Program],
        mut state: CheckpointState,
    ) -> Result<(CheckpointState, HarvestReport)> {
        let mut report = HarvestReport {
            total: programs.len(),
            ..Default::default()
        };
        let mut attempted = 0;

        for (i, program) in programs.iter().enumerate() {
            if state.is_done(&program.id) {
                debug!("[{}/{}] Skipping {} (already completed)", i + 1, programs.len(), program.id);
                report.skipped += 1;
                continue;
            }
            if self.interrupted() {
                report.interrupted = true;
                break;
            }
            if attempted > 0 {
                self.pacing.entity_delay();
            }
            attempted += 1;

            let retry = if state.is_failed(&program.id) { " (retry)" } else { "" };
            info!("[{}/{}] Processing {}{}", i + 1, programs.len(), program.id, retry);

            match self.process_program(program) {
                Ok(harvest) => {
                    state.mark_done(&program.id);
                    state.last_index = Some(i);
                    self.store.save(&state)?;
                    debug!("{}: {} -> {}", program.id, EntityPhase::InExtraction, EntityPhase::Done);
                    report.children += harvest.children_count;
                    report.child_errors += harvest.children.iter().filter(|c| c.error.is_some()).count();
                    report.done.push(program.id.clone());
                }
                Err(HarvestError::Interrupted) => {
                    warn!("Interrupted while processing {}; it stays pending.", program.id);
                    report.interrupted = true;
                    break;
                }
                Err(e) => {
                    error!("{}: {} ({})", program.id, EntityPhase::Failed, e);
                    state.mark_failed(&program.id);
                    self.store.save(&state)?;
                    report.failed.push(program.id.clone());
                }
            }
        }

        report.log_summary();
        Ok((state, report))
    }

    fn process_program(&mut self, program: &Program) -> Result<ProgramHarvest> {
        if program.url.is_empty() {
            return Err(HarvestError::InvalidInput(format!("{} has no detail URL", program.id)));
        }
        debug!("{}: {} -> {}", program.id, EntityPhase::Pending, EntityPhase::InDiscovery);
        let refs = self.discoverer.discover_projects(&mut self.fetcher, program);
        if self.interrupted() {
            return Err(HarvestError::Interrupted);
        }
        info!("Found {} project links for {}", refs.len(), program.id);

        debug!("{}: {} -> {}", program.id, EntityPhase::InDiscovery, EntityPhase::InExtraction);
        let mut children = Vec::with_capacity(refs.len());
        for (j, reference) in refs.iter().enumerate() {
            if self.interrupted() {
                return Err(HarvestError::Interrupted);
            }
            self.pacing.child_delay();
            debug!("  [{}/{}] Scraping {}: {}", j + 1, refs.len(), reference.id, reference.title);
            children.push(self.extractor.extract_project(&mut self.fetcher, reference));
        }

        let harvest = ProgramHarvest::new(program, children);
        self.sink.write(&harvest)?;
        Ok(harvest)
    }
}
