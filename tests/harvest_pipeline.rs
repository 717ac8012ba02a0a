mod common;

use std::fs;

use common::*;
use gepris_harvester_lib::delay_manager::{PacingPolicy, Pause, PauseLog};
use gepris_harvester_lib::harvest::{Harvester, JsonDirSink, MemorySink};
use gepris_harvester_lib::resume_manager::{
    CheckpointState, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore,
};
use gepris_harvester_lib::{HarvestError, Program, ProgramHarvest, Result};
use tempfile::tempdir;

fn program(number: &str, page_id: &str) -> Program {
    Program::new(format!("SPP {}", number), format!("Programme {}", number), project_url(page_id))
}

/// Two programmes with two projects each.
fn two_program_site() -> FakeFetcher {
    FakeFetcher::new()
        .with_page(&project_url("100"), &program_page("100", &[("101", "Sensing"), ("102", "Learning")]))
        .with_page(&project_url("200"), &program_page("200", &[("201", "Textiles"), ("202", "Gaze")]))
        .with_page(&project_url("101"), &project_page("Sensing skin", "Prof. A Beta (KIT)", "Soft sensors."))
        .with_page(&project_url("102"), &project_page("Learning grip", "Dr. C Delta (TU Berlin)", "Deep learning."))
        .with_page(&project_url("201"), &project_page("Smart textiles", "Dr. E Zeta (RWTH)", "E-textiles."))
        .with_page(&project_url("202"), &project_page("Gaze tracking", "Dr. G Eta (LMU)", "Eye tracking."))
}

fn programs() -> Vec<Program> {
    vec![program("1", "100"), program("2", "200")]
}

/// File store whose n-th save (1-based) fails like a crash mid-write.
struct CrashingStore {
    inner: FileCheckpointStore,
    saves: usize,
    fail_on: usize,
}

impl CheckpointStore for CrashingStore {
    fn load(&mut self) -> CheckpointState {
        self.inner.load()
    }

    fn save(&mut self, state: &CheckpointState) -> Result<()> {
        self.saves += 1;
        if self.saves == self.fail_on {
            return Err(HarvestError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.inner.save(state)
    }
}

#[test]
fn completed_run_is_not_repeated_on_resume() {
    let dir = tempdir().unwrap();
    let config = quiet_config();
    let checkpoint = dir.path().join("scraping_checkpoint.json");
    let projects = dir.path().join("projects");

    let mut first = Harvester::new(
        &config,
        two_program_site(),
        FileCheckpointStore::new(&checkpoint),
        JsonDirSink::new(&projects),
    )
    .unwrap();
    let report = first.resume(&programs()).unwrap();
    assert_eq!(report.done, vec!["SPP 1", "SPP 2"]);
    assert_eq!(report.children, 4);
    assert_eq!(report.child_errors, 0);
    let before = fs::read_to_string(projects.join("SPP_1.json")).unwrap();

    let mut second = Harvester::new(
        &config,
        two_program_site(),
        FileCheckpointStore::new(&checkpoint),
        JsonDirSink::new(&projects),
    )
    .unwrap();
    let report = second.resume(&programs()).unwrap();
    assert_eq!(report.skipped, 2);
    assert!(report.done.is_empty());
    assert!(second.fetcher().fetched.is_empty());
    assert_eq!(fs::read_to_string(projects.join("SPP_1.json")).unwrap(), before);
}

#[test]
fn harvested_output_carries_extracted_details() {
    let mut harvester =
        Harvester::new(&quiet_config(), two_program_site(), MemoryCheckpointStore::new(), MemorySink::default())
            .unwrap();
    harvester.resume(&programs()).unwrap();

    let output = &harvester.sink().records["SPP 1"];
    assert_eq!(output.entity_title, "Programme 1");
    assert_eq!(output.children_count, 2);
    let ids: Vec<&str> = output.children.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["101", "102"]);

    let first = &output.children[0];
    assert_eq!(first.title, "Sensing skin");
    assert_eq!(first.investigators, "Prof. A Beta (KIT)");
    assert_eq!(first.classification, "Informatik");
    assert_eq!(first.abstract_text, "Soft sensors.");
    assert!(first.error.is_none());

    let saved = harvester.store().saved.as_ref().unwrap();
    assert!(saved.is_done("SPP 1") && saved.is_done("SPP 2"));
    assert_eq!(saved.last_index, Some(1));
}

#[test]
fn failed_checkpoint_save_leaves_program_pending_and_rerun_overwrites() {
    let dir = tempdir().unwrap();
    let config = quiet_config();
    let checkpoint = dir.path().join("scraping_checkpoint.json");
    let projects = dir.path().join("projects");

    let store = CrashingStore { inner: FileCheckpointStore::new(&checkpoint), saves: 0, fail_on: 2 };
    let mut crashing =
        Harvester::new(&config, two_program_site(), store, JsonDirSink::new(&projects)).unwrap();
    let outcome = crashing.resume(&programs());
    assert!(matches!(outcome, Err(HarvestError::Io(_))));

    let state = FileCheckpointStore::new(&checkpoint).load();
    assert!(state.is_done("SPP 1"));
    assert!(!state.is_done("SPP 2"));
    // output was written before the failed save
    assert!(projects.join("SPP_2.json").exists());

    let mut rerun = Harvester::new(
        &config,
        two_program_site(),
        FileCheckpointStore::new(&checkpoint),
        JsonDirSink::new(&projects),
    )
    .unwrap();
    let report = rerun.resume(&programs()).unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.done, vec!["SPP 2"]);
    assert_eq!(rerun.fetcher().fetches_of("/projekt/20"), 3);

    let written: ProgramHarvest =
        serde_json::from_str(&fs::read_to_string(projects.join("SPP_2.json")).unwrap()).unwrap();
    assert_eq!(written.children_count, 2);
    assert_eq!(written.children.len(), 2);
    assert_eq!(fs::read_dir(&projects).unwrap().count(), 2);
}

#[test]
fn program_without_projects_is_done_with_empty_children() {
    let dir = tempdir().unwrap();
    let site = FakeFetcher::new().with_page(&project_url("300"), &program_page("300", &[]));
    let mut harvester = Harvester::new(
        &quiet_config(),
        site,
        MemoryCheckpointStore::new(),
        JsonDirSink::new(dir.path()),
    )
    .unwrap();

    let report = harvester.resume(&[program("3", "300")]).unwrap();
    assert_eq!(report.done, vec!["SPP 3"]);
    assert!(report.failed.is_empty());

    let text = fs::read_to_string(dir.path().join("SPP_3.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["children_count"], 0);
    assert_eq!(value["children"], serde_json::json!([]));
    assert!(harvester.store().saved.as_ref().unwrap().is_done("SPP 3"));
}

#[test]
fn one_broken_project_does_not_fail_its_program() {
    let site = FakeFetcher::new()
        .with_page(&project_url("100"), &program_page("100", &[("101", "Fine"), ("199", "Gone")]))
        .with_page(&project_url("101"), &project_page("Fine", "Dr. X (KIT)", "Works."));
    let mut harvester =
        Harvester::new(&quiet_config(), site, MemoryCheckpointStore::new(), MemorySink::default()).unwrap();

    let report = harvester.resume(&[program("1", "100")]).unwrap();
    assert_eq!(report.done, vec!["SPP 1"]);
    assert_eq!(report.child_errors, 1);

    let children = &harvester.sink().records["SPP 1"].children;
    assert_eq!(children.len(), 2);
    assert!(children[0].error.is_none());
    let broken = &children[1];
    assert_eq!(broken.id, "199");
    assert_eq!(broken.title, "Gone");
    assert!(broken.error.as_deref().unwrap().contains("404"));
}

#[test]
fn unreachable_program_fails_and_is_retried_next_run() {
    let site = FakeFetcher::new();
    let mut harvester =
        Harvester::new(&quiet_config(), site, MemoryCheckpointStore::new(), MemorySink::default()).unwrap();
    let (state, report) = harvester.run(&[Program::new("SPP 9", "No URL", "")], CheckpointState::default()).unwrap();
    assert_eq!(report.failed, vec!["SPP 9"]);
    assert!(state.is_failed("SPP 9"));
    assert!(!state.is_done("SPP 9"));
    assert_eq!(harvester.sink().writes, 0);

    let site = FakeFetcher::new().with_page(&project_url("900"), &program_page("900", &[]));
    let mut retry =
        Harvester::new(&quiet_config(), site, MemoryCheckpointStore::with_state(state.clone()), MemorySink::default())
            .unwrap();
    let (state, report) = retry.run(&[program("9", "900")], state).unwrap();
    assert_eq!(report.done, vec!["SPP 9"]);
    assert!(state.is_done("SPP 9"));
    assert!(!state.is_failed("SPP 9"));
}

#[test]
fn projects_fall_back_to_catalogue_search() {
    let site = FakeFetcher::new()
        .with_page(&project_url("100"), &program_page("100", &[]))
        .with_route(
            &["doSearchSimple", "keywords=1234", "index=0"],
            &search_page(&[
                ("/gepris/projekt/501", "Found by search", "Teilprojekt SPP 1234"),
                ("/gepris/projekt/100", "The programme itself", "SPP 1234"),
                ("/gepris/projekt/502", "Second hit", "Teilprojekt"),
            ]),
        )
        .with_route(&["doSearchSimple", "keywords=1234", "index=100"], &search_page(&[]))
        .with_page(&project_url("501"), &project_page("Found by search", "Dr. S (KIT)", "Text."))
        .with_page(&project_url("502"), &project_page("Second hit", "Dr. T (KIT)", "Text."));
    let mut harvester =
        Harvester::new(&quiet_config(), site, MemoryCheckpointStore::new(), MemorySink::default()).unwrap();

    harvester.resume(&[program("1234", "100")]).unwrap();
    let output = &harvester.sink().records["SPP 1234"];
    let ids: Vec<&str> = output.children.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["501", "502"]);
    assert_eq!(harvester.fetcher().fetches_of("doSearchSimple"), 2);
}

#[test]
fn interrupt_stops_before_the_next_program() {
    let mut harvester = Harvester::new(
        &quiet_config(),
        two_program_site(),
        MemoryCheckpointStore::new(),
        MemorySink::default(),
    )
    .unwrap()
    .with_pacing(PacingPolicy::none());
    harvester.interrupt_handle().store(true, std::sync::atomic::Ordering::SeqCst);

    let (state, report) = harvester.run(&programs(), CheckpointState::default()).unwrap();
    assert!(report.interrupted);
    assert!(report.done.is_empty());
    assert!(state.completed_spps.is_empty());
    assert!(harvester.fetcher().fetched.is_empty());
    assert_eq!(harvester.store().save_count, 0);
}

#[test]
fn child_pauses_separate_fetches_and_entity_pauses_separate_programs() {
    let log = PauseLog::new();
    let mut harvester = Harvester::new(
        &quiet_config(),
        two_program_site(),
        MemoryCheckpointStore::new(),
        MemorySink::default(),
    )
    .unwrap()
    .with_pacing(PacingPolicy::none().recording(log.clone()));

    harvester.run(&programs(), CheckpointState::default()).unwrap();
    use Pause::*;
    assert_eq!(log.pauses(), vec![Child, Child, Entity, Child, Child]);
}

#[test]
fn first_attempted_program_after_skips_has_no_entity_pause() {
    let log = PauseLog::new();
    let mut state = CheckpointState::default();
    state.mark_done("SPP 1");
    let mut harvester = Harvester::new(
        &quiet_config(),
        two_program_site(),
        MemoryCheckpointStore::new(),
        MemorySink::default(),
    )
    .unwrap()
    .with_pacing(PacingPolicy::none().recording(log.clone()));

    let (_, report) = harvester.run(&programs(), state).unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(log.pauses(), vec![Pause::Child, Pause::Child]);
}

#[test]
fn search_fallback_pauses_between_tiers_and_pages() {
    let log = PauseLog::new();
    let site = FakeFetcher::new()
        .with_page(&project_url("100"), &program_page("100", &[]))
        .with_route(
            &["doSearchSimple", "keywords=1234", "index=0"],
            &search_page(&[("/gepris/projekt/501", "Found by search", "Teilprojekt")]),
        )
        .with_route(&["doSearchSimple", "keywords=1234", "index=100"], &search_page(&[]))
        .with_page(&project_url("501"), &project_page("Found by search", "Dr. S (KIT)", "Text."));
    let mut harvester = Harvester::new(&quiet_config(), site, MemoryCheckpointStore::new(), MemorySink::default())
        .unwrap()
        .with_pacing(PacingPolicy::none().recording(log.clone()));

    harvester.resume(&[program("1234", "100")]).unwrap();
    // scroll tier, search tier, second search page, then the one project
    assert_eq!(log.pauses(), vec![Pause::Child; 4]);
    assert_eq!(harvester.fetcher().fetches_of("doSearchSimple"), 2);
}
