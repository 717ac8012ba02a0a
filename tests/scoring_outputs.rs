use gepris_harvester_lib::analysis::{aggregate_institutions, program_stats, Datasets, ProjectAnalyzer};
use gepris_harvester_lib::harvest::{JsonDirSink, RecordSink};
use gepris_harvester_lib::input_loader::load_harvests;
use gepris_harvester_lib::scoring::{ai_taxonomy, wearables_taxonomy, KeywordScorer, MAX_SCORE};
use gepris_harvester_lib::{Program, ProgramHarvest, ProjectRecord};
use tempfile::tempdir;

fn record(id: &str, title: &str, abstract_text: &str, keywords: &[&str]) -> ProjectRecord {
    ProjectRecord {
        id: id.into(),
        title: title.into(),
        abstract_text: abstract_text.into(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        investigators: format!("Dr. Person {} (Universität Stuttgart)", id),
        ..Default::default()
    }
}

fn analyzer() -> ProjectAnalyzer {
    ProjectAnalyzer::new(
        KeywordScorer::new(&ai_taxonomy()).unwrap(),
        KeywordScorer::new(&wearables_taxonomy()).unwrap(),
    )
}

#[test]
fn harvested_files_score_into_bounded_datasets() {
    let dir = tempdir().unwrap();
    let mut sink = JsonDirSink::new(dir.path());
    let children = vec![
        record(
            "1",
            "Wearable sensor garments with deep learning",
            "We train a neural network on biosensor data from smart clothing.",
            &["Wearable", "Machine Learning"],
        ),
        record("2", "Exzellente Forschungsleistung", "Historische Quellen.", &[]),
    ];
    sink.write(&ProgramHarvest::new(&Program::new("SPP 2100", "Soft Robotics", "u"), children))
        .unwrap();

    let harvests = load_harvests(dir.path()).unwrap();
    let scored = analyzer().score_all(&harvests);
    assert_eq!(scored.len(), 2);
    for p in &scored {
        assert!((0.0..=MAX_SCORE).contains(&p.topic_a_score));
        assert!((0.0..=MAX_SCORE).contains(&p.topic_b_score));
        assert_eq!(p.program_id, "SPP 2100");
    }

    let relevant = &scored[0];
    assert!(relevant.topic_a_score >= 3.0);
    assert!(relevant.topic_b_score >= 3.0);
    assert!(relevant.matched_topic_b_keywords.contains(&"wearable".to_string()));

    let unrelated = &scored[1];
    assert!(!unrelated.matched_topic_b_keywords.contains(&"lung".to_string()));
    assert_eq!(unrelated.topic_b_score, 0.0);

    let stats = program_stats(&scored, 3.0);
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].combined_count, 1);

    let datasets = Datasets::build(scored, 1.0);
    assert_eq!(datasets.combined.len(), 1);
    assert_eq!(datasets.combined[0].project.id, "1");

    let institutions = aggregate_institutions(&harvests[0]);
    assert_eq!(institutions.top_institutions[0].name, "Universität Stuttgart");
    assert_eq!(institutions.top_institutions[0].project_count, 2);
}
