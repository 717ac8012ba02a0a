//! Scoring of harvested projects and the datasets derived from it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{ProgramHarvest, ProjectRecord};
use crate::resume_manager::write_atomically;
use crate::scoring::{round2, KeywordScorer, ScoringFields};

/// A project with its topic scores, rounded to two decimals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoredProject {
    #[serde(flatten)]
    pub project: ProjectRecord,
    pub program_id: String,
    pub program_title: String,
    pub topic_a_score: f64,
    pub topic_b_score: f64,
    pub combined_score: f64,
    pub matched_topic_a_keywords: Vec<String>,
    pub matched_topic_b_keywords: Vec<String>,
}

/// Flat shape of [`ScoredProject`] for CSV output.
#[derive(Debug, Serialize)]
struct ScoredRow<'a> {
    project_id: &'a str,
    program_id: &'a str,
    program_title: &'a str,
    title: &'a str,
    investigators: &'a str,
    funding_period: &'a str,
    #[serde(rename = "abstract")]
    abstract_text: &'a str,
    keywords: String,
    classification: &'a str,
    url: &'a str,
    topic_a_score: f64,
    topic_b_score: f64,
    combined_score: f64,
    matched_topic_a_keywords: String,
    matched_topic_b_keywords: String,
}

impl<'a> From<&'a ScoredProject> for ScoredRow<'a> {
    fn from(scored: &'a ScoredProject) -> Self {
        let p = &scored.project;
        ScoredRow {
            project_id: &p.id,
            program_id: &scored.program_id,
            program_title: &scored.program_title,
            title: &p.title,
            investigators: &p.investigators,
            funding_period: &p.funding_period,
            abstract_text: &p.abstract_text,
            keywords: p.keywords.join(", "),
            classification: &p.classification,
            url: &p.url,
            topic_a_score: scored.topic_a_score,
            topic_b_score: scored.topic_b_score,
            combined_score: scored.combined_score,
            matched_topic_a_keywords: scored.matched_topic_a_keywords.join(", "),
            matched_topic_b_keywords: scored.matched_topic_b_keywords.join(", "),
        }
    }
}

pub struct ProjectAnalyzer {
    topic_a: KeywordScorer,
    topic_b: KeywordScorer,
}

impl ProjectAnalyzer {
    pub fn new(topic_a: KeywordScorer, topic_b: KeywordScorer) -> Self {
        ProjectAnalyzer { topic_a, topic_b }
    }

    pub fn score(&self, project: &ProjectRecord, program_id: &str, program_title: &str) -> ScoredProject {
        let title = match project.extra.get("full_title") {
            Some(full) => format!("{} {}", project.title, full),
            None => project.title.clone(),
        };
        let keywords = project.keywords.join(" ");
        let fields = ScoringFields {
            title: &title,
            abstract_text: &project.abstract_text,
            keywords: &keywords,
            classification: &project.classification,
        };
        let a = self.topic_a.score(&fields);
        let b = self.topic_b.score(&fields);

        ScoredProject {
            project: project.clone(),
            program_id: program_id.to_string(),
            program_title: program_title.to_string(),
            topic_a_score: round2(a.score),
            topic_b_score: round2(b.score),
            combined_score: round2(a.score + b.score),
            matched_topic_a_keywords: a.matched.into_iter().collect(),
            matched_topic_b_keywords: b.matched.into_iter().collect(),
        }
    }

    pub fn score_all(&self, harvests: &[ProgramHarvest]) -> Vec<ScoredProject> {
        let scored: Vec<ScoredProject> = harvests
            .iter()
            .flat_map(|h| {
                h.children
                    .iter()
                    .map(move |child| self.score(child, &h.entity_id, &h.entity_title))
            })
            .collect();
        info!("Scored {} projects from {} programs", scored.len(), harvests.len());
        scored
    }
}

/// The relevance subsets, each sorted by descending score.
#[derive(Debug, Default)]
pub struct Datasets {
    pub all: Vec<ScoredProject>,
    pub topic_a: Vec<ScoredProject>,
    pub topic_b: Vec<ScoredProject>,
    pub combined: Vec<ScoredProject>,
}

/// Rows passing `keep`, highest `key` first. Ties keep input order.
fn ranked<K, F>(all: &[ScoredProject], keep: K, key: F) -> Vec<ScoredProject>
where
    K: Fn(&ScoredProject) -> bool,
    F: Fn(&ScoredProject) -> f64,
{
    let mut rows: Vec<ScoredProject> = all.iter().filter(|p| keep(p)).cloned().collect();
    rows.sort_by(|a, b| key(b).total_cmp(&key(a)));
    rows
}

impl Datasets {
    pub fn build(all: Vec<ScoredProject>, broad_threshold: f64) -> Self {
        let topic_a = ranked(&all, |p| p.topic_a_score >= broad_threshold, |p| p.topic_a_score);
        let topic_b = ranked(&all, |p| p.topic_b_score >= broad_threshold, |p| p.topic_b_score);
        let combined = ranked(
            &all,
            |p| p.topic_a_score >= broad_threshold && p.topic_b_score >= broad_threshold,
            |p| p.combined_score,
        );
        Datasets { all, topic_a, topic_b, combined }
    }

    /// Writes one CSV per dataset plus the full set as JSON into `dir`.
    pub fn write(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        for (name, rows) in [
            ("all_projects.csv", &self.all),
            ("topic_a_relevant.csv", &self.topic_a),
            ("topic_b_relevant.csv", &self.topic_b),
            ("topic_ab_combined.csv", &self.combined),
        ] {
            write_csv(&dir.join(name), rows)?;
            info!("Saved {} ({} rows)", name, rows.len());
        }
        write_json(&dir.join("scored_projects.json"), &self.all)
    }
}

fn write_csv(path: &Path, rows: &[ScoredProject]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(ScoredRow::from(row))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let temp = path.with_extension("json.tmp");
    write_atomically(path, &temp, json.as_bytes())
}

/// High-confidence counts for one programme.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgramStats {
    pub program_id: String,
    pub program_title: String,
    pub total_projects: usize,
    pub topic_a_count: usize,
    pub topic_b_count: usize,
    pub combined_count: usize,
}

/// Per-programme counts of projects at or above `high_threshold`, most
/// combined hits first.
pub fn program_stats(scored: &[ScoredProject], high_threshold: f64) -> Vec<ProgramStats> {
    let mut by_program: BTreeMap<&str, ProgramStats> = BTreeMap::new();
    for p in scored {
        let stats = by_program.entry(p.program_id.as_str()).or_insert_with(|| ProgramStats {
            program_id: p.program_id.clone(),
            program_title: p.program_title.clone(),
            ..Default::default()
        });
        let a = p.topic_a_score >= high_threshold;
        let b = p.topic_b_score >= high_threshold;
        stats.total_projects += 1;
        stats.topic_a_count += a as usize;
        stats.topic_b_count += b as usize;
        stats.combined_count += (a && b) as usize;
    }
    let mut stats: Vec<ProgramStats> = by_program.into_values().collect();
    stats.sort_by(|x, y| y.combined_count.cmp(&x.combined_count));
    stats
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstitutionCount {
    pub name: String,
    pub project_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstitutionSummary {
    pub program_id: String,
    pub program_title: String,
    pub num_projects: usize,
    pub num_institutions: usize,
    pub top_institutions: Vec<InstitutionCount>,
    pub all_institutions: Vec<String>,
}

/// Institutions named in parentheses, e.g. `Prof. A (TU Berlin); Dr. B`.
/// Names are split on `;` and `,`; short fragments are ignored.
pub fn parse_institutions(investigators: &str) -> Vec<String> {
    investigators
        .split([';', ','])
        .map(str::trim)
        .filter(|name| name.chars().count() > 5)
        .filter_map(|name| {
            let start = name.find('(')?;
            let end = name.find(')')?;
            let inner = name.get(start + 1..end)?.trim();
            (inner.chars().count() > 2).then(|| inner.to_string())
        })
        .collect()
}

pub fn aggregate_institutions(harvest: &ProgramHarvest) -> InstitutionSummary {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for child in &harvest.children {
        for institution in parse_institutions(&child.investigators) {
            *counts.entry(institution).or_default() += 1;
        }
    }

    let all: BTreeSet<String> = counts.keys().cloned().collect();
    let mut ranked: Vec<InstitutionCount> = counts
        .into_iter()
        .map(|(name, project_count)| InstitutionCount { name, project_count })
        .collect();
    ranked.sort_by(|a, b| b.project_count.cmp(&a.project_count).then_with(|| a.name.cmp(&b.name)));
    ranked.truncate(10);

    InstitutionSummary {
        program_id: harvest.entity_id.clone(),
        program_title: harvest.entity_title.clone(),
        num_projects: harvest.children.len(),
        num_institutions: all.len(),
        top_institutions: ranked,
        all_institutions: all.into_iter().collect(),
    }
}
