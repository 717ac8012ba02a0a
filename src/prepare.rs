//! Normalization of catalogued programmes for downstream consumers.

use log::info;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::extractor::{collapse_whitespace, METADATA_PREFIXES};
use crate::models::Program;
use crate::scoring::{PatternScorer, AI_PATTERNS, WEARABLES_PATTERNS};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedProgram {
    pub id: String,
    pub title: String,
    pub url: String,
    pub start_period: String,
    pub region: String,
    pub description: String,
    pub funding_period: String,
    pub subject_area: String,
    pub coordinator_name: String,
    pub contact_email: String,
    pub website: String,
    pub estimated_topic_a_relevance: f64,
    pub estimated_topic_b_relevance: f64,
}

/// Collapses whitespace and drops a trailing `value` left by widget scraping.
pub fn clean_field(value: &str) -> String {
    let value = collapse_whitespace(value);
    match value.strip_suffix("value") {
        Some(rest) if rest.is_empty() || rest.ends_with(' ') => rest.trim_end().to_string(),
        _ => value,
    }
}

pub struct ProgramPreparer {
    heading_prefix: Regex,
    topic_a: PatternScorer,
    topic_b: PatternScorer,
}

impl ProgramPreparer {
    pub fn new() -> Result<Self> {
        Self::with_patterns(AI_PATTERNS, WEARABLES_PATTERNS)
    }

    pub fn with_patterns(topic_a: &[&str], topic_b: &[&str]) -> Result<Self> {
        Ok(ProgramPreparer {
            heading_prefix: Regex::new(r"^Projekt\s*SPP\s*\d+\s*:\s*")?,
            topic_a: PatternScorer::new(topic_a)?,
            topic_b: PatternScorer::new(topic_b)?,
        })
    }

    /// Strips the heading prefix, a repeated title and any metadata labels
    /// glued onto the end. Placeholder summaries become empty.
    pub fn clean_description(&self, description: &str, title: &str) -> String {
        if description.is_empty() {
            return String::new();
        }
        let mut desc = self.heading_prefix.replace(description, "").into_owned();

        if !title.is_empty() {
            if let Some(rest) = desc.strip_prefix(title) {
                desc = rest.trim().to_string();
            }
        }

        // "Projekt" also starts ordinary sentences; only the labels cut.
        for label in &METADATA_PREFIXES[1..] {
            if let Some(idx) = desc.find(label) {
                desc.truncate(idx);
            }
        }

        let desc = collapse_whitespace(&desc);
        if desc.to_lowercase().starts_with("keine zusammenfassung") {
            return String::new();
        }
        desc
    }

    pub fn normalize(&self, program: &Program) -> NormalizedProgram {
        let description = self.clean_description(&program.description, &program.title);
        let full_description = self.clean_description(&program.full_description, &program.title);
        let body = format!("{} {}", description, full_description);

        NormalizedProgram {
            id: program.id.clone(),
            title: program.title.clone(),
            url: program.url.clone(),
            start_period: program.start_period.clone(),
            region: program.region.clone(),
            description,
            funding_period: clean_field(&program.funding_period),
            subject_area: clean_field(&program.subject_area),
            coordinator_name: clean_field(&program.coordinator_name),
            contact_email: clean_field(&program.contact_email),
            website: program.website.clone(),
            estimated_topic_a_relevance: self.topic_a.score(&program.title, &body),
            estimated_topic_b_relevance: self.topic_b.score(&program.title, &body),
        }
    }

    /// Normalizes every programme, sorted by id.
    pub fn prepare(&self, programs: &[Program]) -> Vec<NormalizedProgram> {
        let mut prepared: Vec<NormalizedProgram> = programs.iter().map(|p| self.normalize(p)).collect();
        prepared.sort_by(|a, b| a.id.cmp(&b.id));

        let topic_a = prepared.iter().filter(|p| p.estimated_topic_a_relevance > 0.0).count();
        let topic_b = prepared.iter().filter(|p| p.estimated_topic_b_relevance > 0.0).count();
        info!("Topic A relevant programs: {}/{}", topic_a, prepared.len());
        info!("Topic B relevant programs: {}/{}", topic_b, prepared.len());
        prepared
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_field_strips_widget_artifacts() {
        assert_eq!(clean_field("  2019   bis\n2025 value"), "2019 bis 2025");
        assert_eq!(clean_field("value"), "");
        assert_eq!(clean_field("Evaluation"), "Evaluation");
        assert_eq!(clean_field(""), "");
    }

    #[test]
    fn description_loses_prefix_title_and_trailing_labels() {
        let preparer = ProgramPreparer::new().unwrap();
        let raw = "Projekt SPP 2100: Soft Material Robotic Systems Weiche Roboter \
                   lernen greifen.  Fachliche Zuordnung Informatik DFG-Verfahren Schwerpunktprogramme";
        assert_eq!(
            preparer.clean_description(raw, "Soft Material Robotic Systems"),
            "Weiche Roboter lernen greifen."
        );
    }

    #[test]
    fn placeholder_description_becomes_empty() {
        let preparer = ProgramPreparer::new().unwrap();
        assert_eq!(preparer.clean_description("Keine Zusammenfassung vorhanden", "T"), "");
        assert_eq!(preparer.clean_description("", "T"), "");
    }

    #[test]
    fn normalize_scores_title_and_description() {
        let preparer = ProgramPreparer::new().unwrap();
        let mut program = Program::new("SPP 2100", "Soft Material Robotic Systems", "u");
        program.description = "Weiche Aktuatoren mit Elastomer und Sensorik.".into();
        program.funding_period = "2019 bis 2025 value".into();

        let normalized = preparer.normalize(&program);
        assert_eq!(normalized.funding_period, "2019 bis 2025");
        // sensorik, elastomer, aktuator
        assert_eq!(normalized.estimated_topic_b_relevance, 6.0);
        // robotic
        assert_eq!(normalized.estimated_topic_a_relevance, 2.0);
    }

    #[test]
    fn prepare_sorts_by_id() {
        let preparer = ProgramPreparer::new().unwrap();
        let programs = vec![Program::new("SPP 2311", "B", ""), Program::new("SPP 2100", "A", "")];
        let ids: Vec<_> = preparer.prepare(&programs).into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["SPP 2100", "SPP 2311"]);
    }
}
