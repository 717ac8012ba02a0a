//! Keyword relevance scoring.
//!
//! Two scorers, both pure functions of (text, taxonomy):
//! - [`KeywordScorer`] weighs whole-word keyword hits per record field and
//!   folds them into a 0-10 topic score;
//! - [`PatternScorer`] counts distinct regex patterns that match anywhere in a
//!   programme's title and description and maps the count through a step
//!   function.

use std::collections::BTreeSet;

use regex::{Regex, RegexBuilder};

use crate::error::Result;

pub const MAX_SCORE: f64 = 10.0;

/// Keyword lists for one topic, grouped by language.
#[derive(Debug, Clone)]
pub struct Taxonomy {
    pub name: String,
    pub groups: Vec<(String, Vec<String>)>,
}

impl Taxonomy {
    pub fn new(name: &str) -> Self {
        Taxonomy { name: name.to_string(), groups: Vec::new() }
    }

    pub fn with_group(mut self, language: &str, keywords: &[&str]) -> Self {
        self.groups.push((
            language.to_string(),
            keywords.iter().map(|k| k.to_string()).collect(),
        ));
        self
    }

    /// All groups concatenated in order, lowercased. A term listed under
    /// several languages appears once per listing.
    pub fn combined(&self) -> Vec<String> {
        self.groups
            .iter()
            .flat_map(|(_, keywords)| keywords.iter())
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect()
    }
}

/// Relative importance of each record field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldWeights {
    pub title: f64,
    pub abstract_text: f64,
    pub keywords: f64,
    pub classification: f64,
}

impl Default for FieldWeights {
    fn default() -> Self {
        FieldWeights { title: 3.0, abstract_text: 1.5, keywords: 2.0, classification: 1.0 }
    }
}

/// Text fields of one record, scored independently.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoringFields<'a> {
    pub title: &'a str,
    pub abstract_text: &'a str,
    pub keywords: &'a str,
    pub classification: &'a str,
}

/// Score and matched keywords for one topic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopicScore {
    pub score: f64,
    pub matched: BTreeSet<String>,
}

/// Whole-word keyword scorer for one taxonomy.
pub struct KeywordScorer {
    keywords: Vec<(String, Regex)>,
    weights: FieldWeights,
}

impl KeywordScorer {
    pub fn new(taxonomy: &Taxonomy) -> Result<Self> {
        Self::with_weights(taxonomy, FieldWeights::default())
    }

    pub fn with_weights(taxonomy: &Taxonomy, weights: FieldWeights) -> Result<Self> {
        let keywords = taxonomy
            .combined()
            .into_iter()
            .map(|keyword| {
                let pattern = format!(r"\b{}\b", regex::escape(&keyword));
                Regex::new(&pattern).map(|re| (keyword, re))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(KeywordScorer { keywords, weights })
    }

    /// Weighted score of a single field, before normalization. Occurrences
    /// are counted per list entry; the matched set holds distinct terms.
    pub fn score_field(&self, text: &str, field_weight: f64) -> (f64, BTreeSet<String>) {
        let mut matched = BTreeSet::new();
        if text.is_empty() {
            return (0.0, matched);
        }
        let text = text.to_lowercase();
        let mut occurrences = 0usize;
        for (keyword, re) in &self.keywords {
            let count = re.find_iter(&text).count();
            if count > 0 {
                occurrences += count;
                matched.insert(keyword.clone());
            }
        }
        let unique_score = (matched.len() as f64 * 2.0).min(5.0);
        let frequency_score = (occurrences as f64 * 0.5).min(5.0);
        ((unique_score + frequency_score) * field_weight, matched)
    }

    /// `min(sum of field scores / 3, 10)` plus the union of matched keywords.
    pub fn score(&self, fields: &ScoringFields<'_>) -> TopicScore {
        let parts = [
            (fields.title, self.weights.title),
            (fields.abstract_text, self.weights.abstract_text),
            (fields.keywords, self.weights.keywords),
            (fields.classification, self.weights.classification),
        ];
        let mut total = 0.0;
        let mut matched = BTreeSet::new();
        for (text, weight) in parts {
            let (score, keywords) = self.score_field(text, weight);
            total += score;
            matched.extend(keywords);
        }
        TopicScore { score: (total / 3.0).min(MAX_SCORE), matched }
    }
}

/// Counts matching boundary-anchored patterns; coarse 0-10 step scale.
pub struct PatternScorer {
    patterns: Vec<Regex>,
}

impl PatternScorer {
    pub fn new(patterns: &[&str]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| RegexBuilder::new(p).case_insensitive(true).build())
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(PatternScorer { patterns })
    }

    pub fn matches(&self, text: &str) -> usize {
        self.patterns.iter().filter(|re| re.is_match(text)).count()
    }

    pub fn score(&self, title: &str, description: &str) -> f64 {
        let text = format!("{} {}", title, description);
        step_score(self.matches(&text))
    }
}

/// 0 -> 0, 1 -> 2, 2 -> 4, n >= 3 -> min(2n, 10).
pub fn step_score(matches: usize) -> f64 {
    match matches {
        0 => 0.0,
        1 => 2.0,
        2 => 4.0,
        n => (2.0 * n as f64).min(MAX_SCORE),
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn ai_taxonomy() -> Taxonomy {
    Taxonomy::new("ai")
        .with_group(
            "german",
            &[
                "künstliche intelligenz", "ki", "maschinelles lernen", "machine learning",
                "deep learning", "neuronale netze", "neuronales netz", "bilderkennung",
                "spracherkennung", "nlp", "computer vision", "mustererkennung",
                "bildverarbeitung", "datenanalyse", "vorhersage", "klassifikation",
                "künstliches neuronales", "convolutional", "lstm", "transformer",
                "reinforcement learning", "verstärkendes lernen",
                "computational", "algorith", "konnektom", "connectom",
                "argumentation", "argumentationslogik", "reasoning", "neural",
                "gehirn", "brain", "kognitiv", "cognitive", "intelligente",
                "intelligent", "automat", "learning", "trained", "model",
            ],
        )
        .with_group(
            "english",
            &[
                "artificial intelligence", "ai", "machine learning", "ml",
                "deep learning", "neural network", "pattern recognition",
                "computer vision", "natural language processing", "nlp",
                "image recognition", "classification", "prediction", "regression",
                "convolutional", "lstm", "transformer", "reinforcement learning",
                "supervised learning", "unsupervised learning", "data mining",
                "computational", "algorithm", "connectome", "connectomic",
                "argumentation", "reasoning", "neural", "brain", "cognitive",
                "intelligent", "automated", "learning", "trained", "model",
            ],
        )
}

pub fn wearables_taxonomy() -> Taxonomy {
    Taxonomy::new("wearables")
        .with_group(
            "german",
            &[
                "wearable", "tragbar", "smart watch", "smartwatch", "fitness tracker",
                "sensor", "biosensor", "tragbare elektronik", "e-textil", "smart textile",
                "körpersensor", "gesundheitsmonitor", "mobile sensoren", "hautnahe",
                "tragbare sensoren", "smart clothing", "intelligente kleidung",
                "körpernah", "am körper", "wearable computing", "tragbares system",
                "soft robot", "weich", "flexible", "dehnbar", "elastomer",
                "aktor", "actuator", "greif", "manipulator", "biomimetisch",
                "implant", "lunge", "lung", "medizin", "medical", "biomedical",
                "patient", "therapie", "therapy", "prothes", "orthes",
            ],
        )
        .with_group(
            "english",
            &[
                "wearable", "smart watch", "smartwatch", "fitness tracker", "body sensor",
                "health monitoring", "e-textile", "smart fabric", "on-body", "on body",
                "mobile health", "mhealth", "m-health", "wearable device",
                "wearable sensor", "body-worn", "worn sensor", "smart clothing",
                "soft robot", "soft material", "flexible", "stretchable", "elastomer",
                "actuator", "gripper", "manipulator", "biomimetic",
                "implant", "lung", "medical", "biomedical", "patient",
                "therapy", "prosthe", "orthoti", "clinical",
            ],
        )
}

/// Programme-level AI patterns, stricter than [`ai_taxonomy`].
pub const AI_PATTERNS: &[&str] = &[
    r"künstliche\s+intelligenz", r"\bKI\b", r"maschinelles\s+lernen",
    r"machine\s+learning", r"deep\s+learning",
    r"neuronale[sn]?\s+netz", r"neural\s+network",
    r"computer\s+vision", r"\bNLP\b", r"natural\s+language",
    r"sprachmodell", r"language\s+model",
    r"reinforcement\s+learning", r"data[\s-]driven", r"datengetrieben",
    r"\bconnectom", r"\bkonnektom",
    r"artificial\s+intelligence",
    r"entscheidungsunterstützung", r"decision\s+support",
    r"\brobotik\b", r"\brobotic\b", r"\broboter\b",
    r"klassifikation", r"classification",
    r"quantum\s+software", r"quantum\s+algorithm",
    r"disinformation", r"desinformation",
];

/// Programme-level wearables patterns.
pub const WEARABLES_PATTERNS: &[&str] = &[
    r"\bwearable", r"\btragbare?\b", r"\bsensor(?:en|ik)?\b", r"\bbiosensor",
    r"e-textil", r"smart\s+textile", r"smart\s+clothing",
    r"körpersensor", r"gesundheitsmonitor", r"mobile\s+sensor",
    r"soft\s+robot", r"\belastomer", r"\baktuator", r"\bactuator",
    r"\bimplant(?:at|ierbar)", r"\bimplantable\b",
    r"\blunge\b", r"implantierbare\s+lunge",
    r"\bbiomedizin", r"\bbiomedical\b",
    r"\bprothes", r"\borthes", r"\borthoti",
    r"\bbiomimetisch", r"\bbiomimetic",
    r"\bmanipulator", r"\bgripper\b", r"\bgreifer\b",
    r"\bgaze\b", r"eye\s+track", r"blickbewegung",
    r"\bhapti[ck]", r"\baugmented\s+(reality|human)",
];
