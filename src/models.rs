use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// A priority programme as listed in the catalogue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Program {
    /// Catalogue number, e.g. `SPP 2100`.
    pub id: String,
    pub title: String,
    pub url: String,
    pub start_period: String,
    pub region: String,
    pub international: String,
    pub variant: String,
    pub science_area: String,
    pub description: String,
    pub full_description: String,
    pub coordinator_name: String,
    pub contact_email: String,
    pub funding_type: String,
    pub funding_period: String,
    pub subject_area: String,
    pub international_partners: String,
    pub website: String,
    pub projects_url: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Program {
    pub fn new(id: impl Into<String>, title: impl Into<String>, url: impl Into<String>) -> Self {
        Program {
            id: id.into(),
            title: title.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    /// Leading four-digit year of `start_period`, if any.
    pub fn start_year(&self) -> Option<i32> {
        let digits: String = self
            .start_period
            .trim()
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if digits.len() == 4 {
            digits.parse().ok()
        } else {
            None
        }
    }

    /// File stem used for the per-program output, e.g. `SPP_2100`.
    pub fn file_stem(&self) -> String {
        self.id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
            .collect()
    }
}

/// A project reference produced by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub id: String,
    pub title: String,
    pub url: String,
}

/// A project as extracted from its detail page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectRecord {
    pub id: String,
    pub title: String,
    pub url: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub investigators: String,
    pub funding_period: String,
    pub classification: String,
    pub keywords: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinator_name: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProjectRecord {
    pub fn from_ref(reference: &ProjectRef) -> Self {
        ProjectRecord {
            id: reference.id.clone(),
            title: reference.title.clone(),
            url: reference.url.clone(),
            ..Default::default()
        }
    }
}

/// Output file contents for one harvested program.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgramHarvest {
    pub entity_id: String,
    pub entity_title: String,
    pub children_count: usize,
    pub children: Vec<ProjectRecord>,
}

impl ProgramHarvest {
    pub fn new(program: &Program, children: Vec<ProjectRecord>) -> Self {
        ProgramHarvest {
            entity_id: program.id.clone(),
            entity_title: program.title.clone(),
            children_count: children.len(),
            children,
        }
    }
}

/// One rendered row of the virtual-scroll listing, per column field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingRow {
    pub text: HashMap<String, String>,
    pub html: HashMap<String, String>,
}

impl ListingRow {
    pub fn text(&self, field: &str) -> &str {
        self.text.get(field).map(|s| s.trim()).unwrap_or("")
    }

    pub fn html(&self, field: &str) -> &str {
        self.html.get(field).map(String::as_str).unwrap_or("")
    }

    pub fn with_cell(mut self, field: &str, text: &str, html: &str) -> Self {
        self.text.insert(field.to_string(), text.to_string());
        self.html.insert(field.to_string(), html.to_string());
        self
    }
}
