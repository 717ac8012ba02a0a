use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::delay_manager::{DelayRange, PacingPolicy};
use crate::error::Result;

pub const BASE_URL: &str = "https://gepris.dfg.de";
pub const LIST_URL: &str =
    "https://gepris.dfg.de/gepris/programmlisten?language=de#PROGRAMM=Schwerpunktprogramme";

/// Runtime settings for discovery, harvesting and scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub base_url: String,
    pub list_url: String,
    /// Root for every file the pipeline reads or writes.
    pub data_dir: PathBuf,
    pub request_timeout_secs: u64,
    /// Delay between consecutive child fetches.
    pub child_delay_ms: DelayRange,
    /// Delay between programs; wider than `child_delay_ms`.
    pub entity_delay_ms: DelayRange,
    /// Fewer programs than this from tiers 1-2 triggers the search tier.
    pub min_programs: usize,
    pub min_children: usize,
    pub search_page_size: usize,
    pub max_search_pages: usize,
    pub scroll_min_step: u32,
    pub scroll_settle_ms: u64,
    pub min_paragraph_chars: usize,
    pub broad_threshold: f64,
    pub high_threshold: f64,
    /// Programs starting before this year are dropped; unknown years are kept.
    pub min_start_year: Option<i32>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            list_url: LIST_URL.to_string(),
            data_dir: PathBuf::from("data/raw"),
            request_timeout_secs: 60,
            child_delay_ms: DelayRange::new(2_000, 4_000),
            entity_delay_ms: DelayRange::new(3_000, 7_000),
            min_programs: 25,
            min_children: 1,
            search_page_size: 100,
            max_search_pages: 50,
            scroll_min_step: 50,
            scroll_settle_ms: 150,
            min_paragraph_chars: 100,
            broad_threshold: 1.0,
            high_threshold: 3.0,
            min_start_year: Some(2017),
        }
    }
}

impl HarvestConfig {
    /// Reads a JSON config file; keys that are absent keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: HarvestConfig = serde_json::from_str(&content)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn pacing(&self) -> PacingPolicy {
        PacingPolicy::new(self.child_delay_ms, self.entity_delay_ms)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.data_dir.join("scraping_checkpoint.json")
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.data_dir.join("projects")
    }

    pub fn programs_path(&self) -> PathBuf {
        self.data_dir.join("spp_programs.json")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.data_dir
            .parent()
            .map(|p| p.join("processed"))
            .unwrap_or_else(|| PathBuf::from("processed"))
    }
}
