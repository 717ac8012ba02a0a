//! Tiered enumeration of programs and their projects.
//!
//! Each tier only runs when the tiers before it produced fewer references
//! than the configured minimum. A failing tier is logged and skipped; it
//! never aborts discovery. Results are merged in tier order, first sighting
//! of an id wins. Consecutive tiers and search pages are separated by the
//! child pacing delay.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::config::HarvestConfig;
use crate::delay_manager::{self, PacingPolicy};
use crate::error::{HarvestError, Result};
use crate::fetcher::{ListingViewport, PageFetcher};
use crate::models::{ListingRow, Program, ProjectRef};

/// Discovery strategies in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    DirectLinks,
    VirtualScroll,
    Search,
}

pub const TIERS: [Tier; 3] = [Tier::DirectLinks, Tier::VirtualScroll, Tier::Search];

/// Query parameters marking a link as a view toggle of the current page.
const NOOP_PARAMS: [&str; 2] = ["language=", "displayMode="];

/// Column layout of a virtual-scroll listing.
#[derive(Debug, Clone, Copy)]
pub struct ListingProfile {
    pub key_field: &'static str,
    pub type_field: &'static str,
    /// Rows whose type differs are dropped; `None` keeps every row.
    pub type_value: Option<&'static str>,
    pub title_field: &'static str,
}

pub const PROGRAM_LISTING: ListingProfile = ListingProfile {
    key_field: "NUMMER",
    type_field: "TYP",
    type_value: Some("SPP"),
    title_field: "PRJ_TITEL",
};

pub const PROJECT_LISTING: ListingProfile = ListingProfile {
    key_field: "",
    type_field: "TYP",
    type_value: None,
    title_field: "PRJ_TITEL",
};

impl ListingProfile {
    fn accepts(&self, row: &ListingRow) -> bool {
        match self.type_value {
            Some(expected) => row.text(self.type_field) == expected,
            None => true,
        }
    }

    fn key(&self, row: &ListingRow, patterns: &Patterns) -> Option<String> {
        if !self.key_field.is_empty() {
            let key = row.text(self.key_field);
            if !key.is_empty() {
                return Some(key.to_string());
            }
        }
        patterns.project_id(row.html(self.title_field))
    }
}

/// Outcome of a scroll pass, with the number of scroll positions visited.
#[derive(Debug, Default)]
pub struct ScrollHarvest {
    pub rows: Vec<ListingRow>,
    pub steps: usize,
}

/// Scrolls the listing top to bottom, snapshotting rendered rows at each
/// position. Rows are keyed so repeated sightings are recorded once.
///
/// The number of scroll positions is fixed up front from the measured extent:
/// offsets `0, S, 2S, ...` strictly below `H + S`, i.e. `ceil(H / S) + 1`.
pub fn accumulate_rows(
    viewport: &mut dyn ListingViewport,
    profile: &ListingProfile,
    min_step: u32,
    settle_ms: u64,
) -> Result<ScrollHarvest> {
    let patterns = Patterns::new();
    let extent = viewport.extent()?;
    let step = u64::from(min_step.max(extent.client_height / 3).max(1));
    let limit = u64::from(extent.scroll_height) + step;
    debug!(
        "Table: scrollHeight={}, clientHeight={}, step={}",
        extent.scroll_height, extent.client_height, step
    );

    let mut harvest = ScrollHarvest::default();
    let mut seen = HashSet::new();
    let mut offset: u64 = 0;
    while offset < limit {
        viewport.scroll_to(u32::try_from(offset).unwrap_or(u32::MAX))?;
        harvest.steps += 1;
        delay_manager::settle(settle_ms);

        for row in viewport.rendered_rows()? {
            if !profile.accepts(&row) {
                continue;
            }
            let Some(key) = profile.key(&row, &patterns) else {
                continue;
            };
            if seen.insert(key) {
                harvest.rows.push(row);
            }
        }
        offset += step;
    }
    info!(
        "Collected {} unique rows over {} scroll positions",
        harvest.rows.len(),
        harvest.steps
    );
    Ok(harvest)
}

/// One entry of a catalogue search results page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub href: String,
    pub text: String,
}

/// Compiled patterns shared by the pure parsing functions.
pub struct Patterns {
    project_link: Regex,
    program_number: Regex,
    href_attr: Regex,
    link: Selector,
    result_entry: Selector,
}

impl Patterns {
    pub fn new() -> Self {
        Patterns {
            project_link: Regex::new(r"/gepris/projekt/(\d+)").expect("static regex"),
            program_number: Regex::new(r"\bSPP\s*(\d+)\b").expect("static regex"),
            href_attr: Regex::new(r#"href="([^"]+)""#).expect("static regex"),
            link: Selector::parse("a[href]").expect("static CSS selector"),
            result_entry: Selector::parse("div.result_entry, div.ergebnis_eintrag")
                .expect("static CSS selector"),
        }
    }

    pub fn project_id(&self, href: &str) -> Option<String> {
        self.project_link
            .captures(href)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// Normalized programme number, e.g. `SPP 2100`.
    pub fn program_number(&self, text: &str) -> Option<String> {
        self.program_number
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| format!("SPP {}", m.as_str()))
    }

    fn first_href<'a>(&self, html: &'a str) -> Option<&'a str> {
        self.href_attr
            .captures(html)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }
}

impl Default for Patterns {
    fn default() -> Self {
        Self::new()
    }
}

fn element_text(el: &ElementRef) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_tags(html: &str) -> String {
    if !html.contains('<') {
        return html.trim().to_string();
    }
    let fragment = Html::parse_fragment(html);
    fragment
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn absolutize(base: &Url, href: &str) -> Option<String> {
    base.join(href).ok().map(|u| u.to_string())
}

/// Detail-page links on `html`, deduplicated by id. Links back to
/// `self_id` and view-toggle links are rejected.
pub fn scrape_project_links(html: &str, self_id: Option<&str>, base: &Url) -> Vec<ProjectRef> {
    let patterns = Patterns::new();
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut projects = Vec::new();

    for link in document.select(&patterns.link) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        if NOOP_PARAMS.iter().any(|p| href.contains(p)) {
            continue;
        }
        let Some(id) = patterns.project_id(href) else {
            continue;
        };
        if self_id == Some(id.as_str()) {
            continue;
        }
        if seen.insert(id.clone()) {
            projects.push(ProjectRef {
                url: format!("{}/gepris/projekt/{}", base.as_str().trim_end_matches('/'), id),
                title: element_text(&link),
                id,
            });
        }
    }
    projects
}

/// Programme links on a listing page. A link counts only if its text, or the
/// text of its cell or row, carries a programme number.
pub fn scrape_program_links(html: &str, base: &Url) -> Vec<Program> {
    let patterns = Patterns::new();
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut programs = Vec::new();

    for link in document.select(&patterns.link) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        if NOOP_PARAMS.iter().any(|p| href.contains(p)) || patterns.project_id(href).is_none() {
            continue;
        }
        let title = element_text(&link);
        let number = patterns.program_number(&title).or_else(|| {
            link.ancestors()
                .take(2)
                .filter_map(ElementRef::wrap)
                .find_map(|parent| patterns.program_number(&element_text(&parent)))
        });
        let Some(number) = number else {
            continue;
        };
        if seen.insert(number.clone()) {
            let url = absolutize(base, href).unwrap_or_default();
            programs.push(Program::new(number, title, url));
        }
    }
    programs
}

/// Converts accumulated listing rows into programmes.
pub fn rows_to_programs(rows: &[ListingRow], base: &Url) -> Vec<Program> {
    let patterns = Patterns::new();
    let mut seen = HashSet::new();
    let mut programs = Vec::new();
    for row in rows {
        if !PROGRAM_LISTING.accepts(row) {
            continue;
        }
        let number = row.text("NUMMER");
        if number.is_empty() {
            continue;
        }
        let id = if number.starts_with("SPP") {
            number.to_string()
        } else {
            format!("SPP {}", number)
        };
        if !seen.insert(id.clone()) {
            continue;
        }

        let title_html = row.html("PRJ_TITEL");
        let mut title = row.text("PRJ_TITEL").to_string();
        if title.is_empty() || title.contains('<') {
            title = strip_tags(if title.is_empty() { title_html } else { &title });
        }
        let url = patterns
            .first_href(title_html)
            .or_else(|| patterns.first_href(row.text("PRJ_TITEL")))
            .or_else(|| Some(row.text("URL")).filter(|u| !u.is_empty()))
            .or_else(|| Some(row.text("DETAIL_URL")).filter(|u| !u.is_empty()))
            .and_then(|href| absolutize(base, href))
            .unwrap_or_default();

        let mut program = Program::new(id, title, url);
        program.start_period = row.text("PRJ_BEGINN").to_string();
        program.region = row.text("BUNDESLAND").to_string();
        program.international = row.text("INT_BEZUG").to_string();
        program.variant = row.text("VARIANTE").to_string();
        program.science_area = row.text("WSB").to_string();
        programs.push(program);
    }
    programs
}

/// Converts accumulated listing rows into project references.
pub fn rows_to_projects(rows: &[ListingRow], self_id: Option<&str>, base: &Url) -> Vec<ProjectRef> {
    let patterns = Patterns::new();
    let mut seen = HashSet::new();
    let mut projects = Vec::new();
    for row in rows {
        let html = row.html(PROJECT_LISTING.title_field);
        let Some(id) = patterns.project_id(html) else {
            continue;
        };
        if self_id == Some(id.as_str()) || !seen.insert(id.clone()) {
            continue;
        }
        let mut title = row.text(PROJECT_LISTING.title_field).to_string();
        if title.is_empty() {
            title = strip_tags(html);
        }
        projects.push(ProjectRef {
            url: format!("{}/gepris/projekt/{}", base.as_str().trim_end_matches('/'), id),
            title,
            id,
        });
    }
    projects
}

/// Result entries on one search page; an empty vector means the last page.
pub fn parse_search_results(html: &str) -> Vec<SearchHit> {
    let patterns = Patterns::new();
    let document = Html::parse_document(html);
    document
        .select(&patterns.result_entry)
        .filter_map(|entry| {
            let link = entry.select(&patterns.link).next()?;
            let href = link.value().attr("href")?.to_string();
            Some(SearchHit {
                title: element_text(&link),
                href,
                text: element_text(&entry),
            })
        })
        .collect()
}

fn merge_unique<T, K: Fn(&T) -> &str>(
    acc: &mut Vec<T>,
    seen: &mut HashSet<String>,
    items: Vec<T>,
    key: K,
) -> usize {
    let mut added = 0;
    for item in items {
        if seen.insert(key(&item).to_string()) {
            acc.push(item);
            added += 1;
        }
    }
    added
}

pub struct RecordDiscoverer {
    base_url: Url,
    list_url: String,
    min_programs: usize,
    min_children: usize,
    search_page_size: usize,
    max_search_pages: usize,
    scroll_min_step: u32,
    scroll_settle_ms: u64,
    patterns: Patterns,
    pacing: PacingPolicy,
    interrupt: Arc<AtomicBool>,
}

impl RecordDiscoverer {
    pub fn new(config: &HarvestConfig) -> Result<Self> {
        Ok(RecordDiscoverer {
            base_url: Url::parse(&config.base_url)?,
            list_url: config.list_url.clone(),
            min_programs: config.min_programs,
            min_children: config.min_children,
            search_page_size: config.search_page_size.max(1),
            max_search_pages: config.max_search_pages.max(1),
            scroll_min_step: config.scroll_min_step,
            scroll_settle_ms: config.scroll_settle_ms,
            patterns: Patterns::new(),
            pacing: config.pacing(),
            interrupt: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_pacing(mut self, pacing: PacingPolicy) -> Self {
        self.pacing = pacing;
        self
    }

    /// Search pagination stops with [`HarvestError::Interrupted`] once
    /// `flag` is set.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = flag;
        self
    }

    fn check_interrupt(&self) -> Result<()> {
        if self.interrupt.load(Ordering::SeqCst) {
            return Err(HarvestError::Interrupted);
        }
        Ok(())
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Enumerates every programme on the master listing. Zero programmes
    /// after all tiers is the one discovery outcome treated as fatal.
    pub fn discover_programs<F: PageFetcher + ?Sized>(&self, fetcher: &mut F) -> Result<Vec<Program>> {
        let mut programs = Vec::new();
        let mut seen = HashSet::new();

        for (n, tier) in TIERS.iter().copied().enumerate() {
            if programs.len() >= self.min_programs {
                break;
            }
            self.check_interrupt()?;
            if n > 0 {
                self.pacing.child_delay();
            }
            let found = match tier {
                Tier::DirectLinks => fetcher
                    .fetch(&self.list_url)
                    .map(|html| scrape_program_links(&html, &self.base_url)),
                Tier::VirtualScroll => self.scroll_programs(fetcher),
                Tier::Search => {
                    info!(
                        "Only found {} programs; trying catalogue search as fallback...",
                        programs.len()
                    );
                    self.search_programs(fetcher)
                }
            };
            match found {
                Ok(found) => {
                    let added = merge_unique(&mut programs, &mut seen, found, |p: &Program| p.id.as_str());
                    info!("Tier {:?}: {} new programs ({} total)", tier, added, programs.len());
                }
                Err(HarvestError::Interrupted) => return Err(HarvestError::Interrupted),
                Err(e) => warn!("Tier {:?} failed for master listing: {}", tier, e),
            }
        }

        if programs.is_empty() {
            return Err(HarvestError::NoPrograms);
        }
        Ok(programs)
    }

    /// Enumerates the projects of one programme. An empty result is valid.
    /// When interrupted, returns whatever the earlier tiers found.
    pub fn discover_projects<F: PageFetcher + ?Sized>(
        &self,
        fetcher: &mut F,
        program: &Program,
    ) -> Vec<ProjectRef> {
        let self_id = self.patterns.project_id(&program.url);
        let mut projects = Vec::new();
        let mut seen = HashSet::new();

        for (n, tier) in TIERS.iter().copied().enumerate() {
            if projects.len() >= self.min_children || self.interrupt.load(Ordering::SeqCst) {
                break;
            }
            if n > 0 {
                self.pacing.child_delay();
            }
            let found = match tier {
                Tier::DirectLinks => {
                    if program.url.is_empty() {
                        Err(HarvestError::InvalidInput(format!("{} has no detail URL", program.id)))
                    } else {
                        fetcher
                            .fetch(&program.url)
                            .map(|html| scrape_project_links(&html, self_id.as_deref(), &self.base_url))
                    }
                }
                Tier::VirtualScroll => self.scroll_projects(fetcher, program, self_id.as_deref()),
                Tier::Search => self.search_projects(fetcher, program, self_id.as_deref()),
            };
            match found {
                Ok(found) => {
                    let added = merge_unique(&mut projects, &mut seen, found, |p: &ProjectRef| p.id.as_str());
                    debug!("[{}] Tier {:?}: {} new projects", program.id, tier, added);
                }
                Err(HarvestError::Interrupted) => {
                    warn!("[{}] Discovery interrupted during tier {:?}", program.id, tier);
                    break;
                }
                Err(e) => warn!("[{}] Tier {:?} failed: {}", program.id, tier, e),
            }
        }

        if projects.is_empty() {
            warn!("No projects found for {}", program.id);
        }
        projects
    }

    fn scroll_programs<F: PageFetcher + ?Sized>(&self, fetcher: &mut F) -> Result<Vec<Program>> {
        let Some(viewport) = fetcher.open_viewport(&self.list_url)? else {
            debug!("Fetcher has no listing viewport; skipping scroll tier.");
            return Ok(Vec::new());
        };

        if let Some(bulk) = viewport.bulk_rows()? {
            let programs = rows_to_programs(&bulk, &self.base_url);
            info!("Got {} programs from the table data API", programs.len());
            if programs.len() > self.min_programs {
                return Ok(programs);
            }
        }

        info!("Falling back to scroll + row extraction...");
        let harvest = accumulate_rows(
            viewport,
            &PROGRAM_LISTING,
            self.scroll_min_step,
            self.scroll_settle_ms,
        )?;
        Ok(rows_to_programs(&harvest.rows, &self.base_url))
    }

    fn scroll_projects<F: PageFetcher + ?Sized>(
        &self,
        fetcher: &mut F,
        program: &Program,
        self_id: Option<&str>,
    ) -> Result<Vec<ProjectRef>> {
        if program.url.is_empty() {
            return Ok(Vec::new());
        }
        let Some(viewport) = fetcher.open_viewport(&program.url)? else {
            return Ok(Vec::new());
        };
        let harvest = accumulate_rows(
            viewport,
            &PROJECT_LISTING,
            self.scroll_min_step,
            self.scroll_settle_ms,
        )?;
        Ok(rows_to_projects(&harvest.rows, self_id, &self.base_url))
    }

    fn search_url(&self, extra: &str, index: usize) -> String {
        format!(
            "{}/gepris/OCTOPUS?task=doSearchSimple&context=projekt{}&hitsPerPage={}&index={}&nurProjekteMitAB=false&phrase=true",
            self.base_url.as_str().trim_end_matches('/'),
            extra,
            self.search_page_size,
            index
        )
    }

    /// Walks search pages, advancing `index` by the page size, until a page
    /// returns no entries, repeats itself, or `max_search_pages` is reached.
    /// Pages after the first are preceded by a child delay.
    fn paginate<F, T>(
        &self,
        fetcher: &mut F,
        extra: &str,
        mut map: impl FnMut(&SearchHit) -> Option<T>,
        key: impl Fn(&T) -> String,
    ) -> Result<Vec<T>>
    where
        F: PageFetcher + ?Sized,
    {
        let mut found = Vec::new();
        let mut seen = HashSet::new();
        let mut seen_hrefs = HashSet::new();
        for page in 0..self.max_search_pages {
            self.check_interrupt()?;
            if page > 0 {
                self.pacing.child_delay();
            }
            let index = page * self.search_page_size;
            let url = self.search_url(extra, index);
            info!("Fetching search results page (index={})...", index);
            let html = fetcher.fetch(&url)?;
            let hits = parse_search_results(&html);
            if hits.is_empty() {
                info!("No results found on page index={}, stopping.", index);
                break;
            }
            let fresh = hits.iter().filter(|h| seen_hrefs.insert(h.href.clone())).count();
            if fresh == 0 {
                warn!("Search page index={} repeats earlier results, stopping.", index);
                break;
            }
            for hit in &hits {
                if let Some(item) = map(hit) {
                    if seen.insert(key(&item)) {
                        found.push(item);
                    }
                }
            }
        }
        Ok(found)
    }

    fn search_programs<F: PageFetcher + ?Sized>(&self, fetcher: &mut F) -> Result<Vec<Program>> {
        let programs = self.paginate(
            fetcher,
            "&eintragsart=4&teilprojekte=false",
            |hit| {
                if !(hit.title.contains("Schwerpunktprogramm") || hit.text.contains("SPP")) {
                    return None;
                }
                let number = self
                    .patterns
                    .program_number(&hit.title)
                    .or_else(|| self.patterns.program_number(&hit.text))?;
                let url = absolutize(&self.base_url, &hit.href)?;
                Some(Program::new(number, hit.title.clone(), url))
            },
            |p| p.id.clone(),
        )?;
        info!("Found {} programs via search", programs.len());
        Ok(programs)
    }

    fn search_projects<F: PageFetcher + ?Sized>(
        &self,
        fetcher: &mut F,
        program: &Program,
        self_id: Option<&str>,
    ) -> Result<Vec<ProjectRef>> {
        let number = program.id.trim_start_matches("SPP").trim();
        let extra = format!("&keywords={}&teilprojekte=true", urlencoding::encode(number));
        let base = self.base_url.as_str().trim_end_matches('/').to_string();
        self.paginate(
            fetcher,
            &extra,
            |hit| {
                let id = self.patterns.project_id(&hit.href)?;
                if self_id == Some(id.as_str()) {
                    return None;
                }
                Some(ProjectRef {
                    url: format!("{}/gepris/projekt/{}", base, id),
                    title: hit.title.clone(),
                    id,
                })
            },
            |p| p.id.clone(),
        )
    }
}

/// Keeps programmes starting in or after `min_year`, plus those with no
/// recognizable start year.
pub fn filter_recent(programs: Vec<Program>, min_year: Option<i32>) -> Vec<Program> {
    let Some(min_year) = min_year else {
        return programs;
    };
    let before = programs.len();
    let kept: Vec<Program> = programs
        .into_iter()
        .filter(|p| p.start_year().map_or(true, |year| year >= min_year))
        .collect();
    info!(
        "After filtering (start >= {} or unknown): {} programs, dropped {}",
        min_year,
        kept.len(),
        before - kept.len()
    );
    kept
}
