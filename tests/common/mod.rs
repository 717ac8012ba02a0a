#![allow(dead_code)]

use std::collections::HashMap;

use gepris_harvester_lib::config::HarvestConfig;
use gepris_harvester_lib::delay_manager::DelayRange;
use gepris_harvester_lib::{HarvestError, ListingRow, ListingViewport, PageFetcher, Result, ScrollExtent};

pub const BASE: &str = "https://gepris.dfg.de";

pub fn project_url(id: &str) -> String {
    format!("{}/gepris/projekt/{}", BASE, id)
}

/// Config with no pacing and no settle pauses.
pub fn quiet_config() -> HarvestConfig {
    HarvestConfig {
        child_delay_ms: DelayRange::ZERO,
        entity_delay_ms: DelayRange::ZERO,
        scroll_settle_ms: 0,
        max_search_pages: 5,
        ..Default::default()
    }
}

/// Programme detail page linking to its projects.
pub fn program_page(self_id: &str, children: &[(&str, &str)]) -> String {
    let links: String = children
        .iter()
        .map(|(id, title)| format!(r#"<li><a href="/gepris/projekt/{}">{}</a></li>"#, id, title))
        .collect();
    format!(
        r#"<html><body><h1>Programme {0}</h1>
        <a href="/gepris/projekt/{0}?language=en">English</a>
        <a href="/gepris/projekt/{0}">Self</a>
        <ul>{1}</ul></body></html>"#,
        self_id, links
    )
}

pub fn project_page(title: &str, investigators: &str, abstract_text: &str) -> String {
    format!(
        r#"<html><body><h1>{}</h1>
        <div><span class="name">Antragsteller</span> {}</div>
        <div><span class="name">Fachliche Zuordnung</span> Informatik</div>
        <div><span class="name">Förderung</span> Förderung von 2020 bis 2024</div>
        <div id="projekttext">{}</div>
        </body></html>"#,
        title, investigators, abstract_text
    )
}

pub fn search_page(entries: &[(&str, &str, &str)]) -> String {
    let body: String = entries
        .iter()
        .map(|(href, title, text)| {
            format!(r#"<div class="result_entry"><a href="{}">{}</a> {}</div>"#, href, title, text)
        })
        .collect();
    format!("<html><body>{}</body></html>", body)
}

/// Serves canned pages by exact URL, falling back to routes matched by
/// substrings. Unknown URLs fail like a 404.
#[derive(Default)]
pub struct FakeFetcher {
    pages: HashMap<String, String>,
    routes: Vec<(Vec<String>, String)>,
    viewports: HashMap<String, FakeViewport>,
    pub fetched: Vec<String>,
    pub opened: Vec<String>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }

    /// Answers any URL containing every one of `needles`.
    pub fn with_route(mut self, needles: &[&str], html: &str) -> Self {
        self.routes
            .push((needles.iter().map(|n| n.to_string()).collect(), html.to_string()));
        self
    }

    pub fn with_viewport(mut self, url: &str, viewport: FakeViewport) -> Self {
        self.viewports.insert(url.to_string(), viewport);
        self
    }

    pub fn viewport(&self, url: &str) -> Option<&FakeViewport> {
        self.viewports.get(url)
    }

    pub fn fetches_of(&self, needle: &str) -> usize {
        self.fetched.iter().filter(|u| u.contains(needle)).count()
    }
}

impl PageFetcher for FakeFetcher {
    fn fetch(&mut self, url: &str) -> Result<String> {
        self.fetched.push(url.to_string());
        if let Some(html) = self.pages.get(url) {
            return Ok(html.clone());
        }
        self.routes
            .iter()
            .find(|(needles, _)| needles.iter().all(|n| url.contains(n.as_str())))
            .map(|(_, html)| html.clone())
            .ok_or_else(|| HarvestError::Fetch {
                url: url.to_string(),
                reason: "HTTP status 404 Not Found".to_string(),
            })
    }

    fn open_viewport(&mut self, url: &str) -> Result<Option<&mut dyn ListingViewport>> {
        self.opened.push(url.to_string());
        Ok(self
            .viewports
            .get_mut(url)
            .map(|v| v as &mut dyn ListingViewport))
    }
}

/// Listing that renders a fixed snapshot per scroll position.
#[derive(Debug, Clone, Default)]
pub struct FakeViewport {
    pub extent: ScrollExtent,
    pub snapshots: Vec<Vec<ListingRow>>,
    pub bulk: Option<Vec<ListingRow>>,
    pub scrolls: Vec<u32>,
    /// Fails every measurement, like a table that never rendered.
    pub detached: bool,
}

impl FakeViewport {
    pub fn new(scroll_height: u32, client_height: u32) -> Self {
        FakeViewport {
            extent: ScrollExtent { scroll_height, client_height },
            ..Default::default()
        }
    }

    pub fn with_snapshots(mut self, snapshots: Vec<Vec<ListingRow>>) -> Self {
        self.snapshots = snapshots;
        self
    }

    pub fn with_bulk(mut self, rows: Vec<ListingRow>) -> Self {
        self.bulk = Some(rows);
        self
    }

    pub fn detached() -> Self {
        FakeViewport { detached: true, ..Default::default() }
    }
}

impl ListingViewport for FakeViewport {
    fn extent(&mut self) -> Result<ScrollExtent> {
        if self.detached {
            return Err(HarvestError::Viewport("table container not found".to_string()));
        }
        Ok(self.extent)
    }

    fn scroll_to(&mut self, offset: u32) -> Result<()> {
        self.scrolls.push(offset);
        Ok(())
    }

    fn rendered_rows(&mut self) -> Result<Vec<ListingRow>> {
        let position = self.scrolls.len().saturating_sub(1);
        Ok(self.snapshots.get(position).cloned().unwrap_or_default())
    }

    fn bulk_rows(&mut self) -> Result<Option<Vec<ListingRow>>> {
        Ok(self.bulk.clone())
    }
}

pub fn program_row(number: &str, title: &str, project_id: &str, start: &str) -> ListingRow {
    ListingRow::default()
        .with_cell("TYP", "SPP", "SPP")
        .with_cell("NUMMER", number, number)
        .with_cell(
            "PRJ_TITEL",
            title,
            &format!(r#"<a href="/gepris/projekt/{}">{}</a>"#, project_id, title),
        )
        .with_cell("PRJ_BEGINN", start, start)
}

pub fn project_row(id: &str, title: &str) -> ListingRow {
    ListingRow::default()
        .with_cell("TYP", "Teilprojekt", "Teilprojekt")
        .with_cell(
            "PRJ_TITEL",
            title,
            &format!(r#"<a href="/gepris/projekt/{}">{}</a>"#, id, title),
        )
}
