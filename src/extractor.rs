use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::{BTreeMap, HashSet};
use log::{debug, warn};
use url::Url;

use crate::fetcher::PageFetcher;
use crate::models::{Program, ProjectRecord, ProjectRef};

/// Canonical record fields a detail-page label can populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    CoordinatorName,
    Investigators,
    Institution,
    FundingType,
    FundingPeriod,
    SubjectArea,
    Classification,
    Keywords,
    Website,
    ContactEmail,
    InternationalPartners,
    ProjectIdentifier,
    ParentProgram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Match {
    Exact,
    Contains,
}

/// Ordered (pattern, field) rules; the first rule matching a normalized label wins.
pub struct LabelTable {
    rules: Vec<(&'static str, Match, Field)>,
}

impl Default for LabelTable {
    fn default() -> Self {
        use Field::*;
        use Match::*;
        LabelTable {
            rules: vec![
                ("sprecher/in", Exact, CoordinatorName),
                ("sprecher / sprecherin", Exact, CoordinatorName),
                ("sprecherin / sprecher", Exact, CoordinatorName),
                ("sprecherin", Exact, CoordinatorName),
                ("sprecher", Exact, CoordinatorName),
                ("spokesperson", Exact, CoordinatorName),
                ("spokespersons", Exact, CoordinatorName),
                ("antragstellerinnen / antragsteller", Exact, Investigators),
                ("dfg-verfahren", Exact, FundingType),
                ("dfg programme", Exact, FundingType),
                ("förderung", Exact, FundingPeriod),
                ("term", Exact, FundingPeriod),
                ("fachliche zuordnung", Exact, SubjectArea),
                ("subject area", Exact, SubjectArea),
                ("webseite", Exact, Website),
                ("homepage", Exact, Website),
                ("website", Exact, Website),
                ("internationaler bezug", Exact, InternationalPartners),
                ("international connection", Exact, InternationalPartners),
                ("projektkennung", Exact, ProjectIdentifier),
                ("project identifier", Exact, ProjectIdentifier),
                ("teilprojekt zu", Exact, ParentProgram),
                ("subproject of", Exact, ParentProgram),
                ("e-mail", Exact, ContactEmail),
                ("email", Exact, ContactEmail),
                ("antragsteller", Contains, Investigators),
                ("applicant", Contains, Investigators),
                ("principal", Contains, Investigators),
                ("laufzeit", Contains, FundingPeriod),
                ("period", Contains, FundingPeriod),
                ("systematik", Contains, Classification),
                ("classification", Contains, Classification),
                ("schlagw", Contains, Keywords),
                ("keyword", Contains, Keywords),
                ("institution", Contains, Institution),
                ("universität", Contains, Institution),
                ("hochschule", Contains, Institution),
            ],
        }
    }
}

impl LabelTable {
    pub fn resolve(&self, label: &str) -> Option<Field> {
        let label = normalize_label(label);
        self.rules.iter().find_map(|(pattern, mode, field)| {
            let hit = match mode {
                Match::Exact => label == *pattern,
                Match::Contains => label.contains(pattern),
            };
            hit.then_some(*field)
        })
    }
}

/// Collapses whitespace, trims trailing punctuation and lowercases.
pub fn normalize_label(label: &str) -> String {
    collapse_whitespace(label)
        .trim_end_matches(|c: char| c == ':' || c == '.' || c == ',' || c == ';')
        .trim()
        .to_lowercase()
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Metadata labels that mark a text block as page chrome, not body text.
pub const METADATA_PREFIXES: [&str; 17] = [
    "Projekt",
    "Fachliche Zuordnung",
    "DFG-Verfahren",
    "Förderung",
    "Internationaler Bezug",
    "Sprecher",
    "Sprecherin",
    "Webseite",
    "Teilprojekt",
    "Kooperationspartner",
    "Ehemalige",
    "Mitverantwortlich",
    "Beteiligte",
    "Gastgeber",
    "Antragsteller",
    "Projektkennung",
    "Keine Zusammenfassung",
];

/// Everything recovered from one detail page before it is mapped onto a record.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PageDetails {
    pub title: String,
    pub fields: BTreeMap<Field, String>,
    pub extra: BTreeMap<String, String>,
    pub body: String,
    pub website: Option<String>,
    pub contact_email: Option<String>,
    pub projects_url: Option<String>,
}

impl PageDetails {
    pub fn field(&self, field: Field) -> String {
        self.fields.get(&field).cloned().unwrap_or_default()
    }
}

pub struct Extractor {
    labels: LabelTable,
    base_url: Url,
    min_paragraph_chars: usize,
    email_regex: Regex,
    name_selector: Selector,
    dl_selector: Selector,
    dt_selector: Selector,
    dd_selector: Selector,
    h1_selector: Selector,
    title_selector: Selector,
    body_selector: Selector,
    paragraph_selector: Selector,
    link_selector: Selector,
    extern_selector: Selector,
    content_selector: Selector,
    projects_selector: Selector,
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static CSS selector")
}

impl Extractor {
    pub fn new(base_url: Url, min_paragraph_chars: usize) -> Self {
        Extractor {
            labels: LabelTable::default(),
            base_url,
            min_paragraph_chars,
            email_regex: Regex::new(r"(?i)[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}")
                .expect("static email regex"),
            name_selector: selector("span.name"),
            dl_selector: selector("dl"),
            dt_selector: selector("dt"),
            dd_selector: selector("dd"),
            h1_selector: selector("h1"),
            title_selector: selector("title"),
            body_selector: selector(
                "#projekttext, [class*=\"abstract\"], [class*=\"beschreibung\"], \
                 [id*=\"abstract\"], [id*=\"zusammenfassung\"]",
            ),
            paragraph_selector: selector("p"),
            link_selector: selector("a[href]"),
            extern_selector: selector(
                "a.extern, .detail_content a[target=\"_blank\"], .detail__content a[target=\"_blank\"]",
            ),
            content_selector: selector(".detail_content, .detail__content, .detailseite"),
            projects_selector: selector("a[href*=\"ergebnisse\"], a[href*=\"Ergebnisse\"]"),
        }
    }

    /// Maps every recognizable label/value pair of a detail page.
    pub fn parse_detail(&self, html: &str) -> PageDetails {
        let document = Html::parse_document(html);
        let mut details = PageDetails {
            title: self.page_title(&document),
            ..Default::default()
        };

        for (label, value) in self.label_pairs(&document) {
            if value.is_empty() {
                continue;
            }
            match self.labels.resolve(&label) {
                Some(field) => {
                    details.fields.entry(field).or_insert(value);
                }
                None => {
                    details.extra.entry(label).or_insert(value);
                }
            }
        }

        details.body = self.body_text(&document);
        details.website = self.website(&document);
        details.contact_email = self.contact_email(&document, &details);
        details.projects_url = document
            .select(&self.projects_selector)
            .filter_map(|a| a.value().attr("href"))
            .find_map(|href| self.absolutize(href));
        details
    }

    fn page_title(&self, document: &Html) -> String {
        if let Some(h1) = document.select(&self.h1_selector).next() {
            let text = collapse_whitespace(&h1.text().collect::<String>());
            if !text.is_empty() {
                return text;
            }
        }
        document
            .select(&self.title_selector)
            .next()
            .map(|t| {
                collapse_whitespace(&t.text().collect::<String>())
                    .replace("DFG - GEPRIS - ", "")
                    .trim()
                    .to_string()
            })
            .unwrap_or_default()
    }

    /// `span.name` labels with their trailing sibling text, then `<dl>` pairs.
    fn label_pairs(&self, document: &Html) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for span in document.select(&self.name_selector) {
            let label = collapse_whitespace(&span.text().collect::<String>());
            let label = label.trim_end_matches(':').trim().to_string();
            if label.is_empty() {
                continue;
            }
            pairs.push((label, sibling_text(span)));
        }
        for dl in document.select(&self.dl_selector) {
            let dts = dl.select(&self.dt_selector);
            let dds = dl.select(&self.dd_selector);
            for (dt, dd) in dts.zip(dds) {
                let label = collapse_whitespace(&dt.text().collect::<String>());
                let label = label.trim_end_matches(':').trim().to_string();
                let value = collapse_whitespace(&dd.text().collect::<Vec<_>>().join(" "));
                if !label.is_empty() {
                    pairs.push((label, value));
                }
            }
        }
        pairs
    }

    fn body_text(&self, document: &Html) -> String {
        for container in document.select(&self.body_selector) {
            let text = collapse_whitespace(&container.text().collect::<Vec<_>>().join(" "));
            if !text.is_empty() {
                return text;
            }
        }
        document
            .select(&self.paragraph_selector)
            .map(|p| collapse_whitespace(&p.text().collect::<Vec<_>>().join(" ")))
            .find(|text| {
                text.chars().count() > self.min_paragraph_chars
                    && !METADATA_PREFIXES.iter().any(|prefix| text.starts_with(prefix))
            })
            .unwrap_or_default()
    }

    fn website(&self, document: &Html) -> Option<String> {
        // 1. link next to a "Webseite"/"Homepage" label
        for span in document.select(&self.name_selector) {
            let label = span.text().collect::<String>();
            if !(label.contains("Webseite") || label.contains("Homepage")) {
                continue;
            }
            let parent = span.parent().and_then(ElementRef::wrap);
            if let Some(parent) = parent {
                let found = parent
                    .select(&self.link_selector)
                    .filter_map(|a| a.value().attr("href"))
                    .find(|href| is_external(href));
                if let Some(href) = found {
                    return Some(href.to_string());
                }
            }
        }
        // 2. explicitly external links
        let external = document
            .select(&self.extern_selector)
            .filter_map(|a| a.value().attr("href"))
            .find(|href| href.starts_with("http") && is_external(href));
        if let Some(href) = external {
            return Some(href.to_string());
        }
        // 3. any outbound link in the content area
        let content = document.select(&self.content_selector).next()?;
        content
            .select(&self.link_selector)
            .filter_map(|a| a.value().attr("href"))
            .find(|href| href.starts_with("http") && is_external(href) && !href.contains("dfg.de/foerderung"))
            .map(str::to_string)
    }

    fn contact_email(&self, document: &Html, details: &PageDetails) -> Option<String> {
        if let Some(value) = details.fields.get(&Field::ContactEmail) {
            if let Some(email) = self.extract_emails(value).into_iter().next() {
                return Some(email);
            }
        }
        document
            .select(&self.link_selector)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| href.strip_prefix("mailto:"))
            .flat_map(|addr| self.extract_emails(addr))
            .next()
    }

    pub fn extract_emails(&self, text: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut emails = Vec::new();
        for m in self.email_regex.find_iter(text) {
            let email = m.as_str().to_lowercase();
            let is_image = [".png", ".jpg", ".jpeg", ".gif", ".webp"]
                .iter()
                .any(|ext| email.ends_with(ext));
            if !is_image && seen.insert(email.clone()) {
                emails.push(email);
            }
        }
        emails
    }

    fn absolutize(&self, href: &str) -> Option<String> {
        self.base_url.join(href).ok().map(|u| u.to_string())
    }

    /// Fetches and maps one project. Fetch failures are kept on the record.
    pub fn extract_project<F: PageFetcher + ?Sized>(
        &self,
        fetcher: &mut F,
        reference: &ProjectRef,
    ) -> ProjectRecord {
        let mut record = ProjectRecord::from_ref(reference);
        match fetcher.fetch(&reference.url) {
            Ok(html) => {
                let details = self.parse_detail(&html);
                apply_to_project(&mut record, details);
            }
            Err(e) => {
                warn!("Error scraping project {}: {}", reference.id, e);
                record.error = Some(e.to_string());
            }
        }
        record
    }

    /// Enriches `program` from its detail page, recording failures inline.
    pub fn enrich_program<F: PageFetcher + ?Sized>(&self, fetcher: &mut F, program: &mut Program) {
        if program.url.is_empty() {
            debug!("[{}] No detail URL; skipping enrichment.", program.id);
            return;
        }
        match fetcher.fetch(&program.url) {
            Ok(html) => apply_to_program(program, self.parse_detail(&html)),
            Err(e) => {
                warn!("[{}] Error: {}", program.id, e);
                program.error = Some(e.to_string());
            }
        }
    }
}

fn is_external(href: &str) -> bool {
    !href.contains("gepris.dfg.de") && !href.contains("dfg.de/gepris")
}

/// Text of every node after `el` within its parent.
fn sibling_text(el: ElementRef) -> String {
    let mut value = String::new();
    for node in el.next_siblings() {
        if let Some(text) = node.value().as_text() {
            value.push_str(text);
        } else if let Some(child) = ElementRef::wrap(node) {
            value.push(' ');
            value.push_str(&child.text().collect::<Vec<_>>().join(" "));
            value.push(' ');
        }
    }
    collapse_whitespace(&value)
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

pub fn apply_to_project(record: &mut ProjectRecord, details: PageDetails) {
    if !details.title.is_empty() {
        record.title = details.title.clone();
    }
    record.abstract_text = details.body.clone();
    record.investigators = details.field(Field::Investigators);
    record.funding_period = details.field(Field::FundingPeriod);
    record.classification = non_empty(details.field(Field::Classification))
        .unwrap_or_else(|| details.field(Field::SubjectArea));
    record.keywords = split_keywords(&details.field(Field::Keywords));
    record.coordinator_name = non_empty(details.field(Field::CoordinatorName));
    record.extra = details.extra;
}

pub fn apply_to_program(program: &mut Program, details: PageDetails) {
    let set = |target: &mut String, value: String| {
        if !value.is_empty() {
            *target = value;
        }
    };
    set(&mut program.coordinator_name, details.field(Field::CoordinatorName));
    set(&mut program.funding_type, details.field(Field::FundingType));
    set(&mut program.funding_period, details.field(Field::FundingPeriod));
    set(&mut program.subject_area, details.field(Field::SubjectArea));
    set(&mut program.international_partners, details.field(Field::InternationalPartners));
    // a plain-text label value counts only when it is itself an address
    if let Some(url) = as_web_url(&details.field(Field::Website)) {
        program.website = url;
    }
    if let Some(website) = details.website {
        program.website = website;
    }
    if let Some(email) = details.contact_email {
        program.contact_email = email;
    }
    if let Some(url) = details.projects_url {
        program.projects_url = url;
    }
    program.description = details.body.chars().take(500).collect();
    program.full_description = details.body;
    program.extra = details.extra;
}

fn as_web_url(value: &str) -> Option<String> {
    Url::parse(value.trim())
        .ok()
        .filter(|u| matches!(u.scheme(), "http" | "https"))
        .map(|u| u.to_string())
}

pub fn split_keywords(value: &str) -> Vec<String> {
    value
        .split(|c| c == ',' || c == ';')
        .map(str::trim)
        .filter(|kw| !kw.is_empty())
        .map(str::to_string)
        .collect()
}
