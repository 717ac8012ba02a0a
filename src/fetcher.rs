use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT, ACCEPT_LANGUAGE};
use std::time::Duration;
use log::{debug, warn};
use rand::Rng;

use crate::error::{HarvestError, Result};
use crate::models::ListingRow;

/// Measured geometry of a scrollable listing container, in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrollExtent {
    pub scroll_height: u32,
    pub client_height: u32,
}

/// A rendered listing whose rows only exist while scrolled into view.
pub trait ListingViewport {
    fn extent(&mut self) -> Result<ScrollExtent>;

    fn scroll_to(&mut self, offset: u32) -> Result<()>;

    /// Rows currently materialized in the container.
    fn rendered_rows(&mut self) -> Result<Vec<ListingRow>>;

    /// Complete table data held by the widget, when the page exposes it.
    fn bulk_rows(&mut self) -> Result<Option<Vec<ListingRow>>> {
        Ok(None)
    }
}

/// Fetches rendered pages. Implementations may block for a long time.
pub trait PageFetcher {
    fn fetch(&mut self, url: &str) -> Result<String>;

    /// Opens the virtual-scroll table on `url`. Fetchers without a rendering
    /// engine cannot scroll and return `None`.
    fn open_viewport(&mut self, _url: &str) -> Result<Option<&mut dyn ListingViewport>> {
        Ok(None)
    }
}

/// Plain HTTP fetcher; sees only server-rendered markup.
pub struct HttpFetcher {
    client: Client,
}

const USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0",
];

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("de-DE,de;q=0.9,en;q=0.8"));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .cookie_store(true)
            .build()
            .map_err(|e| HarvestError::Fetch {
                url: String::new(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(HttpFetcher { client })
    }

    fn random_user_agent(&self) -> &'static str {
        let mut rng = rand::thread_rng();
        USER_AGENTS[rng.gen_range(0..USER_AGENTS.len())]
    }
}

impl PageFetcher for HttpFetcher {
    fn fetch(&mut self, url: &str) -> Result<String> {
        debug!("GET {}", url);
        let fetch_err = |e: reqwest::Error| HarvestError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        };
        let resp = self
            .client
            .get(url)
            .header(USER_AGENT, self.random_user_agent())
            .send()
            .map_err(fetch_err)?;

        let status = resp.status();
        if status.as_u16() == 403 || status.as_u16() == 429 {
            warn!("Blocked at {}: {}", url, status);
            return Err(HarvestError::Blocked { url: url.to_string(), status: status.as_u16() });
        }
        if !status.is_success() {
            return Err(HarvestError::Fetch {
                url: url.to_string(),
                reason: format!("HTTP status {}", status),
            });
        }
        resp.text().map_err(fetch_err)
    }
}
