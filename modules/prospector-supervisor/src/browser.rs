//! Production execution context: pages are rendered by a Browserless
//! service and mined with a handful of regular expressions.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use regex::Regex;
use tracing::{debug, info};

use browserless_client::{BrowserlessClient, BrowserlessError};
use prospector_common::{keys, DetailsTask, EnrichmentTask, ProspectRow, ScrapeTask, Task};

use crate::executor::{
    ContextProvider, ExecutionError, ExecutionOutput, FieldUpdate, ResultBatch, TaskExecutor,
};

/// Per-request HTTP timeout. Task-level timeouts are enforced by the worker.
const FETCH_TIMEOUT: Duration = Duration::from_secs(120);

static RE_PLACE_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"/maps/place/([^/"?]+)/[^"]*?(ChIJ[0-9A-Za-z_-]{10,})"#).expect("valid regex")
});
static RE_PLACE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ChIJ[0-9A-Za-z_-]{10,}").expect("valid regex"));
static RE_PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+?1[\s.-])?\(?\d{3}\)?[\s.-]?\d{3}[\s.-]\d{4}\b").expect("valid regex")
});
static RE_EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid regex")
});
static RE_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid regex"));
static RE_AUTHORITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"data-item-id="authority"[^>]*href="([^"]+)""#).expect("valid regex")
});
static RE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://(?:www\.)?([A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)+)[^\s\x22'<>]*")
        .expect("valid regex")
});

/// Hosts that show up on every map page and are never a business website.
const PLATFORM_HOSTS: &[&str] = &[
    "google.com",
    "gstatic.com",
    "googleapis.com",
    "ggpht.com",
    "googleusercontent.com",
    "schema.org",
    "w3.org",
];

const IMAGE_SUFFIXES: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".webp", ".svg"];

pub struct BrowserExecutor {
    client: BrowserlessClient,
    campaign: String,
    connected: AtomicBool,
}

impl BrowserExecutor {
    pub fn new(client: BrowserlessClient, campaign: &str) -> Self {
        Self {
            client,
            campaign: campaign.to_string(),
            connected: AtomicBool::new(true),
        }
    }

    async fn fetch(&self, url: &str) -> Result<String, ExecutionError> {
        debug!(url, "Fetching page");
        self.client.content(url).await.map_err(|e| {
            if e.is_disconnect() {
                self.connected.store(false, Ordering::SeqCst);
            }
            to_execution_error(e)
        })
    }

    async fn list(&self, task: &ScrapeTask) -> Result<ExecutionOutput, ExecutionError> {
        let url = format!(
            "https://www.google.com/maps/search/{}/@{},{},{}z",
            task.search_phrase.trim().replace(' ', "+"),
            task.latitude,
            task.longitude,
            task.zoom
        );
        let html = self.fetch(&url).await?;
        let listings = extract_listings(&html);
        let mut output = ExecutionOutput::default();
        if listings.is_empty() {
            return Ok(output);
        }

        let updated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut rows = String::new();
        for (place_id, name) in &listings {
            let name = name.clone().unwrap_or_default();
            let company_slug = slugify(&name);
            rows.push_str(
                &ProspectRow {
                    place_id: place_id.clone(),
                    company_slug: company_slug.clone(),
                    name: name.clone(),
                    latitude: Some(task.latitude),
                    longitude: Some(task.longitude),
                    keyword: task.search_phrase.clone(),
                    updated_at: updated_at.clone(),
                    ..Default::default()
                }
                .to_usv(),
            );
            output.follow_ups.push(Task::GmDetails(DetailsTask {
                place_id: place_id.clone(),
                name: (!name.is_empty()).then_some(name),
                company_slug: (!company_slug.is_empty()).then_some(company_slug),
                discovery_phrase: Some(task.search_phrase.clone()),
                discovery_tile_id: task.tile_id.clone(),
                force_refresh: false,
            }));
        }
        output.results.push(ResultBatch {
            key: keys::results_key(
                &self.campaign,
                &task.latitude.to_string(),
                &task.longitude.to_string(),
                &task.search_phrase,
            ),
            rows,
        });
        Ok(output)
    }

    async fn details(&self, task: &DetailsTask) -> Result<ExecutionOutput, ExecutionError> {
        let url = format!(
            "https://www.google.com/maps/place/?q=place_id:{}",
            task.place_id
        );
        let html = self.fetch(&url).await?;
        let name = extract_title(&html)
            .or_else(|| task.name.clone())
            .ok_or_else(|| ExecutionError::Failed(format!("no name on page for {}", task.place_id)))?;
        let slug = task
            .company_slug
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| slugify(&name));
        if slug.is_empty() {
            return Err(ExecutionError::Failed(format!(
                "cannot derive a company slug from {name:?}"
            )));
        }

        let mut output = ExecutionOutput {
            entities: vec![slug.clone()],
            ..Default::default()
        };
        output.updates.push(FieldUpdate::new(&slug, "name", &name));
        output.updates.push(FieldUpdate::new(&slug, "place_id", &task.place_id));
        if let Some(phrase) = &task.discovery_phrase {
            output.updates.push(FieldUpdate::new(&slug, "keyword", phrase));
        }
        if let Some(phone) = extract_phones(&html).into_iter().next() {
            output.updates.push(FieldUpdate::new(&slug, "phone", &phone));
        }
        if let Some((website, domain)) = extract_website(&html) {
            output.updates.push(FieldUpdate::new(&slug, "website", &website));
            output.updates.push(FieldUpdate::new(&slug, "domain", &domain));
            output.follow_ups.push(Task::Enrichment(EnrichmentTask {
                domain,
                company_slug: slug,
                force_refresh: task.force_refresh,
            }));
        }
        Ok(output)
    }

    async fn enrich(&self, task: &EnrichmentTask) -> Result<ExecutionOutput, ExecutionError> {
        let domain = task.domain.trim().to_lowercase();
        let html = self.fetch(&format!("https://{domain}")).await?;
        let slug = &task.company_slug;

        let mut output = ExecutionOutput {
            entities: vec![slug.clone()],
            ..Default::default()
        };
        let emails = extract_emails(&html);
        if let Some(first) = emails.first() {
            output.updates.push(FieldUpdate::new(slug, "email", first));
            output.updates.push(FieldUpdate::new(slug, "emails", &emails.join(", ")));
        }
        if let Some(phone) = extract_phones(&html).into_iter().next() {
            output.updates.push(FieldUpdate::new(slug, "site_phone", &phone));
        }
        if let Some(title) = extract_title(&html) {
            output.updates.push(FieldUpdate::new(slug, "site_title", &title));
        }
        Ok(output)
    }
}

#[async_trait]
impl TaskExecutor for BrowserExecutor {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn execute(&self, task: &Task) -> Result<ExecutionOutput, ExecutionError> {
        match task {
            Task::GmList(t) => self.list(t).await,
            Task::GmDetails(t) => self.details(t).await,
            Task::Enrichment(t) => self.enrich(t).await,
        }
    }
}

/// Builds a fresh Browserless client and checks it answers before handing
/// it out.
pub struct BrowserProvider {
    base_url: String,
    token: Option<String>,
    campaign: String,
}

impl BrowserProvider {
    pub fn new(base_url: &str, token: Option<&str>, campaign: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            token: token.map(String::from),
            campaign: campaign.to_string(),
        }
    }
}

#[async_trait]
impl ContextProvider for BrowserProvider {
    async fn acquire(&self) -> Result<Arc<dyn TaskExecutor>, ExecutionError> {
        let client =
            BrowserlessClient::with_timeout(&self.base_url, self.token.as_deref(), FETCH_TIMEOUT)
                .map_err(to_execution_error)?;
        client.ping().await.map_err(to_execution_error)?;
        info!(url = client.base_url(), "Browserless context acquired");
        Ok(Arc::new(BrowserExecutor::new(client, &self.campaign)))
    }
}

fn to_execution_error(e: BrowserlessError) -> ExecutionError {
    if e.is_disconnect() {
        ExecutionError::Disconnected(e.to_string())
    } else {
        ExecutionError::Failed(e.to_string())
    }
}

/// Place ids on a search result page, with the name from the place link
/// when there is one. First occurrence wins.
pub fn extract_listings(html: &str) -> Vec<(String, Option<String>)> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for caps in RE_PLACE_LINK.captures_iter(html) {
        let id = caps[2].to_string();
        if seen.insert(id.clone()) {
            let name = decode_path_segment(&caps[1]);
            out.push((id, (!name.is_empty()).then_some(name)));
        }
    }
    for m in RE_PLACE_ID.find_iter(html) {
        if seen.insert(m.as_str().to_string()) {
            out.push((m.as_str().to_string(), None));
        }
    }
    out
}

pub fn extract_phones(html: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    RE_PHONE
        .find_iter(html)
        .map(|m| m.as_str().trim().to_string())
        .filter(|p| seen.insert(p.clone()))
        .collect()
}

/// Lowercased, deduplicated addresses. Image file names that happen to
/// look like addresses (`logo@2x.png`) are dropped.
pub fn extract_emails(html: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    RE_EMAIL
        .find_iter(html)
        .map(|m| m.as_str().to_lowercase())
        .filter(|e| !IMAGE_SUFFIXES.iter().any(|s| e.ends_with(s)))
        .filter(|e| seen.insert(e.clone()))
        .collect()
}

pub fn extract_title(html: &str) -> Option<String> {
    let raw = RE_TITLE.captures(html)?.get(1)?.as_str();
    let title = decode_entities(raw.trim());
    let title = title.strip_suffix(" - Google Maps").unwrap_or(title.as_str()).trim();
    (!title.is_empty() && title != "Google Maps").then(|| title.to_string())
}

/// The business website as `(url, domain)`. The page's own "authority"
/// link is preferred over the first external URL.
pub fn extract_website(html: &str) -> Option<(String, String)> {
    let authority = RE_AUTHORITY
        .captures(html)
        .and_then(|caps| RE_URL.captures(&caps[1]).map(|u| (u[0].to_string(), u[1].to_lowercase())));
    authority.or_else(|| {
        RE_URL
            .captures_iter(html)
            .map(|u| (u[0].to_string(), u[1].to_lowercase()))
            .find(|(_, domain)| !is_platform_host(domain))
    })
}

fn is_platform_host(domain: &str) -> bool {
    PLATFORM_HOSTS
        .iter()
        .any(|h| domain == *h || domain.ends_with(&format!(".{h}")))
        || domain.starts_with("google.")
}

/// Lowercase ASCII slug: runs of anything but letters and digits become a
/// single `-`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

fn decode_path_segment(raw: &str) -> String {
    raw.replace('+', " ")
        .replace("%26", "&")
        .replace("%27", "'")
        .replace("%2C", ",")
        .trim()
        .to_string()
}

fn decode_entities(raw: &str) -> String {
    raw.replace("&amp;", "&")
        .replace("&#39;", "'")
        .replace("&quot;", "\"")
}
