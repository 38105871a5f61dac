//! Zotero library sources: the live Web API client and a fixture-backed offline library.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;
use zsync_core::RawItem;

pub const CRATE_NAME: &str = "zsync-zotero";

pub const DEFAULT_API_BASE: &str = "https://api.zotero.org";
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryType {
    #[default]
    User,
    Group,
}

impl LibraryType {
    pub fn path_segment(&self) -> &'static str {
        match self {
            LibraryType::User => "users",
            LibraryType::Group => "groups",
        }
    }
}

impl FromStr for LibraryType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" | "users" => Ok(LibraryType::User),
            "group" | "groups" => Ok(LibraryType::Group),
            other => Err(format!("unknown library type `{other}` (expected user or group)")),
        }
    }
}

impl fmt::Display for LibraryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LibraryType::User => f.write_str("user"),
            LibraryType::Group => f.write_str("group"),
        }
    }
}

#[derive(Clone)]
pub struct LibraryConfig {
    pub library_id: String,
    pub library_type: LibraryType,
    pub api_key: String,
    pub api_base: String,
    pub timeout: Duration,
    pub page_size: usize,
}

impl fmt::Debug for LibraryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryConfig")
            .field("library_id", &self.library_id)
            .field("library_type", &self.library_type)
            .field("api_key", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("timeout", &self.timeout)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl LibraryConfig {
    pub fn new(
        library_id: impl Into<String>,
        library_type: LibraryType,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            library_id: library_id.into(),
            library_type,
            api_key: api_key.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_secs(20),
            page_size: MAX_PAGE_SIZE,
        }
    }

    pub fn library_url(&self) -> String {
        format!(
            "{}/{}/{}",
            self.api_base.trim_end_matches('/'),
            self.library_type.path_segment(),
            self.library_id
        )
    }

    pub fn items_url(&self) -> String {
        format!("{}/items", self.library_url())
    }

    pub fn children_url(&self, parent_key: &str) -> String {
        format!("{}/items/{}/children", self.library_url(), parent_key)
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("decoding response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("fixture {path}: {message}")]
    Fixture { path: String, message: String },
}

#[async_trait]
pub trait LibrarySource: Send + Sync {
    fn describe(&self) -> String;

    async fn all_items(&self) -> Result<Vec<RawItem>, SourceError>;

    async fn child_attachments(&self, parent_key: &str) -> Result<Vec<RawItem>, SourceError>;
}

#[derive(Debug)]
pub struct ZoteroClient {
    client: reqwest::Client,
    config: LibraryConfig,
}

#[derive(Debug)]
struct ItemPage {
    items: Vec<RawItem>,
    total_results: Option<usize>,
}

impl ZoteroClient {
    pub fn new(config: LibraryConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(concat!("zsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building reqwest client")?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.config
    }

    async fn get_items(&self, url: &str, query: &[(&str, String)]) -> Result<ItemPage, SourceError> {
        let span = info_span!("zotero_get", url, ?query);
        async {
            let resp = self
                .client
                .get(url)
                .query(query)
                .header("Zotero-API-Version", "3")
                .header("Zotero-API-Key", &self.config.api_key)
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                return Err(status_error(status, url));
            }

            let total_results = resp
                .headers()
                .get("Total-Results")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<usize>().ok());
            let body = resp.bytes().await?;
            let items: Vec<RawItem> =
                serde_json::from_slice(&body).map_err(|source| SourceError::Decode {
                    url: url.to_string(),
                    source,
                })?;
            debug!(count = items.len(), ?total_results, "zotero page decoded");
            Ok::<_, SourceError>(ItemPage {
                items,
                total_results,
            })
        }
        .instrument(span)
        .await
    }
}

fn status_error(status: StatusCode, url: &str) -> SourceError {
    SourceError::HttpStatus {
        status: status.as_u16(),
        url: url.to_string(),
    }
}

#[async_trait]
impl LibrarySource for ZoteroClient {
    fn describe(&self) -> String {
        format!(
            "zotero {} library {} at {}",
            self.config.library_type, self.config.library_id, self.config.api_base
        )
    }

    async fn all_items(&self) -> Result<Vec<RawItem>, SourceError> {
        let url = self.config.items_url();
        let limit = self.config.page_size.clamp(1, MAX_PAGE_SIZE);
        let mut items = Vec::new();
        let mut start = 0usize;

        loop {
            let page = self
                .get_items(
                    &url,
                    &[
                        ("format", "json".to_string()),
                        ("limit", limit.to_string()),
                        ("start", start.to_string()),
                    ],
                )
                .await?;
            let fetched = page.items.len();
            items.extend(page.items);
            start += fetched;

            if fetched < limit {
                break;
            }
            if matches!(page.total_results, Some(total) if start >= total) {
                break;
            }
        }

        debug!(total = items.len(), "zotero library listing complete");
        Ok(items)
    }

    async fn child_attachments(&self, parent_key: &str) -> Result<Vec<RawItem>, SourceError> {
        let url = self.config.children_url(parent_key);
        let page = self
            .get_items(
                &url,
                &[
                    ("format", "json".to_string()),
                    ("itemType", "attachment".to_string()),
                    ("limit", MAX_PAGE_SIZE.to_string()),
                ],
            )
            .await?;
        Ok(page.items)
    }
}

/// Offline library read from a JSON dump; children are resolved through `parentItem`.
#[derive(Debug)]
pub struct FixtureLibrary {
    origin: String,
    items: Vec<RawItem>,
    child_lookups: AtomicUsize,
}

impl FixtureLibrary {
    pub fn from_items(items: Vec<RawItem>) -> Self {
        Self {
            origin: "<in-memory>".to_string(),
            items,
            child_lookups: AtomicUsize::new(0),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let fixture_err = |message: String| SourceError::Fixture {
            path: path.display().to_string(),
            message,
        };
        let text = fs::read_to_string(path).map_err(|e| fixture_err(e.to_string()))?;
        let items: Vec<RawItem> =
            serde_json::from_str(&text).map_err(|e| fixture_err(e.to_string()))?;
        Ok(Self {
            origin: path.display().to_string(),
            items,
            child_lookups: AtomicUsize::new(0),
        })
    }

    pub fn items(&self) -> &[RawItem] {
        &self.items
    }

    pub fn child_lookups(&self) -> usize {
        self.child_lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LibrarySource for FixtureLibrary {
    fn describe(&self) -> String {
        format!("fixture library {}", self.origin)
    }

    async fn all_items(&self) -> Result<Vec<RawItem>, SourceError> {
        Ok(self.items.clone())
    }

    async fn child_attachments(&self, parent_key: &str) -> Result<Vec<RawItem>, SourceError> {
        self.child_lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .items
            .iter()
            .filter(|item| item.is_attachment())
            .filter(|item| item.data.parent_item.as_deref() == Some(parent_key))
            .cloned()
            .collect())
    }
}

pub fn save_fixture(path: impl AsRef<Path>, items: &[RawItem]) -> anyhow::Result<PathBuf> {
    let path = path.as_ref();
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .with_context(|| format!("creating fixture directory {}", parent.display()))?;

    let bytes = serde_json::to_vec_pretty(items).context("serializing library dump")?;
    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .with_context(|| format!("opening temp dump file {}", temp_path.display()))?;
    let written = file
        .write_all(&bytes)
        .and_then(|()| file.flush())
        .with_context(|| format!("writing temp dump file {}", temp_path.display()));
    drop(file);
    if let Err(err) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }

    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(err).with_context(|| format!("renaming dump into {}", path.display()));
    }
    Ok(path.to_path_buf())
}
