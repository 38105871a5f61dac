//! Sync pipeline: fetch the library, normalize it into rows, write the data sheet.

pub mod normalize;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, ensure, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zsync_core::{non_empty, NormalizedRow};
use zsync_sheet::{ensure_workbook, read_data_annotations, replace_data_sheet};
use zsync_zotero::{
    save_fixture, LibraryConfig, LibrarySource, LibraryType, ZoteroClient, DEFAULT_API_BASE,
    MAX_PAGE_SIZE,
};

use crate::normalize::{build_row, is_bibliographic, item_key, resolve_url, sort_rows};

pub const CRATE_NAME: &str = "zsync-sync";

pub const ENV_LIBRARY_ID: &str = "ZOTERO_LIBRARY_ID";
pub const ENV_LIBRARY_TYPE: &str = "ZOTERO_LIBRARY_TYPE";
pub const ENV_API_KEY: &str = "ZOTERO_API_KEY";
pub const ENV_API_BASE: &str = "ZOTERO_API_BASE";
pub const ENV_WORKBOOK: &str = "ZSYNC_WORKBOOK";
pub const ENV_HTTP_TIMEOUT_SECS: &str = "ZSYNC_HTTP_TIMEOUT_SECS";
pub const ENV_CARRY_OVER_ANNOTATIONS: &str = "ZSYNC_CARRY_OVER_ANNOTATIONS";

#[derive(Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub library_id: String,
    #[serde(default)]
    pub library_type: LibraryType,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_workbook_path")]
    pub workbook_path: PathBuf,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default)]
    pub carry_over_annotations: bool,
}

fn default_workbook_path() -> PathBuf {
    PathBuf::from("./literature.xlsx")
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_http_timeout_secs() -> u64 {
    20
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("library_id", &self.library_id)
            .field("library_type", &self.library_type)
            .field("api_key", &"<redacted>")
            .field("workbook_path", &self.workbook_path)
            .field("api_base", &self.api_base)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("carry_over_annotations", &self.carry_over_annotations)
            .finish()
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Builds the config from `lookup`; an unrecognized library type is an error.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let library_type = match lookup(ENV_LIBRARY_TYPE) {
            Some(raw) => raw
                .parse::<LibraryType>()
                .map_err(|err| anyhow!("invalid {ENV_LIBRARY_TYPE} {raw:?}: {err}"))?,
            None => LibraryType::default(),
        };
        Ok(Self {
            library_id: lookup(ENV_LIBRARY_ID).unwrap_or_default(),
            library_type,
            api_key: lookup(ENV_API_KEY).unwrap_or_default(),
            workbook_path: lookup(ENV_WORKBOOK)
                .map(PathBuf::from)
                .unwrap_or_else(default_workbook_path),
            api_base: lookup(ENV_API_BASE).unwrap_or_else(default_api_base),
            http_timeout_secs: lookup(ENV_HTTP_TIMEOUT_SECS)
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_http_timeout_secs),
            carry_over_annotations: lookup(ENV_CARRY_OVER_ANNOTATIONS)
                .is_some_and(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True")),
        })
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing sync config")
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        match config_path {
            Some(path) => Self::from_yaml_file(path),
            None => Self::from_env(),
        }
    }

    /// Client settings for the live Zotero API; fails when credentials are missing.
    pub fn library_config(&self) -> Result<LibraryConfig> {
        ensure!(
            !self.library_id.trim().is_empty(),
            "no Zotero library id configured (set {ENV_LIBRARY_ID} or library_id)"
        );
        ensure!(
            !self.api_key.trim().is_empty(),
            "no Zotero API key configured (set {ENV_API_KEY} or api_key)"
        );
        Ok(LibraryConfig {
            library_id: self.library_id.trim().to_string(),
            library_type: self.library_type,
            api_key: self.api_key.trim().to_string(),
            api_base: self.api_base.clone(),
            timeout: Duration::from_secs(self.http_timeout_secs),
            page_size: MAX_PAGE_SIZE,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NormalizedLibrary {
    pub rows: Vec<NormalizedRow>,
    pub fetched_items: usize,
    pub skipped_items: usize,
    pub duplicate_items: usize,
    pub url_lookups: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fetched_items: usize,
    pub skipped_items: usize,
    pub duplicate_items: usize,
    pub url_lookups: usize,
    pub written_rows: usize,
    pub carried_annotations: usize,
    pub workbook_path: String,
    pub workbook_created: bool,
}

pub fn init_workbook(config: &SyncConfig) -> Result<bool> {
    let path = &config.workbook_path;
    ensure_workbook(path).with_context(|| format!("creating workbook {}", path.display()))
}

/// Fetches every item, drops attachments/notes and repeated keys, resolves
/// URLs and returns the rows sorted by first author.
pub async fn normalize_library(source: &dyn LibrarySource) -> Result<NormalizedLibrary> {
    let items = source
        .all_items()
        .await
        .with_context(|| format!("fetching items from {}", source.describe()))?;
    info!(count = items.len(), "fetched library items");

    let mut out = NormalizedLibrary {
        fetched_items: items.len(),
        ..Default::default()
    };
    let mut seen = HashSet::new();

    for item in &items {
        if !is_bibliographic(item) {
            out.skipped_items += 1;
            continue;
        }
        let key = item_key(item);
        if !seen.insert(key.to_string()) {
            warn!(key, "duplicate item key; keeping the first occurrence");
            out.duplicate_items += 1;
            continue;
        }

        let resolved = resolve_url(item, source)
            .await
            .with_context(|| format!("looking up child attachments of {key}"))?;
        if resolved.looked_up {
            out.url_lookups += 1;
        }

        let row = build_row(item, resolved.url);
        if row.year.is_none() {
            if let Some(date) = non_empty(&item.data.date) {
                debug!(key, date, "date not parseable; year left blank");
            }
        }
        out.rows.push(row);
    }

    sort_rows(&mut out.rows);
    Ok(out)
}

pub struct SyncPipeline {
    config: SyncConfig,
    source: Box<dyn LibrarySource>,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig) -> Result<Self> {
        let client = ZoteroClient::new(config.library_config()?)?;
        Ok(Self::with_source(config, Box::new(client)))
    }

    pub fn with_source(config: SyncConfig, source: Box<dyn LibrarySource>) -> Self {
        Self { config, source }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn init_workbook(&self) -> Result<bool> {
        init_workbook(&self.config)
    }

    pub async fn preview(&self) -> Result<NormalizedLibrary> {
        normalize_library(self.source.as_ref()).await
    }

    pub async fn run_once(&self) -> Result<SyncRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let workbook = &self.config.workbook_path;
        info!(
            %run_id,
            source = %self.source.describe(),
            workbook = %workbook.display(),
            "starting sync"
        );

        let workbook_created = self.init_workbook()?;
        let normalized = normalize_library(self.source.as_ref()).await?;

        let annotations = if self.config.carry_over_annotations {
            read_data_annotations(workbook)
                .with_context(|| format!("reading annotations from {}", workbook.display()))?
        } else {
            HashMap::new()
        };
        let carried_annotations = normalized
            .rows
            .iter()
            .filter(|row| annotations.contains_key(&row.key))
            .count();

        let written_rows = replace_data_sheet(workbook, &normalized.rows, &annotations)
            .with_context(|| format!("writing data sheet to {}", workbook.display()))?;

        let finished_at = Utc::now();
        info!(
            %run_id,
            written_rows,
            skipped = normalized.skipped_items,
            url_lookups = normalized.url_lookups,
            "sync finished"
        );

        Ok(SyncRunSummary {
            run_id,
            started_at,
            finished_at,
            fetched_items: normalized.fetched_items,
            skipped_items: normalized.skipped_items,
            duplicate_items: normalized.duplicate_items,
            url_lookups: normalized.url_lookups,
            written_rows,
            carried_annotations,
            workbook_path: workbook.display().to_string(),
            workbook_created,
        })
    }

    pub async fn dump(&self, out: &Path) -> Result<usize> {
        let items = self
            .source
            .all_items()
            .await
            .with_context(|| format!("fetching items from {}", self.source.describe()))?;
        save_fixture(out, &items)?;
        info!(count = items.len(), path = %out.display(), "wrote library dump");
        Ok(items.len())
    }
}
