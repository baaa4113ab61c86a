use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::extract::{ExtractOptions, KindPrecedence};

/// Looked up as `docset.toml` (or any format `config` understands) in the working directory.
const DEFAULT_CONFIG: &str = "docset";
const MAX_CONCURRENCY: usize = 16;

/// One manifest tree, e.g. the API reference or the manual.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TreeSettings {
    /// Relative paths resolve against `docs_root`.
    pub manifest: PathBuf,
    /// JSON pointer to the page tree inside the manifest (e.g. `/en`).
    #[serde(default)]
    pub pointer: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub docs_root: PathBuf,
    pub index_path: PathBuf,
    pub trees: Vec<TreeSettings>,
    /// List pages by scanning this directory (relative to `docs_root`) instead of manifests.
    pub scan_dir: Option<PathBuf>,
    /// Serve pages from an already running origin instead of starting one.
    pub origin: Option<String>,
    /// Read pages from disk, bypassing HTTP entirely.
    pub direct_fs: bool,
    /// Port for the local origin; 0 picks a free one.
    pub port: u16,
    pub page_timeout_secs: u64,
    pub concurrency: usize,
    pub precedence: KindPrecedence,
    pub placeholders: Vec<String>,
    pub manual_segment: String,
    pub constants_segment: String,
}

impl Default for Settings {
    fn default() -> Self {
        let extract = ExtractOptions::default();
        Self {
            docs_root: PathBuf::from("threejs.docset/Contents/Resources/Documents"),
            index_path: PathBuf::from("threejs.docset/Contents/Resources/docSet.dsidx"),
            trees: vec![TreeSettings {
                manifest: PathBuf::from("list.json"),
                pointer: None,
                prefix: None,
            }],
            scan_dir: None,
            origin: None,
            direct_fs: false,
            port: 0,
            page_timeout_secs: 30,
            concurrency: 4,
            precedence: extract.precedence,
            placeholders: extract.placeholders,
            manual_segment: extract.manual_segment,
            constants_segment: extract.constants_segment,
        }
    }
}

/// Defaults, then the config file, then `DOCSET_*` environment variables.
pub fn load(path: Option<&Path>) -> Result<Settings> {
    let file = match path {
        Some(p) => File::from(p).required(true),
        None => File::with_name(DEFAULT_CONFIG).required(false),
    };

    let settings: Settings = Config::builder()
        .add_source(file)
        .add_source(Environment::with_prefix("DOCSET").try_parsing(true))
        .build()
        .context("Failed to load configuration")?
        .try_deserialize()
        .context("Invalid configuration")?;
    Ok(settings)
}

impl Settings {
    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            precedence: self.precedence,
            manual_segment: self.manual_segment.clone(),
            constants_segment: self.constants_segment.clone(),
            placeholders: self.placeholders.clone(),
        }
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs.max(1))
    }

    /// Pages in flight at once, kept to a small fixed bound.
    pub fn concurrency(&self) -> usize {
        self.concurrency.clamp(1, MAX_CONCURRENCY)
    }

    pub fn manifest_path(&self, tree: &TreeSettings) -> PathBuf {
        if tree.manifest.is_absolute() {
            tree.manifest.clone()
        } else {
            self.docs_root.join(&tree.manifest)
        }
    }
}
