use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::db::{self, CommitReport, IndexEntry};
use crate::error::{ManifestError, RenderError};
use crate::extract::{self, ExtractOptions};
use crate::manifest;
use crate::origin::LocalOrigin;
use crate::render::{self, FsSource, HttpSource, PageSource};

/// Per-page extraction results concatenated in page order. No dedup here.
#[derive(Debug, Default)]
pub struct IndexAccumulator {
    entries: Vec<IndexEntry>,
    pages_ok: usize,
    pages_failed: usize,
}

impl IndexAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_page(&mut self, page: &str, result: Result<Vec<IndexEntry>, RenderError>) {
        match result {
            Ok(entries) => {
                debug!("{}: {} entries", page, entries.len());
                self.pages_ok += 1;
                self.entries.extend(entries);
            }
            Err(e) => {
                warn!("Skipping {}", e);
                self.pages_failed += 1;
            }
        }
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn pages_failed(&self) -> usize {
        self.pages_failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub pages: usize,
    pub pages_failed: usize,
    pub entries: usize,
    pub commit: CommitReport,
}

// ── Driver ──

/// List, render, extract and commit. The local origin (when used) lives for the whole run.
pub async fn run(settings: &Settings) -> Result<RunSummary> {
    let origin = if settings.direct_fs || settings.origin.is_some() {
        None
    } else {
        Some(LocalOrigin::start(&settings.docs_root, settings.port).await?)
    };

    let result = index_pages(settings, origin.as_ref().map(LocalOrigin::url)).await;

    if let Some(origin) = origin {
        if let Err(e) = origin.shutdown().await {
            warn!("{:#}", e);
        }
    }
    result
}

pub fn list_pages(settings: &Settings) -> Result<Vec<String>, ManifestError> {
    if let Some(dir) = &settings.scan_dir {
        return manifest::list_from_dir(&settings.docs_root, dir);
    }

    let mut pages = Vec::new();
    for tree in &settings.trees {
        pages.extend(manifest::list_from_file(
            &settings.manifest_path(tree),
            tree.pointer.as_deref(),
            tree.prefix.as_deref(),
        )?);
    }
    Ok(pages)
}

async fn index_pages(settings: &Settings, local_origin: Option<&str>) -> Result<RunSummary> {
    let pages = list_pages(settings).context("Failed to list pages")?;
    if pages.is_empty() {
        warn!("No pages listed; the index will be empty");
    }
    let pages = pages.as_slice();
    let conn = db::connect(&settings.index_path)?;

    let opts = settings.extract_options();
    let timeout = settings.page_timeout();
    let concurrency = settings.concurrency();
    let pb = progress_bar(pages.len())?;

    let acc = if settings.direct_fs {
        let source = FsSource::new(&settings.docs_root);
        info!("Reading {} pages from {}", pages.len(), settings.docs_root.display());
        collect_entries(&source, pages, &opts, timeout, concurrency, &pb).await?
    } else {
        let origin = local_origin
            .or(settings.origin.as_deref())
            .context("No page origin configured")?;
        let source = HttpSource::new(origin, timeout)?;
        info!("Fetching {} pages from {}", pages.len(), source.base());
        collect_entries(&source, pages, &opts, timeout, concurrency, &pb).await?
    };
    pb.finish_and_clear();

    commit(&conn, pages.len(), acc)
}

fn progress_bar(len: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );
    Ok(pb)
}

/// Render and extract every page, `concurrency` pages at a time.
///
/// Fetches in a chunk run concurrently. Parsing and extraction run on the rayon pool
/// from a blocking task, so the runtime (and the local origin on it) keeps serving.
/// Each parsed document is dropped inside its worker before the next chunk starts.
pub async fn collect_entries<S: PageSource>(
    source: &S,
    pages: &[String],
    opts: &ExtractOptions,
    timeout: Duration,
    concurrency: usize,
    pb: &ProgressBar,
) -> Result<IndexAccumulator> {
    let mut acc = IndexAccumulator::new();
    let opts = Arc::new(opts.clone());

    for chunk in pages.chunks(concurrency.max(1)) {
        let fetched: Vec<Result<String, RenderError>> = stream::iter(chunk)
            .map(|page| fetch_page(source, page, timeout))
            .buffered(concurrency.max(1))
            .collect()
            .await;

        let owned = chunk.to_vec();
        let opts = Arc::clone(&opts);
        let results = tokio::task::spawn_blocking(move || parse_chunk(&owned, fetched, &opts))
            .await
            .context("Page worker task failed")?;

        for (page, result) in chunk.iter().zip(results) {
            acc.add_page(page, result);
            pb.inc(1);
        }
    }

    Ok(acc)
}

fn parse_chunk(
    pages: &[String],
    fetched: Vec<Result<String, RenderError>>,
    opts: &ExtractOptions,
) -> Vec<Result<Vec<IndexEntry>, RenderError>> {
    pages
        .par_iter()
        .zip(fetched)
        .map(|(page, markup)| -> Result<Vec<IndexEntry>, RenderError> {
            let rendered = render::render(page, &markup?)?;
            debug!("{}: title {:?}", page, rendered.title);
            Ok(extract::extract(page, &rendered, opts))
        })
        .collect()
}

async fn fetch_page<S: PageSource>(
    source: &S,
    page: &str,
    timeout: Duration,
) -> Result<String, RenderError> {
    match tokio::time::timeout(timeout, source.fetch(page)).await {
        Ok(result) => result,
        Err(_) => Err(RenderError::Timeout {
            page: page.to_string(),
            timeout,
        }),
    }
}

fn commit(conn: &Connection, pages: usize, acc: IndexAccumulator) -> Result<RunSummary> {
    let entries = acc.entries();
    let commit = db::save_entries(conn, entries)
        .with_context(|| format!("Failed to commit {} entries", entries.len()))?;

    info!(
        "Indexed {} of {} pages ({} failed): {} entries, {} rows",
        acc.pages_ok,
        pages,
        acc.pages_failed(),
        entries.len(),
        commit.inserted
    );
    Ok(RunSummary {
        pages,
        pages_failed: acc.pages_failed(),
        entries: entries.len(),
        commit,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::config::TreeSettings;
    use crate::db::EntryKind;
    use crate::error::StoreError;

    struct FakeSource {
        pages: HashMap<String, String>,
        slow: HashSet<String>,
    }

    impl FakeSource {
        fn new(pages: &[(&str, String)]) -> Self {
            Self {
                pages: pages
                    .iter()
                    .map(|(p, html)| (p.to_string(), html.clone()))
                    .collect(),
                slow: HashSet::new(),
            }
        }
    }

    impl PageSource for FakeSource {
        async fn fetch(&self, page: &str) -> Result<String, RenderError> {
            if self.slow.contains(page) {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            self.pages.get(page).cloned().ok_or(RenderError::Status {
                url: page.to_string(),
                status: 404,
            })
        }
    }

    fn class_page(name: &str) -> String {
        format!(
            "<body><h1>{name}</h1><h2>Properties</h2><h3>[property:Float width]</h3>\
             <h2>Methods</h2><h3>[method:this scale]( [param:Float s] )</h3></body>"
        )
    }

    fn five_pages() -> (Vec<String>, FakeSource) {
        let ids: Vec<String> = (1..=5).map(|i| format!("api/Page{i}.html")).collect();
        let fake = FakeSource::new(
            &ids.iter()
                .enumerate()
                .filter(|(i, _)| *i != 2)
                .map(|(i, id)| (id.as_str(), class_page(&format!("Page{}", i + 1))))
                .collect::<Vec<_>>(),
        );
        (ids, fake)
    }

    async fn collect(source: &FakeSource, pages: &[String], concurrency: usize) -> IndexAccumulator {
        collect_entries(
            source,
            pages,
            &ExtractOptions::default(),
            Duration::from_millis(200),
            concurrency,
            &ProgressBar::hidden(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn failed_page_contributes_nothing() {
        let (ids, fake) = five_pages();
        let acc = collect(&fake, &ids, 2).await;
        assert_eq!(acc.pages_failed(), 1);
        assert_eq!(acc.entries().len(), 4 * 3);
        assert!(acc.entries().iter().all(|e| !e.path.starts_with("api/Page3.html")));

        let conn = Connection::open_in_memory().unwrap();
        let summary = commit(&conn, ids.len(), acc).unwrap();
        assert_eq!(summary.pages, 5);
        assert_eq!(summary.pages_failed, 1);
        assert_eq!(summary.commit.inserted, 12);
    }

    #[tokio::test]
    async fn entries_keep_page_then_document_order() {
        let (ids, fake) = five_pages();
        let acc = collect(&fake, &ids, 3).await;
        let first: Vec<_> = acc
            .entries()
            .iter()
            .take(4)
            .map(|e| (e.name.as_str(), e.kind, e.path.as_str()))
            .collect();
        assert_eq!(
            first,
            vec![
                ("Page1", EntryKind::Class, "api/Page1.html"),
                ("Page1.width", EntryKind::Property, "api/Page1.html#width"),
                ("Page1.scale", EntryKind::Method, "api/Page1.html#scale"),
                ("Page2", EntryKind::Class, "api/Page2.html"),
            ]
        );
        let tops: Vec<_> = acc
            .entries()
            .iter()
            .filter(|e| e.kind == EntryKind::Class)
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(tops, vec!["Page1", "Page2", "Page4", "Page5"]);
    }

    #[tokio::test]
    async fn slow_page_times_out() {
        let (ids, mut fake) = five_pages();
        fake.slow.insert("api/Page1.html".to_string());
        let acc = collect(&fake, &ids[..2], 2).await;
        assert_eq!(acc.pages_failed(), 1);
        assert_eq!(acc.entries()[0].name, "Page2");
    }

    #[tokio::test]
    async fn duplicate_pages_collapse_in_store() {
        let fake = FakeSource::new(&[("api/Mesh.html", class_page("Mesh"))]);
        let ids = vec!["api/Mesh.html".to_string(), "api/Mesh.html".to_string()];
        let acc = collect(&fake, &ids, 1).await;
        assert_eq!(acc.entries().len(), 6);

        let conn = Connection::open_in_memory().unwrap();
        let summary = commit(&conn, ids.len(), acc).unwrap();
        assert_eq!(summary.commit.inserted, 3);
        assert_eq!(summary.commit.ignored, 3);
    }

    #[tokio::test]
    async fn parsing_leaves_the_runtime_free() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let heartbeat = tokio::spawn({
            let ticks = Arc::clone(&ticks);
            async move {
                loop {
                    ticks.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
        });

        let members: String = (0..2000)
            .map(|i| format!("<h3>[method:void m{i}]</h3>"))
            .collect();
        let fake = FakeSource::new(&[(
            "api/Big.html",
            format!("<body><h1>Big</h1><h2>Methods</h2>{members}</body>"),
        )]);
        let acc = collect(&fake, &["api/Big.html".to_string()], 1).await;
        heartbeat.abort();

        assert_eq!(acc.entries().len(), 2001);
        assert!(ticks.load(Ordering::SeqCst) > 0);
    }

    fn write_docs(root: &Path) {
        std::fs::create_dir_all(root.join("api/en/constants")).unwrap();
        std::fs::create_dir_all(root.join("manual/en")).unwrap();
        std::fs::write(root.join("api/en/Mesh.html"), class_page("[name]")).unwrap();
        std::fs::write(
            root.join("api/en/constants/Textures.html"),
            "<body><h1>Texture Constants</h1></body>",
        )
        .unwrap();
        std::fs::write(root.join("manual/en/Intro.html"), "<body><h1>Intro</h1></body>").unwrap();
        std::fs::write(
            root.join("list.json"),
            r#"{ "en": { "Reference": { "Objects": { "Mesh": "api/en/Mesh", "Gone": "api/en/Gone" },
                 "Constants": { "Textures": "api/en/constants/Textures" } } } }"#,
        )
        .unwrap();
        std::fs::write(root.join("manual.json"), r#"{ "Getting Started": { "Intro": "en/Intro" } }"#).unwrap();
    }

    fn settings_for(dir: &Path) -> Settings {
        Settings {
            docs_root: dir.join("Documents"),
            index_path: dir.join("docSet.dsidx"),
            trees: vec![
                TreeSettings {
                    manifest: "list.json".into(),
                    pointer: Some("/en".into()),
                    prefix: None,
                },
                TreeSettings {
                    manifest: "manual.json".into(),
                    pointer: None,
                    prefix: Some("manual".into()),
                },
            ],
            page_timeout_secs: 5,
            ..Settings::default()
        }
    }

    fn stored_rows(path: &Path) -> Vec<(i64, String, String, String)> {
        let conn = Connection::open(path).unwrap();
        let mut stmt = conn
            .prepare("SELECT id, name, type, path FROM searchIndex ORDER BY id")
            .unwrap();
        stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[tokio::test]
    async fn end_to_end_through_local_origin() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_for(dir.path());
        write_docs(&settings.docs_root);

        let summary = run(&settings).await.unwrap();
        assert_eq!(summary.pages, 4);
        assert_eq!(summary.pages_failed, 1);
        assert_eq!(summary.entries, 5);

        let rows = stored_rows(&settings.index_path);
        let triples: Vec<_> = rows.iter().map(|(_, n, t, p)| (n.as_str(), t.as_str(), p.as_str())).collect();
        assert_eq!(
            triples,
            vec![
                ("Mesh", "Class", "api/en/Mesh.html"),
                ("Mesh.width", "Property", "api/en/Mesh.html#width"),
                ("Mesh.scale", "Method", "api/en/Mesh.html#scale"),
                ("Texture Constants", "Constant", "api/en/constants/Textures.html"),
                ("Intro", "Guide", "manual/en/Intro.html"),
            ]
        );
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            direct_fs: true,
            ..settings_for(dir.path())
        };
        write_docs(&settings.docs_root);

        let first = run(&settings).await.unwrap();
        let rows = stored_rows(&settings.index_path);
        let second = run(&settings).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(stored_rows(&settings.index_path), rows);
    }

    #[tokio::test]
    async fn manifest_error_aborts_before_indexing() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_for(dir.path());
        std::fs::create_dir_all(&settings.docs_root).unwrap();

        assert!(run(&settings).await.is_err());
        assert!(!settings.index_path.exists());
    }

    #[tokio::test]
    async fn store_failure_fails_run_and_stops_origin() {
        let dir = tempfile::tempdir().unwrap();
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let settings = Settings {
            port,
            ..settings_for(dir.path())
        };
        write_docs(&settings.docs_root);
        // DROP TABLE refuses to drop a view of the same name
        Connection::open(&settings.index_path)
            .unwrap()
            .execute_batch("CREATE VIEW searchIndex AS SELECT 1 AS name;")
            .unwrap();

        let err = run(&settings).await.unwrap_err();
        assert!(
            err.chain()
                .any(|e| matches!(e.downcast_ref::<StoreError>(), Some(StoreError::Schema(_)))),
            "got {err:#}"
        );
        assert!(tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_err());
    }

    #[test]
    fn scan_dir_replaces_manifests() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            scan_dir: Some("api".into()),
            ..settings_for(dir.path())
        };
        write_docs(&settings.docs_root);
        assert_eq!(
            list_pages(&settings).unwrap(),
            vec!["api/en/Mesh.html", "api/en/constants/Textures.html"]
        );
    }
}
