use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::error::RenderError;

static TITLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());
static H1_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").unwrap());
static CANDIDATE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h3, a[id], .dashAnchor[id]").unwrap());

// ── Sources ──

/// Where page markup comes from.
#[allow(async_fn_in_trait)]
pub trait PageSource {
    async fn fetch(&self, page: &str) -> Result<String, RenderError>;
}

/// Fetches pages over HTTP from a serving origin.
pub struct HttpSource {
    client: reqwest::Client,
    base: Url,
}

impl HttpSource {
    pub fn new(origin: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base = if origin.ends_with('/') {
            Url::parse(origin)?
        } else {
            Url::parse(&format!("{}/", origin))?
        };
        let mut builder = reqwest::Client::builder().timeout(timeout);
        if matches!(base.host_str(), Some("127.0.0.1" | "localhost" | "[::1]")) {
            builder = builder.no_proxy();
        }
        let client = builder.build()?;
        Ok(Self { client, base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }
}

impl PageSource for HttpSource {
    async fn fetch(&self, page: &str) -> Result<String, RenderError> {
        let url = self.base.join(page).map_err(|e| RenderError::InvalidUrl {
            page: page.to_string(),
            reason: e.to_string(),
        })?;
        let http_err = |source| RenderError::Http {
            url: url.to_string(),
            source,
        };

        let resp = self.client.get(url.clone()).send().await.map_err(http_err)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RenderError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        resp.text().await.map_err(http_err)
    }
}

/// Reads pages straight from the docs root.
pub struct FsSource {
    root: PathBuf,
}

impl FsSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl PageSource for FsSource {
    async fn fetch(&self, page: &str) -> Result<String, RenderError> {
        let path = self.root.join(page);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| RenderError::Io { path, source })?;
        // Decoded the same way as HTTP bodies: invalid bytes become U+FFFD
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

// ── Rendering ──

/// A parsed page. Owned by one extraction and dropped right after it.
pub struct RenderedPage {
    pub title: Option<String>,
    pub heading: Option<String>,
    pub document: Html,
}

/// Parse fetched markup into a queryable document.
pub fn render(page: &str, markup: &str) -> Result<RenderedPage, RenderError> {
    if markup.trim().is_empty() {
        return Err(RenderError::Empty {
            page: page.to_string(),
        });
    }

    let document = Html::parse_document(markup);
    if !document.errors.is_empty() {
        debug!("{}: {} markup errors recovered", page, document.errors.len());
    }

    let title = first_text(&document, &TITLE_SEL);
    let heading = first_text(&document, &H1_SEL);
    Ok(RenderedPage {
        title,
        heading,
        document,
    })
}

impl RenderedPage {
    /// Every `h3` plus every anchor-id element (`a[id]`, `.dashAnchor[id]`), in document order.
    pub fn member_candidates(&self) -> impl Iterator<Item = ElementRef<'_>> {
        self.document.select(&CANDIDATE_SEL)
    }
}

pub fn is_anchor(el: ElementRef<'_>) -> bool {
    let e = el.value();
    e.attr("id").is_some() && (e.name() == "a" || e.classes().any(|c| c == "dashAnchor"))
}

/// Whitespace-collapsed text content of an element.
pub fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(|t| t.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_text(doc: &Html, sel: &Selector) -> Option<String> {
    doc.select(sel)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
}
