pub mod members;

use serde::Deserialize;
use tracing::debug;

use crate::db::{EntryKind, IndexEntry};
use crate::render::RenderedPage;

/// Which path check wins when a page sits under both the manual and a constants directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KindPrecedence {
    #[default]
    ManualFirst,
    ConstantsFirst,
}

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub precedence: KindPrecedence,
    pub manual_segment: String,
    pub constants_segment: String,
    /// Heading texts that stand in for the real page name (e.g. `[name]`).
    pub placeholders: Vec<String>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            precedence: KindPrecedence::ManualFirst,
            manual_segment: "manual".into(),
            constants_segment: "constants".into(),
            placeholders: vec!["[name]".into()],
        }
    }
}

/// Top-level entry for the page followed by its members in document order.
pub fn extract(page_id: &str, page: &RenderedPage, opts: &ExtractOptions) -> Vec<IndexEntry> {
    let module = module_name(page_id, page.heading.as_deref(), opts);
    let mut entries = vec![IndexEntry {
        name: module.clone(),
        kind: page_kind(page_id, opts),
        path: page_id.to_string(),
    }];

    let mut dropped = 0usize;
    for el in page.member_candidates() {
        let Some(m) = members::classify(el) else {
            dropped += 1;
            continue;
        };
        let path = match &m.hash {
            Some(hash) => format!("{}#{}", page_id, hash),
            None => page_id.to_string(),
        };
        entries.push(IndexEntry {
            name: format!("{}.{}", module, m.name),
            kind: m.kind,
            path,
        });
    }

    debug!(
        "{}: {} members, {} candidates dropped",
        page_id,
        entries.len() - 1,
        dropped
    );
    entries
}

/// First-level heading, unless missing or a placeholder; then the page file stem.
pub fn module_name(page_id: &str, heading: Option<&str>, opts: &ExtractOptions) -> String {
    match heading.map(str::trim) {
        Some(h) if !h.is_empty() && !opts.placeholders.iter().any(|p| p == h) => h.to_string(),
        _ => {
            let file = page_id.rsplit('/').next().unwrap_or(page_id);
            let file = file.split(['#', '?']).next().unwrap_or(file);
            match file.rsplit_once('.') {
                Some((stem, _)) if !stem.is_empty() => stem.to_string(),
                _ => file.to_string(),
            }
        }
    }
}

/// Kind of the page's own entry, decided by path shape alone.
pub fn page_kind(page_id: &str, opts: &ExtractOptions) -> EntryKind {
    let segments: Vec<&str> = page_id.split('/').collect();
    let dirs = &segments[..segments.len().saturating_sub(1)];

    let manual = dirs.first().is_some_and(|s| *s == opts.manual_segment);
    let constants = dirs.iter().any(|s| *s == opts.constants_segment);

    match opts.precedence {
        KindPrecedence::ManualFirst if manual => EntryKind::Guide,
        KindPrecedence::ManualFirst if constants => EntryKind::Constant,
        KindPrecedence::ConstantsFirst if constants => EntryKind::Constant,
        KindPrecedence::ConstantsFirst if manual => EntryKind::Guide,
        _ => EntryKind::Class,
    }
}

// ── Tests ──
