use std::sync::LazyLock;

use regex::Regex;
use scraper::ElementRef;

use crate::db::EntryKind;
use crate::render::{element_text, is_anchor};

/// `[property:Type name]` / `[method:ReturnType name]` as written in `h3` headings.
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[(property|method):([^\]]*)\]").unwrap());
static PROPERTY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)propert").unwrap());
static METHOD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)method").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub name: String,
    pub kind: EntryKind,
    pub hash: Option<String>,
}

/// Classify one candidate element (an `h3` or an anchor-id element).
///
/// Returns `None` for anything that cannot be tied to a properties/methods section.
pub fn classify(el: ElementRef<'_>) -> Option<Member> {
    if el.value().name() == "h3" {
        let text = element_text(el);
        if let Some(member) = tagged(&text) {
            return Some(member);
        }
        // The wrapped anchor is its own candidate
        if el.descendants().skip(1).filter_map(ElementRef::wrap).any(is_anchor) {
            return None;
        }
        return by_section(el, text);
    }

    if inside_tagged_heading(el) {
        return None;
    }
    by_section(el, element_text(el))
}

/// New layout: the heading text carries its own kind tag.
pub fn tagged(text: &str) -> Option<Member> {
    let caps = TAG_RE.captures(text)?;
    let kind = if caps[1].eq_ignore_ascii_case("property") {
        EntryKind::Property
    } else {
        EntryKind::Method
    };

    let name: String = caps[2]
        .split_whitespace()
        .last()?
        .chars()
        .filter(|c| !matches!(c, '(' | ')' | '[' | ']'))
        .collect();
    if name.is_empty() {
        return None;
    }

    Some(Member {
        hash: Some(name.clone()),
        name,
        kind,
    })
}

/// Legacy layout: kind comes from the closest `h2` before the element's top-level container.
fn by_section(el: ElementRef<'_>, name: String) -> Option<Member> {
    if name.is_empty() {
        return None;
    }
    let kind = section_kind(el)?;
    Some(Member {
        name,
        kind,
        hash: el.value().attr("id").map(str::to_string),
    })
}

fn section_kind(el: ElementRef<'_>) -> Option<EntryKind> {
    let mut top = el;
    while let Some(parent) = top.parent().and_then(ElementRef::wrap) {
        if parent.value().name() == "body" {
            break;
        }
        top = parent;
    }

    let heading = std::iter::once(top)
        .chain(top.prev_siblings().filter_map(ElementRef::wrap))
        .find(|e| e.value().name() == "h2")?;
    heading_kind(&element_text(heading))
}

pub fn heading_kind(text: &str) -> Option<EntryKind> {
    if PROPERTY_RE.is_match(text) {
        Some(EntryKind::Property)
    } else if METHOD_RE.is_match(text) {
        Some(EntryKind::Method)
    } else {
        None
    }
}

fn inside_tagged_heading(el: ElementRef<'_>) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| a.value().name() == "h3")
        .is_some_and(|h| TAG_RE.is_match(&element_text(h)))
}
