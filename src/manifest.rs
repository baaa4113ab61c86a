use std::path::Path;

use serde_json::Value;
use tracing::info;
use walkdir::WalkDir;

use crate::error::ManifestError;

/// Read a JSON manifest and flatten the (optionally pointed-to) subtree into page identifiers.
pub fn list_from_file(
    path: &Path,
    pointer: Option<&str>,
    prefix: Option<&str>,
) -> Result<Vec<String>, ManifestError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let doc: Value = serde_json::from_str(&raw).map_err(|source| ManifestError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let root = match pointer.filter(|p| !p.is_empty()) {
        Some(p) => doc.pointer(p).ok_or_else(|| ManifestError::MissingPointer {
            pointer: p.to_string(),
        })?,
        None => &doc,
    };

    let pages = flatten(root, prefix)?;
    info!("Manifest {}: {} pages", path.display(), pages.len());
    Ok(pages)
}

/// Depth-first flatten of a nested category mapping into `<prefix>/<leaf>.html`.
///
/// Uses an explicit stack, so nesting depth is bounded by heap rather than call depth.
/// Duplicate leaves are kept.
pub fn flatten(root: &Value, prefix: Option<&str>) -> Result<Vec<String>, ManifestError> {
    if !matches!(root, Value::Object(_) | Value::Array(_)) {
        return Err(ManifestError::InvalidRoot {
            found: type_name(root),
        });
    }

    let prefix = prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty());
    let mut pages = Vec::new();
    let mut stack: Vec<(String, &Value)> = vec![(String::new(), root)];

    while let Some((at, node)) = stack.pop() {
        match node {
            // Children pushed in reverse so they pop in document order
            Value::Object(map) => {
                for (key, child) in map.iter().rev() {
                    stack.push((format!("{}/{}", at, escape_pointer(key)), child));
                }
            }
            Value::Array(items) => {
                for (i, child) in items.iter().enumerate().rev() {
                    stack.push((format!("{}/{}", at, i), child));
                }
            }
            Value::String(leaf) => pages.push(page_id(prefix, leaf)),
            other => {
                return Err(ManifestError::InvalidLeaf {
                    at: if at.is_empty() { "/".to_string() } else { at },
                    found: type_name(other),
                })
            }
        }
    }

    Ok(pages)
}

/// Collect every `.html`/`.htm` file under `root/dir`, skipping hidden entries.
/// Identifiers are relative to `root` and sorted.
pub fn list_from_dir(root: &Path, dir: &Path) -> Result<Vec<String>, ManifestError> {
    let start = root.join(dir);
    let mut pages = Vec::new();

    let walker = WalkDir::new(&start)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));

    for entry in walker {
        let entry = entry.map_err(|source| ManifestError::Walk {
            path: start.clone(),
            source,
        })?;
        if !entry.file_type().is_file() || !is_html(entry.path()) {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let id = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        pages.push(id);
    }

    info!("Scanned {}: {} pages", start.display(), pages.len());
    Ok(pages)
}

fn page_id(prefix: Option<&str>, leaf: &str) -> String {
    match prefix {
        Some(p) => format!("{}/{}.html", p, leaf.trim_start_matches('/')),
        None => format!("{}.html", leaf),
    }
}

fn is_html(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("html") || e.eq_ignore_ascii_case("htm"))
}

fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
