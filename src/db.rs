use std::fmt;
use std::path::Path;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::StoreError;

// ── Entries ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Class,
    Guide,
    Constant,
    Property,
    Method,
}

impl EntryKind {
    /// Type name as stored in the `type` column (Dash entry types).
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::Class => "Class",
            EntryKind::Guide => "Guide",
            EntryKind::Constant => "Constant",
            EntryKind::Property => "Property",
            EntryKind::Method => "Method",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub name: String,
    pub kind: EntryKind,
    pub path: String,
}

// ── Schema ──

pub fn connect(path: &Path) -> Result<Connection, StoreError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| StoreError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    Connection::open(path).map_err(|source| StoreError::Open {
        path: path.to_path_buf(),
        source,
    })
}

/// Drop any previous index and create an empty `searchIndex`.
pub fn recreate_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        DROP TABLE IF EXISTS searchIndex;
        CREATE TABLE searchIndex (
            id   INTEGER PRIMARY KEY,
            name TEXT,
            type TEXT,
            path TEXT
        );
        CREATE UNIQUE INDEX anchor ON searchIndex (name, type, path);
        ",
    )
    .map_err(StoreError::Schema)
}

// ── Commit ──

/// Outcome of one commit: every attempted entry is either inserted or ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitReport {
    pub attempted: usize,
    pub inserted: usize,
    pub ignored: usize,
}

/// Replace the index with `entries` in a single transaction.
///
/// Rows that collide on `(name, type, path)` are ignored and counted in
/// `CommitReport::ignored`. Any other failure rolls the whole transaction back,
/// schema replacement included, so the previous index stays intact.
pub fn save_entries(conn: &Connection, entries: &[IndexEntry]) -> Result<CommitReport, StoreError> {
    let attempted = entries.len();
    let write_err = |source| StoreError::Write { attempted, source };

    let tx = conn.unchecked_transaction().map_err(write_err)?;
    recreate_schema(&tx)?;

    let mut report = CommitReport {
        attempted,
        ..Default::default()
    };
    {
        let mut stmt = tx
            .prepare("INSERT OR IGNORE INTO searchIndex (name, type, path) VALUES (?1, ?2, ?3)")
            .map_err(write_err)?;
        for e in entries {
            match stmt
                .execute(rusqlite::params![e.name, e.kind.as_str(), e.path])
                .map_err(write_err)?
            {
                0 => {
                    debug!("duplicate entry ignored: {} {} {}", e.kind, e.name, e.path);
                    report.ignored += 1;
                }
                _ => report.inserted += 1,
            }
        }
    }
    tx.commit().map_err(write_err)?;

    debug_assert_eq!(report.inserted + report.ignored, report.attempted);
    info!(
        "Committed {} entries ({} inserted, {} duplicates ignored)",
        report.attempted, report.inserted, report.ignored
    );
    Ok(report)
}

// ── Queries ──

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRow {
    pub name: String,
    pub kind: String,
    pub path: String,
}

pub fn search(
    conn: &Connection,
    query: &str,
    kind: Option<&str>,
    limit: usize,
) -> Result<Vec<SearchRow>, StoreError> {
    let mut conditions = vec!["name LIKE ?1 ESCAPE '\\'".to_string()];
    let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(like_pattern(query))];

    if let Some(k) = kind {
        conditions.push(format!("type = ?{}", params.len() + 1));
        params.push(Box::new(k.to_string()));
    }

    let sql = format!(
        "SELECT name, type, path FROM searchIndex WHERE {} ORDER BY name, type, path LIMIT {}",
        conditions.join(" AND "),
        limit
    );

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt
        .query_map(param_refs.as_slice(), |row| {
            Ok(SearchRow {
                name: row.get(0)?,
                kind: row.get(1)?,
                path: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Row count per entry type, most frequent first.
pub fn kind_counts(conn: &Connection) -> Result<Vec<(String, usize)>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT type, COUNT(*) FROM searchIndex GROUP BY type ORDER BY COUNT(*) DESC, type",
    )?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn like_pattern(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    escaped.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}
