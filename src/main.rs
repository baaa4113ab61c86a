mod config;
mod db;
mod error;
mod extract;
mod manifest;
mod origin;
mod pipeline;
mod render;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "docset_indexer", about = "Build a Dash-style search index from HTML docs")]
struct Cli {
    /// Config file (default: ./docset.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Root of the documentation pages
    #[arg(long, global = true)]
    docs_root: Option<PathBuf>,
    /// SQLite index to write or query
    #[arg(long, global = true)]
    index: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render every listed page and rebuild the index
    Run {
        /// Fetch from this origin instead of starting a local one
        #[arg(long, conflicts_with = "direct_fs")]
        origin: Option<String>,
        /// Read pages straight from disk
        #[arg(long)]
        direct_fs: bool,
        /// Pages in flight at once
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,
        /// Per-page timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Print the page list the run would process
    List,
    /// Search the index by name
    Search {
        query: String,
        /// Filter by type (Class, Guide, Constant, Property, Method)
        #[arg(short, long)]
        kind: Option<String>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "25")]
        limit: usize,
    },
    /// Entry counts per type
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let mut settings = config::load(cli.config.as_deref())?;
    if let Some(root) = cli.docs_root {
        settings.docs_root = root;
    }
    if let Some(index) = cli.index {
        settings.index_path = index;
    }

    let result = match cli.command {
        Commands::Run {
            origin,
            direct_fs,
            concurrency,
            timeout,
        } => {
            if origin.is_some() {
                settings.origin = origin;
                settings.direct_fs = false;
            }
            settings.direct_fs |= direct_fs;
            if let Some(n) = concurrency {
                settings.concurrency = n;
            }
            if let Some(secs) = timeout {
                settings.page_timeout_secs = secs;
            }

            let summary = pipeline::run(&settings).await?;
            println!(
                "Indexed {} pages ({} failed): {} entries, {} rows written, {} duplicates ignored.",
                summary.pages,
                summary.pages_failed,
                summary.entries,
                summary.commit.inserted,
                summary.commit.ignored,
            );
            println!("Index: {}", settings.index_path.display());
            Ok(())
        }
        Commands::List => {
            let pages = pipeline::list_pages(&settings)?;
            for page in &pages {
                println!("{}", page);
            }
            println!("\n{} pages", pages.len());
            Ok(())
        }
        Commands::Search { query, kind, limit } => {
            let conn = open_index(&settings)?;
            let rows = db::search(&conn, &query, kind.as_deref(), limit)?;
            if rows.is_empty() {
                println!("No entries match '{}'.", query);
                return Ok(());
            }

            println!("{:>3} | {:<40} | {:<8} | {}", "#", "Name", "Type", "Path");
            println!("{}", "-".repeat(100));
            for (i, r) in rows.iter().enumerate() {
                println!(
                    "{:>3} | {:<40} | {:<8} | {}",
                    i + 1,
                    truncate(&r.name, 40),
                    r.kind,
                    truncate(&r.path, 44)
                );
            }
            println!("\n{} entries", rows.len());
            Ok(())
        }
        Commands::Stats => {
            let conn = open_index(&settings)?;
            let counts = db::kind_counts(&conn)?;
            let total: usize = counts.iter().map(|(_, n)| n).sum();
            for (kind, n) in &counts {
                println!("{:<10} {}", format!("{}:", kind), n);
            }
            println!("{:<10} {}", "Total:", total);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// Read-side commands never create an index.
fn open_index(settings: &config::Settings) -> anyhow::Result<rusqlite::Connection> {
    let path = &settings.index_path;
    if !path.exists() {
        anyhow::bail!("No index at {}. Run 'run' first.", path.display());
    }
    db::connect(path).with_context(|| format!("Failed to open {}", path.display()))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
