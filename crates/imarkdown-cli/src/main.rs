use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use imarkdown_core::tree::escape_attr;
use imarkdown_core::{
    Expression, ExpressionCell, ImarkdownConfig, ImarkdownRuntime, Notebook, RecordMismatch,
    ResultRecord,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Opening delimiter for inline expressions (overrides IMARKDOWN_OPEN_DELIMITER)
    #[arg(long, global = true)]
    open: Option<String>,

    /// Closing delimiter for inline expressions (overrides IMARKDOWN_CLOSE_DELIMITER)
    #[arg(long, global = true)]
    close: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the inline expressions of every Markdown cell
    Scan {
        /// Notebook (.ipynb) or Markdown file
        path: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Render Markdown cells to HTML, restoring stored expression results
    Render {
        /// Notebook (.ipynb) or Markdown file
        path: PathBuf,

        /// Output file path (prints to stdout if not provided)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Treat the document as untrusted (no HTML results)
        #[arg(long)]
        untrusted: bool,
    },

    /// Report cells whose stored results no longer match their expressions
    Check {
        /// Notebook (.ipynb) or Markdown file
        path: PathBuf,
    },
}

/// A Markdown cell after rendering.
#[derive(Debug)]
struct RenderedCell {
    index: usize,
    id: String,
    expressions: Vec<Expression>,
    html: String,
    metadata: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct ScannedCell<'a> {
    index: usize,
    id: &'a str,
    expressions: Vec<&'a str>,
}

#[derive(Debug, PartialEq, Eq)]
enum CellStatus {
    Current,
    Missing,
    Stale(RecordMismatch),
    Invalid(String),
}

impl CellStatus {
    fn is_failure(&self) -> bool {
        matches!(self, CellStatus::Stale(_) | CellStatus::Invalid(_))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = build_config(cli.open, cli.close)?;

    match cli.command {
        Commands::Scan { path, json } => {
            let mut notebook = load_document(&path).await?;
            let cells = render_document(config, &mut notebook, true).await?;
            print!("{}", format_scan(&cells, json)?);
        }
        Commands::Render {
            path,
            output,
            untrusted,
        } => {
            let mut notebook = load_document(&path).await?;
            let cells = render_document(config, &mut notebook, !untrusted).await?;
            let html = format_html(&cells);

            if let Some(out_path) = output {
                tokio::fs::write(&out_path, html)
                    .await
                    .with_context(|| format!("Failed to write {:?}", out_path))?;
                info!("Wrote {} cells to {:?}", cells.len(), out_path);
            } else {
                print!("{}", html);
            }
        }
        Commands::Check { path } => {
            let key = config.metadata_key.clone();
            let mut notebook = load_document(&path).await?;
            let cells = render_document(config, &mut notebook, true).await?;

            let mut failed = false;
            for cell in &cells {
                let status = check_cell(cell, &key);
                println!("cell {} ({}): {}", cell.index, cell.id, describe(&status));
                failed |= status.is_failure();
            }
            if failed {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn build_config(open: Option<String>, close: Option<String>) -> Result<ImarkdownConfig> {
    let mut config = ImarkdownConfig::from_env();
    if let Some(open) = open {
        config.open_delimiter = open;
    }
    if let Some(close) = close {
        config.close_delimiter = close;
    }
    config.validate().context("Invalid configuration")?;
    debug!(?config, "Resolved configuration");
    Ok(config)
}

async fn load_document(path: &Path) -> Result<Notebook> {
    info!("Reading document from {:?}", path);
    if path.extension().is_some_and(|ext| ext == "ipynb") {
        Notebook::load(path)
            .await
            .with_context(|| format!("Failed to load notebook {:?}", path))
    } else {
        let source = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {:?}", path))?;
        Ok(Notebook::from_markdown(source))
    }
}

async fn render_document(
    config: ImarkdownConfig,
    notebook: &mut Notebook,
    trusted: bool,
) -> Result<Vec<RenderedCell>> {
    let runtime = ImarkdownRuntime::new(config).context("Failed to set up renderer")?;

    let mut rendered = Vec::new();
    for (index, cell) in notebook.to_markdown_cells(trusted) {
        let shared = cell.into_shared();
        if let Err(e) = runtime.render_input(&shared).await {
            warn!("Skipping cell {}: {}", index, e);
            continue;
        }
        let guard = shared.lock().await;
        rendered.push(RenderedCell {
            index,
            id: guard.id().to_string(),
            expressions: guard.expressions().to_vec(),
            html: guard.tree().to_html(),
            metadata: guard.metadata().clone(),
        });
    }
    Ok(rendered)
}

fn format_scan(cells: &[RenderedCell], json: bool) -> Result<String> {
    if json {
        let scanned: Vec<ScannedCell<'_>> = cells
            .iter()
            .map(|cell| ScannedCell {
                index: cell.index,
                id: &cell.id,
                expressions: cell.expressions.iter().map(|e| e.text.as_str()).collect(),
            })
            .collect();
        let mut out = serde_json::to_string_pretty(&scanned)?;
        out.push('\n');
        return Ok(out);
    }

    let mut out = String::new();
    for cell in cells {
        for expression in &cell.expressions {
            out.push_str(&format!(
                "cell {} [{}] {}\n",
                cell.index, expression.ordinal, expression.text
            ));
        }
    }
    Ok(out)
}

fn format_html(cells: &[RenderedCell]) -> String {
    cells
        .iter()
        .map(|cell| {
            format!(
                "<div class=\"imarkdown-cell\" data-cell-id=\"{}\">{}</div>\n",
                escape_attr(&cell.id),
                cell.html
            )
        })
        .collect()
}

fn check_cell(cell: &RenderedCell, key: &str) -> CellStatus {
    match ResultRecord::load(&cell.metadata, key) {
        Err(e) => CellStatus::Invalid(e.to_string()),
        Ok(None) if cell.expressions.is_empty() => CellStatus::Current,
        Ok(None) => CellStatus::Missing,
        Ok(Some(record)) => match record.check_against(&cell.expressions) {
            Ok(()) => CellStatus::Current,
            Err(mismatch) => CellStatus::Stale(mismatch),
        },
    }
}

fn describe(status: &CellStatus) -> String {
    match status {
        CellStatus::Current => "ok".to_string(),
        CellStatus::Missing => "not evaluated".to_string(),
        CellStatus::Stale(mismatch) => format!("stale ({})", mismatch),
        CellStatus::Invalid(reason) => format!("invalid ({})", reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOTEBOOK: &str = r#"{
 "cells": [
  {
   "cell_type": "markdown",
   "id": "fresh",
   "metadata": {
    "user_expressions": [
     {"expression": "x", "result": {"status": "ok", "data": {"text/plain": "'ten'"}, "metadata": {}}}
    ]
   },
   "source": "x is {{x}}"
  },
  {
   "cell_type": "markdown",
   "id": "stale",
   "metadata": {
    "user_expressions": [
     {"expression": "y", "result": {"status": "ok", "data": {"text/plain": "1"}, "metadata": {}}}
    ]
   },
   "source": "{{y}} and {{z}}"
  },
  {
   "cell_type": "markdown",
   "id": "new",
   "metadata": {},
   "source": "{{w}}"
  }
 ],
 "metadata": {},
 "nbformat": 4,
 "nbformat_minor": 5
}"#;

    async fn rendered(trusted: bool) -> Vec<RenderedCell> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.ipynb");
        tokio::fs::write(&path, NOTEBOOK).await.unwrap();

        let mut notebook = load_document(&path).await.unwrap();
        render_document(ImarkdownConfig::default(), &mut notebook, trusted)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_check_statuses() {
        let cells = rendered(true).await;
        let statuses: Vec<CellStatus> = cells
            .iter()
            .map(|cell| check_cell(cell, "user_expressions"))
            .collect();

        assert_eq!(statuses[0], CellStatus::Current);
        assert_eq!(
            statuses[1],
            CellStatus::Stale(RecordMismatch::Length { expected: 2, found: 1 })
        );
        assert_eq!(statuses[2], CellStatus::Missing);
        assert!(statuses[1].is_failure());
        assert!(!statuses[2].is_failure());
    }

    #[tokio::test]
    async fn test_render_restores_results() {
        let cells = rendered(true).await;
        let html = format_html(&cells);

        assert!(html.contains("data-cell-id=\"fresh\""));
        assert!(html.contains(">ten</span>"));
        assert!(html.contains("value=\"z\""));
    }

    #[tokio::test]
    async fn test_scan_output() {
        let cells = rendered(true).await;

        assert_eq!(
            format_scan(&cells, false).unwrap(),
            "cell 0 [0] x\ncell 1 [0] y\ncell 1 [1] z\ncell 2 [0] w\n"
        );

        let value: Value = serde_json::from_str(&format_scan(&cells, true).unwrap()).unwrap();
        assert_eq!(value[1]["expressions"], json!(["y", "z"]));
    }

    #[tokio::test]
    async fn test_markdown_file_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.md");
        tokio::fs::write(&path, "# Title\n\n<<a>> {{b}}").await.unwrap();

        let config = ImarkdownConfig::default().with_delimiters("<<", ">>");
        let mut notebook = load_document(&path).await.unwrap();
        let cells = render_document(config, &mut notebook, true).await.unwrap();

        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].expressions, vec![Expression::new(0, "a")]);
    }

    #[tokio::test]
    async fn test_cell_id_is_escaped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostile.ipynb");
        let notebook = NOTEBOOK.replacen(
            r#""id": "fresh""#,
            r#""id": "\"><script>alert(1)</script>""#,
            1,
        );
        tokio::fs::write(&path, notebook).await.unwrap();

        let mut notebook = load_document(&path).await.unwrap();
        let cells = render_document(ImarkdownConfig::default(), &mut notebook, false)
            .await
            .unwrap();
        let html = format_html(&cells);

        assert!(!html.contains("<script>"));
        assert!(html.contains("data-cell-id=\"&quot;&gt;&lt;script&gt;alert(1)&lt;/script&gt;\""));
    }

    #[test]
    fn test_build_config_rejects_bad_delimiter() {
        assert!(build_config(Some("ab".to_string()), None).is_err());
    }
}
