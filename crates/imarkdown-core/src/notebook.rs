//! Notebook documents (nbformat 4).
//!
//! Only what the expression lifecycle needs is modeled; every other field is
//! carried through untouched so a load/save round trip loses nothing.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::cell::MarkdownCell;
use crate::{ImarkdownError, Result};

/// Notebook format major version this module understands.
pub const NBFORMAT: u32 = 4;

/// Cell source: a single string or a list of lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MultilineString {
    /// Whole source in one string.
    Single(String),
    /// Source split into lines, each keeping its newline.
    Lines(Vec<String>),
}

impl MultilineString {
    /// The source as one string.
    pub fn text(&self) -> String {
        match self {
            MultilineString::Single(text) => text.clone(),
            MultilineString::Lines(lines) => lines.concat(),
        }
    }
}

impl Default for MultilineString {
    fn default() -> Self {
        MultilineString::Single(String::new())
    }
}

/// A notebook cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotebookCell {
    /// `markdown`, `code` or `raw`.
    pub cell_type: String,
    /// Cell id, absent in older minor versions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Cell source.
    #[serde(default)]
    pub source: MultilineString,
    /// Cell metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Everything else (outputs, attachments, execution count).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NotebookCell {
    /// A markdown cell.
    pub fn markdown(source: impl Into<String>) -> Self {
        Self {
            cell_type: "markdown".to_string(),
            id: Some(Uuid::new_v4().to_string()),
            source: MultilineString::Single(source.into()),
            metadata: Map::new(),
            extra: Map::new(),
        }
    }

    /// Whether this is a markdown cell.
    pub fn is_markdown(&self) -> bool {
        self.cell_type == "markdown"
    }
}

/// A notebook document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    /// Cells in order.
    pub cells: Vec<NotebookCell>,
    /// Notebook metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Major format version.
    pub nbformat: u32,
    /// Minor format version.
    #[serde(default)]
    pub nbformat_minor: u32,
}

impl Notebook {
    /// Parse a notebook from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let notebook: Notebook = serde_json::from_str(json)?;
        if notebook.nbformat != NBFORMAT {
            return Err(ImarkdownError::NotebookError(format!(
                "Unsupported nbformat {}, expected {}",
                notebook.nbformat, NBFORMAT
            )));
        }
        Ok(notebook)
    }

    /// Wrap a Markdown document as a single-cell notebook.
    pub fn from_markdown(source: impl Into<String>) -> Self {
        Self {
            cells: vec![NotebookCell::markdown(source)],
            metadata: Map::new(),
            nbformat: NBFORMAT,
            nbformat_minor: 5,
        }
    }

    /// Load a notebook from a file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_json(&content)
    }

    /// Serialize with the one-space indent notebook files use.
    pub fn to_json(&self) -> Result<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut serializer)?;
        buf.push(b'\n');
        String::from_utf8(buf).map_err(|e| ImarkdownError::NotebookError(e.to_string()))
    }

    /// Save the notebook to a file.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        tokio::fs::write(path, self.to_json()?).await?;
        Ok(())
    }

    /// Markdown cells with their index in `cells`.
    pub fn markdown_cells(&self) -> impl Iterator<Item = (usize, &NotebookCell)> {
        self.cells.iter().enumerate().filter(|(_, cell)| cell.is_markdown())
    }

    /// Build live cells for every markdown cell.
    ///
    /// Cells without an id get a generated one, written back so later saves
    /// keep it.
    pub fn to_markdown_cells(&mut self, trusted: bool) -> Vec<(usize, MarkdownCell)> {
        self.cells
            .iter_mut()
            .enumerate()
            .filter(|(_, cell)| cell.is_markdown())
            .map(|(index, cell)| {
                let id = cell
                    .id
                    .get_or_insert_with(|| Uuid::new_v4().to_string())
                    .clone();
                let live = MarkdownCell::new(cell.source.text())
                    .with_id(id)
                    .with_trusted(trusted)
                    .with_metadata(cell.metadata.clone());
                (index, live)
            })
            .collect()
    }

    /// Copy a live cell's metadata back into the document.
    pub fn update_metadata(&mut self, index: usize, metadata: &Map<String, Value>) -> Result<()> {
        let cell = self
            .cells
            .get_mut(index)
            .ok_or_else(|| ImarkdownError::NotebookError(format!("No cell at index {}", index)))?;
        cell.metadata = metadata.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r#"{
 "cells": [
  {
   "cell_type": "markdown",
   "id": "intro",
   "metadata": {"tags": ["x"]},
   "source": ["Value: {{x}}\n", "done"]
  },
  {
   "cell_type": "code",
   "execution_count": 1,
   "metadata": {},
   "outputs": [],
   "source": "x = 1"
  },
  {
   "cell_type": "markdown",
   "metadata": {},
   "source": "no id"
  }
 ],
 "metadata": {"kernelspec": {"name": "python3"}},
 "nbformat": 4,
 "nbformat_minor": 5
}"#;

    #[test]
    fn test_parse_sources() {
        let notebook = Notebook::from_json(SAMPLE).unwrap();

        assert_eq!(notebook.cells[0].source.text(), "Value: {{x}}\ndone");
        assert_eq!(notebook.markdown_cells().count(), 2);
    }

    #[test]
    fn test_unknown_fields_survive() {
        let notebook = Notebook::from_json(SAMPLE).unwrap();
        let value: Value = serde_json::from_str(&notebook.to_json().unwrap()).unwrap();

        assert_eq!(value["cells"][1]["execution_count"], json!(1));
        assert_eq!(value["cells"][1]["outputs"], json!([]));
        assert_eq!(value["metadata"]["kernelspec"]["name"], json!("python3"));
    }

    #[test]
    fn test_rejects_other_major_version() {
        let err = Notebook::from_json(r#"{"cells": [], "nbformat": 3}"#).unwrap_err();
        assert!(matches!(err, ImarkdownError::NotebookError(_)));
    }

    #[test]
    fn test_live_cells_get_ids() {
        let mut notebook = Notebook::from_json(SAMPLE).unwrap();
        let cells = notebook.to_markdown_cells(true);

        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].0, 0);
        assert_eq!(cells[1].0, 2);
        assert!(notebook.cells[2].id.is_some());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.ipynb");
        let mut notebook = Notebook::from_markdown("{{x}}");
        let mut metadata = Map::new();
        metadata.insert("user_expressions".to_string(), json!([]));
        notebook.update_metadata(0, &metadata).unwrap();

        notebook.save(&path).await.unwrap();
        let loaded = Notebook::load(&path).await.unwrap();

        assert_eq!(loaded, notebook);
    }
}
