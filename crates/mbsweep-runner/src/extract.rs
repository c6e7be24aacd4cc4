use anyhow::{anyhow, Result};
use regex::Regex;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::atomic_write_bytes;
use crate::error::SweepError;
use crate::manifest::{load_raw, MANIFEST_FILE};
use crate::pipeline::{manifest_inputs, RunLayout};

/// Header line of the aggregator's information table. Group 1 spans the
/// first column and fixes its width for every following line.
pub const HEADER_ANCHOR: &str = r"(?:\A|\n\n)([ \t]*treefile)[ \t]+unique[ \t]+coverage";
/// Zero-based data row (header excluded) holding the merged-tree summary.
pub const TARGET_ROW: usize = 2;
/// Zero-based column of the information value within that row.
pub const TARGET_COLUMN: usize = 6;

static ANCHOR: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(HEADER_ANCHOR).ok());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InformationTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl InformationTable {
    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedRow {
    /// Every manifest key, prefixed `param.`, in manifest order.
    pub params: Map<String, Value>,
    pub galax_information: f64,
    /// 1-based replicate index.
    pub file_index: usize,
}

#[derive(Debug, Default)]
pub struct ExtractionReport {
    pub rows: Vec<ExtractedRow>,
    pub failures: Vec<(PathBuf, String)>,
}

/// Recovers the table that follows [`HEADER_ANCHOR`] in `text`.
///
/// The first column may hold multi-word labels, so its span is cut at the
/// header's width and re-joined with `_` before whitespace tokenizing. The
/// table ends at the first blank line or at end of text.
pub fn parse_information_table(text: &str, source: &Path) -> Result<InformationTable> {
    let anchor = ANCHOR
        .as_ref()
        .ok_or_else(|| anyhow!("header anchor pattern failed to compile"))?;
    let first_column = anchor
        .captures(text)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| SweepError::TableNotFound {
            path: source.to_path_buf(),
        })?;
    let width = first_column.as_str().chars().count();

    let mut lines: Vec<Vec<String>> = Vec::new();
    for line in text[first_column.start()..].split('\n') {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            break;
        }
        let cut = line
            .char_indices()
            .nth(width)
            .map(|(i, _)| i)
            .unwrap_or(line.len());
        let (label, rest) = line.split_at(cut);
        let label = label.split_whitespace().collect::<Vec<_>>().join("_");
        let mut fields = Vec::new();
        if !label.is_empty() {
            fields.push(label);
        }
        fields.extend(rest.split_whitespace().map(str::to_string));
        lines.push(fields);
    }

    let mut lines = lines.into_iter();
    let header = lines.next().unwrap_or_default();
    Ok(InformationTable {
        header,
        rows: lines.collect(),
    })
}

/// Reads the target cell of one merged report.
fn information_value(path: &Path) -> Result<f64> {
    let text = fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read {}: {}", path.display(), e))?;
    let table = parse_information_table(&text, path)?;
    let malformed = |detail: String| SweepError::MalformedTable {
        path: path.to_path_buf(),
        row: TARGET_ROW,
        column: TARGET_COLUMN,
        detail,
    };
    let row = table
        .rows
        .get(TARGET_ROW)
        .ok_or_else(|| malformed(format!("table has {} data rows", table.rows.len())))?;
    if row.len() != table.header.len() {
        return Err(malformed(format!(
            "row has {} fields but header has {}",
            row.len(),
            table.header.len()
        ))
        .into());
    }
    let cell = row
        .get(TARGET_COLUMN)
        .ok_or_else(|| malformed(format!("row has {} fields", row.len())))?;
    cell.parse::<f64>()
        .map_err(|_| malformed(format!("cell '{}' is not numeric", cell)).into())
}

/// One row per replicate of the manifest at `manifest_path`, in input order.
pub fn extract(manifest_path: &Path) -> Result<Vec<ExtractedRow>> {
    let manifest = load_raw(manifest_path)?;
    let run_dir = manifest_path.parent().unwrap_or(Path::new("."));
    let inputs = manifest_inputs(&manifest, manifest_path)?;

    let params: Map<String, Value> = manifest
        .iter()
        .map(|(k, v)| (format!("param.{}", k), v.clone()))
        .collect();

    let mut rows = Vec::with_capacity(inputs.len());
    for index in 1..=inputs.len() {
        let merged = RunLayout::merged_output(run_dir, index);
        rows.push(ExtractedRow {
            params: params.clone(),
            galax_information: information_value(&merged)?,
            file_index: index,
        });
    }
    Ok(rows)
}

/// Extracts every manifest in order. A failing manifest is recorded and
/// skipped; the rest still contribute rows.
pub fn extract_all(manifests: &[PathBuf]) -> ExtractionReport {
    let mut report = ExtractionReport::default();
    for path in manifests {
        match extract(path) {
            Ok(rows) => {
                info!(manifest = %path.display(), rows = rows.len(), "extracted");
                report.rows.extend(rows);
            }
            Err(err) => {
                warn!(manifest = %path.display(), error = %err, "extraction failed");
                report.failures.push((path.clone(), err.to_string()));
            }
        }
    }
    report
}

/// Every `parameters.json` below `root`, sorted, ignoring staging directories.
pub fn discover_manifests(root: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let walker = WalkDir::new(root).into_iter().filter_entry(|e| {
        !e.file_name()
            .to_str()
            .map(|n| n.ends_with(".partial"))
            .unwrap_or(false)
    });
    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_file() && entry.file_name() == MANIFEST_FILE {
            found.push(entry.into_path());
        }
    }
    found.sort();
    Ok(found)
}

/// Writes rows as CSV: the union of `param.*` columns in first-seen order,
/// then `galax_information` and `file_index`.
pub fn write_dataset(rows: &[ExtractedRow], path: &Path) -> Result<()> {
    let mut columns: Vec<&str> = Vec::new();
    for row in rows {
        for key in row.params.keys() {
            if !columns.contains(&key.as_str()) {
                columns.push(key);
            }
        }
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut header: Vec<&str> = columns.clone();
    header.push("galax_information");
    header.push("file_index");
    writer.write_record(&header)?;
    for row in rows {
        let mut record: Vec<String> = columns
            .iter()
            .map(|c| row.params.get(*c).map(cell_text).unwrap_or_default())
            .collect();
        record.push(row.galax_information.to_string());
        record.push(row.file_index.to_string());
        writer.write_record(&record)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow!("failed to flush dataset: {}", e))?;
    atomic_write_bytes(path, &bytes)
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
