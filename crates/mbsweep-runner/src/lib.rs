//! Batch orchestration for clone-addition MCMC experiments.
//!
//! The flow is: [`categorize`] two input directories by frequency key,
//! [`generate`] one run directory per `(frequency, case)`, [`drive`] the
//! external toolchain over each run's `parameters.json`, then
//! [`extract_all`] the information-content scalar from every merged report.

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;

mod block;
mod categorize;
mod error;
mod extract;
mod generate;
mod manifest;
mod pipeline;
mod tools;

pub use block::{render_blocks, write_block_file, BlockArgs, BlockRecord};
pub use categorize::{categorize, CategorizedFile, FreqKey, DEFAULT_PATTERN};
pub use error::SweepError;
pub use extract::{
    discover_manifests, extract, extract_all, parse_information_table, write_dataset,
    ExtractedRow, ExtractionReport, InformationTable, HEADER_ANCHOR, TARGET_COLUMN, TARGET_ROW,
};
pub use generate::{generate, GenerateOptions, GenerateReport, SourceSpec};
pub use manifest::{Case, McmcParams, RunManifest, MANIFEST_FILE};
pub use pipeline::{drive, mcmc_flags, DriveResult, Phases, RunLayout, Stage, BLOCK_BASENAME};
pub use tools::{Invocation, ProcessRunner, Tool, ToolRunner, Toolchain};

pub(crate) fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

pub(crate) fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

pub(crate) fn atomic_write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write_bytes(path, &bytes)
}

#[cfg(test)]
pub(crate) fn scratch_dir(tag: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "mbsweep_{}_{}_{}",
        tag,
        std::process::id(),
        Utc::now().timestamp_micros()
    ));
    fs::create_dir_all(&dir).expect("scratch dir");
    dir
}
