use anyhow::{anyhow, Result};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::atomic_write_bytes;
use crate::error::SweepError;
use crate::manifest::load_raw;
use crate::tools::{Tool, ToolRunner, Toolchain};

/// Base name handed to the block generator; it writes `<base>.nexus`.
pub const BLOCK_BASENAME: &str = "mbblock";
const MCMC_PREFIX: &str = "mcmc.";
const INSERT_GAP_KEY: &str = "fasta_to_nexus.insert_gap_at";
const DEFAULT_TRACE_RUNS: u64 = 2;

/// Caller-selected phases. Nothing chains automatically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Phases {
    pub prepare: bool,
    pub run: bool,
    pub postprocess: bool,
}

impl Phases {
    pub fn all() -> Self {
        Self {
            prepare: true,
            run: true,
            postprocess: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.prepare || self.run || self.postprocess)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Idle,
    Prepared,
    Ran,
    Postprocessed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Prepared => "prepared",
            Stage::Ran => "ran",
            Stage::Postprocessed => "postprocessed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveResult {
    pub run_dir: PathBuf,
    pub stage: Stage,
    pub invocations: usize,
}

/// File names every phase derives from the manifest's ordered `inputs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    pub run_dir: PathBuf,
    pub inputs: Vec<String>,
    pub converted: Vec<String>,
    pub alignments: Vec<String>,
}

impl RunLayout {
    pub fn new(run_dir: &Path, inputs: Vec<String>) -> Result<Self> {
        let mut converted = Vec::with_capacity(inputs.len());
        let mut alignments = Vec::with_capacity(inputs.len());
        for name in &inputs {
            let stem = name
                .strip_suffix(".fasta")
                .ok_or_else(|| SweepError::BadInputName { name: name.clone() })?;
            converted.push(format!("{}_conv.fasta", stem));
            alignments.push(format!("{}_conv.nexus", stem));
        }
        Ok(Self {
            run_dir: run_dir.to_path_buf(),
            inputs,
            converted,
            alignments,
        })
    }

    pub fn block_file(&self) -> PathBuf {
        self.run_dir.join(format!("{}.nexus", BLOCK_BASENAME))
    }

    /// 1-based, matching replicate numbering.
    pub fn list_file_name(index: usize) -> String {
        format!("samp{}_listfile.txt", index)
    }

    pub fn merged_prefix(index: usize) -> String {
        format!("samp{}merged", index)
    }

    pub fn merged_output(run_dir: &Path, index: usize) -> PathBuf {
        run_dir.join(format!("{}.txt", Self::merged_prefix(index)))
    }

    pub fn trace_files(alignment: &str, runs: u64) -> Vec<String> {
        (1..=runs).map(|r| format!("{}.run{}.t", alignment, r)).collect()
    }
}

/// Turns every `mcmc.<name>` manifest key into a `(name, value)` flag pair.
///
/// Booleans become `yes`/`no`, numbers keep their JSON spelling, and `null`
/// means the flag is omitted. Anything else is a schema violation.
pub fn mcmc_flags(manifest: &Map<String, Value>) -> Result<Vec<(String, String)>> {
    let mut flags = Vec::new();
    for (key, value) in manifest {
        let Some(name) = key.strip_prefix(MCMC_PREFIX) else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        let rendered = match value {
            Value::Null => continue,
            Value::Bool(true) => "yes".to_string(),
            Value::Bool(false) => "no".to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            other => {
                return Err(SweepError::InvalidFlagValue {
                    key: key.clone(),
                    value: other.to_string(),
                }
                .into())
            }
        };
        flags.push((name.to_string(), rendered));
    }
    Ok(flags)
}

/// Runs the selected phases of one manifest, in order, inside its directory.
pub fn drive(
    manifest_path: &Path,
    phases: Phases,
    toolchain: &Toolchain,
    runner: &dyn ToolRunner,
) -> Result<DriveResult> {
    if phases.is_empty() {
        return Err(anyhow!(
            "no phase selected (use prepare, run and/or postprocess)"
        ));
    }
    let manifest_path = fs::canonicalize(manifest_path)
        .map_err(|e| anyhow!("manifest {} not found: {}", manifest_path.display(), e))?;
    let run_dir = manifest_path
        .parent()
        .ok_or_else(|| anyhow!("manifest {} has no parent", manifest_path.display()))?
        .to_path_buf();
    let manifest = load_raw(&manifest_path)?;
    let layout = RunLayout::new(&run_dir, manifest_inputs(&manifest, &manifest_path)?)?;

    let mut driver = Driver {
        layout: &layout,
        toolchain,
        runner,
        invocations: 0,
    };
    let mut stage = Stage::Idle;
    if phases.prepare {
        driver.prepare(&manifest)?;
        stage = Stage::Prepared;
    }
    if phases.run {
        driver.run()?;
        stage = Stage::Ran;
    }
    if phases.postprocess {
        driver.postprocess(trace_runs(&manifest))?;
        stage = Stage::Postprocessed;
    }
    info!(
        run_dir = %run_dir.display(),
        stage = stage.as_str(),
        invocations = driver.invocations,
        "pipeline phases complete"
    );
    Ok(DriveResult {
        run_dir,
        stage,
        invocations: driver.invocations,
    })
}

struct Driver<'a> {
    layout: &'a RunLayout,
    toolchain: &'a Toolchain,
    runner: &'a dyn ToolRunner,
    invocations: usize,
}

impl Driver<'_> {
    fn call<I, S>(&mut self, tool: Tool, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let call = self
            .toolchain
            .invocation(tool, &self.layout.run_dir, args);
        self.invocations += 1;
        self.runner.run(&call)
    }

    fn prepare(&mut self, manifest: &Map<String, Value>) -> Result<()> {
        // Validate before anything touches the run directory.
        let flags = mcmc_flags(manifest)?;
        let gap_index = insert_gap_at(manifest)?;
        let layout = self.layout;

        let mut args = vec!["--inFile".to_string()];
        args.extend(layout.inputs.iter().cloned());
        self.call(Tool::FormatConverter, args)?;

        let mut args = vec!["--inFile".to_string()];
        args.extend(layout.converted.iter().cloned());
        if let Some(index) = gap_index {
            args.push("--insert-gap-at".to_string());
            args.push(index.to_string());
        }
        self.call(Tool::AlignmentConverter, args)?;

        info!(flags = ?flags, "generating MCMC block");
        let mut args = Vec::with_capacity(flags.len() * 2 + layout.alignments.len() + 3);
        for (name, value) in flags {
            args.push(format!("--{}", name));
            args.push(value);
        }
        args.push("--outfile".to_string());
        args.push(BLOCK_BASENAME.to_string());
        args.push("--inpath".to_string());
        args.extend(layout.alignments.iter().cloned());
        self.call(Tool::BlockGenerator, args)
    }

    fn run(&mut self) -> Result<()> {
        let block = self.layout.block_file();
        if !block.exists() {
            return Err(SweepError::MissingArtifact { path: block }.into());
        }
        let name = block
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("{}.nexus", BLOCK_BASENAME));
        self.call(Tool::McmcEngine, [name])
    }

    fn postprocess(&mut self, runs: u64) -> Result<()> {
        let layout = self.layout;
        for (offset, alignment) in layout.alignments.iter().enumerate() {
            let index = offset + 1;
            let list_name = RunLayout::list_file_name(index);
            let mut listing = String::new();
            for trace in RunLayout::trace_files(alignment, runs) {
                listing.push_str(&trace);
                listing.push('\n');
            }
            atomic_write_bytes(&layout.run_dir.join(&list_name), listing.as_bytes())?;
            self.call(
                Tool::Aggregator,
                [
                    "--listfile".to_string(),
                    list_name,
                    "--outfile".to_string(),
                    RunLayout::merged_prefix(index),
                ],
            )?;
        }
        Ok(())
    }
}

pub(crate) fn manifest_inputs(
    manifest: &Map<String, Value>,
    path: &Path,
) -> Result<Vec<String>> {
    let inputs = manifest
        .get("inputs")
        .ok_or_else(|| SweepError::MissingManifestKey {
            path: path.to_path_buf(),
            key: "inputs".to_string(),
        })?;
    let items = inputs.as_array().ok_or_else(|| SweepError::InvalidFlagValue {
        key: "inputs".to_string(),
        value: inputs.to_string(),
    })?;
    items
        .iter()
        .map(|item| -> Result<String> {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| {
                    SweepError::InvalidFlagValue {
                        key: "inputs".to_string(),
                        value: item.to_string(),
                    }
                    .into()
                })
        })
        .collect()
}

fn insert_gap_at(manifest: &Map<String, Value>) -> Result<Option<u64>> {
    match manifest.get(INSERT_GAP_KEY) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| {
            SweepError::InvalidFlagValue {
                key: INSERT_GAP_KEY.to_string(),
                value: value.to_string(),
            }
            .into()
        }),
    }
}

fn trace_runs(manifest: &Map<String, Value>) -> u64 {
    manifest
        .get("mcmc.nruns")
        .and_then(Value::as_u64)
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_TRACE_RUNS)
}
