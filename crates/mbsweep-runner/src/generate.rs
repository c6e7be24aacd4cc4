use anyhow::{anyhow, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::categorize::categorize;
use crate::ensure_dir;
use crate::error::SweepError;
use crate::manifest::{Case, McmcParams, RunManifest};
use crate::tools::{Tool, ToolRunner, Toolchain};

const BASE_SAMPLE_PREFIX: &str = "6seq_samp";
const BASE_SAMPLE_SIZE: usize = 6;
const ADDED_SAMPLE_PREFIX: &str = "1seq_samp";
const ADDED_SAMPLE_SIZE: usize = 1;

/// A directory of candidate source files plus the pattern keying them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub dir: PathBuf,
    /// One capturing group; empty selects the default `freq<number>` pattern.
    pub pattern: String,
}

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub output_root: PathBuf,
    pub same_clone: SourceSpec,
    pub diff_clone: SourceSpec,
    pub run_count: usize,
    pub seed: Option<u64>,
    pub insert_gap_at: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateReport {
    pub created: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

/// Materializes `freq<label>/<case>` run directories for every shared key.
///
/// Existing run directories are skipped untouched. Each new one is assembled
/// in a `.<case>.partial` sibling and renamed into place once its manifest is
/// written, so an interrupted build is never mistaken for a finished one.
pub fn generate(
    options: &GenerateOptions,
    toolchain: &Toolchain,
    runner: &dyn ToolRunner,
) -> Result<GenerateReport> {
    if options.run_count == 0 {
        return Err(anyhow!("run count must be at least 1"));
    }
    ensure_dir(&options.output_root)?;
    let output_root = fs::canonicalize(&options.output_root)?;

    let same_files = categorize(&options.same_clone.dir, &options.same_clone.pattern)?;
    let diff_files = categorize(&options.diff_clone.dir, &options.diff_clone.pattern)?;

    let builder = CaseBuilder {
        output_root: &output_root,
        options,
        toolchain,
        runner,
    };
    let mut report = GenerateReport::default();
    for (key, same_file) in &same_files {
        let diff_file = diff_files
            .get(key)
            .ok_or_else(|| SweepError::MissingFrequency {
                freq: same_file.raw_label.clone(),
            })?;
        let same_source = fs::canonicalize(&same_file.path)?;
        let diff_source = fs::canonicalize(&diff_file.path)?;

        for case in Case::ALL {
            let combine_from = match case {
                Case::SameClone => Some(same_source.as_path()),
                Case::Baseline => None,
                Case::DiffClone => Some(diff_source.as_path()),
            };
            let run_dir = builder.run_dir(&same_file.raw_label, case);
            if run_dir.exists() {
                info!(run_dir = %run_dir.display(), "skipping existing run directory");
                report.skipped.push(run_dir);
                continue;
            }
            builder.build(&same_file.raw_label, case, combine_from)?;
            info!(run_dir = %run_dir.display(), "created run directory");
            report.created.push(run_dir);
        }
    }
    Ok(report)
}

struct CaseBuilder<'a> {
    output_root: &'a Path,
    options: &'a GenerateOptions,
    toolchain: &'a Toolchain,
    runner: &'a dyn ToolRunner,
}

impl CaseBuilder<'_> {
    fn freq_dir(&self, freq: &str) -> PathBuf {
        self.output_root.join(format!("freq{}", freq))
    }

    fn run_dir(&self, freq: &str, case: Case) -> PathBuf {
        self.freq_dir(freq).join(case.as_str())
    }

    fn build(&self, freq: &str, case: Case, combine_from: Option<&Path>) -> Result<()> {
        let freq_dir = self.freq_dir(freq);
        let staging = freq_dir.join(format!(".{}.partial", case));
        if staging.exists() {
            warn!(staging = %staging.display(), "removing incomplete run directory");
            fs::remove_dir_all(&staging)?;
        }
        ensure_dir(&staging)?;

        let n = self.options.run_count;
        let base_dir = match (case, combine_from) {
            (Case::SameClone, Some(source)) => {
                self.subsample(&staging, source, BASE_SAMPLE_PREFIX, BASE_SAMPLE_SIZE)?;
                staging.clone()
            }
            _ => self.run_dir(freq, Case::SameClone),
        };
        if let Some(source) = combine_from {
            self.subsample(&staging, source, ADDED_SAMPLE_PREFIX, ADDED_SAMPLE_SIZE)?;
        }

        let mut inputs = Vec::with_capacity(n);
        for i in 1..=n {
            let mut combined = fs::read(sample_path(&base_dir, BASE_SAMPLE_PREFIX, i))
                .map_err(|e| {
                    anyhow!(
                        "base sample {} unavailable: {}",
                        sample_path(&base_dir, BASE_SAMPLE_PREFIX, i).display(),
                        e
                    )
                })?;
            if combine_from.is_some() {
                let added = fs::read(sample_path(&staging, ADDED_SAMPLE_PREFIX, i))?;
                if !combined.is_empty() && !combined.ends_with(b"\n") {
                    combined.push(b'\n');
                }
                combined.extend_from_slice(&added);
            }
            let input_name = format!("{}_samp_{}.fasta", case, i);
            fs::write(staging.join(&input_name), combined)?;
            inputs.push(input_name);
        }

        let manifest = RunManifest {
            is_combined: combine_from.is_some(),
            freq: freq.to_string(),
            case,
            combine_path: combine_from.map(Path::to_path_buf),
            inputs,
            mcmc: McmcParams::with_seed(self.options.seed),
            insert_gap_at: self.options.insert_gap_at,
        };
        manifest.write(&staging)?;
        fs::rename(&staging, self.run_dir(freq, case))?;
        Ok(())
    }

    fn subsample(&self, cwd: &Path, source: &Path, prefix: &str, size: usize) -> Result<()> {
        let call = self.toolchain.invocation(
            Tool::Subsampler,
            cwd,
            [
                "--inFile".to_string(),
                source.display().to_string(),
                "--outFile".to_string(),
                prefix.to_string(),
                "--number".to_string(),
                size.to_string(),
                "--iterations".to_string(),
                self.options.run_count.to_string(),
            ],
        );
        self.runner.run(&call)?;
        for i in 1..=self.options.run_count {
            let path = sample_path(cwd, prefix, i);
            let usable = fs::read_to_string(&path)
                .map(|text| text.lines().any(|l| l.starts_with('>')))
                .unwrap_or(false);
            if !usable {
                return Err(SweepError::EmptySample { path }.into());
            }
        }
        Ok(())
    }
}

fn sample_path(dir: &Path, prefix: &str, index: usize) -> PathBuf {
    dir.join(format!("{}_{}.fasta", prefix, index))
}
