use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::info;

use crate::error::SweepError;

/// External collaborators the sweep shells out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Subsampler,
    FormatConverter,
    AlignmentConverter,
    BlockGenerator,
    McmcEngine,
    Aggregator,
}

impl Tool {
    pub fn as_str(self) -> &'static str {
        match self {
            Tool::Subsampler => "subsampler",
            Tool::FormatConverter => "format_converter",
            Tool::AlignmentConverter => "alignment_converter",
            Tool::BlockGenerator => "block_generator",
            Tool::McmcEngine => "mcmc_engine",
            Tool::Aggregator => "aggregator",
        }
    }
}

/// Command prefixes for each [`Tool`], loaded from an optional `tools.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Toolchain {
    pub subsampler: Vec<String>,
    pub format_converter: Vec<String>,
    pub alignment_converter: Vec<String>,
    pub block_generator: Vec<String>,
    pub mcmc_engine: Vec<String>,
    pub aggregator: Vec<String>,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            subsampler: vec!["subsamplefasta.py".to_string()],
            format_converter: vec!["charconverter.py".to_string()],
            alignment_converter: vec!["fasta_to_nexus.py".to_string()],
            block_generator: vec!["mbsweep".to_string(), "block".to_string()],
            mcmc_engine: vec!["mb".to_string()],
            aggregator: vec!["galax".to_string()],
        }
    }
}

impl Toolchain {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read toolchain {}: {}", path.display(), e))?;
        let toolchain: Toolchain = serde_yaml::from_str(&raw)
            .map_err(|e| anyhow!("invalid toolchain {}: {}", path.display(), e))?;
        for tool in [
            Tool::Subsampler,
            Tool::FormatConverter,
            Tool::AlignmentConverter,
            Tool::BlockGenerator,
            Tool::McmcEngine,
            Tool::Aggregator,
        ] {
            if toolchain.command(tool).is_empty() {
                return Err(anyhow!(
                    "toolchain {}: '{}' must name a program",
                    path.display(),
                    tool.as_str()
                ));
            }
        }
        Ok(toolchain)
    }

    pub fn command(&self, tool: Tool) -> &[String] {
        match tool {
            Tool::Subsampler => &self.subsampler,
            Tool::FormatConverter => &self.format_converter,
            Tool::AlignmentConverter => &self.alignment_converter,
            Tool::BlockGenerator => &self.block_generator,
            Tool::McmcEngine => &self.mcmc_engine,
            Tool::Aggregator => &self.aggregator,
        }
    }

    /// Builds the call for `tool` with `args` appended to its configured prefix.
    pub fn invocation<I, S>(&self, tool: Tool, cwd: &Path, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prefix = self.command(tool);
        let (program, fixed) = match prefix.split_first() {
            Some((program, fixed)) => (program.clone(), fixed.to_vec()),
            None => (tool.as_str().to_string(), Vec::new()),
        };
        let mut all_args = fixed;
        all_args.extend(args.into_iter().map(Into::into));
        Invocation {
            tool,
            program,
            args: all_args,
            cwd: cwd.to_path_buf(),
        }
    }
}

/// One blocking external call. The working directory is always explicit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub tool: Tool,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl Invocation {
    /// Value following `--flag`, if present.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Every value following `--flag` up to the next `--` argument.
    pub fn flag_values(&self, flag: &str) -> Vec<&str> {
        match self.args.iter().position(|a| a == flag) {
            Some(i) => self.args[i + 1..]
                .iter()
                .take_while(|a| !a.starts_with("--"))
                .map(String::as_str)
                .collect(),
            None => Vec::new(),
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

pub trait ToolRunner {
    fn run(&self, invocation: &Invocation) -> Result<()>;
}

impl<F> ToolRunner for F
where
    F: Fn(&Invocation) -> Result<()>,
{
    fn run(&self, invocation: &Invocation) -> Result<()> {
        self(invocation)
    }
}

/// Spawns real processes and waits for them without a timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ToolRunner for ProcessRunner {
    fn run(&self, invocation: &Invocation) -> Result<()> {
        info!(
            tool = invocation.tool.as_str(),
            cwd = %invocation.cwd.display(),
            "running {}",
            invocation
        );
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        cmd.current_dir(&invocation.cwd);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());
        let status = cmd
            .status()
            .map_err(|e| anyhow!("failed to spawn {}: {}", invocation.program, e))?;
        if !status.success() {
            return Err(SweepError::ToolFailed {
                program: invocation.program.clone(),
                status: status
                    .code()
                    .map(|c| format!("status {}", c))
                    .unwrap_or_else(|| "signal".to_string()),
                cwd: invocation.cwd.clone(),
            }
            .into());
        }
        Ok(())
    }
}
