use anyhow::Result;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::atomic_write_bytes;
use crate::error::SweepError;

/// Block-generator arguments as given on the command line. Every
/// hyperparameter holds either one value shared by all inputs or exactly
/// one value per input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockArgs {
    pub inpath: Vec<String>,
    pub outfile: String,
    pub nst: Vec<String>,
    pub rates: Vec<String>,
    pub ngammacat: Vec<String>,
    pub brlenspr: Vec<String>,
    pub shapepr: Vec<String>,
    pub statefreqpr: Vec<String>,
    pub revmatpr: Vec<String>,
    pub ngen: Vec<String>,
    pub samplefreq: Vec<String>,
    pub printfreq: Vec<String>,
    pub burninfrac: Vec<String>,
    pub nchains: Vec<String>,
    pub nruns: Vec<String>,
    pub autoclose: Vec<String>,
    pub nowarnings: Vec<String>,
    pub seed: Vec<String>,
}

/// Settings for one `begin mrbayes; ... end;` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    pub execute: String,
    pub nst: String,
    pub rates: String,
    pub ngammacat: String,
    pub brlenspr: String,
    pub shapepr: String,
    pub statefreqpr: String,
    pub revmatpr: String,
    pub ngen: String,
    pub samplefreq: String,
    pub printfreq: String,
    pub burninfrac: String,
    pub nchains: String,
    pub nruns: String,
    pub autoclose: String,
    pub nowarnings: String,
    pub seed: Option<String>,
}

struct Picker {
    count: usize,
}

impl Picker {
    fn optional(&self, name: &str, values: &[String], index: usize) -> Result<Option<String>> {
        match values.len() {
            0 => Ok(None),
            1 => Ok(Some(values[0].clone())),
            n if n == self.count => Ok(Some(values[index].clone())),
            n => Err(SweepError::InvalidBlockArgs {
                message: format!(
                    "--{} has {} values; expected 1 or one per input ({})",
                    name, n, self.count
                ),
            }
            .into()),
        }
    }

    fn required(&self, name: &str, values: &[String], index: usize) -> Result<String> {
        self.optional(name, values, index)?.ok_or_else(|| {
            SweepError::InvalidBlockArgs {
                message: format!("--{} is required", name),
            }
            .into()
        })
    }

    fn or_no(&self, name: &str, values: &[String], index: usize) -> Result<String> {
        Ok(self
            .optional(name, values, index)?
            .unwrap_or_else(|| "no".to_string()))
    }
}

impl BlockArgs {
    /// One record per input file, resolved by name rather than position.
    pub fn records(&self) -> Result<Vec<BlockRecord>> {
        if self.inpath.is_empty() {
            return Err(SweepError::InvalidBlockArgs {
                message: "--inpath needs at least one alignment file".to_string(),
            }
            .into());
        }
        let pick = Picker {
            count: self.inpath.len(),
        };
        self.inpath
            .iter()
            .enumerate()
            .map(|(i, file)| -> Result<BlockRecord> {
                Ok(BlockRecord {
                    execute: file.clone(),
                    nst: pick.required("nst", &self.nst, i)?,
                    rates: pick.required("rates", &self.rates, i)?,
                    ngammacat: pick.required("ngammacat", &self.ngammacat, i)?,
                    brlenspr: pick.required("brlenspr", &self.brlenspr, i)?,
                    shapepr: pick.required("shapepr", &self.shapepr, i)?,
                    statefreqpr: pick.required("statefreqpr", &self.statefreqpr, i)?,
                    revmatpr: pick.required("revmatpr", &self.revmatpr, i)?,
                    ngen: pick.required("ngen", &self.ngen, i)?,
                    samplefreq: pick.required("samplefreq", &self.samplefreq, i)?,
                    printfreq: pick.required("printfreq", &self.printfreq, i)?,
                    burninfrac: pick.required("burninfrac", &self.burninfrac, i)?,
                    nchains: pick.required("nchains", &self.nchains, i)?,
                    nruns: pick.required("nruns", &self.nruns, i)?,
                    autoclose: pick.or_no("autoclose", &self.autoclose, i)?,
                    nowarnings: pick.or_no("nowarnings", &self.nowarnings, i)?,
                    seed: pick.optional("seed", &self.seed, i)?,
                })
            })
            .collect()
    }
}

pub fn render_blocks(records: &[BlockRecord]) -> String {
    let mut out = String::from("#NEXUS\n\n");
    for r in records {
        out.push_str("begin mrbayes;\n");
        let _ = write!(
            out,
            "\tset autoclose={} nowarnings={}",
            r.autoclose, r.nowarnings
        );
        if let Some(seed) = &r.seed {
            let _ = write!(out, " seed={}", seed);
        }
        out.push_str(";\n");
        let _ = writeln!(out, "\texecute {};", r.execute);
        let _ = writeln!(
            out,
            "\tlset nst={} rates={} ngammacat={};",
            r.nst, r.rates, r.ngammacat
        );
        let _ = writeln!(
            out,
            "\tprset brlenspr={} shapepr={} statefreqpr={} revmatpr={};",
            r.brlenspr, r.shapepr, r.statefreqpr, r.revmatpr
        );
        let _ = writeln!(
            out,
            "\tmcmc ngen={} samplefreq={} printfreq={} burninfrac={} nchains={} nruns={};",
            r.ngen, r.samplefreq, r.printfreq, r.burninfrac, r.nchains, r.nruns
        );
        out.push_str("\tsumt;\nend;\n\n");
    }
    out
}

/// Writes `<outfile>.nexus` relative to `dir`, replacing any previous file.
pub fn write_block_file(args: &BlockArgs, dir: &Path) -> Result<PathBuf> {
    if args.outfile.is_empty() {
        return Err(SweepError::InvalidBlockArgs {
            message: "--outfile must not be empty".to_string(),
        }
        .into());
    }
    let records = args.records()?;
    let path = dir.join(format!("{}.nexus", args.outfile));
    atomic_write_bytes(&path, render_blocks(&records).as_bytes())?;
    info!(path = %path.display(), blocks = records.len(), "wrote MrBayes blocks");
    Ok(path)
}
