use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use mbsweep_runner::{
    BlockArgs, GenerateOptions, Phases, ProcessRunner, SourceSpec, Toolchain,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "mbsweep",
    version,
    about = "Generate, run and summarize clone-addition MrBayes sweeps"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build freq<key>/{sameclone,baseline,diffclone} run directories.
    Generate {
        #[arg(long, short = 'o')]
        output: PathBuf,
        /// Number of 6-sequence samples per run directory.
        #[arg(long, short = 'n')]
        number: usize,
        /// Seed for the MCMC random generator.
        #[arg(long, short = 's')]
        seed: Option<u64>,
        /// Alignment index at which gaps pad shorter sequences.
        #[arg(long = "insert-gap-at")]
        insert_gap_at: Option<u64>,
        #[arg(long, num_args = 2, value_names = ["DIR", "PATTERN"], required = true)]
        same_clone: Vec<String>,
        #[arg(long, num_args = 2, value_names = ["DIR", "PATTERN"], required = true)]
        diff_clone: Vec<String>,
        #[arg(long)]
        tools: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Drive the selected pipeline phases for one parameters.json.
    Run {
        parameters: PathBuf,
        #[arg(long)]
        prepare: bool,
        #[arg(long)]
        run: bool,
        #[arg(long)]
        postprocess: bool,
        #[arg(long)]
        tools: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Collect the information value of every replicate into one CSV.
    Extract {
        manifests: Vec<PathBuf>,
        /// Also pick up every parameters.json below this directory.
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long, default_value = "results.csv")]
        out: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Write MrBayes blocks for a set of alignment files.
    Block(BlockCommand),
    /// Show how a directory's files map to frequency keys.
    Scan {
        dir: PathBuf,
        #[arg(default_value = "")]
        pattern: String,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct BlockCommand {
    #[arg(long, num_args = 1.., required = true)]
    inpath: Vec<String>,
    #[arg(long)]
    outfile: String,
    #[arg(long, num_args = 1..)]
    nst: Vec<String>,
    #[arg(long, num_args = 1..)]
    rates: Vec<String>,
    #[arg(long, num_args = 1..)]
    ngammacat: Vec<String>,
    #[arg(long, num_args = 1..)]
    brlenspr: Vec<String>,
    #[arg(long, num_args = 1..)]
    shapepr: Vec<String>,
    #[arg(long, num_args = 1..)]
    statefreqpr: Vec<String>,
    #[arg(long, num_args = 1..)]
    revmatpr: Vec<String>,
    #[arg(long, num_args = 1..)]
    ngen: Vec<String>,
    #[arg(long, num_args = 1..)]
    samplefreq: Vec<String>,
    #[arg(long, num_args = 1..)]
    printfreq: Vec<String>,
    #[arg(long, num_args = 1..)]
    burninfrac: Vec<String>,
    #[arg(long, num_args = 1..)]
    nchains: Vec<String>,
    #[arg(long, num_args = 1..)]
    nruns: Vec<String>,
    #[arg(long, num_args = 1..)]
    autoclose: Vec<String>,
    #[arg(long, num_args = 1..)]
    nowarnings: Vec<String>,
    #[arg(long, num_args = 1..)]
    seed: Vec<String>,
}

impl From<BlockCommand> for BlockArgs {
    fn from(value: BlockCommand) -> Self {
        BlockArgs {
            inpath: value.inpath,
            outfile: value.outfile,
            nst: value.nst,
            rates: value.rates,
            ngammacat: value.ngammacat,
            brlenspr: value.brlenspr,
            shapepr: value.shapepr,
            statefreqpr: value.statefreqpr,
            revmatpr: value.revmatpr,
            ngen: value.ngen,
            samplefreq: value.samplefreq,
            printfreq: value.printfreq,
            burninfrac: value.burninfrac,
            nchains: value.nchains,
            nruns: value.nruns,
            autoclose: value.autoclose,
            nowarnings: value.nowarnings,
            seed: value.seed,
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            if payload.get("ok") == Some(&Value::Bool(false)) {
                std::process::exit(1);
            }
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", err.to_string(), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("MBSWEEP_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Generate {
            output,
            number,
            seed,
            insert_gap_at,
            same_clone,
            diff_clone,
            tools,
            json,
        } => {
            let toolchain = Toolchain::load(tools.as_deref())?;
            let options = GenerateOptions {
                output_root: output,
                same_clone: source_spec("--same-clone", same_clone)?,
                diff_clone: source_spec("--diff-clone", diff_clone)?,
                run_count: number,
                seed,
                insert_gap_at,
            };
            let report = mbsweep_runner::generate(&options, &toolchain, &ProcessRunner)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "generate",
                    "created": paths_to_json(&report.created),
                    "skipped": paths_to_json(&report.skipped),
                })));
            }
            for dir in &report.created {
                println!("created: {}", dir.display());
            }
            for dir in &report.skipped {
                println!("skipped: {}", dir.display());
            }
        }
        Commands::Run {
            parameters,
            prepare,
            run,
            postprocess,
            tools,
            json,
        } => {
            let toolchain = Toolchain::load(tools.as_deref())?;
            let phases = Phases {
                prepare,
                run,
                postprocess,
            };
            let result = mbsweep_runner::drive(&parameters, phases, &toolchain, &ProcessRunner)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run",
                    "run_dir": result.run_dir.display().to_string(),
                    "stage": result.stage.as_str(),
                    "invocations": result.invocations,
                })));
            }
            println!("run_dir: {}", result.run_dir.display());
            println!("stage: {}", result.stage.as_str());
            println!("invocations: {}", result.invocations);
        }
        Commands::Extract {
            mut manifests,
            root,
            out,
            json,
        } => {
            if let Some(root) = root {
                manifests.extend(mbsweep_runner::discover_manifests(&root)?);
            }
            if manifests.is_empty() {
                return Err(anyhow!(
                    "no manifests given (pass parameters.json paths or --root)"
                ));
            }
            let report = mbsweep_runner::extract_all(&manifests);
            mbsweep_runner::write_dataset(&report.rows, &out)?;
            let failures: Vec<Value> = report
                .failures
                .iter()
                .map(|(path, error)| {
                    json!({ "manifest": path.display().to_string(), "error": error })
                })
                .collect();
            if json {
                return Ok(Some(json!({
                    "ok": failures.is_empty(),
                    "command": "extract",
                    "dataset": out.display().to_string(),
                    "manifests": manifests.len(),
                    "rows": report.rows.len(),
                    "failures": failures,
                })));
            }
            println!("dataset: {}", out.display());
            println!("rows: {}", report.rows.len());
            for (path, error) in &report.failures {
                eprintln!("failed: {}: {}", path.display(), error);
            }
            if !report.failures.is_empty() {
                return Err(anyhow!(
                    "{} of {} manifests could not be extracted",
                    report.failures.len(),
                    manifests.len()
                ));
            }
        }
        Commands::Block(block) => {
            let args: BlockArgs = block.into();
            let path = mbsweep_runner::write_block_file(&args, Path::new("."))?;
            println!("wrote: {}", path.display());
        }
        Commands::Scan { dir, pattern, json } => {
            let files = mbsweep_runner::categorize(&dir, &pattern)?;
            if json {
                let entries: Vec<Value> = files
                    .values()
                    .map(|f| {
                        json!({
                            "key": f.key.0,
                            "label": f.raw_label,
                            "path": f.path.display().to_string(),
                        })
                    })
                    .collect();
                return Ok(Some(json!({
                    "ok": true,
                    "command": "scan",
                    "files": entries,
                })));
            }
            for f in files.values() {
                println!("{}\t{}\t{}", f.key, f.raw_label, f.path.display());
            }
        }
    }
    Ok(None)
}

fn source_spec(flag: &str, values: Vec<String>) -> Result<SourceSpec> {
    match <[String; 2]>::try_from(values) {
        Ok([dir, pattern]) => Ok(SourceSpec {
            dir: PathBuf::from(dir),
            pattern,
        }),
        Err(values) => Err(anyhow!(
            "{} expects DIR PATTERN, got {} values",
            flag,
            values.len()
        )),
    }
}

fn paths_to_json(paths: &[PathBuf]) -> Value {
    Value::Array(
        paths
            .iter()
            .map(|p| Value::String(p.display().to_string()))
            .collect(),
    )
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Generate { json, .. }
        | Commands::Run { json, .. }
        | Commands::Extract { json, .. }
        | Commands::Scan { json, .. } => *json,
        Commands::Block(_) => false,
    }
}
