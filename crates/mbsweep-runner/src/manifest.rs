use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::atomic_write_json_pretty;

pub const MANIFEST_FILE: &str = "parameters.json";

/// Experimental condition: what, if anything, is appended to the base sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Case {
    SameClone,
    Baseline,
    DiffClone,
}

impl Case {
    /// Build order matters: `SameClone` produces the base samples the others reuse.
    pub const ALL: [Case; 3] = [Case::SameClone, Case::Baseline, Case::DiffClone];

    pub fn as_str(self) -> &'static str {
        match self {
            Case::SameClone => "sameclone",
            Case::Baseline => "baseline",
            Case::DiffClone => "diffclone",
        }
    }

    pub fn is_combined(self) -> bool {
        !matches!(self, Case::Baseline)
    }
}

impl fmt::Display for Case {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hyperparameters forwarded to the block generator, one `mcmc.<flag>` each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McmcParams {
    #[serde(rename = "mcmc.nst")]
    pub nst: u32,
    #[serde(rename = "mcmc.rates")]
    pub rates: String,
    #[serde(rename = "mcmc.ngammacat")]
    pub ngammacat: u32,
    #[serde(rename = "mcmc.brlenspr")]
    pub brlenspr: String,
    #[serde(rename = "mcmc.shapepr")]
    pub shapepr: String,
    #[serde(rename = "mcmc.statefreqpr")]
    pub statefreqpr: String,
    #[serde(rename = "mcmc.revmatpr")]
    pub revmatpr: String,
    #[serde(rename = "mcmc.seed", default)]
    pub seed: Option<u64>,
    #[serde(rename = "mcmc.ngen")]
    pub ngen: u64,
    #[serde(rename = "mcmc.samplefreq")]
    pub samplefreq: u64,
    #[serde(rename = "mcmc.printfreq")]
    pub printfreq: u64,
    #[serde(rename = "mcmc.burninfrac")]
    pub burninfrac: f64,
    #[serde(rename = "mcmc.nchains")]
    pub nchains: u32,
    #[serde(rename = "mcmc.nruns")]
    pub nruns: u32,
    #[serde(rename = "mcmc.autoclose")]
    pub autoclose: bool,
    #[serde(rename = "mcmc.nowarnings")]
    pub nowarnings: bool,
}

impl McmcParams {
    /// The fixed GTR+I+G configuration every generated run uses.
    pub fn with_seed(seed: Option<u64>) -> Self {
        Self {
            nst: 6,
            rates: "invgamma".to_string(),
            ngammacat: 4,
            brlenspr: "unconstrained:GammaDir(1.0,0.100,1.0,1.0)".to_string(),
            shapepr: "exp(1.0)".to_string(),
            statefreqpr: "dirichlet(1.0,1.0,1.0,1.0)".to_string(),
            revmatpr: "Dirichlet(1.0,1.0,1.0,1.0,1.0,1.0)".to_string(),
            seed,
            ngen: 10_000_000,
            samplefreq: 1000,
            printfreq: 1000,
            burninfrac: 0.1,
            nchains: 4,
            nruns: 2,
            autoclose: true,
            nowarnings: true,
        }
    }
}

/// Contents of a run directory's `parameters.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    #[serde(rename = "origin.is_combined")]
    pub is_combined: bool,
    #[serde(rename = "origin.freq")]
    pub freq: String,
    #[serde(rename = "origin.prefix")]
    pub case: Case,
    #[serde(
        rename = "origin.combine_path",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub combine_path: Option<PathBuf>,
    pub inputs: Vec<String>,
    #[serde(flatten)]
    pub mcmc: McmcParams,
    #[serde(rename = "fasta_to_nexus.insert_gap_at", default)]
    pub insert_gap_at: Option<u64>,
}

impl RunManifest {
    pub fn write(&self, run_dir: &Path) -> Result<PathBuf> {
        let path = run_dir.join(MANIFEST_FILE);
        atomic_write_json_pretty(&path, self)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read manifest {}: {}", path.display(), e))?;
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid manifest {}: {}", path.display(), e))
    }
}

/// Reads a manifest as an insertion-ordered object so unknown keys survive.
pub(crate) fn load_raw(path: &Path) -> Result<Map<String, Value>> {
    let raw = fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read manifest {}: {}", path.display(), e))?;
    match serde_json::from_str::<Value>(&raw)
        .map_err(|e| anyhow!("invalid manifest {}: {}", path.display(), e))?
    {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!(
            "manifest {} must be a JSON object, found {}",
            path.display(),
            value_type_name(&other)
        )),
    }
}

pub(crate) fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scratch_dir;

    fn sample(case: Case) -> RunManifest {
        RunManifest {
            is_combined: case.is_combined(),
            freq: "0.10".to_string(),
            case,
            combine_path: case
                .is_combined()
                .then(|| PathBuf::from("/data/freq0.10.fasta")),
            inputs: vec![
                format!("{}_samp_1.fasta", case),
                format!("{}_samp_2.fasta", case),
            ],
            mcmc: McmcParams::with_seed(None),
            insert_gap_at: None,
        }
    }

    #[test]
    fn manifest_uses_dotted_flat_keys() {
        let value = serde_json::to_value(sample(Case::DiffClone)).expect("serialize");
        let obj = value.as_object().expect("object");
        assert_eq!(obj["origin.prefix"], "diffclone");
        assert_eq!(obj["origin.is_combined"], true);
        assert_eq!(obj["origin.combine_path"], "/data/freq0.10.fasta");
        assert_eq!(obj["mcmc.nst"], 6);
        assert_eq!(obj["mcmc.burninfrac"], 0.1);
        assert_eq!(obj["mcmc.autoclose"], true);
        assert!(obj["mcmc.seed"].is_null());
        assert!(obj["fasta_to_nexus.insert_gap_at"].is_null());
    }

    #[test]
    fn unset_seed_and_gap_index_are_written_as_null() {
        let dir = scratch_dir("manifest_nulls");
        let path = sample(Case::Baseline).write(&dir).expect("write");
        let raw = load_raw(&path).expect("raw");
        assert_eq!(raw.get("mcmc.seed"), Some(&serde_json::Value::Null));
        assert_eq!(
            raw.get("fasta_to_nexus.insert_gap_at"),
            Some(&serde_json::Value::Null)
        );
        let reloaded = RunManifest::load(&path).expect("load");
        assert_eq!(reloaded.mcmc.seed, None);
        assert_eq!(reloaded.insert_gap_at, None);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn baseline_omits_combine_path() {
        let value = serde_json::to_value(sample(Case::Baseline)).expect("serialize");
        assert!(value.get("origin.combine_path").is_none());
        assert_eq!(value["origin.is_combined"], false);
    }

    #[test]
    fn manifest_written_to_disk_reloads_identically() {
        let dir = scratch_dir("manifest");
        let mut manifest = sample(Case::SameClone);
        manifest.mcmc.seed = Some(42);
        manifest.insert_gap_at = Some(120);
        let path = manifest.write(&dir).expect("write");
        assert_eq!(path, dir.join(MANIFEST_FILE));
        assert_eq!(RunManifest::load(&path).expect("load"), manifest);

        let raw = load_raw(&path).expect("raw");
        assert_eq!(raw["mcmc.seed"], 42);
        assert_eq!(raw["fasta_to_nexus.insert_gap_at"], 120);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn raw_loader_rejects_non_objects() {
        let dir = scratch_dir("manifest_array");
        let path = dir.join(MANIFEST_FILE);
        fs::write(&path, "[1, 2]").expect("write");
        let err = load_raw(&path).expect_err("array manifest");
        assert!(err.to_string().contains("found array"), "{}", err);
        let _ = fs::remove_dir_all(dir);
    }
}
