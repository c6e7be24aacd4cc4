use std::path::PathBuf;

/// Failures the sweep surfaces to the operator. Nothing here is retried.
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("invalid file pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("captured label '{label}' in {path} is not a number")]
    InvalidKey { label: String, path: PathBuf },

    #[error("duplicate frequency key {key}: {first} and {second} both match")]
    DuplicateKey {
        key: f64,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("frequency {freq} has no matching file in the different-clone input set")]
    MissingFrequency { freq: String },

    #[error("subsampler produced no usable sequences in {path}")]
    EmptySample { path: PathBuf },

    #[error("input file name '{name}' does not end in .fasta")]
    BadInputName { name: String },

    #[error("manifest {path} is missing required key '{key}'")]
    MissingManifestKey { path: PathBuf, key: String },

    #[error("manifest key '{key}' has unsupported value {value}")]
    InvalidFlagValue { key: String, value: String },

    #[error("{program} exited with {status} (cwd {cwd})")]
    ToolFailed {
        program: String,
        status: String,
        cwd: PathBuf,
    },

    #[error("expected artifact {path} is missing; run an earlier phase first")]
    MissingArtifact { path: PathBuf },

    #[error("no information table header found in {path}")]
    TableNotFound { path: PathBuf },

    #[error("information table in {path} has no cell ({row}, {column}): {detail}")]
    MalformedTable {
        path: PathBuf,
        row: usize,
        column: usize,
        detail: String,
    },

    #[error("block arguments: {message}")]
    InvalidBlockArgs { message: String },
}
