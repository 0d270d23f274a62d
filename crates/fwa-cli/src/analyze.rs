//! # Analyze Subcommand
//!
//! Runs one analyze job described by a JSON job file:
//!
//! ```json
//! {
//!   "host": { "asset_id": 7 },
//!   "artifacts": [
//!     { "file": "dumps/host7.bin" },
//!     { "version": "ABC" },
//!     { "content_id": "5f2c..." }
//!   ],
//!   "requests": [
//!     { "image_info": { "image": 0 } },
//!     { "diff_regions": { "actual_image": 0, "original_image": 1 } }
//!   ]
//! }
//! ```
//!
//! Relative `file` paths are resolved against the job file's directory.
//! The report is printed to stdout as JSON.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use fwa_analysis::{AnalyzerRequest, Artifact};
use fwa_core::{ContentId, HostInfo};
use serde::Deserialize;

use crate::context::{ParserArgs, Services};

/// Arguments for `fwa analyze`.
#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Path to the JSON job file.
    #[arg(value_name = "JOB")]
    pub job: PathBuf,

    /// Directory of firmware images addressed by version name.
    #[arg(long, value_name = "DIR")]
    pub repository: Option<PathBuf>,

    /// Pretty-print the report.
    #[arg(long)]
    pub pretty: bool,

    #[command(flatten)]
    pub parser: ParserArgs,
}

/// The job file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobFile {
    #[serde(default)]
    pub host: HostInfo,
    pub artifacts: Vec<ArtifactSpec>,
    pub requests: Vec<AnalyzerRequest>,
}

/// One artifact entry of a job file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactSpec {
    File(PathBuf),
    ContentId(String),
    Version(String),
}

impl JobFile {
    pub fn load(path: &Path) -> Result<Self> {
        let doc = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read job file {}", path.display()))?;
        serde_json::from_str(&doc)
            .with_context(|| format!("failed to parse job file {}", path.display()))
    }

    /// Turn the artifact entries into job artifacts, reading files
    /// relative to `base`.
    pub fn artifacts(&self, base: &Path) -> Result<Vec<Artifact>> {
        self.artifacts
            .iter()
            .enumerate()
            .map(|(i, spec)| match spec {
                ArtifactSpec::File(path) => {
                    let path = if path.is_absolute() {
                        path.clone()
                    } else {
                        base.join(path)
                    };
                    let bytes = std::fs::read(&path).with_context(|| {
                        format!("artifact {i}: failed to read {}", path.display())
                    })?;
                    Ok(Artifact::blob(bytes))
                }
                ArtifactSpec::ContentId(hex) => {
                    let id = ContentId::from_hex(hex)
                        .with_context(|| format!("artifact {i}: invalid content id"))?;
                    Ok(Artifact::content_id(id))
                }
                ArtifactSpec::Version(name) => Ok(Artifact::version(name.clone())),
            })
            .collect()
    }
}

/// Execute `fwa analyze`. Exits with 2 if any request failed.
pub async fn run_analyze(args: &AnalyzeArgs, services: &Services) -> Result<u8> {
    let job = JobFile::load(&args.job)?;
    let base = args.job.parent().unwrap_or(Path::new("."));
    let artifacts = job.artifacts(base)?;

    let orchestrator = services.orchestrator(services.accessor(&args.parser, args.repository.clone()));
    let report = orchestrator
        .analyze(job.host, artifacts, job.requests)
        .await
        .context("analyze job rejected")?;

    let out = if args.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{out}");

    let failed = report.results.iter().filter(|r| r.outcome.is_err()).count();
    if failed > 0 {
        tracing::warn!(job_id = %report.job_id, failed, "some analyzer requests failed");
        return Ok(2);
    }
    Ok(0)
}
