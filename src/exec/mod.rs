//! Model execution adapter: the seam between the orchestrator and the
//! per-model runtimes.
//!
//! One adapter instance serves one model environment. The orchestrator only
//! calls `infer` once the environment is `Healthy`; the adapter reports
//! out-of-memory distinctly so the tiling retry can react to it.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

use crate::error::{Error, Result};

/// One inference invocation over one input file.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub scale: u32,
    pub tiling: Option<String>,
    pub precision: Option<String>,
    pub compute: Option<String>,
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct InferenceOutcome {
    pub output: PathBuf,
}

/// Adapter-level failures, classified for the orchestrator's retry policy.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("inference failed: {0}")]
    Failed(String),

    #[error("model runtime unavailable: {0}")]
    NotAvailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ExecError> for Error {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::ResourceExhausted(message) => Error::ResourceExhausted(message),
            ExecError::Failed(message) => Error::Execution(message),
            ExecError::NotAvailable(message) => Error::EnvironmentNotReady(message),
            ExecError::Io(err) => Error::Io(err),
        }
    }
}

/// Polymorphic execution capability; one implementation per model runtime.
pub trait ModelExecutionAdapter: Send + Sync {
    fn infer(&self, request: &InferenceRequest) -> std::result::Result<InferenceOutcome, ExecError>;
}

/// Stderr fragments that classify a runtime failure as out-of-memory.
const OOM_MARKERS: [&str; 5] = [
    "out of memory",
    "cuda out of memory",
    "cannot allocate memory",
    "std::bad_alloc",
    "memoryerror",
];

/// Subprocess-backed adapter: launches the model's isolated runtime with a
/// conventional argument contract and classifies its exit.
pub struct CommandAdapter {
    runtime: PathBuf,
    entrypoint: String,
    weights: PathBuf,
    model_dir: PathBuf,
    extra_env: Vec<(String, String)>,
}

impl CommandAdapter {
    pub fn new(runtime: PathBuf, entrypoint: String, weights: PathBuf, model_dir: PathBuf) -> Self {
        Self {
            runtime,
            entrypoint,
            weights,
            model_dir,
            extra_env: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.extra_env.push((key.into(), value.into()));
        self
    }

    /// The argument vector for an invocation; exposed for inspection.
    pub fn build_args(&self, request: &InferenceRequest) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        if is_script_entrypoint(&self.entrypoint) {
            let mut script = PathBuf::from(&self.entrypoint);
            if !script.is_absolute() {
                script = self.model_dir.join(script);
            }
            args.push(script.to_string_lossy().into_owned());
        } else {
            args.push("-m".into());
            args.push(self.entrypoint.clone());
        }
        args.push("--weights".into());
        args.push(self.weights.to_string_lossy().into_owned());
        args.push("--input".into());
        args.push(request.input.to_string_lossy().into_owned());
        args.push("--output".into());
        args.push(request.output.to_string_lossy().into_owned());
        args.push("--scale".into());
        args.push(request.scale.to_string());
        if let Some(tiling) = &request.tiling {
            args.push("--tiling".into());
            args.push(tiling.clone());
        }
        if let Some(precision) = &request.precision {
            args.push("--precision".into());
            args.push(precision.clone());
        }
        if let Some(compute) = &request.compute {
            args.push("--compute".into());
            args.push(compute.clone());
        }
        args.extend(request.extra_args.iter().cloned());
        args
    }
}

impl ModelExecutionAdapter for CommandAdapter {
    fn infer(&self, request: &InferenceRequest) -> std::result::Result<InferenceOutcome, ExecError> {
        if !request.input.is_file() {
            return Err(ExecError::Failed(format!(
                "input file not found: {}",
                request.input.display()
            )));
        }
        if !self.weights.is_file() {
            return Err(ExecError::NotAvailable(format!(
                "model weights not found: {}",
                self.weights.display()
            )));
        }
        if let Some(parent) = request.output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut command = Command::new(&self.runtime);
        command.args(self.build_args(request));
        for (key, value) in &self.extra_env {
            command.env(key, value);
        }

        let output = command.output().map_err(|err| {
            ExecError::NotAvailable(format!(
                "failed to launch runtime {}: {err}",
                self.runtime.display()
            ))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lowered = stderr.to_lowercase();
            if OOM_MARKERS.iter().any(|marker| lowered.contains(marker)) {
                return Err(ExecError::ResourceExhausted(tail(&stderr)));
            }
            return Err(ExecError::Failed(tail(&stderr)));
        }
        if !request.output.exists() {
            return Err(ExecError::Failed(
                "runtime exited cleanly but produced no output".into(),
            ));
        }
        Ok(InferenceOutcome {
            output: request.output.clone(),
        })
    }
}

fn is_script_entrypoint(entrypoint: &str) -> bool {
    entrypoint.ends_with(".py") || entrypoint.contains('/') || entrypoint.contains('\\')
}

fn tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().rev().take(5).collect();
    let mut ordered: Vec<&str> = lines.into_iter().rev().collect();
    if ordered.is_empty() {
        ordered.push("no diagnostic output");
    }
    ordered.join("\n")
}

/// Deterministic CPU upscale: the declared baseline every run can fall back
/// to when a model runtime is unavailable.
pub fn visual_upscale(input: &Path, output: &Path, scale: u32) -> Result<()> {
    if scale == 0 {
        return Err(Error::Validation("scale must be positive".into()));
    }
    let image = image::open(input)
        .map_err(|err| Error::Execution(format!("could not decode {}: {err}", input.display())))?;
    let resized = image.resize_exact(
        image.width() * scale,
        image.height() * scale,
        image::imageops::FilterType::CatmullRom,
    );
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    resized
        .save(output)
        .map_err(|err| Error::Execution(format!("could not write {}: {err}", output.display())))?;
    Ok(())
}
