//! Job execution: drives one job's units in order with fallback, rollback,
//! and reporting policy.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::defaults::{CONSERVATIVE_TILE_SIZE, DEFAULT_TILE_SIZE, MINIMUM_RAM_GB, MINIMUM_VRAM_GB};
use crate::env::paths::slugify;
use crate::env::{EnvPaths, EnvironmentManager};
use crate::error::{Error, Result, UserReport};
use crate::exec::{
    visual_upscale, CommandAdapter, ExecError, InferenceRequest, ModelExecutionAdapter,
};
use crate::hardware::HardwareProfile;
use crate::job::report::{RunReport, RunWarning, UnitReport, UnitStatus, WarningKind};
use crate::job::request::{ComputeMode, RunRequest, RunUnit};
use crate::job::session::{JobSnapshot, SessionStore};
use crate::job::tracker::OutputTracker;
use crate::job::JobState;
use crate::metadata::AssetMetadata;
use crate::registry::{LicenseClass, ModelCatalog, ModelDescriptor};
use crate::stitch::RasterStitcher;

/// Builds the execution adapter for a model environment.
pub trait AdapterFactory: Send + Sync {
    fn adapter_for(&self, descriptor: &ModelDescriptor) -> Result<Box<dyn ModelExecutionAdapter>>;
}

/// Default factory: subprocess adapter rooted in the model's isolated
/// runtime directory.
pub struct CommandAdapterFactory {
    paths: EnvPaths,
}

impl CommandAdapterFactory {
    pub fn new(paths: EnvPaths) -> Self {
        Self { paths }
    }
}

impl AdapterFactory for CommandAdapterFactory {
    fn adapter_for(&self, descriptor: &ModelDescriptor) -> Result<Box<dyn ModelExecutionAdapter>> {
        let install = self.paths.install_paths(descriptor);
        let runtime = install.runtime_dir.join("bin").join("python");
        Ok(Box::new(CommandAdapter::new(
            runtime,
            descriptor.entrypoint.clone(),
            install.weights.clone(),
            install.root.clone(),
        )))
    }
}

/// Everything the runner needs about one job in flight.
pub struct JobContext {
    pub id: String,
    pub request: RunRequest,
    pub cancel: Arc<AtomicBool>,
    pub progress: Arc<AtomicUsize>,
}

impl JobContext {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// Options after Safe Mode enforcement and compute resolution.
struct EffectiveOptions {
    scale: u32,
    tiling: Option<String>,
    precision: Option<String>,
    compute_label: String,
}

/// Executes jobs one at a time on behalf of the queue.
pub struct JobRunner {
    env: Arc<EnvironmentManager>,
    hardware: HardwareProfile,
    adapters: Arc<dyn AdapterFactory>,
    stitcher: Arc<dyn RasterStitcher>,
    session: Arc<SessionStore>,
}

impl JobRunner {
    pub fn new(
        env: Arc<EnvironmentManager>,
        hardware: HardwareProfile,
        adapters: Arc<dyn AdapterFactory>,
        stitcher: Arc<dyn RasterStitcher>,
        session: Arc<SessionStore>,
    ) -> Self {
        Self {
            env,
            hardware,
            adapters,
            stitcher,
            session,
        }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        self.env.catalog()
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// Record a freshly enqueued job so a crash before start is recoverable.
    pub fn record_pending(&self, job_id: &str, request: &RunRequest) {
        self.snapshot(job_id, request, JobState::Pending, 0);
    }

    /// Run one job to a terminal state. Always returns a report.
    pub async fn run(&self, ctx: &JobContext) -> RunReport {
        let started_at = Utc::now();
        let clock = Instant::now();

        if ctx.cancelled() {
            // Cancelled while Pending: no unit ever starts.
            return self.finish(
                ctx,
                JobState::Cancelled,
                started_at,
                clock,
                Vec::new(),
                skipped_units_from(&ctx.request, 0),
                None,
            );
        }
        self.snapshot(&ctx.id, &ctx.request, JobState::Running, 0);
        log::info!("Job {} started ({} units)", ctx.id, ctx.request.units.len());

        let Some(descriptor) = self.catalog().get(&ctx.request.model).cloned() else {
            let error = Error::Validation(format!("unknown model '{}'", ctx.request.model));
            return self.finish(
                ctx,
                JobState::Failed,
                started_at,
                clock,
                Vec::new(),
                skipped_units_from(&ctx.request, 0),
                Some(error.user_report()),
            );
        };

        let options = self.effective_options(&ctx.request, &descriptor);
        let mut job_warnings = Vec::new();
        if ctx.request.compute == ComputeMode::SafeMode {
            job_warnings.push(RunWarning::new(
                WarningKind::Other,
                "Safe Mode active: CPU compute and conservative model defaults enforced.",
            ));
        }
        if descriptor.license_class != LicenseClass::Permissive {
            job_warnings.push(RunWarning::new(
                WarningKind::License,
                format!(
                    "Model '{}' license class is {}.",
                    descriptor.name, descriptor.license_class
                ),
            ));
        }

        // Readiness is a job-level gate for standard runs; comparison legs
        // fall back per unit instead.
        if !ctx.request.is_comparison() {
            if let Err(err) = self.env.ensure_healthy(&descriptor.name).await {
                log::warn!("Job {} failed fast: {err}", ctx.id);
                return self.finish(
                    ctx,
                    JobState::Failed,
                    started_at,
                    clock,
                    job_warnings,
                    skipped_units_from(&ctx.request, 0),
                    Some(err.user_report()),
                );
            }
        }

        let mut tracker = match OutputTracker::new(&ctx.request.output_dir) {
            Ok(tracker) => tracker,
            Err(err) => {
                return self.finish(
                    ctx,
                    JobState::Failed,
                    started_at,
                    clock,
                    job_warnings,
                    skipped_units_from(&ctx.request, 0),
                    Some(err.user_report()),
                );
            }
        };

        let mut units = Vec::new();
        let mut cancelled = false;
        for (index, unit) in ctx.request.units.iter().enumerate() {
            // Cancellation is observed at unit boundaries only.
            if ctx.cancelled() {
                tracker.discard_staged();
                units.extend(skipped_units_from(&ctx.request, index));
                cancelled = true;
                break;
            }

            let unit_clock = Instant::now();
            let outcome = self
                .run_unit(unit, &descriptor, &ctx.request, &options, &mut tracker)
                .await;
            let duration_ms = unit_clock.elapsed().as_millis() as u64;

            match outcome {
                Ok((outputs, warnings)) => {
                    tracker.commit_unit();
                    units.push(UnitReport {
                        label: unit.label(),
                        status: UnitStatus::Completed,
                        outputs,
                        error: None,
                        duration_ms,
                        warnings,
                    });
                }
                Err(err) => {
                    // One unit failing never aborts the batch.
                    tracker.discard_staged();
                    log::error!("Job {} unit '{}' failed: {err}", ctx.id, unit.label());
                    units.push(UnitReport {
                        label: unit.label(),
                        status: UnitStatus::Failed,
                        outputs: Vec::new(),
                        error: Some(err.user_report()),
                        duration_ms,
                        warnings: Vec::new(),
                    });
                }
            }

            ctx.progress.store(index + 1, Ordering::SeqCst);
            self.snapshot(&ctx.id, &ctx.request, JobState::Running, index + 1);

            if ctx.cancelled() && index + 1 < ctx.request.units.len() {
                units.extend(skipped_units_from(&ctx.request, index + 1));
                cancelled = true;
                break;
            }
        }

        let state = if cancelled {
            JobState::Cancelled
        } else {
            let completed = units
                .iter()
                .filter(|unit| unit.status == UnitStatus::Completed)
                .count();
            if completed == 0 {
                JobState::Failed
            } else {
                JobState::Succeeded
            }
        };
        self.finish(ctx, state, started_at, clock, job_warnings, units, None)
    }

    async fn run_unit(
        &self,
        unit: &RunUnit,
        descriptor: &ModelDescriptor,
        request: &RunRequest,
        options: &EffectiveOptions,
        tracker: &mut OutputTracker,
    ) -> Result<(Vec<PathBuf>, Vec<RunWarning>)> {
        match unit {
            RunUnit::Asset(asset) => {
                let mut warnings = preservation_warnings(asset, request);
                let output = tracker.stage(output_name(
                    &asset.path,
                    options.scale,
                    &descriptor.name,
                    &request.output_format.extension_for(&asset.path),
                ));
                let adapter = self.adapters.adapter_for(descriptor)?;
                self.infer_with_retry(adapter.as_ref(), &asset.path, &output, options, &mut warnings)?;
                Ok((vec![output], warnings))
            }
            RunUnit::Group { group, assets } => {
                let reasons = group.blocking_reasons();
                if !reasons.is_empty() {
                    return Err(Error::Validation(format!(
                        "stitch group is not executable: {}",
                        reasons.join("; ")
                    )));
                }
                let mut warnings = Vec::new();
                let inputs: Vec<PathBuf> =
                    assets.iter().map(|asset| asset.path.clone()).collect();
                let mosaic_name = format!(
                    "{}_mosaic.tif",
                    slugify(group.asset_ids.first().map(String::as_str).unwrap_or("group"))
                );
                let mosaic_path = tracker.stage(&mosaic_name);
                let stitch_report = self.stitcher.stitch(&inputs, &mosaic_path)?;
                if !stitch_report.lost_fields.is_empty() {
                    warnings.push(RunWarning::critical(
                        WarningKind::MetadataLoss,
                        format!(
                            "Stitched mosaic could not preserve: {}.",
                            stitch_report.lost_fields.join(", ")
                        ),
                    ));
                }
                if let Some(asset) = assets.first() {
                    warnings.extend(preservation_warnings(asset, request));
                }

                let output = tracker.stage(output_name(
                    &mosaic_path,
                    options.scale,
                    &descriptor.name,
                    &request.output_format.extension_for(&mosaic_path),
                ));
                let adapter = self.adapters.adapter_for(descriptor)?;
                self.infer_with_retry(adapter.as_ref(), &mosaic_path, &output, options, &mut warnings)?;
                Ok((vec![output], warnings))
            }
            RunUnit::Compare { asset, model } => {
                let leg = self
                    .catalog()
                    .get(model)
                    .cloned()
                    .ok_or_else(|| Error::Validation(format!("unknown model '{model}'")))?;
                let mut warnings = preservation_warnings(asset, request);
                if leg.license_class != LicenseClass::Permissive {
                    warnings.push(RunWarning::new(
                        WarningKind::License,
                        format!("Model '{}' license class is {}.", leg.name, leg.license_class),
                    ));
                }
                let output = tracker.stage(output_name(
                    &asset.path,
                    options.scale,
                    &leg.name,
                    &request.output_format.extension_for(&asset.path),
                ));

                match self.env.ensure_healthy(&leg.name).await {
                    Ok(()) => {
                        let adapter = self.adapters.adapter_for(&leg)?;
                        self.infer_with_retry(
                            adapter.as_ref(),
                            &asset.path,
                            &output,
                            options,
                            &mut warnings,
                        )?;
                    }
                    Err(err) => {
                        // Unhealthy comparison leg: baseline visual upscale,
                        // recorded as a substitution, never a silent success.
                        visual_upscale(&asset.path, &output, options.scale)?;
                        warnings.push(RunWarning::critical(
                            WarningKind::Substitution,
                            format!(
                                "Model '{}' unavailable ({}); produced the baseline visual upscale instead.",
                                leg.name,
                                err.user_report().summary
                            ),
                        ));
                    }
                }
                Ok((vec![output], warnings))
            }
        }
    }

    /// Full-extent attempt first; one tiled retry on an out-of-memory
    /// failure, then the unit fails.
    fn infer_with_retry(
        &self,
        adapter: &dyn ModelExecutionAdapter,
        input: &Path,
        output: &Path,
        options: &EffectiveOptions,
        warnings: &mut Vec<RunWarning>,
    ) -> Result<()> {
        let request = InferenceRequest {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            scale: options.scale,
            tiling: options.tiling.clone(),
            precision: options.precision.clone(),
            compute: Some(options.compute_label.clone()),
            extra_args: Vec::new(),
        };
        match adapter.infer(&request) {
            Ok(_) => Ok(()),
            Err(ExecError::ResourceExhausted(message)) => {
                let tile = self.fallback_tile_size();
                log::warn!(
                    "Out of memory on {}; retrying with {tile} px tiles",
                    input.display()
                );
                warnings.push(RunWarning::new(
                    WarningKind::Resource,
                    format!("Out of memory at full extent ({message}); retried with {tile} px tiles."),
                ));
                let retry = InferenceRequest {
                    tiling: Some(format!("{tile} px")),
                    ..request
                };
                adapter.infer(&retry).map(|_| ()).map_err(Error::from)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn fallback_tile_size(&self) -> u32 {
        let headroom_low = if self.hardware.gpu_available {
            self.hardware.vram_gb <= MINIMUM_VRAM_GB
        } else {
            self.hardware.ram_gb < MINIMUM_RAM_GB
        };
        if headroom_low {
            CONSERVATIVE_TILE_SIZE
        } else {
            DEFAULT_TILE_SIZE
        }
    }

    fn effective_options(
        &self,
        request: &RunRequest,
        descriptor: &ModelDescriptor,
    ) -> EffectiveOptions {
        let scale = request
            .options
            .scale
            .or(descriptor.default_options.scale)
            .or_else(|| descriptor.scales.first().copied())
            .unwrap_or(2);

        let (tiling, precision) = if request.compute == ComputeMode::SafeMode {
            // Caller-supplied advanced fields are not trusted in Safe Mode.
            (
                descriptor
                    .default_options
                    .tiling
                    .clone()
                    .or_else(|| Some(format!("{DEFAULT_TILE_SIZE} px"))),
                descriptor
                    .default_options
                    .precision
                    .clone()
                    .or_else(|| Some("fp32".into())),
            )
        } else {
            (request.options.tiling.clone(), request.options.precision.clone())
        };

        let compute_label = match request.compute {
            ComputeMode::Cpu | ComputeMode::SafeMode => "CPU".to_string(),
            ComputeMode::Gpu => "GPU".to_string(),
            ComputeMode::Auto => {
                if self.hardware.gpu_available {
                    "GPU".to_string()
                } else {
                    "CPU".to_string()
                }
            }
        };

        EffectiveOptions {
            scale,
            tiling,
            precision,
            compute_label,
        }
    }

    fn snapshot(&self, job_id: &str, request: &RunRequest, state: JobState, completed: usize) {
        let snapshot = JobSnapshot {
            job_id: job_id.to_string(),
            state,
            completed_units: completed,
            total_units: request.units.len(),
            request: request.clone(),
            updated_at: Utc::now(),
        };
        if let Err(err) = self.session.record(snapshot) {
            log::warn!("Could not persist session snapshot for {job_id}: {err}");
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        ctx: &JobContext,
        state: JobState,
        started_at: chrono::DateTime<Utc>,
        clock: Instant,
        warnings: Vec<RunWarning>,
        units: Vec<UnitReport>,
        error: Option<UserReport>,
    ) -> RunReport {
        let report = RunReport {
            job_id: ctx.id.clone(),
            state,
            model: ctx.request.model.clone(),
            compute: ctx.request.compute,
            scale: ctx.request.options.scale,
            tiling: ctx.request.options.tiling.clone(),
            precision: ctx.request.options.precision.clone(),
            started_at,
            completed_at: Utc::now(),
            duration_ms: clock.elapsed().as_millis() as u64,
            units,
            warnings,
            error,
        };
        self.snapshot(&ctx.id, &ctx.request, state, report.completed_units());

        let report_path = self
            .env
            .env_paths()
            .reports_dir()
            .join(format!("{}.json", ctx.id));
        if let Err(err) = report.export(&report_path) {
            log::warn!("Could not export report for {}: {err}", ctx.id);
        }
        log::info!("Job {} finished: {}", ctx.id, state);
        report
    }
}

fn skipped_units_from(request: &RunRequest, from: usize) -> Vec<UnitReport> {
    request.units[from..]
        .iter()
        .map(|unit| UnitReport {
            label: unit.label(),
            status: UnitStatus::Skipped,
            outputs: Vec::new(),
            error: None,
            duration_ms: 0,
            warnings: Vec::new(),
        })
        .collect()
}

fn preservation_warnings(asset: &AssetMetadata, request: &RunRequest) -> Vec<RunWarning> {
    let mut warnings = Vec::new();
    if asset.is_geospatial()
        && !request
            .output_format
            .preserves_metadata(asset.format.as_deref())
    {
        warnings.push(RunWarning::critical(
            WarningKind::MetadataLoss,
            format!(
                "Output format cannot carry geospatial metadata from {} input; fields lost: CRS, geotransform, band tags.",
                asset.format.as_deref().unwrap_or("geospatial")
            ),
        ));
    }
    warnings
}

fn output_name(input: &Path, scale: u32, model: &str, extension: &str) -> String {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".into());
    format!("{stem}_x{scale}_{}.{extension}", slugify(model))
}
