//! Satlift command-line interface.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::LevelFilter;

use satlift::{
    check_override, detect_hardware, dry_run, plan, recommend, AdapterFactory, AssetMetadata,
    CommandAdapterFactory, ComputeMode, EnvPaths, EnvironmentManager, Error, ErrorClass,
    FileMetadataReader, GdalCliStitcher, HardwareProfile, JobQueue, JobRunner, JobState,
    MetadataReader, ModelCatalog, OutputFormat, PlanOutcome, ProfileStore, Result, RunOptions,
    RunRequest, RunUnit, SessionStore,
};

#[derive(Parser)]
#[command(
    name = "satlift",
    version,
    about = "Local satellite-imagery super-resolution orchestration"
)]
struct Cli {
    /// Override the data directory (defaults to the platform data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Load the model registry from a JSON file instead of the built-in catalog
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    /// Log level for the structured log file
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List catalog models and their environment states
    Models,
    /// Recommend a model and stitch plan for the given inputs
    Recommend { inputs: Vec<PathBuf> },
    /// Estimate runtime and VRAM without executing anything
    Estimate {
        inputs: Vec<PathBuf>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        scale: Option<u32>,
        #[arg(long, default_value = "auto")]
        compute: String,
    },
    /// Submit a run and wait for it; ctrl-c cancels at the next unit boundary
    Run {
        inputs: Vec<PathBuf>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        scale: Option<u32>,
        #[arg(long)]
        tiling: Option<String>,
        #[arg(long)]
        precision: Option<String>,
        #[arg(long, default_value = "auto")]
        compute: String,
        #[arg(long, default_value = "geotiff")]
        format: String,
        #[arg(long, default_value = "satlift_out")]
        out_dir: PathBuf,
        /// Force conservative CPU execution and ignore advanced options
        #[arg(long)]
        safe_mode: bool,
        /// Skip mosaic planning and process every input individually
        #[arg(long)]
        no_stitch: bool,
        /// Comparison mode: run one input through up to two models
        #[arg(long, num_args = 1..=2)]
        compare: Vec<String>,
    },
    /// Install a model environment (license-gated)
    Install { model: String },
    /// Verify an installed model environment (checksum + health probe)
    Verify { model: String },
    /// Remove a model environment
    Uninstall { model: String },
    /// Record license acceptance for a copyleft-optional model
    AcceptLicense { model: String },
    /// Export a job report produced by an earlier run
    Report {
        job_id: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List pending/partial jobs from the last session, or discard one
    Recover {
        #[arg(long)]
        discard: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let paths = match &cli.data_dir {
        Some(dir) => EnvPaths::with_root(dir.clone()),
        None => EnvPaths::resolve(),
    };
    let level = cli
        .log_level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::Info);
    let _ = satlift::logging::init_file_logging(&paths.logs_dir(), level);

    match execute(cli, paths).await {
        Ok(code) => code,
        Err(err) => {
            let report = err.user_report();
            eprintln!("error[{}]: {}: {}", report.code, report.title, report.summary);
            for fix in &report.suggested_fixes {
                eprintln!("  hint: {fix}");
            }
            exit_code_for(err.class())
        }
    }
}

fn exit_code_for(class: ErrorClass) -> ExitCode {
    match class {
        ErrorClass::Validation => ExitCode::from(2),
        ErrorClass::LicenseBlocked => ExitCode::from(3),
        ErrorClass::EnvironmentNotReady => ExitCode::from(4),
        _ => ExitCode::from(1),
    }
}

async fn execute(cli: Cli, paths: EnvPaths) -> Result<ExitCode> {
    let catalog = Arc::new(match &cli.registry {
        Some(path) => ModelCatalog::load(path)?,
        None => ModelCatalog::builtin(),
    });
    let env = Arc::new(EnvironmentManager::new(catalog.clone(), paths.clone()));

    match cli.command {
        Command::Models => {
            for status in env.statuses().await {
                let Some(descriptor) = catalog.get(&status.model) else {
                    continue;
                };
                let scales: Vec<String> =
                    descriptor.scales.iter().map(|s| format!("x{s}")).collect();
                println!(
                    "{:<14} {:<14} {:<18} {:<10} {}",
                    status.model,
                    status.state.to_string(),
                    descriptor.license_class.to_string(),
                    scales.join("/"),
                    if descriptor.installable() { "" } else { "(not installable)" },
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Recommend { inputs } => {
            let assets = read_assets(&inputs)?;
            let hardware = detect_hardware();
            let result = recommend(&assets, &catalog, &hardware);
            println!("{}", result.rationale);
            for (rank, candidate) in result.candidates.iter().enumerate() {
                println!(
                    "  {}. {} x{} tiling={} precision={}",
                    rank + 1,
                    candidate.model,
                    candidate.scale,
                    if candidate.tiling { "on" } else { "off" },
                    candidate.precision.as_str(),
                );
            }
            for warning in &result.warnings {
                println!("  warning: {warning}");
            }
            if result.candidates.is_empty() {
                println!("  no compatible model; select a provider/model manually");
            }

            let profiles = ProfileStore::open(paths.profiles_file());
            if let PlanOutcome::Stitch(stitch_plan) = plan(&assets, &profiles) {
                for (index, group) in stitch_plan.groups.iter().enumerate() {
                    println!(
                        "mosaic group {}: {} tiles, status {:?}",
                        index + 1,
                        group.asset_ids.len(),
                        group.status,
                    );
                    for reason in group.blocking_reasons() {
                        println!("  blocked: {reason}");
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Estimate {
            inputs,
            model,
            scale,
            compute,
        } => {
            let assets = read_assets(&inputs)?;
            let hardware = detect_hardware();
            let model = resolve_model(model, &assets, &catalog, &hardware)?;
            let request = RunRequest::batch(
                assets.into_iter().map(RunUnit::Asset).collect(),
                model,
                RunOptions {
                    scale,
                    ..Default::default()
                },
                parse_compute(&compute, false)?,
                OutputFormat::GeoTiff,
                PathBuf::from("."),
            );
            let estimate = dry_run(&request, &catalog, &hardware)?;
            println!(
                "model {}: ~{:.1}s runtime, ~{:.2} GB VRAM",
                request.model, estimate.runtime_seconds, estimate.vram_gb
            );
            for note in &estimate.notes {
                println!("  note: {note}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            inputs,
            model,
            scale,
            tiling,
            precision,
            compute,
            format,
            out_dir,
            safe_mode,
            no_stitch,
            compare,
        } => {
            let assets = read_assets(&inputs)?;
            let hardware = if safe_mode {
                HardwareProfile::cpu_only(detect_hardware().ram_gb)
            } else {
                detect_hardware()
            };
            let compute = parse_compute(&compute, safe_mode)?;
            let output_format = OutputFormat::parse(&format)?;
            let options = RunOptions {
                scale,
                tiling,
                precision,
            };

            let request = if compare.is_empty() {
                let model = resolve_model(model, &assets, &catalog, &hardware)?;
                print_override_warnings(&model, &assets, &catalog, &hardware, scale);
                let profiles = ProfileStore::open(paths.profiles_file());
                let units = build_units(assets, &profiles, no_stitch)?;
                RunRequest::batch(units, model, options, compute, output_format, out_dir)
            } else {
                let mut assets = assets;
                let Some(asset) = assets.pop() else {
                    return Err(Error::Validation("no input files given".into()));
                };
                if !assets.is_empty() {
                    return Err(Error::Validation(
                        "comparison mode takes exactly one input asset".into(),
                    ));
                }
                RunRequest::comparison(
                    asset,
                    &compare,
                    options,
                    compute,
                    output_format,
                    out_dir,
                )?
            };

            let session = Arc::new(SessionStore::open(paths.session_file()));
            let runner = Arc::new(JobRunner::new(
                env.clone(),
                hardware,
                Arc::new(CommandAdapterFactory::new(paths.clone())),
                Arc::new(GdalCliStitcher),
                session,
            ));
            let queue = JobQueue::start(runner);
            let job_id = queue.enqueue(request).await?;
            println!("job {job_id} submitted");

            let cancel_queue = queue.clone();
            let cancel_id = job_id.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("cancelling after the current unit...");
                    cancel_queue.cancel(&cancel_id).await;
                }
            });

            let report = queue.wait(&job_id).await?;
            println!("{}", report.summary());
            println!(
                "report: {}",
                paths.reports_dir().join(format!("{job_id}.json")).display()
            );

            Ok(match report.state {
                JobState::Succeeded if report.has_partial_failures() => ExitCode::from(5),
                JobState::Succeeded => ExitCode::SUCCESS,
                JobState::Failed => report
                    .error
                    .as_ref()
                    .map(|error| match error.code.as_str() {
                        "ENV-001" => ExitCode::from(4),
                        "MODEL-004" => ExitCode::from(3),
                        "VAL-001" => ExitCode::from(2),
                        _ => ExitCode::from(1),
                    })
                    .unwrap_or(ExitCode::from(1)),
                _ => ExitCode::from(1),
            })
        }
        Command::Install { model } => {
            env.install(&model).await?;
            println!("installed '{model}'; run `satlift verify {model}` before use");
            Ok(ExitCode::SUCCESS)
        }
        Command::Verify { model } => {
            let descriptor = catalog
                .get(&model)
                .ok_or_else(|| Error::Registry(format!("unknown model '{model}'")))?;
            let factory = CommandAdapterFactory::new(paths.clone());
            let adapter = factory.adapter_for(descriptor)?;
            env.verify(&model, adapter.as_ref()).await?;
            println!("'{model}' is healthy");
            Ok(ExitCode::SUCCESS)
        }
        Command::Uninstall { model } => {
            env.uninstall(&model).await?;
            println!("removed '{model}'");
            Ok(ExitCode::SUCCESS)
        }
        Command::AcceptLicense { model } => {
            env.accept_license(&model)?;
            println!("license acceptance recorded for '{model}'");
            Ok(ExitCode::SUCCESS)
        }
        Command::Report { job_id, out } => {
            let source = paths.reports_dir().join(format!("{job_id}.json"));
            let raw = std::fs::read_to_string(&source).map_err(|_| {
                Error::Validation(format!("no report found for job '{job_id}'"))
            })?;
            match out {
                Some(target) => {
                    if let Some(parent) = target.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&target, raw)?;
                    println!("exported to {}", target.display());
                }
                None => println!("{raw}"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Recover { discard } => {
            let session = SessionStore::open(paths.session_file());
            if let Some(job_id) = discard {
                session.discard(&job_id)?;
                println!("discarded '{job_id}'");
                return Ok(ExitCode::SUCCESS);
            }
            let pending = session.recover();
            if pending.is_empty() {
                println!("no pending or partial jobs from the last session");
            }
            for snapshot in pending {
                println!(
                    "{} {} {}/{} units (model {})",
                    snapshot.job_id,
                    snapshot.state,
                    snapshot.completed_units,
                    snapshot.total_units,
                    snapshot.request.model,
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn parse_compute(value: &str, safe_mode: bool) -> Result<ComputeMode> {
    if safe_mode {
        return Ok(ComputeMode::SafeMode);
    }
    match value.trim().to_lowercase().as_str() {
        "auto" => Ok(ComputeMode::Auto),
        "gpu" | "cuda" => Ok(ComputeMode::Gpu),
        "cpu" => Ok(ComputeMode::Cpu),
        "safe" | "safe-mode" => Ok(ComputeMode::SafeMode),
        other => Err(Error::Validation(format!("unknown compute mode '{other}'"))),
    }
}

fn read_assets(inputs: &[PathBuf]) -> Result<Vec<AssetMetadata>> {
    let expanded = satlift::expand_input_paths(inputs);
    if expanded.is_empty() {
        return Err(Error::Validation("no input files given".into()));
    }
    let reader = FileMetadataReader;
    let mut assets = Vec::new();
    for path in expanded {
        if !path.is_file() {
            return Err(Error::Validation(format!(
                "input not found: {}",
                path.display()
            )));
        }
        assets.push(reader.read(&path)?);
    }
    Ok(assets)
}

fn resolve_model(
    requested: Option<String>,
    assets: &[AssetMetadata],
    catalog: &ModelCatalog,
    hardware: &HardwareProfile,
) -> Result<String> {
    if let Some(model) = requested {
        catalog
            .get(&model)
            .ok_or_else(|| Error::Validation(format!("unknown model '{model}'")))?;
        return Ok(model);
    }
    let recommendation = recommend(assets, catalog, hardware);
    recommendation
        .top()
        .map(|candidate| candidate.model.clone())
        .ok_or_else(|| {
            Error::Validation(
                "no compatible model for these inputs; pass --model explicitly".into(),
            )
        })
}

fn print_override_warnings(
    model: &str,
    assets: &[AssetMetadata],
    catalog: &ModelCatalog,
    hardware: &HardwareProfile,
    scale: Option<u32>,
) {
    let Some(descriptor) = catalog.get(model) else {
        return;
    };
    let warning = check_override(descriptor, assets, hardware, scale);
    for concern in &warning.concerns {
        eprintln!("override warning: {}", concern.message());
    }
}

/// Turn assets into ordered run units: executable mosaic groups first, then
/// the remaining standalone assets. Blocked groups stop the run; stitching
/// choices are never made silently.
fn build_units(
    assets: Vec<AssetMetadata>,
    profiles: &ProfileStore,
    no_stitch: bool,
) -> Result<Vec<RunUnit>> {
    if no_stitch {
        return Ok(assets.into_iter().map(RunUnit::Asset).collect());
    }
    match plan(&assets, profiles) {
        PlanOutcome::NoStitch => Ok(assets.into_iter().map(RunUnit::Asset).collect()),
        PlanOutcome::Stitch(stitch_plan) => {
            let mut units = Vec::new();
            let mut grouped: std::collections::HashSet<String> = std::collections::HashSet::new();
            for group in stitch_plan.groups {
                let reasons = group.blocking_reasons();
                if !reasons.is_empty() {
                    return Err(Error::Validation(format!(
                        "a mosaic group needs confirmation before running: {} (use --no-stitch to process tiles individually)",
                        reasons.join("; ")
                    )));
                }
                let members: Vec<AssetMetadata> = assets
                    .iter()
                    .filter(|asset| group.asset_ids.contains(&asset.asset_id()))
                    .cloned()
                    .collect();
                grouped.extend(group.asset_ids.iter().cloned());
                units.push(RunUnit::Group {
                    group,
                    assets: members,
                });
            }
            for asset in assets {
                if !grouped.contains(&asset.asset_id()) {
                    units.push(RunUnit::Asset(asset));
                }
            }
            Ok(units)
        }
    }
}
