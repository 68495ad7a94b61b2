//! End-to-end orchestration scenarios driven through the public API with
//! mock execution adapters.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use sha2::{Digest, Sha256};

use satlift::{
    plan, recommend, AdapterFactory, AssetMetadata, BandClass, BoundingBox, ComputeMode,
    EnvPaths, EnvironmentManager, ExecError, GridSignature, HardwareProfile, InferenceOutcome,
    InferenceRequest, JobQueue, JobRunner, JobState, ModelCatalog, ModelExecutionAdapter,
    OutputFormat, PlanOutcome, ProfileStore, Provider, RasterStitcher, Result, RunOptions,
    RunRequest, RunUnit, SessionStore, StitchFileReport, UnitStatus, WarningKind,
};

// ---- mock adapters ------------------------------------------------------

/// Copies input bytes to the output path; the stand-in for a working model.
struct CopyAdapter;

impl ModelExecutionAdapter for CopyAdapter {
    fn infer(&self, request: &InferenceRequest) -> std::result::Result<InferenceOutcome, ExecError> {
        std::fs::copy(&request.input, &request.output)?;
        Ok(InferenceOutcome {
            output: request.output.clone(),
        })
    }
}

/// Fails on one specific call (1-based), succeeds otherwise.
struct FlakyAdapter {
    calls: AtomicUsize,
    fail_on: usize,
}

impl ModelExecutionAdapter for FlakyAdapter {
    fn infer(&self, request: &InferenceRequest) -> std::result::Result<InferenceOutcome, ExecError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(ExecError::Failed("synthetic runtime crash".into()));
        }
        std::fs::copy(&request.input, &request.output)?;
        Ok(InferenceOutcome {
            output: request.output.clone(),
        })
    }
}

/// Reports out-of-memory on the first call, succeeds on the retry.
struct OomOnceAdapter {
    calls: AtomicUsize,
}

impl ModelExecutionAdapter for OomOnceAdapter {
    fn infer(&self, request: &InferenceRequest) -> std::result::Result<InferenceOutcome, ExecError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(ExecError::ResourceExhausted("CUDA out of memory".into()));
        }
        assert!(request.tiling.is_some(), "retry must run tiled");
        std::fs::copy(&request.input, &request.output)?;
        Ok(InferenceOutcome {
            output: request.output.clone(),
        })
    }
}

/// Announces each inference start, then blocks until the test releases one
/// token. Lets tests line cancellation up with unit boundaries exactly.
struct GateAdapter {
    gate: Mutex<mpsc::Receiver<()>>,
    entered: mpsc::Sender<()>,
}

impl ModelExecutionAdapter for GateAdapter {
    fn infer(&self, request: &InferenceRequest) -> std::result::Result<InferenceOutcome, ExecError> {
        let _ = self.entered.send(());
        self.gate
            .lock()
            .unwrap()
            .recv()
            .map_err(|_| ExecError::Failed("gate closed".into()))?;
        std::fs::copy(&request.input, &request.output)?;
        Ok(InferenceOutcome {
            output: request.output.clone(),
        })
    }
}

struct SharedAdapter(Arc<dyn ModelExecutionAdapter>);

impl ModelExecutionAdapter for SharedAdapter {
    fn infer(&self, request: &InferenceRequest) -> std::result::Result<InferenceOutcome, ExecError> {
        self.0.infer(request)
    }
}

struct SharedFactory(Arc<dyn ModelExecutionAdapter>);

impl AdapterFactory for SharedFactory {
    fn adapter_for(
        &self,
        _descriptor: &satlift::ModelDescriptor,
    ) -> Result<Box<dyn ModelExecutionAdapter>> {
        Ok(Box::new(SharedAdapter(self.0.clone())))
    }
}

/// File-level stitcher stand-in: copies the first input, loses nothing.
struct CopyStitcher;

impl RasterStitcher for CopyStitcher {
    fn stitch(&self, inputs: &[PathBuf], output: &Path) -> Result<StitchFileReport> {
        std::fs::copy(&inputs[0], output)?;
        Ok(StitchFileReport {
            output: output.to_path_buf(),
            lost_fields: Vec::new(),
        })
    }
}

// ---- fixture ------------------------------------------------------------

struct Fixture {
    _dir: tempfile::TempDir,
    paths: EnvPaths,
    catalog: Arc<ModelCatalog>,
    env: Arc<EnvironmentManager>,
    out_dir: PathBuf,
    input_dir: PathBuf,
}

impl Fixture {
    async fn new(installed: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        std::fs::create_dir_all(&source).unwrap();
        let weights_path = source.join("weights.pth");
        std::fs::write(&weights_path, b"weights-payload").unwrap();
        let digest = hex::encode(Sha256::digest(b"weights-payload"));

        let mut entries = Vec::new();
        for name in ["S2DR3", "SEN2SR", "Satlas", "SwinIR"] {
            let mut descriptor = ModelCatalog::builtin().get(name).unwrap().clone();
            descriptor.weights_url = weights_path.to_string_lossy().into_owned();
            descriptor.checksum = format!("sha256:{digest}");
            entries.push(descriptor);
        }
        let catalog = Arc::new(ModelCatalog::from_entries(entries).unwrap());

        let paths = EnvPaths::with_root(dir.path().join("data"));
        let env = Arc::new(EnvironmentManager::new(catalog.clone(), paths.clone()));
        for model in installed {
            env.install(model).await.unwrap();
            env.verify(model, &CopyAdapter).await.unwrap();
        }

        let out_dir = dir.path().join("out");
        let input_dir = dir.path().join("in");
        std::fs::create_dir_all(&input_dir).unwrap();
        Self {
            _dir: dir,
            paths,
            catalog,
            env,
            out_dir,
            input_dir,
        }
    }

    fn queue(&self, adapter: Arc<dyn ModelExecutionAdapter>) -> Arc<JobQueue> {
        let session = Arc::new(SessionStore::open(self.paths.session_file()));
        let runner = Arc::new(JobRunner::new(
            self.env.clone(),
            HardwareProfile::cpu_only(32),
            Arc::new(SharedFactory(adapter)),
            Arc::new(CopyStitcher),
            session,
        ));
        JobQueue::start(runner)
    }

    fn png_asset(&self, name: &str, min_x: f64) -> AssetMetadata {
        let path = self.input_dir.join(format!("{name}.png"));
        image::RgbImage::from_pixel(16, 16, image::Rgb([90, 110, 130]))
            .save(&path)
            .unwrap();
        let mut asset = AssetMetadata::unknown(path);
        asset.provider = Provider::Sentinel2;
        asset.sensor = Some("MSI-L2A".into());
        asset.band_count = Some(4);
        asset.band_names = Some(vec!["B02".into(), "B03".into(), "B04".into(), "B08".into()]);
        asset.pixel_size_m = Some(10.0);
        asset.crs = Some("EPSG:32633".into());
        asset.format = Some("GeoTIFF".into());
        asset.width = Some(16);
        asset.height = Some(16);
        asset.extent = Some(BoundingBox::new(min_x, 0.0, min_x + 160.0, 160.0));
        asset.grid = Some(GridSignature {
            crs: "EPSG:32633".into(),
            origin_x: min_x,
            origin_y: 160.0,
            pixel_width: 10.0,
            pixel_height: -10.0,
        });
        asset
    }
}

async fn wait_terminal(queue: &JobQueue, job_id: &str) -> satlift::RunReport {
    tokio::time::timeout(Duration::from_secs(30), queue.wait(job_id))
        .await
        .expect("job did not finish in time")
        .unwrap()
}

// ---- scenarios ----------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stitched_sentinel_run_produces_one_clean_output() {
    let fixture = Fixture::new(&["S2DR3"]).await;
    let assets = vec![
        fixture.png_asset("t_r0_c0", 0.0),
        fixture.png_asset("t_r0_c1", 150.0),
        fixture.png_asset("t_r0_c2", 300.0),
    ];

    // Planner: one group, continuous optical bands.
    let profiles = ProfileStore::open(fixture.paths.profiles_file());
    let PlanOutcome::Stitch(stitch_plan) = plan(&assets, &profiles) else {
        panic!("expected a stitch plan");
    };
    assert_eq!(stitch_plan.groups.len(), 1);
    let group = stitch_plan.groups[0].clone();
    assert!(group.executable());
    assert!(group
        .band_policies
        .iter()
        .all(|policy| *policy == Some(BandClass::Continuous)));

    // Recommendation: S2DR3 on CPU hardware with 4 bands.
    let recommendation = recommend(&assets, &fixture.catalog, &HardwareProfile::cpu_only(32));
    assert_eq!(recommendation.top().unwrap().model, "S2DR3");

    // Dry run: non-negative estimate, no state mutated.
    let request = RunRequest::batch(
        vec![RunUnit::Group {
            group,
            assets: assets.clone(),
        }],
        "S2DR3",
        RunOptions {
            scale: Some(4),
            ..Default::default()
        },
        ComputeMode::Cpu,
        OutputFormat::GeoTiff,
        fixture.out_dir.clone(),
    );
    let estimate = satlift::dry_run(&request, &fixture.catalog, &HardwareProfile::cpu_only(32)).unwrap();
    assert!(estimate.runtime_seconds >= 0.0);
    assert!(estimate.vram_gb >= 0.0);

    let queue = fixture.queue(Arc::new(CopyAdapter));
    let job_id = queue.enqueue(request).await.unwrap();
    let report = wait_terminal(&queue, &job_id).await;

    assert_eq!(report.state, JobState::Succeeded);
    assert_eq!(report.completed_units(), 1);
    let output = &report.units[0].outputs[0];
    assert!(output.exists());
    assert!(!report
        .all_warnings()
        .iter()
        .any(|warning| warning.kind == WarningKind::MetadataLoss));
    assert!(fixture
        .paths
        .reports_dir()
        .join(format!("{job_id}.json"))
        .exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn comparison_with_unhealthy_model_substitutes_baseline() {
    let fixture = Fixture::new(&["S2DR3"]).await;
    let mut asset = fixture.png_asset("single_scene", 0.0);
    asset.format = Some("PNG".into());

    // SEN2SR is never installed; its leg must fall back, not fail the job.
    let request = RunRequest::comparison(
        asset,
        &["S2DR3".to_string(), "SEN2SR".to_string()],
        RunOptions {
            scale: Some(2),
            ..Default::default()
        },
        ComputeMode::Cpu,
        OutputFormat::Png,
        fixture.out_dir.clone(),
    )
    .unwrap();

    let queue = fixture.queue(Arc::new(CopyAdapter));
    let job_id = queue.enqueue(request).await.unwrap();
    let report = wait_terminal(&queue, &job_id).await;

    assert_eq!(report.state, JobState::Succeeded);
    assert_eq!(report.completed_units(), 2);
    let outputs: Vec<_> = report
        .units
        .iter()
        .flat_map(|unit| unit.outputs.iter())
        .collect();
    assert_eq!(outputs.len(), 2);
    assert!(outputs.iter().all(|path| path.exists()));

    let substitutions: Vec<_> = report
        .all_warnings()
        .into_iter()
        .filter(|warning| warning.kind == WarningKind::Substitution)
        .cloned()
        .collect();
    assert_eq!(substitutions.len(), 1);
    assert!(substitutions[0].message.contains("SEN2SR"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_discards_uncommitted_units_only() {
    let fixture = Fixture::new(&["S2DR3"]).await;
    let assets = vec![
        fixture.png_asset("c_a", 0.0),
        fixture.png_asset("c_b", 5000.0),
        fixture.png_asset("c_c", 10000.0),
    ];
    let request = RunRequest::batch(
        assets.into_iter().map(RunUnit::Asset).collect(),
        "S2DR3",
        RunOptions {
            scale: Some(2),
            ..Default::default()
        },
        ComputeMode::Cpu,
        OutputFormat::GeoTiff,
        fixture.out_dir.clone(),
    );

    let (release_tx, release_rx) = mpsc::channel();
    let (entered_tx, entered_rx) = mpsc::channel();
    let queue = fixture.queue(Arc::new(GateAdapter {
        gate: Mutex::new(release_rx),
        entered: entered_tx,
    }));
    let job_id = queue.enqueue(request).await.unwrap();

    // Unit 1 runs to completion.
    entered_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    release_tx.send(()).unwrap();
    // Cancel while unit 2 is in flight: observed at the next boundary.
    entered_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(queue.cancel(&job_id).await);
    release_tx.send(()).unwrap();

    let report = wait_terminal(&queue, &job_id).await;
    assert_eq!(report.state, JobState::Cancelled);

    let statuses: Vec<UnitStatus> = report.units.iter().map(|unit| unit.status).collect();
    assert_eq!(
        statuses,
        vec![UnitStatus::Completed, UnitStatus::Completed, UnitStatus::Skipped]
    );
    // Exactly the two committed outputs exist; nothing for the skipped unit.
    let written = std::fs::read_dir(&fixture.out_dir).unwrap().count();
    assert_eq!(written, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pending_job_cancelled_before_start_writes_nothing() {
    let fixture = Fixture::new(&["S2DR3"]).await;
    let make_request = |name: &str, out: PathBuf| {
        RunRequest::batch(
            vec![RunUnit::Asset(fixture.png_asset(name, 0.0))],
            "S2DR3",
            RunOptions::default(),
            ComputeMode::Cpu,
            OutputFormat::GeoTiff,
            out,
        )
    };

    let (release_tx, release_rx) = mpsc::channel();
    let (entered_tx, entered_rx) = mpsc::channel();
    let queue = fixture.queue(Arc::new(GateAdapter {
        gate: Mutex::new(release_rx),
        entered: entered_tx,
    }));
    let first = queue
        .enqueue(make_request("p_a", fixture.out_dir.join("first")))
        .await
        .unwrap();
    let second = queue
        .enqueue(make_request("p_b", fixture.out_dir.join("second")))
        .await
        .unwrap();

    // The first job is gated mid-unit, so the second is still pending.
    entered_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(queue.cancel(&second).await);
    release_tx.send(()).unwrap();

    let first_report = wait_terminal(&queue, &first).await;
    let second_report = wait_terminal(&queue, &second).await;

    assert_eq!(first_report.state, JobState::Succeeded);
    assert_eq!(second_report.state, JobState::Cancelled);
    assert!(second_report
        .units
        .iter()
        .all(|unit| unit.status == UnitStatus::Skipped));
    assert!(!fixture.out_dir.join("second").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unit_failure_does_not_abort_the_batch() {
    let fixture = Fixture::new(&["S2DR3"]).await;
    let assets = vec![
        fixture.png_asset("f_a", 0.0),
        fixture.png_asset("f_b", 5000.0),
        fixture.png_asset("f_c", 10000.0),
    ];
    let request = RunRequest::batch(
        assets.into_iter().map(RunUnit::Asset).collect(),
        "S2DR3",
        RunOptions {
            scale: Some(2),
            ..Default::default()
        },
        ComputeMode::Cpu,
        OutputFormat::GeoTiff,
        fixture.out_dir.clone(),
    );

    let queue = fixture.queue(Arc::new(FlakyAdapter {
        calls: AtomicUsize::new(0),
        fail_on: 2,
    }));
    let job_id = queue.enqueue(request).await.unwrap();
    let report = wait_terminal(&queue, &job_id).await;

    assert_eq!(report.state, JobState::Succeeded);
    assert!(report.has_partial_failures());
    assert_eq!(report.completed_units(), 2);
    assert_eq!(report.failed_units().len(), 1);
    let summary = report.summary();
    assert!(summary.contains("failed: f_b"));
    assert!(summary.contains("Suggested:"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn oom_triggers_one_tiled_retry() {
    let fixture = Fixture::new(&["S2DR3"]).await;
    let request = RunRequest::batch(
        vec![RunUnit::Asset(fixture.png_asset("oom_scene", 0.0))],
        "S2DR3",
        RunOptions {
            scale: Some(2),
            ..Default::default()
        },
        ComputeMode::Cpu,
        OutputFormat::GeoTiff,
        fixture.out_dir.clone(),
    );

    let queue = fixture.queue(Arc::new(OomOnceAdapter {
        calls: AtomicUsize::new(0),
    }));
    let job_id = queue.enqueue(request).await.unwrap();
    let report = wait_terminal(&queue, &job_id).await;

    assert_eq!(report.state, JobState::Succeeded);
    assert!(report
        .all_warnings()
        .iter()
        .any(|warning| warning.kind == WarningKind::Resource));
    assert!(report.units[0].outputs[0].exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn environment_not_ready_fails_the_job_not_the_queue() {
    let fixture = Fixture::new(&["S2DR3"]).await;
    let broken = RunRequest::batch(
        vec![RunUnit::Asset(fixture.png_asset("nr_a", 0.0))],
        "SEN2SR", // never installed
        RunOptions::default(),
        ComputeMode::Cpu,
        OutputFormat::GeoTiff,
        fixture.out_dir.clone(),
    );
    let healthy = RunRequest::batch(
        vec![RunUnit::Asset(fixture.png_asset("nr_b", 0.0))],
        "S2DR3",
        RunOptions::default(),
        ComputeMode::Cpu,
        OutputFormat::GeoTiff,
        fixture.out_dir.clone(),
    );

    let queue = fixture.queue(Arc::new(CopyAdapter));
    let broken_id = queue.enqueue(broken).await.unwrap();
    let healthy_id = queue.enqueue(healthy).await.unwrap();

    let broken_report = wait_terminal(&queue, &broken_id).await;
    assert_eq!(broken_report.state, JobState::Failed);
    assert_eq!(broken_report.error.as_ref().unwrap().code, "ENV-001");
    assert!(broken_report
        .units
        .iter()
        .all(|unit| unit.status == UnitStatus::Skipped));

    // The queue advances past the failed job.
    let healthy_report = wait_terminal(&queue, &healthy_id).await;
    assert_eq!(healthy_report.state, JobState::Succeeded);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lossy_output_format_raises_critical_warning() {
    let fixture = Fixture::new(&["S2DR3"]).await;
    let request = RunRequest::batch(
        vec![RunUnit::Asset(fixture.png_asset("ml_scene", 0.0))],
        "S2DR3",
        RunOptions {
            scale: Some(2),
            ..Default::default()
        },
        ComputeMode::Cpu,
        OutputFormat::Png,
        fixture.out_dir.clone(),
    );

    let queue = fixture.queue(Arc::new(CopyAdapter));
    let job_id = queue.enqueue(request).await.unwrap();
    let report = wait_terminal(&queue, &job_id).await;

    // Metadata loss is surfaced as critical but never blocks the run.
    assert_eq!(report.state, JobState::Succeeded);
    let loss: Vec<_> = report
        .all_warnings()
        .into_iter()
        .filter(|warning| warning.kind == WarningKind::MetadataLoss)
        .cloned()
        .collect();
    assert_eq!(loss.len(), 1);
    assert!(loss[0].critical);
    assert!(loss[0].message.contains("CRS"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn terminal_jobs_leave_no_recoverable_session_entries() {
    let fixture = Fixture::new(&["S2DR3"]).await;
    let request = RunRequest::batch(
        vec![
            RunUnit::Asset(fixture.png_asset("s_a", 0.0)),
            RunUnit::Asset(fixture.png_asset("s_b", 5000.0)),
        ],
        "S2DR3",
        RunOptions::default(),
        ComputeMode::Cpu,
        OutputFormat::GeoTiff,
        fixture.out_dir.clone(),
    );

    let queue = fixture.queue(Arc::new(CopyAdapter));
    let job_id = queue.enqueue(request).await.unwrap();
    wait_terminal(&queue, &job_id).await;

    let session = SessionStore::open(fixture.paths.session_file());
    assert!(session.recover().is_empty());
    assert!(fixture.paths.session_file().exists());
}
