//! Shared fixtures for pipeline integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use image::RgbImage;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use trapdata_ml::{
    ClassificationInput, ClassificationResult, Classifier, LocalizationInput, LocalizationResult,
    Localizer, MlError, MlResult, ModelRegistry, ScoredBox,
};
use trapdata_models::{
    BoundingBox, DetectedObject, DetectionId, ImageId, MonitoringSession, Scope, SessionId,
    SourceImage, Stage, POSITIVE_BINARY_LABEL,
};
use trapdata_store::{
    discover_images, ClassificationOutcome, ClearSummary, LocalizationOutcome, LockPurpose,
    NewImage, RecordStore, RunLock, SqliteStore, StageCounts, StoreConfig, StoreError, StoreResult,
    TrackAssignment,
};
use trapdata_worker::PipelineConfig;

pub const LOCALIZER: &str = "stub-localizer";
pub const BINARY: &str = "stub-binary";
pub const SPECIES: &str = "stub-species";
pub const SPECIES_LABEL: &str = "Actias luna";

/// Order in which adapters were invoked.
pub type Journal = Arc<Mutex<Vec<Stage>>>;

/// Write `n` blank JPEGs with timestamped names into `dir`.
pub fn write_images(dir: &Path, n: usize) {
    std::fs::create_dir_all(dir).unwrap();
    for i in 0..n {
        RgbImage::new(64, 64)
            .save(dir.join(format!("20220801210{:03}.jpg", i)))
            .unwrap();
    }
}

/// Discover and queue `n` fresh images into `store`, returning the session.
pub fn seed(store: &dyn RecordStore, dir: &Path, n: usize) -> SessionId {
    let session = discover(store, dir, n);
    store.enqueue(&Scope::Session(session), None).unwrap();
    session
}

/// Discover `n` fresh images without queueing them.
pub fn discover(store: &dyn RecordStore, dir: &Path, n: usize) -> SessionId {
    write_images(dir, n);
    let report = discover_images(store, dir).unwrap();
    assert_eq!(report.added, n);
    report.sessions[0]
}

pub fn memory_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::memory().unwrap())
}

pub fn file_store(dir: &TempDir) -> Arc<SqliteStore> {
    Arc::new(SqliteStore::open(StoreConfig::with_path(dir.path().join("trapdata.db"))).unwrap())
}

pub fn config() -> PipelineConfig {
    PipelineConfig {
        localization_model: LOCALIZER.to_string(),
        binary_classification_model: BINARY.to_string(),
        species_classification_model: SPECIES.to_string(),
        localization_batch_size: 2,
        classification_batch_size: 3,
        num_workers: 2,
        use_accelerated_compute: false,
        batch_timeout: None,
        crops_dir: None,
        localization_threshold: 0.5,
    }
}

pub fn counts(store: &dyn RecordStore, stage: Stage) -> StageCounts {
    store.stage_counts(stage, &Scope::All).unwrap()
}

/// Localizer that returns the same boxes for every image.
pub struct StubLocalizer {
    pub boxes: Vec<ScoredBox>,
    pub fail_images: HashSet<ImageId>,
    pub gate: Option<Arc<Semaphore>>,
    pub seen: Mutex<Vec<ImageId>>,
    pub prepared: AtomicUsize,
    pub journal: Journal,
}

impl StubLocalizer {
    pub fn new(journal: Journal) -> Self {
        Self {
            boxes: vec![
                ScoredBox {
                    bbox: BoundingBox::new(2.0, 2.0, 20.0, 20.0),
                    score: Some(0.95),
                },
                ScoredBox {
                    bbox: BoundingBox::new(30.0, 30.0, 60.0, 50.0),
                    score: Some(0.9),
                },
                ScoredBox {
                    bbox: BoundingBox::new(0.0, 40.0, 10.0, 60.0),
                    score: Some(0.1),
                },
            ],
            fail_images: HashSet::new(),
            gate: None,
            seen: Mutex::new(Vec::new()),
            prepared: AtomicUsize::new(0),
            journal,
        }
    }

    pub fn seen(&self) -> Vec<ImageId> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Localizer for StubLocalizer {
    fn name(&self) -> &str {
        LOCALIZER
    }

    async fn prepare(&self) -> MlResult<()> {
        self.prepared.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn run_batch(&self, inputs: &[LocalizationInput]) -> MlResult<Vec<LocalizationResult>> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        self.journal.lock().unwrap().push(Stage::Localization);
        self.seen
            .lock()
            .unwrap()
            .extend(inputs.iter().map(|i| i.image_id));

        Ok(inputs
            .iter()
            .map(|input| {
                if self.fail_images.contains(&input.image_id) {
                    LocalizationResult::failed("sensor glare")
                } else {
                    LocalizationResult::Boxes(self.boxes.clone())
                }
            })
            .collect())
    }
}

type LabelFn = Box<dyn Fn(DetectionId) -> ClassificationResult + Send + Sync>;

/// Classifier with a scripted label per detection.
pub struct StubClassifier {
    pub name: &'static str,
    pub stage: Stage,
    pub label: LabelFn,
    pub prepare_error: bool,
    pub delay: Option<Duration>,
    pub seen: Mutex<Vec<DetectionId>>,
    pub prepared: AtomicUsize,
    pub journal: Journal,
}

impl StubClassifier {
    /// Odd detection ids are moths, even ones are not.
    pub fn binary(journal: Journal) -> Self {
        Self {
            name: BINARY,
            stage: Stage::BinaryClassification,
            label: Box::new(|id| {
                if id.get() % 2 == 1 {
                    ClassificationResult::label(POSITIVE_BINARY_LABEL, 0.9)
                } else {
                    ClassificationResult::label("nonmoth", 0.8)
                }
            }),
            prepare_error: false,
            delay: None,
            seen: Mutex::new(Vec::new()),
            prepared: AtomicUsize::new(0),
            journal,
        }
    }

    pub fn species(journal: Journal) -> Self {
        Self {
            name: SPECIES,
            stage: Stage::SpeciesClassification,
            label: Box::new(|_| ClassificationResult::label(SPECIES_LABEL, 0.7)),
            prepare_error: false,
            delay: None,
            seen: Mutex::new(Vec::new()),
            prepared: AtomicUsize::new(0),
            journal,
        }
    }

    pub fn seen(&self) -> Vec<DetectionId> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Classifier for StubClassifier {
    fn name(&self) -> &str {
        self.name
    }

    async fn prepare(&self) -> MlResult<()> {
        self.prepared.fetch_add(1, Ordering::SeqCst);
        if self.prepare_error {
            return Err(MlError::unavailable(format!("{} weights missing", self.name)));
        }
        Ok(())
    }

    async fn run_batch(
        &self,
        inputs: &[ClassificationInput],
    ) -> MlResult<Vec<ClassificationResult>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.journal.lock().unwrap().push(self.stage);
        self.seen
            .lock()
            .unwrap()
            .extend(inputs.iter().map(|i| i.detection_id));
        Ok(inputs.iter().map(|i| (self.label)(i.detection_id)).collect())
    }
}

pub struct Adapters {
    pub journal: Journal,
    pub localizer: Arc<StubLocalizer>,
    pub binary: Arc<StubClassifier>,
    pub species: Arc<StubClassifier>,
}

impl Adapters {
    pub fn new() -> Self {
        let journal = Journal::default();
        Self {
            localizer: Arc::new(StubLocalizer::new(journal.clone())),
            binary: Arc::new(StubClassifier::binary(journal.clone())),
            species: Arc::new(StubClassifier::species(journal.clone())),
            journal,
        }
    }

    pub fn with_localizer(mut self, localizer: StubLocalizer) -> Self {
        self.localizer = Arc::new(localizer);
        self
    }

    pub fn with_binary(mut self, binary: StubClassifier) -> Self {
        self.binary = Arc::new(binary);
        self
    }

    pub fn with_species(mut self, species: StubClassifier) -> Self {
        self.species = Arc::new(species);
        self
    }

    pub fn registry(&self) -> ModelRegistry {
        let mut registry = ModelRegistry::new();
        let localizer = self.localizer.clone();
        registry.register_localizer(LOCALIZER, move |_| -> Arc<dyn Localizer> {
            localizer.clone()
        });
        let binary = self.binary.clone();
        registry
            .register_classifier(Stage::BinaryClassification, BINARY, move |_| -> Arc<dyn Classifier> {
                binary.clone()
            })
            .unwrap();
        let species = self.species.clone();
        registry
            .register_classifier(Stage::SpeciesClassification, SPECIES, move |_| -> Arc<dyn Classifier> {
                species.clone()
            })
            .unwrap();
        registry
    }

    pub fn journal(&self) -> Vec<Stage> {
        self.journal.lock().unwrap().clone()
    }
}

/// Store wrapper that fails a chosen localization commit, as if the
/// process died while writing it, or holds every commit for a while.
pub struct FlakyStore {
    inner: Arc<SqliteStore>,
    fail_on_commit: usize,
    commit_delay: Duration,
    commits: AtomicUsize,
}

impl FlakyStore {
    /// Fail the `n`th localization commit (1-based).
    pub fn failing_commit(inner: Arc<SqliteStore>, n: usize) -> Self {
        Self {
            inner,
            fail_on_commit: n,
            commit_delay: Duration::ZERO,
            commits: AtomicUsize::new(0),
        }
    }

    /// Block the calling thread for `delay` on every localization commit.
    pub fn slow_commits(inner: Arc<SqliteStore>, delay: Duration) -> Self {
        Self {
            inner,
            fail_on_commit: 0,
            commit_delay: delay,
            commits: AtomicUsize::new(0),
        }
    }
}

impl RecordStore for FlakyStore {
    fn get_or_create_session(&self, base_directory: &str, day: NaiveDate) -> StoreResult<SessionId> {
        self.inner.get_or_create_session(base_directory, day)
    }

    fn insert_image(&self, image: &NewImage) -> StoreResult<Option<ImageId>> {
        self.inner.insert_image(image)
    }

    fn enqueue(&self, scope: &Scope, limit: Option<usize>) -> StoreResult<u64> {
        self.inner.enqueue(scope, limit)
    }

    fn enqueue_images(&self, ids: &[ImageId]) -> StoreResult<u64> {
        self.inner.enqueue_images(ids)
    }

    fn enqueue_sample(&self, scope: &Scope, sample_size: usize) -> StoreResult<u64> {
        self.inner.enqueue_sample(scope, sample_size)
    }

    fn sessions(&self) -> StoreResult<Vec<MonitoringSession>> {
        self.inner.sessions()
    }

    fn session(&self, id: SessionId) -> StoreResult<Option<MonitoringSession>> {
        self.inner.session(id)
    }

    fn eligible_images(&self, scope: &Scope, limit: usize) -> StoreResult<Vec<ImageId>> {
        self.inner.eligible_images(scope, limit)
    }

    fn eligible_detections(
        &self,
        stage: Stage,
        scope: &Scope,
        limit: usize,
    ) -> StoreResult<Vec<DetectionId>> {
        self.inner.eligible_detections(stage, scope, limit)
    }

    fn images(&self, ids: &[ImageId]) -> StoreResult<Vec<SourceImage>> {
        self.inner.images(ids)
    }

    fn detections_by_id(&self, ids: &[DetectionId]) -> StoreResult<Vec<DetectedObject>> {
        self.inner.detections_by_id(ids)
    }

    fn detections(&self, scope: &Scope) -> StoreResult<Vec<DetectedObject>> {
        self.inner.detections(scope)
    }

    fn commit_localization(&self, batch: &[LocalizationOutcome]) -> StoreResult<()> {
        let n = self.commits.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_on_commit {
            return Err(StoreError::Connection("simulated crash during commit".to_string()));
        }
        std::thread::sleep(self.commit_delay);
        self.inner.commit_localization(batch)
    }

    fn commit_classification(
        &self,
        stage: Stage,
        batch: &[ClassificationOutcome],
    ) -> StoreResult<()> {
        self.inner.commit_classification(stage, batch)
    }

    fn assign_tracks(&self, assignments: &[TrackAssignment]) -> StoreResult<()> {
        self.inner.assign_tracks(assignments)
    }

    fn clear(&self, scope: &Scope) -> StoreResult<ClearSummary> {
        self.inner.clear(scope)
    }

    fn stage_counts(&self, stage: Stage, scope: &Scope) -> StoreResult<StageCounts> {
        self.inner.stage_counts(stage, scope)
    }

    fn acquire_run_lock(
        &self,
        holder: &str,
        purpose: LockPurpose,
        stale_after: Duration,
    ) -> StoreResult<()> {
        self.inner.acquire_run_lock(holder, purpose, stale_after)
    }

    fn refresh_run_lock(&self, holder: &str) -> StoreResult<()> {
        self.inner.refresh_run_lock(holder)
    }

    fn release_run_lock(&self, holder: &str) -> StoreResult<bool> {
        self.inner.release_run_lock(holder)
    }

    fn run_lock(&self) -> StoreResult<Option<RunLock>> {
        self.inner.run_lock()
    }
}
