//! Pipeline orchestrator.
//!
//! Runs localization, binary classification and species classification in
//! that order against a scope. Each stage repeatedly selects a batch, loads
//! its inputs, runs the stage adapter and commits the whole batch in one
//! transaction. Progress lives only in the store, so an interrupted run
//! loses at most its in-flight batch and the next run picks up from there.
//!
//! At most one run, clear or track assignment is active per store. The
//! exclusive lock lives in the store, so orchestrators in other processes
//! opening the same database are excluded too. A second request is rejected
//! immediately with `WorkerError::AlreadyRunning`. A run refreshes its lock
//! on a heartbeat; a lock left behind by a killed process goes stale after
//! the lock TTL and is then taken over.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use trapdata_ml::{
    check_result_count, ClassificationInput, LocalizationInput, ModelRegistry, StageAdapters,
};
use trapdata_models::{DetectionId, ImageId, RunId, RunStatus, Scope, SourceImage, Stage};
use trapdata_queue::{Batch, QueueSelector, QueueStatus};
use trapdata_store::{
    ClassificationOutcome, ClearSummary, LocalizationOutcome, LockPurpose, RecordStore, RunLock,
    StoreError,
};

use crate::config::PipelineConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::loader::InputLoader;
use crate::logging::StageLogger;
use crate::metrics;
use crate::stages::{classification_outcome, localization_outcome, BoxFilter};
use crate::tracking::{retain_known, TrackAssigner};

const MISSING_RECORD: &str = "record disappeared before loading";

/// A run lock whose heartbeat is older than this may be taken over.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

/// Work done by one stage during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageSummary {
    pub stage: Stage,
    pub batches: usize,
    pub done: usize,
    pub failed: usize,
}

impl StageSummary {
    fn new(stage: Stage) -> Self {
        Self {
            stage,
            batches: 0,
            done: 0,
            failed: 0,
        }
    }
}

/// Result of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub scope: Scope,
    pub stages: Vec<StageSummary>,
}

impl RunSummary {
    pub fn stage(&self, stage: Stage) -> Option<&StageSummary> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Whether the run found no eligible work at all.
    pub fn is_empty(&self) -> bool {
        self.stages.iter().all(|s| s.batches == 0)
    }
}

/// Held while a run, clear or track assignment is active.
///
/// Dropping it releases the store lock before the local flag and status, so
/// an observer that sees `Idle` can immediately start the next run.
struct ActiveGuard {
    active: Arc<AtomicBool>,
    status: Arc<watch::Sender<RunStatus>>,
    store: Arc<dyn RecordStore>,
    holder: String,
    locked: bool,
    heartbeat: Option<JoinHandle<()>>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
        if self.locked {
            if let Err(e) = self.store.release_run_lock(&self.holder) {
                warn!(holder = %self.holder, error = %e, "Failed to release run lock");
            }
        }
        self.active.store(false, Ordering::Release);
        self.status.send_if_modified(|status| {
            let was_running = status.is_running();
            *status = RunStatus::Idle;
            was_running
        });
    }
}

/// Everything one run needs, resolved before the first stage starts.
struct RunContext {
    run_id: RunId,
    scope: Scope,
    config: PipelineConfig,
    adapters: StageAdapters,
    loader: InputLoader,
    lock_lost: Arc<AtomicBool>,
}

/// Drives the stages over the record store.
#[derive(Clone)]
pub struct Orchestrator {
    selector: QueueSelector,
    registry: Arc<ModelRegistry>,
    holder: String,
    lock_ttl: Duration,
    active: Arc<AtomicBool>,
    status: Arc<watch::Sender<RunStatus>>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn RecordStore>, registry: ModelRegistry) -> Self {
        let (status, _) = watch::channel(RunStatus::Idle);
        Self {
            selector: QueueSelector::new(store),
            registry: Arc::new(registry),
            holder: format!("{}-{}", std::process::id(), Uuid::new_v4().simple()),
            lock_ttl: DEFAULT_LOCK_TTL,
            active: Arc::new(AtomicBool::new(false)),
            status: Arc::new(status),
        }
    }

    /// Override how long a silent lock holder is trusted.
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// Identity this orchestrator uses for the store lock.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        self.selector.store()
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Whether a stage is processing a batch, here or in another
    /// orchestrator holding a fresh run lock on the same store.
    pub fn is_running(&self) -> bool {
        if self.status.borrow().is_running() {
            return true;
        }
        match self.store().run_lock() {
            Ok(Some(lock)) => {
                lock.holder != self.holder
                    && lock.purpose == LockPurpose::Run
                    && !lock.is_stale(self.lock_ttl)
            }
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "Failed to read run lock");
                false
            }
        }
    }

    /// The store lock, if any holder has one.
    pub fn run_lock(&self) -> WorkerResult<Option<RunLock>> {
        Ok(self.store().run_lock()?)
    }

    pub fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    /// Watch status transitions.
    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.status.subscribe()
    }

    fn acquire(&self, purpose: LockPurpose) -> WorkerResult<ActiveGuard> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| WorkerError::AlreadyRunning)?;
        let mut guard = ActiveGuard {
            active: self.active.clone(),
            status: self.status.clone(),
            store: self.store().clone(),
            holder: self.holder.clone(),
            locked: false,
            heartbeat: None,
        };

        match self
            .store()
            .acquire_run_lock(&self.holder, purpose, self.lock_ttl)
        {
            Ok(()) => {
                guard.locked = true;
                Ok(guard)
            }
            Err(StoreError::Locked { holder, purpose: held_for }) => {
                info!(%purpose, %holder, held_for = %held_for, "Store is locked by another worker");
                Err(WorkerError::AlreadyRunning)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Run `work` on the blocking pool.
    ///
    /// Store calls go through here so a contended connection never stalls a
    /// runtime worker.
    async fn blocking<T, F>(&self, work: F) -> WorkerResult<T>
    where
        F: FnOnce(&QueueSelector) -> WorkerResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let selector = self.selector.clone();
        tokio::task::spawn_blocking(move || work(&selector))
            .await
            .map_err(|e| WorkerError::task_failed(e.to_string()))?
    }

    /// Refresh the store lock until aborted. A lost lock is flagged on
    /// `lost` and stops the run before its next commit.
    fn spawn_heartbeat(&self, run_id: &RunId, lost: Arc<AtomicBool>) -> JoinHandle<()> {
        let logger = StageLogger::for_run(run_id);
        let store = self.store().clone();
        let holder = self.holder.clone();
        let every = (self.lock_ttl / 3).max(MIN_HEARTBEAT);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let store = store.clone();
                let holder = holder.clone();
                let refreshed =
                    tokio::task::spawn_blocking(move || store.refresh_run_lock(&holder)).await;
                match refreshed {
                    Ok(Ok(())) => {}
                    Ok(Err(StoreError::LockLost(holder))) => {
                        logger.log_error(&format!("run lock taken over from {}", holder));
                        lost.store(true, Ordering::Release);
                        return;
                    }
                    Ok(Err(e)) => logger.log_warning(&format!("lock heartbeat failed: {}", e)),
                    Err(e) => logger.log_warning(&format!("lock heartbeat task failed: {}", e)),
                }
            }
        })
    }

    fn prepare_run(&self, scope: Scope, config: PipelineConfig) -> WorkerResult<RunContext> {
        config.check()?;
        let adapters = self
            .registry
            .resolve(&config.model_selection(), config.device())?;
        Ok(RunContext {
            run_id: RunId::new(),
            scope,
            loader: InputLoader::new(config.num_workers),
            config,
            adapters,
            lock_lost: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Run every stage over `scope` and wait for completion.
    pub async fn run(&self, scope: Scope, config: PipelineConfig) -> WorkerResult<RunSummary> {
        let guard = self.acquire(LockPurpose::Run)?;
        let ctx = self.prepare_run(scope, config)?;
        self.execute(ctx, guard).await
    }

    /// Start a run on a dedicated task.
    ///
    /// Rejection and configuration errors are returned before anything is
    /// spawned. Aborting the returned handle stops the run; the in-flight
    /// batch is not committed.
    pub fn start(
        &self,
        scope: Scope,
        config: PipelineConfig,
    ) -> WorkerResult<JoinHandle<WorkerResult<RunSummary>>> {
        let guard = self.acquire(LockPurpose::Run)?;
        let ctx = self.prepare_run(scope, config)?;
        let this = self.clone();
        Ok(tokio::spawn(async move { this.execute(ctx, guard).await }))
    }

    async fn execute(&self, ctx: RunContext, mut guard: ActiveGuard) -> WorkerResult<RunSummary> {
        guard.heartbeat = Some(self.spawn_heartbeat(&ctx.run_id, ctx.lock_lost.clone()));
        let logger = StageLogger::for_run(&ctx.run_id);
        let span = logger.create_span();

        async move {
            logger.log_start(&format!("scope {}", ctx.scope));
            let started = Instant::now();

            let mut stages = Vec::with_capacity(Stage::ALL.len());
            for stage in Stage::ALL {
                match self.run_stage(&ctx, *stage).await {
                    Ok(summary) => stages.push(summary),
                    Err(e) => {
                        logger.log_error(&e.to_string());
                        metrics::record_run("failed");
                        return Err(e);
                    }
                }
            }

            metrics::record_run("completed");
            logger.log_completion(&format!(
                "{} batches in {:.1}s",
                stages.iter().map(|s| s.batches).sum::<usize>(),
                started.elapsed().as_secs_f64()
            ));
            Ok(RunSummary {
                run_id: ctx.run_id.clone(),
                scope: ctx.scope,
                stages,
            })
        }
        .instrument(span)
        .await
    }

    async fn run_stage(&self, ctx: &RunContext, stage: Stage) -> WorkerResult<StageSummary> {
        let logger = StageLogger::new(&ctx.run_id, stage);
        let batch_size = ctx.config.batch_size(stage);
        let mut summary = StageSummary::new(stage);

        loop {
            let scope = ctx.scope;
            let batch = self
                .blocking(move |selector| Ok(selector.select_batch(stage, &scope, batch_size)?))
                .await?;
            if batch.is_empty() {
                break;
            }

            if summary.batches == 0 {
                self.status.send_replace(RunStatus::Running(stage));
                Self::prepare_adapter(ctx, stage).await?;
                logger.log_start(&format!("model {}", ctx.adapters.model_name(stage)));
            }

            let started = Instant::now();
            let (done, failed) = match batch {
                Batch::Images(ids) => {
                    let outcomes =
                        within_timeout(stage, ctx.config.batch_timeout, self.localize(ctx, &ids))
                            .await?;
                    let counted = tally(outcomes.iter().map(LocalizationOutcome::is_failed));
                    self.ensure_locked(ctx)?;
                    self.blocking(move |selector| {
                        Ok(selector.store().commit_localization(&outcomes)?)
                    })
                    .await?;
                    counted
                }
                Batch::Detections(ids) => {
                    let outcomes = within_timeout(
                        stage,
                        ctx.config.batch_timeout,
                        self.classify(ctx, stage, &ids),
                    )
                    .await?;
                    let counted = tally(outcomes.iter().map(ClassificationOutcome::is_failed));
                    self.ensure_locked(ctx)?;
                    self.blocking(move |selector| {
                        Ok(selector.store().commit_classification(stage, &outcomes)?)
                    })
                    .await?;
                    counted
                }
            };

            summary.batches += 1;
            summary.done += done;
            summary.failed += failed;
            metrics::record_batch(stage, done, failed, started.elapsed().as_secs_f64());
            logger.log_progress(&format!(
                "batch {} committed, {} done, {} failed",
                summary.batches, done, failed
            ));
        }

        if summary.batches > 0 {
            logger.log_completion(&format!(
                "{} done, {} failed in {} batches",
                summary.done, summary.failed, summary.batches
            ));
        }
        Ok(summary)
    }

    fn ensure_locked(&self, ctx: &RunContext) -> WorkerResult<()> {
        if ctx.lock_lost.load(Ordering::Acquire) {
            return Err(StoreError::LockLost(self.holder.clone()).into());
        }
        Ok(())
    }

    async fn prepare_adapter(ctx: &RunContext, stage: Stage) -> WorkerResult<()> {
        let prepared = match ctx.adapters.classifier(stage) {
            Some(classifier) => classifier.prepare().await,
            None => ctx.adapters.localizer.prepare().await,
        };
        prepared.map_err(|source| WorkerError::AdapterInit { stage, source })
    }

    /// Load, localize and convert one batch of images.
    async fn localize(
        &self,
        ctx: &RunContext,
        ids: &[ImageId],
    ) -> WorkerResult<Vec<LocalizationOutcome>> {
        let wanted = ids.to_vec();
        let images = self
            .blocking(move |selector| Ok(selector.store().images(&wanted)?))
            .await?;
        let mut loaded: HashMap<_, _> = ctx.loader.load_images(&images).await.into_iter().collect();

        let mut inputs = Vec::with_capacity(ids.len());
        let mut outcomes = Vec::with_capacity(ids.len());
        for &image_id in ids {
            match loaded.remove(&image_id) {
                Some(Ok(image)) => inputs.push(LocalizationInput { image_id, image }),
                Some(Err(reason)) => outcomes.push(LocalizationOutcome::Failed { image_id, reason }),
                None => outcomes.push(LocalizationOutcome::Failed {
                    image_id,
                    reason: MISSING_RECORD.to_string(),
                }),
            }
        }

        if !inputs.is_empty() {
            let stage = Stage::Localization;
            let results = ctx
                .adapters
                .localizer
                .run_batch(&inputs)
                .await
                .and_then(|results| {
                    check_result_count(inputs.len(), results.len())?;
                    Ok(results)
                })
                .map_err(|source| WorkerError::Inference { stage, source })?;

            let threshold = ctx.config.localization_threshold;
            let crops_dir = ctx.config.crops_dir.clone();
            let converted = tokio::task::spawn_blocking(move || {
                let filter = BoxFilter {
                    threshold,
                    crops_dir: crops_dir.as_deref(),
                };
                inputs
                    .into_iter()
                    .zip(results)
                    .map(|(input, result)| {
                        localization_outcome(input.image_id, &input.image, result, filter)
                    })
                    .collect::<Vec<_>>()
            })
            .await
            .map_err(|e| WorkerError::task_failed(e.to_string()))?;
            outcomes.extend(converted);
        }

        outcomes.sort_by_key(LocalizationOutcome::image_id);
        Ok(outcomes)
    }

    /// Load, classify and convert one batch of detections.
    async fn classify(
        &self,
        ctx: &RunContext,
        stage: Stage,
        ids: &[DetectionId],
    ) -> WorkerResult<Vec<ClassificationOutcome>> {
        let classifier = ctx
            .adapters
            .classifier(stage)
            .ok_or_else(|| WorkerError::config_error(format!("{} has no classifier", stage)))?;

        let wanted = ids.to_vec();
        let (detections, images) = self
            .blocking(move |selector| {
                let store = selector.store();
                let detections = store.detections_by_id(&wanted)?;
                let mut image_ids: Vec<ImageId> = detections.iter().map(|d| d.image_id).collect();
                image_ids.sort();
                image_ids.dedup();
                let images = store.images(&image_ids)?;
                Ok((detections, images))
            })
            .await?;
        let images: HashMap<ImageId, SourceImage> =
            images.into_iter().map(|image| (image.id, image)).collect();

        let mut loaded: HashMap<_, _> = ctx
            .loader
            .load_crops(&detections, &images)
            .await
            .into_iter()
            .collect();

        let mut inputs = Vec::with_capacity(ids.len());
        let mut outcomes = Vec::with_capacity(ids.len());
        for &detection_id in ids {
            match loaded.remove(&detection_id) {
                Some(Ok(image)) => inputs.push(ClassificationInput {
                    detection_id,
                    image,
                }),
                Some(Err(reason)) => outcomes.push(ClassificationOutcome::Failed {
                    detection_id,
                    reason,
                }),
                None => outcomes.push(ClassificationOutcome::Failed {
                    detection_id,
                    reason: MISSING_RECORD.to_string(),
                }),
            }
        }

        if !inputs.is_empty() {
            let results = classifier
                .run_batch(&inputs)
                .await
                .and_then(|results| {
                    check_result_count(inputs.len(), results.len())?;
                    Ok(results)
                })
                .map_err(|source| WorkerError::Inference { stage, source })?;

            outcomes.extend(
                inputs
                    .iter()
                    .zip(results)
                    .map(|(input, result)| classification_outcome(input.detection_id, result)),
            );
        }

        outcomes.sort_by_key(ClassificationOutcome::detection_id);
        Ok(outcomes)
    }

    /// Reset eligibility for every record in `scope`. Rejected while active.
    pub fn clear_queue(&self, scope: &Scope) -> WorkerResult<ClearSummary> {
        let _guard = self.acquire(LockPurpose::Clear)?;
        Ok(self.selector.clear_queue(scope)?)
    }

    /// Per-stage queue counts for `scope`.
    pub fn queue_status(&self, scope: &Scope) -> WorkerResult<QueueStatus> {
        Ok(self.selector.status(scope)?)
    }

    /// Apply `assigner` to every detection in `scope`. Rejected while active.
    ///
    /// Returns the number of assignments written.
    pub fn assign_tracks(&self, scope: &Scope, assigner: &dyn TrackAssigner) -> WorkerResult<usize> {
        let _guard = self.acquire(LockPurpose::AssignTracks)?;

        let detections = self.store().detections(scope)?;
        let mut image_ids: Vec<ImageId> = detections.iter().map(|d| d.image_id).collect();
        image_ids.sort();
        image_ids.dedup();
        let images = self.store().images(&image_ids)?;

        let (assignments, dropped) = retain_known(&detections, assigner.assign(&detections, &images));
        if dropped > 0 {
            warn!(
                assigner = assigner.name(),
                dropped, "Ignoring track assignments for detections outside the scope"
            );
        }

        self.store().assign_tracks(&assignments)?;
        info!(
            assigner = assigner.name(),
            %scope,
            assigned = assignments.len(),
            "Track identifiers assigned"
        );
        Ok(assignments.len())
    }
}

async fn within_timeout<T>(
    stage: Stage,
    timeout: Option<Duration>,
    work: impl Future<Output = WorkerResult<T>>,
) -> WorkerResult<T> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, work)
            .await
            .map_err(|_| WorkerError::BatchTimeout {
                stage,
                timeout: limit,
            })?,
        None => work.await,
    }
}

/// Count `(done, failed)`.
fn tally(failures: impl Iterator<Item = bool>) -> (usize, usize) {
    failures.fold((0, 0), |(done, failed), is_failed| {
        if is_failed {
            (done, failed + 1)
        } else {
            (done + 1, failed)
        }
    })
}
