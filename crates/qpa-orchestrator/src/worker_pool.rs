//! Bounded pool of rubric workers draining a shared question queue.
//!
//! Each worker takes one question at a time and runs classification, rubric
//! and answer-key generation in order. Failures are reported per question
//! and never stop the other workers. The pool checks for cancellation before
//! each dequeue and between sub-steps, and stops dequeuing once the job
//! deadline has passed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::classifier;
use crate::config::{QualityMode, RubricConfig};
use crate::error::{QpaError, Result};
use crate::gateway::Gateway;
use crate::generation;
use crate::guidelines;
use crate::rubric::{JobSummary, QualityDistribution, RubricResponse, UserPreferences};
use crate::stream::{CancelFlag, EventSink, StreamEvent};
use crate::tasks::QuestionTask;
use crate::validation;

/// Pool sizing and limits for one job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolSettings {
    /// Maximum concurrent workers.
    pub workers: usize,
    /// Rubric detail level.
    pub mode: QualityMode,
    /// Wall-clock limit after which no new question is started.
    pub deadline: Option<Duration>,
}

impl PoolSettings {
    /// Settings from the rubric configuration, with the request's quality
    /// mode taking precedence.
    #[must_use]
    pub fn from_config(config: &RubricConfig, mode: Option<QualityMode>) -> Self {
        Self {
            workers: config.worker_count,
            mode: mode.unwrap_or(config.quality_mode),
            deadline: (config.timeout_seconds > 0)
                .then(|| Duration::from_secs(config.timeout_seconds)),
        }
    }
}

/// State shared by every worker of one job.
struct Shared {
    gateway: Gateway,
    preferences: UserPreferences,
    settings: PoolSettings,
    sink: Arc<dyn EventSink>,
    cancel: CancelFlag,
    queue: Mutex<VecDeque<QuestionTask>>,
    total: usize,
    started_at: Instant,
    completed: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    timed_out: AtomicBool,
    quality: Mutex<QualityDistribution>,
}

impl Shared {
    fn emit(&self, event: StreamEvent) {
        if !self.sink.emit(event) && !self.cancel.is_cancelled() {
            debug!("Event sink closed, cancelling job");
            self.cancel.cancel();
        }
    }

    /// Fails with `Cancelled` once cancellation was requested.
    fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(QpaError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn past_deadline(&self) -> bool {
        self.settings
            .deadline
            .is_some_and(|limit| self.started_at.elapsed() >= limit)
    }

    async fn next_task(&self) -> Option<QuestionTask> {
        self.queue.lock().await.pop_front()
    }

    fn estimated_remaining(&self, completed: usize) -> Option<f64> {
        if completed == 0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let per_question = self.started_at.elapsed().as_secs_f64() / completed as f64;
        #[allow(clippy::cast_precision_loss)]
        let remaining = self.total.saturating_sub(completed) as f64;
        Some(per_question * remaining)
    }
}

/// Runs every task through the pool and returns the job totals.
///
/// Events are sent to `sink` as work progresses; the summary itself is left
/// to the caller. `previously_skipped` counts questions that never entered
/// the queue.
///
/// # Errors
///
/// Returns `QpaError::Cancelled` if `cancel` was set or the sink closed
/// before the queue drained.
pub async fn run_pool(
    gateway: Gateway,
    tasks: Vec<QuestionTask>,
    previously_skipped: usize,
    preferences: UserPreferences,
    settings: PoolSettings,
    sink: Arc<dyn EventSink>,
    cancel: CancelFlag,
) -> Result<JobSummary> {
    let total = tasks.len();
    let worker_count = settings.workers.max(1).min(total);
    info!(
        questions = total,
        workers = worker_count,
        mode = %settings.mode.as_str(),
        "Starting rubric workers"
    );

    let shared = Arc::new(Shared {
        gateway: gateway.with_cancel(cancel.clone()),
        preferences,
        settings,
        sink,
        cancel,
        queue: Mutex::new(tasks.into()),
        total,
        started_at: Instant::now(),
        completed: AtomicUsize::new(0),
        succeeded: AtomicUsize::new(0),
        failed: AtomicUsize::new(0),
        timed_out: AtomicBool::new(false),
        quality: Mutex::new(QualityDistribution::default()),
    });

    let handles: Vec<_> = (0..worker_count)
        .map(|id| tokio::spawn(worker(id, Arc::clone(&shared))))
        .collect();
    for joined in join_all(handles).await {
        if let Err(e) = joined {
            warn!(error = %e, "Rubric worker aborted");
        }
    }

    if shared.cancel.is_cancelled() {
        info!(
            completed = shared.completed.load(Ordering::SeqCst),
            "Rubric job cancelled"
        );
        return Err(QpaError::Cancelled);
    }

    let undrained = shared.queue.lock().await.len();
    let succeeded = shared.succeeded.load(Ordering::SeqCst);
    let failed = shared.failed.load(Ordering::SeqCst);
    let processed = succeeded + failed;
    let elapsed = shared.started_at.elapsed().as_secs_f64();
    #[allow(clippy::cast_precision_loss)]
    let average = if processed == 0 {
        0.0
    } else {
        elapsed / processed as f64
    };

    let summary = JobSummary {
        total_questions_processed: processed,
        successful_generations: succeeded,
        failed_generations: failed,
        skipped_questions: previously_skipped + undrained,
        total_processing_time: elapsed,
        average_time_per_question: average,
        quality_distribution: *shared.quality.lock().await,
        timed_out: shared.timed_out.load(Ordering::SeqCst),
    };
    info!(
        processed,
        succeeded,
        failed,
        skipped = summary.skipped_questions,
        timed_out = summary.timed_out,
        "Rubric job finished"
    );
    Ok(summary)
}

async fn worker(id: usize, shared: Arc<Shared>) {
    loop {
        if shared.cancel.is_cancelled() {
            break;
        }
        if shared.past_deadline() {
            if !shared.timed_out.swap(true, Ordering::SeqCst) {
                warn!(worker = id, "Rubric job deadline reached, no new questions will start");
            }
            break;
        }
        let Some(task) = shared.next_task().await else {
            break;
        };

        let done = shared.completed.load(Ordering::SeqCst);
        shared.emit(StreamEvent::processing(
            &task,
            shared.total,
            done,
            shared.estimated_remaining(done),
        ));
        debug!(worker = id, question = %task.number(), position = task.position, "Question dequeued");

        match process(&shared, &task).await {
            Ok(response) => {
                shared
                    .quality
                    .lock()
                    .await
                    .record(response.quality_metrics.confidence_score);
                shared.succeeded.fetch_add(1, Ordering::SeqCst);
                let completed = shared.completed.fetch_add(1, Ordering::SeqCst) + 1;
                info!(worker = id, question = %task.number(), completed, "Question complete");
                shared.emit(StreamEvent::question_complete(
                    &task,
                    shared.total,
                    completed,
                    response,
                ));
            }
            Err(QpaError::Cancelled) => break,
            Err(e) => {
                shared.failed.fetch_add(1, Ordering::SeqCst);
                let completed = shared.completed.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(worker = id, question = %task.number(), error = %e, "Question failed");
                shared.emit(StreamEvent::question_failed(&task, completed, e.to_string()));
            }
        }
    }
    debug!(worker = id, "Rubric worker exiting");
}

/// Classification, rubric, answer key and local checks for one question.
async fn process(shared: &Shared, task: &QuestionTask) -> Result<RubricResponse> {
    let started = Instant::now();
    let gateway = &shared.gateway;
    let preferences = &shared.preferences;

    let classification = classifier::classify(gateway, task, preferences).await?;
    shared.checkpoint()?;
    let rubric = generation::generate_rubric(
        gateway,
        task,
        &classification,
        preferences,
        shared.settings.mode,
    )
    .await?;
    shared.checkpoint()?;
    let answer_key =
        generation::generate_answer_key(gateway, task, &classification, &rubric, preferences)
            .await?;
    shared.checkpoint()?;

    let evaluation_guidelines = guidelines::evaluation_guidelines(&classification);
    let quality_metrics = validation::assess(
        task.marks,
        &classification,
        &rubric,
        &answer_key,
        started.elapsed().as_secs_f64(),
    );

    Ok(RubricResponse {
        section_metadata: task.section.clone(),
        question_metadata: task.metadata.clone(),
        classification,
        rubric,
        answer_key,
        evaluation_guidelines,
        quality_metrics,
        processing_status: "completed".to_string(),
    })
}
