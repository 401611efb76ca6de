//! Periodic scan that turns observed transitions into timing-strategy work.
//!
//! Each run covers `(last_run, now]`, where `last_run` is a persisted
//! watermark. The watermark only moves forward when the run made progress, so
//! a run where every event failed is retried in full on the next tick.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use apalis::prelude::{Data, Error as ApalisError};
use apalis_cron::Schedule;
use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    application::{
        clock::Clock,
        context::TemporalContext,
        error::TemporalError,
        repos::{TemporalContentRepo, WatermarkStore},
        timing::TimingStrategy,
    },
    config::{MIN_SCHEDULER_INTERVAL_SECS, Settings},
    domain::{TransitionEvent, UnixTimestamp},
};

pub const WATERMARK_NAMESPACE: &str = "tidemark";
pub const WATERMARK_KEY: &str = "scheduler.last_run";

const METRIC_EVENTS: &str = "tidemark_batch_events_total";
const METRIC_ERRORS: &str = "tidemark_batch_errors_total";
const METRIC_RUNS: &str = "tidemark_batch_runs_total";
const METRIC_DURATION: &str = "tidemark_batch_duration_ms";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Idle,
    Validating,
    Fetching,
    Processing(usize),
    Committing,
    Failed,
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchState::Idle => f.write_str("idle"),
            BatchState::Validating => f.write_str("validating"),
            BatchState::Fetching => f.write_str("fetching"),
            BatchState::Processing(count) => write!(f, "processing({count})"),
            BatchState::Committing => f.write_str("committing"),
            BatchState::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub from: UnixTimestamp,
    pub to: UnixTimestamp,
    pub processed_count: usize,
    pub error_count: usize,
    pub success: bool,
    pub final_state: BatchState,
}

#[derive(Default)]
pub struct TransitionBatchTaskBuilder {
    repository: Option<Arc<dyn TemporalContentRepo>>,
    timing: Option<Arc<dyn TimingStrategy>>,
    settings: Option<Arc<Settings>>,
    clock: Option<Arc<dyn Clock>>,
    watermarks: Option<Arc<dyn WatermarkStore>>,
}

impl TransitionBatchTaskBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_context(context: &TemporalContext) -> Self {
        Self::new()
            .repository(Arc::clone(&context.repository))
            .timing(Arc::clone(&context.timing))
            .settings(Arc::clone(&context.settings))
            .clock(Arc::clone(&context.clock))
            .watermarks(Arc::clone(&context.watermarks))
    }

    pub fn repository(mut self, repository: Arc<dyn TemporalContentRepo>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn timing(mut self, timing: Arc<dyn TimingStrategy>) -> Self {
        self.timing = Some(timing);
        self
    }

    pub fn settings(mut self, settings: Arc<Settings>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn watermarks(mut self, watermarks: Arc<dyn WatermarkStore>) -> Self {
        self.watermarks = Some(watermarks);
        self
    }

    /// Fails with the first collaborator that was never supplied.
    pub fn build(self) -> Result<TransitionBatchTask, TemporalError> {
        let repository = self
            .repository
            .ok_or_else(|| TemporalError::dependency_missing("repository"))?;
        let timing = self
            .timing
            .ok_or_else(|| TemporalError::dependency_missing("timing"))?;
        let settings = self
            .settings
            .ok_or_else(|| TemporalError::dependency_missing("settings"))?;
        let clock = self
            .clock
            .ok_or_else(|| TemporalError::dependency_missing("clock"))?;
        let watermarks = self
            .watermarks
            .ok_or_else(|| TemporalError::dependency_missing("watermarks"))?;

        Ok(TransitionBatchTask {
            run_id: Uuid::new_v4(),
            repository,
            timing,
            settings,
            clock,
            watermarks,
        })
    }
}

pub struct TransitionBatchTask {
    run_id: Uuid,
    repository: Arc<dyn TemporalContentRepo>,
    timing: Arc<dyn TimingStrategy>,
    settings: Arc<Settings>,
    clock: Arc<dyn Clock>,
    watermarks: Arc<dyn WatermarkStore>,
}

impl TransitionBatchTask {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub async fn run(&self) -> Result<BatchReport, TemporalError> {
        let started = Instant::now();
        let mut state = BatchState::Idle;
        self.enter(&mut state, BatchState::Validating);
        self.enter(&mut state, BatchState::Fetching);

        let (from, to, events) = match self.fetch().await {
            Ok(fetched) => fetched,
            Err(err) => {
                self.enter(&mut state, BatchState::Failed);
                error!(
                    target = "application::jobs::transitions",
                    run_id = %self.run_id,
                    error = %err,
                    "transition fetch failed; watermark unchanged"
                );
                self.record_run("error", started);
                return Err(err);
            }
        };

        self.enter(&mut state, BatchState::Processing(events.len()));
        let (processed_count, error_count) = self.process(&events).await;
        counter!(METRIC_EVENTS).increment(processed_count as u64);
        counter!(METRIC_ERRORS).increment(error_count as u64);

        let success = error_count == 0 || processed_count > 0;
        if success {
            self.enter(&mut state, BatchState::Committing);
            if let Err(err) = self
                .watermarks
                .set(WATERMARK_NAMESPACE, WATERMARK_KEY, to)
                .await
            {
                self.enter(&mut state, BatchState::Failed);
                error!(
                    target = "application::jobs::transitions",
                    run_id = %self.run_id,
                    error = %err,
                    "failed to advance watermark"
                );
                self.record_run("error", started);
                return Err(err.into());
            }
            self.enter(&mut state, BatchState::Idle);
        } else {
            self.enter(&mut state, BatchState::Failed);
        }

        let report = BatchReport {
            run_id: self.run_id,
            from,
            to,
            processed_count,
            error_count,
            success,
            final_state: state,
        };

        self.record_run(if success { "success" } else { "failed" }, started);
        info!(
            target = "application::jobs::transitions",
            run_id = %report.run_id,
            from = report.from,
            to = report.to,
            processed = report.processed_count,
            errors = report.error_count,
            success = report.success,
            strategy = self.timing.name(),
            "transition scan finished"
        );

        Ok(report)
    }

    async fn fetch(
        &self,
    ) -> Result<(UnixTimestamp, UnixTimestamp, Vec<TransitionEvent>), TemporalError> {
        let from = self
            .watermarks
            .get(WATERMARK_NAMESPACE, WATERMARK_KEY)
            .await?
            .unwrap_or(0);
        let to = self.clock.now();

        let interval = self.settings.scheduler.interval.as_secs();
        let expected_window = i64::try_from(interval.saturating_mul(2)).unwrap_or(i64::MAX);
        if from > 0 && to.saturating_sub(from) > expected_window {
            info!(
                target = "application::jobs::transitions",
                run_id = %self.run_id,
                from,
                to,
                interval_seconds = interval,
                "scan window spans missed ticks; catching up"
            );
        }

        let events = self.repository.find_transitions_in_range(from, to).await?;
        Ok((from, to, events))
    }

    async fn process(&self, events: &[TransitionEvent]) -> (usize, usize) {
        let mut processed = 0;
        let mut errors = 0;

        for event in events {
            match self.timing.process_transition(event).await {
                Ok(()) => processed += 1,
                Err(err) => {
                    errors += 1;
                    warn!(
                        target = "application::jobs::transitions",
                        run_id = %self.run_id,
                        table = %event.content().table(),
                        uid = event.content().uid(),
                        transition_type = %event.transition_type(),
                        timestamp = event.timestamp(),
                        error = %err,
                        "failed to process transition"
                    );
                }
            }
        }

        (processed, errors)
    }

    fn enter(&self, state: &mut BatchState, next: BatchState) {
        debug!(
            target = "application::jobs::transitions",
            run_id = %self.run_id,
            from = %state,
            to = %next,
            "batch state change"
        );
        *state = next;
    }

    fn record_run(&self, outcome: &'static str, started: Instant) {
        counter!(METRIC_RUNS, "outcome" => outcome).increment(1);
        histogram!(METRIC_DURATION).record(started.elapsed().as_secs_f64() * 1000.0);
    }
}

/// Marker for one cron tick of the transition scan.
/// Must implement `From<chrono::DateTime<chrono::Utc>>` for apalis-cron compatibility.
#[derive(Default, Debug, Clone)]
pub struct TransitionScanJob {
    pub scheduled_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<chrono::DateTime<chrono::Utc>> for TransitionScanJob {
    fn from(scheduled_at: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            scheduled_at: Some(scheduled_at),
        }
    }
}

/// Run one scan per tick. Outcomes are logged and counted; the worker never
/// fails so the cron stream keeps ticking.
pub async fn process_transition_scan_job(
    job: TransitionScanJob,
    context: Data<TemporalContext>,
) -> Result<(), ApalisError> {
    let task = match TransitionBatchTaskBuilder::from_context(&context).build() {
        Ok(task) => task,
        Err(err) => {
            error!(
                target = "application::jobs::process_transition_scan_job",
                error = %err,
                "transition scan could not be assembled"
            );
            return Ok(());
        }
    };

    debug!(
        target = "application::jobs::process_transition_scan_job",
        run_id = %task.run_id(),
        scheduled_at = ?job.scheduled_at,
        "transition scan tick"
    );

    match task.run().await {
        Ok(report) if !report.success => warn!(
            target = "application::jobs::process_transition_scan_job",
            run_id = %report.run_id,
            errors = report.error_count,
            "transition scan made no progress; will retry the window"
        ),
        Ok(_) => {}
        Err(err) => warn!(
            target = "application::jobs::process_transition_scan_job",
            run_id = %task.run_id(),
            error = %err,
            "transition scan aborted"
        ),
    }

    Ok(())
}

/// Minute cadences that divide an hour evenly.
const MINUTE_CADENCES: [u64; 11] = [1, 2, 3, 4, 5, 6, 10, 12, 15, 20, 30];
/// Hour cadences that divide a day evenly.
const HOUR_CADENCES: [u64; 8] = [1, 2, 3, 4, 6, 8, 12, 24];

/// Largest evenly spaced cron cadence not longer than `interval`.
///
/// Step fields restart at every hour or day boundary, so only divisors of 60
/// minutes and 24 hours keep ticks equidistant. The result is at least one
/// minute and at most one day.
pub fn effective_scan_interval(interval: Duration) -> Duration {
    let minutes = interval.as_secs().max(MIN_SCHEDULER_INTERVAL_SECS) / 60;
    if minutes < 60 {
        let step = MINUTE_CADENCES
            .iter()
            .rev()
            .copied()
            .find(|step| *step <= minutes)
            .unwrap_or(1);
        return Duration::from_secs(step * 60);
    }

    let hours = minutes / 60;
    let step = HOUR_CADENCES
        .iter()
        .rev()
        .copied()
        .find(|step| *step <= hours)
        .unwrap_or(1);
    Duration::from_secs(step * 3600)
}

/// Cron expression for the configured scan interval, after rounding down to
/// an evenly spaced cadence.
pub fn transition_scan_cron_expression(interval: Duration) -> String {
    let minutes = effective_scan_interval(interval).as_secs() / 60;
    match minutes {
        1440 => "0 0 0 * * *".to_string(),
        m if m >= 60 => format!("0 0 */{} * * *", m / 60),
        m => format!("0 */{m} * * * *"),
    }
}

pub fn transition_scan_schedule(interval: Duration) -> Result<Schedule, TemporalError> {
    let effective = effective_scan_interval(interval);
    if effective.as_secs() != interval.as_secs() {
        warn!(
            target = "application::jobs::transitions",
            requested_seconds = interval.as_secs(),
            effective_seconds = effective.as_secs(),
            "scan interval rounded to an evenly spaced cadence"
        );
    }

    let expression = transition_scan_cron_expression(interval);
    Schedule::from_str(&expression).map_err(|err| {
        TemporalError::configuration(format!("invalid scan schedule `{expression}`: {err}"))
    })
}
