//! Periodic driver starting import and export runs per source.
//!
//! Every tick walks the configured sources. A run for a `(source, role)`
//! pair starts when its interval has passed since the previous run started
//! and the previous run has finished. The start time is recorded when the
//! task is spawned, so slow runs do not pile up, and a hung run only holds
//! back its own pair.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::{MirrorError, SourceConfig};

/// What a scheduled run does for its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MirrorRole {
    /// Pull from the origin (NRTM v3 or v4 client).
    Import,
    /// Publish (NRTM v4 server, flat-file export).
    Export,
}

impl MirrorRole {
    /// Lowercase label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::Export => "export",
        }
    }
}

impl fmt::Display for MirrorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Performs one run of `role` for `source`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceJobRunner: Send + Sync {
    async fn run(&self, source: Arc<SourceConfig>, role: MirrorRole) -> Result<(), MirrorError>;
}

type JobKey = (String, MirrorRole);

struct JobRecord {
    started: DateTime<Utc>,
    handle: JoinHandle<()>,
}

/// Last start time and task handle per `(source, role)`.
#[derive(Default)]
pub struct SchedulerState {
    jobs: HashMap<JobKey, JobRecord>,
}

impl SchedulerState {
    /// When the latest run of `role` for `source` started.
    #[must_use]
    pub fn last_started(&self, source: &str, role: MirrorRole) -> Option<DateTime<Utc>> {
        self.jobs
            .get(&(source.to_owned(), role))
            .map(|job| job.started)
    }

    /// Whether a run of `role` for `source` is still going.
    #[must_use]
    pub fn is_running(&self, source: &str, role: MirrorRole) -> bool {
        self.jobs
            .get(&(source.to_owned(), role))
            .is_some_and(|job| !job.handle.is_finished())
    }

    fn is_due(&self, key: &JobKey, interval: Duration, now: DateTime<Utc>) -> bool {
        let Some(job) = self.jobs.get(key) else {
            return true;
        };
        if !job.handle.is_finished() {
            debug!(source = %key.0, role = %key.1, "previous run still in progress");
            return false;
        }
        let interval = TimeDelta::from_std(interval).unwrap_or(TimeDelta::MAX);
        now - job.started >= interval
    }

    fn abort_all(&mut self) {
        for (_, job) in self.jobs.drain() {
            job.handle.abort();
        }
    }
}

/// Starts runs for every configured source on each tick.
pub struct MirrorScheduler {
    sources: Vec<Arc<SourceConfig>>,
    runner: Arc<dyn SourceJobRunner>,
    clock: Arc<dyn Clock>,
    state: SchedulerState,
}

impl MirrorScheduler {
    #[must_use]
    pub fn new(
        sources: Vec<Arc<SourceConfig>>,
        runner: Arc<dyn SourceJobRunner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sources,
            runner,
            clock,
            state: SchedulerState::default(),
        }
    }

    /// Current scheduling state.
    #[must_use]
    pub const fn state(&self) -> &SchedulerState {
        &self.state
    }

    /// Start every due run and return the pairs that were started.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn tick(&mut self) -> Vec<(String, MirrorRole)> {
        let now = self.clock.utc();
        let mut started = Vec::new();
        for source in &self.sources {
            let roles = [
                (MirrorRole::Import, source.has_import(), source.import_timer),
                (MirrorRole::Export, source.has_export(), source.export_timer),
            ];
            for (role, configured, interval) in roles {
                let key = (source.name.clone(), role);
                if !configured || !self.state.is_due(&key, interval, now) {
                    continue;
                }
                let handle = tokio::spawn(run_job(
                    Arc::clone(&self.runner),
                    Arc::clone(source),
                    role,
                ));
                self.state.jobs.insert(
                    key.clone(),
                    JobRecord {
                        started: now,
                        handle,
                    },
                );
                started.push(key);
            }
        }
        started
    }

    /// Tick every `period` until `shutdown` resolves, then abort running jobs.
    pub async fn run_until<F>(&mut self, period: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick();
                }
                () = &mut shutdown => break,
            }
        }
        info!("scheduler stopping");
        self.shutdown();
    }

    /// Abort every running job.
    pub fn shutdown(&mut self) {
        self.state.abort_all();
    }
}

async fn run_job(runner: Arc<dyn SourceJobRunner>, source: Arc<SourceConfig>, role: MirrorRole) {
    info!(source = %source.name, %role, "run started");
    match runner.run(Arc::clone(&source), role).await {
        Ok(()) => info!(source = %source.name, %role, "run finished"),
        Err(err) => error!(
            source = %source.name,
            %role,
            kind = %err.kind(),
            retryable = err.is_retryable(),
            error = %err,
            "run failed"
        ),
    }
}
