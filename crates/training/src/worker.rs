use crate::orchestrator::Orchestrator;
use anyhow::Result;
use chrono::Utc;
use qbot_core::{StartOutcome, StartSignal, StatusStore, TrainingConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

/// Consumes start signals and runs the orchestrator, one run at a time.
///
/// With a cron schedule configured, a start signal is also published on
/// schedule so scheduled and manual runs take the same path.
pub struct TrainingWorker {
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn StatusStore>,
    poll_interval: Duration,
    signal_ttl: Duration,
    schedule: Option<String>,
}

impl TrainingWorker {
    #[must_use]
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        store: Arc<dyn StatusStore>,
        config: &TrainingConfig,
    ) -> Self {
        Self {
            orchestrator,
            store,
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            signal_ttl: Duration::from_secs(config.start_signal_ttl_secs),
            schedule: config.schedule.clone(),
        }
    }

    /// Polls for start signals until the task is dropped.
    ///
    /// # Errors
    /// Returns an error if the cron schedule is invalid or the scheduler fails to start.
    pub async fn run(self) -> Result<()> {
        // Held for the lifetime of the loop.
        let _scheduler = match &self.schedule {
            Some(cron) => Some(self.start_schedule(cron).await?),
            None => None,
        };

        info!(
            "Training worker polling for start signals every {}s",
            self.poll_interval.as_secs()
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            interval.tick().await;
            if let Err(e) = self.poll_once().await {
                error!("Training worker poll failed: {:#}", e);
            }
        }
    }

    /// Consumes a pending start signal, if any, and runs it to completion.
    ///
    /// A signal whose run could not be initialized is put back until its
    /// original expiry, so the next poll retries it.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read or the run cannot be initialized.
    pub async fn poll_once(&self) -> Result<Option<StartOutcome>> {
        let Some(signal) = self.store.take_start_signal().await? else {
            return Ok(None);
        };

        info!(
            "Start signal from {} requested at {}",
            signal.source, signal.requested_at
        );

        let outcome = match self.orchestrator.start(signal.tickers.clone()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.requeue(&signal).await;
                return Err(e);
            }
        };
        if let StartOutcome::Rejected(rejection) = &outcome {
            warn!("Start signal rejected: {}", rejection.message());
        }
        Ok(Some(outcome))
    }

    async fn requeue(&self, signal: &StartSignal) {
        let age = (Utc::now() - signal.requested_at)
            .to_std()
            .unwrap_or_default();
        let remaining = self.signal_ttl.saturating_sub(age);
        if remaining.as_secs() == 0 {
            warn!("Dropping expired start signal from {}", signal.source);
            return;
        }

        match self.store.put_start_signal(signal, remaining).await {
            Ok(()) => info!("Start signal requeued for {}s", remaining.as_secs()),
            Err(e) => error!("Failed to requeue start signal: {:#}", e),
        }
    }

    async fn start_schedule(&self, cron: &str) -> Result<JobScheduler> {
        info!("Scheduling training runs with cron: {}", cron);

        let scheduler = JobScheduler::new().await?;
        let store = self.store.clone();
        let ttl = self.signal_ttl;

        let job = Job::new_async(cron, move |_uuid, _lock| {
            let store = store.clone();
            Box::pin(async move {
                let signal = StartSignal::new(None, "schedule");
                match store.put_start_signal(&signal, ttl).await {
                    Ok(()) => info!("Scheduled start signal published"),
                    Err(e) => error!("Failed to publish scheduled start signal: {:#}", e),
                }
            })
        })?;

        scheduler.add(job).await?;
        scheduler.start().await?;
        Ok(scheduler)
    }
}
