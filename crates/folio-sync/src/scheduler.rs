use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::containment::contain;
use crate::{SyncConfig, SyncError, SyncPipeline, SyncRunSummary};

#[derive(Debug)]
pub enum TriggerOutcome {
    Completed(SyncRunSummary),
    /// The run failed; the failure was logged.
    Failed,
    /// Another run was still in flight.
    Skipped,
}

/// Serializes pipeline runs. Triggers that arrive while a run is in flight are
/// dropped rather than queued.
pub struct SyncRunner {
    pipeline: Arc<SyncPipeline>,
    gate: Arc<Mutex<()>>,
}

impl SyncRunner {
    pub fn new(pipeline: SyncPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Runs the pipeline once inside the whole-run boundary. Never fails and
    /// never panics.
    pub async fn trigger(&self) -> TriggerOutcome {
        let Ok(in_flight) = Arc::clone(&self.gate).try_lock_owned() else {
            warn!("sync run already in flight; skipping trigger");
            return TriggerOutcome::Skipped;
        };

        // The guard lives in the run task, so dropping this future does not
        // free the gate while the run is still going.
        let pipeline = Arc::clone(&self.pipeline);
        let handle = tokio::spawn(async move {
            let _in_flight = in_flight;
            pipeline.run_once().await
        });
        let run = async move {
            match handle.await {
                Ok(result) => result,
                Err(join_err) => Err(SyncError::Aborted(join_err.to_string())),
            }
        };

        match contain("sync_run", None, run).await {
            Some(summary) => TriggerOutcome::Completed(summary),
            None => TriggerOutcome::Failed,
        }
    }
}

/// Cron-driven trigger for a [`SyncRunner`].
pub struct SyncScheduler {
    inner: JobScheduler,
}

impl SyncScheduler {
    pub async fn build(runner: Arc<SyncRunner>, cron: &str) -> Result<Self> {
        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let job = Job::new_async(cron, move |_uuid, _l| {
            let runner = Arc::clone(&runner);
            Box::pin(async move {
                info!("scheduled sync triggered");
                runner.trigger().await;
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(Self { inner: sched })
    }

    /// `None` when the scheduler is disabled in config.
    pub async fn maybe_build(config: &SyncConfig, runner: Arc<SyncRunner>) -> Result<Option<Self>> {
        if !config.scheduler_enabled {
            info!("scheduler disabled; only the startup sync will run");
            return Ok(None);
        }
        Self::build(runner, &config.sync_cron).await.map(Some)
    }

    pub async fn start(&self) -> Result<()> {
        self.inner.start().await.context("starting scheduler")
    }

    pub async fn shutdown(mut self) -> Result<()> {
        self.inner.shutdown().await.context("shutting down scheduler")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{payload, GatedSource, PanickingSource, StaticSource};
    use folio_github::RepositorySource;
    use folio_storage::{MemoryRecordStore, RecordStore};

    fn runner_with(source: Arc<dyn RepositorySource>) -> (Arc<MemoryRecordStore>, Arc<SyncRunner>) {
        let store = Arc::new(MemoryRecordStore::new());
        let pipeline = SyncPipeline::new(source, store.clone() as Arc<dyn RecordStore>);
        (store, Arc::new(SyncRunner::new(pipeline)))
    }

    #[tokio::test]
    async fn overlapping_trigger_is_skipped() {
        let source = Arc::new(GatedSource::new(payload(&["alpha"])));
        let (_store, runner) = runner_with(source.clone());

        let first = tokio::spawn({
            let runner = Arc::clone(&runner);
            async move { runner.trigger().await }
        });
        source.entered.notified().await;

        assert!(matches!(runner.trigger().await, TriggerOutcome::Skipped));

        source.release.notify_one();
        assert!(matches!(first.await.unwrap(), TriggerOutcome::Completed(_)));

        source.release.notify_one();
        assert!(matches!(runner.trigger().await, TriggerOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn dropped_trigger_keeps_gate_until_run_finishes() {
        let source = Arc::new(GatedSource::new(payload(&["alpha"])));
        let (store, runner) = runner_with(source.clone());

        let first = tokio::spawn({
            let runner = Arc::clone(&runner);
            async move { runner.trigger().await }
        });
        source.entered.notified().await;
        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());

        assert!(matches!(runner.trigger().await, TriggerOutcome::Skipped));

        source.release.notify_one();
        let mut released = false;
        for _ in 0..1_000 {
            if runner.gate.try_lock().is_ok() {
                released = true;
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(released, "run did not finish");

        let collection = store
            .find_collection_by_name(folio_core::PORTFOLIO_COLLECTION)
            .await
            .unwrap()
            .expect("collection created by the detached run");
        assert_eq!(store.list_records(collection.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_run_is_contained_and_next_tick_retries() {
        let source = Arc::new(StaticSource::unavailable());
        let (store, runner) = runner_with(source.clone());

        assert!(matches!(runner.trigger().await, TriggerOutcome::Failed));
        assert!(store
            .find_collection_by_name(folio_core::PORTFOLIO_COLLECTION)
            .await
            .unwrap()
            .is_none());

        source.set_payload(payload(&["alpha"]));
        match runner.trigger().await {
            TriggerOutcome::Completed(summary) => assert_eq!(summary.created, 1),
            other => panic!("expected completed run, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn panicking_run_does_not_escape() {
        let (_store, runner) = runner_with(Arc::new(PanickingSource));
        assert!(matches!(runner.trigger().await, TriggerOutcome::Failed));
        // The gate is released after a panic.
        assert!(matches!(runner.trigger().await, TriggerOutcome::Failed));
    }

    #[tokio::test]
    async fn disabled_scheduler_is_not_built() {
        let (_store, runner) = runner_with(Arc::new(StaticSource::new(payload(&[]))));
        let mut config = SyncConfig::from_lookup(|_| None);
        config.scheduler_enabled = false;
        assert!(SyncScheduler::maybe_build(&config, runner).await.unwrap().is_none());
    }
}
