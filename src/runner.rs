//! Continuous runner: claim → process → record → sleep, until stopped.
//!
//! The runner has two states, [`RunnerState::Running`] and
//! [`RunnerState::Stopped`]. It stops on a shutdown signal, or, in
//! `--once` mode, as soon as a pass claims nothing. A pass that fails is
//! logged and retried after `runner.crash_backoff_secs`; the backoff is
//! fixed and there is no cap on restarts.
//!
//! On start-up, jobs left in `processing` by a crashed runner for longer
//! than `runner.stale_after_secs` are released back to `pending`.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::{Config, RunnerConfig};
use crate::content::ContentStore;
use crate::db;
use crate::pipeline::{BatchReport, Pipeline};
use crate::processor::ProcessorRegistry;
use crate::queue::QueueStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Running,
    Stopped,
}

pub struct Runner {
    pipeline: Pipeline,
    settings: RunnerConfig,
    batch_size: usize,
    error_retention_days: Option<u32>,
    stop_when_idle: bool,
    shutdown: watch::Receiver<bool>,
    state: RunnerState,
    passes: u64,
    totals: BatchReport,
}

impl Runner {
    pub fn new(config: &Config, pipeline: Pipeline, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            pipeline,
            settings: config.runner.clone(),
            batch_size: config.queue.batch_size,
            error_retention_days: config.queue.error_retention_days,
            stop_when_idle: false,
            shutdown,
            state: RunnerState::Stopped,
            passes: 0,
            totals: BatchReport::default(),
        }
    }

    /// Stop after the first pass that claims nothing.
    pub fn stop_when_idle(mut self, yes: bool) -> Self {
        self.stop_when_idle = yes;
        self
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Run until stopped. Returns the totals over all passes.
    ///
    /// In `stop_when_idle` mode a failing pass ends the run with its error
    /// instead of backing off.
    pub async fn run(&mut self) -> Result<BatchReport> {
        self.state = RunnerState::Running;
        info!(batch_size = self.batch_size, once = self.stop_when_idle, "runner started");

        match self
            .pipeline
            .queue()
            .release_stale(self.settings.stale_after_secs)
            .await
        {
            Ok(0) => {}
            Ok(n) => info!(released = n, "released stale processing jobs"),
            Err(e) => warn!(error = %e, "could not release stale jobs"),
        }

        while self.state == RunnerState::Running {
            if self.shutdown_requested() {
                info!("shutdown requested");
                break;
            }

            match self.run_pass().await {
                Ok(report) if report.is_empty() => {
                    if self.stop_when_idle {
                        info!("queue drained");
                        break;
                    }
                    if !self.pause(self.settings.idle_interval_secs).await {
                        break;
                    }
                }
                Ok(report) => {
                    info!(
                        pass = self.passes,
                        claimed = report.claimed,
                        completed = report.completed,
                        failed = report.failed,
                        retried = report.retried,
                        errored = report.errored,
                        "pass finished"
                    );
                    self.totals.absorb(&report);
                    if !self.stop_when_idle && !self.pause(self.settings.poll_interval_secs).await {
                        break;
                    }
                }
                Err(e) => {
                    if self.stop_when_idle {
                        self.state = RunnerState::Stopped;
                        return Err(e);
                    }
                    error!(
                        error = %format!("{:#}", e),
                        backoff_secs = self.settings.crash_backoff_secs,
                        "pass failed, restarting after backoff"
                    );
                    if !self.pause(self.settings.crash_backoff_secs).await {
                        break;
                    }
                }
            }
        }

        self.state = RunnerState::Stopped;
        info!(passes = self.passes, "runner stopped");
        Ok(self.totals.clone())
    }

    /// One pass: purge expired error jobs, then claim and process a batch.
    pub async fn run_pass(&mut self) -> Result<BatchReport> {
        self.passes += 1;

        if let Some(days) = self.error_retention_days {
            let purged = self.pipeline.queue().purge_errors(days).await?;
            if purged > 0 {
                info!(purged, retention_days = days, "purged expired error jobs");
            }
        }

        self.pipeline.run_batch(self.batch_size).await
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Sleep for `secs`, waking early on shutdown. Returns `false` on shutdown.
    async fn pause(&mut self, secs: u64) -> bool {
        let sleep = tokio::time::sleep(Duration::from_secs(secs));
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return !self.shutdown_requested(),
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        // Sender gone: nobody can ask us to stop any more.
                        (&mut sleep).await;
                        return true;
                    }
                    if self.shutdown_requested() {
                        return false;
                    }
                }
            }
        }
    }
}

/// Entry point for `atlas run`.
pub async fn run_runner(config: &Config, once: bool) -> Result<()> {
    let processors = ProcessorRegistry::with_builtins(&config.processor)?;

    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(true);
        }
    });

    let totals = run_runner_with_processors(config, once, Arc::new(processors), rx).await?;

    println!("run{}", if once { " (once)" } else { "" });
    println!("  claimed: {}", totals.claimed);
    println!("  completed: {}", totals.completed);
    println!("  failed: {}", totals.failed);
    println!("  retried: {}", totals.retried);
    println!("  errored: {}", totals.errored);
    println!("ok");
    Ok(())
}

/// Run with a caller-supplied processor registry and shutdown channel.
pub async fn run_runner_with_processors(
    config: &Config,
    once: bool,
    processors: Arc<ProcessorRegistry>,
    shutdown: watch::Receiver<bool>,
) -> Result<BatchReport> {
    let pool = db::connect(config).await?;
    let queue = QueueStore::new(pool.clone(), &config.queue);
    let content = ContentStore::new(pool.clone());
    let pipeline = Pipeline::new(config, queue, content, processors);

    let mut runner = Runner::new(config, pipeline, shutdown).stop_when_idle(once);
    let result = runner.run().await;

    pool.close().await;
    result
}
