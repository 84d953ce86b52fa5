//! Application wiring for both deployment modes.
//!
//! Direct mode: backfill → tail loop → DashboardState → viewers, with an
//! optional chain head watcher. Relay mode: upstream bridge → viewers.
//! Both modes share the HTTP server and stop on Ctrl-C.

use std::time::Duration;

use arbwatch_dashboard::{
    bind, serve, BroadcastHub, DashboardState, StatusCadence, SystemSampler,
};
use arbwatch_feed::{read_recent_lines, LogTailer, TailWatch};
use arbwatch_relay::{BlockWatcher, RelayBridge, UpstreamHandler, UpstreamLink};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, RunMode, TailConfig};
use crate::error::{AppError, AppResult};

/// How long shutdown waits for background tasks before aborting them.
const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Main application.
#[derive(Debug)]
pub struct Application {
    config: AppConfig,
    shutdown: CancellationToken,
}

impl Application {
    /// Create the application from a validated configuration.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Token cancelled on shutdown. Cancelling it stops [`Application::run`].
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Bind the viewer port, start every task for the configured mode and
    /// run until Ctrl-C or the shutdown token fires.
    ///
    /// A bind failure is returned before any task starts.
    pub async fn run(self) -> AppResult<()> {
        let listener = bind(self.config.dashboard.port).await?;
        self.run_with_listener(listener).await
    }

    /// Like [`Application::run`] on an already bound listener.
    pub async fn run_with_listener(self, listener: TcpListener) -> AppResult<()> {
        info!(mode = ?self.config.mode, port = self.config.dashboard.port, "Starting application");

        let (state, cadence, workers) = match self.config.mode {
            RunMode::Direct => self.start_direct().await?,
            RunMode::Relay => self.start_relay(),
        };

        let mut server = tokio::spawn(serve(
            listener,
            state,
            self.config.dashboard.clone(),
            cadence,
            self.shutdown.clone(),
        ));

        let server_result = tokio::select! {
            result = &mut server => Some(result),
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                None
            }
            _ = self.shutdown.cancelled() => None,
        };

        self.shutdown.cancel();
        info!("Shutting down");

        let server_result = match server_result {
            Some(result) => result,
            None => server.await,
        };

        join_workers(workers, WORKER_DRAIN_TIMEOUT).await;

        match server_result {
            Ok(result) => result.map_err(AppError::from),
            Err(e) => Err(AppError::Task(e.to_string())),
        }
    }

    async fn start_direct(&self) -> AppResult<(DashboardState, StatusCadence, Vec<JoinHandle<()>>)> {
        let state = DashboardState::new(
            BroadcastHub::new(self.config.dashboard.viewer_queue_capacity),
            SystemSampler::new(),
        );

        backfill(&state, &self.config.tail).await;

        let tail = &self.config.tail;
        let tailer = LogTailer::open(&tail.log_path, tail.start_at)
            .await?
            .with_reset_on_truncate(tail.reset_on_truncate);
        let watch = TailWatch::new(tail.watch_strategy, tailer.path(), tail.poll_interval())?;
        info!(path = %tailer.path().display(), strategy = ?tail.watch_strategy, "Tailing log");

        let mut workers = vec![tokio::spawn(run_tail_loop(
            state.clone(),
            tailer,
            watch,
            self.shutdown.clone(),
        ))];

        match &self.config.chain.ws_url {
            Some(url) => {
                let watcher = BlockWatcher::new(state.clone());
                workers.push(self.spawn_upstream(url, watcher));
            }
            None => info!("No chain endpoint configured. Block updates will be disabled."),
        }

        let cadence =
            StatusCadence::PerViewer(Duration::from_millis(self.config.dashboard.status_interval_ms));
        Ok((state, cadence, workers))
    }

    fn start_relay(&self) -> (DashboardState, StatusCadence, Vec<JoinHandle<()>>) {
        let state = DashboardState::new_relay_mode(
            BroadcastHub::new(self.config.dashboard.viewer_queue_capacity),
            SystemSampler::new(),
        );

        let bridge = RelayBridge::new(state.clone());
        let workers = vec![self.spawn_upstream(&self.config.relay.upstream_url, bridge)];

        let cadence = StatusCadence::Broadcast(Duration::from_millis(
            self.config.dashboard.relay_status_interval_ms,
        ));
        (state, cadence, workers)
    }

    fn spawn_upstream<H>(&self, url: &str, handler: H) -> JoinHandle<()>
    where
        H: UpstreamHandler + 'static,
    {
        let name = handler.name();
        let link = UpstreamLink::new(
            self.config.relay.connection(url),
            handler,
            self.shutdown.clone(),
        );
        info!(upstream = name, url, "Starting upstream connection");

        tokio::spawn(async move {
            if let Err(e) = link.run().await {
                error!(upstream = name, error = %e, "Upstream connection gave up");
            }
        })
    }
}

/// Await every worker, aborting whichever is still running once `limit`
/// has passed.
pub async fn join_workers(workers: Vec<JoinHandle<()>>, limit: Duration) {
    let deadline = tokio::time::Instant::now() + limit;
    for mut worker in workers {
        match tokio::time::timeout_at(deadline, &mut worker).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_cancelled() => {}
            Ok(Err(e)) => warn!(error = %e, "Worker task failed"),
            Err(_) => {
                warn!("Worker did not stop in time, aborting");
                worker.abort();
            }
        }
    }
}

/// Replay the configured historical log into `state` without notifying
/// viewers. Failures are logged and skipped.
pub async fn backfill(state: &DashboardState, tail: &TailConfig) -> usize {
    let Some(path) = &tail.backfill_path else {
        return 0;
    };

    match read_recent_lines(path, tail.backfill_lines).await {
        Ok(lines) => {
            let applied = state.replay_lines(&lines);
            info!(path = %path.display(), lines = lines.len(), applied, "Backfill complete");
            applied
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Backfill skipped");
            0
        }
    }
}

/// Feed newly appended log lines into `state` until cancelled.
///
/// Read errors are logged and retried on the next wake-up.
pub async fn run_tail_loop(
    state: DashboardState,
    mut tailer: LogTailer,
    mut watch: TailWatch,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Tail loop stopped");
                return;
            }
            _ = watch.changed() => {
                match tailer.poll().await {
                    Ok(lines) if lines.is_empty() => {}
                    Ok(lines) => {
                        state.ingest_lines(&lines);
                    }
                    Err(e) => warn!(path = %tailer.path().display(), error = %e, "Log read failed"),
                }
            }
        }
    }
}
