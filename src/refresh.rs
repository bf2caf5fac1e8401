use crate::collectors::Aggregator;
use crate::metrics::Metrics;
use crate::report::{self, ExportError};
use crate::snapshot::Snapshot;
use crate::state::{Published, State};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub type CaptureFn = Arc<dyn Fn() -> Snapshot + Send + Sync>;

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("refresh worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[derive(Clone)]
pub struct Refresher {
    capture: CaptureFn,
    state: Arc<RwLock<State>>,
    metrics: Arc<Metrics>,
    export_dir: PathBuf,
}

impl Refresher {
    pub fn new(
        aggregator: Aggregator,
        state: Arc<RwLock<State>>,
        metrics: Arc<Metrics>,
        export_dir: PathBuf,
    ) -> Self {
        let capture: CaptureFn = Arc::new(move || aggregator.capture());
        Self::with_capture(capture, state, metrics, export_dir)
    }

    pub fn with_capture(
        capture: CaptureFn,
        state: Arc<RwLock<State>>,
        metrics: Arc<Metrics>,
        export_dir: PathBuf,
    ) -> Self {
        Self {
            capture,
            state,
            metrics,
            export_dir,
        }
    }

    pub fn spawn_refresh(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(err) = this.refresh_now().await {
                warn!(error = %err, "refresh failed");
            }
        })
    }

    pub async fn refresh_now(&self) -> Result<Arc<Published>, RefreshError> {
        let capture = self.capture.clone();
        let published = tokio::task::spawn_blocking(move || Published::new(capture())).await?;
        let published = Arc::new(published);

        {
            // metrics follow the same publish order as the displayed snapshot
            let mut guard = self.state.write().await;
            guard.publish(published.clone());
            self.metrics
                .update_from_snapshot(&published.snapshot, guard.started_at_unix);
        }
        debug!(
            failures = published.snapshot.failures.len(),
            "snapshot published"
        );
        Ok(published)
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    pub async fn export(&self, path: Option<PathBuf>) -> Result<PathBuf, ExportError> {
        let result = self.export_inner(path).await;
        self.metrics.inc_export(result.is_ok());
        match &result {
            Ok(path) => info!(path = %path.display(), "report exported"),
            Err(err) => warn!(error = %err, "report export failed"),
        }
        result
    }

    async fn export_inner(&self, path: Option<PathBuf>) -> Result<PathBuf, ExportError> {
        let latest = self.state.read().await.latest.clone();
        let published = match latest {
            Some(p) => p,
            None => self
                .refresh_now()
                .await
                .map_err(|err| ExportError::NoReport(err.to_string()))?,
        };

        let path = path.unwrap_or_else(|| {
            self.export_dir
                .join(report::default_export_filename(&published.snapshot.timestamp))
        });
        write_report(path, published).await
    }

    pub async fn run_auto_refresh(self, interval_secs: u64, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // the first tick completes immediately; the initial refresh is issued at start-up
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("auto-refresh stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.spawn_refresh();
                }
            }
        }
    }
}

async fn write_report(path: PathBuf, published: Arc<Published>) -> Result<PathBuf, ExportError> {
    let target = path.clone();
    let written = tokio::task::spawn_blocking(move || {
        report::export_report(Path::new(&target), &published.report)
    })
    .await
    .map_err(|err| ExportError::Write {
        path: path.clone(),
        source: std::io::Error::new(std::io::ErrorKind::Other, err),
    })?;
    written.map(|()| path)
}
