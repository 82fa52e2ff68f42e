use crate::error::ConfigError;
use crate::probe::PortProbe;
use crate::types::{
    PortResult, PortStatus, ScanConfig, ScanReport, ScanState, ScanSummary, ScanUpdate,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::net::IpAddr;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// Batch width and pacing for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    /// Ports probed concurrently per batch.
    pub batch_size: usize,
    /// Pause after each batch; the stop request is read once it elapses.
    pub batch_pause: Duration,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            batch_size: 5,
            batch_pause: Duration::from_millis(50),
        }
    }
}

impl ScanOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        Ok(())
    }
}

/// Split `[start, end]` into consecutive batches of at most `batch_size` ports.
///
/// Boundaries depend only on the arguments. Returns nothing for an empty
/// range or a zero batch size.
pub fn partition(start: u16, end: u16, batch_size: usize) -> Vec<RangeInclusive<u16>> {
    let mut out = Vec::new();
    if start > end || batch_size == 0 {
        return out;
    }
    let step = batch_size.min(u16::MAX as usize + 1) as u32;
    let end = end as u32;
    let mut lo = start as u32;
    while lo <= end {
        let hi = (lo + step - 1).min(end);
        out.push(lo as u16..=hi as u16);
        lo = hi + 1;
    }
    out
}

/// Share of the range covered up to and including `cursor`, in 0..=100.
pub fn progress_percent(start: u16, end: u16, cursor: u16) -> f64 {
    if cursor < start || end < start {
        return 0.0;
    }
    let total = (end - start) as f64 + 1.0;
    let done = (cursor - start) as f64 + 1.0;
    (done * 100.0 / total).clamp(0.0, 100.0)
}

/// One scan run: owns config, ordered results, cursor and state.
#[derive(Debug)]
pub struct ScanRun {
    config: ScanConfig,
    target: IpAddr,
    options: ScanOptions,
    results: Vec<PortResult>,
    cursor: u16,
    state: ScanState,
}

impl ScanRun {
    /// Validate and build an idle run. Nothing is allocated for probing yet.
    pub fn new(config: ScanConfig, options: ScanOptions) -> Result<Self, ConfigError> {
        let target = config.validate()?;
        options.validate()?;
        Ok(Self {
            config,
            target,
            options,
            results: Vec::new(),
            cursor: 0,
            state: ScanState::Idle,
        })
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn cursor(&self) -> u16 {
        self.cursor
    }

    pub fn results(&self) -> &[PortResult] {
        &self.results
    }

    pub fn progress(&self) -> f64 {
        progress_percent(self.config.start_port, self.config.end_port, self.cursor)
    }

    /// Drive the batch loop to a terminal state.
    ///
    /// `cancel` is read only at batch boundaries: before each dispatch and
    /// once after the last batch. In-flight probes always run to completion.
    /// `sink` receives one update per batch and a final terminal update.
    pub async fn execute<P, F>(
        mut self,
        probe: Arc<P>,
        cancel: CancellationToken,
        mut sink: F,
    ) -> ScanReport
    where
        P: PortProbe + ?Sized,
        F: FnMut(ScanUpdate),
    {
        self.state = ScanState::Scanning;
        self.results.clear();
        self.cursor = 0;

        let batches = partition(
            self.config.start_port,
            self.config.end_port,
            self.options.batch_size,
        );
        info!(
            target_addr = %self.target,
            start = self.config.start_port,
            end = self.config.end_port,
            batches = batches.len(),
            "scan started"
        );

        let mut stopped = false;
        for batch in batches {
            if cancel.is_cancelled() {
                stopped = true;
                break;
            }

            let batch_end = *batch.end();
            let new_results = self.run_batch(&probe, batch).await;
            self.results.extend(new_results.iter().cloned());
            self.cursor = batch_end;

            let progress = self.progress();
            debug!(cursor = self.cursor, progress, "batch done");
            sink(ScanUpdate {
                state: ScanState::Scanning,
                cursor_port: self.cursor,
                progress_percent: progress,
                new_results,
            });

            if self.options.batch_pause.is_zero() {
                tokio::task::yield_now().await;
            } else {
                time::sleep(self.options.batch_pause).await;
            }
        }
        if cancel.is_cancelled() {
            stopped = true;
        }

        if stopped {
            self.state = ScanState::Stopped;
        } else {
            self.state = ScanState::Completed;
            self.cursor = self.config.end_port;
        }

        let report = self.into_report();
        info!(
            state = %report.state,
            cursor = report.cursor_port,
            open = report.summary.open,
            "scan finished"
        );
        sink(ScanUpdate {
            state: report.state,
            cursor_port: report.cursor_port,
            progress_percent: report.progress_percent,
            new_results: Vec::new(),
        });
        report
    }

    /// Fan out one probe per port and join them all, keeping port order.
    async fn run_batch<P>(&self, probe: &Arc<P>, batch: RangeInclusive<u16>) -> Vec<PortResult>
    where
        P: PortProbe + ?Sized,
    {
        let addr = self.target;
        let timeout = self.config.timeout();
        let handles: Vec<(u16, JoinHandle<PortResult>)> = batch
            .map(|port| {
                let probe = Arc::clone(probe);
                // Stamped inside the task, when this port settles.
                let handle = tokio::spawn(async move {
                    let status = probe.probe(addr, port, timeout).await;
                    PortResult::new(port, status)
                });
                (port, handle)
            })
            .collect();

        let mut out = Vec::with_capacity(handles.len());
        for (port, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(port, error = %e, "probe task failed; recording CLOSED");
                    PortResult::new(port, PortStatus::Closed)
                }
            };
            out.push(result);
        }
        out
    }

    fn into_report(self) -> ScanReport {
        let progress_percent = self.progress();
        let summary = ScanSummary::from_results(&self.results);
        ScanReport {
            config: self.config,
            state: self.state,
            cursor_port: self.cursor,
            progress_percent,
            results: self.results,
            summary,
        }
    }
}

/// Live view of a run, kept current as updates arrive.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct RunSnapshot {
    pub state: ScanState,
    pub cursor_port: u16,
    pub progress_percent: f64,
    pub results: Vec<PortResult>,
    pub summary: ScanSummary,
}

impl RunSnapshot {
    fn scanning() -> Self {
        Self {
            state: ScanState::Scanning,
            ..Self::default()
        }
    }

    fn apply(&mut self, update: &ScanUpdate) {
        self.state = update.state;
        self.cursor_port = update.cursor_port;
        self.progress_percent = update.progress_percent;
        for r in &update.new_results {
            self.summary.record(r);
        }
        self.results.extend(update.new_results.iter().cloned());
    }
}

/// Caller side of a started run.
#[derive(Debug)]
pub struct ScanHandle {
    /// Per-batch updates, ending with the terminal update.
    pub updates: mpsc::UnboundedReceiver<ScanUpdate>,
    cancel: CancellationToken,
    report: oneshot::Receiver<ScanReport>,
}

impl ScanHandle {
    /// Request a stop at the next batch boundary. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the run to finish. `None` if the run task was torn down
    /// without producing a report.
    pub async fn wait(self) -> Option<ScanReport> {
        self.report.await.ok()
    }
}

struct ActiveRun {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    snapshot: Arc<Mutex<RunSnapshot>>,
}

/// Scan engine instance. At most one run is active; starting a new run
/// stops the previous one and waits for it to drain first.
pub struct Scanner {
    probe: Arc<dyn PortProbe>,
    options: ScanOptions,
    current: Mutex<Option<ActiveRun>>,
}

impl Scanner {
    pub fn new(probe: impl PortProbe, options: ScanOptions) -> Self {
        Self::from_arc(Arc::new(probe), options)
    }

    pub fn from_arc(probe: Arc<dyn PortProbe>, options: ScanOptions) -> Self {
        Self {
            probe,
            options,
            current: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Begin a run. Invalid configuration is rejected before anything changes.
    ///
    /// The returned handle may be dropped; the run keeps going and its
    /// progress stays readable through [`Scanner::snapshot`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, config: ScanConfig) -> Result<ScanHandle, ConfigError> {
        let run = ScanRun::new(config, self.options.clone())?;

        let cancel = CancellationToken::new();
        let snapshot = Arc::new(Mutex::new(RunSnapshot::scanning()));
        let (tx, rx) = mpsc::unbounded_channel();
        let (report_tx, report_rx) = oneshot::channel();

        let mut current = self.current.lock();
        let previous = current.take().map(|prev| {
            prev.cancel.cancel();
            prev.task
        });

        let span = info_span!("scan", target_addr = %run.target);
        let probe = Arc::clone(&self.probe);
        let run_cancel = cancel.clone();
        let run_snapshot = Arc::clone(&snapshot);
        let task = tokio::spawn(
            async move {
                if let Some(prev) = previous {
                    debug!("waiting for previous run to drain");
                    if let Err(e) = prev.await {
                        warn!(error = %e, "previous scan task failed");
                    }
                }
                let report = run
                    .execute(probe, run_cancel, |update| {
                        run_snapshot.lock().apply(&update);
                        let _ = tx.send(update);
                    })
                    .await;
                let _ = report_tx.send(report);
            }
            .instrument(span),
        );

        *current = Some(ActiveRun {
            cancel: cancel.clone(),
            task,
            snapshot,
        });

        Ok(ScanHandle {
            updates: rx,
            cancel,
            report: report_rx,
        })
    }

    /// Request cancellation of the active run. No-op when idle or finished.
    pub fn stop(&self) {
        if let Some(run) = self.current.lock().as_ref() {
            if !run.snapshot.lock().state.is_terminal() {
                run.cancel.cancel();
            }
        }
    }

    pub fn state(&self) -> ScanState {
        self.current
            .lock()
            .as_ref()
            .map(|run| run.snapshot.lock().state)
            .unwrap_or_default()
    }

    /// Copy of the current (or last) run's live view.
    pub fn snapshot(&self) -> RunSnapshot {
        self.current
            .lock()
            .as_ref()
            .map(|run| run.snapshot.lock().clone())
            .unwrap_or_default()
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        if let Some(run) = self.current.get_mut().as_ref() {
            run.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_is_deterministic_with_short_tail() {
        let a = partition(78, 82, 2);
        assert_eq!(a, vec![78..=79, 80..=81, 82..=82]);
        assert_eq!(a, partition(78, 82, 2));
    }

    #[test]
    fn partition_edge_cases() {
        assert_eq!(partition(80, 80, 5), vec![80..=80]);
        assert_eq!(partition(10, 12, 100), vec![10..=12]);
        assert_eq!(partition(65534, 65535, 1), vec![65534..=65534, 65535..=65535]);
        assert_eq!(partition(1, 65535, usize::MAX), vec![1..=65535]);
        assert!(partition(5, 4, 2).is_empty());
        assert!(partition(1, 4, 0).is_empty());
    }

    #[test]
    fn partition_covers_range_without_gaps() {
        let batches = partition(1, 1000, 7);
        let ports: Vec<u16> = batches.into_iter().flatten().collect();
        assert_eq!(ports, (1..=1000).collect::<Vec<u16>>());
    }

    #[test]
    fn progress_formula() {
        assert_eq!(progress_percent(78, 82, 79), 40.0);
        assert_eq!(progress_percent(78, 82, 81), 80.0);
        assert_eq!(progress_percent(78, 82, 82), 100.0);
        assert_eq!(progress_percent(78, 82, 0), 0.0);
        assert_eq!(progress_percent(1, 65535, 65535), 100.0);
    }

    #[test]
    fn zero_batch_size_rejected() {
        let opts = ScanOptions {
            batch_size: 0,
            ..ScanOptions::default()
        };
        let err = ScanRun::new(ScanConfig::new("127.0.0.1", 1, 2, 10), opts).unwrap_err();
        assert_eq!(err, ConfigError::InvalidBatchSize);
    }
}
