use crate::codec::{decode_line, encode_start_command, read_frame, CollectorMessage, DecodeError, Frame};
use gpumon_types::{GpumonError, GpumonResult};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use super::cancellation::{CancellationToken, StopSignal};
use super::launcher::{CollectorLauncher, CollectorProcess, LaunchedCollector};
use super::types::{ActivityClock, CollectorExit, WorkerEvent, WorkerFailure, WorkerOptions};

type EventSender = mpsc::UnboundedSender<WorkerEvent>;

/// One collector incarnation and the tasks that watch it.
pub struct WorkerHandle {
    pid: Option<u32>,
    started_at: Instant,
    interval_ms: u64,
    activity: Arc<ActivityClock>,
    exit: Arc<Mutex<Option<CollectorExit>>>,
    stop: StopSignal,
    reader: Option<JoinHandle<()>>,
    liveness: Option<JoinHandle<()>>,
    monitor: Option<JoinHandle<()>>,
    grace: Duration,
    terminated: bool,
}

impl WorkerHandle {
    pub async fn spawn(
        launcher: &dyn CollectorLauncher,
        options: WorkerOptions,
        events: EventSender,
    ) -> GpumonResult<Self> {
        let LaunchedCollector {
            mut stdin,
            stdout,
            mut process,
        } = launcher
            .launch()
            .map_err(|e| GpumonError::Spawn(format!("{}: {}", launcher.describe(), e)))?;

        let pid = process.id();

        if let Err(e) = write_start_command(&mut stdin, options.interval_ms).await {
            let _ = process.start_kill();
            return Err(GpumonError::Spawn(format!(
                "Failed to send start command to {}: {}",
                launcher.describe(),
                e
            )));
        }

        info!(
            "Collector started (pid {:?}, interval {}ms, stale after {:?})",
            pid, options.interval_ms, options.stale_timeout
        );

        let activity = Arc::new(ActivityClock::new());
        let exit = Arc::new(Mutex::new(None));
        let (stop, token) = CancellationToken::new();
        let (eof_tx, eof_rx) = oneshot::channel();

        let reader = tokio::spawn(run_reader(
            stdout,
            options.malformed_threshold,
            activity.clone(),
            events.clone(),
            eof_tx,
        ));

        let liveness = tokio::spawn(run_liveness(
            activity.clone(),
            options.stale_timeout,
            options.liveness_tick(),
            token.clone(),
            events.clone(),
        ));

        let monitor = tokio::spawn(run_monitor(
            process,
            stdin,
            token,
            eof_rx,
            options.terminate_grace,
            exit.clone(),
            events,
        ));

        Ok(Self {
            pid,
            started_at: Instant::now(),
            interval_ms: options.interval_ms,
            activity,
            exit,
            stop,
            reader: Some(reader),
            liveness: Some(liveness),
            monitor: Some(monitor),
            grace: options.terminate_grace,
            terminated: false,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn last_activity_at(&self) -> Instant {
        self.activity.last_activity_at()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit.lock().and_then(|exit| exit.code)
    }

    pub fn has_exited(&self) -> bool {
        self.exit.lock().is_some()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Closes stdin, waits up to the grace period, then kills. Idempotent.
    pub async fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.stop.cancel();

        // Dropping the reader future drops the pipe and unblocks the pending read.
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(liveness) = self.liveness.take() {
            liveness.abort();
        }

        if let Some(monitor) = self.monitor.take() {
            let budget = self.grace + Duration::from_millis(500);
            if tokio::time::timeout(budget, monitor).await.is_err() {
                warn!("Collector {:?} not reaped within {:?}", self.pid, budget);
            }
        }

        debug!(
            "Collector {:?} terminated (exit code {:?})",
            self.pid,
            self.exit_code()
        );
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if !self.terminated {
            self.stop.cancel();
            if let Some(reader) = self.reader.take() {
                reader.abort();
            }
            if let Some(liveness) = self.liveness.take() {
                liveness.abort();
            }
        }
    }
}

async fn write_start_command<W>(stdin: &mut W, interval_ms: u64) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    stdin.write_all(&encode_start_command(interval_ms)).await?;
    stdin.flush().await
}

async fn run_reader(
    stdout: Box<dyn AsyncRead + Send + Unpin>,
    malformed_threshold: u32,
    activity: Arc<ActivityClock>,
    events: EventSender,
    eof_tx: oneshot::Sender<()>,
) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::with_capacity(512);
    let mut consecutive_malformed = 0u32;

    loop {
        let frame = match read_frame(&mut reader, &mut buf).await {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Collector stdout read error: {}", e);
                let _ = eof_tx.send(());
                return;
            }
        };

        let decoded = match frame {
            Frame::Line(line) => decode_line(&line),
            Frame::Partial(tail) => {
                debug!("Discarding unterminated final line ({} bytes)", tail.len());
                Err(DecodeError::Malformed("unterminated final line".into()))
            }
            Frame::Eof => {
                debug!("Collector stdout closed");
                let _ = eof_tx.send(());
                return;
            }
        };

        let event = match decoded {
            Ok(CollectorMessage::Sample(sample)) => {
                consecutive_malformed = 0;
                activity.touch();
                trace!(
                    "Sample device={} fields={} t={}",
                    sample.device_index,
                    sample.fields.len(),
                    sample.timestamp_ms
                );
                WorkerEvent::Sample(sample)
            }
            Ok(CollectorMessage::Heartbeat { .. }) => {
                consecutive_malformed = 0;
                activity.touch();
                WorkerEvent::Heartbeat
            }
            Err(e) => {
                consecutive_malformed += 1;
                debug!("{} ({} in a row)", e, consecutive_malformed);
                WorkerEvent::Malformed(e)
            }
        };

        if events.send(event).is_err() {
            return;
        }

        if consecutive_malformed >= malformed_threshold {
            warn!(
                "{} consecutive malformed lines from collector",
                consecutive_malformed
            );
            let _ = events.send(WorkerEvent::Failure(WorkerFailure::ProtocolDesync {
                consecutive: consecutive_malformed,
            }));
            return;
        }
    }
}

async fn run_liveness(
    activity: Arc<ActivityClock>,
    stale_timeout: Duration,
    tick: Duration,
    mut token: CancellationToken,
    events: EventSender,
) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let silent_for = activity.silent_for();
                if silent_for > stale_timeout {
                    warn!("Collector silent for {:?} (limit {:?})", silent_for, stale_timeout);
                    let _ = events.send(WorkerEvent::Failure(WorkerFailure::Stale { silent_for }));
                    return;
                }
            }
            _ = token.cancelled() => return,
        }
    }
}

async fn run_monitor(
    mut process: Box<dyn CollectorProcess>,
    stdin: Box<dyn AsyncWrite + Send + Unpin>,
    mut token: CancellationToken,
    mut eof_rx: oneshot::Receiver<()>,
    grace: Duration,
    exit: Arc<Mutex<Option<CollectorExit>>>,
    events: EventSender,
) {
    let mut stdin = Some(stdin);
    let mut eof_pending = true;
    let mut closed_deadline: Option<tokio::time::Instant> = None;

    loop {
        tokio::select! {
            status = process.wait() => {
                let code = record_exit(&exit, status);
                if token.is_cancelled() {
                    debug!("Collector exited after stop request (code {:?})", code);
                } else {
                    warn!("Collector exited unexpectedly (code {:?})", code);
                    let _ = events.send(WorkerEvent::Failure(WorkerFailure::ProcessExited { code }));
                }
                return;
            }
            _ = token.cancelled() => {
                // Closing stdin is the graceful stop request.
                drop(stdin.take());
                let status = match tokio::time::timeout(grace, process.wait()).await {
                    Ok(status) => status,
                    Err(_) => {
                        warn!("Collector ignored stop for {:?}, killing", grace);
                        if let Err(e) = process.start_kill() {
                            warn!("Failed to kill collector: {}", e);
                        }
                        process.wait().await
                    }
                };
                record_exit(&exit, status);
                return;
            }
            result = &mut eof_rx, if eof_pending => {
                eof_pending = false;
                if result.is_ok() {
                    closed_deadline = Some(tokio::time::Instant::now() + grace);
                }
            }
            _ = sleep_until_opt(closed_deadline), if closed_deadline.is_some() => {
                closed_deadline = None;
                if !token.is_cancelled() {
                    warn!("Collector closed stdout but is still running");
                    let _ = events.send(WorkerEvent::Failure(WorkerFailure::StreamClosed));
                }
            }
        }
    }
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn record_exit(exit: &Mutex<Option<CollectorExit>>, status: io::Result<Option<i32>>) -> Option<i32> {
    let code = match status {
        Ok(code) => code,
        Err(e) => {
            warn!("Failed to reap collector: {}", e);
            None
        }
    };
    *exit.lock() = Some(CollectorExit { code });
    code
}
