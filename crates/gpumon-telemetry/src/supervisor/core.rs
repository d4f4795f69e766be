use crate::breaker::{BreakerDecision, CircuitBreaker};
use crate::config::TelemetryConfig;
use crate::store::TimeSeriesStore;
use crate::worker::{
    CollectorLauncher, CommandLauncher, WorkerEvent, WorkerFailure, WorkerHandle, WorkerOptions,
};
use chrono::Utc;
use gpumon_types::{
    GpumonError, GpumonResult, MetricKey, MetricSample, SeriesPoint, SupervisorStatus,
};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use super::stats::{Counters, FailureRecord, SupervisorStats, WorkerInfo};

type EventReceiver = mpsc::UnboundedReceiver<WorkerEvent>;

enum Respawn {
    Launched(EventReceiver),
    Failed(WorkerFailure),
    Superseded,
}

struct Inner {
    config: TelemetryConfig,
    launcher: Arc<dyn CollectorLauncher>,
    store: Arc<TimeSeriesStore>,
    breaker: Mutex<CircuitBreaker>,
    phase: RwLock<SupervisorStatus>,
    status_tx: watch::Sender<SupervisorStatus>,
    /// Bumped on every lifecycle transition; events and respawns from an
    /// older generation are dropped.
    generation: watch::Sender<u64>,
    /// Also the lifecycle lock: start, stop, failure handling and respawn
    /// all hold it.
    worker: tokio::sync::Mutex<Option<WorkerHandle>>,
    worker_info: RwLock<Option<WorkerInfo>>,
    interval_ms: AtomicU64,
    counters: Counters,
    last_failure: Mutex<Option<FailureRecord>>,
    started_at: Instant,
}

impl Inner {
    fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    fn phase(&self) -> SupervisorStatus {
        *self.phase.read()
    }

    fn publish(&self, phase: SupervisorStatus) {
        let status = if self.breaker.lock().is_open() {
            SupervisorStatus::BreakerOpen
        } else {
            phase
        };
        self.status_tx.send_if_modified(|current| {
            if *current != status {
                *current = status;
                true
            } else {
                false
            }
        });
    }

    fn set_phase(&self, phase: SupervisorStatus) {
        let mut current = self.phase.write();
        *current = phase;
        self.publish(phase);
    }

    /// Enters `phase` as a new generation.
    fn advance(&self, phase: SupervisorStatus) -> u64 {
        let mut current = self.phase.write();
        *current = phase;
        let mut next = 0;
        self.generation.send_modify(|generation| {
            *generation += 1;
            next = *generation;
        });
        self.publish(phase);
        next
    }

    async fn launch(&self) -> GpumonResult<(WorkerHandle, EventReceiver)> {
        let interval_ms = self.interval_ms.load(Ordering::Relaxed);
        let options = WorkerOptions::from_config(&self.config, interval_ms);
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = WorkerHandle::spawn(self.launcher.as_ref(), options, tx).await?;

        Counters::bump(&self.counters.spawns);
        *self.worker_info.write() = Some(WorkerInfo {
            pid: handle.pid(),
            started_at: handle.started_at(),
        });
        Ok((handle, rx))
    }

    async fn retire_worker(&self, slot: &mut Option<WorkerHandle>) {
        *self.worker_info.write() = None;
        if let Some(mut handle) = slot.take() {
            handle.terminate().await;
        }
    }

    fn note_failure(&self, failure: &WorkerFailure) {
        Counters::bump(&self.counters.failures);
        *self.last_failure.lock() = Some(FailureRecord {
            reason: failure.to_string(),
            at: Utc::now(),
        });
    }

    fn on_sample(&self, generation: u64, sample: MetricSample) {
        let mut phase = self.phase.write();
        if self.generation() != generation {
            return;
        }

        let dropped = self.store.record(&sample);
        Counters::bump(&self.counters.samples);
        if dropped > 0 {
            Counters::add(&self.counters.points_dropped, dropped as u64);
            debug!(
                "Dropped {} out-of-order points from device {}",
                dropped, sample.device_index
            );
        }
        trace!(
            "Recorded sample device={} t={}",
            sample.device_index,
            sample.timestamp_ms
        );

        if *phase == SupervisorStatus::Starting {
            *phase = SupervisorStatus::Running;
            self.breaker.lock().record_success();
            self.publish(SupervisorStatus::Running);
            info!(
                "Collector streaming (first sample from device {})",
                sample.device_index
            );
        }
    }

    /// Applies worker events until the worker fails or the generation moves on.
    async fn pump(&self, generation: u64, events: &mut EventReceiver) -> Option<WorkerFailure> {
        loop {
            let event = tokio::select! {
                event = events.recv() => event?,
                _ = superseded(self.generation.subscribe(), generation) => return None,
            };

            match event {
                WorkerEvent::Sample(sample) => self.on_sample(generation, sample),
                WorkerEvent::Heartbeat => Counters::bump(&self.counters.heartbeats),
                WorkerEvent::Malformed(e) => {
                    Counters::bump(&self.counters.malformed);
                    trace!("Ignoring {}", e);
                }
                WorkerEvent::Failure(failure) => return Some(failure),
            }
        }
    }

    async fn handle_failure(
        &self,
        generation: u64,
        failure: WorkerFailure,
    ) -> Option<(u64, Duration)> {
        let mut worker = self.worker.lock().await;
        if self.generation() != generation {
            debug!("Ignoring failure from superseded collector: {}", failure);
            return None;
        }

        warn!("Collector failure: {}", failure);
        self.retire_worker(&mut worker).await;
        self.note_failure(&failure);

        let decision = self.breaker.lock().record_failure();
        match decision {
            BreakerDecision::Retry { attempt, delay } => {
                let next = self.advance(SupervisorStatus::Degraded);
                warn!("Respawning collector in {:?} (attempt {})", delay, attempt);
                Some((next, delay))
            }
            BreakerDecision::Open => {
                self.advance(SupervisorStatus::BreakerOpen);
                error!("Circuit breaker open: collector disabled until reset");
                None
            }
        }
    }

    async fn backoff(&self, generation: u64, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = superseded(self.generation.subscribe(), generation) => false,
        }
    }

    async fn respawn(&self, generation: u64) -> Respawn {
        let mut worker = self.worker.lock().await;
        if self.generation() != generation {
            return Respawn::Superseded;
        }

        // Device indices are only stable for one collector lifetime.
        self.store.clear();
        self.set_phase(SupervisorStatus::Starting);

        match self.launch().await {
            Ok((handle, events)) => {
                Counters::bump(&self.counters.restarts);
                info!("Collector respawned (pid {:?})", handle.pid());
                *worker = Some(handle);
                Respawn::Launched(events)
            }
            Err(e) => {
                warn!("Collector respawn failed: {}", e);
                Respawn::Failed(WorkerFailure::Spawn(e.to_string()))
            }
        }
    }

    /// Owns one started run: pumps events, and on failure backs off and
    /// respawns until stopped or the breaker opens.
    async fn drive(self: Arc<Self>, mut generation: u64, mut events: EventReceiver) {
        loop {
            let failure = match self.pump(generation, &mut events).await {
                Some(failure) => failure,
                None => break,
            };

            let (next, mut delay) = match self.handle_failure(generation, failure).await {
                Some(retry) => retry,
                None => break,
            };
            generation = next;

            events = loop {
                if !self.backoff(generation, delay).await {
                    return;
                }
                match self.respawn(generation).await {
                    Respawn::Launched(events) => break events,
                    Respawn::Superseded => return,
                    Respawn::Failed(failure) => {
                        match self.handle_failure(generation, failure).await {
                            Some((next, next_delay)) => {
                                generation = next;
                                delay = next_delay;
                            }
                            None => return,
                        }
                    }
                }
            };
        }
        debug!("Supervisor run (generation {}) finished", generation);
    }
}

async fn superseded(mut generation_rx: watch::Receiver<u64>, generation: u64) {
    let _ = generation_rx.wait_for(|current| *current != generation).await;
}

/// Keeps one collector running and its metrics available.
///
/// Owned by the application, usually behind an `Arc`. Dropping it abandons
/// any pending respawn and releases the current collector.
pub struct TelemetrySupervisor {
    inner: Arc<Inner>,
}

impl TelemetrySupervisor {
    pub fn new(config: TelemetryConfig, launcher: Arc<dyn CollectorLauncher>) -> GpumonResult<Self> {
        config.validate()?;

        let (status_tx, _) = watch::channel(SupervisorStatus::Stopped);
        let (generation, _) = watch::channel(0);

        Ok(Self {
            inner: Arc::new(Inner {
                store: Arc::new(TimeSeriesStore::new(config.history_capacity)),
                breaker: Mutex::new(CircuitBreaker::new(config.breaker.clone())),
                interval_ms: AtomicU64::new(config.default_interval_ms),
                config,
                launcher,
                phase: RwLock::new(SupervisorStatus::Stopped),
                status_tx,
                generation,
                worker: tokio::sync::Mutex::new(None),
                worker_info: RwLock::new(None),
                counters: Counters::default(),
                last_failure: Mutex::new(None),
                started_at: Instant::now(),
            }),
        })
    }

    /// Supervisor over `config.collector_command`.
    pub fn with_command_launcher(config: TelemetryConfig) -> GpumonResult<Self> {
        let launcher = Arc::new(CommandLauncher::from_config(&config));
        Self::new(config, launcher)
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.inner.config
    }

    /// Launches the collector at `interval_ms`.
    ///
    /// A no-op while a collector is running or a respawn is pending. A
    /// failed launch counts against the breaker and leaves the supervisor
    /// stopped.
    pub async fn start(&self, interval_ms: u64) -> GpumonResult<()> {
        let inner = &self.inner;
        let mut worker = inner.worker.lock().await;

        if inner.breaker.lock().is_open() {
            warn!("Refusing to start collector: circuit breaker open");
            return Err(GpumonError::BreakerOpen);
        }

        let phase = inner.phase();
        if phase.is_active() {
            debug!("Start ignored, supervisor already {}", phase);
            return Ok(());
        }

        inner.config.check_interval(interval_ms)?;
        inner.interval_ms.store(interval_ms, Ordering::Relaxed);
        inner.store.clear();
        let generation = inner.advance(SupervisorStatus::Starting);

        info!(
            "Starting collector {} at {}ms",
            inner.launcher.describe(),
            interval_ms
        );

        match inner.launch().await {
            Ok((handle, events)) => {
                *worker = Some(handle);
                tokio::spawn(inner.clone().drive(generation, events));
                Ok(())
            }
            Err(e) => {
                error!("Collector launch failed: {}", e);
                inner.note_failure(&WorkerFailure::Spawn(e.to_string()));
                let decision = inner.breaker.lock().record_failure();
                if decision == BreakerDecision::Open {
                    inner.advance(SupervisorStatus::BreakerOpen);
                } else {
                    inner.advance(SupervisorStatus::Stopped);
                }
                Err(e)
            }
        }
    }

    pub async fn start_default(&self) -> GpumonResult<()> {
        self.start(self.inner.config.default_interval_ms).await
    }

    /// Terminates the collector and cancels any pending respawn. Breaker
    /// state and history are kept.
    pub async fn stop(&self) {
        let inner = &self.inner;
        let mut worker = inner.worker.lock().await;

        if !inner.phase().is_active() && worker.is_none() {
            debug!("Stop ignored, supervisor {}", self.status());
            return;
        }

        inner.advance(SupervisorStatus::Stopped);
        inner.retire_worker(&mut worker).await;
        info!("Collector supervisor stopped");
    }

    /// Closes the breaker. Only valid while no collector is running or
    /// pending.
    pub async fn reset_breaker(&self) -> GpumonResult<()> {
        let inner = &self.inner;
        let worker = inner.worker.lock().await;

        if worker.is_some() || inner.phase().is_active() {
            return Err(GpumonError::InvalidState(format!(
                "cannot reset breaker while supervisor is {}",
                inner.phase()
            )));
        }

        inner.breaker.lock().reset();
        inner.advance(SupervisorStatus::Stopped);
        info!("Circuit breaker reset");
        Ok(())
    }

    pub fn status(&self) -> SupervisorStatus {
        *self.inner.status_tx.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SupervisorStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn interval_ms(&self) -> u64 {
        self.inner.interval_ms.load(Ordering::Relaxed)
    }

    pub fn worker_pid(&self) -> Option<u32> {
        (*self.inner.worker_info.read()).and_then(|info| info.pid)
    }

    pub fn device_count(&self) -> usize {
        self.inner.store.device_count()
    }

    pub fn device_indices(&self) -> Vec<u32> {
        self.inner.store.device_indices()
    }

    pub fn latest_snapshot(&self, device_index: u32) -> Option<MetricSample> {
        self.inner.store.latest_snapshot(device_index)
    }

    pub fn history(&self, device_index: u32, key: MetricKey) -> Vec<SeriesPoint> {
        self.inner.store.history(device_index, key)
    }

    pub fn stats(&self) -> SupervisorStats {
        let inner = &self.inner;
        let (breaker_state, consecutive_failures, failures_in_window) = {
            let breaker = inner.breaker.lock();
            (
                breaker.state(),
                breaker.consecutive_failures(),
                breaker.failures_in_window(),
            )
        };
        let worker = *inner.worker_info.read();
        let last_failure = inner.last_failure.lock().clone();
        let counters = &inner.counters;

        SupervisorStats {
            status: self.status(),
            breaker_state,
            consecutive_failures,
            failures_in_window,
            interval_ms: self.interval_ms(),
            devices: inner.store.device_count(),
            total_spawns: Counters::get(&counters.spawns),
            total_restarts: Counters::get(&counters.restarts),
            samples_recorded: Counters::get(&counters.samples),
            points_dropped: Counters::get(&counters.points_dropped),
            heartbeats: Counters::get(&counters.heartbeats),
            malformed_lines: Counters::get(&counters.malformed),
            total_failures: Counters::get(&counters.failures),
            worker_pid: worker.and_then(|w| w.pid),
            worker_uptime_secs: worker.map(|w| w.started_at.elapsed().as_secs()),
            last_failure: last_failure.as_ref().map(|f| f.reason.clone()),
            last_failure_at: last_failure.map(|f| f.at),
            uptime_secs: inner.started_at.elapsed().as_secs(),
        }
    }
}

impl Drop for TelemetrySupervisor {
    fn drop(&mut self) {
        self.inner.generation.send_modify(|generation| *generation += 1);
        if let Ok(mut worker) = self.inner.worker.try_lock() {
            *worker = None;
        }
    }
}
