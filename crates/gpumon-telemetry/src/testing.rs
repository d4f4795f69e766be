//! In-memory collectors for exercising workers and the supervisor.

use crate::codec::decode_start_command;
use crate::worker::{CollectorLauncher, CollectorProcess, LaunchedCollector};
use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::{mpsc, watch};

type ExitCell = watch::Sender<Option<Option<i32>>>;

pub struct FakeLauncher {
    attempts: AtomicUsize,
    launched: AtomicUsize,
    failing: AtomicBool,
    ignore_stdin_close: bool,
    collectors_tx: mpsc::UnboundedSender<FakeCollector>,
    collectors_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<FakeCollector>>,
    kills: Arc<AtomicUsize>,
}

impl FakeLauncher {
    pub fn new() -> Arc<Self> {
        Self::build(false)
    }

    /// Collectors that keep running after stdin closes, forcing a kill.
    pub fn stubborn() -> Arc<Self> {
        Self::build(true)
    }

    fn build(ignore_stdin_close: bool) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            attempts: AtomicUsize::new(0),
            launched: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            ignore_stdin_close,
            collectors_tx: tx,
            collectors_rx: tokio::sync::Mutex::new(rx),
            kills: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn spawn_count(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    /// Next collector that has received its start command.
    pub async fn next_collector(&self) -> FakeCollector {
        let mut rx = self.collectors_rx.lock().await;
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no collector launched in time")
            .expect("launcher closed")
    }
}

impl CollectorLauncher for FakeLauncher {
    fn launch(&self) -> io::Result<LaunchedCollector> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such collector"));
        }
        let pid = self.launched.fetch_add(1, Ordering::SeqCst) as u32 + 1000;

        let (worker_stdin, collector_stdin) = tokio::io::duplex(4096);
        let (collector_stdout, worker_stdout) = tokio::io::duplex(64 * 1024);
        let (exit_tx, exit_rx) = watch::channel(None);
        let exit_tx = Arc::new(exit_tx);

        let process = FakeProcess {
            pid,
            exit_tx: exit_tx.clone(),
            exit_rx,
            kills: self.kills.clone(),
        };

        let collectors = self.collectors_tx.clone();
        let ignore_stdin_close = self.ignore_stdin_close;
        tokio::spawn(async move {
            let mut stdin = BufReader::new(collector_stdin);
            let mut line = String::new();
            if stdin.read_line(&mut line).await.unwrap_or(0) == 0 {
                return;
            }
            let interval_ms = decode_start_command(&line).unwrap_or(0);

            let _ = collectors.send(FakeCollector {
                pid,
                interval_ms,
                stdout: Some(collector_stdout),
                exit: exit_tx.clone(),
            });

            loop {
                line.clear();
                match stdin.read_line(&mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
            if !ignore_stdin_close {
                exit_tx.send_if_modified(|state| {
                    if state.is_none() {
                        *state = Some(Some(0));
                        true
                    } else {
                        false
                    }
                });
            }
        });

        Ok(LaunchedCollector {
            stdin: Box::new(worker_stdin),
            stdout: Box::new(worker_stdout),
            process: Box::new(process),
        })
    }

    fn describe(&self) -> String {
        "fake-collector".into()
    }
}

struct FakeProcess {
    pid: u32,
    exit_tx: Arc<ExitCell>,
    exit_rx: watch::Receiver<Option<Option<i32>>>,
    kills: Arc<AtomicUsize>,
}

#[async_trait]
impl CollectorProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn wait(&mut self) -> io::Result<Option<i32>> {
        loop {
            if let Some(code) = *self.exit_rx.borrow_and_update() {
                return Ok(code);
            }
            if self.exit_rx.changed().await.is_err() {
                return Ok(None);
            }
        }
    }

    fn start_kill(&mut self) -> io::Result<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        self.exit_tx.send_if_modified(|state| {
            if state.is_none() {
                *state = Some(None);
                true
            } else {
                false
            }
        });
        Ok(())
    }
}

/// Test-side end of one fake collector.
pub struct FakeCollector {
    pub pid: u32,
    pub interval_ms: u64,
    stdout: Option<DuplexStream>,
    exit: Arc<ExitCell>,
}

impl FakeCollector {
    pub async fn send_line(&mut self, line: &str) {
        if let Some(stdout) = self.stdout.as_mut() {
            let mut bytes = line.as_bytes().to_vec();
            bytes.push(b'\n');
            let _ = stdout.write_all(&bytes).await;
        }
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        if let Some(stdout) = self.stdout.as_mut() {
            let _ = stdout.write_all(bytes).await;
        }
    }

    pub fn close_stdout(&mut self) {
        self.stdout = None;
    }

    pub fn exit(&self, code: i32) {
        let _ = self.exit.send(Some(Some(code)));
    }

    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }
}

pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
