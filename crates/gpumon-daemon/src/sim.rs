//! Synthetic collector speaking the gpumon line protocol.
//!
//! Used by `gpumon-sim` for demos and end-to-end tests of the supervisor.
//! Values follow a bounded random walk; nothing here touches real hardware.

use gpumon_telemetry::{decode_start_command, encode_heartbeat, encode_sample};
use gpumon_types::{MetricKey, MetricSample, Vendor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

/// Emitted by `--garbage-every`; never decodes.
pub const GARBAGE_LINE: &str = "#garbage: not a telemetry line";

#[derive(Clone, Debug)]
pub struct SimOptions {
    pub devices: u32,
    pub vendor: Vendor,
    pub name: Option<String>,
    /// Exit after this many ticks.
    pub crash_after: Option<u64>,
    pub exit_code: i32,
    pub heartbeat_every: Option<u64>,
    pub garbage_every: Option<u64>,
    pub seed: Option<u64>,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            devices: 1,
            vendor: Vendor::Nvidia,
            name: None,
            crash_after: None,
            exit_code: 1,
            heartbeat_every: None,
            garbage_every: None,
            seed: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimOutcome {
    StdinClosed,
    Crashed { exit_code: i32 },
}

struct SimDevice {
    index: u32,
    vendor: Vendor,
    name: String,
    usage: f64,
    temp: f64,
    mem_used: f64,
    mem_total: f64,
    power_limit: f64,
}

impl SimDevice {
    fn new(index: u32, vendor: Vendor, name: Option<&str>, rng: &mut StdRng) -> Self {
        let (default_name, mem_total, power_limit) = match vendor {
            Vendor::Nvidia => ("Simulated GeForce RTX 4080", 16_384.0, 320.0),
            Vendor::Amd => ("Simulated Radeon RX 7900 XT", 20_480.0, 300.0),
            Vendor::Intel => ("Simulated Arc A770", 16_384.0, 225.0),
            Vendor::Unknown => ("Simulated GPU", 8_192.0, 150.0),
        };

        Self {
            index,
            vendor,
            name: name.unwrap_or(default_name).to_string(),
            usage: rng.gen_range(5.0..30.0),
            temp: rng.gen_range(35.0..45.0),
            mem_used: mem_total * rng.gen_range(0.05..0.2),
            mem_total,
            power_limit,
        }
    }

    fn step(&mut self, rng: &mut StdRng, timestamp_ms: u64) -> MetricSample {
        self.usage = (self.usage + rng.gen_range(-8.0..8.0)).clamp(0.0, 100.0);
        let target_temp = 32.0 + self.usage * 0.5;
        self.temp = (self.temp + (target_temp - self.temp) * 0.2 + rng.gen_range(-0.5..0.5))
            .clamp(20.0, 95.0);
        self.mem_used = (self.mem_used + rng.gen_range(-256.0..256.0)).clamp(256.0, self.mem_total);

        let power = self.power_limit * (0.12 + 0.88 * self.usage / 100.0);
        let fan_percent = ((self.temp - 30.0) * 1.6).clamp(0.0, 100.0);

        let mut sample = MetricSample::new(self.index, self.vendor, self.name.clone(), timestamp_ms)
            .with_field(MetricKey::UsagePercent, round1(self.usage))
            .with_field(MetricKey::TempC, round1(self.temp))
            .with_field(MetricKey::PowerW, round1(power))
            .with_field(MetricKey::MemUsedMb, self.mem_used.round())
            .with_field(MetricKey::MemTotalMb, self.mem_total)
            .with_field(MetricKey::MemPercent, round1(self.mem_used / self.mem_total * 100.0))
            .with_field(MetricKey::ClockCoreMhz, (300.0 + self.usage * 22.0).round());

        // Integrated-style parts report no fan or power limit.
        if self.vendor != Vendor::Intel {
            sample = sample
                .with_field(MetricKey::PowerLimitW, self.power_limit)
                .with_field(MetricKey::FanPercent, round1(fan_percent))
                .with_field(MetricKey::FanRpm, (fan_percent * 32.0).round())
                .with_field(MetricKey::ClockMemMhz, 10_501.0);
        }

        if self.vendor == Vendor::Nvidia {
            sample = sample
                .with_field(MetricKey::EncoderUtil, round1(self.usage * 0.1))
                .with_field(MetricKey::DecoderUtil, round1(self.usage * 0.05))
                .with_field(MetricKey::MemControllerUtil, round1(self.usage * 0.6));
        }

        sample
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn every(period: Option<u64>, tick: u64) -> bool {
    matches!(period, Some(n) if n > 0 && tick % n == 0)
}

/// Waits for the start command on `input`, then streams samples to `output`
/// until `input` closes or `crash_after` ticks have passed.
pub async fn run_simulator<R, W>(
    input: R,
    mut output: W,
    options: &SimOptions,
) -> io::Result<SimOutcome>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut input = BufReader::new(input);
    let mut line = Vec::new();

    if input.read_until(b'\n', &mut line).await? == 0 {
        info!("Input closed before start command");
        return Ok(SimOutcome::StdinClosed);
    }

    let interval_ms = decode_start_command(&String::from_utf8_lossy(&line))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    debug!(
        "Simulating {} {} device(s) every {}ms",
        options.devices, options.vendor, interval_ms
    );

    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut devices: Vec<SimDevice> = (0..options.devices)
        .map(|index| SimDevice::new(index, options.vendor, options.name.as_deref(), &mut rng))
        .collect();

    let started = Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks = 0u64;

    loop {
        line.clear();
        tokio::select! {
            read = input.read_until(b'\n', &mut line) => {
                if read? == 0 {
                    info!("Input closed after {} ticks, exiting", ticks);
                    return Ok(SimOutcome::StdinClosed);
                }
                trace!("Ignoring {} bytes of input", line.len());
            }
            _ = ticker.tick() => {
                ticks += 1;
                let timestamp_ms = started.elapsed().as_millis() as u64;

                let mut batch = String::new();
                for device in &mut devices {
                    batch.push_str(&encode_sample(&device.step(&mut rng, timestamp_ms)));
                    batch.push('\n');
                }
                if every(options.heartbeat_every, ticks) {
                    batch.push_str(&encode_heartbeat(Some(timestamp_ms)));
                    batch.push('\n');
                }
                if every(options.garbage_every, ticks) {
                    batch.push_str(GARBAGE_LINE);
                    batch.push('\n');
                }

                output.write_all(batch.as_bytes()).await?;
                output.flush().await?;

                if let Some(limit) = options.crash_after {
                    if ticks >= limit {
                        warn!("Simulated crash after {} ticks", ticks);
                        return Ok(SimOutcome::Crashed { exit_code: options.exit_code });
                    }
                }
            }
        }
    }
}
