use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Vendor {
    Nvidia,
    Amd,
    Intel,
    #[default]
    Unknown,
}

impl Vendor {
    /// Never fails: anything unrecognised is `Unknown`.
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_ascii_uppercase().as_str() {
            "NVIDIA" => Vendor::Nvidia,
            "AMD" | "ATI" => Vendor::Amd,
            "INTEL" => Vendor::Intel,
            _ => Vendor::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::Nvidia => "NVIDIA",
            Vendor::Amd => "AMD",
            Vendor::Intel => "INTEL",
            Vendor::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKey {
    UsagePercent,
    TempC,
    PowerW,
    PowerLimitW,
    MemUsedMb,
    MemTotalMb,
    MemPercent,
    ClockCoreMhz,
    ClockMemMhz,
    FanPercent,
    FanRpm,
    EncoderUtil,
    DecoderUtil,
    MemControllerUtil,
}

impl MetricKey {
    pub const ALL: [MetricKey; 14] = [
        MetricKey::UsagePercent,
        MetricKey::TempC,
        MetricKey::PowerW,
        MetricKey::PowerLimitW,
        MetricKey::MemUsedMb,
        MetricKey::MemTotalMb,
        MetricKey::MemPercent,
        MetricKey::ClockCoreMhz,
        MetricKey::ClockMemMhz,
        MetricKey::FanPercent,
        MetricKey::FanRpm,
        MetricKey::EncoderUtil,
        MetricKey::DecoderUtil,
        MetricKey::MemControllerUtil,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKey::UsagePercent => "usage_percent",
            MetricKey::TempC => "temp_c",
            MetricKey::PowerW => "power_w",
            MetricKey::PowerLimitW => "power_limit_w",
            MetricKey::MemUsedMb => "mem_used_mb",
            MetricKey::MemTotalMb => "mem_total_mb",
            MetricKey::MemPercent => "mem_percent",
            MetricKey::ClockCoreMhz => "clock_core_mhz",
            MetricKey::ClockMemMhz => "clock_mem_mhz",
            MetricKey::FanPercent => "fan_percent",
            MetricKey::FanRpm => "fan_rpm",
            MetricKey::EncoderUtil => "encoder_util",
            MetricKey::DecoderUtil => "decoder_util",
            MetricKey::MemControllerUtil => "mem_controller_util",
        }
    }

    pub fn is_percent(&self) -> bool {
        matches!(
            self,
            MetricKey::UsagePercent
                | MetricKey::MemPercent
                | MetricKey::FanPercent
                | MetricKey::EncoderUtil
                | MetricKey::DecoderUtil
                | MetricKey::MemControllerUtil
        )
    }

    /// Inclusive physical range a reported value must fall in.
    pub fn valid_range(&self) -> (f64, f64) {
        if self.is_percent() {
            return (0.0, 100.0);
        }
        match self {
            MetricKey::TempC => (-273.15, 1000.0),
            _ => (0.0, f64::MAX),
        }
    }

    pub fn accepts(&self, value: f64) -> bool {
        let (min, max) = self.valid_range();
        value.is_finite() && value >= min && value <= max
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMetricKey(pub String);

impl fmt::Display for UnknownMetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown metric key '{}'", self.0)
    }
}

impl std::error::Error for UnknownMetricKey {}

impl FromStr for MetricKey {
    type Err = UnknownMetricKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricKey::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| UnknownMetricKey(s.to_string()))
    }
}

/// One timestamped set of metric values for one device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub device_index: u32,
    pub vendor: Vendor,
    pub name: String,
    pub fields: BTreeMap<MetricKey, f64>,
    pub timestamp_ms: u64,
}

impl MetricSample {
    pub fn new(device_index: u32, vendor: Vendor, name: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            device_index,
            vendor,
            name: name.into(),
            fields: BTreeMap::new(),
            timestamp_ms,
        }
    }

    pub fn with_field(mut self, key: MetricKey, value: f64) -> Self {
        self.fields.insert(key, value);
        self
    }

    pub fn field(&self, key: MetricKey) -> Option<f64> {
        self.fields.get(&key).copied()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp_ms: u64,
    pub value: f64,
}

impl SeriesPoint {
    pub fn new(timestamp_ms: u64, value: f64) -> Self {
        Self { timestamp_ms, value }
    }
}

impl From<(u64, f64)> for SeriesPoint {
    fn from((timestamp_ms, value): (u64, f64)) -> Self {
        Self { timestamp_ms, value }
    }
}
