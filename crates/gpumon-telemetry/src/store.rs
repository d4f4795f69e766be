use gpumon_types::{MetricKey, MetricSample, SeriesPoint};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use tracing::debug;

/// Fixed-capacity FIFO history for one (device, metric) pair.
#[derive(Clone, Debug)]
pub struct TimeSeriesBuffer {
    points: VecDeque<SeriesPoint>,
    capacity: usize,
}

impl TimeSeriesBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns false when the point is older than the newest one held.
    pub fn push(&mut self, point: SeriesPoint) -> bool {
        if let Some(last) = self.points.back() {
            if point.timestamp_ms < last.timestamp_ms {
                return false;
            }
        }

        if self.points.len() >= self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
        true
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub fn to_vec(&self) -> Vec<SeriesPoint> {
        self.points.iter().copied().collect()
    }
}

#[derive(Default)]
struct StoreInner {
    series: HashMap<(u32, MetricKey), TimeSeriesBuffer>,
    latest: BTreeMap<u32, MetricSample>,
    devices: BTreeSet<u32>,
}

pub struct TimeSeriesStore {
    capacity: usize,
    inner: RwLock<StoreInner>,
}

impl TimeSeriesStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(StoreInner::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends every field of `sample` and replaces the device snapshot.
    /// Returns the number of points dropped for arriving out of order.
    pub fn record(&self, sample: &MetricSample) -> usize {
        let mut inner = self.inner.write();
        let mut dropped = 0;

        for (&key, &value) in &sample.fields {
            let buffer = inner
                .series
                .entry((sample.device_index, key))
                .or_insert_with(|| TimeSeriesBuffer::new(self.capacity));
            if !buffer.push(SeriesPoint::new(sample.timestamp_ms, value)) {
                dropped += 1;
            }
        }

        if dropped > 0 {
            debug!(
                "Dropped {} out-of-order point(s) for device {} at t={}",
                dropped, sample.device_index, sample.timestamp_ms
            );
        }

        inner.devices.insert(sample.device_index);
        inner.latest.insert(sample.device_index, sample.clone());
        dropped
    }

    pub fn history(&self, device_index: u32, key: MetricKey) -> Vec<SeriesPoint> {
        self.inner
            .read()
            .series
            .get(&(device_index, key))
            .map(TimeSeriesBuffer::to_vec)
            .unwrap_or_default()
    }

    pub fn latest_snapshot(&self, device_index: u32) -> Option<MetricSample> {
        self.inner.read().latest.get(&device_index).cloned()
    }

    pub fn device_count(&self) -> usize {
        self.inner.read().devices.len()
    }

    pub fn device_indices(&self) -> Vec<u32> {
        self.inner.read().devices.iter().copied().collect()
    }

    /// Metrics with at least one retained point for the device.
    pub fn metrics_for(&self, device_index: u32) -> Vec<MetricKey> {
        let inner = self.inner.read();
        let mut keys: Vec<MetricKey> = inner
            .series
            .iter()
            .filter(|((device, _), buffer)| *device == device_index && !buffer.is_empty())
            .map(|((_, key), _)| *key)
            .collect();
        keys.sort();
        keys
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        for buffer in inner.series.values_mut() {
            buffer.clear();
        }
        inner.latest.clear();
        inner.devices.clear();
    }
}

impl Default for TimeSeriesStore {
    fn default() -> Self {
        Self::new(gpumon_types::DEFAULT_HISTORY_CAPACITY)
    }
}
