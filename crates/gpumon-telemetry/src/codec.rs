//! Line protocol spoken with the collector process.
//!
//! Collector → supervisor, one message per line, `|`-delimited:
//!
//! ```text
//! <device_index>|<vendor>|<name>|<key>=<value>|...|<timestamp_ms>
//! HEARTBEAT[|<timestamp_ms>]
//! ```
//!
//! Supervisor → collector: a single line holding the sampling interval in
//! milliseconds, written once right after spawn.

use gpumon_types::{MetricKey, MetricSample, Vendor, FIELD_DELIMITER, HEARTBEAT_MARKER};
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::trace;

#[derive(Clone, Debug, PartialEq)]
pub enum CollectorMessage {
    Sample(MetricSample),
    Heartbeat { timestamp_ms: Option<u64> },
}

#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed line: {0}")]
    Malformed(String),
}

fn malformed(reason: impl Into<String>) -> DecodeError {
    DecodeError::Malformed(reason.into())
}

pub fn decode_line(line: &str) -> Result<CollectorMessage, DecodeError> {
    let line = line.trim_end_matches(['\n', '\r']);
    if line.trim().is_empty() {
        return Err(malformed("empty line"));
    }

    let parts: Vec<&str> = line.split(FIELD_DELIMITER).collect();

    if parts[0].trim() == HEARTBEAT_MARKER {
        return match parts.len() {
            1 => Ok(CollectorMessage::Heartbeat { timestamp_ms: None }),
            2 => Ok(CollectorMessage::Heartbeat {
                timestamp_ms: Some(parse_timestamp(parts[1])?),
            }),
            n => Err(malformed(format!("heartbeat with {} fields", n))),
        };
    }

    if parts.len() < 4 {
        return Err(malformed(format!(
            "expected at least 4 fields, got {}",
            parts.len()
        )));
    }

    let device_index = parts[0]
        .trim()
        .parse::<u32>()
        .map_err(|_| malformed(format!("bad device index '{}'", parts[0])))?;
    let vendor = Vendor::from_token(parts[1]);
    let name = parts[2].trim().to_string();
    let timestamp_ms = parse_timestamp(parts[parts.len() - 1])?;

    let mut fields = BTreeMap::new();
    for field in &parts[3..parts.len() - 1] {
        let (raw_key, raw_value) = field
            .split_once('=')
            .ok_or_else(|| malformed(format!("field '{}' is not key=value", field)))?;

        let value: f64 = raw_value
            .trim()
            .parse()
            .map_err(|_| malformed(format!("non-numeric value '{}'", raw_value)))?;
        if !value.is_finite() {
            return Err(malformed(format!("non-finite value in '{}'", field)));
        }

        let key = match raw_key.trim().parse::<MetricKey>() {
            Ok(key) => key,
            Err(unknown) => {
                trace!("Skipping {}", unknown);
                continue;
            }
        };

        if !key.accepts(value) {
            return Err(malformed(format!("{}={} out of range", key, value)));
        }

        if fields.insert(key, value).is_some() {
            return Err(malformed(format!("duplicate field {}", key)));
        }
    }

    Ok(CollectorMessage::Sample(MetricSample {
        device_index,
        vendor,
        name,
        fields,
        timestamp_ms,
    }))
}

fn parse_timestamp(raw: &str) -> Result<u64, DecodeError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| malformed(format!("bad timestamp '{}'", raw)))
}

pub fn encode_start_command(interval_ms: u64) -> Vec<u8> {
    format!("{}\n", interval_ms).into_bytes()
}

pub fn decode_start_command(line: &str) -> Result<u64, DecodeError> {
    let trimmed = line.trim();
    match trimmed.parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(ms),
        _ => Err(malformed(format!("bad start command '{}'", trimmed))),
    }
}

/// Collector-side encoding, without the trailing newline.
pub fn encode_sample(sample: &MetricSample) -> String {
    let mut parts = Vec::with_capacity(sample.fields.len() + 4);
    parts.push(sample.device_index.to_string());
    parts.push(sample.vendor.as_str().to_string());
    parts.push(sanitize_name(&sample.name));
    for (key, value) in &sample.fields {
        parts.push(format!("{}={}", key, value));
    }
    parts.push(sample.timestamp_ms.to_string());
    parts.join(&FIELD_DELIMITER.to_string())
}

pub fn encode_heartbeat(timestamp_ms: Option<u64>) -> String {
    match timestamp_ms {
        Some(ts) => format!("{}{}{}", HEARTBEAT_MARKER, FIELD_DELIMITER, ts),
        None => HEARTBEAT_MARKER.to_string(),
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            FIELD_DELIMITER => '/',
            '\n' | '\r' => ' ',
            other => other,
        })
        .collect()
}

#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    Line(String),
    /// Bytes left at EOF without a terminating newline.
    Partial(String),
    Eof,
}

/// Reads up to and including the next `\n`.
pub async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let read = reader.read_until(b'\n', buf).await?;
    if read == 0 {
        return Ok(Frame::Eof);
    }

    let text = String::from_utf8_lossy(buf);
    if buf.last() == Some(&b'\n') {
        Ok(Frame::Line(text.trim_end_matches(['\n', '\r']).to_string()))
    } else {
        Ok(Frame::Partial(text.into_owned()))
    }
}
