use super::commands::OutputFormat;
use super::utils::{format_sample, is_json, print_json};
use gpumon_telemetry::codec::{decode_line, read_frame, CollectorMessage, Frame};
use gpumon_types::{GpumonError, GpumonResult};
use serde_json::json;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::debug;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct DecodeSummary {
    pub samples: u64,
    pub heartbeats: u64,
    pub malformed: u64,
}

pub async fn decode_stdin(strict: bool, format: &OutputFormat) -> GpumonResult<()> {
    let mut reader = BufReader::new(tokio::io::stdin());
    let summary = decode_stream(&mut reader, format).await?;

    eprintln!(
        "{} samples, {} heartbeats, {} malformed",
        summary.samples, summary.heartbeats, summary.malformed
    );

    if strict && summary.malformed > 0 {
        return Err(GpumonError::InvalidState(format!(
            "{} malformed line(s)",
            summary.malformed
        )));
    }
    Ok(())
}

pub async fn decode_stream<R>(reader: &mut R, format: &OutputFormat) -> GpumonResult<DecodeSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = DecodeSummary::default();
    let mut buf = Vec::new();
    let mut line_no = 0u64;

    loop {
        let line = match read_frame(reader, &mut buf).await? {
            Frame::Line(line) => line,
            Frame::Partial(line) => {
                debug!("Input ends without newline");
                line
            }
            Frame::Eof => break,
        };
        line_no += 1;

        match decode_line(&line) {
            Ok(CollectorMessage::Sample(sample)) => {
                summary.samples += 1;
                if is_json(format) {
                    print_json(&json!({ "line": line_no, "sample": sample }))?;
                } else {
                    println!("{:>5}  {}  t={}", line_no, format_sample(&sample), sample.timestamp_ms);
                }
            }
            Ok(CollectorMessage::Heartbeat { timestamp_ms }) => {
                summary.heartbeats += 1;
                if is_json(format) {
                    print_json(&json!({ "line": line_no, "heartbeat": timestamp_ms }))?;
                } else {
                    println!("{:>5}  heartbeat {:?}", line_no, timestamp_ms);
                }
            }
            Err(e) => {
                summary.malformed += 1;
                if is_json(format) {
                    print_json(&json!({ "line": line_no, "error": e.to_string() }))?;
                } else {
                    println!("{:>5}  {}", line_no, e);
                }
            }
        }
    }

    Ok(summary)
}
