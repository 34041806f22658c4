//! Record rendering and the shared stdout writer.

use crate::collector::ProbeCache;
use crate::hosts::{HostConfig, OutputMode};
use chrono::{DateTime, Local};
use probe::ProbeType;
use serde_json::{Map, Value};
use std::net::IpAddr;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// `ctime(3)` layout used for plaintext time lines
const CTIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Renders a host's cached results as one output record
#[derive(Debug, Clone)]
pub struct OutputFormatter {
    mode: OutputMode,
    name: String,
    address: IpAddr,
    include_timestamp: bool,
}

impl OutputFormatter {
    pub fn new(mode: OutputMode, name: impl Into<String>, address: IpAddr, include_timestamp: bool) -> Self {
        Self {
            mode,
            name: name.into(),
            address,
            include_timestamp,
        }
    }

    pub fn for_host(config: &HostConfig) -> Self {
        Self::new(
            config.output_mode(),
            config.display_name.clone(),
            config.address,
            config.include_timestamp(),
        )
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Render every non-absent entry of `cache`. The result always ends in a
    /// newline so it can be written as-is.
    pub fn render(&self, cache: &ProbeCache, now: DateTime<Local>) -> String {
        match self.mode {
            OutputMode::Plaintext => self.render_plaintext(cache, now),
            OutputMode::Structured => self.render_structured(cache, now),
        }
    }

    fn header(&self) -> String {
        let address = self.address.to_string();
        if address == self.name {
            address
        } else {
            format!("{} {}", self.name, address)
        }
    }

    fn render_plaintext(&self, cache: &ProbeCache, now: DateTime<Local>) -> String {
        let mut lines = vec![self.header()];
        if self.include_timestamp {
            lines.push(now.format(CTIME_FORMAT).to_string());
        }
        for probe in ProbeType::ALL {
            if let Some(result) = cache.get(&probe).filter(|r| !r.is_absent()) {
                lines.push(result.to_string());
            }
        }

        let mut record = lines.join("\n");
        record.push('\n');
        record
    }

    fn render_structured(&self, cache: &ProbeCache, now: DateTime<Local>) -> String {
        let mut object = Map::new();
        object.insert("addr".into(), Value::from(self.address.to_string()));
        object.insert("name".into(), Value::from(self.name.clone()));
        if self.include_timestamp {
            let millis = now.timestamp_micros() as f64 / 1000.0;
            object.insert("timestamp".into(), Value::from(millis));
        }
        for probe in ProbeType::ALL {
            if let Some(value) = cache.get(&probe).and_then(|r| r.to_json()) {
                object.insert(probe.field_name().into(), value);
            }
        }

        let mut record = Value::Object(object).to_string();
        record.push('\n');
        record
    }
}

/// Serialises records from every collector onto one stream.
///
/// Each record is written with a single `write_all` followed by a flush, so
/// records from different hosts never interleave.
pub struct OutputWriter<W> {
    records: mpsc::Receiver<String>,
    sink: W,
}

impl<W: AsyncWrite + Unpin> OutputWriter<W> {
    pub fn new(records: mpsc::Receiver<String>, sink: W) -> Self {
        Self { records, sink }
    }

    /// Run until every sender is dropped, then flush and return the sink.
    pub async fn run(mut self) -> common::Result<W> {
        info!("Output writer started");
        let mut written = 0u64;

        while let Some(record) = self.records.recv().await {
            self.sink.write_all(record.as_bytes()).await?;
            self.sink.flush().await?;
            written += 1;
        }

        self.sink.flush().await?;
        debug!(records = written, "Output writer drained");
        Ok(self.sink)
    }
}
