//! FileSink - appends records to a JSON lines file

use contracts::{AggregateRecord, CompletionSink, ContractError};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::{debug, error, instrument};

/// Configuration for FileSink
#[derive(Debug, Clone)]
pub struct FileSinkConfig {
    /// Output file
    pub path: PathBuf,
    /// Append to an existing file instead of truncating it
    pub append: bool,
}

impl FileSinkConfig {
    /// `path` is required, `append` defaults to true
    pub fn from_params(params: &HashMap<String, String>) -> std::io::Result<Self> {
        let path = params.get("path").map(PathBuf::from).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "missing 'path' param")
        })?;
        let append = params
            .get("append")
            .map(|v| !matches!(v.as_str(), "false" | "0" | "no"))
            .unwrap_or(true);

        Ok(Self { path, append })
    }
}

/// Sink that writes one JSON object per line
pub struct FileSink {
    name: String,
    config: FileSinkConfig,
    writer: BufWriter<File>,
}

impl FileSink {
    pub fn new(name: impl Into<String>, config: FileSinkConfig) -> std::io::Result<Self> {
        if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(config.append)
            .truncate(!config.append)
            .open(&config.path)?;

        Ok(Self {
            name: name.into(),
            config,
            writer: BufWriter::new(file),
        })
    }

    /// Create from params map (for factory)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> std::io::Result<Self> {
        Self::new(name, FileSinkConfig::from_params(params)?)
    }

    fn append_line(&mut self, record: &AggregateRecord) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.writer, record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        self.writer.write_all(b"\n")
    }

    fn persist(&mut self, record: &AggregateRecord) -> Result<(), ContractError> {
        self.append_line(record).map_err(|e| {
            error!(sink = %self.name, path = %self.config.path.display(), error = %e, "Write failed");
            ContractError::sink_write(&self.name, e.to_string())
        })
    }
}

impl CompletionSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "file_sink_write",
        skip(self, record),
        fields(sink = %self.name)
    )]
    async fn write(&mut self, record: &AggregateRecord) -> Result<(), ContractError> {
        self.persist(record)
    }

    #[instrument(name = "file_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        self.writer
            .flush()
            .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))
    }

    #[instrument(name = "file_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        self.flush().await?;
        debug!(sink = %self.name, path = %self.config.path.display(), "FileSink closed");
        Ok(())
    }
}
