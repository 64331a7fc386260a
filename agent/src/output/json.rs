//! JSON output
//!
//! Admitted events are streamed as JSON lines; the end-of-session summary is
//! written as a single pretty-printed document.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

use crate::collector::syscall::TraceSummary;

/// Writes one JSON document per line
pub struct JsonLinesWriter<W: Write> {
    writer: W,
    written: u64,
}

impl<W: Write> JsonLinesWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    pub fn write<T: Serialize>(&mut self, value: &T) -> Result<()> {
        serde_json::to_writer(&mut self.writer, value).context("Failed to serialize event")?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush JSON output")
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Generate JSON output from a trace summary
pub fn generate_summary_json(summary: &TraceSummary, output_path: &Path) -> Result<()> {
    info!("Generating JSON summary: {}", output_path.display());

    let file = File::create(output_path)
        .with_context(|| format!("Failed to create output file: {}", output_path.display()))?;

    let writer = BufWriter::new(file);

    serde_json::to_writer_pretty(writer, summary)
        .context("Failed to serialize summary to JSON")?;

    info!("JSON summary written to {}", output_path.display());

    Ok(())
}
