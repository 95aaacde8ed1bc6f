use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, warn};

use crate::error::{FlowError, Result};
use crate::processor::{FlowFeatures, FlowRecord, FlowSink, FlowTable};
use super::packet_json::PacketIdExporter;

/// Append-only CSV file of flow feature rows.
///
/// A new file starts with `header`; an existing one is appended to as is.
/// Every row is flushed as it is written, and again when the writer drops.
pub struct FlowCsvWriter {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows: u64,
}

impl FlowCsvWriter {
    pub fn create(path: impl AsRef<Path>, header: &str) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(FlowError::InvalidConfig("CSV output path is empty".into()));
        }
        if header.trim().is_empty() {
            return Err(FlowError::InvalidConfig("CSV header is empty".into()));
        }

        let is_new = path.metadata().map(|m| m.len() == 0).unwrap_or(true);
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        if is_new {
            writeln!(file, "{header}")?;
        }

        let writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        Ok(Self { path: path.to_path_buf(), writer, rows: 0 })
    }

    /// Writer with the standard feature header.
    pub fn with_default_header(path: impl AsRef<Path>) -> Result<Self> {
        Self::create(path, &FlowFeatures::header())
    }

    pub fn write_features(&mut self, features: &FlowFeatures) -> Result<()> {
        self.writer.serialize(features)?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn write_flow(&mut self, flow: &FlowRecord) -> Result<()> {
        self.write_features(&flow.features())
    }

    pub fn path(&self) -> &Path { &self.path }

    /// Rows written through this handle.
    pub fn rows_written(&self) -> u64 { self.rows }
}

impl Drop for FlowCsvWriter {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!(path = %self.path.display(), error = %e, "final CSV flush failed");
        }
    }
}

/// Overwrite `path` with a header and every exportable flow: finished ones
/// first, then those still active. Single-packet flows are skipped.
pub fn dump_labeled_flows<'a, F, A>(path: impl AsRef<Path>, finished: F, active: A) -> Result<usize>
where
    F: IntoIterator<Item = &'a FlowRecord>,
    A: IntoIterator<Item = &'a FlowRecord>,
{
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return Err(FlowError::InvalidConfig("CSV output path is empty".into()));
    }
    // Truncate, then reopen in append mode through the writer
    File::create(path)?;
    let mut writer = FlowCsvWriter::with_default_header(path)?;

    let mut written = 0;
    for flow in finished.into_iter().chain(active).filter(|f| f.packet_count() > 1) {
        writer.write_flow(flow)?;
        written += 1;
    }
    Ok(written)
}

/// Append the table's active flows to `path` and save their packet ids.
/// A failed id export is logged and does not stop the dump.
pub fn dump_labeled_current_flows<S: FlowSink>(
    path: impl AsRef<Path>,
    table: &FlowTable<S>,
    exporter: &mut PacketIdExporter,
) -> Result<usize> {
    let mut writer = FlowCsvWriter::with_default_header(path)?;

    let mut current: Vec<&FlowRecord> = table.active_flows().filter(|f| f.packet_count() > 1).collect();
    current.sort_by(|a, b| a.flow_start_time.cmp(&b.flow_start_time).then_with(|| a.flow_id.cmp(&b.flow_id)));

    for flow in &current {
        writer.write_flow(flow)?;
        if let Err(e) = exporter.save(flow) {
            error!(flow_id = %flow.flow_id, error = %e, "packet id export failed");
        }
    }
    Ok(current.len())
}
