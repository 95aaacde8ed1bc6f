use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{FlowError, Result};
use crate::processor::FlowRecord;

/// Writes `<flowId>.json` files mapping each instance of a flow key to the
/// packet ids it was built from: `{ "1": [..], "2": [..] }`.
#[derive(Debug)]
pub struct PacketIdExporter {
    dir: PathBuf,
    enabled: bool,
    instances: HashMap<String, BTreeMap<u64, Vec<u64>>>,
}

impl PacketIdExporter {
    pub fn new(dir: impl Into<PathBuf>, enabled: bool) -> Self {
        Self { dir: dir.into(), enabled, instances: HashMap::new() }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool { self.enabled }

    pub fn dir(&self) -> &Path { &self.dir }

    pub fn path_for(&self, flow_id: &str) -> PathBuf {
        self.dir.join(format!("{flow_id}.json"))
    }

    /// Record `flow`'s packet ids under the next index for its flow id and
    /// rewrite that flow's file. Returns the index used, or `None` when
    /// nothing was written.
    pub fn save(&mut self, flow: &FlowRecord) -> Result<Option<u64>> {
        if !self.enabled {
            return Ok(None);
        }
        if flow.flow_id.is_empty() {
            return Err(FlowError::MissingFlowId);
        }
        let ids = match flow.packet_ids() {
            Some(ids) if !ids.is_empty() => ids,
            _ => {
                debug!(flow_id = %flow.flow_id, "no packet ids to save");
                return Ok(None);
            }
        };

        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;
            debug!(dir = %self.dir.display(), "created packet id directory");
        }

        let path = self.path_for(&flow.flow_id);
        let entries = self.instances.entry(flow.flow_id.clone()).or_default();
        let index = entries.len() as u64 + 1;
        entries.insert(index, ids.to_vec());

        let mut out = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut out, entries)?;
        out.flush()?;
        Ok(Some(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{PacketInfo, PROTO_UDP};
    use crate::config::FlowConfig;
    use std::net::{IpAddr, Ipv4Addr};

    fn flow(first_id: u64, keep_ids: bool) -> FlowRecord {
        let a = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));
        let b = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 9));
        let config = FlowConfig { save_packet_info: keep_ids, ..FlowConfig::default() };
        let mut f = FlowRecord::new(1, &PacketInfo::new(first_id, 0, a, 9000, b, 53, PROTO_UDP), &config);
        f.add_packet(&PacketInfo::new(first_id + 1, 5, b, 53, a, 9000, PROTO_UDP));
        f
    }

    #[test]
    fn disabled_exporter_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut exp = PacketIdExporter::new(dir.path(), false);
        assert_eq!(exp.save(&flow(1, true)).unwrap(), None);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn instances_get_increasing_indices() {
        let dir = tempfile::tempdir().unwrap();
        let mut exp = PacketIdExporter::new(dir.path().join("ids"), true);

        assert_eq!(exp.save(&flow(1, true)).unwrap(), Some(1));
        assert_eq!(exp.save(&flow(7, true)).unwrap(), Some(2));

        let path = exp.path_for("192.0.2.1-192.0.2.9-9000-53-17");
        let doc: serde_json::Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(doc, serde_json::json!({ "1": [1, 2], "2": [7, 8] }));
    }

    #[test]
    fn missing_ids_or_flow_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut exp = PacketIdExporter::new(dir.path(), true);

        assert_eq!(exp.save(&flow(1, false)).unwrap(), None);

        let mut nameless = flow(1, true);
        nameless.flow_id.clear();
        assert!(matches!(exp.save(&nameless), Err(FlowError::MissingFlowId)));
    }
}
