use serde::{Serialize, Deserialize};

/// Counters describing one flow table, published periodically by the
/// processing loop.
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct TableStats {
    pub active_flows: u64,
    pub finished_flows: u64,
    // Timed out or drained with a single packet
    pub dropped_flows: u64,
    pub total_packets: u64,
    pub total_bytes: u64,
    // Filled in by the processing loop, zero from FlowTable::stats
    pub packets_per_second: f64,
    pub bytes_per_second: f64,
    pub uptime_seconds: u64,
}

impl TableStats {
    /// Sum of several shards' counters. Rates are added too, uptime is the max.
    pub fn merge(&mut self, other: &TableStats) {
        self.active_flows += other.active_flows;
        self.finished_flows += other.finished_flows;
        self.dropped_flows += other.dropped_flows;
        self.total_packets += other.total_packets;
        self.total_bytes += other.total_bytes;
        self.packets_per_second += other.packets_per_second;
        self.bytes_per_second += other.bytes_per_second;
        self.uptime_seconds = self.uptime_seconds.max(other.uptime_seconds);
    }
}
