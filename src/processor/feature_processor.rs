use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread::{self, JoinHandle};
use tracing::info;

use crate::capture::PacketInfo;
use crate::config::FlowConfig;
use crate::types::TableStats;
use super::engine::{self, ChannelSink, FlowTable};
use super::flow::FlowRecord;

// Per-shard stats backlog; older reports are dropped when full
const STATS_BACKLOG: usize = 64;

/// Spreads packets over worker threads, one `FlowTable` each. Both
/// directions of a conversation hash to the same worker, so every flow
/// still sees its packets in order.
pub struct FeatureProcessor {
    running: Arc<AtomicBool>,
    shard_txs: Vec<Sender<PacketInfo>>,
    workers: Vec<JoinHandle<TableStats>>,
    flow_rx: Receiver<FlowRecord>,
    stats_rx: Receiver<TableStats>,
}

impl FeatureProcessor {
    pub fn start(config: FlowConfig, workers: usize) -> Result<Self> {
        if workers == 0 {
            bail!("at least one worker is required");
        }
        config.validate().context("invalid flow configuration")?;

        let running = Arc::new(AtomicBool::new(true));
        let (flow_tx, flow_rx) = unbounded();
        let (stats_tx, stats_rx) = bounded(STATS_BACKLOG * workers);

        let mut shard_txs = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for shard in 0..workers {
            let (tx, rx) = unbounded();
            let running = running.clone();
            let stats_tx = stats_tx.clone();
            let table = FlowTable::new(config.clone(), ChannelSink::new(flow_tx.clone()));

            let handle = thread::Builder::new()
                .name(format!("flow-shard-{shard}"))
                .spawn(move || engine::processing_loop(running, rx, stats_tx, table).stats())
                .with_context(|| format!("failed to spawn flow shard {shard}"))?;

            shard_txs.push(tx);
            handles.push(handle);
        }

        info!(workers, bidirectional = config.bidirectional, "feature processor started");
        Ok(Self { running, shard_txs, workers: handles, flow_rx, stats_rx })
    }

    /// Finished flows from every shard. Disconnects once all shards have stopped.
    pub fn flows(&self) -> Receiver<FlowRecord> { self.flow_rx.clone() }

    pub fn stats(&self) -> Receiver<TableStats> { self.stats_rx.clone() }

    pub fn running(&self) -> Arc<AtomicBool> { self.running.clone() }

    pub fn worker_count(&self) -> usize { self.shard_txs.len() }

    /// Shard owning the conversation `packet` belongs to.
    pub fn shard_for(&self, packet: &PacketInfo) -> usize {
        let mut hasher = DefaultHasher::new();
        packet.endpoint_pair().hash(&mut hasher);
        (hasher.finish() % self.shard_txs.len().max(1) as u64) as usize
    }

    pub fn submit(&self, packet: PacketInfo) -> Result<()> {
        if self.shard_txs.is_empty() {
            bail!("processor isn't running");
        }
        let shard = self.shard_for(&packet);
        self.shard_txs[shard]
            .send(packet)
            .map_err(|_| anyhow!("flow shard {shard} has stopped"))
    }

    /// Close the input, let every shard finish its queue and drain its
    /// table, then join them. Returns the combined table counters.
    pub fn stop(&mut self) -> Result<TableStats> {
        if self.shard_txs.is_empty() {
            bail!("processor isn't running");
        }
        self.shard_txs.clear();

        let mut total = TableStats::default();
        for (shard, handle) in self.workers.drain(..).enumerate() {
            let stats = handle
                .join()
                .map_err(|_| anyhow!("flow shard {shard} panicked"))?;
            total.merge(&stats);
        }
        self.running.store(false, Ordering::Relaxed);

        info!(finished = total.finished_flows, packets = total.total_packets, "feature processor stopped");
        Ok(total)
    }
}

impl Drop for FeatureProcessor {
    fn drop(&mut self) {
        if !self.shard_txs.is_empty() {
            let _ = self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{PROTO_TCP, TcpFlag, TcpFlags};
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn zero_workers_is_an_error() {
        assert!(FeatureProcessor::start(FlowConfig::default(), 0).is_err());
    }

    #[test]
    fn both_directions_share_a_shard() {
        let p = FeatureProcessor::start(FlowConfig::default(), 4).unwrap();
        let a = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        for port in 1000..1050u16 {
            let b = IpAddr::V4(Ipv4Addr::new(10, 0, (port % 7) as u8, 2));
            let out = PacketInfo::new(0, 0, a, port, b, 443, PROTO_TCP);
            let back = PacketInfo::new(0, 0, b, 443, a, port, PROTO_TCP);
            assert_eq!(p.shard_for(&out), p.shard_for(&back));
        }
    }

    #[test]
    fn stop_drains_every_shard() {
        let mut p = FeatureProcessor::start(FlowConfig::default(), 3).unwrap();
        let flows = p.flows();
        let a = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let b = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        let ack = TcpFlags::empty().with(TcpFlag::Ack);

        for port in 0..20u16 {
            p.submit(PacketInfo::new(0, 10, a, 2000 + port, b, 80, PROTO_TCP).with_flags(ack)).unwrap();
            p.submit(PacketInfo::new(0, 20, b, 80, a, 2000 + port, PROTO_TCP).with_flags(ack)).unwrap();
        }

        let stats = p.stop().unwrap();
        assert_eq!(stats.total_packets, 40);
        assert_eq!(stats.finished_flows, 20);
        assert_eq!(flows.try_iter().count(), 20);
        assert!(p.submit(PacketInfo::new(0, 30, a, 1, b, 2, PROTO_TCP)).is_err());
    }
}
