use crossbeam_channel::{select, tick, Receiver, Sender};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::capture::{protocol_name, PacketInfo, TcpFlag};
use crate::config::FlowConfig;
use crate::types::TableStats;
use super::flow::{FlowRecord, FlowStatus};

/// Table sizes that are multiples of this are logged.
const SIZE_LOG_INTERVAL: usize = 50;

/// Receives every flow instance the table closes.
pub trait FlowSink: Send {
    fn accept(&mut self, flow: FlowRecord);
}

impl<S: FlowSink + ?Sized> FlowSink for Box<S> {
    fn accept(&mut self, flow: FlowRecord) {
        (**self).accept(flow)
    }
}

/// Callback invoked synchronously when a flow finishes.
pub trait FlowListener: Send {
    fn on_flow_generated(&mut self, flow: &FlowRecord);
}

/// Adapts a `FlowListener` to the sink interface.
pub struct ListenerSink<L> {
    listener: L,
}

impl<L: FlowListener> ListenerSink<L> {
    pub fn new(listener: L) -> Self {
        Self { listener }
    }

    pub fn listener(&self) -> &L { &self.listener }

    pub fn into_inner(self) -> L { self.listener }
}

impl<L: FlowListener> FlowSink for ListenerSink<L> {
    fn accept(&mut self, flow: FlowRecord) {
        self.listener.on_flow_generated(&flow);
    }
}

/// In-memory store of finished flows keyed by completion order, from 1.
#[derive(Debug, Default)]
pub struct FinishedFlowStore {
    flows: BTreeMap<u64, FlowRecord>,
    counter: u64,
}

impl FinishedFlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flows(&self) -> &BTreeMap<u64, FlowRecord> { &self.flows }

    pub fn len(&self) -> usize { self.flows.len() }

    pub fn is_empty(&self) -> bool { self.flows.is_empty() }

    /// Hand over everything stored so far. Numbering continues afterwards.
    pub fn take(&mut self) -> BTreeMap<u64, FlowRecord> {
        std::mem::take(&mut self.flows)
    }
}

impl FlowSink for FinishedFlowStore {
    fn accept(&mut self, flow: FlowRecord) {
        self.counter += 1;
        self.flows.insert(self.counter, flow);
    }
}

/// Forwards finished flows to another thread.
pub struct ChannelSink {
    tx: Sender<FlowRecord>,
}

impl ChannelSink {
    pub fn new(tx: Sender<FlowRecord>) -> Self {
        Self { tx }
    }
}

impl FlowSink for ChannelSink {
    fn accept(&mut self, flow: FlowRecord) {
        if let Err(e) = self.tx.send(flow) {
            warn!(flow_id = %e.0.flow_id, "finished flow dropped, receiver gone");
        }
    }
}

/// Table of in-progress flows. Owns every record it holds; closed
/// instances go to the sink `S`.
pub struct FlowTable<S: FlowSink = Box<dyn FlowSink>> {
    config: FlowConfig,
    flows: HashMap<String, FlowRecord>,
    sink: S,
    next_instance: u64,

    finished: u64,
    dropped: u64,
    total_packets: u64,
    total_bytes: u64,
}

impl FlowTable<FinishedFlowStore> {
    /// Table whose finished flows are kept in an ordered in-memory store.
    pub fn with_store(config: FlowConfig) -> Self {
        Self::new(config, FinishedFlowStore::new())
    }

    pub fn finished_flows(&self) -> &BTreeMap<u64, FlowRecord> {
        self.sink.flows()
    }
}

impl<S: FlowSink> FlowTable<S> {
    pub fn new(config: FlowConfig, sink: S) -> Self {
        Self {
            config,
            flows: HashMap::new(),
            sink,
            next_instance: 1,
            finished: 0,
            dropped: 0,
            total_packets: 0,
            total_bytes: 0,
        }
    }

    #[inline]
    pub fn config(&self) -> &FlowConfig { &self.config }

    pub fn sink(&self) -> &S { &self.sink }

    pub fn sink_mut(&mut self) -> &mut S { &mut self.sink }

    pub fn into_sink(self) -> S { self.sink }

    fn take_instance(&mut self) -> u64 {
        let id = self.next_instance;
        self.next_instance += 1;
        id
    }

    /// Key of the active flow this packet belongs to, in either direction.
    fn lookup_key(&self, packet: &PacketInfo) -> Option<String> {
        let fwd = packet.forward_key();
        if self.flows.contains_key(&fwd) {
            return Some(fwd);
        }
        let bwd = packet.backward_key();
        self.flows.contains_key(&bwd).then_some(bwd)
    }

    /// Route one packet: open, continue, time out or FIN-close its flow.
    /// Packets must arrive in non-decreasing timestamp order.
    pub fn add_packet(&mut self, packet: &PacketInfo) {
        self.total_packets += 1;
        self.total_bytes += packet.payload_bytes as u64;

        let Some(key) = self.lookup_key(packet) else {
            let instance = self.take_instance();
            let flow = FlowRecord::new(instance, packet, &self.config);
            self.flows.insert(flow.flow_id.clone(), flow);
            self.log_size();
            return;
        };

        let flow_timeout = self.config.flow_timeout_us();
        let activity_timeout = self.config.activity_timeout_us();
        let instance = self.next_instance;
        let Some(flow) = self.flows.get_mut(&key) else { return };

        if packet.timestamp.saturating_sub(flow.flow_start_time) > flow_timeout {
            // Same key, fresh statistics
            let next = FlowRecord::continuation(instance, packet, flow);
            let expired = std::mem::replace(flow, next);
            self.next_instance += 1;
            self.close(expired, FlowStatus::TimedOut);
        } else if packet.has_flag(TcpFlag::Fin) {
            flow.add_packet(packet);
            if let Some(done) = self.flows.remove(&key) {
                self.close(done, FlowStatus::FinClosed);
            }
            self.log_size();
        } else {
            flow.update_active_idle(packet.timestamp, activity_timeout);
            flow.add_packet(packet);
        }
    }

    /// Finalize and emit a removed instance. Only FIN closures bypass the
    /// single-packet filter.
    fn close(&mut self, mut flow: FlowRecord, status: FlowStatus) {
        flow.finalize(status, self.config.flow_timeout_us());

        if status != FlowStatus::FinClosed && flow.packet_count() <= 1 {
            trace!(flow_id = %flow.flow_id, ?status, "single-packet flow dropped");
            self.dropped += 1;
            return;
        }

        debug!(
            flow_id = %flow.flow_id,
            instance = flow.instance,
            protocol = protocol_name(flow.protocol),
            ?status,
            packets = flow.packet_count(),
            "flow finished"
        );
        self.finished += 1;
        self.sink.accept(flow);
    }

    fn log_size(&self) {
        let n = self.flows.len();
        if n > 0 && n % SIZE_LOG_INTERVAL == 0 {
            debug!(active = n, "flow table size");
        }
    }

    /// Evict flows older than the flow timeout at packet time `now`.
    /// Returns how many were removed.
    pub fn expire_idle(&mut self, now: u64) -> usize {
        let flow_timeout = self.config.flow_timeout_us();
        let mut expired: Vec<String> = self
            .flows
            .iter()
            .filter(|(_, f)| now.saturating_sub(f.flow_start_time) > flow_timeout)
            .map(|(k, _)| k.clone())
            .collect();
        expired.sort();

        let count = expired.len();
        for key in expired {
            if let Some(flow) = self.flows.remove(&key) {
                self.close(flow, FlowStatus::TimedOut);
            }
        }
        if count > 0 {
            debug!(expired = count, active = self.flows.len(), "idle sweep");
        }
        count
    }

    /// End-of-capture flush. Every active flow is closed, oldest first.
    pub fn drain(&mut self) {
        let mut remaining: Vec<FlowRecord> = self.flows.drain().map(|(_, f)| f).collect();
        remaining.sort_by(|a, b| {
            a.flow_start_time
                .cmp(&b.flow_start_time)
                .then_with(|| a.flow_id.cmp(&b.flow_id))
        });
        for flow in remaining {
            self.close(flow, FlowStatus::Drained);
        }
    }

    pub fn active_flows(&self) -> impl Iterator<Item = &FlowRecord> {
        self.flows.values()
    }

    pub fn flow(&self, key: &str) -> Option<&FlowRecord> {
        self.flows.get(key)
    }

    #[inline]
    pub fn active_count(&self) -> usize { self.flows.len() }

    pub fn stats(&self) -> TableStats {
        TableStats {
            active_flows: self.flows.len() as u64,
            finished_flows: self.finished,
            dropped_flows: self.dropped,
            total_packets: self.total_packets,
            total_bytes: self.total_bytes,
            ..TableStats::default()
        }
    }
}

/// Feed `table` from `packet_rx` until `running` is cleared or the channel
/// disconnects, then drain it and hand it back. Flows only time out on
/// packet arrival or at that final drain, never on wall-clock time.
pub fn processing_loop<S: FlowSink>(
    running: Arc<AtomicBool>,
    packet_rx: Receiver<PacketInfo>,
    stats_tx: Sender<TableStats>,
    mut table: FlowTable<S>,
) -> FlowTable<S> {
    let started = Instant::now();

    let stats_tick = tick(Duration::from_secs(1));

    let mut last_rate = Instant::now();
    let mut pkts_acc: u64 = 0;
    let mut bytes_acc: u64 = 0;
    let mut disconnected = false;

    loop {
        if !running.load(Ordering::Relaxed) || disconnected { break; }

        select! {
            recv(packet_rx) -> msg => {
                match msg {
                    Ok(pkt) => {
                        pkts_acc += 1;
                        bytes_acc += pkt.payload_bytes as u64;
                        table.add_packet(&pkt);
                    }
                    Err(_) => disconnected = true,
                }
            },

            recv(stats_tick) -> _ => {
                let dt = last_rate.elapsed().as_secs_f64().max(1e-6);
                let stats = TableStats {
                    packets_per_second: pkts_acc as f64 / dt,
                    bytes_per_second: bytes_acc as f64 / dt,
                    uptime_seconds: started.elapsed().as_secs(),
                    ..table.stats()
                };

                let _ = stats_tx.try_send(stats);
                pkts_acc = 0;
                bytes_acc = 0;
                last_rate = Instant::now();
            },
        }
    }

    table.drain();
    debug!(stats = ?table.stats(), "processing loop stopped");
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{TcpFlags, PROTO_TCP, PROTO_UDP};
    use crossbeam_channel::unbounded;
    use std::net::{IpAddr, Ipv4Addr};

    const A: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 1, 1, 1));
    const B: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 1, 1, 2));
    const C: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 1, 1, 3));

    fn tcp(id: u64, ts: u64, src: IpAddr, dst: IpAddr, flags: &[TcpFlag]) -> PacketInfo {
        let (sport, dport) = if src == A { (40000, 443) } else { (443, 40000) };
        PacketInfo::new(id, ts, src, sport, dst, dport, PROTO_TCP)
            .with_payload(100)
            .with_header(20)
            .with_flags(flags.iter().copied().collect::<TcpFlags>())
    }

    #[test]
    fn reverse_packets_join_the_same_flow() {
        let mut table = FlowTable::with_store(FlowConfig::default());
        table.add_packet(&tcp(1, 0, A, B, &[TcpFlag::Syn]));
        table.add_packet(&tcp(2, 10, B, A, &[TcpFlag::Syn, TcpFlag::Ack]));
        table.add_packet(&tcp(3, 20, A, B, &[TcpFlag::Ack]));

        assert_eq!(table.active_count(), 1);
        let flow = table.flow("10.1.1.1-10.1.1.2-40000-443-6").unwrap();
        assert_eq!(flow.fwd.packets(), 2);
        assert_eq!(flow.bwd.packets(), 1);
    }

    #[test]
    fn fin_closes_and_emits_immediately() {
        let mut table = FlowTable::with_store(FlowConfig::default());
        table.add_packet(&tcp(1, 0, A, B, &[TcpFlag::Syn]));
        table.add_packet(&tcp(2, 500_000, B, A, &[TcpFlag::Ack]));
        table.add_packet(&tcp(3, 2_600_000, A, B, &[TcpFlag::Fin]));

        assert_eq!(table.active_count(), 0);
        let store = table.finished_flows();
        assert_eq!(store.keys().copied().collect::<Vec<_>>(), vec![1]);

        let flow = &store[&1];
        assert_eq!(flow.status, FlowStatus::FinClosed);
        assert_eq!(flow.fwd.packets(), 2);
        assert_eq!(flow.bwd.packets(), 1);
        assert_eq!(flow.subflow_count(), 1);
        assert_eq!(flow.flag_count(TcpFlag::Fin), 1);
    }

    #[test]
    fn fin_on_first_packet_opens_a_flow() {
        let mut table = FlowTable::with_store(FlowConfig::default());
        table.add_packet(&tcp(1, 0, A, B, &[TcpFlag::Fin]));
        assert_eq!(table.active_count(), 1);
        assert!(table.finished_flows().is_empty());
    }

    #[test]
    fn timeout_reuses_key_and_drops_single_packet_instance() {
        let mut table = FlowTable::with_store(FlowConfig::default());
        table.add_packet(&tcp(1, 0, A, B, &[]));
        table.add_packet(&tcp(2, 121_000_000, B, A, &[]));

        // lone first packet is noise
        assert!(table.finished_flows().is_empty());
        assert_eq!(table.stats().dropped_flows, 1);

        let flow = table.flow("10.1.1.1-10.1.1.2-40000-443-6").unwrap();
        assert_eq!(flow.instance, 2);
        assert_eq!(flow.src, A);
        assert_eq!(flow.bwd.packets(), 1);
    }

    #[test]
    fn timeout_emits_multi_packet_instance() {
        let mut table = FlowTable::with_store(FlowConfig::default());
        table.add_packet(&tcp(1, 0, A, B, &[]));
        table.add_packet(&tcp(2, 1_000, B, A, &[]));
        table.add_packet(&tcp(3, 130_000_000, A, B, &[]));

        let store = table.finished_flows();
        assert_eq!(store.len(), 1);
        assert_eq!(store[&1].status, FlowStatus::TimedOut);
        assert_eq!(store[&1].packet_count(), 2);
        assert_eq!(store[&1].instance, 1);
        assert_eq!(table.active_count(), 1);
    }

    #[test]
    fn drain_skips_single_packet_flows() {
        let mut table = FlowTable::with_store(FlowConfig::default());
        table.add_packet(&tcp(1, 0, A, B, &[]));
        table.add_packet(&tcp(2, 5, B, A, &[]));
        let lone = PacketInfo::new(3, 7, C, 5000, B, 53, PROTO_UDP);
        table.add_packet(&lone);

        table.drain();
        assert_eq!(table.active_count(), 0);
        assert_eq!(table.finished_flows().len(), 1);
        assert_eq!(table.finished_flows()[&1].status, FlowStatus::Drained);

        let stats = table.stats();
        assert_eq!(stats.finished_flows, 1);
        assert_eq!(stats.dropped_flows, 1);
        assert_eq!(stats.total_packets, 3);
    }

    #[test]
    fn expire_idle_uses_flow_start() {
        let mut table = FlowTable::with_store(FlowConfig::default());
        table.add_packet(&tcp(1, 0, A, B, &[]));
        table.add_packet(&tcp(2, 1_000, B, A, &[]));

        assert_eq!(table.expire_idle(120_000_000), 0);
        assert_eq!(table.expire_idle(120_000_001), 1);
        assert_eq!(table.active_count(), 0);
        assert_eq!(table.finished_flows().len(), 1);
    }

    struct Collect(Vec<String>);

    impl FlowListener for Collect {
        fn on_flow_generated(&mut self, flow: &FlowRecord) {
            self.0.push(flow.flow_id.clone());
        }
    }

    #[test]
    fn listener_receives_flows_instead_of_store() {
        let mut table = FlowTable::new(FlowConfig::default(), ListenerSink::new(Collect(Vec::new())));
        table.add_packet(&tcp(1, 0, A, B, &[]));
        table.add_packet(&tcp(2, 10, A, B, &[TcpFlag::Fin]));

        let seen = table.into_sink().into_inner().0;
        assert_eq!(seen, vec!["10.1.1.1-10.1.1.2-40000-443-6".to_string()]);
    }

    #[test]
    fn boxed_channel_sink() {
        let (tx, rx) = unbounded();
        let sink: Box<dyn FlowSink> = Box::new(ChannelSink::new(tx));
        let mut table: FlowTable = FlowTable::new(FlowConfig::default(), sink);
        table.add_packet(&tcp(1, 0, A, B, &[]));
        table.add_packet(&tcp(2, 10, B, A, &[TcpFlag::Fin]));

        let flow = rx.try_recv().unwrap();
        assert_eq!(flow.packet_count(), 2);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn processing_loop_drains_on_disconnect() {
        let (pkt_tx, pkt_rx) = unbounded();
        let (stats_tx, _stats_rx) = unbounded();
        let running = Arc::new(AtomicBool::new(true));

        pkt_tx.send(tcp(1, 0, A, B, &[])).unwrap();
        pkt_tx.send(tcp(2, 10, B, A, &[])).unwrap();
        drop(pkt_tx);

        let table = processing_loop(running, pkt_rx, stats_tx, FlowTable::with_store(FlowConfig::default()));
        assert_eq!(table.active_count(), 0);
        assert_eq!(table.finished_flows().len(), 1);
    }

    #[test]
    fn processing_loop_keeps_identity_across_idle_wall_time() {
        let (pkt_tx, pkt_rx) = unbounded();
        let (stats_tx, _stats_rx) = unbounded();
        let running = Arc::new(AtomicBool::new(true));

        let worker = std::thread::spawn(move || {
            processing_loop(running, pkt_rx, stats_tx, FlowTable::with_store(FlowConfig::default()))
        });

        pkt_tx.send(tcp(1, 0, A, B, &[])).unwrap();
        pkt_tx.send(tcp(2, 1_000, B, A, &[])).unwrap();
        pkt_tx.send(tcp(3, 130_000_000, C, B, &[])).unwrap();
        // longer than the stats tick, so the loop wakes up on wall time
        std::thread::sleep(Duration::from_millis(1_200));
        pkt_tx.send(tcp(4, 131_000_000, B, A, &[])).unwrap();
        pkt_tx.send(tcp(5, 131_500_000, A, B, &[])).unwrap();
        drop(pkt_tx);

        let table = worker.join().unwrap();
        let flows: Vec<&FlowRecord> = table
            .finished_flows()
            .values()
            .filter(|f| f.src != C)
            .collect();

        assert_eq!(flows.len(), 2);
        for flow in &flows {
            assert_eq!(flow.flow_id, "10.1.1.1-10.1.1.2-40000-443-6");
            assert_eq!(flow.src, A);
            assert_eq!(flow.packet_count(), 2);
        }
        assert_eq!(flows[0].status, FlowStatus::TimedOut);
        assert_eq!(flows[1].status, FlowStatus::Drained);
    }
}
